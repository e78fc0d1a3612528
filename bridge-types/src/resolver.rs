//! Item graph resolver
//!
//! Looks up the handler for an item's type tag and lets it decide which
//! other items to play or stop. Tags without a handler are ignored so newer
//! item types pass through untouched.

use crate::ancestry::AncestorLookup;
use crate::control::ItemControl;
use crate::guard::LoopGuard;
use bridge_plugin_api::{types, GroupPlayMode, Item, ReferenceAction};
use bridge_plugin_host::{BoxFuture, HostApi};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Behavior of one item type
pub trait ItemTypeHandler: Send + Sync {
    fn on_play(&self, _item: &Item) {}

    fn on_stop(&self, _item: &Item) {}

    /// React to an item change; returned work runs asynchronously
    fn on_change(&self, _item: &Item) -> Option<BoxFuture<'static, ()>> {
        None
    }
}

/// Groups trigger their children
pub struct GroupHandler {
    items: ItemControl,
}

impl GroupHandler {
    pub fn new(items: ItemControl) -> Self {
        Self { items }
    }
}

impl ItemTypeHandler for GroupHandler {
    fn on_play(&self, item: &Item) {
        match item.play_mode() {
            GroupPlayMode::First => {
                if let Some(first) = item.children.first() {
                    self.items.play_item(first.clone());
                }
            }
            GroupPlayMode::All => {
                for child in &item.children {
                    self.items.play_item(child.clone());
                }
            }
        }
    }

    fn on_stop(&self, item: &Item) {
        // Stopping ignores the play mode
        for child in &item.children {
            self.items.stop_item(child.clone());
        }
    }
}

/// References forward to their target and guard against ancestor loops
pub struct ReferenceHandler {
    items: ItemControl,
    guard: Arc<LoopGuard>,
}

impl ReferenceHandler {
    pub fn new(items: ItemControl, lookup: Arc<dyn AncestorLookup>) -> Self {
        Self {
            guard: Arc::new(LoopGuard::new(lookup, items.clone())),
            items,
        }
    }

    pub fn guard(&self) -> &Arc<LoopGuard> {
        &self.guard
    }

    fn apply(&self, item: &Item, action: ReferenceAction) {
        let Some(target) = item.target_id() else {
            return;
        };
        match action {
            ReferenceAction::None => {}
            ReferenceAction::Play => self.items.play_item(Value::from(target)),
            ReferenceAction::Stop => self.items.stop_item(Value::from(target)),
        }
    }
}

impl ItemTypeHandler for ReferenceHandler {
    fn on_play(&self, item: &Item) {
        self.apply(item, item.play_action());
    }

    fn on_stop(&self, item: &Item) {
        self.apply(item, item.stop_action());
    }

    fn on_change(&self, item: &Item) -> Option<BoxFuture<'static, ()>> {
        Some(self.guard.check(item))
    }
}

/// Table from type tag to handler
#[derive(Default)]
pub struct ItemResolver {
    handlers: HashMap<String, Arc<dyn ItemTypeHandler>>,
}

impl ItemResolver {
    /// Resolver with the built-in group and reference handlers
    pub fn new(items: ItemControl, lookup: Arc<dyn AncestorLookup>) -> Self {
        Self::empty()
            .with_handler(types::GROUP, GroupHandler::new(items.clone()))
            .with_handler(types::REFERENCE, ReferenceHandler::new(items, lookup))
    }

    /// Resolver issuing commands on `api` as the `types` plugin
    pub fn for_host(api: &HostApi, lookup: Arc<dyn AncestorLookup>) -> Self {
        Self::new(ItemControl::new(api.clone(), crate::PLUGIN_NAME), lookup)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Add or replace the handler for a type tag
    pub fn with_handler(mut self, tag: &str, handler: impl ItemTypeHandler + 'static) -> Self {
        self.handlers.insert(tag.to_string(), Arc::new(handler));
        self
    }

    pub fn handler_for(&self, tag: &str) -> Option<&Arc<dyn ItemTypeHandler>> {
        self.handlers.get(tag)
    }

    pub fn play(&self, item: &Item) {
        match self.handler_for(&item.item_type) {
            Some(handler) => handler.on_play(item),
            None => tracing::trace!(item_type = %item.item_type, "No play handler for type"),
        }
    }

    pub fn stop(&self, item: &Item) {
        match self.handler_for(&item.item_type) {
            Some(handler) => handler.on_stop(item),
            None => tracing::trace!(item_type = %item.item_type, "No stop handler for type"),
        }
    }

    pub fn change(&self, item: &Item) -> Option<BoxFuture<'static, ()>> {
        self.handler_for(&item.item_type)?.on_change(item)
    }
}
