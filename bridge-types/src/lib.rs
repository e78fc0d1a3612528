//! bridge-types: built-in item types
//!
//! Groups play their children according to their play mode, references
//! play or stop their target, and references targeting one of their own
//! ancestors get an advisory issue.

pub mod ancestry;
pub mod control;
pub mod guard;
pub mod resolver;

pub use ancestry::{AncestorLookup, ParentWalkLookup};
pub use control::ItemControl;
pub use guard::{LoopGuard, ANCESTOR_LOOP_DESCRIPTION, ANCESTOR_LOOP_ISSUE};
pub use resolver::{GroupHandler, ItemResolver, ItemTypeHandler, ReferenceHandler};

use anyhow::Context;
use async_trait::async_trait;
use bridge_plugin_api::{events, Item, PluginManifest};
use bridge_plugin_host::{Plugin, PluginContext};
use serde_json::Value;
use std::sync::Arc;

pub const PLUGIN_NAME: &str = "bridge-plugin-types";

/// The types plugin
#[derive(Default)]
pub struct TypesPlugin {
    lookup: Option<Arc<dyn AncestorLookup>>,
}

impl TypesPlugin {
    /// Plugin resolving ancestors through the host's `items.getItem`
    pub fn new() -> Self {
        Self::default()
    }

    /// Plugin using a custom ancestor lookup
    pub fn with_lookup(lookup: Arc<dyn AncestorLookup>) -> Self {
        Self {
            lookup: Some(lookup),
        }
    }
}

#[async_trait]
impl Plugin for TypesPlugin {
    fn manifest(&self) -> PluginManifest {
        PluginManifest::new(PLUGIN_NAME).version(env!("CARGO_PKG_VERSION"))
    }

    async fn activate(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        let lookup: Arc<dyn AncestorLookup> = match &self.lookup {
            Some(lookup) => lookup.clone(),
            None => Arc::new(ParentWalkLookup::new(ctx.api().clone())),
        };
        let items = ItemControl::new(ctx.api().clone(), ctx.plugin_name());
        let resolver = Arc::new(ItemResolver::new(items, lookup));

        let r = resolver.clone();
        ctx.on(events::ITEM_PLAY, move |args| {
            r.play(&item_from_args(args)?);
            Ok(())
        });

        let r = resolver.clone();
        ctx.on(events::ITEM_STOP, move |args| {
            r.stop(&item_from_args(args)?);
            Ok(())
        });

        let r = resolver;
        ctx.on(events::ITEM_CHANGE, move |args| {
            let item = item_from_args(args)?;
            // Resolve the runtime first so a check is only started if it can run
            let runtime = tokio::runtime::Handle::try_current()
                .context("no async runtime to run item change handler")?;
            if let Some(work) = r.change(&item) {
                runtime.spawn(work);
            }
            Ok(())
        });

        tracing::debug!(plugin = PLUGIN_NAME, "Item type handlers registered");
        Ok(())
    }
}

/// The first event argument as an item record
fn item_from_args(args: &[Value]) -> anyhow::Result<Item> {
    let value = args.first().context("event carries no item")?;
    Item::from_value(value).context("malformed item payload")
}
