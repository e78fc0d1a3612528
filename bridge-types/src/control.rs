//! Outbound item commands
//!
//! Every call is independent: a failure is logged and audited by the host
//! and never stops the caller from issuing the next one.

use bridge_plugin_api::commands;
use bridge_plugin_host::HostApi;
use serde_json::Value;

/// Issues `items.*` commands on behalf of the types plugin
#[derive(Clone, Debug)]
pub struct ItemControl {
    api: HostApi,
    origin: String,
}

impl ItemControl {
    pub fn new(api: HostApi, origin: impl Into<String>) -> Self {
        Self {
            api,
            origin: origin.into(),
        }
    }

    /// Play an item, given its id or its full record
    pub fn play_item(&self, item: Value) {
        tracing::trace!(item = %item, "Playing item");
        self.api
            .fire_command(&self.origin, commands::PLAY_ITEM, vec![item]);
    }

    /// Stop an item, given its id or its full record
    pub fn stop_item(&self, item: Value) {
        tracing::trace!(item = %item, "Stopping item");
        self.api
            .fire_command(&self.origin, commands::STOP_ITEM, vec![item]);
    }

    /// Raise or refresh an issue of `kind` on an item
    pub fn apply_issue(&self, item_id: &str, kind: &str, details: Value) {
        self.api.fire_command(
            &self.origin,
            commands::APPLY_ISSUE,
            vec![Value::from(item_id), Value::from(kind), details],
        );
    }

    /// Clear an issue of `kind`; clearing an absent issue is fine
    pub fn remove_issue(&self, item_id: &str, kind: &str) {
        self.api.fire_command(
            &self.origin,
            commands::REMOVE_ISSUE,
            vec![Value::from(item_id), Value::from(kind)],
        );
    }
}
