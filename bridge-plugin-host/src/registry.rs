//! Plugin registry
//!
//! Activates plugins against the host API and tears down everything a
//! plugin registered when it is unloaded. Teardown goes through the same
//! unsubscribe/unregister calls a plugin would make itself.

use crate::api::HostApi;
use crate::audit::{self, record_or_warn};
use crate::commands::{CommandFuture, CommandHandler};
use async_trait::async_trait;
use bridge_plugin_api::{Args, HandlerId, PluginManifest, API_VERSION};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::RwLock;

/// A plugin activated by the host
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Name, version and API version of the plugin
    fn manifest(&self) -> PluginManifest;

    /// Register commands and subscriptions
    async fn activate(&self, ctx: &PluginContext) -> anyhow::Result<()>;

    /// Called before the plugin's registrations are torn down
    async fn deactivate(&self, _ctx: &PluginContext) {}
}

/// Errors that can occur during registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("API version mismatch for '{plugin}': expected {expected}, got {actual}")]
    ApiVersionMismatch {
        plugin: String,
        expected: u32,
        actual: u32,
    },

    #[error("Plugin '{plugin}' failed to activate: {source}")]
    Activation {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Default)]
struct Owned {
    handlers: Vec<(String, HandlerId)>,
    commands: Vec<(String, CommandHandler)>,
}

/// The host API as seen by one plugin.
///
/// Records what the plugin registers so it can be removed on unload.
pub struct PluginContext {
    api: HostApi,
    plugin: String,
    owned: Mutex<Owned>,
}

impl PluginContext {
    fn new(api: HostApi, plugin: &str) -> Self {
        Self {
            api,
            plugin: plugin.to_string(),
            owned: Mutex::new(Owned::default()),
        }
    }

    fn owned(&self) -> std::sync::MutexGuard<'_, Owned> {
        self.owned.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Name of the plugin this context belongs to
    pub fn plugin_name(&self) -> &str {
        &self.plugin
    }

    /// The unscoped host API
    pub fn api(&self) -> &HostApi {
        &self.api
    }

    pub fn register_command<F>(&self, name: &str, handler: F)
    where
        F: Fn(Args) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let handler = self.api.register_command(name, handler);
        self.owned().commands.push((name.to_string(), handler));
    }

    pub fn register_async_command<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler = self.api.register_async_command(name, handler);
        self.owned().commands.push((name.to_string(), handler));
    }

    pub fn execute_command(&self, name: &str, args: Args) -> CommandFuture {
        self.api.execute_command(name, args)
    }

    pub fn on<F>(&self, event: &str, handler: F) -> HandlerId
    where
        F: Fn(&[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.api.on(event, handler);
        self.owned().handlers.push((event.to_string(), id.clone()));
        id
    }

    pub fn off(&self, event: &str, id: &HandlerId) -> bool {
        self.owned().handlers.retain(|(e, h)| !(e == event && h == id));
        self.api.off(event, id)
    }

    pub fn trigger_command(&self, event: &str, command: &str) -> HandlerId {
        let id = self.api.trigger_command(event, command);
        self.owned().handlers.push((event.to_string(), id.clone()));
        id
    }

    /// Number of live registrations (subscriptions, commands)
    pub fn registrations(&self) -> (usize, usize) {
        let owned = self.owned();
        (owned.handlers.len(), owned.commands.len())
    }

    /// Remove everything this plugin registered.
    ///
    /// A command another plugin has since re-registered is left alone.
    fn teardown(&self) {
        let owned = std::mem::take(&mut *self.owned());
        for (event, id) in &owned.handlers {
            self.api.off(event, id);
        }
        for (name, handler) in &owned.commands {
            self.api.commands().unregister_if_same(name, handler);
        }
        tracing::debug!(
            plugin = %self.plugin,
            handlers = owned.handlers.len(),
            commands = owned.commands.len(),
            "Plugin registrations removed"
        );
    }
}

struct PluginEntry {
    plugin: Arc<dyn Plugin>,
    manifest: PluginManifest,
    context: PluginContext,
}

/// A thread-safe registry of active plugins
#[derive(Clone)]
pub struct PluginRegistry {
    api: HostApi,
    plugins: Arc<RwLock<HashMap<String, PluginEntry>>>,
}

impl PluginRegistry {
    pub fn new(api: HostApi) -> Self {
        Self {
            api,
            plugins: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn api(&self) -> &HostApi {
        &self.api
    }

    /// Activate a plugin, replacing any loaded plugin of the same name
    pub async fn load(&self, plugin: Arc<dyn Plugin>) -> Result<String, RegistryError> {
        let manifest = plugin.manifest();
        let name = manifest.name.clone();

        if manifest.api_version != API_VERSION {
            return Err(RegistryError::ApiVersionMismatch {
                plugin: name,
                expected: API_VERSION,
                actual: manifest.api_version,
            });
        }

        self.unload(&name).await;

        let context = PluginContext::new(self.api.clone(), &name);
        if let Err(source) = plugin.activate(&context).await {
            context.teardown();
            tracing::warn!(plugin = %name, error = %source, "Plugin activation failed");
            return Err(RegistryError::Activation {
                plugin: name,
                source,
            });
        }

        record_or_warn(
            &**self.api.audit(),
            audit::plugin_loaded(&name, manifest.version.clone()),
        );
        tracing::info!(plugin = %name, version = ?manifest.version, "Plugin loaded");

        let displaced = self.plugins.write().await.insert(
            name.clone(),
            PluginEntry {
                plugin,
                manifest,
                context,
            },
        );

        // A concurrent load of the same name may have finished first
        if let Some(previous) = displaced {
            previous.plugin.deactivate(&previous.context).await;
            previous.context.teardown();
            record_or_warn(&**self.api.audit(), audit::plugin_unloaded(&name));
            tracing::info!(plugin = %name, "Displaced plugin instance unloaded");
        }
        Ok(name)
    }

    /// Deactivate a plugin and remove its registrations
    pub async fn unload(&self, name: &str) -> bool {
        let Some(entry) = self.plugins.write().await.remove(name) else {
            return false;
        };

        entry.plugin.deactivate(&entry.context).await;
        entry.context.teardown();

        record_or_warn(&**self.api.audit(), audit::plugin_unloaded(name));
        tracing::info!(plugin = %name, "Plugin unloaded");
        true
    }

    /// Unload every plugin, e.g. at shutdown
    pub async fn unload_all(&self) -> usize {
        let names = self.list_plugins().await;
        let mut count = 0;
        for name in names {
            if self.unload(&name).await {
                count += 1;
            }
        }
        count
    }

    /// Get a sorted list of loaded plugin names
    pub async fn list_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn has_plugin(&self, name: &str) -> bool {
        self.plugins.read().await.contains_key(name)
    }

    pub async fn get_manifest(&self, name: &str) -> Option<PluginManifest> {
        self.plugins
            .read()
            .await
            .get(name)
            .map(|e| e.manifest.clone())
    }

    pub async fn len(&self) -> usize {
        self.plugins.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.plugins.read().await.is_empty()
    }
}
