//! bridge-plugin-host: command and event dispatch core
//!
//! Plugins talk to the host through six operations: `register_command`,
//! `register_async_command`, `execute_command`, `on`, `off` and
//! `trigger_command`. All of them live on [`HostApi`].

pub mod api;
pub mod audit;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod registry;
pub mod tracing_support;

pub use api::HostApi;
pub use commands::{BoxFuture, CommandFuture, CommandHandler, CommandRegistry, CommandResult};
pub use config::{ConfigError, HostConfig};
pub use error::CommandError;
pub use events::{EventBus, EventHandler};
pub use registry::{Plugin, PluginContext, PluginRegistry, RegistryError};
pub use tracing_support::{init_subscriber, init_subscriber_with_config, TracingConfig};

pub use bridge_plugin_api::{Args, CommandKind, HandlerId, PluginManifest, API_VERSION};
