//! Host API context
//!
//! [`HostApi`] is the one object plugins and host subsystems talk to. It is
//! built once at startup, cloned into whoever needs it, and disposed at
//! shutdown.

use crate::audit::{self, record_or_warn, AuditSink, NullAuditSink};
use crate::commands::{CommandFuture, CommandHandler, CommandRegistry};
use crate::config::HostConfig;
use crate::error::CommandError;
use crate::events::EventBus;
use bridge_plugin_api::{commands, Args, HandlerId};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Weak};

struct HostInner {
    events: EventBus,
    commands: CommandRegistry,
    audit: Arc<dyn AuditSink>,
}

/// Shared handle to the host's event bus and command registry
#[derive(Clone)]
pub struct HostApi {
    inner: Arc<HostInner>,
}

impl HostApi {
    /// Create a host with the built-in event commands and no audit trail
    pub fn new() -> Self {
        Self::with_audit(Arc::new(NullAuditSink))
    }

    /// Create a host reporting failures to `audit`
    pub fn with_audit(audit: Arc<dyn AuditSink>) -> Self {
        let api = Self::bare(audit);
        api.install_event_commands();
        api
    }

    /// Create a host from configuration
    pub fn from_config(config: &HostConfig) -> Result<Self, crate::config::ConfigError> {
        let api = Self::bare(config.audit.build_sink()?);
        if config.expose_event_commands {
            api.install_event_commands();
        }
        Ok(api)
    }

    fn bare(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            inner: Arc::new(HostInner {
                events: EventBus::with_audit(audit.clone()),
                commands: CommandRegistry::new(),
                audit,
            }),
        }
    }

    fn downgrade(&self) -> Weak<HostInner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(weak: &Weak<HostInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.inner.commands
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.inner.audit
    }

    // ------------------------------------------------------------------------
    // Plugin surface
    // ------------------------------------------------------------------------

    /// Register a command answering synchronously
    pub fn register_command<F>(&self, name: &str, handler: F) -> CommandHandler
    where
        F: Fn(Args) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.inner.commands.register_command(name, handler)
    }

    /// Register a command answering asynchronously
    pub fn register_async_command<F, Fut>(&self, name: &str, handler: F) -> CommandHandler
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.inner.commands.register_async_command(name, handler)
    }

    /// Invoke a command by name
    pub fn execute_command(&self, name: &str, args: Args) -> CommandFuture {
        self.inner.commands.execute(name, args)
    }

    /// Subscribe to an event
    pub fn on<F>(&self, event: &str, handler: F) -> HandlerId
    where
        F: Fn(&[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.events.subscribe(event, handler)
    }

    /// Remove a subscription; stale ids are ignored
    pub fn off(&self, event: &str, id: &HandlerId) -> bool {
        self.inner.events.unsubscribe(event, id)
    }

    /// Broadcast an event to its subscribers
    pub fn emit(&self, event: &str, args: &[Value]) -> usize {
        self.inner.events.emit(event, args)
    }

    /// Run `command` with the event's arguments whenever `event` fires.
    ///
    /// The returned id is an ordinary subscription id for [`HostApi::off`].
    pub fn trigger_command(&self, event: &str, command: &str) -> HandlerId {
        let weak = self.downgrade();
        let command = command.to_string();
        let origin = format!("binding:{}", event);

        self.on(event, move |args| {
            let Some(api) = Self::upgrade(&weak) else {
                return Ok(());
            };
            api.dispatch(&origin, &command, args.to_vec())
                .map_err(anyhow::Error::from)
        })
    }

    // ------------------------------------------------------------------------
    // Fire-and-forget invocation
    // ------------------------------------------------------------------------

    /// Invoke a command without waiting for it.
    ///
    /// An immediate outcome is returned as is. A deferred outcome is driven
    /// on the current tokio runtime and its failure, if any, is reported to
    /// the audit sink under `origin`.
    pub fn dispatch(&self, origin: &str, name: &str, args: Args) -> Result<(), CommandError> {
        match self.execute_command(name, args).try_now() {
            Ok(result) => result.map(drop),
            Err(pending) => {
                self.spawn_reported(origin, name, pending);
                Ok(())
            }
        }
    }

    /// Invoke a command and report any failure, immediate or deferred
    pub fn fire_command(&self, origin: &str, name: &str, args: Args) {
        if let Err(e) = self.dispatch(origin, name, args) {
            self.report_command_failure(origin, name, &e);
        }
    }

    fn spawn_reported(&self, origin: &str, name: &str, pending: CommandFuture) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                let e = CommandError::failed(
                    name,
                    anyhow::anyhow!("no async runtime available to drive deferred command"),
                );
                self.report_command_failure(origin, name, &e);
                return;
            }
        };

        let weak = self.downgrade();
        let origin = origin.to_string();
        let name = name.to_string();
        handle.spawn(async move {
            if let Err(e) = pending.await {
                match Self::upgrade(&weak) {
                    Some(api) => api.report_command_failure(&origin, &name, &e),
                    None => tracing::warn!(command = %name, error = %e, "Deferred command failed after shutdown"),
                }
            }
        });
    }

    fn report_command_failure(&self, origin: &str, name: &str, error: &CommandError) {
        tracing::warn!(origin, command = name, error = %error, "Command failed");
        record_or_warn(
            &*self.inner.audit,
            audit::command_failed(origin, name, format!("{:#}", error)),
        );
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Drop every subscription and command.
    ///
    /// Handlers may hold clones of this handle; clearing breaks those cycles.
    pub fn dispose(&self) {
        let handlers = self.inner.events.clear();
        let commands = self.inner.commands.clear();
        if let Err(e) = self.inner.audit.flush() {
            tracing::warn!(error = %e, "Failed to flush audit sink");
        }
        tracing::info!(handlers, commands, "Host disposed");
    }

    /// Expose the bus through the command surface so plugins that can only
    /// exchange values can still reach it
    fn install_event_commands(&self) {
        let weak = self.downgrade();
        self.inner
            .commands
            .register_command(commands::EVENTS_EMIT, move |args| {
                let api = Self::upgrade(&weak).ok_or_else(shut_down)?;
                let (event, rest) = split_name(commands::EVENTS_EMIT, "event", &args)?;
                api.emit(event, rest);
                Ok(Value::Null)
            });

        let weak = self.downgrade();
        self.inner
            .commands
            .register_command(commands::EVENTS_OFF, move |args| {
                let api = Self::upgrade(&weak).ok_or_else(shut_down)?;
                let (event, rest) = split_name(commands::EVENTS_OFF, "event", &args)?;
                let (id, _) = split_name(commands::EVENTS_OFF, "handler id", rest)?;
                Ok(Value::Bool(api.off(event, &HandlerId::from(id))))
            });

        let weak = self.downgrade();
        self.inner.commands.register(
            commands::EVENTS_TRIGGER_COMMAND,
            CommandHandler::deferred(move |args| {
                std::future::ready(trigger_from_args(&weak, &args))
            }),
        );
    }
}

impl Default for HostApi {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostApi")
            .field("subscriptions", &self.inner.events.len())
            .field("commands", &self.inner.commands.len())
            .finish()
    }
}

fn trigger_from_args(weak: &Weak<HostInner>, args: &[Value]) -> anyhow::Result<Value> {
    let api = HostApi::upgrade(weak).ok_or_else(shut_down)?;
    let (event, rest) = split_name(commands::EVENTS_TRIGGER_COMMAND, "event", args)?;
    let (command, _) = split_name(commands::EVENTS_TRIGGER_COMMAND, "command", rest)?;
    let id = api.trigger_command(event, command);
    Ok(Value::String(id.to_string()))
}

fn shut_down() -> anyhow::Error {
    anyhow::anyhow!("host has been shut down")
}

/// Split a leading string argument off the argument list
fn split_name<'a>(
    command: &str,
    what: &str,
    args: &'a [Value],
) -> Result<(&'a str, &'a [Value]), CommandError> {
    match args.split_first() {
        Some((Value::String(name), rest)) => Ok((name.as_str(), rest)),
        _ => Err(CommandError::invalid_arguments(
            command,
            format!("expected {} name as a string", what),
        )),
    }
}
