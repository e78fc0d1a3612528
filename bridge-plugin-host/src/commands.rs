//! Command registry
//!
//! Named commands with at most one handler each. A handler declares at
//! registration whether it answers immediately or later; invocation always
//! hands back a [`CommandFuture`] so callers treat both kinds the same way.

use crate::error::CommandError;
use bridge_plugin_api::{Args, CommandKind};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::task::{Context, Poll};

/// Boxed future used for deferred handlers
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a command invocation
pub type CommandResult = Result<Value, CommandError>;

type ImmediateFn = dyn Fn(Args) -> anyhow::Result<Value> + Send + Sync;
type DeferredFn = dyn Fn(Args) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync;

/// A registered command handler
#[derive(Clone)]
pub enum CommandHandler {
    Immediate(Arc<ImmediateFn>),
    Deferred(Arc<DeferredFn>),
}

impl CommandHandler {
    /// Wrap a synchronous handler
    pub fn immediate<F>(handler: F) -> Self
    where
        F: Fn(Args) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::Immediate(Arc::new(handler))
    }

    /// Wrap an asynchronous handler
    pub fn deferred<F, Fut>(handler: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::Deferred(Arc::new(move |args| Box::pin(handler(args))))
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Immediate(_) => CommandKind::Immediate,
            Self::Deferred(_) => CommandKind::Deferred,
        }
    }

    /// Check if two handles refer to the same registration
    pub fn same_as(&self, other: &CommandHandler) -> bool {
        match (self, other) {
            (Self::Immediate(a), Self::Immediate(b)) => Arc::ptr_eq(a, b),
            (Self::Deferred(a), Self::Deferred(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn invoke(&self, command: &str, args: Args) -> CommandFuture {
        match self {
            Self::Immediate(handler) => {
                CommandFuture::ready(handler(args).map_err(|e| CommandError::failed(command, e)))
            }
            Self::Deferred(handler) => {
                let command = command.to_string();
                let pending = handler(args);
                CommandFuture::deferred(async move {
                    pending
                        .await
                        .map_err(|e| CommandError::failed(command, e))
                })
            }
        }
    }
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CommandHandler").field(&self.kind()).finish()
    }
}

/// Result of invoking a command.
///
/// Immediate outcomes are stored inline and resolve on first poll without
/// allocation; deferred outcomes wrap the handler's future.
#[must_use = "a command's outcome should be awaited or inspected"]
pub struct CommandFuture {
    inner: Outcome,
}

enum Outcome {
    Ready(std::future::Ready<CommandResult>),
    Deferred(BoxFuture<'static, CommandResult>),
}

impl CommandFuture {
    pub fn ready(result: CommandResult) -> Self {
        Self {
            inner: Outcome::Ready(std::future::ready(result)),
        }
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = CommandResult> + Send + 'static,
    {
        Self {
            inner: Outcome::Deferred(Box::pin(future)),
        }
    }

    /// Whether the outcome is already known
    pub fn kind(&self) -> CommandKind {
        match self.inner {
            Outcome::Ready(_) => CommandKind::Immediate,
            Outcome::Deferred(_) => CommandKind::Deferred,
        }
    }

    /// Take the outcome without awaiting if it is already known,
    /// otherwise hand the future back
    pub fn try_now(self) -> Result<CommandResult, CommandFuture> {
        match self.inner {
            Outcome::Ready(ready) => Ok(ready.into_inner()),
            inner @ Outcome::Deferred(_) => Err(Self { inner }),
        }
    }
}

impl Future for CommandFuture {
    type Output = CommandResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            Outcome::Ready(ready) => Pin::new(ready).poll(cx),
            Outcome::Deferred(future) => future.as_mut().poll(cx),
        }
    }
}

impl std::fmt::Debug for CommandFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandFuture")
            .field("kind", &self.kind())
            .finish()
    }
}

/// Registry of named commands
#[derive(Default)]
pub struct CommandRegistry {
    commands: RwLock<HashMap<String, CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CommandHandler>> {
        self.commands.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CommandHandler>> {
        self.commands.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handler under `name`, replacing any previous one.
    ///
    /// Returns the kind of the replaced handler, if there was one.
    pub fn register(&self, name: &str, handler: CommandHandler) -> Option<CommandKind> {
        let kind = handler.kind();
        let previous = self.write().insert(name.to_string(), handler);

        match &previous {
            Some(old) => {
                tracing::debug!(command = name, ?kind, replaced = ?old.kind(), "Command replaced")
            }
            None => tracing::debug!(command = name, ?kind, "Command registered"),
        }
        previous.map(|old| old.kind())
    }

    /// Register a synchronous handler
    pub fn register_command<F>(&self, name: &str, handler: F) -> CommandHandler
    where
        F: Fn(Args) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let handler = CommandHandler::immediate(handler);
        self.register(name, handler.clone());
        handler
    }

    /// Register an asynchronous handler
    pub fn register_async_command<F, Fut>(&self, name: &str, handler: F) -> CommandHandler
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler = CommandHandler::deferred(handler);
        self.register(name, handler.clone());
        handler
    }

    /// Remove a command
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.write().remove(name);
        if removed.is_some() {
            tracing::debug!(command = name, "Command unregistered");
        }
        removed.is_some()
    }

    /// Remove a command only if `handler` is still the registered one
    pub fn unregister_if_same(&self, name: &str, handler: &CommandHandler) -> bool {
        let removed = {
            let mut commands = self.write();
            match commands.get(name) {
                Some(current) if current.same_as(handler) => commands.remove(name),
                _ => None,
            }
        };
        removed.is_some()
    }

    /// Invoke a command by exact name
    pub fn execute(&self, name: &str, args: Args) -> CommandFuture {
        // Clone out so the handler runs without the lock held
        let handler = self.read().get(name).cloned();

        match handler {
            Some(handler) => {
                tracing::trace!(command = name, "Executing command");
                handler.invoke(name, args)
            }
            None => {
                tracing::debug!(command = name, "Command not found");
                CommandFuture::ready(Err(CommandError::CommandNotFound(name.to_string())))
            }
        }
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Kind declared by the registered handler
    pub fn kind_of(&self, name: &str) -> Option<CommandKind> {
        self.read().get(name).map(CommandHandler::kind)
    }

    /// Get a sorted list of all registered command names
    pub fn list_commands(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove every command
    pub fn clear(&self) -> usize {
        let removed = std::mem::take(&mut *self.write());
        removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_execute_unregistered_fails() {
        let registry = CommandRegistry::new();
        let err = registry
            .execute("missing", vec![])
            .try_now()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, CommandError::CommandNotFound(ref name) if name == "missing"));
    }

    #[test]
    fn test_immediate_returns_handler_result() {
        let registry = CommandRegistry::new();
        registry.register_command("math.add", |args| {
            let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
            Ok(json!(sum))
        });

        let outcome = registry.execute("math.add", vec![json!(2), json!(3)]);
        assert_eq!(outcome.kind(), CommandKind::Immediate);
        assert_eq!(outcome.try_now().unwrap().unwrap(), json!(5));
    }

    #[tokio::test]
    async fn test_immediate_can_be_awaited() {
        let registry = CommandRegistry::new();
        registry.register_command("echo", |args| Ok(Value::Array(args)));

        let value = registry.execute("echo", vec![json!("hi")]).await.unwrap();
        assert_eq!(value, json!(["hi"]));
    }

    #[tokio::test]
    async fn test_deferred_resolves_later() {
        let registry = CommandRegistry::new();
        registry.register_async_command("slow.double", |args| async move {
            tokio::task::yield_now().await;
            let n = args.first().and_then(Value::as_i64).unwrap_or_default();
            Ok(json!(n * 2))
        });

        let outcome = registry.execute("slow.double", vec![json!(21)]);
        assert_eq!(outcome.kind(), CommandKind::Deferred);
        assert_eq!(outcome.await.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_deferred_failure_reaches_caller() {
        let registry = CommandRegistry::new();
        registry.register_async_command("slow.fail", |_| async move {
            tokio::task::yield_now().await;
            Err::<Value, _>(anyhow::anyhow!("disk on fire"))
        });

        let err = registry.execute("slow.fail", vec![]).await.unwrap_err();
        match err {
            CommandError::CommandFailed { command, source } => {
                assert_eq!(command, "slow.fail");
                assert_eq!(source.to_string(), "disk on fire");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_pending_deferred_does_not_block_other_commands() {
        let registry = CommandRegistry::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let rx = std::sync::Mutex::new(Some(rx));
        registry.register_async_command("wait", move |_| {
            let rx = rx.lock().unwrap().take();
            async move {
                if let Some(rx) = rx {
                    rx.await?;
                }
                Ok::<_, anyhow::Error>(json!("released"))
            }
        });
        registry.register_command("now", |_| Ok(json!("done")));

        let waiting = registry.execute("wait", vec![]);
        assert_eq!(registry.execute("now", vec![]).await.unwrap(), json!("done"));

        tx.send(()).unwrap();
        assert_eq!(waiting.await.unwrap(), json!("released"));
    }

    #[test]
    fn test_reregistration_replaces_handler() {
        let registry = CommandRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let f = first.clone();
        registry.register_command("n", move |_| {
            f.fetch_add(1, Ordering::SeqCst);
            Ok(json!(1))
        });
        let replaced = registry.register(
            "n",
            CommandHandler::immediate(|_| Ok(json!(2))),
        );

        assert_eq!(replaced, Some(CommandKind::Immediate));
        assert_eq!(registry.execute("n", vec![]).try_now().unwrap().unwrap(), json!(2));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_replacement_releases_previous_closure() {
        let registry = CommandRegistry::new();
        let captured = Arc::new(());
        let c = captured.clone();
        registry.register_command("n", move |_| {
            let _held = c.clone();
            Ok(Value::Null)
        });
        assert_eq!(Arc::strong_count(&captured), 2);

        registry.register_command("n", |_| Ok(Value::Null));
        assert_eq!(Arc::strong_count(&captured), 1);
    }

    #[test]
    fn test_unregister_if_same() {
        let registry = CommandRegistry::new();
        let mine = registry.register_command("shared", |_| Ok(json!("mine")));
        registry.register_command("shared", |_| Ok(json!("theirs")));

        assert!(!registry.unregister_if_same("shared", &mine));
        assert!(registry.has_command("shared"));

        let theirs = registry.register_command("shared", |_| Ok(Value::Null));
        assert!(registry.unregister_if_same("shared", &theirs));
        assert!(!registry.has_command("shared"));
    }

    #[test]
    fn test_listing_and_clear() {
        let registry = CommandRegistry::new();
        registry.register_command("b", |_| Ok(Value::Null));
        registry.register_async_command("a", |_| async { Ok(Value::Null) });

        assert_eq!(registry.list_commands(), vec!["a", "b"]);
        assert_eq!(registry.kind_of("a"), Some(CommandKind::Deferred));
        assert_eq!(registry.kind_of("c"), None);
        assert!(registry.unregister("b"));
        assert!(!registry.unregister("b"));
        assert_eq!(registry.clear(), 1);
        assert!(registry.is_empty());
    }
}
