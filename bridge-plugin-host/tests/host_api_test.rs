//! Integration tests for event and command dispatch through the host API

use bridge_plugin_host::audit::{AuditEventType, MemoryAuditSink};
use bridge_plugin_host::{CommandError, CommandKind, HandlerId, HostApi};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn counter(api: &HostApi, event: &str) -> (HandlerId, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let id = api.on(event, move |_| {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    (id, count)
}

#[test]
fn test_subscription_ids_are_distinct() {
    let api = HostApi::new();
    let mut ids = HashSet::new();
    for i in 0..200 {
        let event = format!("e{}", i % 7);
        let id = api.on(&event, |_| Ok(()));
        if i % 3 == 0 {
            api.off(&event, &id);
        }
        assert!(ids.insert(id), "duplicate handler id");
    }
}

#[test]
fn test_emit_without_subscribers() {
    let api = HostApi::new();
    assert_eq!(api.emit("nobody.listens", &[json!(1)]), 0);
}

#[test]
fn test_unsubscribed_handler_is_not_invoked() {
    let api = HostApi::new();
    let (id, count) = counter(&api, "item.play");
    let (_, other) = counter(&api, "item.play");

    assert!(api.off("item.play", &id));
    api.emit("item.play", &[]);

    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(other.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unknown_id_is_ignored() {
    let api = HostApi::new();
    let (_, count) = counter(&api, "item.play");
    let (foreign, _) = counter(&api, "item.stop");

    assert!(!api.off("item.play", &HandlerId::from("never-issued")));
    assert!(!api.off("item.play", &foreign));
    assert!(!api.off("no.such.event", &foreign));

    api.emit("item.play", &[]);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_execute_unknown_and_registered_command() {
    let api = HostApi::new();
    let err = api.execute_command("math.add", vec![]).await.unwrap_err();
    assert!(matches!(err, CommandError::CommandNotFound(ref name) if name == "math.add"));

    api.register_command("math.add", |args| {
        Ok(json!(args.iter().filter_map(Value::as_i64).sum::<i64>()))
    });
    let sum = api
        .execute_command("math.add", vec![json!(2), json!(3)])
        .await
        .unwrap();
    assert_eq!(sum, json!(5));
}

#[tokio::test]
async fn test_reregistering_replaces_handler() {
    let api = HostApi::new();
    let first = Arc::new(AtomicUsize::new(0));
    let f = first.clone();
    api.register_command("n", move |_| {
        f.fetch_add(1, Ordering::SeqCst);
        Ok(json!("h1"))
    });
    api.register_async_command("n", |_| async { Ok(json!("h2")) });

    assert_eq!(api.commands().kind_of("n"), Some(CommandKind::Deferred));
    assert_eq!(api.execute_command("n", vec![]).await.unwrap(), json!("h2"));
    assert_eq!(first.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_binding_runs_command_once_with_event_args() {
    let api = HostApi::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let c = calls.clone();
    api.register_command("rundown.cue", move |args| {
        c.lock().unwrap().push(args);
        Ok(Value::Null)
    });

    api.trigger_command("show.start", "rundown.cue");
    api.emit("show.start", &[json!("a"), json!("b")]);

    assert_eq!(*calls.lock().unwrap(), vec![vec![json!("a"), json!("b")]]);
}

#[test]
fn test_failing_handler_does_not_block_the_rest() {
    let audit = Arc::new(MemoryAuditSink::new());
    let api = HostApi::with_audit(audit.clone());
    let (_, before) = counter(&api, "e");
    api.on("e", |_| anyhow::bail!("broken handler"));
    api.on("e", |_| panic!("panicking handler"));
    let (_, after) = counter(&api, "e");

    assert_eq!(api.emit("e", &[]), 4);

    assert_eq!(before.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 1);
    assert_eq!(audit.find_by_type(AuditEventType::HandlerFailed).len(), 2);
}
