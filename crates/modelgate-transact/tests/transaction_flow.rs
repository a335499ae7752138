//! End-to-end transaction scenarios against the mock upstream

use async_trait::async_trait;
use modelgate_core::{CommandOrPatch, GateError, ModelUri, Operation};
use modelgate_testkit::MockUpstream;
use modelgate_transact::{
    CommandProvider, CommandProviderRegistry, Executor, ProvidedEdit, TransactionConfig,
    TransactionFunction, TransactionManager, TriggerProvider, TriggerProviderRegistry,
    TriggeredEdit,
};
use modelgate_upstream::UpstreamClient;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn manager_for(
    mock: &MockUpstream,
    commands: CommandProviderRegistry,
    triggers: TriggerProviderRegistry,
) -> TransactionManager {
    let upstream = Arc::new(UpstreamClient::new(mock.config()).expect("client"));
    TransactionManager::new(upstream, commands, triggers, TransactionConfig::default())
}

fn replace(path: &str, value: Value) -> Operation {
    Operation::replace(path, value)
}

/// Simple patch commit: one execute, a quiescent trigger registry, one close
#[tokio::test]
async fn test_simple_patch_commit() {
    let mock = MockUpstream::spawn().await;
    let manager = manager_for(
        &mock,
        CommandProviderRegistry::new(),
        TriggerProviderRegistry::new(),
    );

    let uri = ModelUri::new("file:/m1");
    let tx = manager.open_transaction(&uri).await.expect("open");
    assert!(tx.is_open());
    assert!(!tx.uuid().is_empty());

    let result = tx
        .apply_patch(vec![replace("/name", json!("X"))])
        .await
        .expect("apply");
    assert!(result.success);
    assert_eq!(result.patch.len(), 1);

    let committed = tx.commit().await.expect("commit");
    assert!(committed.success);
    assert_eq!(committed.patch, vec![replace("/name", json!("X"))]);

    let kinds = mock.wait_transaction_log(2).await;
    let kinds: Vec<&str> = kinds
        .iter()
        .filter_map(|m| m["type"].as_str())
        .collect();
    assert_eq!(kinds, vec!["execute", "close"]);
}

/// A provider expands one command into two patches; upstream sees a flat
/// sequence and the caller sees the concatenated aggregate
#[tokio::test]
async fn test_nested_command_expansion() {
    struct TwoPatches;
    #[async_trait]
    impl TransactionFunction for TwoPatches {
        async fn run(&self, exec: &dyn Executor) -> bool {
            let a = exec
                .apply_patch(vec![Operation::replace("/a", json!(1))])
                .await;
            let b = exec
                .apply_patch(vec![Operation::replace("/b", json!(2))])
                .await;
            a.is_ok() && b.is_ok()
        }
    }

    struct Expand;
    impl CommandProvider for Expand {
        fn provide(&self, _uri: &ModelUri, _command: &Value) -> ProvidedEdit {
            ProvidedEdit::Function(Arc::new(TwoPatches))
        }
    }

    let mock = MockUpstream::spawn().await;
    let commands = CommandProviderRegistry::new();
    commands.register("expand", Arc::new(Expand));
    let manager = manager_for(&mock, commands, TriggerProviderRegistry::new());

    let uri = ModelUri::new("file:/m2");
    let tx = manager.open_transaction(&uri).await.expect("open");
    let result = tx
        .execute(&uri, json!({"type": "expand"}))
        .await
        .expect("execute");

    assert!(result.success);
    let paths: Vec<&str> = result.patch.iter().map(|o| o.path.as_str()).collect();
    assert_eq!(paths, vec!["/a", "/b"]);

    let log = mock.wait_transaction_log(2).await;
    assert_eq!(log.len(), 2);
    for entry in &log {
        assert_eq!(entry["type"], "execute");
        assert_eq!(entry["data"]["type"], "modelserver.patch");
    }
    assert_eq!(log[0]["data"]["data"][0]["path"], "/a");
    assert_eq!(log[1]["data"]["data"][0]["path"], "/b");

    tx.commit().await.expect("commit");
}

/// A provider function that fails mid-way rejects the execute, rolls the
/// whole session back, and never lets a close frame out
#[tokio::test]
async fn test_rollback_on_inner_failure() {
    struct PatchThenFail;
    #[async_trait]
    impl TransactionFunction for PatchThenFail {
        async fn run(&self, exec: &dyn Executor) -> bool {
            let _ = exec
                .apply_patch(vec![Operation::replace("/a", json!(1))])
                .await;
            false
        }
    }

    struct FailAfterOne;
    impl CommandProvider for FailAfterOne {
        fn provide(&self, _uri: &ModelUri, _command: &Value) -> ProvidedEdit {
            ProvidedEdit::Function(Arc::new(PatchThenFail))
        }
    }

    let mock = MockUpstream::spawn().await;
    let commands = CommandProviderRegistry::new();
    commands.register("doomed", Arc::new(FailAfterOne));
    let manager = manager_for(&mock, commands, TriggerProviderRegistry::new());

    let uri = ModelUri::new("file:/m3");
    let tx = manager.open_transaction(&uri).await.expect("open");
    let err = tx
        .execute(&uri, json!({"type": "doomed"}))
        .await
        .expect_err("provider failure must reject");
    assert!(matches!(err, GateError::CommandFailed { .. }));

    let committed = tx.commit().await.expect("commit after rollback");
    assert!(!committed.success);
    assert!(committed.patch.is_empty());

    let kinds = mock.wait_transaction_log(2).await;
    let kinds: Vec<&str> = kinds
        .iter()
        .filter_map(|m| m["type"].as_str())
        .collect();
    assert_eq!(
        kinds.iter().filter(|k| **k == "roll-back").count(),
        1,
        "exactly one roll-back: {kinds:?}"
    );
    assert!(
        !kinds.contains(&"close"),
        "no close after roll-back: {kinds:?}"
    );
}

/// Triggers run at commit until quiescent; their edits join the aggregate
/// and exactly one close terminates the session
#[tokio::test]
async fn test_trigger_loop_quiescence() {
    struct Cascade;
    impl TriggerProvider for Cascade {
        fn triggers(&self, _uri: &ModelUri, delta: &[Operation]) -> TriggeredEdit {
            if delta.iter().any(|op| op.path == "/p1") {
                TriggeredEdit::Patch(vec![Operation::replace("/p2", json!(2))])
            } else {
                TriggeredEdit::None
            }
        }
    }

    let mock = MockUpstream::spawn().await;
    let triggers = TriggerProviderRegistry::new();
    triggers.register(Arc::new(Cascade));
    let manager = manager_for(&mock, CommandProviderRegistry::new(), triggers);

    let uri = ModelUri::new("file:/m4");
    let tx = manager.open_transaction(&uri).await.expect("open");
    tx.apply_patch(vec![replace("/p1", json!(1))])
        .await
        .expect("apply");

    let committed = tx.commit().await.expect("commit");
    assert!(committed.success);
    let paths: Vec<&str> = committed.patch.iter().map(|o| o.path.as_str()).collect();
    assert_eq!(paths, vec!["/p1", "/p2"]);

    let log = mock.wait_transaction_log(3).await;
    let kinds: Vec<&str> = log.iter().filter_map(|m| m["type"].as_str()).collect();
    assert_eq!(kinds, vec!["execute", "execute", "close"]);
}

/// A trigger provider may hand back a transaction function instead of a
/// patch; it runs inside the commit loop like any other edit level
#[tokio::test]
async fn test_trigger_function_runs_in_commit_loop() {
    struct Renumber;
    #[async_trait]
    impl TransactionFunction for Renumber {
        async fn run(&self, exec: &dyn Executor) -> bool {
            exec.apply_patch(vec![Operation::replace("/count", json!(2))])
                .await
                .is_ok()
        }
    }

    struct OnItems;
    impl TriggerProvider for OnItems {
        fn triggers(&self, _uri: &ModelUri, delta: &[Operation]) -> TriggeredEdit {
            if delta.iter().any(|op| op.path == "/items") {
                TriggeredEdit::Function(Arc::new(Renumber))
            } else {
                TriggeredEdit::None
            }
        }
    }

    let mock = MockUpstream::spawn().await;
    let triggers = TriggerProviderRegistry::new();
    triggers.register(Arc::new(OnItems));
    let manager = manager_for(&mock, CommandProviderRegistry::new(), triggers);

    let uri = ModelUri::new("file:/m12");
    let tx = manager.open_transaction(&uri).await.expect("open");
    tx.apply_patch(vec![replace("/items", json!(["a", "b"]))])
        .await
        .expect("apply");

    let committed = tx.commit().await.expect("commit");
    assert!(committed.success);
    let paths: Vec<&str> = committed.patch.iter().map(|o| o.path.as_str()).collect();
    assert_eq!(paths, vec!["/items", "/count"]);
}

/// Triggers that never quiesce hit the round cap: the session rolls back
/// and commit reports the failed sentinel
#[tokio::test]
async fn test_trigger_round_cap_rolls_back() {
    struct Perpetual;
    impl TriggerProvider for Perpetual {
        fn triggers(&self, _uri: &ModelUri, _delta: &[Operation]) -> TriggeredEdit {
            TriggeredEdit::Patch(vec![Operation::replace("/again", json!(true))])
        }
    }

    let mock = MockUpstream::spawn().await;
    let triggers = TriggerProviderRegistry::new();
    triggers.register(Arc::new(Perpetual));
    let upstream = Arc::new(UpstreamClient::new(mock.config()).expect("client"));
    let manager = TransactionManager::new(
        upstream,
        CommandProviderRegistry::new(),
        triggers,
        TransactionConfig {
            max_trigger_rounds: 3,
            ..TransactionConfig::default()
        },
    );

    let uri = ModelUri::new("file:/m13");
    let tx = manager.open_transaction(&uri).await.expect("open");
    tx.apply_patch(vec![replace("/seed", json!(1))])
        .await
        .expect("apply");

    let committed = tx.commit().await.expect("commit");
    assert!(!committed.success);

    // 1 seed execute + 3 trigger executes + the roll-back.
    let log = mock.wait_transaction_log(5).await;
    let kinds: Vec<&str> = log.iter().filter_map(|m| m["type"].as_str()).collect();
    assert_eq!(kinds.iter().filter(|k| **k == "roll-back").count(), 1);
    assert!(!kinds.contains(&"close"));
}

/// A second open on a live model joins the session as a nested child:
/// child commits pop a frame, only the root commit closes the session
#[tokio::test]
async fn test_second_open_is_nested() {
    let mock = MockUpstream::spawn().await;
    let manager = manager_for(
        &mock,
        CommandProviderRegistry::new(),
        TriggerProviderRegistry::new(),
    );

    let uri = ModelUri::new("file:/m5");
    let root = manager.open_transaction(&uri).await.expect("open root");
    let child = manager.open_transaction(&uri).await.expect("open child");
    assert!(root.is_root());
    assert!(!child.is_root());
    assert_eq!(root.uuid(), child.uuid());
    assert_eq!(manager.active_count().await, 1);

    child
        .apply_patch(vec![replace("/from-child", json!(true))])
        .await
        .expect("child edit");
    let child_result = child.commit().await.expect("child commit");
    assert_eq!(child_result.patch.len(), 1);

    // The child's edits fold into the root frame.
    let committed = root.commit().await.expect("root commit");
    assert_eq!(committed.patch.len(), 1);
    assert_eq!(committed.patch[0].path, "/from-child");

    let log = mock.wait_transaction_log(2).await;
    let kinds: Vec<&str> = log.iter().filter_map(|m| m["type"].as_str()).collect();
    assert_eq!(
        kinds.iter().filter(|k| **k == "close").count(),
        1,
        "only the root closes: {kinds:?}"
    );
}

/// An empty patch never touches the wire and is not an error
#[tokio::test]
async fn test_empty_patch_is_a_local_no_op() {
    let mock = MockUpstream::spawn().await;
    let manager = manager_for(
        &mock,
        CommandProviderRegistry::new(),
        TriggerProviderRegistry::new(),
    );

    let uri = ModelUri::new("file:/m6");
    let tx = manager.open_transaction(&uri).await.expect("open");
    let result = tx.apply_patch(Vec::new()).await.expect("empty patch");
    assert!(!result.success);
    assert!(mock.transaction_log().is_empty());

    tx.rollback("test done").await;
}

/// Commands without a registered provider go to upstream verbatim
#[tokio::test]
async fn test_unprovided_command_goes_to_the_wire() {
    let mock = MockUpstream::spawn().await;
    let manager = manager_for(
        &mock,
        CommandProviderRegistry::new(),
        TriggerProviderRegistry::new(),
    );

    let uri = ModelUri::new("file:/m7");
    let tx = manager.open_transaction(&uri).await.expect("open");
    let result = tx
        .edit(CommandOrPatch::Command(json!({"type": "set-name", "name": "X"})))
        .await
        .expect("execute");
    assert!(result.success);

    let log = mock.wait_transaction_log(1).await;
    assert_eq!(log[0]["data"]["type"], "modelserver.emfcommand");
    assert_eq!(log[0]["data"]["data"]["type"], "set-name");

    tx.commit().await.expect("commit");
}

/// After the session ends, the manager's map entry disappears and edits on
/// the stale handle fail fast with a socket-closed error
#[tokio::test]
async fn test_session_cleanup_and_closed_socket_errors() {
    let mock = MockUpstream::spawn().await;
    let manager = manager_for(
        &mock,
        CommandProviderRegistry::new(),
        TriggerProviderRegistry::new(),
    );

    let uri = ModelUri::new("file:/m8");
    let tx = manager.open_transaction(&uri).await.expect("open");
    tx.apply_patch(vec![replace("/x", json!(1))])
        .await
        .expect("apply");
    tx.commit().await.expect("commit");

    // Upstream acks the close by closing the socket; the close hook then
    // removes the session.
    for _ in 0..100 {
        if !manager.is_active(&uri).await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!manager.is_active(&uri).await);

    let err = tx
        .apply_patch(vec![replace("/y", json!(2))])
        .await
        .expect_err("edits after close must fail");
    assert!(matches!(
        err,
        GateError::SocketClosed { .. } | GateError::Network { .. }
    ));

    // Rollback on a closed session is an idempotent no-op.
    let rolled = tx.rollback("too late").await;
    assert!(!rolled.success);

    // A new open on the same model starts a fresh root session.
    let fresh = manager.open_transaction(&uri).await.expect("reopen");
    assert!(fresh.is_root());
    assert_ne!(fresh.uuid(), tx.uuid());
    fresh.rollback("test done").await;
}

/// Rollback of a nested child ends the entire session
#[tokio::test]
async fn test_child_rollback_bubbles_to_root() {
    let mock = MockUpstream::spawn().await;
    let manager = manager_for(
        &mock,
        CommandProviderRegistry::new(),
        TriggerProviderRegistry::new(),
    );

    let uri = ModelUri::new("file:/m9");
    let root = manager.open_transaction(&uri).await.expect("open root");
    let child = manager.open_transaction(&uri).await.expect("open child");

    child.rollback("child aborts").await;

    let log = mock.wait_transaction_log(1).await;
    let kinds: Vec<&str> = log.iter().filter_map(|m| m["type"].as_str()).collect();
    assert_eq!(kinds, vec!["roll-back"]);

    // The root is dead too; its commit reports the failed sentinel.
    let committed = root.commit().await.expect("root commit");
    assert!(!committed.success);
}

/// A provider substituting a patch for a command sends the patch, not the
/// command
#[tokio::test]
async fn test_substitute_patch_provider() {
    struct Rewrite;
    impl CommandProvider for Rewrite {
        fn provide(&self, _uri: &ModelUri, command: &Value) -> ProvidedEdit {
            let name = command["name"].clone();
            ProvidedEdit::Substitute(CommandOrPatch::Patch(vec![Operation::replace(
                "/name", name,
            )]))
        }
    }

    let mock = MockUpstream::spawn().await;
    let commands = CommandProviderRegistry::new();
    commands.register("rename", Arc::new(Rewrite));
    let manager = manager_for(&mock, commands, TriggerProviderRegistry::new());

    let uri = ModelUri::new("file:/m10");
    let tx = manager.open_transaction(&uri).await.expect("open");
    let result = tx
        .execute(&uri, json!({"type": "rename", "name": "Widget"}))
        .await
        .expect("execute");
    assert!(result.success);

    let log = mock.wait_transaction_log(1).await;
    assert_eq!(log[0]["data"]["type"], "modelserver.patch");
    assert_eq!(log[0]["data"]["data"][0]["value"], "Widget");

    tx.commit().await.expect("commit");
}

/// Failure replies from upstream merge into the aggregate without ending
/// the session
#[tokio::test]
async fn test_failure_reply_merges() {
    let mock = MockUpstream::spawn().await;
    mock.set_reply_script(Box::new(|envelope| {
        Some(json!({
            "type": "error",
            "modeluri": envelope["modeluri"],
            "data": { "success": false, "patch": [] }
        }))
    }));
    let manager = manager_for(
        &mock,
        CommandProviderRegistry::new(),
        TriggerProviderRegistry::new(),
    );

    let uri = ModelUri::new("file:/m11");
    let tx = manager.open_transaction(&uri).await.expect("open");
    let result = tx
        .apply_patch(vec![replace("/x", json!(1))])
        .await
        .expect("rejected edits still resolve");
    assert!(!result.success);

    // The aggregate carries the failure; the commit still terminates
    // cleanly with one close.
    let committed = tx.commit().await.expect("commit");
    assert!(!committed.success);
    let log = mock.wait_transaction_log(2).await;
    let kinds: Vec<&str> = log.iter().filter_map(|m| m["type"].as_str()).collect();
    assert_eq!(kinds, vec!["execute", "close"]);
}
