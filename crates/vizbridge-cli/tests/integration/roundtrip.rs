//! Full caller -> bridge -> host round trips.

use serde_json::Value;
use vizbridge_cli::ops::{run_operation, Operation};
use vizbridge_protocol::EntryStatus;

use crate::harness::TestBridge;

#[tokio::test]
async fn test_environment_persists_between_calls() {
    let bridge = TestBridge::start().await;
    let dispatcher = bridge.dispatcher();

    dispatcher.execute_code("x = 5").await.unwrap();
    let report = dispatcher.execute_code("print x").await.unwrap();
    assert!(report.ok);
    assert_eq!(report.stdout, "5\n");

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_mutating_read_only_mutating_history() {
    let bridge = TestBridge::start().await;
    let dispatcher = bridge.dispatcher();

    dispatcher.execute_code("add cone").await.unwrap();
    let listing = dispatcher.inspect_state().await.unwrap();
    assert_eq!(listing["sources"], serde_json::json!(["cone"]));
    dispatcher.execute_code("add sphere").await.unwrap();

    let history = dispatcher.history().await.unwrap();
    let ids: Vec<u64> = history.iter().map(|r| r.id).collect();
    let snaps: Vec<bool> = history.iter().map(|r| r.has_snapshot).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(snaps, vec![true, false, true]);
    assert_eq!(history[0].code.as_deref(), Some("add cone"));

    let failure = dispatcher.restore(2).await.unwrap_err();
    assert_eq!(failure.code, "NO_SNAPSHOT");
    let failure = dispatcher.restore(42).await.unwrap_err();
    assert_eq!(failure.code, "NOT_FOUND");

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_restore_rolls_back_pipeline_and_history() {
    let bridge = TestBridge::start().await;
    let dispatcher = bridge.dispatcher();

    dispatcher.execute_code("add cone; y = 1").await.unwrap();
    dispatcher.execute_code("add sphere").await.unwrap();
    dispatcher.execute_code("remove cone").await.unwrap();
    assert_eq!(bridge.sources(), vec!["sphere"]);

    let report = dispatcher.restore(2).await.unwrap();
    assert_eq!(report.restored_entry, 2);
    assert_eq!(report.next_id, 2);
    assert_eq!(bridge.sources(), vec!["cone"]);

    let history = dispatcher.history().await.unwrap();
    assert_eq!(history.len(), 1);

    // The environment was rebuilt, so `y` is gone.
    let failure = dispatcher.execute_code("print y").await.unwrap_err();
    assert_eq!(failure.code, "EXECUTION_FAILED");
    assert_eq!(failure.summary(), "NameError: y\nTraceback:\n  print y");

    let history = dispatcher.history().await.unwrap();
    assert_eq!(history.last().unwrap().id, 2);
    assert_eq!(history.last().unwrap().status, EntryStatus::Error);

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_operations_produce_printable_json() {
    let bridge = TestBridge::start().await;
    let dispatcher = bridge.dispatcher();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("view.png");

    let ping = run_operation(&dispatcher, Operation::Ping).await.unwrap();
    assert_eq!(ping["ok"], true);
    assert_eq!(ping["bridge"]["protocol_version"], 2);

    let exec = run_operation(
        &dispatcher,
        Operation::Execute {
            code: "add wavelet".into(),
        },
    )
    .await
    .unwrap();
    assert_eq!(exec["ok"], true);

    let render = run_operation(
        &dispatcher,
        Operation::Render {
            width: 300,
            height: 200,
            out: out.clone(),
        },
    )
    .await
    .unwrap();
    assert_eq!(render["format"], "png");
    let bytes = std::fs::read(&out).unwrap();
    assert_eq!(bytes, vec![0x89, b'P', b'N', b'G', 44, 200]);

    let history = run_operation(&dispatcher, Operation::History).await.unwrap();
    let entries = history["history"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1]["command"], "render_image");
    assert_eq!(entries[1]["has_snapshot"], Value::Bool(false));

    bridge.shutdown().await;
}
