//! Module switches and passthrough operations.

use serde_json::json;

use uranus::admin::{AdminError, Module, STATUS_INVALID_ARGUMENT};

use crate::harness;

#[tokio::test]
async fn enable_persists_flag_and_tells_the_kernel() {
    let h = harness().await;
    assert!(!h.admin.module_status(Module::File).await.expect("status"));

    h.admin.enable(Module::File).await.expect("enable");
    assert!(h.admin.module_status(Module::File).await.expect("status"));
    assert_eq!(h.kernel.request_types(), vec!["user::file::enable"]);

    h.admin.disable(Module::File).await.expect("disable");
    assert!(!h.admin.module_status(Module::File).await.expect("status"));
}

#[tokio::test]
async fn refused_switch_reports_the_operation_code() {
    let h = harness().await;
    h.kernel.set_code("user::net::enable", -1);

    let err = h.admin.enable(Module::Net).await.expect_err("should fail");
    assert!(matches!(err, AdminError::Refused { code: -1, .. }));
    assert_eq!(err.status_code(), 30);
}

#[tokio::test]
async fn silent_kernel_surfaces_as_a_session_error() {
    let h = harness().await;
    h.kernel.silence("user::proc::enable");

    let err = h.admin.enable(Module::Process).await.expect_err("should fail");
    assert!(matches!(err, AdminError::Session { .. }));
    assert_eq!(err.status_code(), 13);
}

#[tokio::test]
async fn echo_round_trips_the_payload() {
    let h = harness().await;
    let reply = h.admin.echo(json!({"ping": [1, 2]})).await.expect("echo");
    assert_eq!(reply, json!({"ping": [1, 2]}));
}

#[tokio::test]
async fn exec_raw_forwards_and_returns_the_reply() {
    let h = harness().await;
    let reply = h
        .admin
        .exec_raw(r#"{"type":"user::proc::trusted::clear"}"#)
        .await
        .expect("exec");
    let value: serde_json::Value = serde_json::from_str(&reply).expect("reply is JSON");
    assert_eq!(value["code"], 0);
    assert_eq!(h.kernel.request_types(), vec!["user::proc::trusted::clear"]);
}

#[tokio::test]
async fn exec_raw_rejects_non_objects() {
    let h = harness().await;
    for bad in ["not json", "[1, 2]", "\"text\""] {
        let err = h.admin.exec_raw(bad).await.expect_err("should fail");
        assert_eq!(err.status_code(), STATUS_INVALID_ARGUMENT);
    }
    assert!(h.kernel.requests().is_empty());
}

#[tokio::test]
async fn shutdown_sends_exit() {
    let h = harness().await;
    h.admin.shutdown_kernel().await.expect("shutdown");
    assert_eq!(h.kernel.request_types(), vec!["user::ctrl::exit"]);
}
