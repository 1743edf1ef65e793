//! Tests for `src/worker/process.rs`.

use serde_json::json;

use uranus::fatal::FatalSignal;
use uranus::store::{ConfigKey, JudgeOutcome, TrustStatus};
use uranus::worker::{ProcessDomain, Worker};

use crate::quick_settings;
use crate::support::eventually;
use crate::support::kernel::FakeKernel;
use crate::support::store::{signature, temp_store};

#[tokio::test]
async fn startup_pushes_trusted_commands_and_judge_mode() {
    let kernel = FakeKernel::spawn().await;
    let t = temp_store().await;
    let cmd = signature("/usr/sbin/sshd", &["sshd", "-D"]);
    t.store
        .record_audit(&cmd, JudgeOutcome::Allowed, TrustStatus::Trusted)
        .await
        .expect("seed");
    t.store
        .set_integer(ConfigKey::ProcessProtectionMode, 2)
        .await
        .expect("mode");

    let mut worker = Worker::new(
        ProcessDomain::new(t.store.clone()),
        t.store.clone(),
        kernel.endpoint(),
        quick_settings(),
        FatalSignal::new(),
    );
    worker.start().await.expect("start");
    kernel
        .wait_for(|r| r.iter().any(|r| r["type"] == "user::proc::judge"))
        .await;

    let inserts = kernel.requests_of("user::proc::trusted::insert");
    assert_eq!(inserts, vec![json!({"type": "user::proc::trusted::insert", "cmd": cmd})]);
    assert_eq!(kernel.requests_of("user::proc::judge")[0]["judge"], 2);
    worker.stop().await;
}

#[tokio::test]
async fn audit_reports_are_persisted() {
    let kernel = FakeKernel::spawn().await;
    let t = temp_store().await;
    let mut worker = Worker::new(
        ProcessDomain::new(t.store.clone()),
        t.store.clone(),
        kernel.endpoint(),
        quick_settings(),
        FatalSignal::new(),
    );
    worker.start().await.expect("start");
    kernel
        .wait_for(|r| r.iter().filter(|r| r["type"] == "user::msg::sub").count() == 2)
        .await;

    let cmd = signature("/bin/ls", &["ls", "-la"]);
    for _ in 0..2 {
        kernel
            .push(
                "audit::proc::report",
                json!({"type": "audit::proc::report", "cmd": cmd, "judge": 1}),
            )
            .await;
    }

    let store = t.store.clone();
    let expected = cmd.clone();
    eventually("two audits recorded", move || {
        let store = store.clone();
        let cmd = expected.clone();
        async move {
            matches!(
                store.process_record_by_cmd(&cmd).await,
                Ok(Some(record)) if record.count == 2
            )
        }
    })
    .await;

    assert!(kernel.requests_of("user::proc::trusted::insert").is_empty());
    worker.stop().await;
}

#[tokio::test]
async fn trusted_default_pushes_new_commands() {
    let kernel = FakeKernel::spawn().await;
    let t = temp_store().await;
    t.store
        .set_integer(ConfigKey::ProcessCmdDefaultStatus, TrustStatus::Trusted.code())
        .await
        .expect("default");
    let mut worker = Worker::new(
        ProcessDomain::new(t.store.clone()),
        t.store.clone(),
        kernel.endpoint(),
        quick_settings(),
        FatalSignal::new(),
    );
    worker.start().await.expect("start");
    kernel
        .wait_for(|r| r.iter().filter(|r| r["type"] == "user::msg::sub").count() == 2)
        .await;

    let cmd = signature("/usr/bin/vim", &["vim"]);
    kernel
        .push(
            "audit::proc::report",
            json!({"type": "audit::proc::report", "cmd": cmd, "judge": 1}),
        )
        .await;

    kernel
        .wait_for(|r| r.iter().any(|r| r["type"] == "user::proc::trusted::insert"))
        .await;
    assert_eq!(kernel.requests_of("user::proc::trusted::insert")[0]["cmd"], cmd);
    worker.stop().await;
}

#[tokio::test]
async fn malformed_signature_is_dropped_without_stopping_the_worker() {
    let kernel = FakeKernel::spawn().await;
    let t = temp_store().await;
    let fatal = FatalSignal::new();
    let mut worker = Worker::new(
        ProcessDomain::new(t.store.clone()),
        t.store.clone(),
        kernel.endpoint(),
        quick_settings(),
        fatal.clone(),
    );
    worker.start().await.expect("start");
    kernel
        .wait_for(|r| r.iter().filter(|r| r["type"] == "user::msg::sub").count() == 2)
        .await;

    kernel
        .push(
            "audit::proc::report",
            json!({"type": "audit::proc::report", "cmd": "no-separators", "judge": 1}),
        )
        .await;
    let good = signature("/bin/true", &["true"]);
    kernel
        .push(
            "audit::proc::report",
            json!({"type": "audit::proc::report", "cmd": good, "judge": 1}),
        )
        .await;

    let store = t.store.clone();
    eventually("valid audit recorded", move || {
        let store = store.clone();
        let cmd = good.clone();
        async move { matches!(store.process_record_by_cmd(&cmd).await, Ok(Some(_))) }
    })
    .await;
    assert!(!fatal.is_tripped());
    assert_eq!(t.store.list_process_records(10, 0).await.expect("list").len(), 1);
    worker.stop().await;
}
