//! Tests for `src/worker/judge.rs`.

use serde_json::json;

use uranus::fatal::FatalSignal;
use uranus::worker::{JudgeDomain, Worker};

use crate::quick_settings;
use crate::support::kernel::FakeKernel;
use crate::support::store::{signature, temp_store};

#[tokio::test]
async fn frequently_observed_command_is_trusted_once() {
    let kernel = FakeKernel::spawn().await;
    let t = temp_store().await;
    let mut worker = Worker::new(
        JudgeDomain::new(t.store.clone(), 3),
        t.store.clone(),
        kernel.endpoint(),
        quick_settings(),
        FatalSignal::new(),
    );
    worker.start().await.expect("start");
    kernel
        .wait_for(|r| r.iter().any(|r| r["type"] == "user::proc::enable"))
        .await;
    assert_eq!(kernel.subscriber_count("kernel::proc::report"), 1);
    assert_eq!(kernel.subscriber_count("audit::proc::report"), 1);

    let cmd = signature("/usr/bin/python3", &["python3", "app.py"]);
    for _ in 0..3 {
        kernel
            .push(
                "kernel::proc::report",
                json!({"type": "kernel::proc::report", "cmd": cmd}),
            )
            .await;
    }
    let store = t.store.clone();
    let counted = cmd.clone();
    crate::support::eventually("three observations", move || {
        let store = store.clone();
        let cmd = counted.clone();
        async move { matches!(store.judge_count(&cmd).await, Ok(3)) }
    })
    .await;

    for _ in 0..2 {
        kernel
            .push(
                "audit::proc::report",
                json!({"type": "audit::proc::report", "cmd": cmd, "judge": 1}),
            )
            .await;
    }
    kernel
        .wait_for(|r| r.iter().any(|r| r["type"] == "user::proc::trusted::insert"))
        .await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(kernel.requests_of("user::proc::trusted::insert").len(), 1);

    worker.stop().await;
}

#[tokio::test]
async fn startup_pushes_commands_already_over_threshold() {
    let kernel = FakeKernel::spawn().await;
    let t = temp_store().await;
    let cmd = signature("/bin/bash", &["bash"]);
    for _ in 0..5 {
        t.store.increment_judge(&cmd).await.expect("seed");
    }

    let mut worker = Worker::new(
        JudgeDomain::new(t.store.clone(), 3),
        t.store.clone(),
        kernel.endpoint(),
        quick_settings(),
        FatalSignal::new(),
    );
    worker.start().await.expect("start");
    kernel
        .wait_for(|r| r.iter().any(|r| r["type"] == "user::proc::enable"))
        .await;
    assert_eq!(kernel.requests_of("user::proc::trusted::insert")[0]["cmd"], cmd);
    assert_eq!(worker.domain().engine().threshold(), 3);
    worker.stop().await;
}
