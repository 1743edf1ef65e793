//! Tests for `JudgeEngine`: threshold promotion.

use uranus::codec::Request;
use uranus::trust::{JudgeEngine, DEFAULT_JUDGE_THRESHOLD};

use crate::support::store::{signature, temp_store};

#[tokio::test]
async fn audit_below_threshold_does_not_promote() {
    let t = temp_store().await;
    let engine = JudgeEngine::new(t.store.clone(), DEFAULT_JUDGE_THRESHOLD);
    let cmd = signature("/bin/ls", &["ls"]);

    assert_eq!(engine.observe_kernel(&cmd).await.expect("obs"), 1);
    assert_eq!(engine.observe_kernel(&cmd).await.expect("obs"), 2);
    assert_eq!(engine.observe_audit(&cmd).await.expect("audit"), None);
}

#[tokio::test]
async fn reaching_threshold_promotes_exactly_once() {
    let t = temp_store().await;
    let engine = JudgeEngine::new(t.store.clone(), 3);
    let cmd = signature("/bin/ls", &["ls"]);

    for _ in 0..3 {
        engine.observe_kernel(&cmd).await.expect("obs");
    }
    assert_eq!(
        engine.observe_audit(&cmd).await.expect("audit"),
        Some(Request::TrustedInsert { cmd: cmd.clone() })
    );

    engine.observe_kernel(&cmd).await.expect("obs");
    assert_eq!(engine.observe_audit(&cmd).await.expect("again"), None);
}

#[tokio::test]
async fn audits_without_observations_never_promote() {
    let t = temp_store().await;
    let engine = JudgeEngine::new(t.store.clone(), 1);
    let cmd = signature("/bin/ls", &["ls"]);

    assert_eq!(engine.observe_audit(&cmd).await.expect("audit"), None);
    assert_eq!(t.store.judge_count(&cmd).await.expect("count"), 0);
}

#[tokio::test]
async fn startup_pushes_known_commands_and_suppresses_repeat_audits() {
    let t = temp_store().await;
    let cmd = signature("/usr/bin/make", &["make"]);
    for _ in 0..4 {
        t.store.increment_judge(&cmd).await.expect("inc");
    }

    let engine = JudgeEngine::new(t.store.clone(), 3);
    assert_eq!(
        engine.startup_requests().await.expect("startup"),
        vec![Request::TrustedInsert { cmd: cmd.clone() }]
    );
    assert_eq!(engine.observe_audit(&cmd).await.expect("audit"), None);
}
