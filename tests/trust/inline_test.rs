//! Tests for `InlineTrust`: default-status driven trust.

use uranus::codec::Request;
use uranus::store::{ConfigKey, JudgeOutcome, TrustStatus};
use uranus::trust::InlineTrust;

use crate::support::store::{signature, temp_store};

const ALLOWED: i64 = 1;
const DENIED: i64 = 2;

#[tokio::test]
async fn unset_default_records_pending_without_pushing() {
    let t = temp_store().await;
    let trust = InlineTrust::new(t.store.clone());
    let cmd = signature("/bin/ls", &["ls"]);

    assert_eq!(trust.default_status().await.expect("default"), TrustStatus::Pending);
    assert_eq!(trust.observe_audit(&cmd, ALLOWED).await.expect("observe"), None);

    let record = t
        .store
        .process_record_by_cmd(&cmd)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(record.status, TrustStatus::Pending);
}

#[tokio::test]
async fn trusted_default_pushes_a_new_allowed_command_once() {
    let t = temp_store().await;
    t.store
        .set_integer(ConfigKey::ProcessCmdDefaultStatus, TrustStatus::Trusted.code())
        .await
        .expect("set default");
    let trust = InlineTrust::new(t.store.clone());
    let cmd = signature("/usr/bin/git", &["git", "status"]);

    assert_eq!(
        trust.observe_audit(&cmd, ALLOWED).await.expect("first"),
        Some(Request::TrustedInsert { cmd: cmd.clone() })
    );
    assert_eq!(trust.observe_audit(&cmd, ALLOWED).await.expect("second"), None);
    assert_eq!(t.store.trusted_commands().await.expect("query"), vec![cmd]);
}

#[tokio::test]
async fn trusted_default_keeps_denied_launches_pending() {
    let t = temp_store().await;
    t.store
        .set_integer(ConfigKey::ProcessCmdDefaultStatus, TrustStatus::Trusted.code())
        .await
        .expect("set default");
    let trust = InlineTrust::new(t.store.clone());
    let cmd = signature("/tmp/dropper", &["dropper"]);

    assert_eq!(trust.observe_audit(&cmd, DENIED).await.expect("observe"), None);
    let record = t
        .store
        .process_record_by_cmd(&cmd)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(record.status, TrustStatus::Pending);

    // A later allowed launch promotes the pending record.
    assert_eq!(
        trust.observe_audit(&cmd, ALLOWED).await.expect("allowed"),
        Some(Request::TrustedInsert { cmd: cmd.clone() })
    );
}

#[tokio::test]
async fn operator_untrusted_records_stay_untrusted() {
    let t = temp_store().await;
    let trust = InlineTrust::new(t.store.clone());
    let cmd = signature("/bin/nc", &["nc", "-l"]);

    trust.observe_audit(&cmd, ALLOWED).await.expect("first");
    let record = t
        .store
        .process_record_by_cmd(&cmd)
        .await
        .expect("lookup")
        .expect("present");
    t.store
        .set_process_status(record.id, TrustStatus::Untrusted)
        .await
        .expect("distrust");
    t.store
        .set_integer(ConfigKey::ProcessCmdDefaultStatus, TrustStatus::Trusted.code())
        .await
        .expect("set default");

    assert_eq!(trust.observe_audit(&cmd, ALLOWED).await.expect("again"), None);
    assert!(t.store.trusted_commands().await.expect("query").is_empty());
}

#[tokio::test]
async fn startup_requests_cover_every_trusted_record() {
    let t = temp_store().await;
    t.store
        .set_integer(ConfigKey::ProcessCmdDefaultStatus, TrustStatus::Trusted.code())
        .await
        .expect("set default");
    let trust = InlineTrust::new(t.store.clone());
    let a = signature("/bin/a", &["a"]);
    let b = signature("/bin/b", &["b"]);
    trust.observe_audit(&a, ALLOWED).await.expect("a");
    trust.observe_audit(&b, ALLOWED).await.expect("b");

    let fresh = InlineTrust::new(t.store.clone());
    assert_eq!(
        fresh.startup_requests().await.expect("startup"),
        vec![
            Request::TrustedInsert { cmd: a },
            Request::TrustedInsert { cmd: b },
        ]
    );
}

#[tokio::test]
async fn concurrent_audits_push_a_new_command_exactly_once() {
    let t = temp_store().await;
    t.store
        .set_integer(ConfigKey::ProcessCmdDefaultStatus, TrustStatus::Trusted.code())
        .await
        .expect("set default");
    let trust = std::sync::Arc::new(InlineTrust::new(t.store.clone()));
    let cmd = signature("/bin/busy", &["busy"]);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let trust = std::sync::Arc::clone(&trust);
        let cmd = cmd.clone();
        handles.push(tokio::spawn(async move { trust.observe_audit(&cmd, ALLOWED).await }));
    }
    let mut pushes = 0;
    for handle in handles {
        if handle.await.expect("join").expect("observe").is_some() {
            pushes += 1;
        }
    }
    assert_eq!(pushes, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn operator_distrust_racing_an_allowed_audit_always_wins() {
    let t = temp_store().await;
    t.store
        .set_integer(ConfigKey::ProcessCmdDefaultStatus, TrustStatus::Trusted.code())
        .await
        .expect("set default");
    let trust = std::sync::Arc::new(InlineTrust::new(t.store.clone()));

    for round in 0..100 {
        let arg = round.to_string();
        let cmd = signature("/bin/race", &["race", arg.as_str()]);
        let update = t
            .store
            .record_audit(&cmd, JudgeOutcome::Allowed, TrustStatus::Pending)
            .await
            .expect("seed");

        let audit = {
            let trust = std::sync::Arc::clone(&trust);
            let cmd = cmd.clone();
            tokio::spawn(async move { trust.observe_audit(&cmd, ALLOWED).await })
        };
        let distrust = {
            let store = t.store.clone();
            tokio::spawn(async move { store.set_process_status(update.id, TrustStatus::Untrusted).await })
        };
        audit.await.expect("join").expect("observe");
        distrust.await.expect("join").expect("distrust");

        let record = t.store.process_record(update.id).await.expect("read");
        assert_eq!(record.status, TrustStatus::Untrusted, "round {round}");
    }
}
