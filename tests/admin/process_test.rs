//! Process settings and command operations.

use std::sync::Arc;
use std::time::Duration;

use uranus::admin::{Admin, AdminError, STATUS_INVALID_ARGUMENT};
use uranus::codec::Request;
use uranus::store::{ConfigKey, JudgeOutcome, TrustStatus};
use uranus::trust::{InlineTrust, KeyedLocks};

use crate::harness;
use crate::support::store::signature;

#[tokio::test]
async fn judge_mode_is_validated_persisted_and_pushed() {
    let h = harness().await;
    assert_eq!(h.admin.judge_mode().await.expect("mode"), 0);

    h.admin.set_judge_mode(2).await.expect("set");
    assert_eq!(h.admin.judge_mode().await.expect("mode"), 2);
    assert_eq!(h.kernel.requests_of("user::proc::judge")[0]["judge"], 2);

    let err = h.admin.set_judge_mode(3).await.expect_err("should fail");
    assert!(matches!(err, AdminError::InvalidArgument(_)));
    assert_eq!(h.kernel.requests_of("user::proc::judge").len(), 1);
}

#[tokio::test]
async fn default_status_round_trips() {
    let h = harness().await;
    assert_eq!(h.admin.default_status().await.expect("read"), TrustStatus::Pending);

    h.admin.set_default_status(2).await.expect("set");
    assert_eq!(h.admin.default_status().await.expect("read"), TrustStatus::Trusted);
    assert_eq!(
        h.store
            .store
            .get_integer(ConfigKey::ProcessCmdDefaultStatus)
            .await
            .expect("raw"),
        Some(2)
    );

    let err = h.admin.set_default_status(9).await.expect_err("should fail");
    assert_eq!(err.status_code(), STATUS_INVALID_ARGUMENT);
}

#[tokio::test]
async fn trusting_a_command_pushes_it_first() {
    let h = harness().await;
    let cmd = signature("/usr/bin/curl", &["curl", "-s"]);
    let update = h
        .store
        .store
        .record_audit(&cmd, JudgeOutcome::Allowed, TrustStatus::Pending)
        .await
        .expect("seed");

    h.admin.set_command_status(update.id, 2).await.expect("trust");
    assert_eq!(h.kernel.requests_of("user::proc::trusted::insert")[0]["cmd"], cmd);
    let listed = h.admin.list_commands(10, 0).await.expect("list");
    assert_eq!(listed[0].status, TrustStatus::Trusted);

    h.admin.set_command_status(update.id, 1).await.expect("distrust");
    assert_eq!(h.kernel.requests_of("user::proc::trusted::delete")[0]["cmd"], cmd);
}

#[tokio::test]
async fn refused_trust_leaves_status_unchanged() {
    let h = harness().await;
    let cmd = signature("/bin/sh", &["sh"]);
    let update = h
        .store
        .store
        .record_audit(&cmd, JudgeOutcome::Allowed, TrustStatus::Pending)
        .await
        .expect("seed");
    h.kernel.set_code("user::proc::trusted::insert", -1);

    let err = h.admin.set_command_status(update.id, 2).await.expect_err("should fail");
    assert_eq!(err.status_code(), 11);
    let record = h.store.store.process_record(update.id).await.expect("read");
    assert_eq!(record.status, TrustStatus::Pending);
}

#[tokio::test]
async fn deleting_a_trusted_command_withdraws_it() {
    let h = harness().await;
    let cmd = signature("/bin/date", &["date"]);
    let update = h
        .store
        .store
        .record_audit(&cmd, JudgeOutcome::Allowed, TrustStatus::Trusted)
        .await
        .expect("seed");

    h.admin.delete_command(update.id).await.expect("delete");
    assert_eq!(h.kernel.requests_of("user::proc::trusted::delete").len(), 1);
    assert!(h.admin.list_commands(10, 0).await.expect("list").is_empty());

    let err = h.admin.delete_command(update.id).await.expect_err("should fail");
    assert_eq!(err.status_code(), STATUS_INVALID_ARGUMENT);
}

#[tokio::test]
async fn distrust_waits_for_an_in_flight_promotion() {
    let h = harness().await;
    let locks = Arc::new(KeyedLocks::new());
    let admin = Admin::with_locks(h.store.store.clone(), h.kernel.endpoint(), Arc::clone(&locks));
    let trust = InlineTrust::with_locks(h.store.store.clone(), locks);

    let cmd = signature("/usr/bin/ssh", &["ssh", "host"]);
    let update = h
        .store
        .store
        .record_audit(&cmd, JudgeOutcome::Allowed, TrustStatus::Pending)
        .await
        .expect("seed");
    h.store
        .store
        .set_integer(ConfigKey::ProcessCmdDefaultStatus, TrustStatus::Trusted.code())
        .await
        .expect("set default");

    let promotion = trust
        .promote(&cmd, 1)
        .await
        .expect("promote")
        .expect("pending record is promoted");
    assert_eq!(promotion.request(), &Request::TrustedInsert { cmd: cmd.clone() });

    let distrust = tokio::spawn(async move { admin.set_command_status(update.id, 1).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!distrust.is_finished());
    assert!(h.kernel.requests_of("user::proc::trusted::delete").is_empty());

    drop(promotion);
    distrust.await.expect("join").expect("distrust");

    let record = h.store.store.process_record(update.id).await.expect("read");
    assert_eq!(record.status, TrustStatus::Untrusted);
    assert_eq!(h.kernel.requests_of("user::proc::trusted::delete")[0]["cmd"], cmd);

    // Once untrusted, a later allowed audit no longer promotes it.
    assert!(trust.promote(&cmd, 1).await.expect("again").is_none());
}
