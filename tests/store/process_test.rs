//! Tests for `src/store/process.rs`: one row per raw signature.

use std::sync::Arc;

use uranus::store::{JudgeOutcome, StoreError, TrustStatus};

use crate::support::store::{signature, temp_store};

#[tokio::test]
async fn first_audit_creates_then_later_audits_bump() {
    let t = temp_store().await;
    let cmd = signature("/usr/bin/make", &["make", "all"]);

    let first = t
        .store
        .record_audit(&cmd, JudgeOutcome::Allowed, TrustStatus::Pending)
        .await
        .expect("first");
    assert!(first.is_new());
    assert_eq!(first.status, TrustStatus::Pending);

    let second = t
        .store
        .record_audit(&cmd, JudgeOutcome::Denied, TrustStatus::Trusted)
        .await
        .expect("second");
    assert_eq!(second.id, first.id);
    assert_eq!(second.count, 2);
    // The initial status only applies on creation.
    assert_eq!(second.status, TrustStatus::Pending);

    let record = t.store.process_record(first.id).await.expect("read");
    assert_eq!(record.judge, JudgeOutcome::Denied);
    assert_eq!(record.binary, "/usr/bin/make");
    assert_eq!(record.argv, "make all");
}

#[tokio::test]
async fn concurrent_audits_of_one_signature_share_a_row() {
    let t = temp_store().await;
    let store = Arc::new(t.store.clone());
    let cmd = signature("/bin/true", &["true"]);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = Arc::clone(&store);
        let cmd = cmd.clone();
        handles.push(tokio::spawn(async move {
            store
                .record_audit(&cmd, JudgeOutcome::Allowed, TrustStatus::Pending)
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("record");
    }

    let records = t.store.list_process_records(10, 0).await.expect("list");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].count, 16);
}

#[tokio::test]
async fn signatures_differing_only_in_argv_split_are_distinct() {
    let t = temp_store().await;
    let split = signature("/bin/echo", &["a", "b"]);
    let merged = signature("/bin/echo", &["a b"]);

    for cmd in [&split, &merged] {
        t.store
            .record_audit(cmd, JudgeOutcome::Allowed, TrustStatus::Pending)
            .await
            .expect("record");
    }
    assert_eq!(t.store.list_process_records(10, 0).await.expect("list").len(), 2);
}

#[tokio::test]
async fn malformed_signature_is_rejected() {
    let t = temp_store().await;
    let err = t
        .store
        .record_audit("/bin/ls", JudgeOutcome::Allowed, TrustStatus::Pending)
        .await
        .expect_err("should fail");
    assert!(matches!(err, StoreError::Command(_)));
}

#[tokio::test]
async fn trusted_commands_lists_only_trusted_rows() {
    let t = temp_store().await;
    let trusted = signature("/bin/ls", &["ls"]);
    let pending = signature("/bin/cat", &["cat"]);

    let update = t
        .store
        .record_audit(&trusted, JudgeOutcome::Allowed, TrustStatus::Pending)
        .await
        .expect("record");
    t.store
        .record_audit(&pending, JudgeOutcome::Allowed, TrustStatus::Pending)
        .await
        .expect("record");
    t.store
        .set_process_status(update.id, TrustStatus::Trusted)
        .await
        .expect("trust");

    assert_eq!(t.store.trusted_commands().await.expect("query"), vec![trusted]);
}

#[tokio::test]
async fn records_list_most_frequent_first() {
    let t = temp_store().await;
    let rare = signature("/bin/rare", &["rare"]);
    let common = signature("/bin/common", &["common"]);

    t.store
        .record_audit(&rare, JudgeOutcome::Allowed, TrustStatus::Pending)
        .await
        .expect("rare");
    for _ in 0..3 {
        t.store
            .record_audit(&common, JudgeOutcome::Allowed, TrustStatus::Pending)
            .await
            .expect("common");
    }

    let records = t.store.list_process_records(10, 0).await.expect("list");
    assert_eq!(records[0].cmd, common);
    assert_eq!(records[1].cmd, rare);

    let found = t
        .store
        .process_record_by_cmd(&rare)
        .await
        .expect("lookup")
        .expect("present");
    t.store.delete_process_record(found.id).await.expect("delete");
    assert!(t.store.process_record_by_cmd(&rare).await.expect("lookup").is_none());
}

#[test]
fn wire_judge_two_is_the_only_denial() {
    assert_eq!(JudgeOutcome::from_wire(2), JudgeOutcome::Denied);
    assert_eq!(JudgeOutcome::from_wire(1), JudgeOutcome::Allowed);
    assert_eq!(JudgeOutcome::from_wire(0), JudgeOutcome::Allowed);
}

#[tokio::test]
async fn promote_pending_only_moves_pending_rows() {
    let t = temp_store().await;
    let cmd = signature("/bin/vi", &["vi"]);
    let update = t
        .store
        .record_audit(&cmd, JudgeOutcome::Allowed, TrustStatus::Pending)
        .await
        .expect("record");

    t.store
        .set_process_status(update.id, TrustStatus::Untrusted)
        .await
        .expect("distrust");
    assert!(!t.store.promote_pending(update.id).await.expect("promote"));
    let record = t.store.process_record(update.id).await.expect("read");
    assert_eq!(record.status, TrustStatus::Untrusted);

    t.store
        .set_process_status(update.id, TrustStatus::Pending)
        .await
        .expect("reset");
    assert!(t.store.promote_pending(update.id).await.expect("promote"));
    assert!(!t.store.promote_pending(update.id).await.expect("again"));
    assert!(!t.store.promote_pending(update.id + 100).await.expect("missing"));
}
