//! Tests for `src/store/config.rs`.

use uranus::store::config::{MODULE_DISABLED, MODULE_ENABLED};
use uranus::store::ConfigKey;

use crate::support::store::temp_store;

#[tokio::test]
async fn missing_keys_read_as_none() {
    let t = temp_store().await;
    assert_eq!(
        t.store
            .get_integer(ConfigKey::ProcessProtectionMode)
            .await
            .expect("read"),
        None
    );
    assert_eq!(
        t.store.get_text(ConfigKey::ProcessModuleStatus).await.expect("read"),
        None
    );
    assert!(!t
        .store
        .module_enabled(ConfigKey::FileModuleStatus)
        .await
        .expect("read"));
}

#[tokio::test]
async fn integer_writes_overwrite() {
    let t = temp_store().await;
    t.store
        .set_integer(ConfigKey::ProcessProtectionMode, 1)
        .await
        .expect("write");
    t.store
        .set_integer(ConfigKey::ProcessProtectionMode, 2)
        .await
        .expect("overwrite");
    assert_eq!(
        t.store
            .get_integer(ConfigKey::ProcessProtectionMode)
            .await
            .expect("read"),
        Some(2)
    );
}

#[tokio::test]
async fn module_flags_follow_stored_value() {
    let t = temp_store().await;
    t.store
        .set_integer(ConfigKey::NetModuleStatus, MODULE_ENABLED)
        .await
        .expect("enable");
    assert!(t.store.module_enabled(ConfigKey::NetModuleStatus).await.expect("read"));

    t.store
        .set_integer(ConfigKey::NetModuleStatus, MODULE_DISABLED)
        .await
        .expect("disable");
    assert!(!t.store.module_enabled(ConfigKey::NetModuleStatus).await.expect("read"));
}

#[tokio::test]
async fn typed_columns_are_independent() {
    let t = temp_store().await;
    let key = ConfigKey::ProcessCmdDefaultStatus;
    t.store.set_text(key, "note").await.expect("text");
    t.store.set_real(key, 0.5).await.expect("real");

    assert_eq!(t.store.get_text(key).await.expect("text"), Some("note".to_owned()));
    assert_eq!(t.store.get_real(key).await.expect("real"), Some(0.5));
    assert_eq!(t.store.get_integer(key).await.expect("integer"), None);
}
