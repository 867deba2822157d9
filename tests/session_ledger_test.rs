// ABOUTME: Integration tests for the refresh-token session ledger
// ABOUTME: Runs lifecycle checks against the in-memory and SQLite stores plus timeout behaviour
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use trustgate::errors::{AppResult, ErrorCode};
use trustgate::sessions::{
    hash_refresh_token, InMemorySessionStore, Session, SessionLedger, SessionMetadata,
    SessionState, SessionStore, SessionSweeper, SqliteSessionStore,
};

async fn ledgers() -> Vec<(&'static str, SessionLedger)> {
    common::init_test_logging();
    let sqlite = SqliteSessionStore::connect("sqlite::memory:").await.unwrap();
    vec![
        ("memory", common::memory_ledger()),
        (
            "sqlite",
            SessionLedger::new(Arc::new(sqlite), common::TEST_TIMEOUT),
        ),
    ]
}

fn metadata(trust_score: i32) -> SessionMetadata {
    SessionMetadata {
        device_name: "laptop".into(),
        device_fingerprint: "fp-1".into(),
        ip_address: "203.0.113.7".into(),
        user_agent: "test-agent".into(),
        trust_score,
        city: "Lisbon".into(),
        country: "PT".into(),
        ..SessionMetadata::default()
    }
}

async fn create(ledger: &SessionLedger, user: &str, token: &str) -> Session {
    ledger
        .create(
            user,
            &hash_refresh_token(token),
            metadata(10),
            Duration::days(7),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_create_and_find() {
    for (backend, ledger) in ledgers().await {
        let created = create(&ledger, "usr_1", "refresh-1").await;
        assert!(created.id.starts_with("ses_"), "{backend}");
        assert!(created.trusted_device, "{backend}");
        assert!(created.is_active, "{backend}");

        let found = ledger.find_by_id(&created.id).await.unwrap();
        assert_eq!(found.user_id, "usr_1", "{backend}");
        assert_eq!(found.metadata, metadata(10), "{backend}");
        assert_eq!(found.refresh_token_hash, hash_refresh_token("refresh-1"));
        assert_eq!(found.valid_till, created.valid_till, "{backend}");

        let err = ledger.find_by_id("ses_missing").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionNotFound, "{backend}");
    }
}

#[tokio::test]
async fn test_high_risk_device_is_not_trusted() {
    let ledger = common::memory_ledger();
    let session = ledger
        .create("usr_1", "hash", metadata(30), Duration::days(7))
        .await
        .unwrap();
    assert!(!session.trusted_device);
}

#[tokio::test]
async fn test_revoke_is_terminal() {
    for (backend, ledger) in ledgers().await {
        let session = create(&ledger, "usr_1", "refresh-1").await;
        let hash = hash_refresh_token("refresh-1");

        ledger.resolve_for_refresh(&session.id, &hash).await.unwrap();
        ledger.revoke(&session.id).await.unwrap();

        let err = ledger
            .resolve_for_refresh(&session.id, &hash)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionRevoked, "{backend}");

        let revoked = ledger.find_by_id(&session.id).await.unwrap();
        assert!(!revoked.is_active, "{backend}");
        assert!(revoked.valid_till > Utc::now(), "{backend}");
        assert_eq!(revoked.state_at(Utc::now()), SessionState::Revoked);
    }
}

#[tokio::test]
async fn test_revoke_keeps_first_timestamp() {
    for (backend, ledger) in ledgers().await {
        let session = create(&ledger, "usr_1", "refresh-1").await;
        ledger.revoke(&session.id).await.unwrap();
        let first = ledger.find_by_id(&session.id).await.unwrap().revoked_at;

        tokio::time::sleep(StdDuration::from_millis(5)).await;
        ledger.revoke(&session.id).await.unwrap();
        let second = ledger.find_by_id(&session.id).await.unwrap().revoked_at;

        assert!(first.is_some(), "{backend}");
        assert_eq!(first, second, "{backend}");

        let err = ledger.revoke("ses_missing").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionNotFound, "{backend}");
    }
}

#[tokio::test]
async fn test_touch_keeps_latest_timestamp() {
    for (backend, ledger) in ledgers().await {
        let session = create(&ledger, "usr_1", "refresh-1").await;
        let base = Utc::now();
        let stamps: Vec<DateTime<Utc>> = (1..=3).map(|i| base + Duration::minutes(i)).collect();

        for at in &stamps {
            ledger.touch_at(&session.id, *at).await.unwrap();
        }

        let touched = ledger.find_by_id(&session.id).await.unwrap();
        assert_eq!(touched.last_used_at, Some(stamps[2]), "{backend}");

        let err = ledger.touch("ses_missing").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionNotFound, "{backend}");
    }
}

#[tokio::test]
async fn test_expired_session_cannot_refresh() {
    for (backend, ledger) in ledgers().await {
        let session = create(&ledger, "usr_1", "refresh-1").await;
        let hash = hash_refresh_token("refresh-1");

        let err = ledger
            .resolve_for_refresh_at(&session.id, &hash, session.valid_till)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionExpired, "{backend}");
    }
}

#[tokio::test]
async fn test_mismatched_refresh_hash_rejected() {
    for (backend, ledger) in ledgers().await {
        let session = create(&ledger, "usr_1", "refresh-1").await;

        let err = ledger
            .resolve_for_refresh(&session.id, &hash_refresh_token("refresh-2"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthInvalid, "{backend}");
    }
}

#[tokio::test]
async fn test_revoke_all_for_user() {
    for (backend, ledger) in ledgers().await {
        let a = create(&ledger, "usr_1", "a").await;
        let b = create(&ledger, "usr_1", "b").await;
        let other = create(&ledger, "usr_2", "c").await;
        ledger.revoke(&a.id).await.unwrap();

        let revoked = ledger.revoke_all_for_user("usr_1").await.unwrap();
        assert_eq!(revoked, 1, "{backend}");

        assert!(ledger.list_active_for_user("usr_1").await.unwrap().is_empty());
        let remaining = ledger.list_active_for_user("usr_2").await.unwrap();
        assert_eq!(remaining.len(), 1, "{backend}");
        assert_eq!(remaining[0].id, other.id, "{backend}");

        let err = ledger
            .resolve_for_refresh(&b.id, &hash_refresh_token("b"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionRevoked, "{backend}");
    }
}

#[tokio::test]
async fn test_sweep_deactivates_only_expired_sessions() {
    for (backend, ledger) in ledgers().await {
        let now = Utc::now();
        let short = ledger
            .create_at("ses_short", "usr_1", "h1", metadata(0), Duration::hours(1), now)
            .await
            .unwrap();
        let long = ledger
            .create_at("ses_long", "usr_1", "h2", metadata(0), Duration::days(7), now)
            .await
            .unwrap();

        let swept = ledger
            .sweep_expired_at(now + Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(swept, 1, "{backend}");

        assert!(!ledger.find_by_id(&short.id).await.unwrap().is_active);
        assert!(ledger.find_by_id(&long.id).await.unwrap().is_active);

        // a second sweep finds nothing new
        let again = ledger
            .sweep_expired_at(now + Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(again, 0, "{backend}");
    }
}

#[tokio::test]
async fn test_list_active_orders_newest_first() {
    for (backend, ledger) in ledgers().await {
        let now = Utc::now();
        for (i, id) in ["ses_a", "ses_b", "ses_c"].iter().enumerate() {
            ledger
                .create_at(
                    id,
                    "usr_1",
                    "hash",
                    metadata(0),
                    Duration::days(1),
                    now + Duration::seconds(i as i64),
                )
                .await
                .unwrap();
        }
        ledger.revoke("ses_b").await.unwrap();

        let ids: Vec<String> = ledger
            .list_active_for_user("usr_1")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, ["ses_c", "ses_a"], "{backend}");
    }
}

#[tokio::test]
async fn test_sqlite_sessions_persist_across_connections() {
    let dir = tempfile::TempDir::new().unwrap();
    let url = format!("sqlite:{}", dir.path().join("sessions.db").display());

    let id = {
        let store = SqliteSessionStore::connect(&url).await.unwrap();
        let ledger = SessionLedger::new(Arc::new(store), common::TEST_TIMEOUT);
        create(&ledger, "usr_1", "refresh-1").await.id
    };

    let store = SqliteSessionStore::connect(&url).await.unwrap();
    let ledger = SessionLedger::new(Arc::new(store), common::TEST_TIMEOUT);
    assert_eq!(ledger.find_by_id(&id).await.unwrap().user_id, "usr_1");
}

/// Store whose every call outlives the ledger timeout
struct StalledStore;

#[async_trait]
impl SessionStore for StalledStore {
    async fn insert(&self, _session: &Session) -> AppResult<()> {
        stall().await
    }
    async fn find(&self, _id: &str) -> AppResult<Option<Session>> {
        stall().await
    }
    async fn touch(&self, _id: &str, _at: DateTime<Utc>) -> AppResult<bool> {
        stall().await
    }
    async fn revoke(&self, _id: &str, _at: DateTime<Utc>) -> AppResult<bool> {
        stall().await
    }
    async fn revoke_all_for_user(&self, _user_id: &str, _at: DateTime<Utc>) -> AppResult<u64> {
        stall().await
    }
    async fn sweep_expired(&self, _now: DateTime<Utc>) -> AppResult<u64> {
        stall().await
    }
    async fn list_active_for_user(
        &self,
        _user_id: &str,
        _now: DateTime<Utc>,
    ) -> AppResult<Vec<Session>> {
        stall().await
    }
}

async fn stall<T>() -> AppResult<T> {
    tokio::time::sleep(StdDuration::from_secs(60)).await;
    panic!("stalled store call was not cancelled");
}

#[tokio::test]
async fn test_storage_timeout_fails_closed() {
    let ledger = SessionLedger::new(Arc::new(StalledStore), StdDuration::from_millis(20));

    let err = ledger
        .resolve_for_refresh("ses_1", "hash")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::StorageUnavailable);

    let err = ledger.revoke("ses_1").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::StorageUnavailable);
}

#[tokio::test]
async fn test_sweeper_runs_until_shutdown() {
    let store = Arc::new(InMemorySessionStore::new());
    let ledger = SessionLedger::new(store, common::TEST_TIMEOUT);
    let past = Utc::now() - Duration::days(2);
    let session = ledger
        .create_at("ses_old", "usr_1", "hash", metadata(0), Duration::days(1), past)
        .await
        .unwrap();

    let sweeper = SessionSweeper::spawn(ledger.clone(), StdDuration::from_millis(10));
    for _ in 0..100 {
        if !ledger.find_by_id(&session.id).await.unwrap().is_active {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    sweeper.shutdown().await;

    assert!(!ledger.find_by_id(&session.id).await.unwrap().is_active);
}

#[tokio::test]
async fn test_unrepresentable_lifetime_rejected() {
    for (backend, ledger) in ledgers().await {
        let err = ledger
            .create("usr_1", "hash", SessionMetadata::default(), Duration::MAX)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput, "{backend}");
        assert!(ledger
            .list_active_for_user("usr_1")
            .await
            .unwrap()
            .is_empty());
    }
}

#[tokio::test]
async fn test_concurrent_touch_and_revoke() {
    for (backend, ledger) in ledgers().await {
        for round in 0..10 {
            let token = format!("refresh-{round}");
            let session = create(&ledger, "usr_1", &token).await;

            let (touched, revoked) =
                tokio::join!(ledger.touch(&session.id), ledger.revoke(&session.id));
            touched.unwrap();
            revoked.unwrap();

            let stored = ledger.find_by_id(&session.id).await.unwrap();
            assert!(stored.revoked_at.is_some(), "{backend} round {round}");
            assert!(!stored.is_active, "{backend} round {round}");

            let err = ledger
                .resolve_for_refresh(&session.id, &hash_refresh_token(&token))
                .await
                .unwrap_err();
            assert_eq!(err.code, ErrorCode::SessionRevoked, "{backend} round {round}");
        }
    }
}
