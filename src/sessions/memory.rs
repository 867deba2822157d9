// ABOUTME: In-process session store for tests, single-node deployments and the CLI
// ABOUTME: Each operation mutates the map under one lock acquisition
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use super::{Session, SessionState, SessionStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use trustgate_core::errors::{AppError, AppResult};

/// Session store backed by a `HashMap`
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: &Session) -> AppResult<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(AppError::invalid_input(format!(
                "Session {} already exists",
                session.id
            )));
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn find(&self, id: &str) -> AppResult<Option<Session>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn touch(&self, id: &str, at: DateTime<Utc>) -> AppResult<bool> {
        Ok(self
            .sessions
            .write()
            .await
            .get_mut(id)
            .map(|session| session.last_used_at = Some(at))
            .is_some())
    }

    async fn revoke(&self, id: &str, at: DateTime<Utc>) -> AppResult<bool> {
        Ok(self
            .sessions
            .write()
            .await
            .get_mut(id)
            .map(|session| {
                session.is_active = false;
                session.revoked_at.get_or_insert(at);
            })
            .is_some())
    }

    async fn revoke_all_for_user(&self, user_id: &str, at: DateTime<Utc>) -> AppResult<u64> {
        let mut sessions = self.sessions.write().await;
        let mut revoked = 0;
        for session in sessions
            .values_mut()
            .filter(|s| s.user_id == user_id && s.revoked_at.is_none())
        {
            session.is_active = false;
            session.revoked_at = Some(at);
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut sessions = self.sessions.write().await;
        let mut swept = 0;
        for session in sessions
            .values_mut()
            .filter(|s| s.is_active && s.valid_till <= now)
        {
            session.is_active = false;
            swept += 1;
        }
        Ok(swept)
    }

    async fn list_active_for_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Session>> {
        let mut active: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id && s.state_at(now) == SessionState::Active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(active)
    }
}
