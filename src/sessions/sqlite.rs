// ABOUTME: SQLite session store using sqlx with single-statement lifecycle updates
// ABOUTME: Revocation uses COALESCE so concurrent revokes keep the first timestamp
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Async-IO.org

use super::{Session, SessionMetadata, SessionStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use trustgate_core::errors::{AppError, AppResult};

const SESSION_COLUMNS: &str = r"
    id, user_id, refresh_token_hash,
    device_name, device_fingerprint, ip_address, user_agent, trust_score,
    city, country, region, timezone, isp,
    trusted_device, is_active, created_at, last_used_at, valid_till, revoked_at
";

/// Session store backed by a `SQLite` database
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: Pool<Sqlite>,
}

impl SqliteSessionStore {
    /// Connect and create the schema
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or the migration fails
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let is_memory = database_url.contains(":memory:");

        // file databases are created on first use; an in-memory database lives
        // exactly as long as its single connection
        let connected = if is_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(database_url)
                .await
        } else {
            let connection_options = if database_url.contains('?') {
                database_url.to_owned()
            } else {
                format!("{database_url}?mode=rwc")
            };
            SqlitePoolOptions::new().connect(&connection_options).await
        };
        let pool = connected.map_err(|e| {
            AppError::storage_unavailable(format!("Failed to open session database: {e}"))
        })?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an existing pool; call [`Self::migrate`] before use
    #[must_use]
    pub const fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Create the sessions table and its indexes if missing
    ///
    /// # Errors
    ///
    /// Returns a database error if a statement fails
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                refresh_token_hash TEXT NOT NULL,
                device_name TEXT NOT NULL DEFAULT '',
                device_fingerprint TEXT NOT NULL DEFAULT '',
                ip_address TEXT NOT NULL DEFAULT '',
                user_agent TEXT NOT NULL DEFAULT '',
                trust_score INTEGER NOT NULL DEFAULT 0,
                city TEXT NOT NULL DEFAULT '',
                country TEXT NOT NULL DEFAULT '',
                region TEXT NOT NULL DEFAULT '',
                timezone TEXT NOT NULL DEFAULT '',
                isp TEXT NOT NULL DEFAULT '',
                trusted_device BOOLEAN NOT NULL DEFAULT 0,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                last_used_at TEXT,
                valid_till TEXT NOT NULL,
                revoked_at TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create sessions table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to create sessions index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_active_valid_till ON sessions(is_active, valid_till)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create sessions index: {e}")))?;

        Ok(())
    }

    fn row_to_session(row: &SqliteRow) -> Session {
        Session {
            id: row.get("id"),
            user_id: row.get("user_id"),
            refresh_token_hash: row.get("refresh_token_hash"),
            metadata: SessionMetadata {
                device_name: row.get("device_name"),
                device_fingerprint: row.get("device_fingerprint"),
                ip_address: row.get("ip_address"),
                user_agent: row.get("user_agent"),
                trust_score: row.get("trust_score"),
                city: row.get("city"),
                country: row.get("country"),
                region: row.get("region"),
                timezone: row.get("timezone"),
                isp: row.get("isp"),
            },
            trusted_device: row.get("trusted_device"),
            is_active: row.get("is_active"),
            created_at: row.get("created_at"),
            last_used_at: row.get("last_used_at"),
            valid_till: row.get("valid_till"),
            revoked_at: row.get("revoked_at"),
        }
    }
}

fn unavailable(operation: &str, error: &sqlx::Error) -> AppError {
    AppError::storage_unavailable(format!("Failed to {operation}: {error}"))
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn insert(&self, session: &Session) -> AppResult<()> {
        sqlx::query(&format!(
            "INSERT INTO sessions ({SESSION_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)"
        ))
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.refresh_token_hash)
        .bind(&session.metadata.device_name)
        .bind(&session.metadata.device_fingerprint)
        .bind(&session.metadata.ip_address)
        .bind(&session.metadata.user_agent)
        .bind(session.metadata.trust_score)
        .bind(&session.metadata.city)
        .bind(&session.metadata.country)
        .bind(&session.metadata.region)
        .bind(&session.metadata.timezone)
        .bind(&session.metadata.isp)
        .bind(session.trusted_device)
        .bind(session.is_active)
        .bind(session.created_at)
        .bind(session.last_used_at)
        .bind(session.valid_till)
        .bind(session.revoked_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unavailable("create session", &e))?;
        Ok(())
    }

    async fn find(&self, id: &str) -> AppResult<Option<Session>> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| unavailable("load session", &e))?;
        Ok(row.as_ref().map(Self::row_to_session))
    }

    async fn touch(&self, id: &str, at: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query("UPDATE sessions SET last_used_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| unavailable("touch session", &e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke(&self, id: &str, at: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET is_active = 0, revoked_at = COALESCE(revoked_at, $1) WHERE id = $2",
        )
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| unavailable("revoke session", &e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_for_user(&self, user_id: &str, at: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE sessions SET is_active = 0, revoked_at = $1 \
             WHERE user_id = $2 AND revoked_at IS NULL",
        )
        .bind(at)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| unavailable("revoke user sessions", &e))?;
        Ok(result.rows_affected())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result =
            sqlx::query("UPDATE sessions SET is_active = 0 WHERE valid_till <= $1 AND is_active = 1")
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(|e| unavailable("sweep expired sessions", &e))?;
        Ok(result.rows_affected())
    }

    async fn list_active_for_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_id = $1 AND is_active = 1 AND revoked_at IS NULL AND valid_till > $2 \
             ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| unavailable("list sessions", &e))?;
        Ok(rows.iter().map(Self::row_to_session).collect())
    }
}
