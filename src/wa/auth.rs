//! Credential Store
//!
//! Durable persistence of the opaque session credential blob, decoupled
//! from in-memory connection state. Backed by SQLite via sqlx.
//!
//! Each top-level field of the blob is one row, so the protocol library's
//! incremental `creds-update` deltas map to per-field upserts (idempotent,
//! at-least-once safe) and `clear_auth_state` is a single atomic DELETE.
//! A partial clear that left orphaned fields could resurrect a dead
//! session on the next connect.

use super::traits::AuthBlob;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tracing::debug;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persists the authentication blob for one session identity.
///
/// The underlying pool is opened lazily on first use and reused for the
/// lifetime of the store; repeated loads never re-open the database.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    session: String,
    pool: OnceCell<SqlitePool>,
}

impl CredentialStore {
    /// Create a store for the given database path and session name.
    ///
    /// The database file and its parent directory are created on first
    /// access, not here.
    pub fn new(path: impl AsRef<Path>, session: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            session: session.into(),
            pool: OnceCell::new(),
        }
    }

    /// Session identity this store is keyed by.
    pub fn session(&self) -> &str {
        &self.session
    }

    async fn pool(&self) -> Result<&SqlitePool, StoreError> {
        self.pool
            .get_or_try_init(|| async {
                if let Some(parent) = self.path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }

                let options = SqliteConnectOptions::new()
                    .filename(&self.path)
                    .create_if_missing(true);
                let pool = SqlitePoolOptions::new()
                    .max_connections(1)
                    .connect_with(options)
                    .await?;

                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS auth_state (
                         session TEXT NOT NULL,
                         field   TEXT NOT NULL,
                         value   TEXT NOT NULL,
                         PRIMARY KEY (session, field)
                     )",
                )
                .execute(&pool)
                .await?;

                debug!(path = %self.path.display(), "credential store opened");
                Ok(pool)
            })
            .await
    }

    /// Load the persisted credential blob.
    ///
    /// Returns an empty bootstrap blob when nothing is stored yet, which
    /// makes the next session open start a fresh pairing.
    pub async fn load_auth_state(&self) -> Result<AuthBlob, StoreError> {
        let pool = self.pool().await?;

        let rows = sqlx::query("SELECT field, value FROM auth_state WHERE session = ?1")
            .bind(&self.session)
            .fetch_all(pool)
            .await?;

        let mut blob = AuthBlob::new();
        for row in rows {
            let field: String = row.get("field");
            let value: String = row.get("value");
            blob.insert(field, serde_json::from_str(&value)?);
        }
        Ok(blob)
    }

    /// Merge a partial credential update into the persisted blob.
    ///
    /// Upserts field by field; replaying an identical delta is a no-op,
    /// so at-least-once delivery from the session is safe.
    pub async fn save_partial(&self, delta: &AuthBlob) -> Result<(), StoreError> {
        let pool = self.pool().await?;

        for (field, value) in delta {
            let encoded = serde_json::to_string(value)?;
            sqlx::query(
                "INSERT INTO auth_state (session, field, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT (session, field) DO UPDATE SET value = excluded.value",
            )
            .bind(&self.session)
            .bind(field)
            .bind(encoded)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    /// Delete all persisted credential material for this session identity.
    ///
    /// Single statement, so the clear is atomic: either every field is
    /// gone or the error is reported and nothing changed.
    pub async fn clear_auth_state(&self) -> Result<(), StoreError> {
        let pool = self.pool().await?;

        sqlx::query("DELETE FROM auth_state WHERE session = ?1")
            .bind(&self.session)
            .execute(pool)
            .await?;

        debug!(session = %self.session, "credential state cleared");
        Ok(())
    }
}
