//! Postgres-backed request store.
//!
//! The primary key on `id` serializes concurrent claims: the losing
//! `INSERT ... ON CONFLICT` returns no row and is reported as
//! `RequestExists`. Records past `expires_at` are invisible to reads and
//! are taken over in place by the next claim.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::RequestStore;
use crate::error::{StoreError, StoreResult};
use crate::model::{Request, RequestState, Status};

/// Store handle. Owns the connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    /// Record lifetime in milliseconds, added to the server clock.
    expiry_ms: i64,
}

impl PgStore {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str, expiry: Duration) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Self::from_pool(pool, expiry)
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, expiry: Duration) -> StoreResult<Self> {
        let expiry_ms = i64::try_from(expiry.as_millis())
            .map_err(|e| StoreError::Backend(format!("invalid expiry {expiry:?}: {e}")))?;
        Ok(Self { pool, expiry_ms })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check — run a SELECT 1.
    pub async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Delete expired records. Returns the number removed.
    pub async fn purge_expired(&self) -> StoreResult<u64> {
        let rows = sqlx::query("DELETE FROM idempotent_requests WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows)
    }

    async fn create(&self, id: &str) -> StoreResult<()> {
        // All timestamps come from the server clock so every process agrees
        // on expiry. An expired row is reset in place; a live one makes this
        // a no-op and RETURNING yields nothing.
        let claimed: Option<(String,)> = sqlx::query_as(
            "INSERT INTO idempotent_requests (id, status, result, error, created_at, updated_at, expires_at)
             VALUES ($1, 'STARTED', NULL, NULL, now(), now(), now() + $2::bigint * interval '1 millisecond')
             ON CONFLICT (id) DO UPDATE
                SET status = 'STARTED', result = NULL, error = NULL,
                    created_at = EXCLUDED.created_at,
                    updated_at = EXCLUDED.updated_at,
                    expires_at = EXCLUDED.expires_at
                WHERE idempotent_requests.expires_at <= now()
             RETURNING id",
        )
        .bind(id)
        .bind(self.expiry_ms)
        .fetch_optional(&self.pool)
        .await?;

        match claimed {
            Some(_) => Ok(()),
            None => Err(StoreError::RequestExists(id.to_string())),
        }
    }

    async fn finish(&self, id: &str, state: RequestState) -> StoreResult<()> {
        let to = state.status();
        let (result, error) = match state {
            RequestState::Done { result } => (Some(result), None),
            RequestState::Failed { error } => (None, Some(error)),
            RequestState::Started => {
                return Err(StoreError::InvalidTransition {
                    id: id.to_string(),
                    to,
                });
            }
        };

        let rows_affected = sqlx::query(
            "UPDATE idempotent_requests SET status = $1, result = $2, error = $3, updated_at = now()
             WHERE id = $4 AND status = 'STARTED' AND expires_at > now()",
        )
        .bind(to.to_string())
        .bind(result)
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                to,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RequestStore for PgStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Request>> {
        let row: Option<RequestRow> = sqlx::query_as(
            "SELECT id, status, result, error, created_at, updated_at
             FROM idempotent_requests WHERE id = $1 AND expires_at > now()",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RequestRow::try_into_request).transpose()
    }

    async fn set(&self, id: &str, params: RequestState) -> StoreResult<()> {
        match params.status() {
            Status::Started => self.create(id).await,
            Status::Done | Status::Failed => self.finish(id, params).await,
        }
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct RequestRow {
    id: String,
    status: String,
    result: Option<serde_json::Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RequestRow {
    fn try_into_request(self) -> StoreResult<Request> {
        // Status alone decides completion; a SQL NULL result is a JSON null.
        let state = match self.status.parse::<Status>()? {
            Status::Started => RequestState::Started,
            Status::Done => RequestState::Done {
                result: self.result.unwrap_or(serde_json::Value::Null),
            },
            Status::Failed => RequestState::Failed {
                error: self.error.unwrap_or_default(),
            },
        };

        Ok(Request {
            id: self.id,
            state,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
