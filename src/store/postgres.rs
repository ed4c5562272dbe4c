//! PostgreSQL backend
//!
//! Entries live in a single `kv_entries` table keyed by a `TEXT[]` column, so
//! Postgres array ordering gives the same segment-wise order as [`Key`].
//! Versionstamps come from a sequence. Atomic commits run in a serializable
//! transaction; a serialization failure is reported as a failed check.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Row, Transaction};

use super::{
    AtomicOperation, CommitOutcome, Key, KvBackend, KvEntry, KvStream, Mutation, StoreError,
    StoreResult, Versionstamp,
};
use crate::config::StoreConfig;

const SERIALIZATION_FAILURE: &str = "40001";

#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, then bring the schema up to date.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| StoreError::Backend("store.url is required for the postgres backend".to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Key-value schema is up to date");

        Ok(Self { pool })
    }

    async fn try_commit(&self, operation: AtomicOperation) -> Result<CommitOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        for check in &operation.checks {
            let current: Option<i64> =
                sqlx::query_scalar("SELECT versionstamp FROM kv_entries WHERE key = $1 FOR UPDATE")
                    .bind(check.key.segments())
                    .fetch_optional(&mut *tx)
                    .await?;
            if current.map(to_versionstamp) != check.versionstamp {
                tx.rollback().await?;
                return Ok(CommitOutcome::CheckFailed);
            }
        }

        let versionstamp: i64 = sqlx::query_scalar("SELECT nextval('kv_versionstamp_seq')")
            .fetch_one(&mut *tx)
            .await?;

        for mutation in operation.mutations {
            apply(&mut tx, mutation, versionstamp).await?;
        }

        tx.commit().await?;
        Ok(CommitOutcome::Committed(to_versionstamp(versionstamp)))
    }
}

fn to_versionstamp(raw: i64) -> Versionstamp {
    Versionstamp(raw as u64)
}

fn is_serialization_failure(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|e| e.code())
        .map(|code| code == SERIALIZATION_FAILURE)
        .unwrap_or(false)
}

async fn apply(
    tx: &mut Transaction<'_, Postgres>,
    mutation: Mutation,
    versionstamp: i64,
) -> Result<(), sqlx::Error> {
    match mutation {
        Mutation::Set { key, value } => {
            sqlx::query(
                r#"
                INSERT INTO kv_entries (key, value, versionstamp)
                VALUES ($1, $2, $3)
                ON CONFLICT (key) DO UPDATE
                SET value = EXCLUDED.value, versionstamp = EXCLUDED.versionstamp
                "#,
            )
            .bind(key.segments())
            .bind(value)
            .bind(versionstamp)
            .execute(&mut **tx)
            .await?;
        }
        Mutation::Delete { key } => {
            sqlx::query("DELETE FROM kv_entries WHERE key = $1")
                .bind(key.segments())
                .execute(&mut **tx)
                .await?;
        }
    }
    Ok(())
}

#[async_trait]
impl KvBackend for PostgresBackend {
    async fn get(&self, key: &Key) -> StoreResult<Option<KvEntry>> {
        let row = sqlx::query("SELECT value, versionstamp FROM kv_entries WHERE key = $1")
            .bind(key.segments())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| KvEntry {
            key: key.clone(),
            value: row.get::<Value, _>("value"),
            versionstamp: to_versionstamp(row.get("versionstamp")),
        }))
    }

    async fn set(&self, key: &Key, value: Value) -> StoreResult<Versionstamp> {
        let versionstamp: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO kv_entries (key, value, versionstamp)
            VALUES ($1, $2, nextval('kv_versionstamp_seq'))
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value, versionstamp = EXCLUDED.versionstamp
            RETURNING versionstamp
            "#,
        )
        .bind(key.segments())
        .bind(value)
        .fetch_one(&self.pool)
        .await?;

        Ok(to_versionstamp(versionstamp))
    }

    async fn delete(&self, key: &Key) -> StoreResult<()> {
        sqlx::query("DELETE FROM kv_entries WHERE key = $1")
            .bind(key.segments())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &Key) -> StoreResult<KvStream> {
        let depth = i32::try_from(prefix.len())
            .map_err(|_| StoreError::Backend(format!("Prefix too deep: {}", prefix)))?;

        let rows = sqlx::query(
            r#"
            SELECT key, value, versionstamp
            FROM kv_entries
            WHERE key[1:$2] = $1
            ORDER BY key
            "#,
        )
        .bind(prefix.segments())
        .bind(depth)
        .fetch_all(&self.pool)
        .await?;

        let entries: Vec<StoreResult<KvEntry>> = rows
            .into_iter()
            .map(|row| {
                Ok(KvEntry {
                    key: Key::from(row.try_get::<Vec<String>, _>("key")?),
                    value: row.try_get("value")?,
                    versionstamp: to_versionstamp(row.try_get("versionstamp")?),
                })
            })
            .collect();

        Ok(Box::pin(tokio_stream::iter(entries)))
    }

    async fn commit(&self, operation: AtomicOperation) -> StoreResult<CommitOutcome> {
        match self.try_commit(operation).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if is_serialization_failure(&e) => {
                tracing::debug!("Serialization failure during commit, reporting check failure");
                Ok(CommitOutcome::CheckFailed)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
