//! PostgreSQL storage for Geo Prize
//!
//! Persistent audit trail and distribution records for server deployments.
//! Connects with DATABASE_URL.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::types::Json;
use tokio_postgres::NoTls;
use tracing::info;

use crate::audit::AuditEntry;
use crate::model::{CompetitionKey, PayoutInstruction};
use crate::storage::{
    decision_str, parse_contract, parse_decision, parse_reason, AuditStore, DistributionState,
    DistributionStore, SetOutcome, StorageError,
};

/// Database pool configuration
const DB_POOL_MAX_SIZE: usize = 20;
const DB_QUERY_TIMEOUT_SECS: u64 = 30;

impl From<tokio_postgres::Error> for StorageError {
    fn from(e: tokio_postgres::Error) -> Self {
        StorageError::Unavailable(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for StorageError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        StorageError::Unavailable(e.to_string())
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pool: Pool,
}

impl PgStorage {
    /// Create storage from DATABASE_URL
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let mut config = Config::new();
        config.url = Some(database_url.to_string());
        // Applied by the server to every pooled session
        config.options = Some(format!("-c statement_timeout={}s", DB_QUERY_TIMEOUT_SECS));

        config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        config.pool = Some(PoolConfig {
            max_size: DB_POOL_MAX_SIZE,
            timeouts: deadpool_postgres::Timeouts {
                wait: Some(Duration::from_secs(DB_QUERY_TIMEOUT_SECS)),
                create: Some(Duration::from_secs(10)),
                recycle: Some(Duration::from_secs(30)),
            },
            ..Default::default()
        });

        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        // Test connection
        let client = pool.get().await?;
        client.simple_query("SELECT 1").await?;
        drop(client);

        info!(
            "Connected to PostgreSQL (pool_size: {}, query_timeout: {}s)",
            DB_POOL_MAX_SIZE, DB_QUERY_TIMEOUT_SECS
        );

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run embedded migrations
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let client = self.pool.get().await?;

        let exists: bool = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_name = 'schema_migrations')",
                &[],
            )
            .await?
            .get(0);

        if !exists {
            let migration_sql = include_str!("../migrations/001_schema.sql");
            client.batch_execute(migration_sql).await?;
            info!("Applied migration 001_schema");
        }

        Ok(())
    }
}

#[async_trait]
impl AuditStore for PgStorage {
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StorageError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO audit_log
                    (id, actor, action, contract, target, payload, decision, reason, recorded_at, client)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &entry.id.to_string(),
                    &entry.actor,
                    &entry.action,
                    &entry.contract.to_string(),
                    &entry.target,
                    &entry.payload,
                    &decision_str(entry.decision),
                    &entry.reason.as_str(),
                    &entry.recorded_at,
                    &entry.client,
                ],
            )
            .await?;
        Ok(())
    }

    async fn audit_entries(&self, limit: usize) -> Result<Vec<AuditEntry>, StorageError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, actor, action, contract, target, payload, decision, reason, recorded_at, client
                 FROM audit_log ORDER BY seq DESC LIMIT $1",
                &[&(limit as i64)],
            )
            .await?;

        rows.iter()
            .map(|r| {
                let id: String = r.get(0);
                let contract: String = r.get(3);
                let decision: String = r.get(6);
                let reason: String = r.get(7);
                let recorded_at: DateTime<Utc> = r.get(8);
                Ok(AuditEntry {
                    id: id
                        .parse()
                        .map_err(|e| StorageError::Corrupt(format!("audit id: {}", e)))?,
                    actor: r.get(1),
                    action: r.get(2),
                    contract: parse_contract(&contract)?,
                    target: r.get(4),
                    payload: r.get(5),
                    decision: parse_decision(&decision)?,
                    reason: parse_reason(&reason)?,
                    recorded_at,
                    client: r.get(9),
                })
            })
            .collect()
    }
}

#[async_trait]
impl DistributionStore for PgStorage {
    async fn distribution_state(
        &self,
        competition: &CompetitionKey,
    ) -> Result<DistributionState, StorageError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT instructions FROM distributions WHERE contract = $1 AND competition_id = $2",
                &[&competition.contract.to_string(), &competition.id],
            )
            .await?;

        match row {
            Some(r) => {
                let Json(instructions): Json<Vec<PayoutInstruction>> = r.try_get(0)?;
                Ok(DistributionState::Distributed(instructions))
            }
            None => Ok(DistributionState::NotDistributed),
        }
    }

    async fn set_distributed(
        &self,
        competition: &CompetitionKey,
        instructions: &[PayoutInstruction],
    ) -> Result<SetOutcome, StorageError> {
        let client = self.pool.get().await?;
        let contract = competition.contract.to_string();

        // Single conditional write; the primary key closes the check-then-act race.
        let inserted = client
            .execute(
                "INSERT INTO distributions (contract, competition_id, instructions)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (contract, competition_id) DO NOTHING",
                &[&contract, &competition.id, &Json(instructions)],
            )
            .await?;

        if inserted > 0 {
            return Ok(SetOutcome::Inserted);
        }

        let row = client
            .query_one(
                "SELECT instructions FROM distributions WHERE contract = $1 AND competition_id = $2",
                &[&contract, &competition.id],
            )
            .await?;
        let Json(existing): Json<Vec<PayoutInstruction>> = row.try_get(0)?;
        Ok(SetOutcome::AlreadyDistributed(existing))
    }
}
