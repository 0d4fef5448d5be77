//! Local storage for audit entries and distribution records
//!
//! - `MemoryStore` for tests and ephemeral runs
//! - `SqliteStore` for single-node deployments

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::audit::{AuditDecision, AuditEntry, ReasonCode};
use crate::model::{Address, CompetitionKey, PayoutInstruction};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Corrupt(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributionState {
    NotDistributed,
    Distributed(Vec<PayoutInstruction>),
}

/// Result of a set-if-absent write of the distribution marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    Inserted,
    AlreadyDistributed(Vec<PayoutInstruction>),
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StorageError>;

    /// Most recent entries first.
    async fn audit_entries(&self, limit: usize) -> Result<Vec<AuditEntry>, StorageError>;
}

#[async_trait]
pub trait DistributionStore: Send + Sync {
    async fn distribution_state(
        &self,
        competition: &CompetitionKey,
    ) -> Result<DistributionState, StorageError>;

    /// Atomically record `instructions` unless the competition already has a record.
    async fn set_distributed(
        &self,
        competition: &CompetitionKey,
        instructions: &[PayoutInstruction],
    ) -> Result<SetOutcome, StorageError>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    audit: Mutex<Vec<AuditEntry>>,
    distributions: Mutex<HashMap<CompetitionKey, Vec<PayoutInstruction>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StorageError> {
        self.audit.lock().push(entry.clone());
        Ok(())
    }

    async fn audit_entries(&self, limit: usize) -> Result<Vec<AuditEntry>, StorageError> {
        Ok(self.audit.lock().iter().rev().take(limit).cloned().collect())
    }
}

#[async_trait]
impl DistributionStore for MemoryStore {
    async fn distribution_state(
        &self,
        competition: &CompetitionKey,
    ) -> Result<DistributionState, StorageError> {
        Ok(match self.distributions.lock().get(competition) {
            Some(instructions) => DistributionState::Distributed(instructions.clone()),
            None => DistributionState::NotDistributed,
        })
    }

    async fn set_distributed(
        &self,
        competition: &CompetitionKey,
        instructions: &[PayoutInstruction],
    ) -> Result<SetOutcome, StorageError> {
        let mut distributions = self.distributions.lock();
        if let Some(existing) = distributions.get(competition) {
            return Ok(SetOutcome::AlreadyDistributed(existing.clone()));
        }
        distributions.insert(competition.clone(), instructions.to_vec());
        Ok(SetOutcome::Inserted)
    }
}

// ============================================================================
// SQLITE STORE
// ============================================================================

const SQLITE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_log (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    actor TEXT NOT NULL,
    action TEXT NOT NULL,
    contract TEXT NOT NULL,
    target TEXT NOT NULL,
    payload TEXT NOT NULL,
    decision TEXT NOT NULL,
    reason TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    client TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS distributions (
    contract TEXT NOT NULL,
    competition_id TEXT NOT NULL,
    instructions TEXT NOT NULL,
    distributed_at TEXT NOT NULL,
    PRIMARY KEY (contract, competition_id)
);
"#;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.run_migrations()?;
        Ok(storage)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.run_migrations()?;
        Ok(storage)
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute_batch(SQLITE_SCHEMA)?;
        Ok(())
    }
}

pub(crate) fn decision_str(decision: AuditDecision) -> &'static str {
    match decision {
        AuditDecision::Allowed => "allowed",
        AuditDecision::Denied => "denied",
    }
}

pub(crate) fn parse_decision(s: &str) -> Result<AuditDecision, StorageError> {
    match s {
        "allowed" => Ok(AuditDecision::Allowed),
        "denied" => Ok(AuditDecision::Denied),
        other => Err(StorageError::Corrupt(format!("unknown decision: {}", other))),
    }
}

pub(crate) fn parse_reason(s: &str) -> Result<ReasonCode, StorageError> {
    ReasonCode::parse(s).ok_or_else(|| StorageError::Corrupt(format!("unknown reason: {}", s)))
}

pub(crate) fn parse_contract(s: &str) -> Result<Address, StorageError> {
    s.parse()
        .map_err(|e| StorageError::Corrupt(format!("audit contract: {}", e)))
}

#[async_trait]
impl AuditStore for SqliteStore {
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO audit_log
                (id, actor, action, contract, target, payload, decision, reason, recorded_at, client)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.id.to_string(),
                entry.actor,
                entry.action,
                entry.contract.to_string(),
                entry.target,
                entry.payload,
                decision_str(entry.decision),
                entry.reason.as_str(),
                entry.recorded_at.to_rfc3339(),
                entry.client,
            ],
        )?;
        Ok(())
    }

    async fn audit_entries(&self, limit: usize) -> Result<Vec<AuditEntry>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, actor, action, contract, target, payload, decision, reason, recorded_at, client
             FROM audit_log ORDER BY seq DESC LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let mut cols = Vec::with_capacity(10);
                for i in 0..10 {
                    cols.push(row.get::<_, String>(i)?);
                }
                Ok(cols)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|cols| {
                let [id, actor, action, contract, target, payload, decision, reason, recorded_at, client]: [String; 10] =
                    cols.try_into()
                        .map_err(|_| StorageError::Corrupt("audit row width".to_string()))?;
                Ok(AuditEntry {
                    id: id
                        .parse()
                        .map_err(|e| StorageError::Corrupt(format!("audit id: {}", e)))?,
                    actor,
                    action,
                    contract: parse_contract(&contract)?,
                    target,
                    payload,
                    decision: parse_decision(&decision)?,
                    reason: parse_reason(&reason)?,
                    recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
                        .map_err(|e| StorageError::Corrupt(e.to_string()))?
                        .with_timezone(&Utc),
                    client,
                })
            })
            .collect()
    }
}

#[async_trait]
impl DistributionStore for SqliteStore {
    async fn distribution_state(
        &self,
        competition: &CompetitionKey,
    ) -> Result<DistributionState, StorageError> {
        let conn = self.conn.lock();
        let stored: Option<String> = conn
            .query_row(
                "SELECT instructions FROM distributions WHERE contract = ?1 AND competition_id = ?2",
                params![competition.contract.to_string(), competition.id],
                |row| row.get(0),
            )
            .optional()?;

        match stored {
            Some(json) => Ok(DistributionState::Distributed(serde_json::from_str(&json)?)),
            None => Ok(DistributionState::NotDistributed),
        }
    }

    async fn set_distributed(
        &self,
        competition: &CompetitionKey,
        instructions: &[PayoutInstruction],
    ) -> Result<SetOutcome, StorageError> {
        let json = serde_json::to_string(instructions)?;
        let contract = competition.contract.to_string();
        let conn = self.conn.lock();

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO distributions (contract, competition_id, instructions, distributed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![contract, competition.id, json, Utc::now().to_rfc3339()],
        )?;

        if inserted > 0 {
            return Ok(SetOutcome::Inserted);
        }

        let existing: String = conn.query_row(
            "SELECT instructions FROM distributions WHERE contract = ?1 AND competition_id = ?2",
            params![contract, competition.id],
            |row| row.get(0),
        )?;
        Ok(SetOutcome::AlreadyDistributed(serde_json::from_str(
            &existing,
        )?))
    }
}
