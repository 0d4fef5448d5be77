//! Append-only audit trail for privileged requests

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::AdminMessage;
use crate::model::Address;
use crate::storage::AuditStore;

pub const UNKNOWN_ACTOR: &str = "unknown";

/// Longest an audit write may hold up the request it describes.
pub const DEFAULT_AUDIT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDecision {
    Allowed,
    Denied,
}

/// Why a privileged request was allowed or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Ok,
    RateLimited,
    InvalidSignature,
    ExpiredSignature,
    NotOwner,
    ChainUnavailable,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Ok => "ok",
            ReasonCode::RateLimited => "rate_limited",
            ReasonCode::InvalidSignature => "invalid_signature",
            ReasonCode::ExpiredSignature => "expired_signature",
            ReasonCode::NotOwner => "not_owner",
            ReasonCode::ChainUnavailable => "chain_unavailable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "ok" => ReasonCode::Ok,
            "rate_limited" => ReasonCode::RateLimited,
            "invalid_signature" => ReasonCode::InvalidSignature,
            "expired_signature" => ReasonCode::ExpiredSignature,
            "not_owner" => ReasonCode::NotOwner,
            "chain_unavailable" => ReasonCode::ChainUnavailable,
            _ => return None,
        })
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor: String,
    pub action: String,
    pub contract: Address,
    pub target: String,
    pub payload: String,
    pub decision: AuditDecision,
    pub reason: ReasonCode,
    pub recorded_at: DateTime<Utc>,
    pub client: String,
}

impl AuditEntry {
    /// Entry for a request that signed `message`.
    pub fn new(
        actor: Option<&Address>,
        message: &AdminMessage,
        reason: ReasonCode,
        recorded_at: DateTime<Utc>,
        client: impl Into<String>,
    ) -> Self {
        let decision = if reason == ReasonCode::Ok {
            AuditDecision::Allowed
        } else {
            AuditDecision::Denied
        };
        Self {
            id: Uuid::new_v4(),
            actor: actor
                .map(|a| a.to_string())
                .unwrap_or_else(|| UNKNOWN_ACTOR.to_string()),
            action: message.route.clone(),
            contract: message.contract,
            target: message.target.clone(),
            payload: message.payload.clone(),
            decision,
            reason,
            recorded_at,
            client: client.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAck {
    Recorded,
    Failed,
}

/// Writes audit entries to the backing store.
///
/// A failed or stalled write is logged and acknowledged as `Failed`; it never
/// turns an authorized request into a denied one.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn AuditStore>,
    timeout: Duration,
}

impl AuditLog {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            timeout: DEFAULT_AUDIT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn record(&self, entry: AuditEntry) -> AuditAck {
        match entry.decision {
            AuditDecision::Allowed => info!(
                actor = %entry.actor,
                action = %entry.action,
                contract = %entry.contract,
                target = %entry.target,
                reason = %entry.reason,
                client = %entry.client,
                "admin request allowed"
            ),
            AuditDecision::Denied => warn!(
                actor = %entry.actor,
                action = %entry.action,
                contract = %entry.contract,
                target = %entry.target,
                reason = %entry.reason,
                client = %entry.client,
                "admin request denied"
            ),
        }

        match tokio::time::timeout(self.timeout, self.store.append_audit(&entry)).await {
            Ok(Ok(())) => AuditAck::Recorded,
            Ok(Err(e)) => {
                error!("Failed to persist audit entry {}: {}", entry.id, e);
                AuditAck::Failed
            }
            Err(_) => {
                error!(
                    "Audit entry {} not persisted within {:?}",
                    entry.id, self.timeout
                );
                AuditAck::Failed
            }
        }
    }
}
