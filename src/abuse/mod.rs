//! Abuse Log Store
//!
//! Append-only record of abuse events. Every other component writes here and
//! several read back (trust aggregation, session escalation). Entries are
//! immutable once written; `resolved` may be set later by an external review
//! process. Each write is mirrored to `tracing` at a level derived from its
//! severity so operators see violations without querying the store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::store::{StoreError, TrustStore};

/// Categories of abuse the engine detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbuseType {
    /// Same device fingerprint seen under multiple accounts
    DuplicateDevice,
    /// Sliding-window action ceiling exceeded
    RateLimitExceeded,
    /// Identical content payload repeated within the window
    DuplicateContent,
    /// Perfect attention claimed without the watch time to back it
    AttentionFraud,
    /// Reward attempt scored below the blocking threshold
    SuspiciousPattern,
    /// Externally reported suspicious behavior on a device
    SuspiciousActivity,
    /// Administrative forced logout (activity record, pre-resolved)
    ForcedLogout,
}

impl AbuseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbuseType::DuplicateDevice => "duplicate_device",
            AbuseType::RateLimitExceeded => "rate_limit_exceeded",
            AbuseType::DuplicateContent => "duplicate_content",
            AbuseType::AttentionFraud => "attention_fraud",
            AbuseType::SuspiciousPattern => "suspicious_pattern",
            AbuseType::SuspiciousActivity => "suspicious_activity",
            AbuseType::ForcedLogout => "forced_logout",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "duplicate_device" => Some(AbuseType::DuplicateDevice),
            "rate_limit_exceeded" => Some(AbuseType::RateLimitExceeded),
            "duplicate_content" => Some(AbuseType::DuplicateContent),
            "attention_fraud" => Some(AbuseType::AttentionFraud),
            "suspicious_pattern" => Some(AbuseType::SuspiciousPattern),
            "suspicious_activity" => Some(AbuseType::SuspiciousActivity),
            "forced_logout" => Some(AbuseType::ForcedLogout),
            _ => None,
        }
    }
}

/// Severity of an abuse event, ordered low to critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbuseSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AbuseSeverity {
    /// Trust points deducted per unresolved entry of this severity.
    pub fn trust_penalty(&self) -> u32 {
        match self {
            AbuseSeverity::Low => 5,
            AbuseSeverity::Medium => 15,
            AbuseSeverity::High => 30,
            AbuseSeverity::Critical => 50,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AbuseSeverity::Low => "low",
            AbuseSeverity::Medium => "medium",
            AbuseSeverity::High => "high",
            AbuseSeverity::Critical => "critical",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(AbuseSeverity::Low),
            "medium" => Some(AbuseSeverity::Medium),
            "high" => Some(AbuseSeverity::High),
            "critical" => Some(AbuseSeverity::Critical),
            _ => None,
        }
    }
}

/// A single append-only abuse log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbuseLogEntry {
    pub id: String,
    pub user_id: String,
    pub abuse_type: AbuseType,
    pub severity: AbuseSeverity,
    /// Structured payload with enough detail to reconstruct the decision
    pub details: serde_json::Value,
    /// Fingerprint hash of the implicated device, when known
    pub device_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
}

impl AbuseLogEntry {
    pub fn new(
        user_id: &str,
        abuse_type: AbuseType,
        severity: AbuseSeverity,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: format!("abuse_{}", Uuid::new_v4()),
            user_id: user_id.to_string(),
            abuse_type,
            severity,
            details,
            device_fingerprint: None,
            created_at: Utc::now(),
            resolved: false,
        }
    }

    pub fn with_device(mut self, fingerprint_hash: &str) -> Self {
        self.device_fingerprint = Some(fingerprint_hash.to_string());
        self
    }

    /// Mark an entry resolved at creation. Used for administrative activity
    /// records (e.g. forced logout) that must not depress the trust score.
    pub fn pre_resolved(mut self) -> Self {
        self.resolved = true;
        self
    }
}

/// Filter for audit range queries over the log.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AbuseQuery {
    pub user_id: Option<String>,
    pub abuse_type: Option<AbuseType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// Write/read facade over the store's abuse log tables.
#[derive(Clone)]
pub struct AbuseLog {
    store: Arc<dyn TrustStore>,
}

impl AbuseLog {
    pub fn new(store: Arc<dyn TrustStore>) -> Self {
        Self { store }
    }

    /// Append an entry, mirroring it to tracing by severity.
    pub async fn record(&self, entry: AbuseLogEntry) -> Result<AbuseLogEntry, StoreError> {
        match entry.severity {
            AbuseSeverity::Low => tracing::info!(
                user_id = %entry.user_id,
                abuse_type = entry.abuse_type.as_str(),
                "abuse event recorded"
            ),
            AbuseSeverity::Medium => tracing::warn!(
                user_id = %entry.user_id,
                abuse_type = entry.abuse_type.as_str(),
                "abuse event recorded"
            ),
            AbuseSeverity::High | AbuseSeverity::Critical => tracing::error!(
                user_id = %entry.user_id,
                abuse_type = entry.abuse_type.as_str(),
                severity = entry.severity.as_str(),
                "abuse event recorded"
            ),
        }

        self.store.append_abuse(&entry).await?;
        Ok(entry)
    }

    /// Range query for external review tooling.
    pub async fn history(&self, query: &AbuseQuery) -> Result<Vec<AbuseLogEntry>, StoreError> {
        self.store.query_abuse(query).await
    }

    /// Count of entries of one type for a user within a trailing window.
    pub async fn recent_count(
        &self,
        user_id: &str,
        abuse_type: AbuseType,
        window: Duration,
    ) -> Result<u64, StoreError> {
        self.store
            .count_abuse(user_id, abuse_type, Utc::now() - window)
            .await
    }

    /// All unresolved entries for a user (trust aggregation input).
    pub async fn unresolved(&self, user_id: &str) -> Result<Vec<AbuseLogEntry>, StoreError> {
        self.store.unresolved_abuse(user_id).await
    }
}
