//! Rate Limiter & Duplicate-Action Detector
//!
//! Per-user, per-action sliding windows plus duplicate-content detection,
//! derived from the action log rather than an in-process counter so the check
//! is restart-safe and horizontally scalable. The count, duplicate lookup, and
//! admission insert happen in one atomic store operation; two concurrent
//! requests can never both pass on a stale count.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::abuse::{AbuseLog, AbuseLogEntry, AbuseSeverity, AbuseType};
use crate::error::EngineError;
use crate::store::TrustStore;

/// Device trust points deducted when a check denies an action.
pub const DENIAL_DEVICE_PENALTY: i32 = 5;

/// Kinds of rate-limited user actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Comment,
    Like,
    Follow,
    Tip,
    Report,
    Post,
    Message,
    /// Reward-granting claims; ceiling reused by the attempt validator
    RewardClaim,
    /// Bookkeeping only: counted by the session enforcer, never denied here
    FailedLogin,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Comment => "comment",
            ActionKind::Like => "like",
            ActionKind::Follow => "follow",
            ActionKind::Tip => "tip",
            ActionKind::Report => "report",
            ActionKind::Post => "post",
            ActionKind::Message => "message",
            ActionKind::RewardClaim => "reward_claim",
            ActionKind::FailedLogin => "failed_login",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "comment" => Some(ActionKind::Comment),
            "like" => Some(ActionKind::Like),
            "follow" => Some(ActionKind::Follow),
            "tip" => Some(ActionKind::Tip),
            "report" => Some(ActionKind::Report),
            "post" => Some(ActionKind::Post),
            "message" => Some(ActionKind::Message),
            "reward_claim" => Some(ActionKind::RewardClaim),
            "failed_login" => Some(ActionKind::FailedLogin),
            _ => None,
        }
    }
}

/// Ceiling for one action kind. Values are policy, adjustable via config.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub max_count: u32,
    pub window_minutes: u32,
}

impl RateLimitPolicy {
    pub fn new(max_count: u32, window_minutes: u32) -> Self {
        Self {
            max_count,
            window_minutes,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::minutes(self.window_minutes as i64)
    }
}

/// Per-action policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub policies: HashMap<ActionKind, RateLimitPolicy>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut policies = HashMap::new();
        policies.insert(ActionKind::Comment, RateLimitPolicy::new(5, 1));
        policies.insert(ActionKind::Like, RateLimitPolicy::new(50, 1));
        policies.insert(ActionKind::Follow, RateLimitPolicy::new(30, 5));
        policies.insert(ActionKind::Tip, RateLimitPolicy::new(20, 5));
        policies.insert(ActionKind::Report, RateLimitPolicy::new(5, 10));
        policies.insert(ActionKind::Post, RateLimitPolicy::new(10, 5));
        policies.insert(ActionKind::Message, RateLimitPolicy::new(20, 1));
        policies.insert(ActionKind::RewardClaim, RateLimitPolicy::new(30, 60));
        // Generous ceiling; failed logins are recorded, never denied here
        policies.insert(ActionKind::FailedLogin, RateLimitPolicy::new(1000, 60));
        Self { policies }
    }
}

impl RateLimitConfig {
    pub fn policy(&self, action: ActionKind) -> RateLimitPolicy {
        self.policies
            .get(&action)
            .copied()
            .unwrap_or(RateLimitPolicy::new(30, 5))
    }

    pub fn set_policy(&mut self, action: ActionKind, policy: RateLimitPolicy) {
        self.policies.insert(action, policy);
    }
}

/// Decision returned to the caller gating an action.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub is_rate_limited: bool,
    pub is_duplicate: bool,
    /// Actions already counted in the window
    pub recent_count: u64,
    /// Seconds until the oldest windowed action ages out, when limited
    pub retry_after_seconds: Option<u64>,
}

pub struct RateLimiter {
    store: Arc<dyn TrustStore>,
    abuse_log: AbuseLog,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn TrustStore>, abuse_log: AbuseLog, config: RateLimitConfig) -> Self {
        Self {
            store,
            abuse_log,
            config,
        }
    }

    /// Check and (if allowed) admit one action. A denial is logged to the
    /// abuse store and deducts device trust; the caller must not perform the
    /// guarded action when `allowed` is false.
    pub async fn check(
        &self,
        user_id: &str,
        action: ActionKind,
        content: Option<&str>,
        device_hash: Option<&str>,
    ) -> Result<RateLimitDecision, EngineError> {
        if user_id.is_empty() {
            return Err(EngineError::InvalidInput("user_id is required".to_string()));
        }

        let policy = self.config.policy(action);
        let content_hash = content.map(hash_content);

        let admission = self
            .store
            .admit_action(
                user_id,
                action,
                content_hash.as_deref(),
                policy.max_count,
                policy.window(),
            )
            .await?;

        let retry_after_seconds = if admission.rate_limited {
            admission.oldest_in_window.map(|oldest| {
                let resets_at = oldest + policy.window();
                (resets_at - chrono::Utc::now()).num_seconds().max(0) as u64
            })
        } else {
            None
        };

        if !admission.admitted {
            let (abuse_type, severity) = if admission.rate_limited {
                (AbuseType::RateLimitExceeded, AbuseSeverity::Medium)
            } else {
                (AbuseType::DuplicateContent, AbuseSeverity::Low)
            };

            let mut entry = AbuseLogEntry::new(
                user_id,
                abuse_type,
                severity,
                serde_json::json!({
                    "action": action.as_str(),
                    "recent_count": admission.recent_count,
                    "max_count": policy.max_count,
                    "window_minutes": policy.window_minutes,
                    "duplicate_content": admission.duplicate_content,
                }),
            );
            if let Some(hash) = device_hash {
                entry = entry.with_device(hash);
            }
            // Fail closed: the denial must be on record before we answer.
            self.abuse_log.record(entry).await?;

            if let Some(hash) = device_hash {
                if let Err(e) = self
                    .store
                    .adjust_device_trust(hash, -DENIAL_DEVICE_PENALTY)
                    .await
                {
                    warn!(device = %hash, error = %e, "device trust penalty not applied");
                }
            }
        }

        Ok(RateLimitDecision {
            allowed: admission.admitted,
            is_rate_limited: admission.rate_limited,
            is_duplicate: admission.duplicate_content,
            recent_count: admission.recent_count,
            retry_after_seconds,
        })
    }
}

/// Digest of a content payload for duplicate detection. The raw text never
/// reaches the action log.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
