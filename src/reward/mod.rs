//! Reward Attempt Validator
//!
//! Scores a single reward-granting attempt ("watched N seconds with attention
//! score X") for plausibility. Deterministic, rule-based, auditable: the score
//! starts at 100 and each tripped rule subtracts a fixed amount. Attention and
//! watch-time inputs are client-supplied and uncorroborated; that limitation
//! is inherited from the product, not papered over here.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::abuse::{AbuseLog, AbuseLogEntry, AbuseSeverity, AbuseType};
use crate::error::EngineError;
use crate::rate_limit::{ActionKind, RateLimitPolicy};
use crate::store::TrustStore;

/// Score below which an attempt is blocked and logged.
pub const BLOCK_THRESHOLD: u32 = 40;

/// Score at or above which an attempt is fully valid.
pub const VALID_THRESHOLD: u32 = 60;

const CLAIM_RATE_DEDUCTION: u32 = 50;
const LOW_ATTENTION_DEDUCTION: u32 = 30;
const ATTENTION_MANIPULATION_DEDUCTION: u32 = 40;
const SHORT_WATCH_DEDUCTION: u32 = 20;
const IDLE_WATCH_DEDUCTION: u32 = 10;

/// Reasons an attempt lost points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptFlag {
    /// Reward-claim ceiling exceeded in the trailing window
    ClaimRateExceeded,
    /// Attention score implausibly low for a deliberate watch
    LowAttention,
    /// Perfect attention claimed without the watch time to back it
    AttentionManipulationSuspected,
    /// Watched well under the required duration
    InsufficientWatchTime,
    /// Watched far over the required duration (idle tab)
    ExcessiveWatchTime,
}

impl AttemptFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptFlag::ClaimRateExceeded => "claim_rate_exceeded",
            AttemptFlag::LowAttention => "low_attention",
            AttemptFlag::AttentionManipulationSuspected => "attention_manipulation_suspected",
            AttemptFlag::InsufficientWatchTime => "insufficient_watch_time",
            AttemptFlag::ExcessiveWatchTime => "excessive_watch_time",
        }
    }
}

/// Assessment of one reward attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptAssessment {
    pub valid: bool,
    /// Plausibility score in [0, 100]
    pub score: u32,
    pub flags: Vec<AttemptFlag>,
    pub should_block: bool,
}

pub struct AttemptValidator {
    store: Arc<dyn TrustStore>,
    abuse_log: AbuseLog,
    claim_policy: RateLimitPolicy,
}

impl AttemptValidator {
    pub fn new(
        store: Arc<dyn TrustStore>,
        abuse_log: AbuseLog,
        claim_policy: RateLimitPolicy,
    ) -> Self {
        Self {
            store,
            abuse_log,
            claim_policy,
        }
    }

    /// Validate one attempt. The claim itself is admitted to the reward-claim
    /// window as part of the check, so bursts of attempts trip the ceiling.
    pub async fn validate(
        &self,
        user_id: &str,
        attention_score: f64,
        watch_duration_seconds: f64,
        required_duration_seconds: f64,
        device_hash: Option<&str>,
    ) -> Result<AttemptAssessment, EngineError> {
        if user_id.is_empty() {
            return Err(EngineError::InvalidInput("user_id is required".to_string()));
        }
        if !(0.0..=100.0).contains(&attention_score) {
            return Err(EngineError::InvalidInput(format!(
                "attention_score out of range: {attention_score}"
            )));
        }
        if !watch_duration_seconds.is_finite() || watch_duration_seconds < 0.0 {
            return Err(EngineError::InvalidInput(
                "watch_duration_seconds must be non-negative".to_string(),
            ));
        }
        if !required_duration_seconds.is_finite() || required_duration_seconds <= 0.0 {
            return Err(EngineError::InvalidInput(
                "required_duration_seconds must be positive".to_string(),
            ));
        }

        let mut score: u32 = 100;
        let mut flags = Vec::new();
        let mut should_block = false;

        // Claim-rate ceiling, reusing the rate limiter's windowing.
        let admission = self
            .store
            .admit_action(
                user_id,
                ActionKind::RewardClaim,
                None,
                self.claim_policy.max_count,
                self.claim_policy.window(),
            )
            .await?;
        if !admission.admitted {
            score = score.saturating_sub(CLAIM_RATE_DEDUCTION);
            flags.push(AttemptFlag::ClaimRateExceeded);
            should_block = true;
        }

        if attention_score < 30.0 {
            score = score.saturating_sub(LOW_ATTENTION_DEDUCTION);
            flags.push(AttemptFlag::LowAttention);
        }

        // Automation signature: perfect attention without the watch time to
        // back it. Blocks outright in addition to the deduction.
        if attention_score > 99.0 && watch_duration_seconds < 0.9 * required_duration_seconds {
            score = score.saturating_sub(ATTENTION_MANIPULATION_DEDUCTION);
            flags.push(AttemptFlag::AttentionManipulationSuspected);
            should_block = true;

            let mut entry = AbuseLogEntry::new(
                user_id,
                AbuseType::AttentionFraud,
                AbuseSeverity::Medium,
                serde_json::json!({
                    "attention_score": attention_score,
                    "watch_duration_seconds": watch_duration_seconds,
                    "required_duration_seconds": required_duration_seconds,
                }),
            );
            if let Some(hash) = device_hash {
                entry = entry.with_device(hash);
            }
            self.abuse_log.record(entry).await?;
        }

        if watch_duration_seconds < 0.7 * required_duration_seconds {
            score = score.saturating_sub(SHORT_WATCH_DEDUCTION);
            flags.push(AttemptFlag::InsufficientWatchTime);
        }

        if watch_duration_seconds > 1.5 * required_duration_seconds {
            score = score.saturating_sub(IDLE_WATCH_DEDUCTION);
            flags.push(AttemptFlag::ExcessiveWatchTime);
        }

        if score < BLOCK_THRESHOLD {
            should_block = true;
            let mut entry = AbuseLogEntry::new(
                user_id,
                AbuseType::SuspiciousPattern,
                AbuseSeverity::High,
                serde_json::json!({
                    "score": score,
                    "flags": flags.iter().map(|f| f.as_str()).collect::<Vec<_>>(),
                    "attention_score": attention_score,
                    "watch_duration_seconds": watch_duration_seconds,
                    "required_duration_seconds": required_duration_seconds,
                }),
            );
            if let Some(hash) = device_hash {
                entry = entry.with_device(hash);
            }
            self.abuse_log.record(entry).await?;
        }

        Ok(AttemptAssessment {
            valid: score >= VALID_THRESHOLD,
            score,
            flags,
            should_block,
        })
    }
}
