//! Trust Score Aggregator
//!
//! Single read path reducing a user's unresolved abuse history to a 0-100
//! trust score and the derived reward multiplier / throttle decision. The
//! score is never stored authoritatively; every read recomputes it from the
//! log, which eliminates update-ordering bugs between the call sites that
//! used to write a denormalized score field.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::store::{StoreError, TrustStore};

/// Trust score below which rewards are throttled.
pub const THROTTLE_THRESHOLD: u32 = 50;

/// Persisted per-user profile. The streak fields are the only mutable state
/// on this entity and are written exclusively by the check-in verifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTrustProfile {
    pub user_id: String,
    pub streak_days: u32,
    pub longest_streak: u32,
    pub last_active_date: Option<NaiveDate>,
}

impl UserTrustProfile {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            streak_days: 0,
            longest_streak: 0,
            last_active_date: None,
        }
    }
}

/// Snapshot returned to reward-calculation call sites.
#[derive(Debug, Clone, Serialize)]
pub struct TrustSnapshot {
    pub user_id: String,
    pub trust_score: u32,
    pub reward_multiplier: f64,
    pub should_throttle: bool,
}

pub struct TrustAggregator {
    store: Arc<dyn TrustStore>,
}

impl TrustAggregator {
    pub fn new(store: Arc<dyn TrustStore>) -> Self {
        Self { store }
    }

    /// Derive the user's trust score from unresolved abuse entries: start at
    /// 100, subtract the severity penalty per entry, floor at 0.
    pub async fn trust_score(&self, user_id: &str) -> Result<u32, StoreError> {
        let entries = self.store.unresolved_abuse(user_id).await?;
        let penalty: u32 = entries.iter().map(|e| e.severity.trust_penalty()).sum();
        Ok(100u32.saturating_sub(penalty))
    }

    pub async fn snapshot(&self, user_id: &str) -> Result<TrustSnapshot, StoreError> {
        let trust_score = self.trust_score(user_id).await?;
        Ok(TrustSnapshot {
            user_id: user_id.to_string(),
            trust_score,
            reward_multiplier: reward_multiplier(trust_score),
            should_throttle: should_throttle(trust_score),
        })
    }
}

/// Final multiplier applied to earned amounts. Low-trust accounts are
/// economically throttled, not outright blocked.
pub fn reward_multiplier(trust_score: u32) -> f64 {
    match trust_score {
        90..=100 => 1.0,
        70..=89 => 0.9,
        50..=69 => 0.7,
        _ => 0.5,
    }
}

pub fn should_throttle(trust_score: u32) -> bool {
    trust_score < THROTTLE_THRESHOLD
}
