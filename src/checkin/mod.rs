//! Geofenced Check-In Verifier
//!
//! Validates physical presence via great-circle distance, prevents
//! double-claiming within a trailing 24-hour window, and computes
//! consecutive-day streak bonuses. Both verified and failed (out-of-range)
//! attempts are persisted; failed attempts keep an audit trail of repeated
//! tries at a location.

pub mod geo;
pub mod streak;

mod verifier;

pub use verifier::{CheckinOutcome, CheckinRequest, CheckinVerifier};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hours a (user, promotion) pair stays deduplicated after any attempt.
pub const DEDUPE_WINDOW_HOURS: i64 = 24;

/// Default geofence radius in meters.
pub const DEFAULT_MAX_DISTANCE_M: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckinStatus {
    Verified,
    Failed,
}

impl CheckinStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckinStatus::Verified => "verified",
            CheckinStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "verified" => Some(CheckinStatus::Verified),
            "failed" => Some(CheckinStatus::Failed),
            _ => None,
        }
    }
}

/// One persisted check-in attempt. At most one record exists per
/// (user, promotion) within any trailing 24-hour window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinRecord {
    pub id: String,
    pub user_id: String,
    pub promotion_id: String,
    pub business_name: String,
    pub target_lat: f64,
    pub target_lng: f64,
    pub user_lat: f64,
    pub user_lng: f64,
    pub distance_meters: f64,
    pub status: CheckinStatus,
    /// None on failed attempts
    pub reward_amount: Option<i64>,
    pub reward_type: String,
    pub streak_day: u32,
    /// Whole-percent streak bonus applied
    pub streak_bonus: u32,
    pub reward_claimed: bool,
    pub checked_in_at: DateTime<Utc>,
}

impl CheckinRecord {
    pub fn new_id() -> String {
        format!("checkin_{}", Uuid::new_v4())
    }

    #[cfg(test)]
    pub(crate) fn sample(user_id: &str, promotion_id: &str) -> Self {
        Self {
            id: Self::new_id(),
            user_id: user_id.to_string(),
            promotion_id: promotion_id.to_string(),
            business_name: "Test Cafe".to_string(),
            target_lat: 40.0,
            target_lng: -74.0,
            user_lat: 40.0,
            user_lng: -74.0,
            distance_meters: 0.0,
            status: CheckinStatus::Verified,
            reward_amount: Some(100),
            reward_type: "coins".to_string(),
            streak_day: 1,
            streak_bonus: 0,
            reward_claimed: false,
            checked_in_at: Utc::now(),
        }
    }
}
