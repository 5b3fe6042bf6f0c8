//! Check-in verification flow: validate -> geofence -> dedupe-insert ->
//! streak -> credit.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::ledger::CoinLedger;
use crate::notify::Notifier;
use crate::store::{CheckinInsert, TrustStore};
use crate::trust::UserTrustProfile;

use super::geo::{haversine_distance_m, Coordinates};
use super::streak::{advance_streak, bonus_amount, bonus_percent};
use super::{CheckinRecord, CheckinStatus, DEDUPE_WINDOW_HOURS, DEFAULT_MAX_DISTANCE_M};

#[derive(Debug, Clone, Deserialize)]
pub struct CheckinRequest {
    pub user_id: String,
    pub promotion_id: String,
    pub business_name: String,
    pub target_lat: f64,
    pub target_lng: f64,
    pub user_lat: f64,
    pub user_lng: f64,
    pub reward_amount: i64,
    pub reward_type: String,
    /// Geofence radius override; defaults to 100 m
    pub max_distance_meters: Option<f64>,
}

/// Outcome of a check-in attempt that produced a record (verified or failed).
#[derive(Debug, Clone, Serialize)]
pub struct CheckinOutcome {
    pub record_id: String,
    pub verified: bool,
    pub status: CheckinStatus,
    pub distance_meters: f64,
    /// Human-readable distance feedback for the caller to display
    pub feedback: String,
    pub streak_days: u32,
    pub streak_bonus_percent: u32,
    pub bonus_amount: i64,
    pub total_reward: i64,
}

pub struct CheckinVerifier {
    store: Arc<dyn TrustStore>,
    ledger: Arc<dyn CoinLedger>,
    notifier: Arc<dyn Notifier>,
    max_distance_m: f64,
}

impl CheckinVerifier {
    pub fn new(
        store: Arc<dyn TrustStore>,
        ledger: Arc<dyn CoinLedger>,
        notifier: Arc<dyn Notifier>,
        max_distance_m: f64,
    ) -> Self {
        Self {
            store,
            ledger,
            notifier,
            max_distance_m,
        }
    }

    /// Verify one check-in attempt. Input errors reject before any side
    /// effect; a duplicate within 24 h rejects without creating a record;
    /// otherwise a record is persisted whether or not the geofence passed.
    pub async fn verify(&self, request: CheckinRequest) -> Result<CheckinOutcome, EngineError> {
        if request.user_id.is_empty() || request.promotion_id.is_empty() {
            return Err(EngineError::InvalidInput(
                "user_id and promotion_id are required".to_string(),
            ));
        }
        if request.reward_amount < 0 {
            return Err(EngineError::InvalidInput(
                "reward_amount must be non-negative".to_string(),
            ));
        }
        let target = Coordinates::new(request.target_lat, request.target_lng)?;
        let user = Coordinates::new(request.user_lat, request.user_lng)?;

        let max_distance = match request.max_distance_meters {
            Some(d) if d.is_finite() && d > 0.0 => d,
            Some(d) => {
                return Err(EngineError::InvalidInput(format!(
                    "max_distance_meters must be positive: {d}"
                )))
            }
            None => {
                if self.max_distance_m > 0.0 {
                    self.max_distance_m
                } else {
                    DEFAULT_MAX_DISTANCE_M
                }
            }
        };

        let distance = haversine_distance_m(target, user);
        let within_fence = distance <= max_distance;

        if within_fence {
            self.verified_checkin(&request, distance).await
        } else {
            self.failed_checkin(&request, distance, max_distance).await
        }
    }

    async fn verified_checkin(
        &self,
        request: &CheckinRequest,
        distance: f64,
    ) -> Result<CheckinOutcome, EngineError> {
        let today = Utc::now().date_naive();

        let mut profile = self
            .store
            .get_profile(&request.user_id)
            .await?
            .unwrap_or_else(|| UserTrustProfile::new(&request.user_id));

        let streak_days = advance_streak(profile.last_active_date, today, profile.streak_days);
        let percent = bonus_percent(streak_days);
        let bonus = bonus_amount(request.reward_amount, percent);
        let total_reward = request.reward_amount + bonus;

        let record = CheckinRecord {
            id: CheckinRecord::new_id(),
            user_id: request.user_id.clone(),
            promotion_id: request.promotion_id.clone(),
            business_name: request.business_name.clone(),
            target_lat: request.target_lat,
            target_lng: request.target_lng,
            user_lat: request.user_lat,
            user_lng: request.user_lng,
            distance_meters: distance,
            status: CheckinStatus::Verified,
            reward_amount: Some(request.reward_amount),
            reward_type: request.reward_type.clone(),
            streak_day: streak_days,
            streak_bonus: percent,
            reward_claimed: false,
            checked_in_at: Utc::now(),
        };

        self.insert_deduped(&record).await?;

        profile.streak_days = streak_days;
        profile.longest_streak = profile.longest_streak.max(streak_days);
        profile.last_active_date = Some(today);
        self.store.upsert_profile(&profile).await?;

        // Fail closed: the reward is only granted once the ledger confirms.
        self.ledger
            .credit(&request.user_id, &request.reward_type, total_reward)
            .await?;
        self.store.mark_reward_claimed(&record.id).await?;

        info!(
            user_id = %request.user_id,
            promotion_id = %request.promotion_id,
            distance_m = distance,
            streak_days,
            total_reward,
            "check-in verified"
        );

        self.notifier
            .notify(
                &request.user_id,
                "Check-in verified",
                &format!(
                    "You checked in at {} and earned {} {}",
                    request.business_name, total_reward, request.reward_type
                ),
                serde_json::json!({
                    "promotion_id": request.promotion_id,
                    "streak_days": streak_days,
                    "total_reward": total_reward,
                }),
            )
            .await;

        Ok(CheckinOutcome {
            record_id: record.id,
            verified: true,
            status: CheckinStatus::Verified,
            distance_meters: distance,
            feedback: format!(
                "Check-in verified: {:.0} m from {}",
                distance, request.business_name
            ),
            streak_days,
            streak_bonus_percent: percent,
            bonus_amount: bonus,
            total_reward,
        })
    }

    async fn failed_checkin(
        &self,
        request: &CheckinRequest,
        distance: f64,
        max_distance: f64,
    ) -> Result<CheckinOutcome, EngineError> {
        let record = CheckinRecord {
            id: CheckinRecord::new_id(),
            user_id: request.user_id.clone(),
            promotion_id: request.promotion_id.clone(),
            business_name: request.business_name.clone(),
            target_lat: request.target_lat,
            target_lng: request.target_lng,
            user_lat: request.user_lat,
            user_lng: request.user_lng,
            distance_meters: distance,
            status: CheckinStatus::Failed,
            reward_amount: None,
            reward_type: request.reward_type.clone(),
            streak_day: 0,
            streak_bonus: 0,
            reward_claimed: false,
            checked_in_at: Utc::now(),
        };

        self.insert_deduped(&record).await?;

        warn!(
            user_id = %request.user_id,
            promotion_id = %request.promotion_id,
            distance_m = distance,
            max_distance_m = max_distance,
            "check-in outside geofence"
        );

        Ok(CheckinOutcome {
            record_id: record.id,
            verified: false,
            status: CheckinStatus::Failed,
            distance_meters: distance,
            feedback: format!(
                "You are {:.0} m from {}; move {:.0} m closer to check in",
                distance,
                request.business_name,
                distance - max_distance
            ),
            streak_days: 0,
            streak_bonus_percent: 0,
            bonus_amount: 0,
            total_reward: 0,
        })
    }

    async fn insert_deduped(&self, record: &CheckinRecord) -> Result<(), EngineError> {
        match self
            .store
            .insert_checkin(record, Duration::hours(DEDUPE_WINDOW_HOURS))
            .await?
        {
            CheckinInsert::Recorded => Ok(()),
            CheckinInsert::Duplicate { checked_in_at } => {
                Err(EngineError::AlreadyCheckedIn { checked_in_at })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::RecordingLedger;
    use crate::notify::RecordingNotifier;
    use crate::store::MemoryStore;

    struct Harness {
        verifier: CheckinVerifier,
        store: Arc<MemoryStore>,
        ledger: Arc<RecordingLedger>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(RecordingLedger::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let verifier = CheckinVerifier::new(
            store.clone(),
            ledger.clone(),
            notifier.clone(),
            DEFAULT_MAX_DISTANCE_M,
        );
        Harness {
            verifier,
            store,
            ledger,
            notifier,
        }
    }

    fn request(user_id: &str, promotion_id: &str) -> CheckinRequest {
        CheckinRequest {
            user_id: user_id.to_string(),
            promotion_id: promotion_id.to_string(),
            business_name: "Corner Cafe".to_string(),
            target_lat: 40.7128,
            target_lng: -74.0060,
            user_lat: 40.7128,
            user_lng: -74.0060,
            reward_amount: 100,
            reward_type: "coins".to_string(),
            max_distance_meters: None,
        }
    }

    #[tokio::test]
    async fn test_in_range_checkin_credits_and_notifies() {
        let h = harness();
        let outcome = h.verifier.verify(request("user_1", "promo_1")).await.unwrap();

        assert!(outcome.verified);
        assert_eq!(outcome.streak_days, 1);
        assert_eq!(outcome.streak_bonus_percent, 0);
        assert_eq!(outcome.total_reward, 100);

        let credits = h.ledger.credits.lock().await;
        assert_eq!(credits.len(), 1);
        assert_eq!(credits[0], ("user_1".to_string(), "coins".to_string(), 100));

        assert_eq!(h.notifier.sent.lock().await.len(), 1);

        let profile = h.store.get_profile("user_1").await.unwrap().unwrap();
        assert_eq!(profile.streak_days, 1);
        assert_eq!(profile.longest_streak, 1);
    }

    #[tokio::test]
    async fn test_out_of_range_persists_failed_record_without_credit() {
        let h = harness();
        let mut req = request("user_1", "promo_1");
        req.user_lat = 40.7200; // ~800 m north

        let outcome = h.verifier.verify(req).await.unwrap();
        assert!(!outcome.verified);
        assert_eq!(outcome.status, CheckinStatus::Failed);
        assert!(outcome.distance_meters > 100.0);
        assert!(outcome.feedback.contains("closer"));
        assert_eq!(outcome.total_reward, 0);

        assert!(h.ledger.credits.lock().await.is_empty());
        assert!(h.store.get_profile("user_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_checkin_within_window_rejected() {
        let h = harness();
        h.verifier.verify(request("user_1", "promo_1")).await.unwrap();

        let result = h.verifier.verify(request("user_1", "promo_1")).await;
        assert!(matches!(result, Err(EngineError::AlreadyCheckedIn { .. })));

        // Only the first credit went through
        assert_eq!(h.ledger.credits.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_checkins_single_record() {
        let h = harness();
        let verifier = Arc::new(h.verifier);

        let a = {
            let verifier = Arc::clone(&verifier);
            tokio::spawn(async move { verifier.verify(request("user_1", "promo_1")).await })
        };
        let b = {
            let verifier = Arc::clone(&verifier);
            tokio::spawn(async move { verifier.verify(request("user_1", "promo_1")).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let dup = results
            .iter()
            .filter(|r| matches!(r, Err(EngineError::AlreadyCheckedIn { .. })))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(dup, 1);
        assert_eq!(h.ledger.credits.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_streak_bonus_applied() {
        let h = harness();
        // Day 6 of a streak: last active yesterday with 6 days banked
        let yesterday = Utc::now().date_naive().pred_opt().unwrap();
        h.store
            .upsert_profile(&UserTrustProfile {
                user_id: "user_1".to_string(),
                streak_days: 6,
                longest_streak: 6,
                last_active_date: Some(yesterday),
            })
            .await
            .unwrap();

        let outcome = h.verifier.verify(request("user_1", "promo_1")).await.unwrap();
        assert_eq!(outcome.streak_days, 7);
        assert_eq!(outcome.streak_bonus_percent, 25);
        assert_eq!(outcome.bonus_amount, 25);
        assert_eq!(outcome.total_reward, 125);

        let profile = h.store.get_profile("user_1").await.unwrap().unwrap();
        assert_eq!(profile.streak_days, 7);
        assert_eq!(profile.longest_streak, 7);
    }

    #[tokio::test]
    async fn test_invalid_coordinates_reject_without_side_effects() {
        let h = harness();
        let mut req = request("user_1", "promo_1");
        req.user_lat = 123.0;

        let result = h.verifier.verify(req).await;
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));

        // A valid retry is not blocked by the rejected attempt
        let outcome = h.verifier.verify(request("user_1", "promo_1")).await.unwrap();
        assert!(outcome.verified);
    }
}
