//! Integration tests for the trust engine
//!
//! These tests wire the full engine against the in-memory store and verify
//! end-to-end behavior: duplicate-device detection feeding trust scores,
//! rate-limit denials, reward-attempt fraud scoring, geofenced check-ins
//! with streaks, and session lockdown escalation.

use std::sync::Arc;

use trustgate::abuse::{AbuseLog, AbuseQuery, AbuseType};
use trustgate::checkin::{CheckinRequest, CheckinVerifier, DEFAULT_MAX_DISTANCE_M};
use trustgate::fingerprint::{DeviceCharacteristics, DeviceRegistry};
use trustgate::ledger::RecordingLedger;
use trustgate::notify::RecordingNotifier;
use trustgate::rate_limit::{ActionKind, RateLimitConfig, RateLimitPolicy, RateLimiter};
use trustgate::reward::AttemptValidator;
use trustgate::session::{SessionEnforcer, SessionPolicy, SessionStatus};
use trustgate::store::MemoryStore;
use trustgate::trust::TrustAggregator;
use trustgate::EngineError;
use trustgate::TrustStore;

// ============================================================================
// Test Harness
// ============================================================================

struct Engine {
    store: Arc<MemoryStore>,
    registry: DeviceRegistry,
    rate_limiter: RateLimiter,
    attempt_validator: AttemptValidator,
    checkin_verifier: CheckinVerifier,
    trust: TrustAggregator,
    sessions: SessionEnforcer,
    abuse_log: AbuseLog,
    ledger: Arc<RecordingLedger>,
    notifier: Arc<RecordingNotifier>,
}

/// Wire every component against one shared in-memory store, the way main.rs
/// wires them against Postgres.
fn engine() -> Engine {
    let store = Arc::new(MemoryStore::new());
    let abuse_log = AbuseLog::new(store.clone());
    let ledger = Arc::new(RecordingLedger::default());
    let notifier = Arc::new(RecordingNotifier::default());

    let rate_limits = RateLimitConfig::default();
    let claim_policy = rate_limits.policy(ActionKind::RewardClaim);

    Engine {
        registry: DeviceRegistry::new(store.clone(), abuse_log.clone()),
        rate_limiter: RateLimiter::new(store.clone(), abuse_log.clone(), rate_limits),
        attempt_validator: AttemptValidator::new(store.clone(), abuse_log.clone(), claim_policy),
        checkin_verifier: CheckinVerifier::new(
            store.clone(),
            ledger.clone(),
            notifier.clone(),
            DEFAULT_MAX_DISTANCE_M,
        ),
        trust: TrustAggregator::new(store.clone()),
        sessions: SessionEnforcer::new(
            store.clone(),
            abuse_log.clone(),
            notifier.clone(),
            SessionPolicy::default(),
        ),
        abuse_log,
        store,
        ledger,
        notifier,
    }
}

fn phone(agent: &str) -> DeviceCharacteristics {
    DeviceCharacteristics {
        user_agent: agent.to_string(),
        language: "en-US".to_string(),
        platform: "iPhone".to_string(),
        screen_width: 390,
        screen_height: 844,
        timezone: "America/Chicago".to_string(),
        color_depth: 32,
        device_memory_gb: 6.0,
        hardware_concurrency: 6,
        touch_support: true,
        gpu_vendor: "Apple".to_string(),
        gpu_renderer: "Apple A15 GPU".to_string(),
        ..Default::default()
    }
}

fn checkin_request(user_id: &str, promotion_id: &str) -> CheckinRequest {
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

// ============================================================================
// Duplicate Device Detection -> Trust Score
// ============================================================================

mod duplicate_devices {
    use super::*;

    #[tokio::test]
    async fn test_shared_device_depresses_trust_score() {
        let e = engine();
        let device = phone("Safari 17");

        e.registry.register("user_a", &device).await.unwrap();
        e.registry.register("user_b", &device).await.unwrap();

        let check = e.registry.check_duplicate("user_b", &device).await.unwrap();
        assert!(check.duplicate);
        assert_eq!(check.other_user_count, 1);

        // One high-severity entry: 100 - 30 = 70, multiplier 0.9
        let snapshot = e.trust.snapshot("user_b").await.unwrap();
        assert_eq!(snapshot.trust_score, 70);
        assert_eq!(snapshot.reward_multiplier, 0.9);
        assert!(!snapshot.should_throttle);

        // The innocent first account is untouched
        assert_eq!(e.trust.trust_score("user_a").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_distinct_devices_no_detection() {
        let e = engine();
        e.registry.register("user_a", &phone("Safari 17")).await.unwrap();
        e.registry.register("user_b", &phone("Safari 16")).await.unwrap();

        let check = e
            .registry
            .check_duplicate("user_b", &phone("Safari 16"))
            .await
            .unwrap();
        assert!(!check.duplicate);
        assert_eq!(e.trust.trust_score("user_b").await.unwrap(), 100);
    }
}

// ============================================================================
// Rate Limiting -> Abuse Log -> Trust Score
// ============================================================================

mod rate_limiting {
    use super::*;

    #[tokio::test]
    async fn test_comment_burst_denied_and_scored() {
        let e = engine();
        let registration = e
            .registry
            .register("user_1", &phone("Safari 17"))
            .await
            .unwrap();
        let hash = registration.fingerprint_hash;

        for i in 0..5 {
            let decision = e
                .rate_limiter
                .check("user_1", ActionKind::Comment, Some(&format!("msg {i}")), Some(&hash))
                .await
                .unwrap();
            assert!(decision.allowed);
        }

        let denied = e
            .rate_limiter
            .check("user_1", ActionKind::Comment, Some("msg 6"), Some(&hash))
            .await
            .unwrap();
        assert!(!denied.allowed);
        assert!(denied.is_rate_limited);
        assert!(denied.retry_after_seconds.is_some());

        // Medium severity: 100 - 15 = 85; device lost 5 trust points
        assert_eq!(e.trust.trust_score("user_1").await.unwrap(), 85);
        let fp = e.store.get_fingerprint("user_1", &hash).await.unwrap().unwrap();
        assert_eq!(fp.trust_score, 95);
    }

    #[tokio::test]
    async fn test_duplicate_comment_denied_low_severity() {
        let e = engine();
        e.rate_limiter
            .check("user_1", ActionKind::Comment, Some("great post"), None)
            .await
            .unwrap();

        let dup = e
            .rate_limiter
            .check("user_1", ActionKind::Comment, Some("great post"), None)
            .await
            .unwrap();
        assert!(!dup.allowed);
        assert!(dup.is_duplicate);

        // Low severity: 100 - 5 = 95
        assert_eq!(e.trust.trust_score("user_1").await.unwrap(), 95);
    }
}

// ============================================================================
// Reward Attempt Anti-Cheat
// ============================================================================

mod reward_attempts {
    use super::*;

    #[tokio::test]
    async fn test_attention_manipulation_blocked_end_to_end() {
        let e = engine();
        // Perfect attention after watching 10s of a 100s video
        let assessment = e
            .attempt_validator
            .validate("user_1", 100.0, 10.0, 100.0, None)
            .await
            .unwrap();

        assert!(assessment.should_block);
        assert!(!assessment.valid);

        let entries = e.abuse_log.unresolved("user_1").await.unwrap();
        assert!(entries
            .iter()
            .any(|entry| entry.abuse_type == AbuseType::AttentionFraud));

        // Medium severity entry: trust drops to 85
        assert_eq!(e.trust.trust_score("user_1").await.unwrap(), 85);
    }

    #[tokio::test]
    async fn test_claim_burst_trips_ceiling() {
        let e = engine();
        // Default ceiling is 30 claims/hour
        for _ in 0..30 {
            let ok = e
                .attempt_validator
                .validate("user_1", 85.0, 95.0, 100.0, None)
                .await
                .unwrap();
            assert!(ok.valid);
        }

        let over = e
            .attempt_validator
            .validate("user_1", 85.0, 95.0, 100.0, None)
            .await
            .unwrap();
        assert!(over.should_block);
        assert_eq!(over.score, 50);
        assert!(!over.valid);
    }
}

// ============================================================================
// Geofenced Check-Ins
// ============================================================================

mod checkins {
    use super::*;

    #[tokio::test]
    async fn test_checkin_credits_ledger_once() {
        let e = engine();
        let outcome = e
            .checkin_verifier
            .verify(checkin_request("user_1", "promo_1"))
            .await
            .unwrap();
        assert!(outcome.verified);
        assert_eq!(outcome.total_reward, 100);

        // Retry within the 24h window conflicts and does not double-credit
        let retry = e
            .checkin_verifier
            .verify(checkin_request("user_1", "promo_1"))
            .await;
        assert!(matches!(retry, Err(EngineError::AlreadyCheckedIn { .. })));
        assert_eq!(e.ledger.credits.lock().await.len(), 1);
        assert_eq!(e.notifier.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_gives_distance_feedback() {
        let e = engine();
        let mut request = checkin_request("user_1", "promo_1");
        request.user_lat = 40.7200; // ~800 m north of the target

        let outcome = e.checkin_verifier.verify(request).await.unwrap();
        assert!(!outcome.verified);
        assert!(outcome.distance_meters > DEFAULT_MAX_DISTANCE_M);
        assert!(outcome.feedback.contains("closer"));
        assert!(e.ledger.credits.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_streak_bonus_credits_extra_coins() {
        let e = engine();
        let yesterday = chrono::Utc::now().date_naive().pred_opt().unwrap();
        e.store
            .upsert_profile(&trustgate::trust::UserTrustProfile {
                user_id: "user_1".to_string(),
                streak_days: 6,
                longest_streak: 6,
                last_active_date: Some(yesterday),
            })
            .await
            .unwrap();

        let outcome = e
            .checkin_verifier
            .verify(checkin_request("user_1", "promo_1"))
            .await
            .unwrap();

        // Day 7: 25% bonus on a 100-coin reward
        assert_eq!(outcome.streak_days, 7);
        assert_eq!(outcome.streak_bonus_percent, 25);
        assert_eq!(outcome.total_reward, 125);

        let credits = e.ledger.credits.lock().await;
        assert_eq!(credits[0].2, 125);
    }
}

// ============================================================================
// Session Lockdown Escalation
// ============================================================================

mod session_lockdown {
    use super::*;

    #[tokio::test]
    async fn test_repeated_suspicious_reports_lock_the_account() {
        let e = engine();
        let registration = e
            .registry
            .register("user_1", &phone("Safari 17"))
            .await
            .unwrap();
        let hash = registration.fingerprint_hash;

        for i in 0..2 {
            let report = e
                .sessions
                .report_suspicious("user_1", &hash, serde_json::json!({ "n": i }))
                .await
                .unwrap();
            assert!(!report.account_locked);
        }

        let third = e
            .sessions
            .report_suspicious("user_1", &hash, serde_json::json!({ "n": 2 }))
            .await
            .unwrap();
        assert!(third.account_locked);

        // Session validation now fails on the flagged device
        let check = e.sessions.check_session("user_1", &hash).await;
        assert_eq!(check.status, SessionStatus::Denied);
        assert!(check.require_reauth);

        // User was notified of the lock
        let sent = e.notifier.sent.lock().await;
        assert!(sent.iter().any(|(_, title)| title == "Account locked"));
    }

    #[tokio::test]
    async fn test_failed_login_lockout_and_recovery_path() {
        let e = engine();
        let registration = e
            .registry
            .register("user_1", &phone("Safari 17"))
            .await
            .unwrap();
        let hash = registration.fingerprint_hash;

        for _ in 0..5 {
            e.sessions.record_failed_login("user_1").await.unwrap();
        }

        let check = e.sessions.check_session("user_1", &hash).await;
        assert_eq!(check.status, SessionStatus::Denied);
        assert_eq!(check.lockout_minutes, Some(30));

        // Another user on another device is unaffected
        let other = e
            .registry
            .register("user_2", &phone("Safari 16"))
            .await
            .unwrap();
        let other_check = e
            .sessions
            .check_session("user_2", &other.fingerprint_hash)
            .await;
        assert_eq!(other_check.status, SessionStatus::Valid);
    }

    #[tokio::test]
    async fn test_force_logout_spares_initiating_device() {
        let e = engine();
        let keep = e
            .registry
            .register("user_1", &phone("Safari 17"))
            .await
            .unwrap();
        let other = e
            .registry
            .register("user_1", &phone("Chrome 120"))
            .await
            .unwrap();

        let flagged = e
            .sessions
            .force_logout("user_1", Some(&keep.fingerprint_hash))
            .await
            .unwrap();
        assert_eq!(flagged, 1);

        let kept_check = e
            .sessions
            .check_session("user_1", &keep.fingerprint_hash)
            .await;
        assert_eq!(kept_check.status, SessionStatus::Valid);

        let other_check = e
            .sessions
            .check_session("user_1", &other.fingerprint_hash)
            .await;
        assert_eq!(other_check.status, SessionStatus::Denied);

        // Activity record is pre-resolved: trust score unaffected
        assert_eq!(e.trust.trust_score("user_1").await.unwrap(), 100);
    }
}

// ============================================================================
// Audit Log Queries
// ============================================================================

mod audit {
    use super::*;

    #[tokio::test]
    async fn test_history_filters_by_user_and_type() {
        let e = engine();
        let device = phone("Safari 17");
        e.registry.register("user_a", &device).await.unwrap();
        e.registry.register("user_b", &device).await.unwrap();
        e.registry.check_duplicate("user_b", &device).await.unwrap();

        e.rate_limiter
            .check("user_b", ActionKind::Comment, Some("x"), None)
            .await
            .unwrap();
        e.rate_limiter
            .check("user_b", ActionKind::Comment, Some("x"), None)
            .await
            .unwrap();

        let all = e
            .abuse_log
            .history(&AbuseQuery {
                user_id: Some("user_b".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let duplicates_only = e
            .abuse_log
            .history(&AbuseQuery {
                user_id: Some("user_b".to_string()),
                abuse_type: Some(AbuseType::DuplicateDevice),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(duplicates_only.len(), 1);
        assert_eq!(duplicates_only[0].abuse_type, AbuseType::DuplicateDevice);

        let none_for_other = e
            .abuse_log
            .history(&AbuseQuery {
                user_id: Some("user_a".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(none_for_other.is_empty());
    }

    #[tokio::test]
    async fn test_limit_caps_results() {
        let e = engine();
        for i in 0..4 {
            e.rate_limiter
                .check("user_1", ActionKind::Report, Some(&format!("r{i}")), None)
                .await
                .unwrap();
            // Repeat the same content to force a duplicate-content entry
            e.rate_limiter
                .check("user_1", ActionKind::Report, Some(&format!("r{i}")), None)
                .await
                .unwrap();
        }

        let limited = e
            .abuse_log
            .history(&AbuseQuery {
                user_id: Some("user_1".to_string()),
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }
}
