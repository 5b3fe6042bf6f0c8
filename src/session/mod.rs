//! Session Security Enforcer
//!
//! Consumes trust state and device flags to validate sessions, force logout,
//! and lock accounts. Session validation is a read-only advisory check: if the
//! store is unreachable it reports `indeterminate` rather than locking the
//! user out on a transient failure. Trust-affecting writes still fail closed.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::abuse::{AbuseLog, AbuseLogEntry, AbuseSeverity, AbuseType};
use crate::error::EngineError;
use crate::notify::Notifier;
use crate::rate_limit::ActionKind;
use crate::store::{StoreError, TrustStore};

/// Session and lockdown policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPolicy {
    /// Failed logins within the window that trigger a lockout
    pub failed_login_threshold: u32,
    pub failed_login_window_minutes: u32,
    pub lockout_minutes: u32,
    /// Device trust deducted per suspicious-activity report
    pub suspicious_device_penalty: i32,
    /// Device trust score below which a reported device is flagged
    pub device_flag_floor: i32,
    /// Suspicious-activity entries within the window that lock the account
    pub account_lock_threshold: u32,
    pub account_lock_window_hours: u32,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            failed_login_threshold: 5,
            failed_login_window_minutes: 60,
            lockout_minutes: 30,
            suspicious_device_penalty: 25,
            device_flag_floor: 20,
            account_lock_threshold: 3,
            account_lock_window_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Valid,
    Denied,
    /// The trust store could not be reached; the caller decides retry policy
    Indeterminate,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionCheck {
    pub status: SessionStatus,
    pub reason: Option<String>,
    pub require_reauth: bool,
    pub lockout_minutes: Option<u32>,
}

impl SessionCheck {
    fn valid() -> Self {
        Self {
            status: SessionStatus::Valid,
            reason: None,
            require_reauth: false,
            lockout_minutes: None,
        }
    }

    fn denied(reason: &str, require_reauth: bool, lockout_minutes: Option<u32>) -> Self {
        Self {
            status: SessionStatus::Denied,
            reason: Some(reason.to_string()),
            require_reauth,
            lockout_minutes,
        }
    }

    fn indeterminate(error: &StoreError) -> Self {
        Self {
            status: SessionStatus::Indeterminate,
            reason: Some(format!("trust store unavailable: {error}")),
            require_reauth: false,
            lockout_minutes: None,
        }
    }
}

/// Outcome of a suspicious-activity report.
#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousReport {
    pub account_locked: bool,
    pub device_flagged: bool,
    pub device_trust_score: Option<i32>,
}

pub struct SessionEnforcer {
    store: Arc<dyn TrustStore>,
    abuse_log: AbuseLog,
    notifier: Arc<dyn Notifier>,
    policy: SessionPolicy,
}

impl SessionEnforcer {
    pub fn new(
        store: Arc<dyn TrustStore>,
        abuse_log: AbuseLog,
        notifier: Arc<dyn Notifier>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            store,
            abuse_log,
            notifier,
            policy,
        }
    }

    /// Validate a session against device flags and recent failed logins.
    /// Never fails: store errors surface as `indeterminate`.
    pub async fn check_session(&self, user_id: &str, device_hash: &str) -> SessionCheck {
        let registrations = match self.store.fingerprints_by_hash(device_hash).await {
            Ok(registrations) => registrations,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "session check could not read device state");
                return SessionCheck::indeterminate(&e);
            }
        };

        // A flagged device fails validation regardless of trust score.
        if registrations.iter().any(|fp| fp.flagged) {
            return SessionCheck::denied("device_flagged", true, None);
        }

        let since =
            chrono::Utc::now() - Duration::minutes(self.policy.failed_login_window_minutes as i64);
        let failed_logins = match self
            .store
            .count_actions(user_id, ActionKind::FailedLogin, since)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "session check could not count failed logins");
                return SessionCheck::indeterminate(&e);
            }
        };

        if failed_logins >= self.policy.failed_login_threshold as u64 {
            return SessionCheck::denied(
                "too_many_failed_logins",
                true,
                Some(self.policy.lockout_minutes),
            );
        }

        SessionCheck::valid()
    }

    /// Record one failed login attempt (reported by the external auth layer).
    pub async fn record_failed_login(&self, user_id: &str) -> Result<(), EngineError> {
        if user_id.is_empty() {
            return Err(EngineError::InvalidInput("user_id is required".to_string()));
        }
        self.store
            .record_action(user_id, ActionKind::FailedLogin)
            .await?;
        Ok(())
    }

    /// Flag and untrust every device of the user except `keep_device`, write
    /// the activity record, and notify the user.
    pub async fn force_logout(
        &self,
        user_id: &str,
        keep_device: Option<&str>,
    ) -> Result<u64, EngineError> {
        if user_id.is_empty() {
            return Err(EngineError::InvalidInput("user_id is required".to_string()));
        }

        let flagged = self
            .store
            .flag_user_devices(user_id, "forced logout", keep_device)
            .await?;

        self.abuse_log
            .record(
                AbuseLogEntry::new(
                    user_id,
                    AbuseType::ForcedLogout,
                    AbuseSeverity::Low,
                    serde_json::json!({
                        "devices_flagged": flagged,
                        "kept_device": keep_device,
                    }),
                )
                .pre_resolved(),
            )
            .await?;

        info!(user_id = %user_id, devices_flagged = flagged, "forced logout");

        self.notifier
            .notify(
                user_id,
                "Security alert",
                "You have been signed out of your other devices",
                serde_json::json!({ "event": "forced_logout" }),
            )
            .await;

        Ok(flagged)
    }

    /// Record a suspicious-activity report against a device, penalize it, and
    /// escalate to a full account lock when reports accumulate.
    pub async fn report_suspicious(
        &self,
        user_id: &str,
        device_hash: &str,
        details: serde_json::Value,
    ) -> Result<SuspiciousReport, EngineError> {
        if user_id.is_empty() || device_hash.is_empty() {
            return Err(EngineError::InvalidInput(
                "user_id and device_hash are required".to_string(),
            ));
        }

        self.abuse_log
            .record(
                AbuseLogEntry::new(
                    user_id,
                    AbuseType::SuspiciousActivity,
                    AbuseSeverity::High,
                    details,
                )
                .with_device(device_hash),
            )
            .await?;

        let mut device_flagged = false;
        let device_trust_score = match self
            .store
            .adjust_device_trust(device_hash, -self.policy.suspicious_device_penalty)
            .await
        {
            Ok(score) => {
                if score < self.policy.device_flag_floor {
                    self.store
                        .set_device_flag(device_hash, true, Some("trust score below floor"))
                        .await?;
                    device_flagged = true;
                }
                Some(score)
            }
            Err(StoreError::NotFound(_)) => {
                warn!(device = %device_hash, "suspicious report for unregistered device");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let window = Duration::hours(self.policy.account_lock_window_hours as i64);
        let recent_reports = self
            .abuse_log
            .recent_count(user_id, AbuseType::SuspiciousActivity, window)
            .await?;

        let account_locked = recent_reports >= self.policy.account_lock_threshold as u64;
        if account_locked {
            self.lock_account(user_id, recent_reports).await?;
        }

        Ok(SuspiciousReport {
            account_locked,
            device_flagged,
            device_trust_score,
        })
    }

    /// Full lockdown: flag every device, record the logout, notify. Exit is
    /// manual review only.
    async fn lock_account(&self, user_id: &str, report_count: u64) -> Result<(), EngineError> {
        error!(user_id = %user_id, report_count, "account locked");

        self.store
            .flag_user_devices(user_id, "account locked", None)
            .await?;

        self.abuse_log
            .record(
                AbuseLogEntry::new(
                    user_id,
                    AbuseType::ForcedLogout,
                    AbuseSeverity::Low,
                    serde_json::json!({
                        "cause": "account_lock",
                        "suspicious_reports_24h": report_count,
                    }),
                )
                .pre_resolved(),
            )
            .await?;

        self.notifier
            .notify(
                user_id,
                "Account locked",
                "Your account has been locked after repeated suspicious activity. Contact support to restore access.",
                serde_json::json!({ "event": "account_locked" }),
            )
            .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{DeviceCharacteristics, DeviceFingerprint};
    use crate::notify::RecordingNotifier;
    use crate::store::MemoryStore;

    struct Harness {
        enforcer: SessionEnforcer,
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let enforcer = SessionEnforcer::new(
            store.clone(),
            AbuseLog::new(store.clone()),
            notifier.clone(),
            SessionPolicy::default(),
        );
        Harness {
            enforcer,
            store,
            notifier,
        }
    }

    async fn register_device(store: &MemoryStore, user_id: &str) -> String {
        let mut characteristics = DeviceCharacteristics::default();
        characteristics.user_agent = format!("agent-{user_id}");
        let fp = DeviceFingerprint::new(user_id, &characteristics);
        let hash = fp.hash.clone();
        store.insert_fingerprint(&fp).await.unwrap();
        hash
    }

    #[tokio::test]
    async fn test_clean_session_is_valid() {
        let h = harness();
        let hash = register_device(&h.store, "user_1").await;

        let check = h.enforcer.check_session("user_1", &hash).await;
        assert_eq!(check.status, SessionStatus::Valid);
        assert!(check.reason.is_none());
    }

    #[tokio::test]
    async fn test_flagged_device_denied() {
        let h = harness();
        let hash = register_device(&h.store, "user_1").await;
        h.store
            .set_device_flag(&hash, true, Some("manual"))
            .await
            .unwrap();

        let check = h.enforcer.check_session("user_1", &hash).await;
        assert_eq!(check.status, SessionStatus::Denied);
        assert_eq!(check.reason.as_deref(), Some("device_flagged"));
        assert!(check.require_reauth);
    }

    #[tokio::test]
    async fn test_failed_login_lockout() {
        let h = harness();
        let hash = register_device(&h.store, "user_1").await;

        for _ in 0..5 {
            h.enforcer.record_failed_login("user_1").await.unwrap();
        }

        let check = h.enforcer.check_session("user_1", &hash).await;
        assert_eq!(check.status, SessionStatus::Denied);
        assert_eq!(check.reason.as_deref(), Some("too_many_failed_logins"));
        assert_eq!(check.lockout_minutes, Some(30));
    }

    #[tokio::test]
    async fn test_force_logout_keeps_excluded_device() {
        let h = harness();
        let phone = register_device(&h.store, "user_1").await;

        let mut characteristics = DeviceCharacteristics::default();
        characteristics.user_agent = "laptop".to_string();
        let laptop = DeviceFingerprint::new("user_1", &characteristics);
        let laptop_hash = laptop.hash.clone();
        h.store.insert_fingerprint(&laptop).await.unwrap();

        let flagged = h
            .enforcer
            .force_logout("user_1", Some(&phone))
            .await
            .unwrap();
        assert_eq!(flagged, 1);

        let kept = h.store.get_fingerprint("user_1", &phone).await.unwrap().unwrap();
        assert!(!kept.flagged);
        let other = h
            .store
            .get_fingerprint("user_1", &laptop_hash)
            .await
            .unwrap()
            .unwrap();
        assert!(other.flagged);
        assert!(!other.is_trusted);

        assert_eq!(h.notifier.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_forced_logout_entry_does_not_depress_trust() {
        let h = harness();
        register_device(&h.store, "user_1").await;
        h.enforcer.force_logout("user_1", None).await.unwrap();

        let aggregator = crate::trust::TrustAggregator::new(h.store.clone());
        assert_eq!(aggregator.trust_score("user_1").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_suspicious_report_penalizes_device() {
        let h = harness();
        let hash = register_device(&h.store, "user_1").await;

        let report = h
            .enforcer
            .report_suspicious("user_1", &hash, serde_json::json!({ "source": "ops" }))
            .await
            .unwrap();
        assert!(!report.account_locked);
        assert!(!report.device_flagged);
        assert_eq!(report.device_trust_score, Some(75));
    }

    #[tokio::test]
    async fn test_third_report_locks_account() {
        let h = harness();
        let hash = register_device(&h.store, "user_1").await;

        let first = h
            .enforcer
            .report_suspicious("user_1", &hash, serde_json::json!({}))
            .await
            .unwrap();
        assert!(!first.account_locked);

        let second = h
            .enforcer
            .report_suspicious("user_1", &hash, serde_json::json!({}))
            .await
            .unwrap();
        assert!(!second.account_locked);

        let third = h
            .enforcer
            .report_suspicious("user_1", &hash, serde_json::json!({}))
            .await
            .unwrap();
        assert!(third.account_locked);

        // Every device flagged; session now denied
        let check = h.enforcer.check_session("user_1", &hash).await;
        assert_eq!(check.status, SessionStatus::Denied);

        // Third penalty drops trust to 25, still above the flag floor, but
        // the account lock flags the device anyway.
        let fp = h.store.get_fingerprint("user_1", &hash).await.unwrap().unwrap();
        assert!(fp.flagged);

        // Lock notification was sent
        let sent = h.notifier.sent.lock().await;
        assert!(sent.iter().any(|(_, title)| title == "Account locked"));
    }

    #[tokio::test]
    async fn test_device_flagged_when_trust_hits_floor() {
        let h = harness();
        let hash = register_device(&h.store, "user_1").await;
        // Pre-drain the device so the next -25 lands below the floor of 20
        h.store.adjust_device_trust(&hash, -60).await.unwrap();

        let report = h
            .enforcer
            .report_suspicious("user_1", &hash, serde_json::json!({}))
            .await
            .unwrap();
        assert!(report.device_flagged);
        assert_eq!(report.device_trust_score, Some(15));
    }
}
