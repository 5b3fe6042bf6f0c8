//! Registry operations over stored device fingerprints.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::abuse::{AbuseLog, AbuseLogEntry, AbuseSeverity, AbuseType};
use crate::error::EngineError;
use crate::store::TrustStore;

use super::{DeviceCharacteristics, DeviceFingerprint};

/// Result of registering a device sighting.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub fingerprint_hash: String,
    pub is_new_device: bool,
    pub is_trusted: bool,
}

/// Result of a cross-account duplicate scan.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateCheck {
    pub duplicate: bool,
    /// Distinct other accounts sharing this device
    pub other_user_count: usize,
}

pub struct DeviceRegistry {
    store: Arc<dyn TrustStore>,
    abuse_log: AbuseLog,
}

impl DeviceRegistry {
    pub fn new(store: Arc<dyn TrustStore>, abuse_log: AbuseLog) -> Self {
        Self { store, abuse_log }
    }

    /// Record a sighting of (user, device). First sighting inserts a
    /// trusted-by-default record; later sightings update `last_seen_at`.
    pub async fn register(
        &self,
        user_id: &str,
        characteristics: &DeviceCharacteristics,
    ) -> Result<Registration, EngineError> {
        if user_id.is_empty() {
            return Err(EngineError::InvalidInput("user_id is required".to_string()));
        }

        let hash = characteristics.fingerprint_hash();

        if let Some(existing) = self.store.get_fingerprint(user_id, &hash).await? {
            self.store
                .touch_fingerprint(user_id, &hash, Utc::now())
                .await?;
            debug!(user_id = %user_id, device = %hash, "known device sighted");
            return Ok(Registration {
                fingerprint_hash: hash,
                is_new_device: false,
                is_trusted: existing.is_trusted && !existing.flagged,
            });
        }

        let fingerprint = DeviceFingerprint::new(user_id, characteristics);
        self.store.insert_fingerprint(&fingerprint).await?;
        info!(user_id = %user_id, device = %hash, "new device registered");

        Ok(Registration {
            fingerprint_hash: hash,
            is_new_device: true,
            is_trusted: true,
        })
    }

    /// Search for any *other* account sharing this device. A hit logs one
    /// `duplicate_device` high-severity entry per detection call.
    pub async fn check_duplicate(
        &self,
        user_id: &str,
        characteristics: &DeviceCharacteristics,
    ) -> Result<DuplicateCheck, EngineError> {
        if user_id.is_empty() {
            return Err(EngineError::InvalidInput("user_id is required".to_string()));
        }

        let hash = characteristics.fingerprint_hash();
        let registrations = self.store.fingerprints_by_hash(&hash).await?;

        let mut other_users: Vec<&str> = registrations
            .iter()
            .filter(|fp| fp.user_id != user_id)
            .map(|fp| fp.user_id.as_str())
            .collect();
        other_users.sort_unstable();
        other_users.dedup();

        if other_users.is_empty() {
            return Ok(DuplicateCheck {
                duplicate: false,
                other_user_count: 0,
            });
        }

        self.abuse_log
            .record(
                AbuseLogEntry::new(
                    user_id,
                    AbuseType::DuplicateDevice,
                    AbuseSeverity::High,
                    serde_json::json!({
                        "fingerprint_hash": hash,
                        "other_user_ids": other_users,
                    }),
                )
                .with_device(&hash),
            )
            .await?;

        Ok(DuplicateCheck {
            duplicate: true,
            other_user_count: other_users.len(),
        })
    }

    /// Flag a device. Flagged devices fail session validation regardless of
    /// trust score and are never auto-restored.
    pub async fn flag(&self, fingerprint_hash: &str, reason: &str) -> Result<(), EngineError> {
        let touched = self
            .store
            .set_device_flag(fingerprint_hash, true, Some(reason))
            .await?;
        if touched == 0 {
            return Err(EngineError::InvalidInput(format!(
                "unknown fingerprint: {fingerprint_hash}"
            )));
        }
        info!(device = %fingerprint_hash, reason = %reason, "device flagged");
        Ok(())
    }

    /// Manual-review hook: clear the flag.
    pub async fn unflag(&self, fingerprint_hash: &str) -> Result<(), EngineError> {
        let touched = self
            .store
            .set_device_flag(fingerprint_hash, false, None)
            .await?;
        if touched == 0 {
            return Err(EngineError::InvalidInput(format!(
                "unknown fingerprint: {fingerprint_hash}"
            )));
        }
        info!(device = %fingerprint_hash, "device unflagged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn registry() -> (DeviceRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let abuse_log = AbuseLog::new(store.clone());
        (DeviceRegistry::new(store.clone(), abuse_log), store)
    }

    fn characteristics(agent: &str) -> DeviceCharacteristics {
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

    #[tokio::test]
    async fn test_register_then_resight() {
        let (registry, _) = registry();
        let chars = characteristics("Safari 17");

        let first = registry.register("user_1", &chars).await.unwrap();
        assert!(first.is_new_device);
        assert!(first.is_trusted);

        let second = registry.register("user_1", &chars).await.unwrap();
        assert!(!second.is_new_device);
        assert!(second.is_trusted);
        assert_eq!(first.fingerprint_hash, second.fingerprint_hash);
    }

    #[tokio::test]
    async fn test_duplicate_device_across_accounts() {
        let (registry, store) = registry();
        let chars = characteristics("Safari 17");

        registry.register("user_1", &chars).await.unwrap();
        registry.register("user_2", &chars).await.unwrap();

        let check = registry.check_duplicate("user_2", &chars).await.unwrap();
        assert!(check.duplicate);
        assert_eq!(check.other_user_count, 1);

        let entries = store.unresolved_abuse("user_2").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].abuse_type, AbuseType::DuplicateDevice);
        assert_eq!(entries[0].severity, AbuseSeverity::High);
    }

    #[tokio::test]
    async fn test_no_duplicate_for_single_owner() {
        let (registry, store) = registry();
        let chars = characteristics("Safari 17");

        registry.register("user_1", &chars).await.unwrap();
        let check = registry.check_duplicate("user_1", &chars).await.unwrap();
        assert!(!check.duplicate);
        assert!(store.unresolved_abuse("user_1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flagged_device_loses_trust() {
        let (registry, _) = registry();
        let chars = characteristics("Safari 17");

        let registration = registry.register("user_1", &chars).await.unwrap();
        registry
            .flag(&registration.fingerprint_hash, "shared device farm")
            .await
            .unwrap();

        let resight = registry.register("user_1", &chars).await.unwrap();
        assert!(!resight.is_new_device);
        assert!(!resight.is_trusted);
    }

    #[tokio::test]
    async fn test_flag_unknown_device_is_input_error() {
        let (registry, _) = registry();
        let result = registry.flag("deadbeef", "nope").await;
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
    }
}
