//! Device Fingerprint Registry
//!
//! Derives a stable identifier from device/browser characteristics, tracks
//! ownership and trust per device, and detects the same physical device
//! appearing under multiple accounts (the primary multi-accounting defense).
//!
//! The hash is content-addressed: the same device and browser state always
//! produces the same digest, independent of field arrival order.

mod registry;

pub use registry::{DeviceRegistry, DuplicateCheck, Registration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Trust score assigned to a device on first registration.
pub const INITIAL_DEVICE_TRUST: i32 = 100;

/// Minimum trust score at which an unflagged device counts as trusted.
pub const DEVICE_TRUSTED_FLOOR: i32 = 50;

/// Observable characteristics collected by the client shell. Collection is an
/// external collaborator concern; the engine only canonicalizes and hashes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceCharacteristics {
    pub user_agent: String,
    pub language: String,
    pub platform: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub timezone: String,
    pub color_depth: u32,
    /// Device memory in gigabytes as reported by the browser
    pub device_memory_gb: f64,
    pub hardware_concurrency: u32,
    pub touch_support: bool,
    pub gpu_vendor: String,
    pub gpu_renderer: String,
    /// Forward-compatible tail; BTreeMap keeps canonical ordering
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl DeviceCharacteristics {
    /// Compute the one-way digest of the canonicalized characteristic vector.
    pub fn fingerprint_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_encoding().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Canonical `key=value` line encoding. Fixed field order, then the
    /// `extra` tail in BTreeMap (sorted) order.
    fn canonical_encoding(&self) -> String {
        let mut lines = vec![
            format!("user_agent={}", self.user_agent),
            format!("language={}", self.language),
            format!("platform={}", self.platform),
            format!("screen={}x{}", self.screen_width, self.screen_height),
            format!("timezone={}", self.timezone),
            format!("color_depth={}", self.color_depth),
            format!("device_memory_gb={}", self.device_memory_gb),
            format!("hardware_concurrency={}", self.hardware_concurrency),
            format!("touch_support={}", self.touch_support),
            format!("gpu_vendor={}", self.gpu_vendor),
            format!("gpu_renderer={}", self.gpu_renderer),
        ];
        for (key, value) in &self.extra {
            lines.push(format!("extra.{}={}", key, value));
        }
        lines.join("\n")
    }
}

/// A registered (device, user) pair. Never hard-deleted, only flagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    pub hash: String,
    pub user_id: String,
    /// Opaque snapshot of the characteristics at first registration
    pub characteristics: serde_json::Value,
    /// Per-device trust score in [0, 100]
    pub trust_score: i32,
    pub is_trusted: bool,
    pub flagged: bool,
    pub flag_reason: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl DeviceFingerprint {
    pub fn new(user_id: &str, characteristics: &DeviceCharacteristics) -> Self {
        let now = Utc::now();
        Self {
            hash: characteristics.fingerprint_hash(),
            user_id: user_id.to_string(),
            characteristics: serde_json::to_value(characteristics)
                .unwrap_or(serde_json::Value::Null),
            trust_score: INITIAL_DEVICE_TRUST,
            is_trusted: true,
            flagged: false,
            flag_reason: None,
            first_seen_at: now,
            last_seen_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_characteristics() -> DeviceCharacteristics {
        DeviceCharacteristics {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64)".to_string(),
            language: "en-US".to_string(),
            platform: "Linux x86_64".to_string(),
            screen_width: 1920,
            screen_height: 1080,
            timezone: "America/New_York".to_string(),
            color_depth: 24,
            device_memory_gb: 8.0,
            hardware_concurrency: 8,
            touch_support: false,
            gpu_vendor: "NVIDIA Corporation".to_string(),
            gpu_renderer: "NVIDIA GeForce GTX 1080/PCIe/SSE2".to_string(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = sample_characteristics();
        let b = sample_characteristics();
        assert_eq!(a.fingerprint_hash(), b.fingerprint_hash());
    }

    #[test]
    fn test_hash_changes_with_characteristics() {
        let a = sample_characteristics();
        let mut b = sample_characteristics();
        b.screen_width = 2560;
        assert_ne!(a.fingerprint_hash(), b.fingerprint_hash());
    }

    #[test]
    fn test_extra_fields_are_order_independent() {
        let mut a = sample_characteristics();
        a.extra.insert("webgl_hash".to_string(), "aa11".to_string());
        a.extra.insert("audio_hash".to_string(), "bb22".to_string());

        let mut b = sample_characteristics();
        b.extra.insert("audio_hash".to_string(), "bb22".to_string());
        b.extra.insert("webgl_hash".to_string(), "aa11".to_string());

        assert_eq!(a.fingerprint_hash(), b.fingerprint_hash());
    }

    #[test]
    fn test_new_device_is_trusted() {
        let fp = DeviceFingerprint::new("user_1", &sample_characteristics());
        assert_eq!(fp.trust_score, INITIAL_DEVICE_TRUST);
        assert!(fp.is_trusted);
        assert!(!fp.flagged);
    }
}
