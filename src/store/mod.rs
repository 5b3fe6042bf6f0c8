//! Storage seam for the engine
//!
//! Every counter, window, and record the engine consults is derived from this
//! store; the engine itself holds no authoritative in-process state. The two
//! correctness-critical races (duplicate check-in, stale rate-limit count) are
//! closed *inside* implementations of this trait, not in component logic:
//! `admit_action` and `insert_checkin` are single atomic check-then-insert
//! operations.
//!
//! Two implementations ship: [`MemoryStore`] (tests, and the fallback when
//! Postgres is disabled) and the sqlx-backed pool in `crate::database`.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::abuse::{AbuseLogEntry, AbuseQuery, AbuseType};
use crate::checkin::CheckinRecord;
use crate::fingerprint::DeviceFingerprint;
use crate::rate_limit::ActionKind;
use crate::trust::UserTrustProfile;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of an atomic rate-limit admission check.
#[derive(Debug, Clone)]
pub struct ActionAdmission {
    /// The action was recorded and the caller may proceed
    pub admitted: bool,
    /// Window already held `max_count` actions
    pub rate_limited: bool,
    /// Identical content payload already present in the window
    pub duplicate_content: bool,
    /// Actions counted in the window before this attempt
    pub recent_count: u64,
    /// Timestamp of the oldest action still inside the window
    pub oldest_in_window: Option<DateTime<Utc>>,
}

/// Outcome of an atomic check-in insert.
#[derive(Debug, Clone)]
pub enum CheckinInsert {
    Recorded,
    /// A record for this (user, promotion) already exists in the dedupe window
    Duplicate { checked_in_at: DateTime<Utc> },
}

/// Transactional store backing the trust engine.
#[async_trait]
pub trait TrustStore: Send + Sync {
    // ------------------------------------------------------------------
    // Abuse log (append-only)
    // ------------------------------------------------------------------

    async fn append_abuse(&self, entry: &AbuseLogEntry) -> Result<(), StoreError>;

    /// Range query by user, type, and time window for review tooling.
    async fn query_abuse(&self, query: &AbuseQuery) -> Result<Vec<AbuseLogEntry>, StoreError>;

    async fn count_abuse(
        &self,
        user_id: &str,
        abuse_type: AbuseType,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn unresolved_abuse(&self, user_id: &str) -> Result<Vec<AbuseLogEntry>, StoreError>;

    // ------------------------------------------------------------------
    // Action log (rate limiting, derived windows)
    // ------------------------------------------------------------------

    /// Atomically count the user's actions of `action` inside the trailing
    /// `window`, check `content_hash` for a duplicate payload, and record the
    /// action iff neither ceiling nor duplicate check trips. Two concurrent
    /// calls for the same (user, action) must serialize against each other.
    async fn admit_action(
        &self,
        user_id: &str,
        action: ActionKind,
        content_hash: Option<&str>,
        max_count: u32,
        window: Duration,
    ) -> Result<ActionAdmission, StoreError>;

    /// Unconditional append (bookkeeping events such as failed logins).
    async fn record_action(&self, user_id: &str, action: ActionKind) -> Result<(), StoreError>;

    async fn count_actions(
        &self,
        user_id: &str,
        action: ActionKind,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    // ------------------------------------------------------------------
    // Device fingerprints
    // ------------------------------------------------------------------

    async fn insert_fingerprint(&self, fingerprint: &DeviceFingerprint) -> Result<(), StoreError>;

    async fn get_fingerprint(
        &self,
        user_id: &str,
        hash: &str,
    ) -> Result<Option<DeviceFingerprint>, StoreError>;

    /// Update `last_seen_at` for an existing (user, device) pair.
    async fn touch_fingerprint(
        &self,
        user_id: &str,
        hash: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// All registrations of one physical device, across accounts.
    async fn fingerprints_by_hash(&self, hash: &str) -> Result<Vec<DeviceFingerprint>, StoreError>;

    async fn fingerprints_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<DeviceFingerprint>, StoreError>;

    /// Set or clear the flag on every registration of a device. Flagging
    /// untrusts; unflagging restores trust only if the score allows it.
    /// Returns the number of rows touched.
    async fn set_device_flag(
        &self,
        hash: &str,
        flagged: bool,
        reason: Option<&str>,
    ) -> Result<u64, StoreError>;

    /// Apply a trust delta to every registration of a device, clamped to
    /// [0, 100]. Returns the lowest resulting score.
    async fn adjust_device_trust(&self, hash: &str, delta: i32) -> Result<i32, StoreError>;

    /// Flag and untrust every device of a user except `keep_hash`.
    /// Returns the number of rows flagged.
    async fn flag_user_devices(
        &self,
        user_id: &str,
        reason: &str,
        keep_hash: Option<&str>,
    ) -> Result<u64, StoreError>;

    // ------------------------------------------------------------------
    // Check-ins
    // ------------------------------------------------------------------

    /// Atomically insert a check-in record unless one already exists for the
    /// same (user, promotion) inside the trailing `dedupe_window`. Concurrent
    /// calls for the same key must serialize.
    async fn insert_checkin(
        &self,
        record: &CheckinRecord,
        dedupe_window: Duration,
    ) -> Result<CheckinInsert, StoreError>;

    async fn mark_reward_claimed(&self, record_id: &str) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Trust profiles (streak fields only; trust score is derived)
    // ------------------------------------------------------------------

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserTrustProfile>, StoreError>;

    async fn upsert_profile(&self, profile: &UserTrustProfile) -> Result<(), StoreError>;
}
