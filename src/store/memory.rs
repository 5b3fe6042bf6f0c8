//! In-memory TrustStore
//!
//! Used by the test suite and as the runtime fallback when Postgres is
//! disabled. Atomicity for the two critical races comes from `DashMap` entry
//! guards: an entry holds an exclusive shard lock for its key, so the
//! check-then-insert sequences in `admit_action` and `insert_checkin` are
//! serialized per (user, action) / (user, promotion) key.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::abuse::{AbuseLogEntry, AbuseQuery, AbuseType};
use crate::checkin::CheckinRecord;
use crate::fingerprint::{DeviceFingerprint, DEVICE_TRUSTED_FLOOR};
use crate::rate_limit::ActionKind;
use crate::trust::UserTrustProfile;

use super::{ActionAdmission, CheckinInsert, StoreError, TrustStore};

const DEFAULT_QUERY_LIMIT: usize = 100;

#[derive(Debug, Clone)]
struct ActionEvent {
    at: DateTime<Utc>,
    content_hash: Option<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    abuse: RwLock<Vec<AbuseLogEntry>>,
    actions: DashMap<(String, ActionKind), Vec<ActionEvent>>,
    fingerprints: RwLock<Vec<DeviceFingerprint>>,
    checkins: DashMap<(String, String), Vec<CheckinRecord>>,
    profiles: DashMap<String, UserTrustProfile>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrustStore for MemoryStore {
    async fn append_abuse(&self, entry: &AbuseLogEntry) -> Result<(), StoreError> {
        self.abuse.write().await.push(entry.clone());
        Ok(())
    }

    async fn query_abuse(&self, query: &AbuseQuery) -> Result<Vec<AbuseLogEntry>, StoreError> {
        let abuse = self.abuse.read().await;
        let limit = query.limit.map(|l| l as usize).unwrap_or(DEFAULT_QUERY_LIMIT);

        let mut matched: Vec<AbuseLogEntry> = abuse
            .iter()
            .filter(|e| {
                query
                    .user_id
                    .as_deref()
                    .map(|u| e.user_id == u)
                    .unwrap_or(true)
                    && query
                        .abuse_type
                        .map(|t| e.abuse_type == t)
                        .unwrap_or(true)
                    && query.from.map(|f| e.created_at >= f).unwrap_or(true)
                    && query.to.map(|t| e.created_at <= t).unwrap_or(true)
            })
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn count_abuse(
        &self,
        user_id: &str,
        abuse_type: AbuseType,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let abuse = self.abuse.read().await;
        Ok(abuse
            .iter()
            .filter(|e| e.user_id == user_id && e.abuse_type == abuse_type && e.created_at >= since)
            .count() as u64)
    }

    async fn unresolved_abuse(&self, user_id: &str) -> Result<Vec<AbuseLogEntry>, StoreError> {
        let abuse = self.abuse.read().await;
        Ok(abuse
            .iter()
            .filter(|e| e.user_id == user_id && !e.resolved)
            .cloned()
            .collect())
    }

    async fn admit_action(
        &self,
        user_id: &str,
        action: ActionKind,
        content_hash: Option<&str>,
        max_count: u32,
        window: Duration,
    ) -> Result<ActionAdmission, StoreError> {
        let now = Utc::now();
        let cutoff = now - window;

        // Entry guard serializes concurrent admissions for this key.
        let mut entry = self
            .actions
            .entry((user_id.to_string(), action))
            .or_default();
        entry.retain(|e| e.at > cutoff);

        let recent_count = entry.len() as u64;
        let oldest_in_window = entry.iter().map(|e| e.at).min();
        let rate_limited = recent_count >= max_count as u64;
        let duplicate_content = match content_hash {
            Some(hash) => entry
                .iter()
                .any(|e| e.content_hash.as_deref() == Some(hash)),
            None => false,
        };
        let admitted = !rate_limited && !duplicate_content;

        if admitted {
            entry.push(ActionEvent {
                at: now,
                content_hash: content_hash.map(str::to_string),
            });
        }

        Ok(ActionAdmission {
            admitted,
            rate_limited,
            duplicate_content,
            recent_count,
            oldest_in_window,
        })
    }

    async fn record_action(&self, user_id: &str, action: ActionKind) -> Result<(), StoreError> {
        self.actions
            .entry((user_id.to_string(), action))
            .or_default()
            .push(ActionEvent {
                at: Utc::now(),
                content_hash: None,
            });
        Ok(())
    }

    async fn count_actions(
        &self,
        user_id: &str,
        action: ActionKind,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(self
            .actions
            .get(&(user_id.to_string(), action))
            .map(|events| events.iter().filter(|e| e.at >= since).count() as u64)
            .unwrap_or(0))
    }

    async fn insert_fingerprint(&self, fingerprint: &DeviceFingerprint) -> Result<(), StoreError> {
        self.fingerprints.write().await.push(fingerprint.clone());
        Ok(())
    }

    async fn get_fingerprint(
        &self,
        user_id: &str,
        hash: &str,
    ) -> Result<Option<DeviceFingerprint>, StoreError> {
        let fingerprints = self.fingerprints.read().await;
        Ok(fingerprints
            .iter()
            .find(|fp| fp.user_id == user_id && fp.hash == hash)
            .cloned())
    }

    async fn touch_fingerprint(
        &self,
        user_id: &str,
        hash: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut fingerprints = self.fingerprints.write().await;
        match fingerprints
            .iter_mut()
            .find(|fp| fp.user_id == user_id && fp.hash == hash)
        {
            Some(fp) => {
                fp.last_seen_at = seen_at;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!(
                "fingerprint {hash} for user {user_id}"
            ))),
        }
    }

    async fn fingerprints_by_hash(&self, hash: &str) -> Result<Vec<DeviceFingerprint>, StoreError> {
        let fingerprints = self.fingerprints.read().await;
        Ok(fingerprints
            .iter()
            .filter(|fp| fp.hash == hash)
            .cloned()
            .collect())
    }

    async fn fingerprints_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<DeviceFingerprint>, StoreError> {
        let fingerprints = self.fingerprints.read().await;
        Ok(fingerprints
            .iter()
            .filter(|fp| fp.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn set_device_flag(
        &self,
        hash: &str,
        flagged: bool,
        reason: Option<&str>,
    ) -> Result<u64, StoreError> {
        let mut fingerprints = self.fingerprints.write().await;
        let mut touched = 0;
        for fp in fingerprints.iter_mut().filter(|fp| fp.hash == hash) {
            fp.flagged = flagged;
            fp.flag_reason = reason.map(str::to_string);
            fp.is_trusted = !flagged && fp.trust_score >= DEVICE_TRUSTED_FLOOR;
            touched += 1;
        }
        Ok(touched)
    }

    async fn adjust_device_trust(&self, hash: &str, delta: i32) -> Result<i32, StoreError> {
        let mut fingerprints = self.fingerprints.write().await;
        let mut lowest: Option<i32> = None;
        for fp in fingerprints.iter_mut().filter(|fp| fp.hash == hash) {
            fp.trust_score = (fp.trust_score + delta).clamp(0, 100);
            fp.is_trusted = !fp.flagged && fp.trust_score >= DEVICE_TRUSTED_FLOOR;
            lowest = Some(lowest.map_or(fp.trust_score, |l| l.min(fp.trust_score)));
        }
        lowest.ok_or_else(|| StoreError::NotFound(format!("fingerprint {hash}")))
    }

    async fn flag_user_devices(
        &self,
        user_id: &str,
        reason: &str,
        keep_hash: Option<&str>,
    ) -> Result<u64, StoreError> {
        let mut fingerprints = self.fingerprints.write().await;
        let mut flagged = 0;
        for fp in fingerprints
            .iter_mut()
            .filter(|fp| fp.user_id == user_id && Some(fp.hash.as_str()) != keep_hash)
        {
            fp.flagged = true;
            fp.flag_reason = Some(reason.to_string());
            fp.is_trusted = false;
            flagged += 1;
        }
        Ok(flagged)
    }

    async fn insert_checkin(
        &self,
        record: &CheckinRecord,
        dedupe_window: Duration,
    ) -> Result<CheckinInsert, StoreError> {
        let cutoff = Utc::now() - dedupe_window;

        // Entry guard serializes concurrent check-ins for this key.
        let mut entry = self
            .checkins
            .entry((record.user_id.clone(), record.promotion_id.clone()))
            .or_default();

        if let Some(existing) = entry
            .iter()
            .filter(|r| r.checked_in_at > cutoff)
            .max_by_key(|r| r.checked_in_at)
        {
            return Ok(CheckinInsert::Duplicate {
                checked_in_at: existing.checked_in_at,
            });
        }

        entry.push(record.clone());
        Ok(CheckinInsert::Recorded)
    }

    async fn mark_reward_claimed(&self, record_id: &str) -> Result<(), StoreError> {
        for mut entry in self.checkins.iter_mut() {
            if let Some(record) = entry.value_mut().iter_mut().find(|r| r.id == record_id) {
                record.reward_claimed = true;
                return Ok(());
            }
        }
        Err(StoreError::NotFound(format!("checkin {record_id}")))
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserTrustProfile>, StoreError> {
        Ok(self.profiles.get(user_id).map(|p| p.clone()))
    }

    async fn upsert_profile(&self, profile: &UserTrustProfile) -> Result<(), StoreError> {
        self.profiles
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }
}
