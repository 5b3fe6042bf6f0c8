//! `TrustStore` implementation over the Postgres pool.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;

use crate::abuse::{AbuseLogEntry, AbuseQuery, AbuseSeverity, AbuseType};
use crate::checkin::{CheckinRecord, CheckinStatus};
use crate::fingerprint::{DeviceFingerprint, DEVICE_TRUSTED_FLOOR};
use crate::rate_limit::ActionKind;
use crate::store::{ActionAdmission, CheckinInsert, StoreError, TrustStore};
use crate::trust::UserTrustProfile;

use super::DatabasePool;

const DEFAULT_QUERY_LIMIT: i64 = 100;

/// Decode a string column into a serde string-enum (AbuseType etc).
fn decode_enum<T: serde::de::DeserializeOwned>(value: String) -> Result<T, StoreError> {
    Ok(serde_json::from_value(serde_json::Value::String(value))?)
}

fn row_to_abuse(row: &sqlx::postgres::PgRow) -> Result<AbuseLogEntry, StoreError> {
    let abuse_type: AbuseType = decode_enum(row.get::<String, _>("abuse_type"))?;
    let severity: AbuseSeverity = decode_enum(row.get::<String, _>("severity"))?;
    Ok(AbuseLogEntry {
        id: row.get("id"),
        user_id: row.get("user_id"),
        abuse_type,
        severity,
        details: row.get("details"),
        device_fingerprint: row.get("device_fingerprint"),
        created_at: row.get("created_at"),
        resolved: row.get("resolved"),
    })
}

fn row_to_fingerprint(row: &sqlx::postgres::PgRow) -> DeviceFingerprint {
    DeviceFingerprint {
        hash: row.get("hash"),
        user_id: row.get("user_id"),
        characteristics: row.get("characteristics"),
        trust_score: row.get("trust_score"),
        is_trusted: row.get("is_trusted"),
        flagged: row.get("flagged"),
        flag_reason: row.get("flag_reason"),
        first_seen_at: row.get("first_seen_at"),
        last_seen_at: row.get("last_seen_at"),
    }
}

#[async_trait]
impl TrustStore for DatabasePool {
    async fn append_abuse(&self, entry: &AbuseLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO trust.abuse_log
                (id, user_id, abuse_type, severity, details, device_fingerprint, created_at, resolved)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
        )
        .bind(&entry.id)
        .bind(&entry.user_id)
        .bind(entry.abuse_type.as_str())
        .bind(entry.severity.as_str())
        .bind(&entry.details)
        .bind(&entry.device_fingerprint)
        .bind(entry.created_at)
        .bind(entry.resolved)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn query_abuse(&self, query: &AbuseQuery) -> Result<Vec<AbuseLogEntry>, StoreError> {
        let limit = query.limit.map(|l| l as i64).unwrap_or(DEFAULT_QUERY_LIMIT);
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, abuse_type, severity, details, device_fingerprint, created_at, resolved
            FROM trust.abuse_log
            WHERE ($1::varchar IS NULL OR user_id = $1)
              AND ($2::varchar IS NULL OR abuse_type = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at <= $4)
            ORDER BY created_at DESC
            LIMIT $5
        "#,
        )
        .bind(query.user_id.as_deref())
        .bind(query.abuse_type.map(|t| t.as_str()))
        .bind(query.from)
        .bind(query.to)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_abuse).collect()
    }

    async fn count_abuse(
        &self,
        user_id: &str,
        abuse_type: AbuseType,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM trust.abuse_log
            WHERE user_id = $1 AND abuse_type = $2 AND created_at >= $3
        "#,
        )
        .bind(user_id)
        .bind(abuse_type.as_str())
        .bind(since)
        .fetch_one(self.pool())
        .await?;
        Ok(row.get::<i64, _>("total") as u64)
    }

    async fn unresolved_abuse(&self, user_id: &str) -> Result<Vec<AbuseLogEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, abuse_type, severity, details, device_fingerprint, created_at, resolved
            FROM trust.abuse_log
            WHERE user_id = $1 AND NOT resolved
        "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_abuse).collect()
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

        let mut tx = self.pool().begin().await?;

        // Advisory lock serializes concurrent admissions for this key.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("action:{}:{}", user_id, action.as_str()))
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS recent, MIN(created_at) AS oldest
            FROM trust.action_log
            WHERE user_id = $1 AND action = $2 AND created_at > $3
        "#,
        )
        .bind(user_id)
        .bind(action.as_str())
        .bind(cutoff)
        .fetch_one(&mut *tx)
        .await?;

        let recent_count = row.get::<i64, _>("recent") as u64;
        let oldest_in_window: Option<DateTime<Utc>> = row.get("oldest");
        let rate_limited = recent_count >= max_count as u64;

        let duplicate_content = match content_hash {
            Some(hash) => {
                let row = sqlx::query(
                    r#"
                    SELECT EXISTS(
                        SELECT 1 FROM trust.action_log
                        WHERE user_id = $1 AND action = $2 AND content_hash = $3 AND created_at > $4
                    ) AS dup
                "#,
                )
                .bind(user_id)
                .bind(action.as_str())
                .bind(hash)
                .bind(cutoff)
                .fetch_one(&mut *tx)
                .await?;
                row.get::<bool, _>("dup")
            }
            None => false,
        };

        let admitted = !rate_limited && !duplicate_content;
        if admitted {
            sqlx::query(
                r#"
                INSERT INTO trust.action_log (user_id, action, content_hash, created_at)
                VALUES ($1, $2, $3, $4)
            "#,
            )
            .bind(user_id)
            .bind(action.as_str())
            .bind(content_hash)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(ActionAdmission {
            admitted,
            rate_limited,
            duplicate_content,
            recent_count,
            oldest_in_window,
        })
    }

    async fn record_action(&self, user_id: &str, action: ActionKind) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO trust.action_log (user_id, action) VALUES ($1, $2)")
            .bind(user_id)
            .bind(action.as_str())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn count_actions(
        &self,
        user_id: &str,
        action: ActionKind,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM trust.action_log
            WHERE user_id = $1 AND action = $2 AND created_at >= $3
        "#,
        )
        .bind(user_id)
        .bind(action.as_str())
        .bind(since)
        .fetch_one(self.pool())
        .await?;
        Ok(row.get::<i64, _>("total") as u64)
    }

    async fn insert_fingerprint(&self, fingerprint: &DeviceFingerprint) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO trust.device_fingerprints
                (hash, user_id, characteristics, trust_score, is_trusted,
                 flagged, flag_reason, first_seen_at, last_seen_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
        )
        .bind(&fingerprint.hash)
        .bind(&fingerprint.user_id)
        .bind(&fingerprint.characteristics)
        .bind(fingerprint.trust_score)
        .bind(fingerprint.is_trusted)
        .bind(fingerprint.flagged)
        .bind(&fingerprint.flag_reason)
        .bind(fingerprint.first_seen_at)
        .bind(fingerprint.last_seen_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_fingerprint(
        &self,
        user_id: &str,
        hash: &str,
    ) -> Result<Option<DeviceFingerprint>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT hash, user_id, characteristics, trust_score, is_trusted,
                   flagged, flag_reason, first_seen_at, last_seen_at
            FROM trust.device_fingerprints
            WHERE user_id = $1 AND hash = $2
        "#,
        )
        .bind(user_id)
        .bind(hash)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.as_ref().map(row_to_fingerprint))
    }

    async fn touch_fingerprint(
        &self,
        user_id: &str,
        hash: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE trust.device_fingerprints SET last_seen_at = $3 WHERE user_id = $1 AND hash = $2",
        )
        .bind(user_id)
        .bind(hash)
        .bind(seen_at)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "fingerprint {hash} for user {user_id}"
            )));
        }
        Ok(())
    }

    async fn fingerprints_by_hash(&self, hash: &str) -> Result<Vec<DeviceFingerprint>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT hash, user_id, characteristics, trust_score, is_trusted,
                   flagged, flag_reason, first_seen_at, last_seen_at
            FROM trust.device_fingerprints
            WHERE hash = $1
        "#,
        )
        .bind(hash)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(row_to_fingerprint).collect())
    }

    async fn fingerprints_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<DeviceFingerprint>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT hash, user_id, characteristics, trust_score, is_trusted,
                   flagged, flag_reason, first_seen_at, last_seen_at
            FROM trust.device_fingerprints
            WHERE user_id = $1
        "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(row_to_fingerprint).collect())
    }

    async fn set_device_flag(
        &self,
        hash: &str,
        flagged: bool,
        reason: Option<&str>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE trust.device_fingerprints
            SET flagged = $2,
                flag_reason = $3,
                is_trusted = (NOT $2) AND trust_score >= $4
            WHERE hash = $1
        "#,
        )
        .bind(hash)
        .bind(flagged)
        .bind(reason)
        .bind(DEVICE_TRUSTED_FLOOR)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    async fn adjust_device_trust(&self, hash: &str, delta: i32) -> Result<i32, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE trust.device_fingerprints
            SET trust_score = GREATEST(0, LEAST(100, trust_score + $2)),
                is_trusted = (NOT flagged) AND GREATEST(0, LEAST(100, trust_score + $2)) >= $3
            WHERE hash = $1
            RETURNING trust_score
        "#,
        )
        .bind(hash)
        .bind(delta)
        .bind(DEVICE_TRUSTED_FLOOR)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| row.get::<i32, _>("trust_score"))
            .min()
            .ok_or_else(|| StoreError::NotFound(format!("fingerprint {hash}")))
    }

    async fn flag_user_devices(
        &self,
        user_id: &str,
        reason: &str,
        keep_hash: Option<&str>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE trust.device_fingerprints
            SET flagged = TRUE, flag_reason = $2, is_trusted = FALSE
            WHERE user_id = $1 AND ($3::varchar IS NULL OR hash <> $3)
        "#,
        )
        .bind(user_id)
        .bind(reason)
        .bind(keep_hash)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_checkin(
        &self,
        record: &CheckinRecord,
        dedupe_window: Duration,
    ) -> Result<CheckinInsert, StoreError> {
        let cutoff = Utc::now() - dedupe_window;

        let mut tx = self.pool().begin().await?;

        // Advisory lock serializes concurrent check-ins for this key.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("checkin:{}:{}", record.user_id, record.promotion_id))
            .execute(&mut *tx)
            .await?;

        let existing = sqlx::query(
            r#"
            SELECT checked_in_at
            FROM trust.checkins
            WHERE user_id = $1 AND promotion_id = $2 AND checked_in_at > $3
            ORDER BY checked_in_at DESC
            LIMIT 1
        "#,
        )
        .bind(&record.user_id)
        .bind(&record.promotion_id)
        .bind(cutoff)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            tx.commit().await?;
            return Ok(CheckinInsert::Duplicate {
                checked_in_at: row.get("checked_in_at"),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO trust.checkins
                (id, user_id, promotion_id, business_name,
                 target_lat, target_lng, user_lat, user_lng,
                 distance_meters, status, reward_amount, reward_type,
                 streak_day, streak_bonus, reward_claimed, checked_in_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.promotion_id)
        .bind(&record.business_name)
        .bind(record.target_lat)
        .bind(record.target_lng)
        .bind(record.user_lat)
        .bind(record.user_lng)
        .bind(record.distance_meters)
        .bind(match record.status {
            CheckinStatus::Verified => "verified",
            CheckinStatus::Failed => "failed",
        })
        .bind(record.reward_amount)
        .bind(&record.reward_type)
        .bind(record.streak_day as i32)
        .bind(record.streak_bonus as i32)
        .bind(record.reward_claimed)
        .bind(record.checked_in_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CheckinInsert::Recorded)
    }

    async fn mark_reward_claimed(&self, record_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE trust.checkins SET reward_claimed = TRUE WHERE id = $1")
            .bind(record_id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("checkin {record_id}")));
        }
        Ok(())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserTrustProfile>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, streak_days, longest_streak, last_active_date
            FROM trust.profiles
            WHERE user_id = $1
        "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|row| UserTrustProfile {
            user_id: row.get("user_id"),
            streak_days: row.get::<i32, _>("streak_days") as u32,
            longest_streak: row.get::<i32, _>("longest_streak") as u32,
            last_active_date: row.get("last_active_date"),
        }))
    }

    async fn upsert_profile(&self, profile: &UserTrustProfile) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO trust.profiles (user_id, streak_days, longest_streak, last_active_date)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE SET
                streak_days = EXCLUDED.streak_days,
                longest_streak = EXCLUDED.longest_streak,
                last_active_date = EXCLUDED.last_active_date
        "#,
        )
        .bind(&profile.user_id)
        .bind(profile.streak_days as i32)
        .bind(profile.longest_streak as i32)
        .bind(profile.last_active_date)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
