//! Database Connection Pool using sqlx

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::store::StoreError;

pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    pub async fn new(connection_string: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(connection_string)
            .await?;

        info!("Connected to PostgreSQL");

        Ok(Self { pool })
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        info!("Initializing database schema...");

        sqlx::query("CREATE SCHEMA IF NOT EXISTS trust")
            .execute(&self.pool)
            .await?;

        // Abuse log: append-only, entries immutable once written
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trust.abuse_log (
                id VARCHAR(255) PRIMARY KEY,
                user_id VARCHAR(255) NOT NULL,
                abuse_type VARCHAR(50) NOT NULL,
                severity VARCHAR(20) NOT NULL,
                details JSONB NOT NULL,
                device_fingerprint VARCHAR(64),
                created_at TIMESTAMP WITH TIME ZONE NOT NULL,
                resolved BOOLEAN NOT NULL DEFAULT FALSE
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        // Action log: rate-limit windows are derived from this table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trust.action_log (
                id BIGSERIAL PRIMARY KEY,
                user_id VARCHAR(255) NOT NULL,
                action VARCHAR(50) NOT NULL,
                content_hash VARCHAR(64),
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        // Device fingerprints: one row per (device, user) pair
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trust.device_fingerprints (
                hash VARCHAR(64) NOT NULL,
                user_id VARCHAR(255) NOT NULL,
                characteristics JSONB NOT NULL,
                trust_score INTEGER NOT NULL,
                is_trusted BOOLEAN NOT NULL,
                flagged BOOLEAN NOT NULL DEFAULT FALSE,
                flag_reason TEXT,
                first_seen_at TIMESTAMP WITH TIME ZONE NOT NULL,
                last_seen_at TIMESTAMP WITH TIME ZONE NOT NULL,
                PRIMARY KEY (hash, user_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        // Check-ins: both verified and failed attempts are kept
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trust.checkins (
                id VARCHAR(255) PRIMARY KEY,
                user_id VARCHAR(255) NOT NULL,
                promotion_id VARCHAR(255) NOT NULL,
                business_name TEXT NOT NULL,
                target_lat DOUBLE PRECISION NOT NULL,
                target_lng DOUBLE PRECISION NOT NULL,
                user_lat DOUBLE PRECISION NOT NULL,
                user_lng DOUBLE PRECISION NOT NULL,
                distance_meters DOUBLE PRECISION NOT NULL,
                status VARCHAR(20) NOT NULL,
                reward_amount BIGINT,
                reward_type VARCHAR(50) NOT NULL,
                streak_day INTEGER NOT NULL,
                streak_bonus INTEGER NOT NULL,
                reward_claimed BOOLEAN NOT NULL DEFAULT FALSE,
                checked_in_at TIMESTAMP WITH TIME ZONE NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        // Trust profiles: streak state only, trust score is derived
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trust.profiles (
                user_id VARCHAR(255) PRIMARY KEY,
                streak_days INTEGER NOT NULL DEFAULT 0,
                longest_streak INTEGER NOT NULL DEFAULT 0,
                last_active_date DATE
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes for the hot query paths
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_abuse_log_user_created ON trust.abuse_log(user_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_abuse_log_user_type ON trust.abuse_log(user_id, abuse_type, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_abuse_log_unresolved ON trust.abuse_log(user_id) WHERE NOT resolved",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_action_log_window ON trust.action_log(user_id, action, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_fingerprints_user ON trust.device_fingerprints(user_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_checkins_dedupe ON trust.checkins(user_id, promotion_id, checked_in_at)",
        )
        .execute(&self.pool)
        .await?;

        info!("Database schema initialized");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
