//! Trustgate
//!
//! Trust and abuse mitigation engine for the Lumera rewards app: device
//! fingerprinting, rate limiting, reward-attempt anti-cheat, geofenced
//! check-ins, trust scoring, and session lockdown behind one HTTP surface.
//!
//! ## Module Structure
//!
//! ```text
//! trustgate/src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── main.rs        - Server entrypoint
//! ├── config.rs      - Environment-driven configuration
//! ├── error.rs       - Engine error taxonomy
//! ├── abuse/         - Append-only abuse log
//! ├── fingerprint/   - Device fingerprint registry
//! │   └── registry.rs - Registration & duplicate-device detection
//! ├── rate_limit/    - Sliding-window rate limiter & duplicate content
//! ├── reward/        - Reward-attempt anti-cheat scoring
//! ├── checkin/       - Geofenced check-in verification
//! │   ├── geo.rs      - Haversine distance
//! │   ├── streak.rs   - Consecutive-day streak bonuses
//! │   └── verifier.rs - Verification flow
//! ├── trust/         - Derived trust score & reward multiplier
//! ├── session/       - Session validation & account lockdown
//! ├── store/         - TrustStore trait + in-memory implementation
//! ├── database/      - PostgreSQL TrustStore
//! ├── ledger.rs      - External coin-ledger seam
//! ├── notify.rs      - External notification seam
//! └── api/           - HTTP API endpoints
//! ```

pub mod abuse;
pub mod api;
pub mod checkin;
pub mod config;
pub mod database;
pub mod error;
pub mod fingerprint;
pub mod ledger;
pub mod notify;
pub mod rate_limit;
pub mod reward;
pub mod session;
pub mod store;
pub mod trust;

// Re-export main types for convenience
pub use abuse::{AbuseLog, AbuseLogEntry, AbuseQuery, AbuseSeverity, AbuseType};
pub use api::{create_router, EngineState};
pub use checkin::{
    CheckinOutcome, CheckinRecord, CheckinRequest, CheckinStatus, CheckinVerifier,
};
pub use config::EngineConfig;
pub use database::DatabasePool;
pub use error::EngineError;
pub use fingerprint::{
    DeviceCharacteristics, DeviceFingerprint, DeviceRegistry, DuplicateCheck, Registration,
};
pub use ledger::{CoinLedger, NullLedger};
pub use notify::{Notifier, NullNotifier};
pub use rate_limit::{ActionKind, RateLimitConfig, RateLimitDecision, RateLimitPolicy, RateLimiter};
pub use reward::{AttemptAssessment, AttemptFlag, AttemptValidator};
pub use session::{SessionCheck, SessionEnforcer, SessionPolicy, SessionStatus, SuspiciousReport};
pub use store::{MemoryStore, StoreError, TrustStore};
pub use trust::{TrustAggregator, TrustSnapshot, UserTrustProfile};
