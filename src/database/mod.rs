//! PostgreSQL Database Module
//!
//! Durable `TrustStore` backend. The two atomic check-then-insert operations
//! (`admit_action`, `insert_checkin`) run inside transactions holding a
//! `pg_advisory_xact_lock` on their logical key, which serializes concurrent
//! requests for the same key across every replica of this service.

pub mod pool;

mod store;

pub use pool::DatabasePool;
