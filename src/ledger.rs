//! External balance-ledger collaborator
//!
//! The engine never owns balance storage; a successful reward check calls out
//! through this seam and the hosting service supplies the real client.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::EngineError;

#[async_trait]
pub trait CoinLedger: Send + Sync {
    async fn credit(&self, user_id: &str, coin_type: &str, amount: i64)
        -> Result<(), EngineError>;
}

/// Wiring default when no ledger is configured; logs and succeeds.
pub struct NullLedger;

#[async_trait]
impl CoinLedger for NullLedger {
    async fn credit(
        &self,
        user_id: &str,
        coin_type: &str,
        amount: i64,
    ) -> Result<(), EngineError> {
        tracing::debug!(user_id = %user_id, coin_type = %coin_type, amount, "ledger credit (null)");
        Ok(())
    }
}

/// Test double that records every credit.
#[derive(Default)]
pub struct RecordingLedger {
    pub credits: Arc<Mutex<Vec<(String, String, i64)>>>,
}

#[async_trait]
impl CoinLedger for RecordingLedger {
    async fn credit(
        &self,
        user_id: &str,
        coin_type: &str,
        amount: i64,
    ) -> Result<(), EngineError> {
        self.credits
            .lock()
            .await
            .push((user_id.to_string(), coin_type.to_string(), amount));
        Ok(())
    }
}
