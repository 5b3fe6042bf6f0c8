//! External notification collaborator
//!
//! Account lock, forced logout, and verification events notify the user
//! through this seam. Delivery is fire-and-forget from the engine's
//! perspective: failures are logged, never propagated.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, title: &str, body: &str, data: serde_json::Value);
}

/// Wiring default when no push provider is configured.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, user_id: &str, title: &str, _body: &str, _data: serde_json::Value) {
        tracing::debug!(user_id = %user_id, title = %title, "notification (null)");
    }
}

/// Test double that records every notification.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: &str, title: &str, _body: &str, _data: serde_json::Value) {
        self.sent
            .lock()
            .await
            .push((user_id.to_string(), title.to_string()));
    }
}
