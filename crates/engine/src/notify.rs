use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use common::Notifier;

/// Fire-and-forget webhook notifier. Trade notifications are posted as a
/// small JSON payload; delivery failures are logged and dropped so a dead
/// webhook never stalls a trading cycle.
pub struct WebhookNotifier {
    url: String,
    http: Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: Client::builder()
                .use_rustls_tls()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, subject: &str, body: &str) {
        let payload = serde_json::json!({ "subject": subject, "body": body });
        match self.http.post(&self.url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(subject, "notification delivered");
            }
            Ok(resp) => {
                warn!(subject, status = %resp.status(), "notification refused");
            }
            Err(e) => {
                warn!(subject, error = %e, "notification failed");
            }
        }
    }
}
