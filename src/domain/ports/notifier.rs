//! Notification port.
//!
//! Notifications are advisory, never authoritative: subscribers may react,
//! but queue state lives in the store alone.

use async_trait::async_trait;

/// Publishes advisory notifications about queue activity.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish on a repo-scoped channel (task created, approval resolved).
    async fn publish(&self, channel: &str, message: &str);

    /// Push to the external alert channel (task failures, rate limits).
    async fn alert(&self, subject: &str, body: &str);
}

/// Default notifier: structured log lines only.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, channel: &str, message: &str) {
        tracing::info!(channel = channel, "{message}");
    }

    async fn alert(&self, subject: &str, body: &str) {
        tracing::warn!(subject = subject, "{body}");
    }
}
