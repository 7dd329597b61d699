//! Sync-notification seam.
//!
//! Mutating operations tell the synchronisation layer what happened through
//! this trait. The service treats notification as advisory: a failing
//! notifier is logged and never propagates into the caller's result.

use async_trait::async_trait;

#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    /// Record a reason for the next sync cycle
    async fn notify(&self, reason: &str);
}

/// Notifier that drops every message. Used in tests and when no sync
/// manager is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl ChangeNotifier for NoopNotifier {
    async fn notify(&self, _reason: &str) {}
}

/// Notifier that records reasons to the log. The default for a standalone
/// server without an attached sync manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl ChangeNotifier for TracingNotifier {
    async fn notify(&self, reason: &str) {
        tracing::debug!(reason, "Sync notification");
    }
}
