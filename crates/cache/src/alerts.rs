//! Shared channel for user-facing cache diagnostics
//!
//! Tiers downgrade per-item failures to alerts instead of errors. Alerts are
//! mirrored to `tracing` as they arrive and accumulate until the caller drains
//! them after a batch.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

/// How loudly an alert should be surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational, e.g. working offline
    Info,
    /// Something was skipped that the user may want to look at
    Warning,
}

/// A single user-facing diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    /// Severity of the alert
    pub severity: AlertSeverity,
    /// Human-readable message
    pub message: String,
}

/// Cloneable handle to a shared alert buffer
#[derive(Debug, Clone, Default)]
pub struct Alerts {
    inner: Arc<Mutex<Vec<Alert>>>,
}

impl Alerts {
    /// Create an empty alert channel
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning
    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(target: "artifex::alerts", "{message}");
        self.push(AlertSeverity::Warning, message);
    }

    /// Record an informational alert
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(target: "artifex::alerts", "{message}");
        self.push(AlertSeverity::Info, message);
    }

    /// Drain every alert recorded so far
    #[must_use]
    pub fn take(&self) -> Vec<Alert> {
        std::mem::take(&mut *self.inner.lock())
    }

    /// Messages of the warnings currently buffered, without draining
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.inner
            .lock()
            .iter()
            .filter(|a| a.severity == AlertSeverity::Warning)
            .map(|a| a.message.clone())
            .collect()
    }

    /// Every alert currently buffered, without draining
    #[must_use]
    pub fn snapshot(&self) -> Vec<Alert> {
        self.inner.lock().clone()
    }

    /// Whether nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    fn push(&self, severity: AlertSeverity, message: String) {
        self.inner.lock().push(Alert { severity, message });
    }
}
