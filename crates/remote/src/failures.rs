//! Classification of per-item remote failures into user-facing alerts
//!
//! Failures are collected for a whole batch and flushed once, so an expired
//! token produces one warning naming every affected item rather than one
//! warning per item.

use crate::error::RemoteError;
use artifex_cache::{Alerts, CacheStorableItem};
use tracing::debug;

/// Which half of the protocol a batch ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Downloading artifacts
    Fetch,
    /// Uploading artifacts
    Store,
}

/// Failure classes with distinct handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Not in the remote cache; silent
    NotFound,
    /// Credential rejected or not allowed
    Unauthorized,
    /// Plan limits reached
    PaymentRequired,
    /// The server could not be reached
    Offline,
    /// The payload is not a recognized artifact
    InvalidArtifact,
    /// Anything else, including server errors after retries
    Unexpected,
}

impl FailureClass {
    /// Classify `error`, looking through retry exhaustion
    #[must_use]
    pub fn of(error: &RemoteError) -> Self {
        match error.root() {
            RemoteError::NotFound { .. } => Self::NotFound,
            RemoteError::Unauthorized { .. } | RemoteError::Forbidden { .. } => Self::Unauthorized,
            RemoteError::PaymentRequired { .. } => Self::PaymentRequired,
            RemoteError::ConnectionFailed { .. } => Self::Offline,
            RemoteError::InvalidArtifact { .. } => Self::InvalidArtifact,
            RemoteError::ObjectStorage { .. } => Self::Unexpected,
            other => match other.status() {
                Some(401 | 403) => Self::Unauthorized,
                Some(402) => Self::PaymentRequired,
                _ => Self::Unexpected,
            },
        }
    }
}

/// Failures accumulated over one batch
#[derive(Debug)]
pub struct FailureReport {
    direction: Direction,
    unauthorized: Vec<String>,
    payment_required: Vec<String>,
    offline: Vec<String>,
    invalid: Vec<String>,
    unexpected: Vec<(String, String)>,
}

impl FailureReport {
    /// An empty report for a batch running in `direction`
    #[must_use]
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            unauthorized: Vec::new(),
            payment_required: Vec::new(),
            offline: Vec::new(),
            invalid: Vec::new(),
            unexpected: Vec::new(),
        }
    }

    /// Record the failure of `item`
    pub fn record(&mut self, item: &CacheStorableItem, error: &RemoteError) {
        let name = item.name.clone();
        match FailureClass::of(error) {
            FailureClass::NotFound => {
                debug!(item = %item.name, hash = %item.hash, "Not in the remote cache");
            }
            FailureClass::Unauthorized => self.unauthorized.push(name),
            FailureClass::PaymentRequired => self.payment_required.push(name),
            FailureClass::Offline => self.offline.push(name),
            FailureClass::InvalidArtifact => {
                let reason = match error.root() {
                    RemoteError::InvalidArtifact { reason } => reason.clone(),
                    other => other.to_string(),
                };
                self.invalid.push(format!("{name} ({reason})"));
            }
            FailureClass::Unexpected => {
                let message = match self.direction {
                    Direction::Fetch => format!(
                        "Fetching {name} with hash {} was skipped due to unexpected error: {error}",
                        item.hash
                    ),
                    Direction::Store => format!(
                        "Failed to upload {name} with hash {} due to unexpected error: {error}",
                        item.hash
                    ),
                };
                self.unexpected.push((name, message));
            }
        }
    }

    /// Whether nothing user-visible was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unauthorized.is_empty()
            && self.payment_required.is_empty()
            && self.offline.is_empty()
            && self.invalid.is_empty()
            && self.unexpected.is_empty()
    }

    /// Emit one alert per class, plus one per unexpected failure
    pub fn flush(mut self, alerts: &Alerts) {
        let fetch = self.direction == Direction::Fetch;

        if let Some(names) = joined(&mut self.unauthorized) {
            alerts.warning(if fetch {
                format!("Authentication failed. Unable to retrieve the following cached artifacts: {names}")
            } else {
                format!("Authentication failed. Unable to upload the following artifacts: {names}")
            });
        }
        if let Some(names) = joined(&mut self.payment_required) {
            alerts.warning(if fetch {
                format!(
                    "Your subscription limits have been reached. Unable to retrieve the following cached artifacts: {names}"
                )
            } else {
                format!(
                    "Your subscription limits have been reached. Unable to upload the following artifacts: {names}"
                )
            });
        }
        if let Some(names) = joined(&mut self.offline) {
            alerts.info(if fetch {
                format!("The network is unreachable. The following cached artifacts remain out of grasp: {names}")
            } else {
                format!("The network is unreachable. The following artifacts could not be uploaded: {names}")
            });
        }
        if let Some(names) = joined(&mut self.invalid) {
            alerts.warning(format!(
                "The following artifacts were skipped because they are not valid cache artifacts: {names}"
            ));
        }

        self.unexpected.sort();
        for (_, message) in self.unexpected {
            alerts.warning(message);
        }
    }
}

fn joined(names: &mut Vec<String>) -> Option<String> {
    if names.is_empty() {
        return None;
    }
    names.sort();
    Some(names.join(", "))
}
