//! Error taxonomy for a sync run
//!
//! `SyncError` covers run-level conditions (some fatal, some skip-and-log),
//! `RemoteError` covers a single call against the remote catalog and knows
//! whether it is worth retrying.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// A feed row is missing a required field. The row is skipped, the run continues.
    #[error("Malformed feed record at row {row}: {reason}")]
    MalformedRecord {
        row: usize,
        key: Option<String>,
        reason: String,
    },

    /// Rule configuration failed schema or consistency checks. Fatal.
    #[error("Rule configuration error: {message}")]
    Config { message: String },

    /// The remote snapshot could not be fetched. Fatal, no partial diffing.
    #[error("Remote snapshot query failed: {0}")]
    RemoteQuery(#[source] RemoteError),

    /// The same external key appeared twice in a set that must be keyed uniquely.
    #[error("Duplicate external key '{key}'")]
    DuplicateKey { key: String },

    /// The run was aborted before the requested stage could finish.
    #[error("Run aborted: {reason}")]
    Aborted { reason: String },
}

impl SyncError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn malformed(row: usize, key: Option<&str>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            row,
            key: key.map(ToString::to_string),
            reason: reason.into(),
        }
    }

    /// Fatal conditions stop the run before any mutation side effects begin.
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::MalformedRecord { .. } => false,
            Self::Config { .. }
            | Self::RemoteQuery(_)
            | Self::DuplicateKey { .. }
            | Self::Aborted { .. } => true,
        }
    }
}

/// How a failed remote call should be treated by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureClass {
    /// Retry with backoff (connectivity, throttling, overload)
    Transient,
    /// Record immediately, never retry (validation, rejection, auth)
    Permanent,
}

/// Failure of a single request against the remote catalog
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Connection error: {0}")]
    Connectivity(String),

    #[error("Throttled by remote (retry after {retry_after:?})")]
    Throttled { retry_after: Option<Duration> },

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Rejected by remote: {0}")]
    Rejected(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Unexpected response: {0}")]
    Protocol(String),
}

impl RemoteError {
    pub const fn failure_class(&self) -> FailureClass {
        match self {
            Self::Connectivity(_) | Self::Throttled { .. } | Self::Server { .. } => {
                FailureClass::Transient
            }
            Self::Rejected(_) | Self::Authentication(_) | Self::Protocol(_) => {
                FailureClass::Permanent
            }
        }
    }

    /// Authentication failures invalidate every later call, so the run stops scheduling.
    pub const fn aborts_run(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// Server-provided wait hint, if any
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_permanent_classes() {
        assert_eq!(
            RemoteError::Connectivity("reset".into()).failure_class(),
            FailureClass::Transient
        );
        assert_eq!(
            RemoteError::Throttled { retry_after: None }.failure_class(),
            FailureClass::Transient
        );
        assert_eq!(
            RemoteError::Server {
                status: 503,
                message: "busy".into()
            }
            .failure_class(),
            FailureClass::Transient
        );
        assert_eq!(
            RemoteError::Rejected("title blank".into()).failure_class(),
            FailureClass::Permanent
        );
        assert_eq!(
            RemoteError::Authentication("401".into()).failure_class(),
            FailureClass::Permanent
        );
    }

    #[test]
    fn only_authentication_aborts_run() {
        assert!(RemoteError::Authentication("bad token".into()).aborts_run());
        assert!(!RemoteError::Rejected("nope".into()).aborts_run());
        assert!(!RemoteError::Connectivity("down".into()).aborts_run());
    }

    #[test]
    fn malformed_record_is_not_fatal() {
        assert!(!SyncError::malformed(3, Some("SKU1"), "missing price").is_fatal());
        assert!(SyncError::config("duplicate handle").is_fatal());
    }
}
