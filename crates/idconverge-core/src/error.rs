// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for idconverge-core.
//!
//! Only external failures are errors. A unit that is not ready to act, or a
//! backend that is too old to support a feature, is reported as a value in the
//! dispatch report instead (see [`crate::engine::Deferral`] and
//! [`crate::engine::Incapability`]).

use std::fmt;

/// Result type using ConvergeError
pub type Result<T> = std::result::Result<T, ConvergeError>;

/// Errors that propagate to the hosting runtime.
///
/// The runtime is expected to mark the unit degraded and re-deliver the whole
/// event later; the engine never retries internally.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ConvergeError {
    /// A coordinator-only operation was attempted by a non-coordinator.
    NotCoordinator {
        /// The operation that was refused.
        operation: String,
    },

    /// The schema migration call failed.
    MigrationFailed {
        /// Error details reported by the migration tool.
        reason: String,
    },

    /// A service control call failed.
    ServiceControlFailed {
        /// The service that was being controlled.
        service: String,
        /// The action that failed (restart, stop, start, pause).
        action: String,
        /// Error details.
        reason: String,
    },

    /// The identity backend rejected or failed a request.
    BackendFailed {
        /// The backend operation that failed.
        operation: String,
        /// Error details.
        reason: String,
    },

    /// A relation write could not be committed.
    RelationWriteFailed {
        /// The relation id being written.
        relation_id: String,
        /// The reason for failure.
        reason: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Durable local store operation failed.
    StoreError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl ConvergeError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotCoordinator { .. } => "NOT_COORDINATOR",
            Self::MigrationFailed { .. } => "MIGRATION_FAILED",
            Self::ServiceControlFailed { .. } => "SERVICE_CONTROL_FAILED",
            Self::BackendFailed { .. } => "BACKEND_FAILED",
            Self::RelationWriteFailed { .. } => "RELATION_WRITE_FAILED",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::StoreError { .. } => "STORE_ERROR",
        }
    }

    /// Shorthand for a backend failure.
    pub fn backend(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::BackendFailed {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for ConvergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCoordinator { operation } => {
                write!(f, "'{}' requires the elected coordinator", operation)
            }
            Self::MigrationFailed { reason } => {
                write!(f, "Schema migration failed: {}", reason)
            }
            Self::ServiceControlFailed {
                service,
                action,
                reason,
            } => {
                write!(f, "Failed to {} service '{}': {}", action, service, reason)
            }
            Self::BackendFailed { operation, reason } => {
                write!(f, "Identity backend error during '{}': {}", operation, reason)
            }
            Self::RelationWriteFailed {
                relation_id,
                reason,
            } => {
                write!(
                    f,
                    "Failed to write relation data for '{}': {}",
                    relation_id, reason
                )
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::StoreError { operation, details } => {
                write!(f, "Local store error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for ConvergeError {}

impl From<sqlx::Error> for ConvergeError {
    fn from(err: sqlx::Error) -> Self {
        ConvergeError::StoreError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ConvergeError {
    fn from(err: serde_json::Error) -> Self {
        ConvergeError::ValidationError {
            field: "json".to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let test_cases = vec![
            (
                ConvergeError::NotCoordinator {
                    operation: "coordinator_set".to_string(),
                },
                "NOT_COORDINATOR",
            ),
            (
                ConvergeError::MigrationFailed {
                    reason: "lock timeout".to_string(),
                },
                "MIGRATION_FAILED",
            ),
            (
                ConvergeError::ServiceControlFailed {
                    service: "haproxy".to_string(),
                    action: "restart".to_string(),
                    reason: "exit 1".to_string(),
                },
                "SERVICE_CONTROL_FAILED",
            ),
            (
                ConvergeError::backend("create_domain", "409 conflict"),
                "BACKEND_FAILED",
            ),
            (
                ConvergeError::RelationWriteFailed {
                    relation_id: "ha:3".to_string(),
                    reason: "relation departed".to_string(),
                },
                "RELATION_WRITE_FAILED",
            ),
            (
                ConvergeError::ValidationError {
                    field: "relation_id".to_string(),
                    message: "missing ':'".to_string(),
                },
                "VALIDATION_ERROR",
            ),
            (
                ConvergeError::StoreError {
                    operation: "flush".to_string(),
                    details: "disk full".to_string(),
                },
                "STORE_ERROR",
            ),
        ];

        for (error, expected_code) in test_cases {
            assert_eq!(
                error.error_code(),
                expected_code,
                "Error {:?} should have code {}",
                error,
                expected_code
            );
            assert!(!error.to_string().is_empty(), "Message should not be empty");
        }
    }

    #[test]
    fn test_error_display() {
        let err = ConvergeError::NotCoordinator {
            operation: "coordinator_set".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "'coordinator_set' requires the elected coordinator"
        );

        let err = ConvergeError::ServiceControlFailed {
            service: "apache2".to_string(),
            action: "restart".to_string(),
            reason: "unit masked".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to restart service 'apache2': unit masked"
        );

        let err = ConvergeError::StoreError {
            operation: "flush".to_string(),
            details: "database is locked".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Local store error during 'flush': database is locked"
        );
    }

    #[test]
    fn test_from_serde_json_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ConvergeError = parse_err.into();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }
}
