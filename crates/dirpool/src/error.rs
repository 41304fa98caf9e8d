//! Error types for the directory connection pool.

use thiserror::Error;

use crate::connector::ConnectorInfo;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors reported by a directory connection or its factory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("server unreachable: {0}")]
    Unreachable(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("no such object: {0}")]
    NoSuchObject(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("local state error: {0}")]
    LocalState(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl DirectoryError {
    /// Connectivity-class failures that may succeed on another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DirectoryError::Unreachable(_)
                | DirectoryError::Timeout(_)
                | DirectoryError::NoSuchObject(_)
        )
    }
}

/// Errors surfaced by [`ConnectionManager`](crate::ConnectionManager) to its callers.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Capacity reached and no idle connector could be freed in time.
    #[error("maximum connections reached for {endpoints}")]
    Exhausted { endpoints: String },

    /// Rejected credentials or a transient connectivity failure that
    /// outlasted every endpoint.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Any other failure while establishing a connector.
    #[error("backend error: {message}")]
    Backend {
        message: String,
        /// State of the partially built connector, if one got that far.
        backend: Option<ConnectorInfo>,
    },
}

impl PoolError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, PoolError::Exhausted { .. })
    }

    pub fn is_invalid_credentials(&self) -> bool {
        matches!(
            self,
            PoolError::Directory(DirectoryError::InvalidCredentials)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(DirectoryError::Unreachable("ldap://a".into()).is_transient());
        assert!(DirectoryError::Timeout("bind".into()).is_transient());
        assert!(DirectoryError::NoSuchObject("ou=x".into()).is_transient());
        assert!(!DirectoryError::InvalidCredentials.is_transient());
        assert!(!DirectoryError::LocalState("tls".into()).is_transient());
        assert!(!DirectoryError::Protocol("busy".into()).is_transient());
    }

    #[test]
    fn directory_error_converts_into_pool_error() {
        let err: PoolError = DirectoryError::InvalidCredentials.into();
        assert!(err.is_invalid_credentials());
        assert!(!err.is_exhausted());
        assert_eq!(err.to_string(), "invalid credentials");
    }

    #[test]
    fn exhausted_message_names_endpoints() {
        let err = PoolError::Exhausted {
            endpoints: "ldap://a,ldap://b".to_string(),
        };
        assert!(err.is_exhausted());
        assert!(err.to_string().contains("ldap://a,ldap://b"));
    }
}
