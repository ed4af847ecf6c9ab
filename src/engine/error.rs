//! Engine error taxonomy.
//!
//! Every driver failure is mapped onto one of these variants so the façade
//! can tell a configuration mistake from a transient network failure, an
//! authentication problem, or an operation the engine simply does not have.
//! Engine-rejected operations keep the server's native error text verbatim.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed or unrecognized configuration (unknown engine tag, bad
    /// filter spec, missing required field). Never retried.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Host unreachable, refused, or the transport dropped mid-operation.
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    /// The server rejected the credentials.
    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    /// A session-scoped call arrived for a session that is not live.
    #[error("Not connected: {message}")]
    NotConnected { message: String },

    /// The operation is not meaningful for this engine (e.g. foreign keys
    /// on Redis) or this server version.
    #[error("Not supported: {message}")]
    NotSupported { message: String },

    /// The engine accepted the request and refused it: constraint violation,
    /// syntax error, missing unique index. The native diagnostic is preserved.
    #[error("{message}")]
    Rejected { message: String },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("SSH tunnel error: {message}")]
    Ssh { message: String },

    #[error("TLS error: {message}")]
    Tls { message: String },

    #[error("Query cancelled")]
    Cancelled,
}

/// Coarse classification exposed at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Connectivity,
    Authentication,
    NotConnected,
    Unsupported,
    Rejected,
    Timeout,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::Authentication => "authentication",
            ErrorKind::NotConnected => "not_connected",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl EngineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: message.into() }
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthFailed { message: message.into() }
    }

    pub fn not_connected(message: impl Into<String>) -> Self {
        Self::NotConnected { message: message.into() }
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::NotSupported { message: message.into() }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected { message: message.into() }
    }

    pub fn ssh(message: impl Into<String>) -> Self {
        Self::Ssh { message: message.into() }
    }

    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls { message: message.into() }
    }

    /// No live session for the given id.
    pub fn session_not_found(session: impl std::fmt::Display) -> Self {
        Self::NotConnected {
            message: format!("no live session {}", session),
        }
    }

    /// Unknown engine tag or a driver missing from the registry.
    pub fn driver_not_found(engine: impl std::fmt::Display) -> Self {
        Self::Configuration {
            message: format!("no driver registered for engine '{}'", engine),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Configuration { .. } => ErrorKind::Configuration,
            EngineError::ConnectionFailed { .. }
            | EngineError::Ssh { .. }
            | EngineError::Tls { .. } => ErrorKind::Connectivity,
            EngineError::AuthFailed { .. } => ErrorKind::Authentication,
            EngineError::NotConnected { .. } => ErrorKind::NotConnected,
            EngineError::NotSupported { .. } => ErrorKind::Unsupported,
            EngineError::Rejected { .. } => ErrorKind::Rejected,
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether a caller-initiated retry could plausibly succeed without a
    /// config change. The core itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connectivity | ErrorKind::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_is_distinguishable_from_connectivity() {
        let unsupported = EngineError::not_supported("foreign keys");
        let refused = EngineError::connection_failed("connection refused");

        assert_eq!(unsupported.kind(), ErrorKind::Unsupported);
        assert_eq!(refused.kind(), ErrorKind::Connectivity);
        assert!(!unsupported.is_retryable());
        assert!(refused.is_retryable());
    }

    #[test]
    fn rejected_preserves_native_text() {
        let native = "ERROR:  cannot refresh materialized view \"mv\" concurrently";
        let err = EngineError::rejected(native);
        assert_eq!(err.to_string(), native);
    }

    #[test]
    fn configuration_errors_never_retry() {
        let err = EngineError::driver_not_found("oracle");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!err.is_retryable());
    }
}
