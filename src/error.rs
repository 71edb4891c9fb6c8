//! Error types for cache operations.

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the cache tiers, the backing store and the sync channel.
///
/// None of these are fatal: the public [`DistributedCache`](crate::DistributedCache)
/// surface logs them and reports a plain `false` / `None` to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Backing store unreachable, pool exhausted/broken, or AUTH/SELECT failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Value or sync message could not be marshalled.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Stored text or sync payload could not be unmarshalled.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// Backing store answered with something other than the expected reply.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Malformed construction-time configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// True for transient transport failures (the ones worth reconnecting on).
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::ConnectionError(_))
    }

    #[cfg(feature = "redis")]
    pub(crate) fn from_redis(connection_failure: bool, message: impl std::fmt::Display) -> Self {
        if connection_failure {
            Error::ConnectionError(message.to_string())
        } else {
            Error::ProtocolError(message.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ConnectionError("refused".to_string());
        assert_eq!(err.to_string(), "Connection error: refused");

        let err = Error::ProtocolError("unexpected reply".to_string());
        assert_eq!(err.to_string(), "Protocol error: unexpected reply");
    }

    #[test]
    fn test_is_connection() {
        assert!(Error::ConnectionError("x".to_string()).is_connection());
        assert!(!Error::SerializationError("x".to_string()).is_connection());
        assert!(!Error::ConfigError("x".to_string()).is_connection());
    }
}
