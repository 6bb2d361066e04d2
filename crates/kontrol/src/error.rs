/// Registry errors returned to callers.
///
/// Messages are safe to hand to remote peers: storage failures are collapsed
/// into `Internal` after being logged server-side.
#[derive(Debug, thiserror::Error)]
pub enum KontrolError {
    #[error("validation error: {reason}")]
    Validation { reason: String },

    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("authentication error: {reason}")]
    Auth { reason: String },

    #[error("internal error - {context}")]
    Internal { context: &'static str },

    #[error("query matches more than one kite ({matches})")]
    AmbiguousQuery { matches: usize },

    #[error("token error: {0}")]
    Token(#[from] TokenError),
}

impl KontrolError {
    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        KontrolError::Validation {
            reason: reason.into(),
        }
    }

    pub(crate) fn auth(reason: impl Into<String>) -> Self {
        KontrolError::Auth {
            reason: reason.into(),
        }
    }

    /// Whether the caller sent something malformed (as opposed to a server fault).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            KontrolError::Validation { .. } | KontrolError::InvalidQuery { .. }
        )
    }
}

/// Errors raised by a [`Storage`](crate::storage::Storage) backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("key not found: {key}")]
    NotFound { key: String },

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors raised while signing or verifying tokens.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("signing failed: {0}")]
    Signing(String),

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token signature verification failed")]
    InvalidSignature,

    #[error("token expired")]
    Expired,
}

impl From<rmp_serde::encode::Error> for TokenError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        TokenError::Signing(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for TokenError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        TokenError::Malformed(e.to_string())
    }
}

/// Rejected registry configuration. Raised once by
/// [`Kontrol::new`](crate::Kontrol::new), never by a request, so it is kept
/// out of [`KontrolError`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("record ttl {ttl:?} must exceed heartbeat window {window:?}")]
    TtlShorterThanHeartbeatWindow {
        ttl: std::time::Duration,
        window: std::time::Duration,
    },

    #[error("record ttl {ttl:?} must exceed update interval {update:?}")]
    TtlShorterThanUpdateInterval {
        ttl: std::time::Duration,
        update: std::time::Duration,
    },

    #[error("heartbeat interval {interval:?} is below one second")]
    HeartbeatIntervalTooShort { interval: std::time::Duration },

    #[error("{field} must be non-zero")]
    ZeroDuration { field: &'static str },

    #[error("issuer username must not be empty")]
    EmptyIssuer,
}
