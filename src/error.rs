use thiserror::Error;

/// Every error the protocol engine can encounter.
///
/// Per the protocol's silent-failure property, none of these ever reach a
/// peer: [`crate::engine::SantiagoEngine::incoming_request`] and
/// [`crate::engine::SantiagoEngine::query`] swallow every variant after
/// logging it. The taxonomy still matters internally — callers of the
/// directory store and envelope codec match on specific variants to decide
/// whether to log at `warn!` (policy violations worth an operator's
/// attention) or `debug!` (routine, expected drops).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SantiagoError {
    /// Decryption failed, the envelope was unsigned, or the payload did not
    /// parse as a well-formed inner record.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// The immediate sender or the stated client/host is not someone we are
    /// willing to host a service for.
    #[error("policy denied: {0}")]
    PolicyDenied(String),

    /// No overlap between our supported protocol versions and the peer's,
    /// or the peer's `request_version` is one we don't understand.
    #[error("version mismatch: {0}")]
    VersionMismatch(String),

    /// No sender is registered for a location's scheme.
    #[error("unknown transport: {0}")]
    UnknownTransport(String),

    /// The crypto oracle failed to sign, verify, encrypt, or decrypt.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Transport I/O failure while sending an envelope.
    #[error("io error: {0}")]
    Io(String),

    /// Serialization or deserialization of the inner record failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SantiagoError {
    fn from(e: serde_json::Error) -> Self {
        SantiagoError::Serialization(e.to_string())
    }
}
