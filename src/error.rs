//! Error types for the avatar core.

use crate::credentials::CredentialError;

/// Top-level error type for the avatar face and voice session.
#[derive(Debug, thiserror::Error)]
pub enum AvatarError {
    /// Character model asset could not be read or lacks a required mesh.
    #[error("asset error: {0}")]
    Asset(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Credential lookup, minting or validation error.
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Realtime voice session error (connect, transport, remote error event).
    #[error("session error: {0}")]
    Session(String),

    /// Speech driver error (synthesis failure, rejected request).
    #[error("speech error: {0}")]
    Speech(String),

    /// Lip-sync data could not be parsed or analysed.
    #[error("lip-sync error: {0}")]
    LipSync(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AvatarError>;
