//! Error types for the arbitration engine.
//!
//! Only failures that have somewhere to go are represented here. Malformed
//! requests from anonymous originators are dropped at admission (see
//! [`MalformedRequest`]) and duplicate release signals are absorbed by the
//! gate, so neither shows up in [`ArbiterError`].

use thiserror::Error;

pub type ArbiterResult<T> = Result<T, ArbiterError>;

/// Crate-level error.
#[derive(Debug, Error)]
pub enum ArbiterError {
    #[error("wallet call failed: {0}")]
    Wallet(String),
    #[error("host window call failed: {0}")]
    Host(String),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("arbitration engine is shut down")]
    EngineClosed,
}

impl From<toml::de::Error> for ArbiterError {
    fn from(e: toml::de::Error) -> Self {
        ArbiterError::Config(e.to_string())
    }
}

impl From<std::io::Error> for ArbiterError {
    fn from(e: std::io::Error) -> Self {
        ArbiterError::Config(e.to_string())
    }
}

/// Decoding failures for persisted snapshot envelopes.
///
/// All of these are fatal for the snapshot in question: the caller is expected
/// to discard it and start a fresh session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot is empty")]
    Empty,
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u8),
    #[error("varint truncated at byte {0}")]
    TruncatedVarint(usize),
    #[error("varint exceeds 64 bits")]
    VarintOverflow,
    #[error("config length {declared} exceeds remaining {available} bytes")]
    ConfigOutOfBounds { declared: u64, available: usize },
    #[error("config is not valid UTF-8: {0}")]
    InvalidUtf8(String),
    #[error("config is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("config could not be encoded: {0}")]
    Encode(String),
    #[error("storage string is not valid base64: {0}")]
    InvalidBase64(String),
}

/// Reasons a request is refused at admission.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedRequest {
    #[error("request has no correlation id")]
    MissingId,
    #[error("protocol request {0} has no protocol id")]
    MissingProtocolId(String),
    #[error("request {0} is already in flight")]
    DuplicateId(String),
}
