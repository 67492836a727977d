use thiserror::Error;

/// Errors that can occur outside the per-packet pipeline hot path.
///
/// Nothing in the outgoing/incoming pipelines returns `CoreError`: per-packet
/// failures are routed to stat events instead (see `stats::StatEvent`), never
/// to exceptional control flow.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid overlay IPv4 address: {0}")]
    InvalidOverlayIp(String),

    #[error("invalid AEAD key: {0}")]
    InvalidKey(String),

    #[error("no peers configured")]
    NoPeers,
}

pub type Result<T> = std::result::Result<T, CoreError>;
