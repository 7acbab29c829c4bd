use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdoptionError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("timed out {0}")]
    Timeout(&'static str),
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("connection closed by peer")]
    Closed,
    #[error("remote error: {0}")]
    Remote(String),
    #[error("expected {expected} response, got {got}")]
    UnexpectedResponse { expected: &'static str, got: String },
}
