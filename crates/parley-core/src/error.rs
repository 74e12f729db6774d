//! Error types shared by the Parley crates

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Discovery datagram errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("missing discovery prefix")]
    MissingPrefix,

    #[error("expected 3 fields, got {0}")]
    FieldCount(usize),

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("empty {0}")]
    EmptyField(&'static str),

    #[error("{field} contains reserved delimiter ':': {value}")]
    ReservedDelimiter { field: &'static str, value: String },
}

/// Discovery beacon errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("could not determine a local IPv4 address")]
    NoLocalAddress,

    #[error("failed to bind discovery socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("discovery socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid local identity: {0}")]
    InvalidIdentity(#[from] FrameError),

    #[error("discovery beacon is not running")]
    NotRunning,
}

/// Blocklist loading errors
#[derive(Error, Debug)]
pub enum BlocklistError {
    #[error("failed to read blocklist {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("No configuration directory available")]
    NoConfigDir,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FrameError::ReservedDelimiter {
            field: "username",
            value: "a:b".into(),
        };
        assert_eq!(
            err.to_string(),
            "username contains reserved delimiter ':': a:b"
        );

        let err = DiscoveryError::from(FrameError::FieldCount(2));
        assert!(err.to_string().contains("expected 3 fields, got 2"));
    }
}
