//! Error types for tickets and configuration.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TicketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid ticket name '{0}'")]
    InvalidName(String),

    #[error("Invalid ticket kind '{0}' (expected lowercase letters, digits or '-')")]
    InvalidKind(String),

    #[error("Malformed ticket body in {name}: {source}")]
    MalformedBody {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Ticket {name} declares kind '{body}' but its file name says '{expected}'")]
    KindMismatch {
        name: String,
        expected: String,
        body: String,
    },

    #[error("Ticket {0} has an empty id")]
    EmptyId(String),

    #[error("Failed to encode ticket: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
