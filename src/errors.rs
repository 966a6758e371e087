// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broker unreachable or a channel closed underneath us.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Startup failure: {0}")]
    StartupFailure(String),

    #[error("Unknown handler: {0}")]
    UnknownHandler(String),

    #[error("Invalid handler registration: {0}")]
    Registration(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BotError {
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        BotError::Transport(msg.to_string())
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, BotError::Transport(_))
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for BotError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        BotError::Transport(err.to_string())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, BotError>;
