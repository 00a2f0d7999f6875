//! Error types for narayana-att

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttentionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Action error: {0}")]
    Action(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AttentionError {
    /// Transport and action failures are transient; the next cycle recomputes
    /// and resends.
    pub fn is_transient(&self) -> bool {
        matches!(self, AttentionError::Transport(_) | AttentionError::Action(_))
    }
}
