//! Unified error types for agora

use std::time::Duration;
use thiserror::Error;

use crate::DecisionStatus;

/// Unified error type for all agora operations
#[derive(Error, Debug)]
pub enum AgoraError {
    // Consensus errors
    #[error("Decision not found: {0}")]
    DecisionNotFound(String),

    #[error("Voter {voter} is not authorized to vote on decision {decision}")]
    Unauthorized { voter: String, decision: String },

    #[error("Decision {decision} already finalized: {status}")]
    AlreadyFinalized {
        decision: String,
        status: DecisionStatus,
    },

    #[error("Invalid vote: {0}")]
    InvalidVote(String),

    // Messaging errors
    #[error("No reply for correlation id {correlation_id} within {timeout:?}")]
    Timeout {
        correlation_id: String,
        timeout: Duration,
    },

    #[error("Handler for agent {agent} failed: {reason}")]
    HandlerFailure { agent: String, reason: String },

    #[error("Correlation id already awaiting a reply: {0}")]
    DuplicateCorrelation(String),

    #[error("Reply slot closed without a reply: {0}")]
    ReplyDropped(String),

    #[error("Collaboration hub dispatch loop is already running")]
    HubAlreadyRunning,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl AgoraError {
    /// Build a handler failure for `agent` from any displayable cause
    pub fn handler_failure(agent: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::HandlerFailure {
            agent: agent.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias using AgoraError
pub type Result<T> = std::result::Result<T, AgoraError>;
