//! # agora-core
//!
//! Core types for the agora agent coordination layer.
//!
//! agora is an in-process coordination layer for agents that live inside one
//! runtime. It has two halves built on top of this crate:
//!
//! - `agora-hub`: a message bus with point-to-point, broadcast, and
//!   request/reply delivery
//! - `agora-consensus`: group decisions with pluggable voting strategies
//!
//! This crate holds the vocabulary both halves share: message and vote
//! enums, the error taxonomy, configuration, and handler isolation.

pub mod config;
mod error;
pub mod isolation;
mod types;

pub use config::{AgoraConfig, ConsensusConfig, HubConfig};
pub use error::{AgoraError, Result};
pub use types::*;
