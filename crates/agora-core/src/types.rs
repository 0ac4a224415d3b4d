//! Core type definitions shared by the hub and the consensus engine

use serde::{Deserialize, Serialize};

/// Reserved recipient meaning "every subscriber except the sender"
pub const BROADCAST: &str = "broadcast";

/// Kinds of inter-agent messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Asks the recipient to do or answer something
    Request,
    /// Answers an earlier request
    Response,
    /// Informational, no reply expected
    Notification,
    /// Hands a task to another agent
    Delegation,
    /// Concerns a group decision
    Consensus,
    /// Reports a failure
    Error,
}

impl MessageType {
    /// Every message type, in declaration order
    pub const ALL: [MessageType; 6] = [
        Self::Request,
        Self::Response,
        Self::Notification,
        Self::Delegation,
        Self::Consensus,
        Self::Error,
    ];
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Response => write!(f, "response"),
            Self::Notification => write!(f, "notification"),
            Self::Delegation => write!(f, "delegation"),
            Self::Consensus => write!(f, "consensus"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "request" => Ok(Self::Request),
            "response" => Ok(Self::Response),
            "notification" => Ok(Self::Notification),
            "delegation" => Ok(Self::Delegation),
            "consensus" => Ok(Self::Consensus),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid message type: {}", s)),
        }
    }
}

/// Message priority levels
///
/// Advisory only: the hub delivers in send order regardless of priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl std::fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

impl std::str::FromStr for MessagePriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// A voter's choice on a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteChoice {
    Approve,
    Reject,
    Abstain,
}

impl std::fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::Reject => write!(f, "reject"),
            Self::Abstain => write!(f, "abstain"),
        }
    }
}

impl std::str::FromStr for VoteChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "approve" | "yes" => Ok(Self::Approve),
            "reject" | "no" => Ok(Self::Reject),
            "abstain" => Ok(Self::Abstain),
            _ => Err(format!("Invalid vote choice: {}", s)),
        }
    }
}

/// Lifecycle of a group decision
///
/// Moves forward only: `Pending -> Voting -> {Approved | Rejected | Timeout}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    #[default]
    Pending,
    Voting,
    Approved,
    Rejected,
    Timeout,
}

impl DecisionStatus {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Timeout)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Voting => 1,
            Self::Approved | Self::Rejected | Self::Timeout => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the forward-only lifecycle
    pub fn can_transition_to(&self, next: DecisionStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

impl std::fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Voting => write!(f, "voting"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}
