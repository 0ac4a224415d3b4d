//! Decision and vote model

use agora_core::{DecisionStatus, VoteChoice};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::strategy::ConsensusStrategy;

/// One agent's vote on a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub voter_id: String,
    pub decision_id: String,
    pub choice: VoteChoice,
    /// How strongly the voter holds the choice, in `[0.0, 1.0]`
    pub confidence: f64,
    pub reasoning: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Vote {
    pub fn new(
        voter_id: impl Into<String>,
        decision_id: impl Into<String>,
        choice: VoteChoice,
        confidence: f64,
    ) -> Self {
        Self {
            voter_id: voter_id.into(),
            decision_id: decision_id.into(),
            choice,
            confidence,
            reasoning: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

/// A question put to a group of agents
///
/// `voters` empty means the decision is open: anyone may vote. `votes`
/// holds at most one vote per voter, in the order the latest votes were
/// cast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub subject: String,
    pub description: String,
    /// Choices presented to voters
    pub options: Vec<String>,
    pub proposer: String,
    pub voters: Vec<String>,
    pub votes: Vec<Vote>,
    pub status: DecisionStatus,
    pub result: Option<VoteChoice>,
    pub created_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Decision {
    /// Whether `voter_id` may vote on this decision
    pub fn is_eligible(&self, voter_id: &str) -> bool {
        self.voters.is_empty() || self.voters.iter().any(|v| v == voter_id)
    }

    pub fn vote_of(&self, voter_id: &str) -> Option<&Vote> {
        self.votes.iter().find(|v| v.voter_id == voter_id)
    }

    pub fn has_voted(&self, voter_id: &str) -> bool {
        self.vote_of(voter_id).is_some()
    }

    /// Whether the deadline has passed as of `now`
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| now > deadline)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record `vote`, replacing any earlier vote from the same voter
    pub(crate) fn replace_vote(&mut self, vote: Vote) {
        self.votes.retain(|v| v.voter_id != vote.voter_id);
        self.votes.push(vote);
    }
}

/// Everything needed to open a decision
///
/// ```
/// use agora_consensus::{DecisionProposal, LeaderConsensus};
///
/// let proposal = DecisionProposal::new("Adopt trunk-based dev", "Drop release branches", "lead")
///     .with_voters(["alice", "bob", "lead"])
///     .with_strategy(LeaderConsensus::new("lead"));
/// assert_eq!(proposal.voters.len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct DecisionProposal {
    pub subject: String,
    pub description: String,
    pub proposer: String,
    pub voters: Vec<String>,
    /// Overrides the manager's default strategy for this decision
    pub strategy: Option<Arc<dyn ConsensusStrategy>>,
    pub deadline: Option<DateTime<Utc>>,
    pub options: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl DecisionProposal {
    pub fn new(
        subject: impl Into<String>,
        description: impl Into<String>,
        proposer: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            description: description.into(),
            proposer: proposer.into(),
            voters: Vec::new(),
            strategy: None,
            deadline: None,
            options: vec![
                VoteChoice::Approve.to_string(),
                VoteChoice::Reject.to_string(),
            ],
            metadata: Map::new(),
        }
    }

    pub fn with_voters<S: Into<String>>(mut self, voters: impl IntoIterator<Item = S>) -> Self {
        self.voters = voters.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_strategy(mut self, strategy: impl ConsensusStrategy + 'static) -> Self {
        self.strategy = Some(Arc::new(strategy));
        self
    }

    /// Share one strategy instance across several proposals
    pub fn with_shared_strategy(mut self, strategy: Arc<dyn ConsensusStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_options<S: Into<String>>(mut self, options: impl IntoIterator<Item = S>) -> Self {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
