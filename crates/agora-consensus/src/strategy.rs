//! Consensus strategies

use agora_core::{ConsensusConfig, DecisionStatus, VoteChoice};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

use crate::decision::Decision;

/// Outcome of evaluating a decision's current votes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub status: DecisionStatus,
    pub result: Option<VoteChoice>,
}

impl Evaluation {
    pub fn pending() -> Self {
        Self {
            status: DecisionStatus::Pending,
            result: None,
        }
    }

    pub fn voting() -> Self {
        Self {
            status: DecisionStatus::Voting,
            result: None,
        }
    }

    pub fn timeout() -> Self {
        Self {
            status: DecisionStatus::Timeout,
            result: None,
        }
    }

    pub fn approved() -> Self {
        Self {
            status: DecisionStatus::Approved,
            result: Some(VoteChoice::Approve),
        }
    }

    pub fn rejected() -> Self {
        Self {
            status: DecisionStatus::Rejected,
            result: Some(VoteChoice::Reject),
        }
    }

    fn from_rate(rate: f64, threshold: f64) -> Self {
        if rate >= threshold {
            Self::approved()
        } else {
            Self::rejected()
        }
    }
}

/// Policy deciding when a decision is complete and what it resolves to
///
/// Implementations must be a pure function of the decision and their own
/// configuration, so one instance can serve any number of decisions.
pub trait ConsensusStrategy: Send + Sync + fmt::Debug {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Whether enough votes are in to settle the decision
    fn is_complete(&self, decision: &Decision) -> bool;

    /// Evaluate the decision as of `now`
    ///
    /// A decision without votes is always `Pending`. Before completion it
    /// is `Voting`. A complete decision whose deadline has passed is
    /// `Timeout`.
    fn evaluate_at(&self, decision: &Decision, now: DateTime<Utc>) -> Evaluation;

    /// Evaluate the decision against the wall clock
    fn evaluate(&self, decision: &Decision) -> Evaluation {
        self.evaluate_at(decision, Utc::now())
    }
}

/// Confidence-weighted approval rate against a threshold
#[derive(Debug, Clone, PartialEq)]
pub struct VotingConsensus {
    /// Approval rate needed to approve, in `[0.0, 1.0]`
    pub threshold: f64,
    /// Wait for every listed voter instead of just as many votes as voters
    pub require_all_votes: bool,
}

impl VotingConsensus {
    pub fn new(threshold: f64, require_all_votes: bool) -> Self {
        Self {
            threshold,
            require_all_votes,
        }
    }

    pub fn from_config(config: &ConsensusConfig) -> Self {
        Self::new(config.threshold, config.require_all_votes)
    }
}

impl Default for VotingConsensus {
    fn default() -> Self {
        Self::new(0.5, false)
    }
}

impl ConsensusStrategy for VotingConsensus {
    fn name(&self) -> &str {
        "voting"
    }

    fn is_complete(&self, decision: &Decision) -> bool {
        if decision.voters.is_empty() {
            return !decision.votes.is_empty();
        }

        if self.require_all_votes {
            decision.voters.iter().all(|v| decision.has_voted(v))
        } else {
            decision.votes.len() >= decision.voters.len()
        }
    }

    fn evaluate_at(&self, decision: &Decision, now: DateTime<Utc>) -> Evaluation {
        if decision.votes.is_empty() {
            return Evaluation::pending();
        }
        if !self.is_complete(decision) {
            return Evaluation::voting();
        }
        if decision.is_overdue_at(now) {
            return Evaluation::timeout();
        }

        let mut approve = 0.0;
        let mut reject = 0.0;
        for vote in &decision.votes {
            match vote.choice {
                VoteChoice::Approve => approve += vote.confidence,
                VoteChoice::Reject => reject += vote.confidence,
                VoteChoice::Abstain => {}
            }
        }

        let total_voters = if decision.voters.is_empty() {
            decision.votes.len()
        } else {
            decision.voters.len()
        };
        let rate = approve / total_voters as f64;

        debug!(
            "Decision {}: approve {:.2}, reject {:.2}, rate {:.3} vs threshold {:.3}",
            decision.id, approve, reject, rate, self.threshold
        );
        Evaluation::from_rate(rate, self.threshold)
    }
}

/// One designated agent's vote settles the decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderConsensus {
    pub leader_id: String,
}

impl LeaderConsensus {
    pub fn new(leader_id: impl Into<String>) -> Self {
        Self {
            leader_id: leader_id.into(),
        }
    }
}

impl ConsensusStrategy for LeaderConsensus {
    fn name(&self) -> &str {
        "leader"
    }

    fn is_complete(&self, decision: &Decision) -> bool {
        decision.has_voted(&self.leader_id)
    }

    fn evaluate_at(&self, decision: &Decision, now: DateTime<Utc>) -> Evaluation {
        if decision.votes.is_empty() {
            return Evaluation::pending();
        }
        let Some(vote) = decision.vote_of(&self.leader_id) else {
            return Evaluation::voting();
        };
        if decision.is_overdue_at(now) {
            return Evaluation::timeout();
        }

        match vote.choice {
            VoteChoice::Approve => Evaluation::approved(),
            VoteChoice::Reject => Evaluation::rejected(),
            // Leader has not committed either way
            VoteChoice::Abstain => Evaluation::voting(),
        }
    }
}

/// Approval rate where each voter counts with its own weight
///
/// Unlisted voters weigh 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedConsensus {
    pub weights: HashMap<String, f64>,
    pub threshold: f64,
}

impl WeightedConsensus {
    pub fn new(weights: HashMap<String, f64>, threshold: f64) -> Self {
        Self { weights, threshold }
    }

    pub fn with_weight(mut self, voter_id: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(voter_id.into(), weight);
        self
    }

    pub fn weight_of(&self, voter_id: &str) -> f64 {
        self.weights.get(voter_id).copied().unwrap_or(1.0)
    }
}

impl Default for WeightedConsensus {
    fn default() -> Self {
        Self::new(HashMap::new(), 0.5)
    }
}

impl ConsensusStrategy for WeightedConsensus {
    fn name(&self) -> &str {
        "weighted"
    }

    fn is_complete(&self, decision: &Decision) -> bool {
        if decision.voters.is_empty() {
            !decision.votes.is_empty()
        } else {
            decision.voters.iter().all(|v| decision.has_voted(v))
        }
    }

    fn evaluate_at(&self, decision: &Decision, now: DateTime<Utc>) -> Evaluation {
        if decision.votes.is_empty() {
            return Evaluation::pending();
        }
        if !self.is_complete(decision) {
            return Evaluation::voting();
        }
        if decision.is_overdue_at(now) {
            return Evaluation::timeout();
        }

        let total_weight: f64 = if decision.voters.is_empty() {
            let voted: HashSet<&str> = decision.votes.iter().map(|v| v.voter_id.as_str()).collect();
            voted.into_iter().map(|v| self.weight_of(v)).sum()
        } else {
            decision.voters.iter().map(|v| self.weight_of(v)).sum()
        };

        let approve: f64 = decision
            .votes
            .iter()
            .filter(|v| v.choice == VoteChoice::Approve)
            .map(|v| self.weight_of(&v.voter_id) * v.confidence)
            .sum();

        if total_weight <= 0.0 {
            debug!("Decision {}: no voting weight, rejecting", decision.id);
            return Evaluation::rejected();
        }

        let rate = approve / total_weight;
        debug!(
            "Decision {}: weighted approve {:.2} of {:.2}, rate {:.3} vs threshold {:.3}",
            decision.id, approve, total_weight, rate, self.threshold
        );
        Evaluation::from_rate(rate, self.threshold)
    }
}
