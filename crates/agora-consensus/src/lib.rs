//! Group decisions for agora agents
//!
//! A [`ConsensusManager`] owns a table of [`Decision`]s. Agents cast
//! [`Vote`]s, and after every vote the decision's [`ConsensusStrategy`]
//! recomputes its status:
//!
//! ```text
//! Pending --first vote--> Voting --complete--> Approved | Rejected | Timeout
//! ```
//!
//! Three strategies ship with the crate: [`VotingConsensus`] (confidence
//! weighted approval rate), [`LeaderConsensus`] (one agent decides) and
//! [`WeightedConsensus`] (per-agent weights).

mod decision;
mod manager;
mod strategy;

pub use decision::{Decision, DecisionProposal, Vote};
pub use manager::{ConsensusManager, DecisionTransition};
pub use strategy::{
    ConsensusStrategy, Evaluation, LeaderConsensus, VotingConsensus, WeightedConsensus,
};

pub use agora_core::{DecisionStatus, VoteChoice};
