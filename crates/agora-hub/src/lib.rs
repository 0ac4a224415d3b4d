//! # agora-hub
//!
//! In-process message bus for agents sharing one runtime.
//!
//! This crate provides:
//! - The immutable [`AgentMessage`] value type
//! - Per-agent subscriptions with type and subject filters
//! - [`CollaborationHub`]: FIFO dispatch, broadcast fan-out, and
//!   request/reply correlation with timeouts
//! - A delivery-failure channel so handler errors are observable without
//!   breaking isolation between agents

mod hub;
mod message;
mod subscription;

pub use hub::{CollaborationHub, DeliveryFailure, HubStats};
pub use message::AgentMessage;
pub use subscription::{AgentSubscription, MessageHandler, SubscriptionFilter};

pub use agora_core::{MessagePriority, MessageType, BROADCAST};
