//! # herald-core
//!
//! Channel coordination and bus bridging for the Herald broadcast gateway.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **PatternMatcher** - Classify channels as public, private or presence
//! - **ConnectionDirectory** - Which connections occupy which channels
//! - **Authorizer** - Decide whether a connection may join a channel
//! - **PresenceRoster** - Track who is present in presence channels
//! - **SubscriptionBridge** - Follow local interest with bus subscriptions
//! - **ChannelCoordinator** - Join, leave, eviction and client events
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│ Coordinator │────▶│  Directory  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                        │       │               ▲
//!                        ▼       ▼               │
//!              ┌────────────┐ ┌─────────────┐    │
//!              │ Authorizer │ │   Bridge    │────┘
//!              └────────────┘ └─────────────┘
//!                                 ▲     │
//!                                 │     ▼
//!                             ┌─────────────┐
//!                             │     Bus     │
//!                             └─────────────┘
//! ```

pub mod auth;
pub mod bridge;
pub mod bus;
pub mod channel;
pub mod coordinator;
pub mod directory;
pub mod message;
pub mod pattern;
pub mod presence;

pub use auth::{AuthFailure, AuthorizationResult, Authorizer, ConnectionLimit, PublicOnlyAuthorizer};
pub use bridge::SubscriptionBridge;
pub use bus::{Bus, BusError, InboundMessage, MemoryBus};
pub use coordinator::{ChannelCoordinator, CoordinatorConfig, CoordinatorError, JoinOutcome};
pub use directory::{ConnectionDirectory, ConnectionId, DirectoryConfig, DirectoryError, LocalDirectory};
pub use message::{JoinRequest, OutboundEvent};
pub use pattern::{ChannelKind, ChannelPatterns, PatternMatcher};
pub use presence::{PresenceMember, PresenceRoster};
