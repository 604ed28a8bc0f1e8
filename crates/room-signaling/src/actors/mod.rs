//! Actor model implementation for room signaling.
//!
//! ```text
//! RoomActor (one per joined room)
//! ├── owns remote participants, local publications, recording state
//! ├── drives the side-channels (one pump task per bound transport)
//! └── delegates subscription bindings to a SubscriptionStrategy (v2 / v3)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single owner**: Every state change happens inside the actor loop; callers
//!   talk to it through `RoomHandle`
//! - **Continuations**: Waits (receivers, network quality inputs, hint
//!   application) run as spawned tasks whose results re-enter the loop
//! - **Coalesced publishing**: Local state is published at most once per
//!   mailbox drain
//! - **CancellationToken**: Cancelling the room's token disconnects it
//!
//! # Modules
//!
//! - [`room`] - `RoomActor` and `RoomHandle`
//! - [`strategy`] - v2 / v3 subscription reconciliation
//! - [`messages`] - Message, event and state types

pub mod messages;
pub mod room;
pub mod strategy;

// Re-export primary types
pub use messages::*;
pub use room::{RoomActor, RoomCollaborators, RoomCore, RoomHandle};
pub use strategy::{strategy_for, SubscriptionStrategy, V2Strategy, V3Strategy};
