//! Room Signaling Library
//!
//! Client-side signaling core for a multi-party conferencing room:
//!
//! - Reconciliation of server room snapshots against local state, gated by
//!   per-stream revisions
//! - Remote track lifecycle and subscription binding (protocol v2 and v3)
//! - Local track publication state, coalesced and published on change
//! - Media side-channels (dominant speaker, network quality, track priority,
//!   render hints, publisher hints, track switch-off, track subscriptions)
//!
//! # Architecture
//!
//! ```text
//! RoomHandle ──mpsc──> RoomActor
//!                      ├── Registry (remote participants, track publications)
//!                      ├── LocalParticipant (local publications)
//!                      ├── PendingReceivers <── receivers from the peer-connection layer
//!                      ├── SubscriptionStrategy (V2Strategy | V3Strategy)
//!                      └── MediaSignaling<P> x 7 ──> ChannelPump tasks
//!            <──broadcast── RoomEvent
//! ```
//!
//! # Modules
//!
//! - [`actors`] - `RoomActor`, its handle, messages and subscription strategies
//! - [`async_var`] - Single-slot rendezvous used for network quality inputs
//! - [`collaborators`] - Traits for the transport and peer-connection layers
//! - [`config`] - Configuration from environment
//! - [`errors`] - Error types with client error codes
//! - [`signaling`] - Side-channel base and protocols
//! - [`track`] - Track lifecycle, remote and local publications

#![warn(clippy::pedantic)]

pub mod actors;
pub mod async_var;
pub mod collaborators;
pub mod config;
pub mod errors;
pub mod observability;
pub mod participant;
pub mod pending;
pub mod receiver;
pub mod recording;
pub mod signaling;
pub mod track;
