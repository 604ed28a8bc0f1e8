//! # Room Test Utilities
//!
//! Shared test utilities for room signaling.
//!
//! This crate provides mock collaborators and snapshot fixtures for
//! driving a `RoomActor` without a real signaling server or
//! peer-connection layer.
//!
//! ## Modules
//!
//! - `mock_transport` - Recording `SignalingTransport` and `PeerConnectionManager`
//! - `mock_publisher_hints` - Configurable `PublisherHintApplier`
//! - `fixtures` - Snapshot, participant and side-channel builders
//!
//! ## Usage
//!
//! ```rust,ignore
//! use room_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let room = TestRoom::spawn(Config::default());
//!
//!     room.handle
//!         .receive_snapshot(
//!             SnapshotBuilder::synced()
//!                 .participant(TestParticipant::new("PA1", 1).audio("MT1"))
//!                 .build(),
//!         )
//!         .await
//!         .unwrap();
//!
//!     let state = room.handle.get_state().await.unwrap();
//!     assert!(state.participant("PA1").is_some());
//! }
//! ```
//!
//! ### Side-channel Tests
//!
//! ```rust,ignore
//! let (receiver, mut peer) = data_receiver("ds-ns");
//! room.handle.add_track_receiver(receiver).await.unwrap();
//!
//! peer.deliver(json!({"type": "active_speaker", "participant": "PA1"}));
//! let published = peer.next_published().await;
//! ```

pub mod fixtures;
pub mod mock_publisher_hints;
pub mod mock_transport;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_publisher_hints::*;
pub use mock_transport::*;
