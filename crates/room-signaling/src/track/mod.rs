//! Tracks: the lifecycle state machine, remote publications and the local
//! participant's publications.

pub mod lifecycle;
pub mod local;
pub mod remote;

pub use lifecycle::{TrackLifecycle, TrackState};
pub use local::{LocalParticipant, NewLocalTrack};
pub use remote::{Binding, EnabledSource, RemoteTrackPublication, SwitchOffState};
