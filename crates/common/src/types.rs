//! Common data types for the room signaling crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new identifier from any string-like value
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the identifier as a string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Server-assigned identifier for a participant
    ParticipantSid
);

string_id!(
    /// Server-assigned identifier for a published track
    TrackSid
);

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
    /// Data track
    Data,
}

impl TrackKind {
    /// Wire name of the kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Data => "data",
        }
    }

    /// Whether the kind carries audio or video
    #[must_use]
    pub const fn is_media(self) -> bool {
        !matches!(self, Self::Data)
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic identifier assigned to a component instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic generator for [`InstanceId`]s.
///
/// Cloning shares the underlying counter, so a single generator created at
/// startup and handed to every component yields process-unique ids.
#[derive(Debug, Clone, Default)]
pub struct InstanceIdGenerator {
    next: Arc<AtomicU64>,
}

impl InstanceIdGenerator {
    /// Create a generator whose first id is 1
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id
    #[must_use]
    pub fn next_id(&self) -> InstanceId {
        InstanceId(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
