//! Mock publisher hint applier.
//!
//! # Example
//!
//! ```rust,ignore
//! use room_test_utils::MockPublisherHintApplier;
//!
//! let applier = MockPublisherHintApplier::builder()
//!     .result_for("MT1", PublisherHintResult::Ok)
//!     .default_result(PublisherHintResult::InvalidHint)
//!     .build();
//! ```

use async_trait::async_trait;
use common::types::TrackSid;
use media_protocol::message::{EncodingHint, PublisherHintResult};
use room_signaling::collaborators::PublisherHintApplier;
use std::collections::HashMap;
use std::sync::Mutex;

/// Applier answering each track with a configured result and recording the
/// hints it was asked to apply.
#[derive(Debug)]
pub struct MockPublisherHintApplier {
    results: HashMap<TrackSid, PublisherHintResult>,
    default_result: PublisherHintResult,
    applied: Mutex<Vec<(TrackSid, Option<Vec<EncodingHint>>)>>,
}

impl Default for MockPublisherHintApplier {
    fn default() -> Self {
        Self {
            results: HashMap::new(),
            default_result: PublisherHintResult::Ok,
            applied: Mutex::new(Vec::new()),
        }
    }
}

impl MockPublisherHintApplier {
    #[must_use]
    pub fn builder() -> MockPublisherHintApplierBuilder {
        MockPublisherHintApplierBuilder::default()
    }

    /// Hints applied so far, in order.
    #[must_use]
    pub fn applied(&self) -> Vec<(TrackSid, Option<Vec<EncodingHint>>)> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl PublisherHintApplier for MockPublisherHintApplier {
    async fn apply_hint(
        &self,
        track: &TrackSid,
        encodings: Option<&[EncodingHint]>,
    ) -> PublisherHintResult {
        self.applied
            .lock()
            .unwrap()
            .push((track.clone(), encodings.map(<[EncodingHint]>::to_vec)));
        self.results
            .get(track)
            .copied()
            .unwrap_or(self.default_result)
    }
}

/// Builder for [`MockPublisherHintApplier`].
#[derive(Debug, Default)]
pub struct MockPublisherHintApplierBuilder {
    results: HashMap<TrackSid, PublisherHintResult>,
    default_result: Option<PublisherHintResult>,
}

impl MockPublisherHintApplierBuilder {
    /// Answer hints for `track` with `result`.
    #[must_use]
    pub fn result_for(mut self, track: &str, result: PublisherHintResult) -> Self {
        self.results.insert(TrackSid::new(track), result);
        self
    }

    /// Answer every other track with `result`. Defaults to `Ok`.
    #[must_use]
    pub fn default_result(mut self, result: PublisherHintResult) -> Self {
        self.default_result = Some(result);
        self
    }

    #[must_use]
    pub fn build(self) -> MockPublisherHintApplier {
        MockPublisherHintApplier {
            results: self.results,
            default_result: self.default_result.unwrap_or(PublisherHintResult::Ok),
            applied: Mutex::new(Vec::new()),
        }
    }
}
