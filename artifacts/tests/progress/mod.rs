//! Test helper that implements [`artifacts::UploadProgressCallback`] which keeps a record of every
//! progress update in order so we can write tests that verify the progress reporting.
use artifacts::{UploadError, UploadProgressCallback};
use more_asserts::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug, strum::EnumDiscriminants)]
#[allow(dead_code)] // Not all of these are used in tests but we want to capture all fields for all events
pub(crate) enum UploadProgressEvent {
    ArtifactQueued {
        key: String,
        size: u64,
    },

    FeedFinished {
        total_artifacts: usize,
        total_bytes: u64,
    },

    ArtifactRetrying {
        key: String,
        retry: u64,
        err: String,
    },

    ArtifactUploaded {
        key: String,
        size: u64,
    },

    ArtifactFailed {
        key: String,
        size: u64,
        err: String,
    },

    UploadFinished {
        uploaded_artifacts: usize,
        uploaded_bytes: u64,
        failed_artifacts: usize,
        duration: Duration,
    },
}

#[derive(Clone)]
pub(crate) struct TestUploadProgressCallback {
    events: Arc<Mutex<Vec<UploadProgressEvent>>>,
}

// Helper macro to reduce boilerplate when matching on specific events
macro_rules! with_match {
    ($var:ident, $matches:pat, $block:block) => {
        if let $matches = $var {
            $block
        } else {
            unreachable!(
                "{}",
                concat!(
                    stringify!($var),
                    " does not match expression ",
                    stringify!($matches)
                )
            )
        }
    };
}

impl TestUploadProgressCallback {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Review all updates after an upload has run to completion, validating that the updates are
    /// all sane and match expected invariants.
    ///
    /// Only applies if the upload returned a summary; an aborted upload reports nothing at the
    /// end.
    pub fn sanity_check_updates(&self) {
        // Every queued artifact ends up either uploaded or failed, exactly once
        let mut outstanding = HashMap::<String, usize>::new();
        for event in self.filter_events(UploadProgressEventDiscriminants::ArtifactQueued) {
            with_match!(event, UploadProgressEvent::ArtifactQueued { key, .. }, {
                *outstanding.entry(key).or_default() += 1;
            });
        }

        for event in self.events.lock().unwrap().iter() {
            let key = match event {
                UploadProgressEvent::ArtifactUploaded { key, .. }
                | UploadProgressEvent::ArtifactFailed { key, .. } => key,
                _ => continue,
            };

            let count = outstanding
                .get_mut(key)
                .unwrap_or_else(|| panic!("Artifact '{key}' finished without being queued"));
            assert_gt!(*count, 0, "Artifact '{key}' finished more times than it was queued");
            *count -= 1;
        }

        assert!(
            outstanding.values().all(|count| *count == 0),
            "Some queued artifacts never finished: {outstanding:?}"
        );

        let (queued, queued_bytes) = self.artifact_queued();
        let (uploaded, uploaded_bytes) = self.artifact_uploaded();
        let (failed, failed_bytes) = self.artifact_failed();
        assert_eq!(queued, uploaded + failed);
        assert_eq!(queued_bytes, uploaded_bytes + failed_bytes);

        // If the feed ran to completion, its totals cover exactly what was queued
        if let Some(totals) = self.feed_finished() {
            assert_eq!((queued, queued_bytes), totals);
        }

        // The final event agrees with the individual ones, and nothing comes after it
        let (finished_uploaded, finished_uploaded_bytes, finished_failed) =
            self.upload_finished();
        assert_eq!(finished_uploaded, uploaded);
        assert_eq!(finished_uploaded_bytes, uploaded_bytes);
        assert_eq!(finished_failed, failed);

        let last = self.events.lock().unwrap().last().cloned();
        assert_matches::assert_matches!(last, Some(UploadProgressEvent::UploadFinished { .. }));
    }

    /// The number of artifact queued events, and the total size of all of them combined
    pub fn artifact_queued(&self) -> (usize, u64) {
        let events = self.filter_events(UploadProgressEventDiscriminants::ArtifactQueued);
        let count = events.len();
        let sum = events
            .into_iter()
            .map(|event| {
                with_match!(
                    event,
                    UploadProgressEvent::ArtifactQueued { size, .. },
                    { size }
                )
            })
            .sum();

        (count, sum)
    }

    /// The totals reported when the feed finished, if it did
    pub fn feed_finished(&self) -> Option<(usize, u64)> {
        self.filter_single_event(UploadProgressEventDiscriminants::FeedFinished)
            .map(|event| {
                with_match!(
                    event,
                    UploadProgressEvent::FeedFinished {
                        total_artifacts,
                        total_bytes
                    },
                    { (total_artifacts, total_bytes) }
                )
            })
    }

    /// The keys of the artifacts that were retried, once per retry
    pub fn artifact_retrying(&self) -> Vec<String> {
        self.filter_events(UploadProgressEventDiscriminants::ArtifactRetrying)
            .into_iter()
            .map(|event| {
                with_match!(
                    event,
                    UploadProgressEvent::ArtifactRetrying { key, .. },
                    { key }
                )
            })
            .collect()
    }

    /// The number of artifact uploaded events, and the total size of all of them combined
    pub fn artifact_uploaded(&self) -> (usize, u64) {
        let events = self.filter_events(UploadProgressEventDiscriminants::ArtifactUploaded);
        let count = events.len();
        let sum = events
            .into_iter()
            .map(|event| {
                with_match!(
                    event,
                    UploadProgressEvent::ArtifactUploaded { size, .. },
                    { size }
                )
            })
            .sum();

        (count, sum)
    }

    /// The number of artifact failed events, and the total size of all of them combined
    pub fn artifact_failed(&self) -> (usize, u64) {
        let events = self.filter_events(UploadProgressEventDiscriminants::ArtifactFailed);
        let count = events.len();
        let sum = events
            .into_iter()
            .map(|event| {
                with_match!(
                    event,
                    UploadProgressEvent::ArtifactFailed { size, .. },
                    { size }
                )
            })
            .sum();

        (count, sum)
    }

    /// The uploaded count, uploaded bytes, and failed count from the upload finished event, which
    /// must be present exactly once
    pub fn upload_finished(&self) -> (usize, u64, usize) {
        let event = self
            .filter_single_event(UploadProgressEventDiscriminants::UploadFinished)
            .expect("No upload finished event was reported");

        with_match!(
            event,
            UploadProgressEvent::UploadFinished {
                uploaded_artifacts,
                uploaded_bytes,
                failed_artifacts,
                ..
            },
            { (uploaded_artifacts, uploaded_bytes, failed_artifacts) }
        )
    }

    /// Get all events of a certain type
    pub fn filter_events(&self, typ: UploadProgressEventDiscriminants) -> Vec<UploadProgressEvent> {
        let events = self.events.lock().unwrap();

        events
            .iter()
            .filter(|event| {
                let event_typ: UploadProgressEventDiscriminants = (*event).into();

                event_typ == typ
            })
            .cloned()
            .collect::<Vec<_>>()
    }

    /// Get the single ocurrence of an event, if it can only appear 0 or 1 times.  If it appears
    /// more than this an assert is fired
    pub fn filter_single_event(
        &self,
        typ: UploadProgressEventDiscriminants,
    ) -> Option<UploadProgressEvent> {
        let mut events = self.filter_events(typ);

        assert!(
            events.len() <= 1,
            "Expected 0 or 1 instances of {:?}, but found {}",
            typ,
            events.len()
        );

        events.pop()
    }

    fn report_event(&self, event: UploadProgressEvent) {
        let mut events = self.events.lock().unwrap();

        events.push(event)
    }
}

impl std::fmt::Debug for TestUploadProgressCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Just use the inner `Vec`'s debug repr
        let events = self.events.lock().unwrap();
        events.fmt(f)
    }
}

impl UploadProgressCallback for TestUploadProgressCallback {
    fn artifact_queued(&self, key: &str, size: u64) {
        self.report_event(UploadProgressEvent::ArtifactQueued {
            key: key.to_string(),
            size,
        });
    }

    fn feed_finished(&self, total_artifacts: usize, total_bytes: u64) {
        self.report_event(UploadProgressEvent::FeedFinished {
            total_artifacts,
            total_bytes,
        });
    }

    fn artifact_retrying(&self, key: &str, retry: u64, err: &UploadError) {
        self.report_event(UploadProgressEvent::ArtifactRetrying {
            key: key.to_string(),
            retry,
            err: err.to_string(),
        });
    }

    fn artifact_uploaded(&self, key: &str, size: u64) {
        self.report_event(UploadProgressEvent::ArtifactUploaded {
            key: key.to_string(),
            size,
        });
    }

    fn artifact_failed(&self, key: &str, size: u64, err: &UploadError) {
        self.report_event(UploadProgressEvent::ArtifactFailed {
            key: key.to_string(),
            size,
            err: err.to_string(),
        });
    }

    fn upload_finished(
        &self,
        uploaded_artifacts: usize,
        uploaded_bytes: u64,
        failed_artifacts: usize,
        duration: Duration,
    ) {
        self.report_event(UploadProgressEvent::UploadFinished {
            uploaded_artifacts,
            uploaded_bytes,
            failed_artifacts,
            duration,
        });
    }
}
