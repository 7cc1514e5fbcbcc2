// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::sync::Arc;

/// Events emitted while publishing a channel or verifying its distribution
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Feed document was rendered and written to the channel directory
    FeedWritten { path: PathBuf, episodes: usize },

    /// Dry run: nothing beyond the feed file was touched
    DryRunFinished { path: PathBuf },

    /// The mirror clone is being created
    Cloning { remote: String, path: PathBuf },

    /// Channel directory is being mirrored into the clone
    Syncing { source: PathBuf, destination: PathBuf },

    /// Tree sync finished
    Synced { changes: usize },

    /// A commit was created locally
    Committed { commit: String },

    /// Upstream history is being fetched and merged
    Reconciling { attempt: u32 },

    /// Push was rejected because upstream moved
    PushRejected { attempt: u32, reason: String },

    /// The mirror branch was pushed
    Pushed { commit: String, attempts: u32 },

    /// Nothing changed since the last publish
    NothingToPublish,

    /// Probing of one gateway is starting
    GatewayStarting { gateway: String, probes: usize },

    /// A single probe finished
    ProbeFinished {
        gateway: String,
        /// Worker slot (0 to concurrency-1)
        slot: usize,
        episode_title: String,
        success: bool,
        detail: String,
    },

    /// All probes for one gateway finished
    GatewayFinished {
        gateway: String,
        succeeded: usize,
        failed: usize,
    },

    /// Verification of every gateway completed
    VerificationCompleted {
        gateways: usize,
        succeeded: usize,
        failed: usize,
    },
}

/// Trait for reporting progress events.
///
/// Implementations can use this to display progress bars, log messages,
/// or collect statistics.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {
        // Intentionally empty
    }
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingReporter;
    use super::*;

    #[test]
    fn noop_reporter_handles_all_events() {
        let reporter = NoopReporter;

        reporter.report(ProgressEvent::FeedWritten {
            path: PathBuf::from("channels/show/feed.xml"),
            episodes: 2,
        });
        reporter.report(ProgressEvent::Reconciling { attempt: 1 });
        reporter.report(ProgressEvent::PushRejected {
            attempt: 1,
            reason: "fetch first".to_string(),
        });
        reporter.report(ProgressEvent::ProbeFinished {
            gateway: "ipfs.io".to_string(),
            slot: 0,
            episode_title: "Episode 1".to_string(),
            success: false,
            detail: "timed out".to_string(),
        });
        reporter.report(ProgressEvent::VerificationCompleted {
            gateways: 1,
            succeeded: 0,
            failed: 1,
        });
    }

    #[test]
    fn recording_reporter_keeps_order() {
        let reporter = RecordingReporter::default();
        reporter.report(ProgressEvent::NothingToPublish);
        reporter.report(ProgressEvent::Synced { changes: 3 });

        let events = reporter.events();
        assert!(matches!(events[0], ProgressEvent::NothingToPublish));
        assert!(matches!(events[1], ProgressEvent::Synced { changes: 3 }));
    }
}
