// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use crate::model::{ChannelId, EpisodeId};

/// Events emitted while refreshing channels and downloading episodes
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A channel's feed is being fetched
    RefreshStarted { channel_id: ChannelId, url: String },

    /// A channel's feed has been parsed and diffed
    FeedParsed {
        channel_id: ChannelId,
        channel_title: String,
        total_episodes: usize,
        new_episodes: usize,
    },

    /// A channel refresh finished successfully
    RefreshCompleted {
        channel_id: ChannelId,
        inserted: usize,
        enqueued: usize,
    },

    /// A channel refresh failed; the message is stored on the channel
    RefreshFailed { channel_id: ChannelId, error: String },

    /// An episode was claimed and queued for download
    DownloadQueued {
        episode_id: EpisodeId,
        episode_title: String,
    },

    /// A download is starting
    DownloadStarting {
        episode_id: EpisodeId,
        episode_title: String,
        /// Expected content length in bytes, if known
        content_length: Option<u64>,
    },

    /// Download progress update
    DownloadProgress {
        episode_id: EpisodeId,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },

    /// A download completed and the episode is now COMPLETED
    DownloadCompleted {
        episode_id: EpisodeId,
        episode_title: String,
        bytes_downloaded: u64,
    },

    /// A download failed and the episode is now ERROR
    DownloadFailed {
        episode_id: EpisodeId,
        episode_title: String,
        error: String,
    },

    /// The episode was deleted while downloading; the file was discarded
    DownloadDiscarded { episode_id: EpisodeId },

    /// Retention removed episodes from a channel
    EpisodesPruned { channel_id: ChannelId, count: usize },

    /// Startup recovery finished
    RecoveryCompleted {
        reset_episodes: usize,
        reset_channels: usize,
        partial_files_cleaned: usize,
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
