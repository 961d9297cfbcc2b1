// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{Limit, SettingsHandle};
use crate::error::PodcastError;
use crate::media::MediaStore;
use crate::model::{ChannelId, Episode, EpisodeId, EpisodeStatus};
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::store::SharedRepository;

/// What a retention run removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Downloaded episodes removed to respect the download count
    pub downloads_pruned: usize,
    /// Episode rows removed to respect the retention count
    pub rows_pruned: usize,
}

impl RetentionReport {
    pub fn total(&self) -> usize {
        self.downloads_pruned + self.rows_pruned
    }
}

/// Keeps each channel within the configured episode and download counts
pub struct RetentionEnforcer {
    repo: SharedRepository,
    media: MediaStore,
    settings: SettingsHandle,
    reporter: SharedProgressReporter,
    // Serializes runs so concurrent download completions see each other's deletions
    lock: Mutex<()>,
}

impl RetentionEnforcer {
    pub fn new(
        repo: SharedRepository,
        media: MediaStore,
        settings: SettingsHandle,
        reporter: SharedProgressReporter,
    ) -> Self {
        Self {
            repo,
            media,
            settings,
            reporter,
            lock: Mutex::new(()),
        }
    }

    /// Trim a channel to the configured limits
    ///
    /// Runs two passes, each over freshly read state: first the oldest
    /// downloaded episodes beyond the download count, then the oldest rows
    /// beyond the retention count.
    pub async fn enforce(&self, channel_id: ChannelId) -> Result<RetentionReport, PodcastError> {
        let _guard = self.lock.lock().await;
        let settings = self.settings.current();

        let downloads_pruned = self
            .prune_oldest(channel_id, settings.episode_download_count, |e| {
                e.status == EpisodeStatus::Completed
            })
            .await?;
        let rows_pruned = self
            .prune_oldest(channel_id, settings.episode_retention_count, |_| true)
            .await?;

        let report = RetentionReport {
            downloads_pruned,
            rows_pruned,
        };
        if report.total() > 0 {
            info!(
                "Retention removed {} downloaded and {} other episodes from channel {}",
                downloads_pruned, rows_pruned, channel_id
            );
            self.reporter.report(ProgressEvent::EpisodesPruned {
                channel_id,
                count: report.total(),
            });
        }
        Ok(report)
    }

    /// Decide which NEW episodes of a channel should be downloaded
    ///
    /// Episodes that hold or will hold media are ranked newest first. NEW
    /// episodes ranked within the download count are returned; the rest are
    /// marked SKIPPED.
    pub async fn select_for_download(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<Episode>, PodcastError> {
        let _guard = self.lock.lock().await;
        let cap = self.settings.current().episode_download_count.cap();

        let mut selected = Vec::new();
        let mut rank = 0usize;

        for episode in self.repo.list_episodes(channel_id).await? {
            match episode.status {
                EpisodeStatus::Downloading | EpisodeStatus::Completed => rank += 1,
                EpisodeStatus::New if rank < cap => {
                    rank += 1;
                    selected.push(episode);
                }
                EpisodeStatus::New => {
                    self.repo
                        .update_episode_status(
                            episode.id,
                            EpisodeStatus::New,
                            EpisodeStatus::Skipped,
                        )
                        .await?;
                }
                EpisodeStatus::Error | EpisodeStatus::Skipped => {}
            }
        }

        Ok(selected)
    }

    async fn prune_oldest(
        &self,
        channel_id: ChannelId,
        limit: Limit,
        counts: impl Fn(&Episode) -> bool,
    ) -> Result<usize, PodcastError> {
        let mut candidates: Vec<Episode> = self
            .repo
            .list_episodes(channel_id)
            .await?
            .into_iter()
            .filter(|e| counts(e))
            .collect();

        let excess = limit.excess(candidates.len());
        if excess == 0 {
            return Ok(0);
        }

        candidates.sort_by_key(Episode::age_key);

        let mut removed = 0;
        for episode in candidates.iter().take(excess) {
            if discard_episode(&self.repo, &self.media, episode.id).await?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Delete an episode row and then the media it pointed to
///
/// The file is taken from the row as it was when deleted, so a download
/// finalized after the caller looked at the episode is still removed.
/// Returns `None` when the row was already gone.
pub(crate) async fn discard_episode(
    repo: &SharedRepository,
    media: &MediaStore,
    id: EpisodeId,
) -> Result<Option<Episode>, PodcastError> {
    let Some(episode) = repo.delete_episode(id).await? else {
        return Ok(None);
    };

    if let Some(path) = &episode.path
        && let Err(e) = media.remove(path).await
    {
        warn!("Failed to remove media of episode {}: {}", episode.id, e);
        return Err(e.into());
    }

    Ok(Some(episode))
}
