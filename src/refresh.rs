// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::{PodcastSettings, SettingsHandle};
use crate::diff::{diff_episodes, fit_within_retention};
use crate::error::PodcastError;
use crate::feed::{FetchLimits, fetch_feed_bytes, parse_feed};
use crate::http::HttpClient;
use crate::model::{Channel, ChannelId, ChannelStatus};
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::retention::RetentionEnforcer;
use crate::scheduler::DownloadScheduler;
use crate::store::SharedRepository;

/// What happened to one channel during a refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed {
        inserted: usize,
        updated: usize,
        enqueued: usize,
    },
    /// Refreshed recently enough, left alone
    Skipped,
    /// Fetching or parsing failed; the message is stored on the channel
    Failed(String),
    /// Another refresh of the channel is still running
    Busy,
}

/// Outcome of one channel within a `refresh_all` run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRefresh {
    pub channel_id: ChannelId,
    pub outcome: RefreshOutcome,
}

/// Drives fetch, parse, diff, retention and download selection per channel
pub struct RefreshOrchestrator {
    repo: SharedRepository,
    client: Arc<dyn HttpClient>,
    settings: SettingsHandle,
    clock: SharedClock,
    retention: Arc<RetentionEnforcer>,
    scheduler: Arc<DownloadScheduler>,
    reporter: SharedProgressReporter,
}

impl RefreshOrchestrator {
    pub fn new(
        repo: SharedRepository,
        client: Arc<dyn HttpClient>,
        settings: SettingsHandle,
        clock: SharedClock,
        retention: Arc<RetentionEnforcer>,
        scheduler: Arc<DownloadScheduler>,
        reporter: SharedProgressReporter,
    ) -> Self {
        Self {
            repo,
            client,
            settings,
            clock,
            retention,
            scheduler,
            reporter,
        }
    }

    /// Refresh every subscribed channel, one after the other
    ///
    /// A failing channel never stops the others; each gets its own outcome.
    pub async fn refresh_all(&self, force: bool) -> Result<Vec<ChannelRefresh>, PodcastError> {
        let mut results = Vec::new();

        for channel in self.repo.list_channels().await? {
            let outcome = match self.refresh_channel(channel.id, force).await {
                Ok(outcome) => outcome,
                Err(PodcastError::RefreshInProgress(_)) => RefreshOutcome::Busy,
                // Deleted since the listing
                Err(PodcastError::ChannelNotFound(_)) => continue,
                Err(e) => {
                    warn!("Refresh of channel {} aborted: {}", channel.id, e);
                    RefreshOutcome::Failed(e.to_string())
                }
            };
            results.push(ChannelRefresh {
                channel_id: channel.id,
                outcome,
            });
        }

        Ok(results)
    }

    /// Refresh a single channel
    ///
    /// Network and parse failures are recorded on the channel and returned as
    /// [`RefreshOutcome::Failed`]; storage failures are returned as errors
    /// after the channel is marked ERROR.
    pub async fn refresh_channel(
        &self,
        channel_id: ChannelId,
        force: bool,
    ) -> Result<RefreshOutcome, PodcastError> {
        let channel = self
            .repo
            .get_channel(channel_id)
            .await?
            .ok_or(PodcastError::ChannelNotFound(channel_id))?;
        let settings = self.settings.current();

        if !force && self.is_fresh(&channel, &settings) {
            debug!("Channel {} was refreshed recently, skipping", channel_id);
            return Ok(RefreshOutcome::Skipped);
        }

        if !self.repo.claim_channel_refresh(channel_id).await? {
            return Err(PodcastError::RefreshInProgress(channel_id));
        }

        info!("Refreshing channel {} from {}", channel_id, channel.url);
        self.reporter.report(ProgressEvent::RefreshStarted {
            channel_id,
            url: channel.url.clone(),
        });

        match self.run(channel, &settings).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let message = e.to_string();
                warn!("Refresh of channel {} failed: {}", channel_id, message);
                self.mark_failed(channel_id, &message).await?;
                self.reporter.report(ProgressEvent::RefreshFailed {
                    channel_id,
                    error: message.clone(),
                });

                match e {
                    PodcastError::Network(_) | PodcastError::Parse(_) => {
                        Ok(RefreshOutcome::Failed(message))
                    }
                    other => Err(other),
                }
            }
        }
    }

    fn is_fresh(&self, channel: &Channel, settings: &PodcastSettings) -> bool {
        channel
            .last_refreshed
            .is_some_and(|at| self.clock.now() - at < settings.refresh_interval())
    }

    async fn run(
        &self,
        mut channel: Channel,
        settings: &PodcastSettings,
    ) -> Result<RefreshOutcome, PodcastError> {
        let limits = FetchLimits {
            timeout: settings.feed_timeout(),
            max_bytes: settings.max_feed_bytes,
        };
        let bytes = fetch_feed_bytes(&*self.client, &channel.url, limits).await?;
        let parsed = parse_feed(&bytes)?;

        channel.title = Some(parsed.metadata.title.clone()).filter(|t| !t.is_empty());
        channel.description = parsed.metadata.description.clone();
        channel.image_url = parsed.metadata.image_url.clone();
        channel.status = ChannelStatus::Downloading;
        channel.error_message = None;
        self.repo.update_channel(&channel).await?;

        let existing = self.repo.list_episodes(channel.id).await?;
        let total_episodes = parsed.episodes.len();
        let mut diff = diff_episodes(&existing, parsed.episodes);

        let deleted = self.repo.deleted_upstream_ids(channel.id).await?;
        diff.to_insert.retain(|e| !deleted.contains(&e.upstream_id));
        // Episodes ranked beyond the retention count would be pruned right away
        fit_within_retention(
            &existing,
            &mut diff.to_insert,
            settings.episode_retention_count.cap(),
        );

        self.reporter.report(ProgressEvent::FeedParsed {
            channel_id: channel.id,
            channel_title: channel.display_title().to_string(),
            total_episodes,
            new_episodes: diff.to_insert.len(),
        });

        let inserted = self
            .repo
            .save_episodes(channel.id, diff.to_insert)
            .await?;
        for episode in &inserted {
            debug!("Inserted episode '{}' ({})", episode.title, episode.id);
        }

        let mut updated = 0;
        for update in &diff.drifted {
            if self.repo.update_episode_metadata(update).await? {
                updated += 1;
            }
        }

        self.retention.enforce(channel.id).await?;

        let mut enqueued = 0;
        for episode in self.retention.select_for_download(channel.id).await? {
            if self.scheduler.enqueue(episode.id).await? {
                enqueued += 1;
            }
        }

        channel.status = ChannelStatus::Completed;
        channel.last_refreshed = Some(self.clock.now());
        self.repo.update_channel(&channel).await?;

        info!(
            "Refreshed channel '{}': {} new, {} updated, {} queued for download",
            channel.display_title(),
            inserted.len(),
            updated,
            enqueued
        );
        self.reporter.report(ProgressEvent::RefreshCompleted {
            channel_id: channel.id,
            inserted: inserted.len(),
            enqueued,
        });

        Ok(RefreshOutcome::Refreshed {
            inserted: inserted.len(),
            updated,
            enqueued,
        })
    }

    /// Release the refresh claim with status ERROR
    async fn mark_failed(&self, channel_id: ChannelId, message: &str) -> Result<(), PodcastError> {
        if let Some(mut channel) = self.repo.get_channel(channel_id).await? {
            channel.status = ChannelStatus::Error;
            channel.error_message = Some(message.to_string());
            self.repo.update_channel(&channel).await?;
        }
        Ok(())
    }
}
