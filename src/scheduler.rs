// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SettingsHandle;
use crate::episode::{download_episode, episode_filename};
use crate::error::PodcastError;
use crate::http::HttpClient;
use crate::media::MediaStore;
use crate::model::{ChannelStatus, Episode, EpisodeId, EpisodeStatus};
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::retention::RetentionEnforcer;
use crate::store::SharedRepository;

const INTERRUPTED_MESSAGE: &str = "Download was interrupted";
const REFRESH_INTERRUPTED_MESSAGE: &str = "Refresh was interrupted";

/// Result of startup recovery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Episodes moved from DOWNLOADING back to ERROR
    pub reset_episodes: usize,
    /// Channels whose refresh claim was released
    pub reset_channels: usize,
    pub partial_files_cleaned: usize,
}

struct SchedulerInner {
    repo: SharedRepository,
    media: MediaStore,
    client: Arc<dyn HttpClient>,
    settings: SettingsHandle,
    retention: Arc<RetentionEnforcer>,
    reporter: SharedProgressReporter,
    /// Claimed downloads that have not reached a terminal state yet
    pending: watch::Sender<usize>,
}

/// Fixed-size pool of download workers fed by a queue of claimed episodes
pub struct DownloadScheduler {
    inner: Arc<SchedulerInner>,
    queue: std::sync::Mutex<Option<mpsc::UnboundedSender<EpisodeId>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DownloadScheduler {
    /// Spawn `download_parallelism` workers on the current tokio runtime
    pub fn start(
        repo: SharedRepository,
        media: MediaStore,
        client: Arc<dyn HttpClient>,
        settings: SettingsHandle,
        retention: Arc<RetentionEnforcer>,
        reporter: SharedProgressReporter,
    ) -> Self {
        let parallelism = settings.current().download_parallelism.max(1);
        let (pending, _) = watch::channel(0usize);

        let inner = Arc::new(SchedulerInner {
            repo,
            media,
            client,
            settings,
            retention,
            reporter,
            pending,
        });

        // Workers share one receiver, the first idle worker takes the next id
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let workers = (0..parallelism)
            .map(|worker_id| {
                let inner = inner.clone();
                let queue_rx = queue_rx.clone();
                tokio::spawn(async move {
                    loop {
                        let next = queue_rx.lock().await.recv().await;
                        let Some(episode_id) = next else { break };

                        inner.process(worker_id, episode_id).await;
                        inner.pending.send_modify(|n| *n = n.saturating_sub(1));
                    }
                })
            })
            .collect();

        Self {
            inner,
            queue: std::sync::Mutex::new(Some(queue_tx)),
            workers: Mutex::new(workers),
        }
    }

    /// Claim an episode and queue it for download
    ///
    /// Returns `Ok(false)` when the episode is not eligible or another caller
    /// claimed it first; at most one caller ever wins the claim.
    pub async fn enqueue(&self, episode_id: EpisodeId) -> Result<bool, PodcastError> {
        let episode = match self.claim(episode_id).await {
            Ok(episode) => episode,
            Err(PodcastError::ConcurrencyConflict(id)) => {
                debug!("Episode {} already claimed, ignoring enqueue", id);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        self.inner.pending.send_modify(|n| *n += 1);

        let sent = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|tx| tx.send(episode_id).is_ok());

        if !sent {
            warn!("Download queue is closed, releasing episode {}", episode_id);
            self.inner
                .repo
                .update_episode_status(episode_id, EpisodeStatus::Downloading, episode.status)
                .await?;
            self.inner.pending.send_modify(|n| *n = n.saturating_sub(1));
            return Ok(false);
        }

        self.inner.reporter.report(ProgressEvent::DownloadQueued {
            episode_id,
            episode_title: episode.title.clone(),
        });
        Ok(true)
    }

    /// Atomically move an eligible episode into DOWNLOADING
    ///
    /// Returns the episode as it was before the claim.
    async fn claim(&self, episode_id: EpisodeId) -> Result<Episode, PodcastError> {
        let episode = self
            .inner
            .repo
            .get_episode(episode_id)
            .await?
            .ok_or(PodcastError::EpisodeNotFound(episode_id))?;

        if !episode.status.is_downloadable() {
            return Err(PodcastError::ConcurrencyConflict(episode_id));
        }

        let claimed = self
            .inner
            .repo
            .update_episode_status(episode_id, episode.status, EpisodeStatus::Downloading)
            .await?;

        if claimed {
            Ok(episode)
        } else {
            Err(PodcastError::ConcurrencyConflict(episode_id))
        }
    }

    /// Number of claimed downloads not yet finished
    pub fn pending(&self) -> usize {
        *self.inner.pending.borrow()
    }

    /// Wait until every claimed download has reached a terminal state
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Stop accepting work, finish what is queued and join the workers
    pub async fn shutdown(&self) {
        drop(self.queue.lock().unwrap_or_else(|e| e.into_inner()).take());

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            let _ = worker.await;
        }
    }

    /// Reset channels and episodes stuck in DOWNLOADING by a previous
    /// process and remove leftover partial files
    ///
    /// Must run before any refresh or download is started.
    pub async fn recover(&self) -> Result<RecoveryReport, PodcastError> {
        let partial_files_cleaned = self.inner.media.cleanup_partial_files().await?;

        let mut reset_channels = 0;
        for mut channel in self.inner.repo.list_channels().await? {
            if channel.status != ChannelStatus::Downloading {
                continue;
            }
            channel.status = ChannelStatus::Error;
            channel.error_message = Some(REFRESH_INTERRUPTED_MESSAGE.to_string());
            if self.inner.repo.update_channel(&channel).await? {
                info!(
                    "Released channel {} since its refresh was interrupted",
                    channel.id
                );
                reset_channels += 1;
            }
        }

        let mut reset_episodes = 0;
        for episode in self
            .inner
            .repo
            .list_episodes_with_status(EpisodeStatus::Downloading)
            .await?
        {
            if self
                .inner
                .repo
                .fail_episode(episode.id, INTERRUPTED_MESSAGE)
                .await?
            {
                info!(
                    "Reset episode '{}' ({}) since its download was interrupted",
                    episode.title, episode.id
                );
                reset_episodes += 1;
            }
        }

        self.inner.reporter.report(ProgressEvent::RecoveryCompleted {
            reset_episodes,
            reset_channels,
            partial_files_cleaned,
        });

        Ok(RecoveryReport {
            reset_episodes,
            reset_channels,
            partial_files_cleaned,
        })
    }
}

impl SchedulerInner {
    async fn process(&self, worker_id: usize, episode_id: EpisodeId) {
        if let Err(e) = self.download(worker_id, episode_id).await {
            warn!("Download of episode {} could not be recorded: {}", episode_id, e);
        }
    }

    async fn download(&self, worker_id: usize, episode_id: EpisodeId) -> Result<(), PodcastError> {
        let Some(episode) = self.repo.get_episode(episode_id).await? else {
            info!("Episode {} was deleted before its download started", episode_id);
            return Ok(());
        };
        if episode.status != EpisodeStatus::Downloading {
            debug!("Episode {} is no longer claimed, skipping", episode_id);
            return Ok(());
        }

        let Some(channel) = self.repo.get_channel(episode.channel_id).await? else {
            info!("Channel of episode {} was deleted, skipping download", episode_id);
            return Ok(());
        };

        let settings = self.settings.current();
        let dir = self.media.channel_dir(&channel);
        if let Err(e) = self.media.ensure_dir(&dir).await {
            self.record_failure(&episode, &e.to_string()).await?;
            return Ok(());
        }
        let output_path: PathBuf = dir.join(episode_filename(&episode));

        debug!(
            "Worker {} downloading '{}' from {}",
            worker_id, episode.title, episode.enclosure_url
        );

        let result = download_episode(
            &*self.client,
            &episode,
            &output_path,
            &self.media,
            settings.download_timeout(),
            &self.reporter,
        )
        .await;

        let download = match result {
            Ok(download) => download,
            Err(e) => {
                self.record_failure(&episode, &e.to_string()).await?;
                return Ok(());
            }
        };

        let completed = self
            .repo
            .complete_episode(
                episode_id,
                &output_path,
                download.bytes_downloaded,
                &download.content_hash,
            )
            .await;

        match completed {
            Ok(true) => {
                info!(
                    "Downloaded {} bytes for episode '{}' ({})",
                    download.bytes_downloaded, episode.title, episode_id
                );
                self.reporter.report(ProgressEvent::DownloadCompleted {
                    episode_id,
                    episode_title: episode.title.clone(),
                    bytes_downloaded: download.bytes_downloaded,
                });
                self.retention.enforce(episode.channel_id).await?;
            }
            Ok(false) => {
                info!(
                    "Episode {} was deleted during its download, discarding the file",
                    episode_id
                );
                self.media.remove(&output_path).await?;
                if self.repo.get_channel(episode.channel_id).await?.is_none() {
                    self.media.remove_dir_if_empty(&dir).await;
                }
                self.reporter
                    .report(ProgressEvent::DownloadDiscarded { episode_id });
            }
            Err(e) => {
                self.media.remove(&output_path).await?;
                self.record_failure(&episode, &e.to_string()).await?;
            }
        }

        Ok(())
    }

    async fn record_failure(&self, episode: &Episode, message: &str) -> Result<(), PodcastError> {
        warn!(
            "Failed to download episode '{}' from {}: {}",
            episode.title, episode.enclosure_url, message
        );
        self.repo.fail_episode(episode.id, message).await?;
        self.reporter.report(ProgressEvent::DownloadFailed {
            episode_id: episode.id,
            episode_title: episode.title.clone(),
            error: message.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Limit, PodcastSettings};
    use crate::progress::NoopReporter;
    use crate::store::{MemoryRepository, Repository};
    use crate::testing::{MockHttpClient, Route, new_episode};
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};
    use tokio::sync::Notify;

    struct Fixture {
        dir: TempDir,
        repo: Arc<MemoryRepository>,
        client: MockHttpClient,
        scheduler: Arc<DownloadScheduler>,
        channel_id: u64,
    }

    async fn fixture(download_count: Limit) -> Fixture {
        let dir = tempdir().unwrap();
        let repo = Arc::new(MemoryRepository::new());
        let client = MockHttpClient::new();
        let settings = SettingsHandle::new(PodcastSettings {
            folder: dir.path().to_path_buf(),
            episode_retention_count: Limit::Unlimited,
            episode_download_count: download_count,
            download_parallelism: 2,
            download_timeout_secs: 5,
            ..Default::default()
        });
        let media = MediaStore::new(dir.path());
        let retention = Arc::new(RetentionEnforcer::new(
            repo.clone(),
            media.clone(),
            settings.clone(),
            NoopReporter::shared(),
        ));
        let scheduler = Arc::new(DownloadScheduler::start(
            repo.clone(),
            media,
            Arc::new(client.clone()),
            settings,
            retention,
            NoopReporter::shared(),
        ));
        let channel_id = repo
            .create_channel("https://example.com/feed")
            .await
            .unwrap()
            .id;

        Fixture {
            dir,
            repo,
            client,
            scheduler,
            channel_id,
        }
    }

    async fn insert(f: &Fixture, upstream_id: &str, day: u32) -> Episode {
        let episode = f
            .repo
            .save_episodes(f.channel_id, vec![new_episode(upstream_id, day)])
            .await
            .unwrap()
            .remove(0);
        f.client
            .route(&episode.enclosure_url, Route::Body(b"audio bytes".to_vec()));
        episode
    }

    fn files_on_disk(dir: &std::path::Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(d) = pending.pop() {
            for entry in std::fs::read_dir(d).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    files.push(path);
                }
            }
        }
        files
    }

    #[tokio::test]
    async fn downloads_episode_to_completion() {
        let f = fixture(Limit::Unlimited).await;
        let episode = insert(&f, "a", 1).await;

        assert!(f.scheduler.enqueue(episode.id).await.unwrap());
        f.scheduler.wait_idle().await;

        let done = f.repo.get_episode(episode.id).await.unwrap().unwrap();
        assert_eq!(done.status, EpisodeStatus::Completed);
        assert_eq!(done.file_size, Some(11));
        let path = done.path.unwrap();
        assert!(path.starts_with(f.dir.path()));
        assert_eq!(std::fs::read(path).unwrap(), b"audio bytes");
    }

    #[tokio::test]
    async fn failed_download_marks_error_without_file() {
        let f = fixture(Limit::Unlimited).await;
        let episode = insert(&f, "a", 1).await;
        f.client.route(&episode.enclosure_url, Route::Status(500));

        f.scheduler.enqueue(episode.id).await.unwrap();
        f.scheduler.wait_idle().await;

        let failed = f.repo.get_episode(episode.id).await.unwrap().unwrap();
        assert_eq!(failed.status, EpisodeStatus::Error);
        assert!(failed.path.is_none());
        assert!(failed.error_message.unwrap().contains("500"));
        assert!(files_on_disk(f.dir.path()).is_empty());
    }

    #[tokio::test]
    async fn concurrent_enqueue_claims_once() {
        let f = fixture(Limit::Unlimited).await;
        let episode = insert(&f, "a", 1).await;

        let attempts = (0..8).map(|_| {
            let scheduler = f.scheduler.clone();
            let id = episode.id;
            tokio::spawn(async move { scheduler.enqueue(id).await.unwrap() })
        });
        let results = futures::future::join_all(attempts).await;
        let claimed = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(claimed, 1);

        f.scheduler.wait_idle().await;
        assert_eq!(f.client.request_count(&episode.enclosure_url), 1);
        let done = f.repo.get_episode(episode.id).await.unwrap().unwrap();
        assert_eq!(done.status, EpisodeStatus::Completed);
    }

    #[tokio::test]
    async fn completed_episodes_are_not_requeued() {
        let f = fixture(Limit::Unlimited).await;
        let episode = insert(&f, "a", 1).await;

        f.scheduler.enqueue(episode.id).await.unwrap();
        f.scheduler.wait_idle().await;

        assert!(!f.scheduler.enqueue(episode.id).await.unwrap());
        assert_eq!(f.client.request_count(&episode.enclosure_url), 1);
    }

    #[tokio::test]
    async fn error_episodes_can_be_retried() {
        let f = fixture(Limit::Unlimited).await;
        let episode = insert(&f, "a", 1).await;
        f.client.route(&episode.enclosure_url, Route::Status(503));

        f.scheduler.enqueue(episode.id).await.unwrap();
        f.scheduler.wait_idle().await;

        f.client
            .route(&episode.enclosure_url, Route::Body(b"second try".to_vec()));
        assert!(f.scheduler.enqueue(episode.id).await.unwrap());
        f.scheduler.wait_idle().await;

        let done = f.repo.get_episode(episode.id).await.unwrap().unwrap();
        assert_eq!(done.status, EpisodeStatus::Completed);
        assert!(done.error_message.is_none());
    }

    #[tokio::test]
    async fn unknown_episode_is_reported() {
        let f = fixture(Limit::Unlimited).await;
        let result = f.scheduler.enqueue(404).await;
        assert!(matches!(result, Err(PodcastError::EpisodeNotFound(404))));
    }

    #[tokio::test]
    async fn deleting_during_download_discards_file() {
        let f = fixture(Limit::Unlimited).await;
        let episode = insert(&f, "a", 1).await;
        let gate = Arc::new(Notify::new());
        f.client.route(
            &episode.enclosure_url,
            Route::Gated(b"audio bytes".to_vec(), gate.clone()),
        );

        f.scheduler.enqueue(episode.id).await.unwrap();
        // Let the worker start its request before deleting the row
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.repo.delete_episode(episode.id).await.unwrap();
        gate.notify_one();

        f.scheduler.wait_idle().await;
        assert!(f.repo.get_episode(episode.id).await.unwrap().is_none());
        assert!(files_on_disk(f.dir.path()).is_empty());
    }

    #[tokio::test]
    async fn completion_enforces_download_count() {
        let f = fixture(Limit::AtMost(1)).await;
        let older = insert(&f, "old", 1).await;
        let newer = insert(&f, "new", 2).await;

        f.scheduler.enqueue(older.id).await.unwrap();
        f.scheduler.wait_idle().await;
        f.scheduler.enqueue(newer.id).await.unwrap();
        f.scheduler.wait_idle().await;

        assert!(f.repo.get_episode(older.id).await.unwrap().is_none());
        let kept = f.repo.get_episode(newer.id).await.unwrap().unwrap();
        assert_eq!(kept.status, EpisodeStatus::Completed);
        assert_eq!(files_on_disk(f.dir.path()).len(), 1);
    }

    #[tokio::test]
    async fn recover_resets_stuck_downloads() {
        let f = fixture(Limit::Unlimited).await;
        let episode = insert(&f, "a", 1).await;
        f.repo
            .update_episode_status(episode.id, EpisodeStatus::New, EpisodeStatus::Downloading)
            .await
            .unwrap();
        std::fs::write(f.dir.path().join("stale.mp3.partial"), b"half").unwrap();

        let report = f.scheduler.recover().await.unwrap();

        assert_eq!(report.reset_episodes, 1);
        assert_eq!(report.reset_channels, 0);
        assert_eq!(report.partial_files_cleaned, 1);
        let reset = f.repo.get_episode(episode.id).await.unwrap().unwrap();
        assert_eq!(reset.status, EpisodeStatus::Error);
        assert_eq!(reset.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
    }

    #[tokio::test]
    async fn shutdown_drains_queue_and_rejects_new_work() {
        let f = fixture(Limit::Unlimited).await;
        let first = insert(&f, "a", 1).await;
        let second = insert(&f, "b", 2).await;

        f.scheduler.enqueue(first.id).await.unwrap();
        f.scheduler.shutdown().await;

        let done = f.repo.get_episode(first.id).await.unwrap().unwrap();
        assert_eq!(done.status, EpisodeStatus::Completed);

        assert!(!f.scheduler.enqueue(second.id).await.unwrap());
        let untouched = f.repo.get_episode(second.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, EpisodeStatus::New);
        assert_eq!(f.scheduler.pending(), 0);
    }
}
