// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use crate::clock::SharedClock;
use crate::config::SettingsHandle;
use crate::error::PodcastError;
use crate::http::HttpClient;
use crate::media::MediaStore;
use crate::model::{Channel, ChannelId, ChannelOverview, Episode, EpisodeId};
use crate::progress::SharedProgressReporter;
use crate::refresh::{ChannelRefresh, RefreshOrchestrator, RefreshOutcome};
use crate::registry::ChannelRegistry;
use crate::retention::RetentionEnforcer;
use crate::scanner::{LibraryScanner, ScanGuard};
use crate::scheduler::{DownloadScheduler, RecoveryReport};
use crate::store::SharedRepository;

/// Collaborators a [`PodcastService`] is built from
pub struct ServiceDeps {
    pub repo: SharedRepository,
    pub client: Arc<dyn HttpClient>,
    pub settings: SettingsHandle,
    pub scanner: Arc<dyn LibraryScanner>,
    pub clock: SharedClock,
    pub reporter: SharedProgressReporter,
}

/// Entry point for hosts: every action a user can trigger
///
/// Mutating operations are rejected with [`PodcastError::ScanInProgress`]
/// while the media library is being scanned.
pub struct PodcastService {
    guard: ScanGuard,
    registry: ChannelRegistry,
    refresher: RefreshOrchestrator,
    scheduler: Arc<DownloadScheduler>,
    settings: SettingsHandle,
}

impl PodcastService {
    /// Wire the components together and start the download workers
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(deps: ServiceDeps) -> Self {
        let ServiceDeps {
            repo,
            client,
            settings,
            scanner,
            clock,
            reporter,
        } = deps;

        let media = MediaStore::new(settings.current().folder);
        let retention = Arc::new(RetentionEnforcer::new(
            repo.clone(),
            media.clone(),
            settings.clone(),
            reporter.clone(),
        ));
        let scheduler = Arc::new(DownloadScheduler::start(
            repo.clone(),
            media.clone(),
            client.clone(),
            settings.clone(),
            retention.clone(),
            reporter.clone(),
        ));
        let refresher = RefreshOrchestrator::new(
            repo.clone(),
            client,
            settings.clone(),
            clock,
            retention,
            scheduler.clone(),
            reporter,
        );

        Self {
            guard: ScanGuard::new(scanner),
            registry: ChannelRegistry::new(repo, media),
            refresher,
            scheduler,
            settings,
        }
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn is_library_scan_active(&self) -> bool {
        self.guard.is_library_scan_active()
    }

    /// Reset interrupted downloads; run once before anything else
    pub async fn recover(&self) -> Result<RecoveryReport, PodcastError> {
        self.scheduler.recover().await
    }

    pub async fn subscribe(&self, url: &str) -> Result<Channel, PodcastError> {
        self.guard.check("subscribe")?;
        self.registry.subscribe(url).await
    }

    pub async fn refresh_channel(
        &self,
        id: ChannelId,
        force: bool,
    ) -> Result<RefreshOutcome, PodcastError> {
        self.guard.check("refresh")?;
        self.refresher.refresh_channel(id, force).await
    }

    pub async fn refresh_all(&self, force: bool) -> Result<Vec<ChannelRefresh>, PodcastError> {
        self.guard.check("refresh")?;
        self.refresher.refresh_all(force).await
    }

    pub async fn delete_channel(&self, id: ChannelId) -> Result<(), PodcastError> {
        self.guard.check("channel deletion")?;
        self.registry.delete_channel(id).await
    }

    pub async fn delete_episode(&self, id: EpisodeId) -> Result<Episode, PodcastError> {
        self.guard.check("episode deletion")?;
        self.registry.delete_episode(id).await
    }

    /// Queue an episode for download, including ERROR and SKIPPED ones
    ///
    /// Returns false when it is already downloading or downloaded.
    pub async fn download_episode(&self, id: EpisodeId) -> Result<bool, PodcastError> {
        self.guard.check("download")?;
        self.scheduler.enqueue(id).await
    }

    pub async fn list_channels(&self) -> Result<Vec<Channel>, PodcastError> {
        self.registry.list_channels().await
    }

    pub async fn get_channel(&self, id: ChannelId) -> Result<Channel, PodcastError> {
        self.registry.get_channel(id).await
    }

    pub async fn channel_overview(&self, id: ChannelId) -> Result<ChannelOverview, PodcastError> {
        self.registry.channel_overview(id).await
    }

    pub async fn overview(&self) -> Result<Vec<ChannelOverview>, PodcastError> {
        self.registry.overview().await
    }

    pub async fn get_episode(&self, id: EpisodeId) -> Result<Episode, PodcastError> {
        self.registry.get_episode(id).await
    }

    pub async fn newest_episodes(&self, count: usize) -> Result<Vec<Episode>, PodcastError> {
        self.registry.newest_episodes(count).await
    }

    /// Wait until no claimed download is left
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await
    }

    /// Finish queued downloads and stop the workers
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await
    }
}
