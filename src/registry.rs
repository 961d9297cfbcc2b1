// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::{info, warn};
use url::Url;

use crate::error::{PodcastError, StorageError};
use crate::media::MediaStore;
use crate::model::{Channel, ChannelId, ChannelOverview, Episode, EpisodeId};
use crate::retention::discard_episode;
use crate::store::SharedRepository;

/// Subscriptions and the read side of channels and episodes
pub struct ChannelRegistry {
    repo: SharedRepository,
    media: MediaStore,
}

impl ChannelRegistry {
    pub fn new(repo: SharedRepository, media: MediaStore) -> Self {
        Self { repo, media }
    }

    /// Subscribe to a feed URL
    ///
    /// The URL is trimmed, spaces are encoded and it must parse as an
    /// absolute URL. Each feed URL can be subscribed once.
    pub async fn subscribe(&self, url: &str) -> Result<Channel, PodcastError> {
        let url = normalize_feed_url(url)?;

        let channel = self.repo.create_channel(&url).await.map_err(|e| match e {
            StorageError::DuplicateUrl(url) => PodcastError::DuplicateChannel(url),
            other => PodcastError::Storage(other),
        })?;

        info!("Subscribed to {} as channel {}", channel.url, channel.id);
        Ok(channel)
    }

    pub async fn list_channels(&self) -> Result<Vec<Channel>, PodcastError> {
        Ok(self.repo.list_channels().await?)
    }

    pub async fn get_channel(&self, id: ChannelId) -> Result<Channel, PodcastError> {
        self.repo
            .get_channel(id)
            .await?
            .ok_or(PodcastError::ChannelNotFound(id))
    }

    /// A channel with its episodes, newest first
    pub async fn channel_overview(&self, id: ChannelId) -> Result<ChannelOverview, PodcastError> {
        let channel = self.get_channel(id).await?;
        let episodes = self.repo.list_episodes(id).await?;
        Ok(ChannelOverview { channel, episodes })
    }

    /// Every channel with its episodes
    pub async fn overview(&self) -> Result<Vec<ChannelOverview>, PodcastError> {
        let mut overview = Vec::new();
        for channel in self.repo.list_channels().await? {
            let episodes = self.repo.list_episodes(channel.id).await?;
            overview.push(ChannelOverview { channel, episodes });
        }
        Ok(overview)
    }

    pub async fn get_episode(&self, id: EpisodeId) -> Result<Episode, PodcastError> {
        self.repo
            .get_episode(id)
            .await?
            .ok_or(PodcastError::EpisodeNotFound(id))
    }

    /// The newest downloaded episodes across all channels
    pub async fn newest_episodes(&self, count: usize) -> Result<Vec<Episode>, PodcastError> {
        Ok(self.repo.newest_episodes(count).await?)
    }

    /// Delete a channel, its episodes and their media
    ///
    /// Rows are removed first in one step; files are unlinked from the rows
    /// as they were at that moment. A download finishing later finds its row
    /// gone and unlinks its own file.
    pub async fn delete_channel(&self, id: ChannelId) -> Result<(), PodcastError> {
        let channel = self.get_channel(id).await?;
        let episodes = self
            .repo
            .delete_channel(id)
            .await?
            .ok_or(PodcastError::ChannelNotFound(id))?;

        let mut dirs: BTreeSet<PathBuf> = BTreeSet::new();
        dirs.insert(self.media.channel_dir(&channel));

        let mut failure = None;
        for path in episodes.iter().filter_map(|e| e.path.as_deref()) {
            if let Some(parent) = path.parent() {
                dirs.insert(parent.to_path_buf());
            }
            if let Err(e) = self.media.remove(path).await {
                warn!("Failed to remove {}: {}", path.display(), e);
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }

        for dir in &dirs {
            self.media.remove_dir_if_empty(dir).await;
        }

        if let Some(e) = failure {
            return Err(e.into());
        }

        info!(
            "Deleted channel '{}' ({}) with {} episodes",
            channel.display_title(),
            id,
            episodes.len()
        );
        Ok(())
    }

    /// Delete one episode and its media, returning the row as it was removed
    pub async fn delete_episode(&self, id: EpisodeId) -> Result<Episode, PodcastError> {
        let episode = discard_episode(&self.repo, &self.media, id)
            .await?
            .ok_or(PodcastError::EpisodeNotFound(id))?;

        info!("Deleted episode '{}' ({})", episode.title, id);
        Ok(episode)
    }
}

/// Trim, encode spaces and check that a feed URL is absolute
pub fn normalize_feed_url(url: &str) -> Result<String, PodcastError> {
    let candidate = url.trim().replace(' ', "%20");

    Url::parse(&candidate)
        .map(String::from)
        .map_err(|source| PodcastError::InvalidUrl {
            url: url.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EpisodeStatus;
    use crate::store::{MemoryRepository, Repository};
    use crate::testing::new_episode;
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    fn registry() -> (TempDir, Arc<MemoryRepository>, ChannelRegistry) {
        let dir = tempdir().unwrap();
        let repo = Arc::new(MemoryRepository::new());
        let registry = ChannelRegistry::new(repo.clone(), MediaStore::new(dir.path()));
        (dir, repo, registry)
    }

    /// Give an episode a file on disk inside its channel directory
    async fn download(
        repo: &MemoryRepository,
        media: &MediaStore,
        channel: &Channel,
        episode: &Episode,
    ) -> PathBuf {
        let dir = media.channel_dir(channel);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.mp3", episode.id));
        std::fs::write(&path, b"audio").unwrap();
        repo.update_episode_status(episode.id, EpisodeStatus::New, EpisodeStatus::Downloading)
            .await
            .unwrap();
        repo.complete_episode(episode.id, &path, 5, "sha256:x")
            .await
            .unwrap();
        path
    }

    #[test]
    fn normalize_encodes_spaces() {
        let url = normalize_feed_url("  https://example.com/my feed.xml ").unwrap();
        assert_eq!(url, "https://example.com/my%20feed.xml");
    }

    #[test]
    fn normalize_rejects_relative_urls() {
        let result = normalize_feed_url("feeds/show.xml");
        assert!(matches!(result, Err(PodcastError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn subscribe_rejects_duplicates() {
        let (_dir, _repo, registry) = registry();

        let channel = registry.subscribe("https://example.com/feed.xml").await.unwrap();
        assert_eq!(channel.url, "https://example.com/feed.xml");

        let again = registry.subscribe(" https://example.com/feed.xml").await;
        assert!(matches!(again, Err(PodcastError::DuplicateChannel(_))));
        assert_eq!(registry.list_channels().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let (_dir, _repo, registry) = registry();

        assert!(matches!(
            registry.get_channel(9).await,
            Err(PodcastError::ChannelNotFound(9))
        ));
        assert!(matches!(
            registry.delete_episode(9).await,
            Err(PodcastError::EpisodeNotFound(9))
        ));
    }

    #[tokio::test]
    async fn overview_lists_episodes_newest_first() {
        let (_dir, repo, registry) = registry();
        let channel = registry.subscribe("https://example.com/feed.xml").await.unwrap();
        repo.save_episodes(channel.id, vec![new_episode("a", 1), new_episode("b", 2)])
            .await
            .unwrap();

        let overview = registry.channel_overview(channel.id).await.unwrap();
        assert_eq!(overview.channel.id, channel.id);
        let ids: Vec<&str> = overview
            .episodes
            .iter()
            .map(|e| e.upstream_id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(registry.overview().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_channel_removes_media_and_directory() {
        let (dir, repo, registry) = registry();
        let media = MediaStore::new(dir.path());
        let channel = registry.subscribe("https://example.com/feed.xml").await.unwrap();
        let saved = repo
            .save_episodes(channel.id, vec![new_episode("a", 1), new_episode("b", 2)])
            .await
            .unwrap();
        let path = download(&repo, &media, &channel, &saved[0]).await;

        registry.delete_channel(channel.id).await.unwrap();

        assert!(!path.exists());
        assert!(!media.channel_dir(&channel).exists());
        assert!(repo.get_episode(saved[1].id).await.unwrap().is_none());
        assert!(registry.list_channels().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_episode_removes_its_file() {
        let (dir, repo, registry) = registry();
        let media = MediaStore::new(dir.path());
        let channel = registry.subscribe("https://example.com/feed.xml").await.unwrap();
        let saved = repo
            .save_episodes(channel.id, vec![new_episode("a", 1)])
            .await
            .unwrap();
        let path = download(&repo, &media, &channel, &saved[0]).await;

        let deleted = registry.delete_episode(saved[0].id).await.unwrap();

        assert_eq!(deleted.id, saved[0].id);
        assert!(!path.exists());
        assert!(registry.newest_episodes(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_downloads_finished_after_listing() {
        let (dir, repo, registry) = registry();
        let media = MediaStore::new(dir.path());
        let channel = registry.subscribe("https://example.com/feed.xml").await.unwrap();
        let saved = repo
            .save_episodes(channel.id, vec![new_episode("a", 1), new_episode("b", 2)])
            .await
            .unwrap();
        for episode in &saved {
            repo.update_episode_status(episode.id, EpisodeStatus::New, EpisodeStatus::Downloading)
                .await
                .unwrap();
        }

        // Both were still downloading when the overview was read
        let overview = registry.channel_overview(channel.id).await.unwrap();
        assert!(overview.episodes.iter().all(|e| e.path.is_none()));

        let dir_path = media.channel_dir(&channel);
        std::fs::create_dir_all(&dir_path).unwrap();
        let mut paths = Vec::new();
        for episode in &saved {
            let path = dir_path.join(format!("{}.mp3", episode.id));
            std::fs::write(&path, b"audio").unwrap();
            repo.complete_episode(episode.id, &path, 5, "sha256:x")
                .await
                .unwrap();
            paths.push(path);
        }

        let deleted = registry.delete_episode(overview.episodes[0].id).await.unwrap();
        assert!(deleted.path.is_some());
        registry.delete_channel(channel.id).await.unwrap();

        assert!(paths.iter().all(|p| !p.exists()));
        assert!(!dir_path.exists());
    }
}
