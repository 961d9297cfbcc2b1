// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Repository;
use crate::error::StorageError;
use crate::model::{
    Channel, ChannelId, ChannelStatus, Episode, EpisodeId, EpisodeStatus, MetadataUpdate,
    NewEpisode,
};

/// All persisted rows, shared by the in-memory and JSON-file repositories
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(super) struct StoreState {
    next_channel_id: ChannelId,
    next_episode_id: EpisodeId,
    channels: BTreeMap<ChannelId, Channel>,
    episodes: BTreeMap<EpisodeId, Episode>,
    /// Upstream identities of deleted episodes, per channel
    #[serde(default)]
    deleted: BTreeMap<ChannelId, BTreeSet<String>>,
}

fn newest_first(episodes: &mut [Episode]) {
    episodes.sort_by_key(|e| Reverse(e.age_key()));
}

impl StoreState {
    pub(super) fn create_channel(&mut self, url: &str) -> Result<Channel, StorageError> {
        if self.channels.values().any(|c| c.url == url) {
            return Err(StorageError::DuplicateUrl(url.to_string()));
        }
        self.next_channel_id += 1;
        let channel = Channel::new(self.next_channel_id, url.to_string());
        self.channels.insert(channel.id, channel.clone());
        Ok(channel)
    }

    pub(super) fn list_channels(&self) -> Vec<Channel> {
        self.channels.values().cloned().collect()
    }

    pub(super) fn get_channel(&self, id: ChannelId) -> Option<Channel> {
        self.channels.get(&id).cloned()
    }

    pub(super) fn update_channel(&mut self, channel: &Channel) -> bool {
        match self.channels.get_mut(&channel.id) {
            Some(stored) => {
                let url = std::mem::take(&mut stored.url);
                *stored = Channel {
                    url,
                    ..channel.clone()
                };
                true
            }
            None => false,
        }
    }

    pub(super) fn claim_channel_refresh(&mut self, id: ChannelId) -> bool {
        match self.channels.get_mut(&id) {
            Some(channel) if channel.status != ChannelStatus::Downloading => {
                channel.status = ChannelStatus::Downloading;
                channel.error_message = None;
                true
            }
            _ => false,
        }
    }

    pub(super) fn delete_channel(&mut self, id: ChannelId) -> Option<Vec<Episode>> {
        self.channels.remove(&id)?;
        self.deleted.remove(&id);

        let ids: Vec<EpisodeId> = self
            .episodes
            .values()
            .filter(|e| e.channel_id == id)
            .map(|e| e.id)
            .collect();
        Some(
            ids.into_iter()
                .filter_map(|episode_id| self.episodes.remove(&episode_id))
                .collect(),
        )
    }

    pub(super) fn save_episodes(
        &mut self,
        channel_id: ChannelId,
        episodes: Vec<NewEpisode>,
    ) -> Result<Vec<Episode>, StorageError> {
        if !self.channels.contains_key(&channel_id) {
            return Err(StorageError::MissingChannel(channel_id));
        }

        let mut known: HashSet<String> = self
            .episodes
            .values()
            .filter(|e| e.channel_id == channel_id)
            .map(|e| e.upstream_id.clone())
            .collect();
        if let Some(deleted) = self.deleted.get(&channel_id) {
            known.extend(deleted.iter().cloned());
        }

        let mut saved = Vec::new();
        for new in episodes {
            if !known.insert(new.upstream_id.clone()) {
                continue;
            }
            self.next_episode_id += 1;
            let episode = Episode {
                id: self.next_episode_id,
                channel_id,
                upstream_id: new.upstream_id,
                title: new.title,
                description: new.description,
                enclosure_url: new.enclosure_url,
                media_type: new.media_type,
                pub_date: new.pub_date,
                duration: new.duration,
                file_size: new.file_size,
                path: None,
                content_hash: None,
                status: EpisodeStatus::New,
                error_message: None,
            };
            self.episodes.insert(episode.id, episode.clone());
            saved.push(episode);
        }
        Ok(saved)
    }

    pub(super) fn list_episodes(&self, channel_id: ChannelId) -> Vec<Episode> {
        let mut episodes: Vec<Episode> = self
            .episodes
            .values()
            .filter(|e| e.channel_id == channel_id)
            .cloned()
            .collect();
        newest_first(&mut episodes);
        episodes
    }

    pub(super) fn list_episodes_with_status(&self, status: EpisodeStatus) -> Vec<Episode> {
        self.episodes
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect()
    }

    pub(super) fn get_episode(&self, id: EpisodeId) -> Option<Episode> {
        self.episodes.get(&id).cloned()
    }

    pub(super) fn update_episode_metadata(&mut self, update: &MetadataUpdate) -> bool {
        match self.episodes.get_mut(&update.episode_id) {
            Some(episode) => {
                episode.title = update.title.clone();
                episode.description = update.description.clone();
                episode.duration = update.duration.clone();
                true
            }
            None => false,
        }
    }

    pub(super) fn update_episode_status(
        &mut self,
        id: EpisodeId,
        from: EpisodeStatus,
        to: EpisodeStatus,
    ) -> bool {
        match self.episodes.get_mut(&id) {
            Some(episode) if episode.status == from => {
                episode.status = to;
                if to != EpisodeStatus::Completed {
                    episode.path = None;
                }
                if to == EpisodeStatus::Downloading {
                    episode.error_message = None;
                }
                true
            }
            _ => false,
        }
    }

    pub(super) fn complete_episode(
        &mut self,
        id: EpisodeId,
        path: &Path,
        file_size: u64,
        content_hash: &str,
    ) -> bool {
        match self.episodes.get_mut(&id) {
            Some(episode) if episode.status == EpisodeStatus::Downloading => {
                episode.status = EpisodeStatus::Completed;
                episode.path = Some(path.to_path_buf());
                episode.file_size = Some(file_size);
                episode.content_hash = Some(content_hash.to_string());
                episode.error_message = None;
                true
            }
            _ => false,
        }
    }

    pub(super) fn fail_episode(&mut self, id: EpisodeId, message: &str) -> bool {
        match self.episodes.get_mut(&id) {
            Some(episode) if episode.status == EpisodeStatus::Downloading => {
                episode.status = EpisodeStatus::Error;
                episode.path = None;
                episode.error_message = Some(message.to_string());
                true
            }
            _ => false,
        }
    }

    pub(super) fn delete_episode(&mut self, id: EpisodeId) -> Option<Episode> {
        let episode = self.episodes.remove(&id)?;
        if self.channels.contains_key(&episode.channel_id) {
            self.deleted
                .entry(episode.channel_id)
                .or_default()
                .insert(episode.upstream_id.clone());
        }
        Some(episode)
    }

    pub(super) fn deleted_upstream_ids(&self, channel_id: ChannelId) -> HashSet<String> {
        self.deleted
            .get(&channel_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(super) fn newest_episodes(&self, count: usize) -> Vec<Episode> {
        let mut episodes: Vec<Episode> = self
            .episodes
            .values()
            .filter(|e| e.status == EpisodeStatus::Completed)
            .cloned()
            .collect();
        newest_first(&mut episodes);
        episodes.truncate(count);
        episodes
    }
}

/// Repository keeping everything in process memory
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: Mutex<StoreState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_channel(&self, url: &str) -> Result<Channel, StorageError> {
        self.state().create_channel(url)
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, StorageError> {
        Ok(self.state().list_channels())
    }

    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>, StorageError> {
        Ok(self.state().get_channel(id))
    }

    async fn update_channel(&self, channel: &Channel) -> Result<bool, StorageError> {
        Ok(self.state().update_channel(channel))
    }

    async fn claim_channel_refresh(&self, id: ChannelId) -> Result<bool, StorageError> {
        Ok(self.state().claim_channel_refresh(id))
    }

    async fn delete_channel(
        &self,
        id: ChannelId,
    ) -> Result<Option<Vec<Episode>>, StorageError> {
        Ok(self.state().delete_channel(id))
    }

    async fn save_episodes(
        &self,
        channel_id: ChannelId,
        episodes: Vec<NewEpisode>,
    ) -> Result<Vec<Episode>, StorageError> {
        self.state().save_episodes(channel_id, episodes)
    }

    async fn list_episodes(&self, channel_id: ChannelId) -> Result<Vec<Episode>, StorageError> {
        Ok(self.state().list_episodes(channel_id))
    }

    async fn list_episodes_with_status(
        &self,
        status: EpisodeStatus,
    ) -> Result<Vec<Episode>, StorageError> {
        Ok(self.state().list_episodes_with_status(status))
    }

    async fn get_episode(&self, id: EpisodeId) -> Result<Option<Episode>, StorageError> {
        Ok(self.state().get_episode(id))
    }

    async fn update_episode_metadata(
        &self,
        update: &MetadataUpdate,
    ) -> Result<bool, StorageError> {
        Ok(self.state().update_episode_metadata(update))
    }

    async fn update_episode_status(
        &self,
        id: EpisodeId,
        from: EpisodeStatus,
        to: EpisodeStatus,
    ) -> Result<bool, StorageError> {
        Ok(self.state().update_episode_status(id, from, to))
    }

    async fn complete_episode(
        &self,
        id: EpisodeId,
        path: &Path,
        file_size: u64,
        content_hash: &str,
    ) -> Result<bool, StorageError> {
        Ok(self
            .state()
            .complete_episode(id, path, file_size, content_hash))
    }

    async fn fail_episode(&self, id: EpisodeId, message: &str) -> Result<bool, StorageError> {
        Ok(self.state().fail_episode(id, message))
    }

    async fn delete_episode(&self, id: EpisodeId) -> Result<Option<Episode>, StorageError> {
        Ok(self.state().delete_episode(id))
    }

    async fn deleted_upstream_ids(
        &self,
        channel_id: ChannelId,
    ) -> Result<HashSet<String>, StorageError> {
        Ok(self.state().deleted_upstream_ids(channel_id))
    }

    async fn newest_episodes(&self, count: usize) -> Result<Vec<Episode>, StorageError> {
        Ok(self.state().newest_episodes(count))
    }
}
