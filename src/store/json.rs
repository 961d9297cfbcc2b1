// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use super::Repository;
use super::memory::StoreState;
use crate::error::StorageError;
use crate::model::{Channel, ChannelId, Episode, EpisodeId, EpisodeStatus, MetadataUpdate, NewEpisode};

/// Repository persisted as a single JSON document
///
/// The whole state is rewritten (temp file + rename) after every mutation,
/// which suits the handful of channels a personal server subscribes to.
/// Reads never wait for a write in progress.
#[derive(Debug)]
pub struct JsonFileRepository {
    path: PathBuf,
    state: Mutex<StoreState>,
    // Held across mutation and file write so snapshots land in order
    writer: AsyncMutex<()>,
}

impl JsonFileRepository {
    /// Open the state file at `path`, starting empty if it does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let state = if path.exists() {
            read_state(&path)?
        } else {
            StoreState::default()
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
            writer: AsyncMutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply a mutation and write the resulting state to disk
    async fn mutate<T: Send>(
        &self,
        f: impl FnOnce(&mut StoreState) -> T + Send,
    ) -> Result<T, StorageError> {
        let _writer = self.writer.lock().await;

        let (result, json) = {
            let mut state = self.state();
            let result = f(&mut state);
            (result, serde_json::to_string_pretty(&*state)?)
        };

        write_state(&self.path, json).await?;
        Ok(result)
    }
}

fn read_state(path: &Path) -> Result<StoreState, StorageError> {
    let content = std::fs::read_to_string(path).map_err(|e| StorageError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    serde_json::from_str(&content).map_err(|e| StorageError::JsonParseFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

async fn write_state(path: &Path, json: String) -> Result<(), StorageError> {
    let tmp = path.with_extension("json.tmp");

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::WriteFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }

    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| StorageError::WriteFailed {
            path: tmp.clone(),
            source: e,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StorageError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

#[async_trait]
impl Repository for JsonFileRepository {
    async fn create_channel(&self, url: &str) -> Result<Channel, StorageError> {
        self.mutate(|s| s.create_channel(url)).await?
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, StorageError> {
        Ok(self.state().list_channels())
    }

    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>, StorageError> {
        Ok(self.state().get_channel(id))
    }

    async fn update_channel(&self, channel: &Channel) -> Result<bool, StorageError> {
        self.mutate(|s| s.update_channel(channel)).await
    }

    async fn claim_channel_refresh(&self, id: ChannelId) -> Result<bool, StorageError> {
        self.mutate(|s| s.claim_channel_refresh(id)).await
    }

    async fn delete_channel(
        &self,
        id: ChannelId,
    ) -> Result<Option<Vec<Episode>>, StorageError> {
        self.mutate(|s| s.delete_channel(id)).await
    }

    async fn save_episodes(
        &self,
        channel_id: ChannelId,
        episodes: Vec<NewEpisode>,
    ) -> Result<Vec<Episode>, StorageError> {
        self.mutate(|s| s.save_episodes(channel_id, episodes)).await?
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
        self.mutate(|s| s.update_episode_metadata(update)).await
    }

    async fn update_episode_status(
        &self,
        id: EpisodeId,
        from: EpisodeStatus,
        to: EpisodeStatus,
    ) -> Result<bool, StorageError> {
        self.mutate(|s| s.update_episode_status(id, from, to)).await
    }

    async fn complete_episode(
        &self,
        id: EpisodeId,
        path: &Path,
        file_size: u64,
        content_hash: &str,
    ) -> Result<bool, StorageError> {
        self.mutate(|s| s.complete_episode(id, path, file_size, content_hash)).await
    }

    async fn fail_episode(&self, id: EpisodeId, message: &str) -> Result<bool, StorageError> {
        self.mutate(|s| s.fail_episode(id, message)).await
    }

    async fn delete_episode(&self, id: EpisodeId) -> Result<Option<Episode>, StorageError> {
        self.mutate(|s| s.delete_episode(id)).await
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::new_episode;
    use tempfile::tempdir;

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let channel_id = {
            let repo = JsonFileRepository::open(&path).unwrap();
            let channel = repo.create_channel("https://example.com/feed").await.unwrap();
            repo.save_episodes(channel.id, vec![new_episode("a", 1), new_episode("b", 2)])
                .await
                .unwrap();
            channel.id
        };

        let reopened = JsonFileRepository::open(&path).unwrap();
        assert_eq!(reopened.list_channels().await.unwrap().len(), 1);
        assert_eq!(reopened.list_episodes(channel_id).await.unwrap().len(), 2);

        // Deletions are remembered across a reopen
        let first = reopened.list_episodes(channel_id).await.unwrap()[0].id;
        reopened.delete_episode(first).await.unwrap();
        let again = JsonFileRepository::open(&path).unwrap();
        assert!(again.deleted_upstream_ids(channel_id).await.unwrap().contains("b"));

        // Ids keep counting up after a reopen
        let next = reopened
            .create_channel("https://example.com/other")
            .await
            .unwrap();
        assert_eq!(next.id, channel_id + 1);
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn open_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let repo = JsonFileRepository::open(dir.path().join("nested/state.json")).unwrap();
        assert!(repo.state().list_channels().is_empty());
    }

    #[test]
    fn open_rejects_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = JsonFileRepository::open(&path);
        assert!(matches!(result, Err(StorageError::JsonParseFailed { .. })));
    }
}
