// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod json;
mod memory;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::model::{
    Channel, ChannelId, Episode, EpisodeId, EpisodeStatus, MetadataUpdate, NewEpisode,
};

pub use json::JsonFileRepository;
pub use memory::MemoryRepository;

/// Persistence boundary for channels and episodes.
///
/// Methods returning `bool` are conditional updates: `false` means the row is
/// gone or its precondition no longer held, and nothing was written.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert a channel in status NEW; fails with `DuplicateUrl` if the URL is taken
    async fn create_channel(&self, url: &str) -> Result<Channel, StorageError>;

    async fn list_channels(&self) -> Result<Vec<Channel>, StorageError>;

    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>, StorageError>;

    /// Overwrite everything but the id and URL
    async fn update_channel(&self, channel: &Channel) -> Result<bool, StorageError>;

    /// Move a channel that is not already refreshing into DOWNLOADING
    async fn claim_channel_refresh(&self, id: ChannelId) -> Result<bool, StorageError>;

    /// Remove a channel together with its episode rows
    ///
    /// Returns the removed episodes as they were at deletion, or `None` if
    /// the channel did not exist.
    async fn delete_channel(&self, id: ChannelId)
    -> Result<Option<Vec<Episode>>, StorageError>;

    /// Insert episodes as NEW, skipping upstream identities the channel
    /// already has or has deleted before
    async fn save_episodes(
        &self,
        channel_id: ChannelId,
        episodes: Vec<NewEpisode>,
    ) -> Result<Vec<Episode>, StorageError>;

    /// Episodes of a channel, newest first
    async fn list_episodes(&self, channel_id: ChannelId) -> Result<Vec<Episode>, StorageError>;

    async fn list_episodes_with_status(
        &self,
        status: EpisodeStatus,
    ) -> Result<Vec<Episode>, StorageError>;

    async fn get_episode(&self, id: EpisodeId) -> Result<Option<Episode>, StorageError>;

    /// Update title, description and duration; status and path are untouched
    async fn update_episode_metadata(&self, update: &MetadataUpdate)
    -> Result<bool, StorageError>;

    /// Compare-and-set on the status of an episode
    ///
    /// Moving into DOWNLOADING clears the previous error message.
    async fn update_episode_status(
        &self,
        id: EpisodeId,
        from: EpisodeStatus,
        to: EpisodeStatus,
    ) -> Result<bool, StorageError>;

    /// DOWNLOADING -> COMPLETED, recording where and what was written
    async fn complete_episode(
        &self,
        id: EpisodeId,
        path: &Path,
        file_size: u64,
        content_hash: &str,
    ) -> Result<bool, StorageError>;

    /// DOWNLOADING -> ERROR with a message
    async fn fail_episode(&self, id: EpisodeId, message: &str) -> Result<bool, StorageError>;

    /// Remove an episode row, returning it as it was at deletion
    ///
    /// The upstream identity is remembered so the episode is not inserted
    /// again on a later refresh.
    async fn delete_episode(&self, id: EpisodeId) -> Result<Option<Episode>, StorageError>;

    /// Upstream identities of episodes deleted from a channel
    async fn deleted_upstream_ids(
        &self,
        channel_id: ChannelId,
    ) -> Result<HashSet<String>, StorageError>;

    /// The `count` most recently published COMPLETED episodes across all channels
    async fn newest_episodes(&self, count: usize) -> Result<Vec<Episode>, StorageError>;
}

/// A shared reference to a repository
pub type SharedRepository = Arc<dyn Repository>;
