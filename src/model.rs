// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ChannelId = u64;
pub type EpisodeId = u64;

/// Outcome of the most recent refresh of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    New,
    /// A refresh is in progress
    Downloading,
    Completed,
    Error,
}

/// Download lifecycle of a single episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpisodeStatus {
    New,
    Downloading,
    Completed,
    Error,
    Skipped,
}

impl EpisodeStatus {
    /// Whether an explicit download request may claim an episode in this state
    pub fn is_downloadable(self) -> bool {
        matches!(
            self,
            EpisodeStatus::New | EpisodeStatus::Error | EpisodeStatus::Skipped
        )
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelStatus::New => "NEW",
            ChannelStatus::Downloading => "DOWNLOADING",
            ChannelStatus::Completed => "COMPLETED",
            ChannelStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

impl fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EpisodeStatus::New => "NEW",
            EpisodeStatus::Downloading => "DOWNLOADING",
            EpisodeStatus::Completed => "COMPLETED",
            EpisodeStatus::Error => "ERROR",
            EpisodeStatus::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// A subscribed podcast feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    /// Immutable after creation
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub status: ChannelStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refreshed: Option<DateTime<Utc>>,
}

impl Channel {
    pub fn new(id: ChannelId, url: String) -> Self {
        Self {
            id,
            url,
            title: None,
            description: None,
            image_url: None,
            status: ChannelStatus::New,
            error_message: None,
            last_refreshed: None,
        }
    }

    /// Title for display, falling back to the feed URL before the first refresh
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }
}

/// An episode row owned by a channel
///
/// `path` is `Some` exactly when `status` is [`EpisodeStatus::Completed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub channel_id: ChannelId,
    /// GUID, or the enclosure URL when the feed item has none
    pub upstream_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enclosure_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pub_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub status: EpisodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Episode {
    /// Sort key for "oldest first": undated episodes sort before dated ones,
    /// ties broken by ascending id.
    pub fn age_key(&self) -> (Option<DateTime<Utc>>, EpisodeId) {
        (self.pub_date, self.id)
    }
}

/// An episode about to be inserted; the repository assigns id and status
#[derive(Debug, Clone, PartialEq)]
pub struct NewEpisode {
    pub upstream_id: String,
    pub title: String,
    pub description: Option<String>,
    pub enclosure_url: String,
    pub media_type: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
    pub duration: Option<String>,
    pub file_size: Option<u64>,
}

/// Non-destructive field update for an already-known episode
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataUpdate {
    pub episode_id: EpisodeId,
    pub title: String,
    pub description: Option<String>,
    pub duration: Option<String>,
}

/// Channel metadata taken from a freshly parsed feed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelMetadata {
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

/// Channel together with its episodes, newest first
#[derive(Debug, Clone)]
pub struct ChannelOverview {
    pub channel: Channel,
    pub episodes: Vec<Episode>,
}
