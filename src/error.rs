// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::{ChannelId, EpisodeId};

/// Low-level failure reported by an [`HttpClient`](crate::http::HttpClient)
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

/// Errors that can occur when fetching a feed document
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("Feed {url} is unreachable: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Timed out after {seconds}s fetching {url}")]
    Timeout { url: String, seconds: u64 },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Feed {url} exceeds the size limit of {limit} bytes")]
    TooLarge { url: String, limit: u64 },
}

impl FetchError {
    pub(crate) fn from_transport(url: &str, error: TransportError, timeout_secs: u64) -> Self {
        match error {
            TransportError::Timeout => FetchError::Timeout {
                url: url.to_string(),
                seconds: timeout_secs,
            },
            TransportError::Connect(reason) | TransportError::Other(reason) => {
                FetchError::Unreachable {
                    url: url.to_string(),
                    reason,
                }
            }
        }
    }
}

/// Errors that can occur when parsing a feed document or one of its items
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to parse RSS feed: {0}")]
    Malformed(#[from] rss::Error),

    #[error("Episode '{title}' has no enclosure (audio file)")]
    MissingEnclosure { title: String },

    #[error("Episode '{title}' has a non-audio enclosure: {url}")]
    NotAudio { title: String, url: String },

    #[error("Invalid enclosure URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Errors raised by a [`Repository`](crate::store::Repository) implementation
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to read state file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write state file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse state JSON in {path}: {source}")]
    JsonParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize state: {0}")]
    JsonSerializeFailed(#[from] serde_json::Error),

    #[error("A channel with feed URL {0} already exists")]
    DuplicateUrl(String),

    #[error("Channel {0} does not exist")]
    MissingChannel(ChannelId),
}

/// Errors that can occur when touching the media folder
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read directory {path}: {source}")]
    ReadDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to rename {from} to {to}: {source}")]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove {path}: {source}")]
    RemoveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path {0} is outside the podcast folder")]
    OutsideRoot(PathBuf),
}

/// Errors that can occur during episode downloads
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP request failed for {url}: {source}")]
    HttpFailed {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Download of {url} timed out after {seconds}s")]
    Timeout { url: String, seconds: u64 },

    #[error("Failed to create file {path}: {source}")]
    FileCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to file {path}: {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream error while downloading {url}: {source}")]
    StreamFailed {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Media(#[from] MediaError),
}

/// Errors that can occur when loading settings
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Top-level errors for podcast operations
#[derive(Error, Debug)]
pub enum PodcastError {
    #[error("Network error: {0}")]
    Network(#[from] FetchError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] MediaError),

    #[error("Episode {0} is already claimed by another worker")]
    ConcurrencyConflict(EpisodeId),

    #[error("The media library is being scanned, try again later")]
    ScanInProgress,

    #[error("Channel {0} not found")]
    ChannelNotFound(ChannelId),

    #[error("Episode {0} not found")]
    EpisodeNotFound(EpisodeId),

    #[error("Already subscribed to {0}")]
    DuplicateChannel(String),

    #[error("Invalid feed URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Channel {0} is already being refreshed")]
    RefreshInProgress(ChannelId),
}
