// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod clock;
pub mod config;
pub mod diff;
pub mod episode;
pub mod error;
pub mod feed;
pub mod http;
pub mod media;
pub mod model;
pub mod progress;
pub mod refresh;
pub mod registry;
pub mod retention;
pub mod scanner;
pub mod scheduler;
pub mod service;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{Limit, PodcastSettings, SettingsHandle};
pub use error::{
    DownloadError, FetchError, MediaError, ParseError, PodcastError, SettingsError, StorageError,
    TransportError,
};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use model::{
    Channel, ChannelId, ChannelOverview, ChannelStatus, Episode, EpisodeId, EpisodeStatus,
};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter};
pub use refresh::{ChannelRefresh, RefreshOutcome};
pub use scanner::{LibraryScanner, ScanState};
pub use scheduler::RecoveryReport;
pub use service::{PodcastService, ServiceDeps};
pub use store::{JsonFileRepository, MemoryRepository, Repository, SharedRepository};
