// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Longest accepted refresh interval, one hundred years
pub const MAX_REFRESH_INTERVAL_HOURS: u64 = 24 * 365 * 100;

/// Count limit where `-1` in configuration files means "no limit"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Limit {
    Unlimited,
    AtMost(usize),
}

impl Limit {
    /// How many items must go for `count` to fit within the limit
    pub fn excess(self, count: usize) -> usize {
        match self {
            Limit::Unlimited => 0,
            Limit::AtMost(max) => count.saturating_sub(max),
        }
    }

    /// The limit as a plain number, `usize::MAX` when unlimited
    pub fn cap(self) -> usize {
        match self {
            Limit::Unlimited => usize::MAX,
            Limit::AtMost(max) => max,
        }
    }
}

impl TryFrom<i64> for Limit {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Limit::Unlimited),
            n if n >= 0 => Ok(Limit::AtMost(n as usize)),
            n => Err(format!("{n} is not a valid count (use -1 for unlimited)")),
        }
    }
}

impl From<Limit> for i64 {
    fn from(limit: Limit) -> Self {
        match limit {
            Limit::Unlimited => -1,
            Limit::AtMost(n) => n as i64,
        }
    }
}

/// Process-wide podcast settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodcastSettings {
    /// Root folder for downloaded media
    pub folder: PathBuf,
    /// Channels refreshed more recently than this are skipped unless forced
    pub refresh_interval_hours: u64,
    /// Maximum episode rows kept per channel
    pub episode_retention_count: Limit,
    /// Maximum downloaded episodes kept per channel
    pub episode_download_count: Limit,
    /// Number of download workers, read once when the scheduler starts
    pub download_parallelism: usize,
    pub feed_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub max_feed_bytes: u64,
}

impl Default for PodcastSettings {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("podcasts"),
            refresh_interval_hours: 24,
            episode_retention_count: Limit::AtMost(10),
            episode_download_count: Limit::AtMost(1),
            download_parallelism: 3,
            feed_timeout_secs: 30,
            download_timeout_secs: 600,
            max_feed_bytes: 10 * 1024 * 1024,
        }
    }
}

impl PodcastSettings {
    /// Load settings from a TOML file; missing keys take their defaults
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        let settings: Self = toml::from_str(&content).map_err(|e| SettingsError::ParseFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.download_parallelism == 0 {
            return Err(SettingsError::Invalid(
                "download_parallelism must be at least 1".to_string(),
            ));
        }
        if self.refresh_interval_hours > MAX_REFRESH_INTERVAL_HOURS {
            return Err(SettingsError::Invalid(format!(
                "refresh_interval_hours must be at most {MAX_REFRESH_INTERVAL_HOURS}"
            )));
        }
        if self.feed_timeout_secs == 0 || self.download_timeout_secs == 0 {
            return Err(SettingsError::Invalid(
                "timeouts must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> chrono::TimeDelta {
        let hours = self.refresh_interval_hours.min(MAX_REFRESH_INTERVAL_HOURS);
        chrono::TimeDelta::try_hours(hours as i64).unwrap_or_default()
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Shared accessor for the current settings.
///
/// Components read a snapshot per operation through [`SettingsHandle::current`];
/// only the host replaces the settings.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    inner: Arc<RwLock<PodcastSettings>>,
}

impl SettingsHandle {
    pub fn new(settings: PodcastSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn current(&self) -> PodcastSettings {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn replace(&self, settings: PodcastSettings) -> Result<(), SettingsError> {
        settings.validate()?;
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = settings;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn limit_parses_sentinel() {
        assert_eq!(Limit::try_from(-1), Ok(Limit::Unlimited));
        assert_eq!(Limit::try_from(0), Ok(Limit::AtMost(0)));
        assert_eq!(Limit::try_from(5), Ok(Limit::AtMost(5)));
        assert!(Limit::try_from(-2).is_err());
    }

    #[test]
    fn limit_excess() {
        assert_eq!(Limit::AtMost(2).excess(5), 3);
        assert_eq!(Limit::AtMost(2).excess(1), 0);
        assert_eq!(Limit::Unlimited.excess(1000), 0);
    }

    #[test]
    fn load_reads_toml_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("podsync.toml");
        std::fs::write(
            &path,
            r#"
folder = "/srv/podcasts"
episode_retention_count = -1
episode_download_count = 2
"#,
        )
        .unwrap();

        let settings = PodcastSettings::load(&path).unwrap();

        assert_eq!(settings.folder, PathBuf::from("/srv/podcasts"));
        assert_eq!(settings.episode_retention_count, Limit::Unlimited);
        assert_eq!(settings.episode_download_count, Limit::AtMost(2));
        assert_eq!(settings.download_parallelism, 3);
        assert_eq!(settings.refresh_interval_hours, 24);
    }

    #[test]
    fn load_rejects_zero_parallelism() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("podsync.toml");
        std::fs::write(&path, "download_parallelism = 0\n").unwrap();

        let result = PodcastSettings::load(&path);
        assert!(matches!(result, Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn load_rejects_negative_counts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("podsync.toml");
        std::fs::write(&path, "episode_download_count = -3\n").unwrap();

        let result = PodcastSettings::load(&path);
        assert!(matches!(result, Err(SettingsError::ParseFailed { .. })));
    }

    #[test]
    fn oversized_refresh_interval_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("podsync.toml");
        std::fs::write(&path, "refresh_interval_hours = 9000000000000\n").unwrap();

        let result = PodcastSettings::load(&path);
        assert!(matches!(result, Err(SettingsError::Invalid(_))));

        // Unvalidated values are clamped instead of overflowing
        let settings = PodcastSettings {
            refresh_interval_hours: u64::MAX,
            ..Default::default()
        };
        assert_eq!(
            settings.refresh_interval(),
            chrono::TimeDelta::hours(MAX_REFRESH_INTERVAL_HOURS as i64)
        );
    }

    #[test]
    fn handle_replace_validates() {
        let handle = SettingsHandle::new(PodcastSettings::default());
        let bad = PodcastSettings {
            download_parallelism: 0,
            ..Default::default()
        };
        assert!(handle.replace(bad).is_err());

        let good = PodcastSettings {
            refresh_interval_hours: 1,
            ..Default::default()
        };
        handle.replace(good.clone()).unwrap();
        assert_eq!(handle.current(), good);
    }
}
