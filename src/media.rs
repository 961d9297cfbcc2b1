// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::episode::channel_dir_name;
use crate::error::MediaError;
use crate::model::Channel;

const PARTIAL_SUFFIX: &str = ".partial";

/// Filesystem access scoped to the podcast folder
///
/// Every path handed to a mutating method must live below the root.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the media of `channel`
    pub fn channel_dir(&self, channel: &Channel) -> PathBuf {
        self.root.join(channel_dir_name(channel))
    }

    /// Temporary name a download is written to before being promoted
    pub fn partial_path(path: &Path) -> PathBuf {
        let mut name: OsString = path.as_os_str().to_owned();
        name.push(PARTIAL_SUFFIX);
        PathBuf::from(name)
    }

    pub async fn ensure_dir(&self, dir: &Path) -> Result<(), MediaError> {
        self.check_scoped(dir)?;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| MediaError::CreateDirectoryFailed {
                path: dir.to_path_buf(),
                source: e,
            })
    }

    /// Atomically move a finished partial file to its final name
    pub async fn promote(&self, partial: &Path, final_path: &Path) -> Result<(), MediaError> {
        self.check_scoped(partial)?;
        self.check_scoped(final_path)?;
        tokio::fs::rename(partial, final_path)
            .await
            .map_err(|e| MediaError::RenameFailed {
                from: partial.to_path_buf(),
                to: final_path.to_path_buf(),
                source: e,
            })
    }

    /// Unlink a file; returns false if it was already gone
    pub async fn remove(&self, path: &Path) -> Result<bool, MediaError> {
        self.check_scoped(path)?;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MediaError::RemoveFailed {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    pub async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    /// Remove a channel directory once nothing is left in it
    pub async fn remove_dir_if_empty(&self, dir: &Path) {
        if self.check_scoped(dir).is_err() || dir == self.root {
            return;
        }
        // Fails harmlessly when the directory is missing or still has files
        if tokio::fs::remove_dir(dir).await.is_ok() {
            debug!("Removed empty channel directory {}", dir.display());
        }
    }

    /// Delete `.partial` files left behind by interrupted downloads
    ///
    /// Creates the root when it does not exist yet. Returns the number of
    /// files removed.
    pub async fn cleanup_partial_files(&self) -> Result<usize, MediaError> {
        if !self.exists(&self.root).await {
            tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
                MediaError::CreateDirectoryFailed {
                    path: self.root.clone(),
                    source: e,
                }
            })?;
            return Ok(0);
        }

        let mut cleaned = 0;
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let read_error = |e| MediaError::ReadDirectoryFailed {
                path: dir.clone(),
                source: e,
            };
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(read_error)?;

            while let Some(entry) = entries.next_entry().await.map_err(read_error)? {
                let path = entry.path();

                if entry.file_type().await.map_err(read_error)?.is_dir() {
                    pending.push(path);
                    continue;
                }

                let is_partial = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(PARTIAL_SUFFIX));

                if is_partial && tokio::fs::remove_file(&path).await.is_ok() {
                    debug!("Removed partial file {}", path.display());
                    cleaned += 1;
                }
            }
        }

        Ok(cleaned)
    }

    fn check_scoped(&self, path: &Path) -> Result<(), MediaError> {
        let escapes = path
            .components()
            .any(|c| matches!(c, Component::ParentDir));
        if escapes || !path.starts_with(&self.root) {
            return Err(MediaError::OutsideRoot(path.to_path_buf()));
        }
        Ok(())
    }
}
