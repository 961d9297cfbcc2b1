// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::DownloadError;
use crate::http::HttpClient;
use crate::media::MediaStore;
use crate::model::Episode;
use crate::progress::{ProgressEvent, SharedProgressReporter};

/// Outcome of a successful download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub bytes_downloaded: u64,
    /// "sha256:<hex>" of the written file
    pub content_hash: String,
}

/// Download an episode's enclosure to `output_path`
///
/// The body is streamed into `<output_path>.partial`, which is renamed to
/// `output_path` only once the whole body has been written. On any failure,
/// including the timeout, no partial file is left behind.
pub async fn download_episode<C: HttpClient + ?Sized>(
    client: &C,
    episode: &Episode,
    output_path: &Path,
    media: &MediaStore,
    timeout: Duration,
    reporter: &SharedProgressReporter,
) -> Result<DownloadResult, DownloadError> {
    let partial = MediaStore::partial_path(output_path);

    let streamed = match tokio::time::timeout(
        timeout,
        stream_to_file(client, episode, &partial, timeout, reporter),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(DownloadError::Timeout {
            url: episode.enclosure_url.clone(),
            seconds: timeout.as_secs().max(1),
        }),
    };

    let result = match streamed {
        Ok(download) => media
            .promote(&partial, output_path)
            .await
            .map(|_| download)
            .map_err(DownloadError::from),
        Err(e) => Err(e),
    };

    if result.is_err() {
        let _ = media.remove(&partial).await;
    }

    result
}

async fn stream_to_file<C: HttpClient + ?Sized>(
    client: &C,
    episode: &Episode,
    partial: &Path,
    timeout: Duration,
    reporter: &SharedProgressReporter,
) -> Result<DownloadResult, DownloadError> {
    let url = episode.enclosure_url.as_str();

    let response = client
        .get_stream(url, timeout)
        .await
        .map_err(|e| DownloadError::HttpFailed {
            url: url.to_string(),
            source: e,
        })?;

    if response.status >= 400 {
        return Err(DownloadError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    reporter.report(ProgressEvent::DownloadStarting {
        episode_id: episode.id,
        episode_title: episode.title.clone(),
        content_length: response.content_length,
    });

    let mut file = File::create(partial)
        .await
        .map_err(|e| DownloadError::FileCreateFailed {
            path: partial.to_path_buf(),
            source: e,
        })?;

    let mut hasher = Sha256::new();
    let mut bytes_downloaded: u64 = 0;
    let mut stream = response.body;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::StreamFailed {
            url: url.to_string(),
            source: e,
        })?;

        file.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::FileWriteFailed {
                path: partial.to_path_buf(),
                source: e,
            })?;

        hasher.update(&chunk);
        bytes_downloaded += chunk.len() as u64;

        reporter.report(ProgressEvent::DownloadProgress {
            episode_id: episode.id,
            bytes_downloaded,
            total_bytes: response.content_length,
        });
    }

    file.flush()
        .await
        .map_err(|e| DownloadError::FileWriteFailed {
            path: partial.to_path_buf(),
            source: e,
        })?;

    Ok(DownloadResult {
        bytes_downloaded,
        content_hash: format!("sha256:{:x}", hasher.finalize()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::progress::NoopReporter;
    use crate::testing::{MockHttpClient, Route, sample_episode};
    use tempfile::tempdir;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn download_writes_file_and_hash() {
        let dir = tempdir().unwrap();
        let media = MediaStore::new(dir.path());
        let output_path = dir.path().join("1-episode.mp3");

        let episode = sample_episode(1, "https://example.com/episode.mp3");
        let client = MockHttpClient::new();
        client.route(&episode.enclosure_url, Route::Body(b"test audio content".to_vec()));

        let result = download_episode(
            &client,
            &episode,
            &output_path,
            &media,
            TIMEOUT,
            &NoopReporter::shared(),
        )
        .await
        .unwrap();

        assert_eq!(result.bytes_downloaded, 18);
        assert!(result.content_hash.starts_with("sha256:"));
        assert_eq!(result.content_hash.len(), "sha256:".len() + 64);
        assert_eq!(std::fs::read(&output_path).unwrap(), b"test audio content");
        assert!(!MediaStore::partial_path(&output_path).exists());
    }

    #[tokio::test]
    async fn download_fails_on_http_error() {
        let dir = tempdir().unwrap();
        let media = MediaStore::new(dir.path());
        let output_path = dir.path().join("1-episode.mp3");

        let episode = sample_episode(1, "https://example.com/episode.mp3");
        let client = MockHttpClient::new();
        client.route(&episode.enclosure_url, Route::Status(404));

        let result = download_episode(
            &client,
            &episode,
            &output_path,
            &media,
            TIMEOUT,
            &NoopReporter::shared(),
        )
        .await;

        match result.unwrap_err() {
            DownloadError::HttpStatus { status, .. } => assert_eq!(status, 404),
            other => panic!("Expected HttpStatus error, got {other:?}"),
        }
        assert!(!output_path.exists());
    }

    #[tokio::test]
    async fn broken_stream_leaves_no_partial_file() {
        let dir = tempdir().unwrap();
        let media = MediaStore::new(dir.path());
        let output_path = dir.path().join("1-episode.mp3");

        let episode = sample_episode(1, "https://example.com/episode.mp3");
        let client = MockHttpClient::new();
        client.route(
            &episode.enclosure_url,
            Route::BrokenBody(b"half".to_vec(), TransportError::Other("reset".into())),
        );

        let result = download_episode(
            &client,
            &episode,
            &output_path,
            &media,
            TIMEOUT,
            &NoopReporter::shared(),
        )
        .await;

        assert!(matches!(result, Err(DownloadError::StreamFailed { .. })));
        assert!(!output_path.exists());
        assert!(!MediaStore::partial_path(&output_path).exists());
    }

    #[tokio::test]
    async fn download_times_out() {
        let dir = tempdir().unwrap();
        let media = MediaStore::new(dir.path());
        let output_path = dir.path().join("1-episode.mp3");

        let episode = sample_episode(1, "https://example.com/episode.mp3");
        let client = MockHttpClient::new();
        client.route(&episode.enclosure_url, Route::Hang);

        let result = download_episode(
            &client,
            &episode,
            &output_path,
            &media,
            Duration::from_millis(50),
            &NoopReporter::shared(),
        )
        .await;

        assert!(matches!(result, Err(DownloadError::Timeout { .. })));
        assert!(!output_path.exists());
    }
}
