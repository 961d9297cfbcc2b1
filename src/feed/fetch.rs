// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;

use crate::error::FetchError;
use crate::http::HttpClient;

/// Bounds applied to a single feed fetch
#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    pub timeout: Duration,
    pub max_bytes: u64,
}

/// Fetch raw feed bytes from a URL (without parsing)
///
/// The whole exchange, body included, must finish within `limits.timeout`.
pub async fn fetch_feed_bytes<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    limits: FetchLimits,
) -> Result<Bytes, FetchError> {
    let seconds = limits.timeout.as_secs().max(1);

    match tokio::time::timeout(limits.timeout, fetch_bounded(client, url, limits)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            url: url.to_string(),
            seconds,
        }),
    }
}

async fn fetch_bounded<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    limits: FetchLimits,
) -> Result<Bytes, FetchError> {
    let seconds = limits.timeout.as_secs().max(1);

    let response = client
        .get_stream(url, limits.timeout)
        .await
        .map_err(|e| FetchError::from_transport(url, e, seconds))?;

    if response.status >= 400 {
        return Err(FetchError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    let too_large = || FetchError::TooLarge {
        url: url.to_string(),
        limit: limits.max_bytes,
    };

    if response.content_length.is_some_and(|len| len > limits.max_bytes) {
        return Err(too_large());
    }

    let mut buffer = BytesMut::new();
    let mut stream = response.body;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FetchError::from_transport(url, e, seconds))?;
        if buffer.len() as u64 + chunk.len() as u64 > limits.max_bytes {
            return Err(too_large());
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(buffer.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::testing::{MockHttpClient, Route};

    fn limits() -> FetchLimits {
        FetchLimits {
            timeout: Duration::from_millis(200),
            max_bytes: 64,
        }
    }

    #[tokio::test]
    async fn fetch_returns_body() {
        let client = MockHttpClient::new();
        client.route("https://example.com/feed.xml", Route::Body(b"<rss/>".to_vec()));

        let bytes = fetch_feed_bytes(&client, "https://example.com/feed.xml", limits())
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"<rss/>");
    }

    #[tokio::test]
    async fn fetch_classifies_http_errors() {
        let client = MockHttpClient::new();
        client.route("https://example.com/feed.xml", Route::Status(503));

        let result = fetch_feed_bytes(&client, "https://example.com/feed.xml", limits()).await;
        assert!(matches!(
            result,
            Err(FetchError::HttpStatus { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn fetch_classifies_unreachable_hosts() {
        let client = MockHttpClient::new();

        let result = fetch_feed_bytes(&client, "https://nowhere.invalid/feed", limits()).await;
        assert!(matches!(result, Err(FetchError::Unreachable { .. })));
    }

    #[tokio::test]
    async fn fetch_times_out_on_hanging_server() {
        let client = MockHttpClient::new();
        client.route("https://example.com/slow.xml", Route::Hang);

        let result = fetch_feed_bytes(&client, "https://example.com/slow.xml", limits()).await;
        assert!(matches!(result, Err(FetchError::Timeout { .. })));
    }

    #[tokio::test]
    async fn fetch_maps_transport_timeouts() {
        let client = MockHttpClient::new();
        client.route(
            "https://example.com/feed.xml",
            Route::Fail(TransportError::Timeout),
        );

        let result = fetch_feed_bytes(&client, "https://example.com/feed.xml", limits()).await;
        assert!(matches!(result, Err(FetchError::Timeout { .. })));
    }

    #[tokio::test]
    async fn fetch_rejects_oversized_feeds() {
        let client = MockHttpClient::new();
        client.route("https://example.com/big.xml", Route::Body(vec![b'x'; 65]));

        let result = fetch_feed_bytes(&client, "https://example.com/big.xml", limits()).await;
        assert!(matches!(result, Err(FetchError::TooLarge { limit: 64, .. })));
    }
}
