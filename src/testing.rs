// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared fixtures for unit tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream;
use tokio::sync::Notify;

use crate::error::TransportError;
use crate::feed::CandidateEpisode;
use crate::http::{ByteStream, HttpClient, HttpResponse};
use crate::model::{Episode, EpisodeStatus, NewEpisode};

/// How the mock server answers a URL
#[derive(Clone)]
pub enum Route {
    /// 200 with the given body and a matching content length
    Body(Vec<u8>),
    /// The given status with an empty body
    Status(u16),
    /// Never answers
    Hang,
    /// Fails before any response arrives
    Fail(TransportError),
    /// 200, then the body stream fails after the given bytes
    BrokenBody(Vec<u8>, TransportError),
    /// Like `Body`, but only answers once the gate is notified
    Gated(Vec<u8>, Arc<Notify>),
}

/// In-memory HTTP client; unknown URLs fail like an unreachable host
#[derive(Clone, Default)]
pub struct MockHttpClient {
    routes: Arc<Mutex<HashMap<String, Route>>>,
    requests: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: &str, route: Route) {
        self.routes.lock().unwrap().insert(url.to_string(), route);
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

fn ok_body(data: Vec<u8>) -> HttpResponse {
    let content_length = Some(data.len() as u64);
    let body: ByteStream = Box::pin(stream::iter(vec![Ok(Bytes::from(data))]));
    HttpResponse {
        status: 200,
        content_length,
        body,
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get_stream(
        &self,
        url: &str,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        *self
            .requests
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;

        let route = self.routes.lock().unwrap().get(url).cloned();

        match route {
            None => Err(TransportError::Connect(format!("no route to {url}"))),
            Some(Route::Body(data)) => Ok(ok_body(data)),
            Some(Route::Status(status)) => Ok(HttpResponse {
                status,
                content_length: Some(0),
                body: Box::pin(stream::empty()),
            }),
            Some(Route::Hang) => std::future::pending().await,
            Some(Route::Fail(error)) => Err(error),
            Some(Route::BrokenBody(data, error)) => {
                let body: ByteStream =
                    Box::pin(stream::iter(vec![Ok(Bytes::from(data)), Err(error)]));
                Ok(HttpResponse {
                    status: 200,
                    content_length: None,
                    body,
                })
            }
            Some(Route::Gated(data, gate)) => {
                gate.notified().await;
                Ok(ok_body(data))
            }
        }
    }
}

/// Noon UTC on the given day of January 2024
pub fn day(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()
}

pub fn sample_episode(id: u64, url: &str) -> Episode {
    Episode {
        id,
        channel_id: 1,
        upstream_id: url.to_string(),
        title: "Test Episode".to_string(),
        description: None,
        enclosure_url: url.to_string(),
        media_type: Some("audio/mpeg".to_string()),
        pub_date: Some(day(1)),
        duration: None,
        file_size: None,
        path: None,
        content_hash: None,
        status: EpisodeStatus::New,
        error_message: None,
    }
}

pub fn new_episode(upstream_id: &str, pub_day: u32) -> NewEpisode {
    NewEpisode {
        upstream_id: upstream_id.to_string(),
        title: format!("Episode {upstream_id}"),
        description: None,
        enclosure_url: format!("https://media.example.com/{upstream_id}.mp3"),
        media_type: Some("audio/mpeg".to_string()),
        pub_date: Some(day(pub_day)),
        duration: None,
        file_size: None,
    }
}

pub fn candidate(upstream_id: &str, pub_day: Option<u32>) -> CandidateEpisode {
    CandidateEpisode {
        upstream_id: upstream_id.to_string(),
        title: format!("Episode {upstream_id}"),
        description: None,
        enclosure_url: format!("https://media.example.com/{upstream_id}.mp3"),
        media_type: Some("audio/mpeg".to_string()),
        pub_date: pub_day.map(day),
        duration: None,
        size: None,
    }
}

/// Minimal RSS document with one audio item per `(guid, day)` pair
///
/// Enclosures point at `https://media.example.com/<guid>.mp3`.
pub fn feed_xml(title: &str, items: &[(&str, u32)]) -> String {
    let items: String = items
        .iter()
        .map(|(guid, pub_day)| {
            format!(
                r#"<item>
      <title>Episode {guid}</title>
      <guid>{guid}</guid>
      <pubDate>{date}</pubDate>
      <enclosure url="https://media.example.com/{guid}.mp3" length="1024" type="audio/mpeg"/>
    </item>"#,
                date = day(*pub_day).to_rfc2822(),
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>{title}</title>
    <link>https://example.com</link>
    <description>Test podcast</description>
    {items}
  </channel>
</rss>"#
    )
}
