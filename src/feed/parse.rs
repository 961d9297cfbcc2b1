// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, FixedOffset, Utc};
use tracing::debug;
use url::Url;

use crate::episode::{is_valid_audio_extension, mime_to_extension};
use crate::error::ParseError;
use crate::model::{ChannelMetadata, NewEpisode};

/// Represents a parsed podcast feed
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub metadata: ChannelMetadata,
    pub episodes: Vec<CandidateEpisode>,
}

/// A feed item that carries downloadable audio
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEpisode {
    /// GUID, or the enclosure URL when the item has none
    pub upstream_id: String,
    pub title: String,
    pub description: Option<String>,
    pub enclosure_url: String,
    pub media_type: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
    pub duration: Option<String>,
    pub size: Option<u64>,
}

impl From<CandidateEpisode> for NewEpisode {
    fn from(candidate: CandidateEpisode) -> Self {
        Self {
            upstream_id: candidate.upstream_id,
            title: candidate.title,
            description: candidate.description,
            enclosure_url: candidate.enclosure_url,
            media_type: candidate.media_type,
            pub_date: candidate.pub_date,
            duration: candidate.duration,
            file_size: candidate.size,
        }
    }
}

/// Parse RSS feed XML bytes into channel metadata and candidate episodes
///
/// Items without a usable audio enclosure are skipped, not treated as errors.
pub fn parse_feed(xml_bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    let channel = rss::Channel::read_from(xml_bytes)?;

    let episodes = channel
        .items()
        .iter()
        .filter_map(|item| match parse_episode(item) {
            Ok(episode) => Some(episode),
            Err(e) => {
                debug!("Skipping feed item: {}", e);
                None
            }
        })
        .collect();

    let image_url = channel
        .itunes_ext()
        .and_then(|ext| ext.image())
        .and_then(|url| Url::parse(url.trim()).ok())
        .or_else(|| {
            channel
                .image()
                .and_then(|img| Url::parse(img.url().trim()).ok())
        })
        .map(String::from);

    Ok(ParsedFeed {
        metadata: ChannelMetadata {
            title: remove_markup(channel.title()),
            description: Some(remove_markup(channel.description())).filter(|s| !s.is_empty()),
            image_url,
        },
        episodes,
    })
}

fn parse_episode(item: &rss::Item) -> Result<CandidateEpisode, ParseError> {
    let title = item
        .title()
        .map(remove_markup)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled Episode".to_string());

    let enclosure = item
        .enclosure()
        .ok_or_else(|| ParseError::MissingEnclosure {
            title: title.clone(),
        })?;

    let enclosure_url = Url::parse(&sanitize_url(enclosure.url()))?;
    let media_type = Some(enclosure.mime_type().trim().to_string()).filter(|s| !s.is_empty());

    if !is_audio_enclosure(&enclosure_url, media_type.as_deref()) {
        return Err(ParseError::NotAudio {
            title,
            url: enclosure_url.to_string(),
        });
    }

    let pub_date = item.pub_date().and_then(parse_date);

    let upstream_id = item
        .guid()
        .map(|g| g.value().trim().to_string())
        .filter(|g| !g.is_empty())
        .unwrap_or_else(|| enclosure_url.to_string());

    let itunes = item.itunes_ext();

    let description = item
        .description()
        .map(remove_markup)
        .filter(|d| !d.is_empty())
        .or_else(|| {
            itunes
                .and_then(|ext| ext.summary())
                .map(remove_markup)
                .filter(|d| !d.is_empty())
        });

    Ok(CandidateEpisode {
        upstream_id,
        title,
        description,
        enclosure_url: enclosure_url.to_string(),
        media_type,
        pub_date,
        duration: itunes.and_then(|ext| ext.duration().map(format_duration)),
        size: enclosure.length().trim().parse().ok().filter(|len| *len > 0),
    })
}

/// Feeds in the wild contain unencoded spaces in enclosure URLs
fn sanitize_url(url: &str) -> String {
    url.trim().replace(' ', "%20")
}

fn is_audio_enclosure(url: &Url, mime_type: Option<&str>) -> bool {
    let by_extension = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|filename| filename.rsplit_once('.'))
        .is_some_and(|(_, ext)| is_valid_audio_extension(ext));

    by_extension || mime_type.and_then(mime_to_extension).is_some()
}

fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let date_str = date_str.trim();
    DateTime::parse_from_rfc2822(date_str)
        .ok()
        .or_else(|| parse_relaxed_date(date_str))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Try to parse dates that don't strictly conform to RFC 2822
fn parse_relaxed_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    let formats = [
        "%a, %d %b %Y %H:%M:%S %z",
        "%a, %d %b %Y %H:%M %z",
        "%Y-%m-%dT%H:%M:%S%:z",
        "%Y-%m-%d %H:%M:%S %z",
    ];

    formats
        .iter()
        .find_map(|format| DateTime::parse_from_str(date_str, format).ok())
        .or_else(|| DateTime::parse_from_rfc3339(date_str).ok())
}

/// Format a bare number of seconds as `M:SS` or `H:MM:SS`; other values pass through
fn format_duration(duration: &str) -> String {
    let duration = duration.trim();
    match duration.parse::<u64>() {
        Ok(total) if duration.chars().all(|c| c.is_ascii_digit()) => {
            let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
            if hours > 0 {
                format!("{hours}:{minutes:02}:{seconds:02}")
            } else {
                format!("{minutes}:{seconds:02}")
            }
        }
        _ => duration.to_string(),
    }
}

/// Strip HTML tags and decode entities
fn remove_markup(text: &str) -> String {
    let mut stripped = String::with_capacity(text.len());
    let mut in_tag = false;

    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => stripped.push(c),
            _ => {}
        }
    }

    html_escape::decode_html_entities(&stripped).trim().to_string()
}
