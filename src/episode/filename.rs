// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use url::Url;

use crate::model::{Channel, Episode};

/// Maximum length for the title portion of a filename
const MAX_TITLE_LENGTH: usize = 100;

/// Check if a character is allowed in filenames (whitelist approach)
fn is_valid_filename_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ' ')
}

/// Name of the directory holding a channel's media: "<id>-<title>"
///
/// The id prefix keeps two channels with the same title apart. Unlike episode
/// names, non-ASCII titles are preserved for the benefit of the library scanner.
pub fn channel_dir_name(channel: &Channel) -> String {
    let title = channel
        .title
        .as_deref()
        .map(|t| sanitize_filename::sanitize(t.trim()))
        .unwrap_or_default();
    let title = title.trim_matches(|c: char| c == '.' || c.is_whitespace());

    if title.is_empty() {
        channel.id.to_string()
    } else {
        format!("{}-{}", channel.id, truncate_chars(title, MAX_TITLE_LENGTH))
    }
}

/// Generate a filename for an episode: "<id>-<YYYY-MM-DD|undated>-<title>.<ext>"
///
/// The episode id makes the name unique within the podcast folder.
pub fn episode_filename(episode: &Episode) -> String {
    let date_prefix = episode
        .pub_date
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "undated".to_string());

    let sanitized_title = sanitize_title(&episode.title);
    let ext = get_audio_extension(&episode.enclosure_url, episode.media_type.as_deref());

    if sanitized_title.is_empty() {
        format!("{}-{}.{}", episode.id, date_prefix, ext)
    } else {
        format!("{}-{}-{}.{}", episode.id, date_prefix, sanitized_title, ext)
    }
}

/// Get the audio file extension for an enclosure
///
/// Attempts to extract from URL path or MIME type, defaults to "mp3"
pub fn get_audio_extension(enclosure_url: &str, mime_type: Option<&str>) -> String {
    if let Some(ext) = Url::parse(enclosure_url)
        .ok()
        .as_ref()
        .and_then(|url| url.path_segments())
        .and_then(|mut segments| segments.next_back())
        .and_then(|filename| filename.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| is_valid_audio_extension(ext))
    {
        return ext.to_lowercase();
    }

    if let Some(ext) = mime_type.and_then(mime_to_extension) {
        return ext.to_string();
    }

    "mp3".to_string()
}

/// Sanitize a title for use in a filename using whitelist approach
fn sanitize_title(title: &str) -> String {
    let sanitized: String = title
        .chars()
        .map(|c| if is_valid_filename_char(c) { c } else { '-' })
        .collect();

    let collapsed = collapse_separators(&sanitized);
    let trimmed = collapsed.trim_matches(|c: char| c == '-' || c.is_whitespace());

    if trimmed.len() > MAX_TITLE_LENGTH {
        truncate_at_boundary(trimmed, MAX_TITLE_LENGTH)
    } else {
        trimmed.to_string()
    }
}

/// Collapse multiple spaces and dashes into single dashes
fn collapse_separators(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut last_was_separator = false;

    for c in s.chars() {
        if c == '-' || c.is_whitespace() {
            if !last_was_separator {
                result.push('-');
                last_was_separator = true;
            }
        } else {
            result.push(c);
            last_was_separator = false;
        }
    }

    result
}

/// Truncate string at a word boundary
fn truncate_at_boundary(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }

    let truncated: String = s.chars().take(max_len).collect();
    if let Some(pos) = truncated.rfind('-')
        && pos > max_len / 2
    {
        return truncated[..pos].to_string();
    }

    truncated.trim_end_matches('-').to_string()
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect::<String>().trim_end().to_string()
}

/// Check if a string is a valid audio file extension
pub(crate) fn is_valid_audio_extension(ext: &str) -> bool {
    matches!(
        ext.to_lowercase().as_str(),
        "mp3" | "m4a" | "mp4" | "aac" | "ogg" | "oga" | "opus" | "wav" | "flac"
    )
}

/// Map MIME types to file extensions
pub(crate) fn mime_to_extension(mime: &str) -> Option<&'static str> {
    match mime.trim().to_lowercase().as_str() {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => Some("m4a"),
        "audio/aac" => Some("aac"),
        "audio/ogg" => Some("ogg"),
        "audio/opus" => Some("opus"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        _ => None,
    }
}
