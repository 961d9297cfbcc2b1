// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use crate::feed::CandidateEpisode;
use crate::model::{Episode, EpisodeId, MetadataUpdate, NewEpisode};

/// Result of reconciling a fetched feed against the persisted episodes
#[derive(Debug, Clone, Default)]
pub struct EpisodeDiff {
    /// Episodes not known yet, newest first (undated last)
    pub to_insert: Vec<NewEpisode>,
    /// Field corrections for known episodes whose feed entry changed
    pub drifted: Vec<MetadataUpdate>,
    /// Number of candidates that matched a known episode
    pub unchanged: usize,
}

/// Compare candidates against existing episodes by upstream identity
///
/// Episodes missing from the feed are left alone: a truncated feed must never
/// cost local downloads. Drift updates only ever replace a field with a
/// present value.
pub fn diff_episodes(existing: &[Episode], candidates: Vec<CandidateEpisode>) -> EpisodeDiff {
    let known: HashMap<&str, &Episode> = existing
        .iter()
        .map(|e| (e.upstream_id.as_str(), e))
        .collect();

    let mut seen = HashSet::new();
    let mut to_insert = Vec::new();
    let mut drifted = Vec::new();
    let mut unchanged = 0;

    for candidate in candidates {
        if !seen.insert(candidate.upstream_id.clone()) {
            continue;
        }

        match known.get(candidate.upstream_id.as_str()) {
            Some(episode) => {
                unchanged += 1;
                if let Some(update) = metadata_drift(episode, &candidate) {
                    drifted.push(update);
                }
            }
            None => to_insert.push(NewEpisode::from(candidate)),
        }
    }

    // Stable sort keeps feed order for equal dates
    to_insert.sort_by_key(|e| Reverse(e.pub_date));

    EpisodeDiff {
        to_insert,
        drifted,
        unchanged,
    }
}

/// Drop inserts that would rank beyond `cap` among all of a channel's rows
///
/// Ranking follows retention: newest publication date first, undated last,
/// ties going to the higher id. Inserted rows get ids above every existing
/// one, in `to_insert` order.
pub fn fit_within_retention(existing: &[Episode], to_insert: &mut Vec<NewEpisode>, cap: usize) {
    if existing.len().saturating_add(to_insert.len()) <= cap {
        return;
    }

    let next_id: EpisodeId = existing.iter().map(|e| e.id).max().unwrap_or(0) + 1;
    let mut ranked: Vec<_> = existing
        .iter()
        .map(|e| (e.age_key(), None))
        .chain(
            to_insert
                .iter()
                .enumerate()
                .map(|(i, e)| ((e.pub_date, next_id + i as EpisodeId), Some(i))),
        )
        .collect();
    ranked.sort_by_key(|(key, _)| Reverse(*key));

    let kept: HashSet<usize> = ranked
        .into_iter()
        .take(cap)
        .filter_map(|(_, index)| index)
        .collect();

    let mut index = 0;
    to_insert.retain(|_| {
        let keep = kept.contains(&index);
        index += 1;
        keep
    });
}

fn metadata_drift(episode: &Episode, candidate: &CandidateEpisode) -> Option<MetadataUpdate> {
    let update = MetadataUpdate {
        episode_id: episode.id,
        title: candidate.title.clone(),
        description: candidate
            .description
            .clone()
            .or_else(|| episode.description.clone()),
        duration: candidate.duration.clone().or_else(|| episode.duration.clone()),
    };

    let changed = update.title != episode.title
        || update.description != episode.description
        || update.duration != episode.duration;

    changed.then_some(update)
}
