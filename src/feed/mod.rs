mod fetch;
mod parse;

pub use fetch::{FetchLimits, fetch_feed_bytes};
pub use parse::{CandidateEpisode, ParsedFeed, parse_feed};
