mod download;
mod filename;

pub use download::{DownloadResult, download_episode};
pub use filename::{channel_dir_name, episode_filename, get_audio_extension};
pub(crate) use filename::{is_valid_audio_extension, mime_to_extension};
