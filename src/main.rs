// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;

use podsync::{
    ChannelRefresh, ChannelStatus, Episode, EpisodeId, EpisodeStatus, JsonFileRepository, Limit,
    NoopReporter, PodcastService, PodcastSettings, ProgressEvent, ProgressReporter,
    RefreshOutcome, ReqwestClient, ScanState, ServiceDeps, SettingsHandle,
    SharedProgressReporter, SystemClock,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static BROOM: Emoji<'_, '_> = Emoji("🧹 ", "[-] ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");

const DEFAULT_CONFIG: &str = "podsync.toml";

/// Subscribe to podcasts and keep their newest episodes downloaded
#[derive(Parser, Debug)]
#[command(name = "podsync")]
#[command(about = "Subscribe to podcasts and keep their newest episodes downloaded")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Settings file (TOML); podsync.toml is used when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// File holding subscriptions and episode state
    #[arg(long, global = true, default_value = "podsync-state.json")]
    state: PathBuf,

    /// Folder for downloaded episodes (overrides the settings file)
    #[arg(long, global = true)]
    folder: Option<PathBuf>,

    /// Downloaded episodes to keep per channel, -1 for unlimited
    #[arg(long, global = true, allow_negative_numbers = true, value_parser = parse_limit)]
    download_count: Option<Limit>,

    /// Episodes to remember per channel, -1 for unlimited
    #[arg(long, global = true, allow_negative_numbers = true, value_parser = parse_limit)]
    retention_count: Option<Limit>,

    /// Maximum number of concurrent downloads
    #[arg(short = 'c', long, global = true)]
    concurrent: Option<usize>,

    /// Quiet mode - suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed and refresh it right away
    Subscribe { url: String },
    /// Show channels and their episodes
    List,
    /// Show the newest downloaded episodes across all channels
    Newest {
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },
    /// Refresh one channel, or all of them
    Refresh {
        channel: Option<u64>,
        /// Refresh even if the channel was refreshed recently
        #[arg(long)]
        force: bool,
    },
    /// Download an episode, including skipped or failed ones
    Download { episode: EpisodeId },
    /// Unsubscribe and delete all downloaded episodes of a channel
    DeleteChannel { channel: u64 },
    /// Delete an episode and its file
    DeleteEpisode { episode: EpisodeId },
    /// Refresh all channels periodically until interrupted
    Watch,
}

fn parse_limit(value: &str) -> Result<Limit, String> {
    let n: i64 = value.parse().map_err(|e| format!("{e}"))?;
    Limit::try_from(n)
}

/// Progress reporter using indicatif for terminal output
struct IndicatifReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<EpisodeId, ProgressBar>>,
    main_bar: ProgressBar,
}

impl IndicatifReporter {
    fn new() -> Self {
        let multi = MultiProgress::new();

        let main_style = ProgressStyle::default_bar()
            .template("{spinner:.green} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let main_bar = multi.add(ProgressBar::new_spinner());
        main_bar.set_style(main_style);
        main_bar.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
            main_bar,
        }
    }

    fn get_or_create_bar(&self, episode_id: EpisodeId) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(bar) = bars.get(&episode_id) {
            return bar.clone();
        }

        let style = ProgressStyle::default_bar()
            .template(&format!(
                "  {DOWNLOAD}[{{bar:30.cyan/blue}}] {{bytes}}/{{total_bytes}} {{wide_msg}}"
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");

        let bar = self.multi.add(ProgressBar::new(0));
        bar.set_style(style);
        bars.insert(episode_id, bar.clone());
        bar
    }

    fn finish_bar(&self, episode_id: EpisodeId) {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bar) = bars.remove(&episode_id) {
            bar.finish_and_clear();
        }
    }

    fn finish(&self) {
        self.main_bar.finish_and_clear();
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::RefreshStarted { url, .. } => {
                self.main_bar
                    .set_message(format!("{SEARCH}Fetching feed: {}", url.cyan()));
            }

            ProgressEvent::FeedParsed {
                channel_title,
                total_episodes,
                new_episodes,
                ..
            } => {
                self.main_bar.set_message(format!(
                    "{HEADPHONES}{} • {} episodes in feed, {} new",
                    channel_title.bold().green(),
                    total_episodes.to_string().cyan(),
                    new_episodes.to_string().yellow()
                ));
            }

            ProgressEvent::RefreshCompleted { .. } => {}

            ProgressEvent::RefreshFailed { channel_id, error } => {
                self.main_bar.println(format!(
                    "{FAILURE}Channel {} - {}",
                    channel_id.to_string().yellow(),
                    error.red()
                ));
            }

            ProgressEvent::DownloadQueued { episode_id, episode_title } => {
                let bar = self.get_or_create_bar(episode_id);
                bar.set_message(format!("{} (queued)", truncate_title(&episode_title, 40)));
            }

            ProgressEvent::DownloadStarting {
                episode_id,
                episode_title,
                content_length,
            } => {
                let bar = self.get_or_create_bar(episode_id);
                bar.set_length(content_length.unwrap_or(0));
                bar.set_position(0);
                bar.set_message(truncate_title(&episode_title, 40));
            }

            ProgressEvent::DownloadProgress {
                episode_id,
                bytes_downloaded,
                total_bytes,
            } => {
                let bar = self.get_or_create_bar(episode_id);
                if let Some(total) = total_bytes {
                    bar.set_length(total);
                }
                bar.set_position(bytes_downloaded);
            }

            ProgressEvent::DownloadCompleted {
                episode_id,
                episode_title,
                bytes_downloaded,
            } => {
                let bar = self.get_or_create_bar(episode_id);
                bar.set_position(bytes_downloaded);
                self.main_bar.println(format!(
                    "{SUCCESS}{}",
                    truncate_title(&episode_title, 60).green()
                ));
                self.finish_bar(episode_id);
            }

            ProgressEvent::DownloadFailed {
                episode_id,
                episode_title,
                error,
            } => {
                self.main_bar.println(format!(
                    "{FAILURE}{} - {}",
                    truncate_title(&episode_title, 30).red(),
                    error.red()
                ));
                self.finish_bar(episode_id);
            }

            ProgressEvent::DownloadDiscarded { episode_id } => {
                self.finish_bar(episode_id);
            }

            ProgressEvent::EpisodesPruned { channel_id, count } => {
                self.main_bar.println(format!(
                    "{BROOM}Removed {} old episodes from channel {}",
                    count.to_string().yellow(),
                    channel_id
                ));
            }

            ProgressEvent::RecoveryCompleted {
                reset_episodes,
                reset_channels,
                partial_files_cleaned,
            } => {
                if reset_episodes + reset_channels + partial_files_cleaned > 0 {
                    self.main_bar.println(format!(
                        "{BROOM}Recovered {} interrupted downloads and {} interrupted refreshes, removed {} partial files",
                        reset_episodes.to_string().yellow(),
                        reset_channels.to_string().yellow(),
                        partial_files_cleaned.to_string().yellow()
                    ));
                }
            }
        }
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let kept: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn load_settings(cli: &Cli) -> Result<PodcastSettings> {
    let mut settings = match &cli.config {
        Some(path) => PodcastSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).exists() => {
            PodcastSettings::load(Path::new(DEFAULT_CONFIG))
                .with_context(|| format!("Failed to load settings from {DEFAULT_CONFIG}"))?
        }
        None => PodcastSettings::default(),
    };

    if let Some(folder) = &cli.folder {
        settings.folder = folder.clone();
    }
    if let Some(limit) = cli.download_count {
        settings.episode_download_count = limit;
    }
    if let Some(limit) = cli.retention_count {
        settings.episode_retention_count = limit;
    }
    if let Some(concurrent) = cli.concurrent {
        settings.download_parallelism = concurrent;
    }

    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn status_label(status: EpisodeStatus) -> colored::ColoredString {
    let label = status.to_string();
    match status {
        EpisodeStatus::Completed => label.green(),
        EpisodeStatus::Downloading => label.cyan(),
        EpisodeStatus::Error => label.red(),
        EpisodeStatus::Skipped => label.dimmed(),
        EpisodeStatus::New => label.yellow(),
    }
}

fn print_episode(episode: &Episode) {
    let date = episode
        .pub_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "undated".to_string());
    println!(
        "    {:>5}  {}  {:<11}  {}",
        episode.id.to_string().dimmed(),
        date,
        status_label(episode.status),
        episode.title
    );
    if let Some(error) = &episode.error_message {
        println!("           {}{}", CROSS, error.dimmed());
    }
}

fn print_refresh(title: &str, outcome: &RefreshOutcome) {
    match outcome {
        RefreshOutcome::Refreshed {
            inserted,
            updated,
            enqueued,
        } => println!(
            "{SUCCESS}{}: {} new, {} updated, {} queued",
            title.bold(),
            inserted.to_string().green(),
            updated,
            enqueued.to_string().cyan()
        ),
        RefreshOutcome::Skipped => {
            println!("{}{}: refreshed recently", CROSS, title.dimmed())
        }
        RefreshOutcome::Failed(message) => {
            println!("{FAILURE}{}: {}", title.bold(), message.red())
        }
        RefreshOutcome::Busy => println!("{}{}: already refreshing", CROSS, title.yellow()),
    }
}

async fn print_refresh_all(service: &PodcastService, results: &[ChannelRefresh]) -> Result<()> {
    for result in results {
        let title = service
            .get_channel(result.channel_id)
            .await
            .map(|c| c.display_title().to_string())
            .unwrap_or_else(|_| format!("Channel {}", result.channel_id));
        print_refresh(&title, &result.outcome);
    }
    Ok(())
}

async fn run(cli: &Cli, service: &PodcastService) -> Result<()> {
    match &cli.command {
        Command::Subscribe { url } => {
            let channel = service.subscribe(url).await.context("Failed to subscribe")?;
            println!(
                "{SUCCESS}Subscribed to {} as channel {}",
                channel.url.cyan(),
                channel.id.to_string().bold()
            );
            let outcome = service
                .refresh_channel(channel.id, true)
                .await
                .context("Failed to refresh channel")?;
            let channel = service.get_channel(channel.id).await?;
            print_refresh(channel.display_title(), &outcome);
        }

        Command::List => {
            for overview in service.overview().await? {
                let channel = &overview.channel;
                let status = match channel.status {
                    ChannelStatus::Error => channel.status.to_string().red(),
                    _ => channel.status.to_string().dimmed(),
                };
                println!(
                    "{HEADPHONES}{} {} {}",
                    channel.id.to_string().dimmed(),
                    channel.display_title().bold(),
                    status
                );
                if let Some(error) = &channel.error_message {
                    println!("    {}{}", CROSS, error.red());
                }
                for episode in &overview.episodes {
                    print_episode(episode);
                }
            }
        }

        Command::Newest { count } => {
            for episode in service.newest_episodes(*count).await? {
                print_episode(&episode);
            }
        }

        Command::Refresh { channel, force } => match channel {
            Some(id) => {
                let outcome = service
                    .refresh_channel(*id, *force)
                    .await
                    .with_context(|| format!("Failed to refresh channel {id}"))?;
                let channel = service.get_channel(*id).await?;
                print_refresh(channel.display_title(), &outcome);
            }
            None => {
                let results = service
                    .refresh_all(*force)
                    .await
                    .context("Failed to refresh channels")?;
                print_refresh_all(service, &results).await?;
            }
        },

        Command::Download { episode } => {
            let queued = service
                .download_episode(*episode)
                .await
                .with_context(|| format!("Failed to queue episode {episode}"))?;
            if !queued {
                println!("{}Episode {} is already downloading or downloaded", CROSS, episode);
            }
        }

        Command::DeleteChannel { channel } => {
            service
                .delete_channel(*channel)
                .await
                .with_context(|| format!("Failed to delete channel {channel}"))?;
            println!("{SUCCESS}Deleted channel {}", channel);
        }

        Command::DeleteEpisode { episode } => {
            let deleted = service
                .delete_episode(*episode)
                .await
                .with_context(|| format!("Failed to delete episode {episode}"))?;
            println!("{SUCCESS}Deleted episode '{}'", deleted.title);
        }

        Command::Watch => {
            let period = service
                .settings()
                .current()
                .refresh_interval()
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(3600))
                .max(std::time::Duration::from_secs(60));
            let mut ticker = tokio::time::interval(period);
            let mut interrupted = std::pin::pin!(tokio::signal::ctrl_c());

            loop {
                // Only waits are raced; a Ctrl-C during a refresh is seen once it is done
                tokio::select! {
                    biased;
                    _ = &mut interrupted => {
                        info!("Interrupted, finishing queued downloads");
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                match service.refresh_all(false).await {
                    Ok(results) => print_refresh_all(service, &results).await?,
                    Err(e) => println!("{FAILURE}{}", e.to_string().red()),
                }
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("podsync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if !cli.quiet {
        println!(
            "\n{}{} {}\n",
            MICROPHONE,
            "podsync".bold().magenta(),
            "- Podcast Subscriptions".dimmed()
        );
    }

    let settings = load_settings(&cli)?;
    let folder = settings.folder.clone();

    let repo = JsonFileRepository::open(&cli.state)
        .with_context(|| format!("Failed to open state file {}", cli.state.display()))?;

    let indicatif = (!cli.quiet).then(|| Arc::new(IndicatifReporter::new()));
    let reporter: SharedProgressReporter = match &indicatif {
        Some(reporter) => reporter.clone() as SharedProgressReporter,
        None => NoopReporter::shared(),
    };

    let service = PodcastService::start(ServiceDeps {
        repo: Arc::new(repo),
        client: Arc::new(ReqwestClient::new()),
        settings: SettingsHandle::new(settings),
        scanner: Arc::new(ScanState::new()),
        clock: SystemClock::shared(),
        reporter,
    });

    service
        .recover()
        .await
        .context("Failed to recover interrupted refreshes and downloads")?;

    let result = run(&cli, &service).await;

    service.wait_idle().await;
    service.shutdown().await;

    if let Some(reporter) = &indicatif {
        reporter.finish();
    }

    result?;

    if !cli.quiet {
        println!(
            "\n{FOLDER}Media: {}\n",
            folder.display().to_string().cyan()
        );
    }

    Ok(())
}
