mod caption;
mod config;
mod error;
mod logging;
mod matcher;
mod orchestrator;
mod parser;
mod poster;
mod selector;
mod state;
mod subtitle;
mod template;
mod timecode;

use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::poster::{DryRunPoster, OutboxPoster, Poster};
use crate::state::RunStateStore;
use crate::subtitle::{track_tag, Track};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand};

fn main() {
    match run() {
        Ok(()) => (),
        Err(err) => {
            eprintln!("An error occurred: {}", err);
            for cause in err.chain().skip(1) {
                eprintln!("    {}", cause);
            }
            std::process::exit(1);
        }
    }
}

#[derive(ClapParser)]
#[command(about = "Post a random, captioned frame of a show")]
struct Cli {
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "The configuration file to use.",
        default_value = "configs.yml"
    )]
    config: PathBuf,
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Log more. Can be repeated."
    )]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Select, caption and post one frame.
    Post {
        #[arg(long, help = "Log the post instead of queueing it, and do not record it.")]
        dry_run: bool,
    },
    /// Print the subtitle shown at a point in time.
    Caption {
        #[arg(value_name = "FILE", help = "An SRT, WebVTT or ASS subtitle file.")]
        file: PathBuf,
        #[arg(value_name = "TIMECODE", help = "For instance 00:01:23.456.")]
        at: String,
    },
    /// Show or clear the history of posted frames.
    History {
        #[arg(long, help = "Forget every posted frame.")]
        clear: bool,
    },
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let level = logging::level_for(cli.verbose);

    match cli.command {
        Command::Post { dry_run } => {
            let config = load_config(&cli.config, level)?;
            post(&config, dry_run)
        }
        Command::Caption { file, at } => {
            logging::init(level, None)?;
            print_caption(&file, &at)
        }
        Command::History { clear } => {
            let config = load_config(&cli.config, level)?;
            history(&config, clear)
        }
    }
}

/// Loads the configuration and starts logging to the log file it names.
fn load_config(path: &Path, level: log::LevelFilter) -> Result<Config> {
    let config = Config::load(path)?;
    logging::init(level, config.log_file.as_deref())?;
    log::debug!("Loaded config from '{}'", path.display());
    Ok(config)
}

fn post(config: &Config, dry_run: bool) -> Result<()> {
    let mut store = RunStateStore::load(&config.state_file);
    let mut rng = rand::thread_rng();
    let published = if dry_run {
        publish(config, DryRunPoster, true, &mut store, &mut rng)?
    } else {
        publish(
            config,
            OutboxPoster::new(&config.outbox_dir),
            false,
            &mut store,
            &mut rng,
        )?
    };
    println!(
        "{} episode {} frame {} ({})",
        published.id, published.post.episode, published.post.frame, published.post.timestamp
    );
    Ok(())
}

fn publish<P: Poster>(
    config: &Config,
    poster: P,
    dry_run: bool,
    store: &mut RunStateStore,
    rng: &mut rand::rngs::ThreadRng,
) -> Result<orchestrator::Published> {
    Orchestrator::new(config, poster)
        .dry_run(dry_run)
        .run_once(store, rng)
}

fn print_caption(file: &Path, at: &str) -> Result<()> {
    let at = timecode::parse_timecode(at)?;
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to open subtitle file: '{}'", file.display()))?;
    let tag = track_tag(file).unwrap_or_default();
    let tracks = Track::parse_layers(&tag, &content)
        .with_context(|| format!("Failed to parse subtitle file: '{}'", file.display()))?;

    let mut found = false;
    for track in &tracks {
        if let Some(entry) = matcher::caption_at(track.entries(), at) {
            println!(
                "[{}] {} --> {}\n{}",
                track.tag(),
                timecode::format_timecode(entry.start()),
                timecode::format_timecode(entry.end()),
                entry.text()
            );
            found = true;
        }
    }
    if !found {
        println!("No caption at {}", timecode::format_timecode(at));
    }
    Ok(())
}

fn history(config: &Config, clear: bool) -> Result<()> {
    let mut store = RunStateStore::load(&config.state_file);
    if clear {
        let forgotten = store.len();
        store.clear();
        store.persist()?;
        println!("Forgot {} frames", forgotten);
        return Ok(());
    }

    let mut per_episode: BTreeMap<u32, usize> = BTreeMap::new();
    for record in store.records() {
        *per_episode.entry(record.episode).or_default() += 1;
    }
    for (episode, count) in &per_episode {
        println!("episode {}: {} frames", episode, count);
    }
    if let Some(last) = store.records().max_by_key(|r| r.posted_at) {
        println!(
            "last post: episode {} at {} on {}",
            last.episode,
            timecode::format_timecode(last.offset),
            last.posted_at.to_rfc3339()
        );
    }
    println!("{} frames in total", store.len());
    Ok(())
}
