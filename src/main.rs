use std::path::PathBuf;

use anyhow::{Context, Result};
use beatmill::config::Config;
use beatmill::dataset::table::Column;
use beatmill::dataset::{dispatch, generate_datasets, store};
use beatmill::discovery;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "beatmill", version, about = "Beatmap training-dataset builder")]
struct Cli {
    /// Path to a TOML config file (default: ./beatmill.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover song folders under the corpus root
    Scan {
        /// Corpus root (defaults to the configured songs folder)
        root: Option<PathBuf>,

        /// Print every discovered folder, not just the count
        #[arg(long)]
        list: bool,
    },

    /// Build, normalize, and persist the train/val/test datasets
    Generate {
        /// Corpus root override
        #[arg(long)]
        songs: Option<PathBuf>,

        /// Storage folder override
        #[arg(long)]
        storage: Option<PathBuf>,

        /// Invalidate and rebuild all feature caches before extraction
        #[arg(long)]
        no_cache: bool,

        /// Run extraction in-process instead of the worker pool (debugging)
        #[arg(long)]
        sequential: bool,

        /// Worker pool size (0 = config value)
        #[arg(short = 'j', long, default_value = "0")]
        workers: usize,
    },

    /// Summarize the generated datasets
    Stats,

    /// Per-song extraction entry point for pool children
    #[command(hide = true)]
    ExtractWorker {
        #[arg(long)]
        song: PathBuf,

        /// Effective config staged by the coordinator, as JSON
        #[arg(long)]
        config_json: PathBuf,

        #[arg(long)]
        out: PathBuf,

        /// Rebuild the feature cache only, produce no table
        #[arg(long)]
        warm_only: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // the worker subcommand takes its config from the coordinator, not TOML
    if let Commands::ExtractWorker { song, config_json, out, warm_only } = &cli.command {
        let contents = std::fs::read_to_string(config_json)
            .with_context(|| format!("Failed to read worker config {}", config_json.display()))?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse worker config")?;
        return dispatch::worker_main(song, &config, out, *warm_only)
            .with_context(|| format!("Extraction failed for {}", song.display()));
    }

    let config = Config::load(cli.config.as_deref());

    match cli.command {
        Commands::Scan { root, list } => {
            let root = root.unwrap_or_else(|| config.dataset.songs_folder.clone());
            let songs = discovery::find_song_folders(&root).context("Scan failed")?;
            println!("Found {} song folders under {}", songs.len(), root.display());
            if list {
                for song in &songs {
                    println!("{}", song.display());
                }
            }
        }

        Commands::Generate { songs, storage, no_cache, sequential, workers } => {
            // overrides fold into the config before anything runs on it
            let mut config = config;
            if let Some(songs) = songs {
                config.dataset.songs_folder = songs;
            }
            if let Some(storage) = storage {
                config.dataset.storage_folder = Some(storage);
            }
            if no_cache {
                config.audio.use_cache = false;
            }
            if sequential {
                config.use_multiprocessing = false;
            }
            if workers > 0 {
                config.workers = workers;
            }

            let song_folders = discovery::find_song_folders(&config.dataset.songs_folder)
                .context("Song discovery failed")?;
            println!("Found {} song folders", song_folders.len());

            generate_datasets(&song_folders, &config).context("Dataset generation failed")?;
            println!("Datasets written to {}", config.dataset.resolve_storage().display());
        }

        Commands::Stats => {
            let storage = config.dataset.resolve_storage();
            for phase in store::PHASES {
                let table = store::read(&storage, phase)
                    .with_context(|| format!("Failed to load {phase} dataset"))?;

                let snippets = match table.column("snippet") {
                    Some(Column::Int(ids)) => ids.last().map(|last| last + 1).unwrap_or(0),
                    _ => 0,
                };
                println!(
                    "{:<6} {:>9} rows {:>7} snippets {:>6} song-difficulty groups",
                    phase,
                    table.num_rows(),
                    snippets,
                    table.num_groups()
                );
            }

            let train = store::read(&storage, "train")?;
            let columns: Vec<&str> = train.column_names().collect();
            println!();
            println!("Columns: {}", columns.join(", "));
        }

        Commands::ExtractWorker { .. } => unreachable!("handled above"),
    }

    Ok(())
}
