//! TaskVault - content-addressed cache for deterministic task outputs

use anyhow::{Context, Result, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{Config, DEFAULT_CONFIG_PATH};
use taskvault_core::{CacheManager, HashAlgorithm, HashEngine, Metadata, MetadataValue};

/// TaskVault - never recompute the same work
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(long, global = true, env = "TASKVAULT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Verbose output (repeat for trace logging)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default configuration file and create the cache directory
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Cache operations
    #[command(subcommand)]
    Cache(CacheCommand),

    /// Print the digest of a file or directory tree
    Hash {
        path: PathBuf,

        /// Digest algorithm; defaults to the configured one
        #[arg(long)]
        algorithm: Option<HashAlgorithm>,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Save a task output to the cache
    Save {
        #[command(flatten)]
        task: TaskArgs,

        /// File holding the task output
        output: PathBuf,

        /// Annotation stored with the entry (repeatable)
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        meta: Vec<(String, String)>,
    },

    /// Restore a cached task output, or report a miss
    Get {
        #[command(flatten)]
        task: TaskArgs,

        /// Where to write the cached output
        output: PathBuf,
    },

    /// Delete the cached output for a task input
    Delete {
        #[command(flatten)]
        task: TaskArgs,
    },

    /// Delete every cached output of a task
    Invalidate {
        /// Task name, matched exactly
        task: String,
    },

    /// Show cache statistics
    Stats {
        /// Print a JSON snapshot instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Remove expired entries from disk
    Purge,
}

#[derive(ClapArgs, Debug)]
struct TaskArgs {
    /// Task name
    task: String,

    /// File holding the task input
    input: PathBuf,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;
    init_logging(&config.logging.level, &config.logging.format, args.verbose);

    debug!("Starting TaskVault v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Init { force } => init(&args.config, force),
        Command::Hash { path, algorithm } => hash(&config, &path, algorithm),
        Command::Cache(command) => {
            let manager = open_manager(&config).await?;
            let result = run_cache_command(&manager, command, args.verbose > 0).await;
            manager.close().await?;
            result
        }
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str, verbose: u8) {
    let level = match verbose {
        0 => level,
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!(
            "Config file already exists at {:?} (use --force to overwrite)",
            config_path
        );
    }

    let config = Config::default();
    config.save(config_path)?;
    std::fs::create_dir_all(&config.cache.dir)
        .with_context(|| format!("Failed to create cache directory {:?}", config.cache.dir))?;

    println!("Created config at {}", config_path.display());
    Ok(())
}

fn hash(config: &Config, path: &Path, algorithm: Option<HashAlgorithm>) -> Result<()> {
    let algorithm = match algorithm {
        Some(algorithm) => algorithm,
        None => config.to_settings()?.hash_algorithm,
    };
    let engine = HashEngine::new(algorithm);

    let digest = if path.is_dir() {
        engine.hash_directory(path)?
    } else {
        engine.hash_file(path)?
    };

    println!("{}  {}", digest, path.display());
    Ok(())
}

async fn open_manager(config: &Config) -> Result<CacheManager> {
    let settings = config.to_settings()?;
    let audit = settings
        .audit
        .open_sink(&settings.cache_dir)
        .with_context(|| {
            format!(
                "Failed to open {} audit sink in {:?}",
                settings.audit, settings.cache_dir
            )
        })?;

    let manager = CacheManager::open(&settings, audit)
        .await
        .with_context(|| format!("Failed to open cache at {:?}", settings.cache_dir))?;
    info!("Using cache at {:?}", settings.cache_dir);
    Ok(manager)
}

async fn run_cache_command(manager: &CacheManager, command: CacheCommand, verbose: bool) -> Result<()> {
    match command {
        CacheCommand::Save { task, output, meta } => {
            let input = read_file(&task.input, "input")?;
            let data = read_file(&output, "output")?;
            let size = data.len();

            let user_metadata = (!meta.is_empty()).then(|| {
                meta.into_iter()
                    .map(|(key, value)| (key, MetadataValue::from(value)))
                    .collect::<Metadata>()
            });

            let digest = manager
                .save_result(&task.task, &input, data, user_metadata)
                .await?;
            println!(
                "Cached {} (hash: {}, size: {} bytes)",
                task.task,
                short_digest(&digest),
                size
            );
        }

        CacheCommand::Get { task, output } => {
            let input = read_file(&task.input, "input")?;
            match manager.get_result(&task.task, &input).await? {
                Some(result) => {
                    std::fs::write(&output, &result.data)
                        .with_context(|| format!("Failed to write output {:?}", output))?;
                    println!(
                        "Cache hit for {} (size: {} bytes)",
                        task.task,
                        result.data.len()
                    );
                    if verbose {
                        println!("  Metadata: {}", serde_json::to_string(&result.metadata)?);
                    }
                }
                None => println!("Cache miss for {}", task.task),
            }
        }

        CacheCommand::Delete { task } => {
            let input = read_file(&task.input, "input")?;
            if manager.delete_result(&task.task, &input).await? {
                println!("Deleted cached result for {}", task.task);
            } else {
                println!("No cached result for {}", task.task);
            }
        }

        CacheCommand::Invalidate { task } => {
            let removed = manager.invalidate_task(&task).await?;
            println!("Invalidated {} entries for {}", removed, task);
        }

        CacheCommand::Stats { json } => {
            if json {
                println!("{}", manager.export_snapshot().await?);
            } else {
                let stats = manager.stats().await?;
                println!("TaskVault Cache Statistics");
                println!("==========================");
                println!("Entries:        {}", stats.store.entries);
                println!("Total Size:     {}", format_bytes(stats.store.total_size.max(0) as u64));
                println!("Cache Limit:    {}", format_bytes(stats.store.capacity));
                println!("Usage:          {:.1}%", stats.store.usage_percent);
                if let Some(oldest) = stats.store.oldest_access {
                    println!("Oldest Access:  {}", oldest.to_rfc3339());
                }
            }
        }

        CacheCommand::Purge => {
            let purged = manager.purge_expired().await?;
            println!("Purged {} expired entries", purged);
        }
    }

    Ok(())
}

fn read_file(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Cannot read {} {:?}", what, path))
}

fn short_digest(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

fn format_bytes(bytes: u64) -> String {
    taskvault_db::utils::format_bytes(bytes as i64)
}
