use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::mpsc;

use silkfeed::cache::{clean_all, CachePipeline, PipelineEvent, PipelineState};
use silkfeed::config::Config;
use silkfeed::feed::{content_blocks, parse_items, ContentBlock};
use silkfeed::storage::{Database, DatabaseError};
use silkfeed::util::strip_control_chars;

/// Get the config directory path (~/.config/silkfeed/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("silkfeed");
    Ok(config_dir)
}

fn format_time(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn format_bytes(bytes: i64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= KIB * KIB {
        format!("{:.1} MiB", b / (KIB * KIB))
    } else if b >= KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{bytes} B")
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "silkfeed",
    version,
    about = "RSS reader that caches feeds and their images for offline reading"
)]
struct Args {
    /// Config file (default: ~/.config/silkfeed/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the config file
    #[arg(long, value_name = "FILE", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed
    Add {
        /// Feed URL (http:// or https://)
        url: String,
        /// Display name; derived from the URL when omitted
        #[arg(long)]
        name: Option<String>,
    },
    /// List feed sources in display order
    List,
    /// Rename a feed source
    Rename { id: i64, name: String },
    /// Move a feed source to a position (0 is the top)
    Move { id: i64, index: usize },
    /// Delete a feed source and everything cached for it
    Remove { id: i64 },
    /// Snapshot a feed and all of its images
    Cache {
        /// Source id
        id: i64,
        /// Start over this many times after a failure
        #[arg(long, default_value_t = 0)]
        retries: u32,
    },
    /// List cached snapshots of a source, newest first
    Entries { id: i64 },
    /// Read a cached snapshot offline
    Read {
        /// Entry id
        id: i64,
        /// Show this item (1-based) instead of the item list
        #[arg(long)]
        item: Option<usize>,
    },
    /// Delete one cached snapshot
    DeleteEntry { id: i64 },
    /// Delete every cached snapshot, keeping the sources
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = args
        .db
        .clone()
        .unwrap_or_else(|| config.database_path_in(&config_dir));
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create data directory {}", parent.display())
            })?;
        }
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: {}", DatabaseError::InstanceLocked);
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    run(args.command, &db, &config).await
}

async fn run(command: Command, db: &Database, config: &Config) -> Result<()> {
    match command {
        Command::Add { url, name } => {
            let source = db
                .add_source(&url, name.as_deref())
                .await
                .context("Failed to add feed")?;
            println!("Added [{}] {}", source.id, strip_control_chars(&source.name));
        }
        Command::List => {
            let sources = db.list_sources().await.context("Failed to load feeds")?;
            if sources.is_empty() {
                println!("No feeds yet. Add one with: silkfeed add <URL>");
            }
            for (index, source) in sources.iter().enumerate() {
                let last_read = source
                    .last_read_at
                    .map(format_time)
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{index:>3}. [{}] {}  {}  (last read: {last_read})",
                    source.id,
                    strip_control_chars(&source.name),
                    source.url
                );
            }
        }
        Command::Rename { id, name } => {
            let source = db
                .rename_source(id, &name)
                .await
                .context("Failed to rename feed")?;
            println!("Renamed [{}] to {}", source.id, source.name);
        }
        Command::Move { id, index } => {
            db.move_source(id, index)
                .await
                .context("Failed to move feed")?;
            println!("Moved [{id}] to position {index}");
        }
        Command::Remove { id } => {
            db.delete_source(id)
                .await
                .context("Failed to delete feed")?;
            println!("Deleted feed [{id}] and its cached entries");
        }
        Command::Cache { id, retries } => cache_source(db, config, id, retries).await?,
        Command::Entries { id } => {
            let entries = db
                .entries_for_source(id)
                .await
                .context("Failed to load entries")?;
            if entries.is_empty() {
                println!("No cached entries. Create one with: silkfeed cache {id}");
            }
            for entry in entries {
                println!(
                    "[{}] {}  {} images  {}",
                    entry.id,
                    format_time(entry.cached_at),
                    entry.image_count,
                    format_bytes(entry.total_bytes)
                );
            }
        }
        Command::Read { id, item } => read_entry(db, id, item).await?,
        Command::DeleteEntry { id } => {
            db.delete_entry(id)
                .await
                .context("Failed to delete entry")?;
            println!("Deleted entry [{id}]");
        }
        Command::Clean => {
            let report = clean_all(db).await.context("Cleanup failed")?;
            println!(
                "Removed {} entries and {} images",
                report.entries_removed, report.images_removed
            );
        }
    }
    Ok(())
}

async fn cache_source(db: &Database, config: &Config, id: i64, retries: u32) -> Result<()> {
    let source = db
        .get_source(id)
        .await
        .context("Failed to load feed")?
        .ok_or_else(|| anyhow::anyhow!("No feed with id {id}"))?;
    let options = config
        .pipeline_options()
        .context("Failed to create HTTP client")?;

    let (event_tx, mut event_rx) = mpsc::channel::<PipelineEvent>(32);
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                PipelineEvent::StageStarted { stage, .. } => eprintln!("{stage}..."),
                PipelineEvent::ImagesProgress { done, total, .. } => {
                    eprintln!("  {done}/{total} images")
                }
                PipelineEvent::StageFailed { stage, error, .. } => {
                    eprintln!("{stage} failed: {error}")
                }
                PipelineEvent::StageFinished { .. } | PipelineEvent::Finished { .. } => {}
            }
        }
    });

    let mut pipeline =
        CachePipeline::new(db.clone(), source.id, source.url, options).with_events(event_tx);
    let mut attempts_left = retries;

    let outcome = loop {
        pipeline.run_to_end().await;
        if let Some(entry_id) = pipeline.state().entry_id() {
            break Ok(entry_id);
        }
        if attempts_left > 0 {
            attempts_left -= 1;
            eprintln!("Retrying from the start ({attempts_left} retries left)");
            pipeline = pipeline.restart();
            continue;
        }
        break Err(match pipeline.state() {
            PipelineState::Failed {
                stage,
                error,
                completed,
            } => {
                if let Some(step) = completed {
                    eprintln!("Fetched {} of feed text", format_bytes(step.markup().len() as i64));
                    if let Some(urls) = step.image_urls() {
                        eprintln!("Found {} images", urls.len());
                    }
                }
                anyhow::anyhow!("Caching failed while {stage} ({:?}): {error}", error.kind())
            }
            _ => anyhow::anyhow!("Caching stopped before finishing"),
        });
    };

    drop(pipeline);
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "Progress printer task failed");
    }

    let entry_id = outcome?;
    println!("Cached entry [{entry_id}] for {}", strip_control_chars(&source.name));
    Ok(())
}

async fn read_entry(db: &Database, id: i64, item: Option<usize>) -> Result<()> {
    let entry = db
        .get_entry(id)
        .await
        .context("Failed to load entry")?
        .ok_or_else(|| anyhow::anyhow!("No entry with id {id}"))?;
    db.mark_source_read(entry.source_id)
        .await
        .context("Failed to update feed")?;

    let items = parse_items(&entry.markup).context("Cached feed could not be parsed")?;

    let Some(number) = item else {
        println!("Cached {}", format_time(entry.cached_at));
        for (index, item) in items.iter().enumerate() {
            println!("{:>3}. {}", index + 1, strip_control_chars(&item.title));
        }
        return Ok(());
    };

    let item = number
        .checked_sub(1)
        .and_then(|index| items.get(index))
        .ok_or_else(|| anyhow::anyhow!("Item {number} not found ({} items)", items.len()))?;

    println!("{}\n", strip_control_chars(&item.title));
    for block in content_blocks(&item.body, |url| entry.image_data(url.as_str())) {
        match block {
            ContentBlock::Text(text) => println!("{}\n", strip_control_chars(&text)),
            ContentBlock::Image { url, data } => {
                println!("[image {url}, {}]\n", format_bytes(data.len() as i64))
            }
        }
    }
    Ok(())
}
