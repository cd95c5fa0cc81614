use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use feedpager::config::Config;
use feedpager::feed::{parse_boundary, FeedSource, GetEntryRequest, GetFeedRequest};
use feedpager::storage::{Entry, EntryStore, SqliteStore};

/// Get the config directory path (~/.config/feedpager/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("feedpager");
    Ok(config_dir)
}

#[derive(Parser, Debug)]
#[command(name = "feedpager", about = "Page through time-indexed feeds stored in SQLite")]
struct Args {
    /// Config file (defaults to ~/.config/feedpager/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and exit
    CheckConfig,

    /// Insert or replace an entry
    Publish {
        /// Feed name (namespace/feed)
        #[arg(long)]
        feed: String,

        /// Entry id
        #[arg(long)]
        id: String,

        /// Entry body
        #[arg(long, default_value = "")]
        body: String,

        /// ISO-8601 timestamp (defaults to now)
        #[arg(long)]
        timestamp: Option<String>,

        /// Category, repeatable
        #[arg(long = "category", value_name = "CATEGORY")]
        categories: Vec<String>,
    },

    /// Fetch one page of a feed
    Page {
        /// Feed name (namespace/feed)
        #[arg(long)]
        feed: String,

        /// Page size
        #[arg(long)]
        limit: Option<String>,

        /// forward or backward
        #[arg(long)]
        direction: Option<String>,

        /// Entry id to page from
        #[arg(long)]
        marker: Option<String>,

        /// Category expression, e.g. +Cat1+Cat2 or (OR(cat=a)(cat=b))
        #[arg(long)]
        search: Option<String>,

        /// ISO-8601 boundary to page from
        #[arg(long)]
        starting_at: Option<String>,
    },

    /// Fetch a single entry
    Entry {
        /// Feed name (namespace/feed)
        #[arg(long)]
        feed: String,

        /// Entry id
        #[arg(long)]
        id: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render JSON")?;
    println!("{rendered}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => get_config_dir()?.join("config.toml"),
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from '{}'", config_path.display()))?;
    let engine = config.validate().context("Configuration is invalid")?;

    if let Command::CheckConfig = args.command {
        println!("Configuration OK: {}", config_path.display());
        return Ok(());
    }

    let store = SqliteStore::open(&config.database_path, engine.layout())
        .await
        .with_context(|| format!("Failed to open database '{}'", config.database_path))?;
    let source = FeedSource::from_engine_config(store, engine);

    match args.command {
        Command::CheckConfig => Ok(()),
        Command::Publish {
            feed,
            id,
            body,
            timestamp,
            categories,
        } => {
            let timestamp = match timestamp {
                Some(raw) => parse_boundary(&feed, &raw)?,
                None => Utc::now(),
            };
            let entry = Entry::new(feed, id, body, timestamp).with_categories(categories);
            source
                .store()
                .put(&entry)
                .await
                .context("Failed to store entry")?;
            tracing::info!(feed = %entry.feed, entry_id = %entry.entry_id, "Published entry");
            print_json(&entry)
        }
        Command::Page {
            feed,
            limit,
            direction,
            marker,
            search,
            starting_at,
        } => {
            let request = GetFeedRequest {
                feed_name: feed,
                page_size: limit,
                direction,
                marker,
                search,
                starting_at,
            };
            match source.get_feed_page(&request).await {
                Ok(page) => print_json(&page),
                Err(e) => {
                    eprintln!("Error ({}): {e}", e.status_code());
                    std::process::exit(1);
                }
            }
        }
        Command::Entry { feed, id } => {
            match source.get_entry(&GetEntryRequest::new(feed, id)).await {
                Ok(entry) => print_json(&entry),
                Err(e) => {
                    eprintln!("Error ({}): {e}", e.status_code());
                    std::process::exit(1);
                }
            }
        }
    }
}
