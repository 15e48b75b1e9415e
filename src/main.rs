use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use wp_mirror::config;
use wp_mirror::db;
use wp_mirror::model::{LoadScope, PostStatus};
use wp_mirror::sync::{LoadOptions, SiteLoader, SyncState};
use wp_mirror::wp::model::parse_timestamp;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load site content from the REST API
    LoadSite {
        /// Delete local content of each processed kind first. Destructive!
        #[arg(long)]
        purge: bool,
        /// Crawl all history instead of resuming from the last synced post
        #[arg(long)]
        full: bool,
        /// Only load posts modified after this time (ISO-8601)
        #[arg(long, value_parser = parse_modified_after)]
        modified_after: Option<DateTime<Utc>>,
        #[arg(long = "type", value_enum, default_value_t = LoadScope::All)]
        scope: LoadScope,
        #[arg(long, value_enum, default_value_t = PostStatus::Publish)]
        status: PostStatus,
        /// Override the page size of every listing
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        page_size: Option<u32>,
    },
    /// Refresh a single post by its remote ID
    LoadPost { wp_post_id: i64 },
}

fn parse_modified_after(raw: &str) -> Result<DateTime<Utc>, String> {
    parse_timestamp(raw).ok_or_else(|| format!("not an ISO-8601 timestamp: {raw}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let loader = SiteLoader::from_config(&cfg, pool)?;

    match args.command {
        Command::LoadSite {
            purge,
            full,
            modified_after,
            scope,
            status,
            page_size,
        } => {
            let opts = LoadOptions {
                purge,
                full,
                modified_after,
                scope,
                status,
                page_size,
            };
            let report = loader.load_site(opts).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.state == SyncState::Failed {
                bail!("site load did not complete");
            }
        }
        Command::LoadPost { wp_post_id } => match loader.load_post(wp_post_id).await? {
            Some(post) => info!(wp_post_id, id = post.id, "post loaded"),
            None => {
                warn!(wp_post_id, "post not loaded");
                bail!("unable to load post {wp_post_id}");
            }
        },
    }

    Ok(())
}
