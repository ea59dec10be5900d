//! Command line entry point

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::application::sync_pipeline::{RunMode, RunSummary, SyncPipeline};
use crate::infrastructure::config::{AppConfig, ConfigManager};
use crate::infrastructure::shopify_client::ShopifyClient;

/// Sync a supplier feed into the storefront catalog
#[derive(Parser, Debug)]
#[command(name = "catalog-sync", version)]
#[command(about = "Classify a supplier feed and reconcile it with the storefront catalog")]
pub struct Cli {
    /// Configuration file (JSON or TOML); defaults to the per-user config
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Rule document, overrides paths.rules_path
    #[arg(long, global = true)]
    pub rules: Option<PathBuf>,

    /// Report directory, overrides paths.report_dir
    #[arg(long, global = true)]
    pub report_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FeedArgs {
    /// Feed path or http(s) URL, overrides paths.feed_source
    #[arg(long, short = 'f')]
    pub feed: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Full run: classify, diff against the store and apply the changes
    Sync {
        #[command(flatten)]
        feed: FeedArgs,

        /// Log mutations instead of sending them
        #[arg(long, short = 'n')]
        dry_run: bool,

        /// Draft remote products that are no longer in the feed
        #[arg(long)]
        archive_missing: bool,
    },

    /// Ingest and classify only; writes the classification reports
    Classify {
        #[command(flatten)]
        feed: FeedArgs,
    },

    /// Everything up to the delta; prints the plan without mutating
    Plan {
        #[command(flatten)]
        feed: FeedArgs,

        /// Accepted for symmetry with `sync`; planning never mutates
        #[arg(long, short = 'n')]
        dry_run: bool,
    },
}

impl Command {
    pub const fn mode(&self) -> RunMode {
        match self {
            Self::Sync { .. } => RunMode::Sync,
            Self::Classify { .. } => RunMode::Classify,
            Self::Plan { .. } => RunMode::Plan,
        }
    }

    const fn feed(&self) -> &FeedArgs {
        match self {
            Self::Sync { feed, .. } | Self::Classify { feed } | Self::Plan { feed, .. } => feed,
        }
    }
}

impl Cli {
    /// Load the configuration file and environment, then apply flags on top
    pub fn load_config(&self) -> Result<AppConfig> {
        let manager = match &self.config {
            Some(path) => ConfigManager::with_path(path),
            None => ConfigManager::new()?,
        };
        let mut config = manager
            .load_config()
            .with_context(|| format!("Failed to load configuration from {:?}", manager.config_path()))?;
        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(rules) = &self.rules {
            config.paths.rules_path.clone_from(rules);
        }
        if let Some(dir) = &self.report_dir {
            config.paths.report_dir.clone_from(dir);
        }
        if let Some(feed) = &self.command.feed().feed {
            config.paths.feed_source = Some(feed.clone());
        }
        match &self.command {
            Command::Sync {
                dry_run,
                archive_missing,
                ..
            } => {
                config.sync.dry_run |= *dry_run;
                config.sync.archive_missing |= *archive_missing;
            }
            Command::Plan { dry_run, .. } => config.sync.dry_run |= *dry_run,
            Command::Classify { .. } => {}
        }
    }

    /// Run the selected command to completion
    pub async fn execute(&self, config: AppConfig, cancel: CancellationToken) -> Result<RunSummary> {
        let mode = self.command.mode();
        let mut pipeline = SyncPipeline::new(config, cancel);

        if mode != RunMode::Classify {
            pipeline.config().validate_remote()?;
            let client = ShopifyClient::new(&pipeline.config().sync)?;
            info!("🌐 Remote catalog: {}", client.endpoint());
            pipeline = pipeline.with_backend(Arc::new(client));
        }

        let result = pipeline.run(mode).await?;
        if let (RunMode::Plan, Some(plan)) = (mode, &result.plan) {
            let counts = plan.counts();
            println!(
                "create: {}\nupdate: {}\nunchanged: {}\narchive: {}",
                counts.creates, counts.updates, counts.unchanged, counts.archives
            );
        }
        Ok(result.summary)
    }
}
