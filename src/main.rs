#![allow(missing_docs)]

use anyhow::Result;
use catalog_sync_lib::Cli;
use catalog_sync_lib::infrastructure::logging::{init_logging_with_config, log_system_info};
use clap::Parser;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_logging_with_config(&config.logging)?;
    log_system_info();

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, finishing in-flight calls");
            ctrl_c.cancel();
        }
    });

    match cli.execute(config, cancel).await {
        Ok(summary) if summary.has_failures() => Ok(ExitCode::from(2)),
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            error!("❌ Run failed: {:#}", e);
            Err(e)
        }
    }
}
