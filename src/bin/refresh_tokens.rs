//! One-shot token refresh sweep.
//!
//! Refreshes every active connection whose access token has expired, then
//! exits. `--dry-run` only lists the connections that are due.

use std::sync::Arc;

use anyhow::{Context, Result};
use calendar_sync::{
    config::ConfigLoader, connectors::Registry, crypto::TokenVault, db,
    repositories::ConnectionRepository, telemetry, token_refresh::TokenRefreshService,
};
use chrono::Utc;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "refresh-tokens", about = "Refresh expired calendar access tokens once")]
struct Args {
    /// List due connections without contacting providers
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing telemetry")?;

    let db = Arc::new(
        db::init_pool(&config)
            .await
            .context("initializing database connection pool")?,
    );
    let vault = Arc::new(TokenVault::from_config(&config));
    let connections = Arc::new(ConnectionRepository::new(db, vault));
    let registry = Arc::new(Registry::from_config(&config).context("building provider registry")?);
    let service = TokenRefreshService::new(config.token_refresh.clone(), connections, registry);

    if args.dry_run {
        let due = service
            .due_connections(Utc::now())
            .await
            .context("listing expired connections")?;
        for connection in &due {
            println!(
                "{}\t{}\t{}\texpired {}",
                connection.id,
                connection.user_id,
                connection.provider,
                connection
                    .token_expires_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default()
            );
        }
        println!("{} connection(s) due for refresh", due.len());
        return Ok(());
    }

    let stats = service.tick().await.context("running refresh sweep")?;
    println!(
        "polled={} refreshed={} failed={}",
        stats.connections_polled, stats.refreshes_succeeded, stats.refreshes_failed
    );
    Ok(())
}
