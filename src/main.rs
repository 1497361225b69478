use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

mod cache;
mod config;
mod dashboard;
mod db;
mod fixtures;
mod flows;
mod odds;

use cache::TtlCache;
use config::{Command, Config};
use dashboard::AppState;
use db::Database;
use fixtures::FootballDataClient;
use odds::OddsApiClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    let fixtures_client = FootballDataClient::new(
        &config.football_data_base_url,
        config.football_data_api_key.clone(),
        config.local_utc_offset,
    )?;

    match &config.command {
        Command::Serve => {
            let odds_client = OddsApiClient::new(
                &config.odds_api_base_url,
                config.odds_api_key.clone(),
                &config.odds_sport_key,
                &config.odds_regions,
            )?;
            let state = AppState {
                db,
                fixtures_client,
                odds_client,
                fixtures_cache: TtlCache::new(),
                odds_cache: TtlCache::new(),
                fixtures_ttl: Duration::from_secs(config.fixtures_ttl_secs),
                odds_ttl: Duration::from_secs(config.odds_ttl_secs),
                competition_code: config.competition_code.clone(),
                debug_odds: config.debug_odds,
            };
            let app = dashboard::router(state);
            let addr: SocketAddr = config.dashboard_addr.parse()?;
            info!("Dashboard listening on http://{}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
        Command::DailyEtl => {
            let report =
                flows::daily_etl(&db, &fixtures_client, Some(config.competition_code.as_str()))
                    .await?;
            info!(
                "Daily ETL finished: {} rows fetched, {} applied",
                report.rows_fetched, report.rows_applied
            );
        }
        Command::Backfill { start, end } => {
            let report = flows::backfill(
                &db,
                &fixtures_client,
                start.as_deref(),
                end.as_deref(),
                Some(config.competition_code.as_str()),
            )
            .await?;
            info!(
                "Backfill finished: {} rows fetched, {} applied",
                report.rows_fetched, report.rows_applied
            );
        }
        Command::RefreshMetrics => {
            flows::refresh_metrics(&db)?;
            info!("Derived tables rebuilt");
        }
    }

    Ok(())
}
