use clap::{Parser, Subcommand};

/// Football fixtures & odds warehouse
#[derive(Parser, Debug, Clone)]
#[command(name = "footdata", version, about)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,

    /// football-data.org API token (X-Auth-Token header)
    #[arg(long, env = "FOOTBALL_DATA_API_KEY")]
    pub football_data_api_key: Option<String>,

    /// football-data.org base URL
    #[arg(
        long,
        env = "FOOTBALL_DATA_BASE_URL",
        default_value = "https://api.football-data.org/v4"
    )]
    pub football_data_base_url: String,

    /// Competition code to track (e.g. CL, PL)
    #[arg(long, env = "COMPETITION_CODE", default_value = "CL")]
    pub competition_code: String,

    /// the-odds-api.com API key (apiKey query parameter)
    #[arg(long, env = "ODDS_API_KEY")]
    pub odds_api_key: Option<String>,

    /// the-odds-api.com base URL
    #[arg(
        long,
        env = "ODDS_API_BASE_URL",
        default_value = "https://api.the-odds-api.com/v4"
    )]
    pub odds_api_base_url: String,

    /// Odds API sport key matching the tracked competition
    #[arg(
        long,
        env = "ODDS_API_SPORT_KEY",
        default_value = "soccer_uefa_champions_league"
    )]
    pub odds_sport_key: String,

    /// Bookmaker regions requested from the odds API
    #[arg(long, env = "ODDS_REGIONS", default_value = "eu")]
    pub odds_regions: String,

    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "warehouse.db")]
    pub database_path: String,

    /// Dashboard listen address
    #[arg(long, env = "DASHBOARD_ADDR", default_value = "0.0.0.0:8080")]
    pub dashboard_addr: String,

    /// UTC offset (hours) used for the local kickoff display column
    #[arg(long, env = "LOCAL_UTC_OFFSET", default_value = "-3", allow_hyphen_values = true)]
    pub local_utc_offset: i32,

    /// Fixtures cache time-to-live in seconds
    #[arg(long, env = "FIXTURES_TTL_SECS", default_value = "1800")]
    pub fixtures_ttl_secs: u64,

    /// Odds cache time-to-live in seconds
    #[arg(long, env = "ODDS_TTL_SECS", default_value = "600")]
    pub odds_ttl_secs: u64,

    /// Expose odds-matching diagnostics (swapped-side lookup) on the dashboard
    #[arg(long, env = "DEBUG_ODDS", default_value = "false")]
    pub debug_odds: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the dashboard HTTP server
    Serve,
    /// Incremental ingest: fetch matches since the last watermark, rebuild derived tables
    DailyEtl,
    /// Historical ingest over an explicit date range (does not advance watermarks)
    Backfill {
        /// Range start, YYYY-MM-DD (defaults to the season start)
        #[arg(long)]
        start: Option<String>,
        /// Range end, YYYY-MM-DD (defaults to tomorrow)
        #[arg(long)]
        end: Option<String>,
    },
    /// Rebuild the rolling team-form metrics only
    RefreshMetrics,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.competition_code.trim().is_empty() {
            anyhow::bail!("competition_code must not be empty");
        }
        if !(-12..=14).contains(&self.local_utc_offset) {
            anyhow::bail!("local_utc_offset must be a valid UTC offset in hours (-12..=14)");
        }
        if self.fixtures_ttl_secs == 0 || self.odds_ttl_secs == 0 {
            anyhow::bail!("cache TTLs must be positive");
        }
        Ok(())
    }
}
