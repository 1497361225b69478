//! Batch flows: incremental daily load, date-range backfill and mart
//! refresh. Each flow runs to completion or fails; a failed fetch never
//! advances the watermark, so the next run re-covers the same window.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::db::Database;
use crate::fixtures::FootballDataClient;

const SILVER_MATCHES_SQL: &str = include_str!("../../sql/silver_matches.sql");
const GOLD_TEAM_FORM_SQL: &str = include_str!("../../sql/gold_team_form.sql");

const WATERMARK_SOURCE: &str = "football-data.org";
const WATERMARK_ENTITY: &str = "matches";
const WATERMARK_KEY: &str = "competition=ALL;season=ALL";

/// What a flow run did, for logging and the CLI exit summary
#[derive(Debug)]
pub struct EtlReport {
    pub rows_fetched: usize,
    pub rows_applied: usize,
    pub high_watermark: Option<DateTime<Utc>>,
}

/// Incremental load: fetch everything since the stored high watermark,
/// merge into the raw zone, rebuild the marts, then advance the watermark.
pub async fn daily_etl(
    db: &Database,
    client: &FootballDataClient,
    competitions: Option<&str>,
) -> Result<EtlReport> {
    let since = db.high_watermark(WATERMARK_SOURCE, WATERMARK_ENTITY, WATERMARK_KEY)?;
    info!("Daily ETL starting from watermark {}", since);

    let rows = client.fetch_matches_since(since, None, competitions).await?;
    let rows_fetched = rows.len();
    let rows_applied = db.upsert("raw_matches", &rows, &["id"])?;
    rebuild_marts(db)?;

    // Advance to the newest event time actually observed; an empty fetch
    // leaves the high watermark where it was
    let high_watermark = max_utc_date(&rows);
    db.set_watermarks(
        WATERMARK_SOURCE,
        WATERMARK_ENTITY,
        WATERMARK_KEY,
        Some(Utc::now()),
        high_watermark,
    )?;

    info!(
        "Daily ETL done: {} fetched, {} applied, watermark {:?}",
        rows_fetched, rows_applied, high_watermark
    );
    Ok(EtlReport {
        rows_fetched,
        rows_applied,
        high_watermark,
    })
}

/// Reload a fixed date range into the raw zone and rebuild the marts.
/// Watermarks are left untouched: a backfill repairs history, it does not
/// define progress.
pub async fn backfill(
    db: &Database,
    client: &FootballDataClient,
    start: Option<&str>,
    end: Option<&str>,
    competitions: Option<&str>,
) -> Result<EtlReport> {
    let start = parse_date_arg(start, "start")?
        .unwrap_or_else(|| (Utc::now() - chrono::Duration::days(90)).date_naive());
    let end = parse_date_arg(end, "end")?.unwrap_or_else(|| Utc::now().date_naive());
    info!("Backfill {} .. {}", start, end);

    let since = start
        .and_hms_opt(0, 0, 0)
        .context("Invalid start date")?
        .and_utc();
    let until = end
        .and_hms_opt(23, 59, 59)
        .context("Invalid end date")?
        .and_utc();

    let rows = client
        .fetch_matches_since(since, Some(until), competitions)
        .await?;
    let rows_fetched = rows.len();
    let rows_applied = db.upsert("raw_matches", &rows, &["id"])?;
    rebuild_marts(db)?;

    info!("Backfill done: {} fetched, {} applied", rows_fetched, rows_applied);
    Ok(EtlReport {
        rows_fetched,
        rows_applied,
        high_watermark: None,
    })
}

/// Rebuild silver and gold from whatever the raw zone already holds
pub fn refresh_metrics(db: &Database) -> Result<()> {
    rebuild_marts(db)
}

fn rebuild_marts(db: &Database) -> Result<()> {
    if !db.table_exists("raw_matches")? {
        warn!("raw_matches does not exist yet; skipping mart rebuild");
        return Ok(());
    }
    db.exec_batch(SILVER_MATCHES_SQL)
        .context("Failed to rebuild silver_matches")?;
    db.exec_batch(GOLD_TEAM_FORM_SQL)
        .context("Failed to rebuild gold_team_form_rolling")?;
    Ok(())
}

fn parse_date_arg(arg: Option<&str>, name: &str) -> Result<Option<NaiveDate>> {
    arg.map(|s| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("Invalid {name} date {s:?}, expected YYYY-MM-DD"))
    })
    .transpose()
}

fn max_utc_date(rows: &[serde_json::Map<String, Value>]) -> Option<DateTime<Utc>> {
    rows.iter()
        .filter_map(|r| r.get("utc_date"))
        .filter_map(|v| v.as_str())
        .filter_map(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_row(
        id: i64,
        utc_date: &str,
        status: &str,
        home: (i64, &str),
        away: (i64, &str),
        score: (Option<i64>, Option<i64>),
        matchday: i64,
    ) -> serde_json::Map<String, Value> {
        let mut row = serde_json::Map::new();
        row.insert("id".into(), json!(id));
        row.insert("utc_date".into(), json!(utc_date));
        row.insert("status".into(), json!(status));
        row.insert("matchday".into(), json!(matchday));
        row.insert("stage".into(), json!("LEAGUE_STAGE"));
        row.insert("group_name".into(), Value::Null);
        row.insert("last_updated".into(), json!(utc_date));
        row.insert("competition_code".into(), json!("CL"));
        row.insert("competition_name".into(), json!("UEFA Champions League"));
        row.insert("home_team_id".into(), json!(home.0));
        row.insert("home_team_name".into(), json!(home.1));
        row.insert("away_team_id".into(), json!(away.0));
        row.insert("away_team_name".into(), json!(away.1));
        row.insert("ft_home_goals".into(), score.0.map(|v| json!(v)).unwrap_or(Value::Null));
        row.insert("ft_away_goals".into(), score.1.map(|v| json!(v)).unwrap_or(Value::Null));
        row.insert("ht_home_goals".into(), Value::Null);
        row.insert("ht_away_goals".into(), Value::Null);
        row.insert("winner".into(), Value::Null);
        row.insert("extracted_at".into(), json!("2025-10-01T00:00:00Z"));
        row.insert("source".into(), json!("football-data.org"));
        row
    }

    #[test]
    fn test_refresh_metrics_without_raw_zone_is_noop() {
        let db = Database::open_in_memory().unwrap();
        refresh_metrics(&db).unwrap();
        assert!(!db.table_exists("gold_team_form_rolling").unwrap());
    }

    #[test]
    fn test_mart_rebuild_populates_silver_and_gold() {
        let db = Database::open_in_memory().unwrap();
        let rows = vec![
            raw_row(1, "2025-09-16T19:00:00Z", "FINISHED", (10, "Porto"), (20, "Ajax"), (Some(2), Some(0)), 1),
            raw_row(2, "2025-09-30T19:00:00Z", "FINISHED", (20, "Ajax"), (10, "Porto"), (Some(1), Some(1)), 2),
            raw_row(3, "2025-10-21T19:00:00Z", "SCHEDULED", (10, "Porto"), (30, "Inter"), (None, None), 3),
        ];
        db.upsert("raw_matches", &rows, &["id"]).unwrap();
        refresh_metrics(&db).unwrap();

        assert!(db.table_exists("gold_team_form_rolling").unwrap());
        // Scheduled match lands in silver but not in the gold form table
        let insights = db.team_insights(10, "CL").unwrap();
        assert_eq!(insights.stats.matches_played, 2);
        assert_eq!(insights.stats.points_total, 4);
        // Both opponents played Porto in their own first match
        assert_eq!(insights.matches.len(), 2);
        assert_eq!(insights.matches[0].opponent_points_before, Some(0));
        assert_eq!(insights.matches[1].opponent_points_before, Some(0));
    }

    #[test]
    fn test_mart_rebuild_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let rows = vec![raw_row(
            1,
            "2025-09-16T19:00:00Z",
            "FINISHED",
            (10, "Porto"),
            (20, "Ajax"),
            (Some(2), Some(0)),
            1,
        )];
        db.upsert("raw_matches", &rows, &["id"]).unwrap();
        refresh_metrics(&db).unwrap();
        refresh_metrics(&db).unwrap();
        let insights = db.team_insights(10, "CL").unwrap();
        assert_eq!(insights.stats.matches_played, 1);
    }

    #[test]
    fn test_gold_points_before_accumulates() {
        let db = Database::open_in_memory().unwrap();
        // Porto: win, draw, then a third match; opponent rows come along
        let rows = vec![
            raw_row(1, "2025-09-16T19:00:00Z", "FINISHED", (10, "Porto"), (20, "Ajax"), (Some(2), Some(0)), 1),
            raw_row(2, "2025-09-30T19:00:00Z", "FINISHED", (30, "Inter"), (10, "Porto"), (Some(1), Some(1)), 2),
            raw_row(3, "2025-10-21T19:00:00Z", "FINISHED", (10, "Porto"), (40, "Lille"), (Some(0), Some(1)), 3),
        ];
        db.upsert("raw_matches", &rows, &["id"]).unwrap();
        refresh_metrics(&db).unwrap();

        let conn = db.raw_connection();
        let conn = conn.lock().unwrap();
        let points: Vec<i64> = {
            let mut stmt = conn
                .prepare(
                    "SELECT points_before FROM gold_team_form_rolling
                     WHERE team_id = 10 ORDER BY match_utc_datetime",
                )
                .unwrap();
            stmt.query_map([], |r| r.get(0))
                .unwrap()
                .collect::<rusqlite::Result<Vec<_>>>()
                .unwrap()
        };
        assert_eq!(points, vec![0, 3, 4]);
    }

    #[test]
    fn test_parse_date_arg() {
        assert_eq!(
            parse_date_arg(Some("2025-09-01"), "start").unwrap(),
            NaiveDate::from_ymd_opt(2025, 9, 1)
        );
        assert_eq!(parse_date_arg(None, "start").unwrap(), None);
        assert!(parse_date_arg(Some("01/09/2025"), "start").is_err());
    }

    #[test]
    fn test_max_utc_date_skips_unparseable() {
        let mut a = serde_json::Map::new();
        a.insert("utc_date".into(), json!("2025-09-16T19:00:00Z"));
        let mut b = serde_json::Map::new();
        b.insert("utc_date".into(), json!("2025-09-30T19:00:00Z"));
        let mut c = serde_json::Map::new();
        c.insert("utc_date".into(), json!("not a date"));
        let rows = vec![a, b, c];
        assert_eq!(
            max_utc_date(&rows).unwrap().to_rfc3339(),
            "2025-09-30T19:00:00+00:00"
        );
        assert_eq!(max_utc_date(&[]), None);
    }
}
