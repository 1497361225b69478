use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::sync::{Arc, Mutex};

pub mod models;
use models::*;

/// Thread-safe SQLite connection (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// In-memory database for tests
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Direct connection handle for test assertions
    #[cfg(test)]
    pub fn raw_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Execute a multi-statement SQL script (silver/gold rebuilds)
    pub fn exec_batch(&self, sql: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    // ── Generic upsert ───────────────────────────────────────────────────────

    /// Merge rows into `table` keyed by `key_cols`.
    ///
    /// Creates the table from the first row's column set if it does not exist
    /// yet, adds any columns the table is missing (schema auto-widening), and
    /// applies each row with `INSERT .. ON CONFLICT DO UPDATE`. Returns the
    /// number of rows applied.
    pub fn upsert(
        &self,
        table: &str,
        rows: &[serde_json::Map<String, Value>],
        key_cols: &[&str],
    ) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        if key_cols.is_empty() {
            anyhow::bail!("upsert into {table} requires at least one key column");
        }

        // Union of columns across all rows, first-seen order
        let mut columns: Vec<String> = Vec::new();
        for row in rows {
            for col in row.keys() {
                if !columns.iter().any(|c| c == col) {
                    columns.push(col.clone());
                }
            }
        }
        for key in key_cols {
            if !columns.iter().any(|c| c == key) {
                anyhow::bail!("upsert into {table}: key column {key} missing from rows");
            }
        }

        let mut conn = self.conn.lock().unwrap();
        ensure_table(&conn, table, &columns, rows, key_cols)?;
        ensure_columns(&conn, table, &columns, rows)?;

        let non_key: Vec<&String> = columns
            .iter()
            .filter(|c| !key_cols.contains(&c.as_str()))
            .collect();
        let col_list = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
        let placeholders = (1..=columns.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
        let key_list = key_cols.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
        let sql = if non_key.is_empty() {
            format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) DO NOTHING",
                quote_ident(table),
                col_list,
                placeholders,
                key_list
            )
        } else {
            let update_set = non_key
                .iter()
                .map(|c| format!("{} = excluded.{}", quote_ident(c), quote_ident(c)))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) DO UPDATE SET {}",
                quote_ident(table),
                col_list,
                placeholders,
                key_list,
                update_set
            )
        };

        let tx = conn.transaction()?;
        let mut applied = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                let values: Vec<rusqlite::types::Value> = columns
                    .iter()
                    .map(|c| to_sql_value(row.get(c).unwrap_or(&Value::Null)))
                    .collect();
                applied += stmt.execute(rusqlite::params_from_iter(values))?;
            }
        }
        tx.commit()?;
        Ok(applied)
    }

    // ── Watermarks ───────────────────────────────────────────────────────────

    /// Upper bound of the last successful incremental fetch; epoch if never run
    pub fn high_watermark(&self, source: &str, entity: &str, key: &str) -> Result<DateTime<Utc>> {
        self.watermark_column(source, entity, key, "high_watermark")
    }

    pub fn last_success_at(&self, source: &str, entity: &str, key: &str) -> Result<DateTime<Utc>> {
        self.watermark_column(source, entity, key, "last_success_at")
    }

    fn watermark_column(
        &self,
        source: &str,
        entity: &str,
        key: &str,
        column: &str,
    ) -> Result<DateTime<Utc>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {column} FROM meta_watermarks WHERE source = ?1 AND entity = ?2 AND key = ?3"
        );
        let value: Option<Option<DateTime<Utc>>> = conn
            .query_row(&sql, params![source, entity, key], |r| r.get(0))
            .map(Some)
            .or_else(ignore_no_rows)?;
        Ok(value.flatten().unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap()))
    }

    /// Partial update: a `None` leaves the stored value untouched
    pub fn set_watermarks(
        &self,
        source: &str,
        entity: &str,
        key: &str,
        last_success_at: Option<DateTime<Utc>>,
        high_watermark: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO meta_watermarks (source, entity, key, last_success_at, high_watermark, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(source, entity, key) DO UPDATE SET
                last_success_at = COALESCE(excluded.last_success_at, meta_watermarks.last_success_at),
                high_watermark  = COALESCE(excluded.high_watermark, meta_watermarks.high_watermark),
                updated_at      = excluded.updated_at",
            params![source, entity, key, last_success_at, high_watermark, Utc::now()],
        )?;
        Ok(())
    }

    // ── Reporting queries (team insights) ────────────────────────────────────

    /// All dashboard statistics for one team in the given competition.
    ///
    /// Reads `silver_matches` (and `gold_team_form_rolling` for opponent
    /// pre-match points); both are rebuilt by the ETL flows.
    pub fn team_insights(&self, team_id: i64, competition_code: &str) -> Result<TeamInsights> {
        let stats = self.team_stats(team_id, competition_code)?;
        let form = self.recent_form(team_id, competition_code, 3)?;
        let location = self.location_splits(team_id, competition_code)?;
        let matches = self.competition_matches(team_id, competition_code)?;
        let goals_by_matchday = self.goals_by_matchday(team_id, competition_code)?;
        let last_games = self.last_games(team_id, 5)?;
        Ok(TeamInsights {
            stats,
            form,
            location,
            matches,
            goals_by_matchday,
            last_games,
        })
    }

    fn team_stats(&self, team_id: i64, competition_code: &str) -> Result<TeamStats> {
        let conn = self.conn.lock().unwrap();
        let (matches_played, goals_for, goals_against) = conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN home_team_id = ?1 THEN ft_home_goals ELSE ft_away_goals END), 0),
                COALESCE(SUM(CASE WHEN home_team_id = ?1 THEN ft_away_goals ELSE ft_home_goals END), 0)
             FROM silver_matches
             WHERE competition_code = ?2
               AND status IN ('FINISHED','AWARDED')
               AND (home_team_id = ?1 OR away_team_id = ?1)",
            params![team_id, competition_code],
            |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?, r.get::<_, i64>(2)?)),
        )?;
        let points_total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(
                CASE
                    WHEN home_team_id = ?1 AND ft_home_goals > ft_away_goals THEN 3
                    WHEN away_team_id = ?1 AND ft_away_goals > ft_home_goals THEN 3
                    WHEN ft_home_goals = ft_away_goals THEN 1
                    ELSE 0
                END
             ), 0)
             FROM silver_matches
             WHERE competition_code = ?2
               AND status IN ('FINISHED','AWARDED')
               AND (home_team_id = ?1 OR away_team_id = ?1)",
            params![team_id, competition_code],
            |r| r.get(0),
        )?;
        Ok(TeamStats {
            matches_played,
            goals_for,
            goals_against,
            points_total,
        })
    }

    /// Last-n results as a "W - D - L" string, newest first
    fn recent_form(&self, team_id: i64, competition_code: &str, n: i64) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT CASE
                WHEN ft_home_goals = ft_away_goals THEN 'D'
                WHEN home_team_id = ?1 AND ft_home_goals > ft_away_goals THEN 'W'
                WHEN away_team_id = ?1 AND ft_away_goals > ft_home_goals THEN 'W'
                ELSE 'L'
             END
             FROM silver_matches
             WHERE competition_code = ?2
               AND status IN ('FINISHED','AWARDED')
               AND (home_team_id = ?1 OR away_team_id = ?1)
             ORDER BY match_utc_datetime DESC
             LIMIT ?3",
        )?;
        let results = stmt
            .query_map(params![team_id, competition_code, n], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if results.is_empty() {
            Ok(None)
        } else {
            Ok(Some(results.join(" - ")))
        }
    }

    fn location_splits(&self, team_id: i64, competition_code: &str) -> Result<LocationSplits> {
        let conn = self.conn.lock().unwrap();
        let row = conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN home_team_id = ?1 THEN ft_home_goals ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN home_team_id = ?1 THEN ft_away_goals ELSE 0 END), 0),
                COUNT(CASE WHEN home_team_id = ?1 THEN 1 END),
                COALESCE(SUM(CASE WHEN away_team_id = ?1 THEN ft_away_goals ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN away_team_id = ?1 THEN ft_home_goals ELSE 0 END), 0),
                COUNT(CASE WHEN away_team_id = ?1 THEN 1 END),
                COUNT(CASE WHEN home_team_id = ?1 AND ft_away_goals = 0 THEN 1 END),
                COUNT(CASE WHEN away_team_id = ?1 AND ft_home_goals = 0 THEN 1 END)
             FROM silver_matches
             WHERE competition_code = ?2
               AND status IN ('FINISHED','AWARDED')
               AND (home_team_id = ?1 OR away_team_id = ?1)",
            params![team_id, competition_code],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, i64>(4)?,
                    r.get::<_, i64>(5)?,
                    r.get::<_, i64>(6)?,
                    r.get::<_, i64>(7)?,
                ))
            },
        )?;
        let (gf_home, ga_home, games_home, gf_away, ga_away, games_away, clean_home, clean_away) = row;
        let avg = |numer: i64, denom: i64| -> Option<f64> {
            (denom > 0).then(|| numer as f64 / denom as f64)
        };
        Ok(LocationSplits {
            gf_home_avg: avg(gf_home, games_home),
            ga_home_avg: avg(ga_home, games_home),
            gf_away_avg: avg(gf_away, games_away),
            ga_away_avg: avg(ga_away, games_away),
            games_home,
            games_away,
            clean_home,
            clean_away,
            clean_total: clean_home + clean_away,
        })
    }

    fn competition_matches(&self, team_id: i64, competition_code: &str) -> Result<Vec<TeamMatchRow>> {
        // The gold table may not exist before the first metrics rebuild
        let has_gold = {
            let conn = self.conn.lock().unwrap();
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'gold_team_form_rolling'",
                [],
                |r| r.get(0),
            )?;
            count > 0
        };
        let join = if has_gold {
            "LEFT JOIN gold_team_form_rolling g
               ON g.match_id = sm.match_id
              AND g.competition_code = sm.competition_code
              AND g.team_id = CASE WHEN sm.home_team_id = ?1 THEN sm.away_team_id ELSE sm.home_team_id END"
        } else {
            ""
        };
        let points_col = if has_gold { "g.points_before" } else { "NULL" };
        let sql = format!(
            "SELECT
                sm.match_utc_datetime,
                sm.home_team_name,
                sm.away_team_name,
                sm.ft_home_goals,
                sm.ft_away_goals,
                CASE
                    WHEN sm.ft_home_goals = sm.ft_away_goals THEN 'Draw'
                    WHEN sm.home_team_id = ?1 AND sm.ft_home_goals > sm.ft_away_goals THEN 'Win'
                    WHEN sm.away_team_id = ?1 AND sm.ft_away_goals > sm.ft_home_goals THEN 'Win'
                    ELSE 'Loss'
                END,
                {points_col}
             FROM silver_matches sm
             {join}
             WHERE sm.competition_code = ?2
               AND sm.status IN ('FINISHED','AWARDED')
               AND (sm.home_team_id = ?1 OR sm.away_team_id = ?1)
             ORDER BY sm.match_utc_datetime DESC"
        );
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![team_id, competition_code], |r| {
                Ok(TeamMatchRow {
                    match_utc_datetime: r.get(0)?,
                    home_team_name: r.get(1)?,
                    away_team_name: r.get(2)?,
                    ft_home_goals: r.get(3)?,
                    ft_away_goals: r.get(4)?,
                    result: r.get(5)?,
                    opponent_points_before: r.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn goals_by_matchday(&self, team_id: i64, competition_code: &str) -> Result<Vec<GoalsByMatchday>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT
                matchday,
                CASE WHEN home_team_id = ?1 THEN 'Home' ELSE 'Away' END AS location,
                COALESCE(SUM(CASE WHEN home_team_id = ?1 THEN ft_home_goals ELSE ft_away_goals END), 0),
                COALESCE(SUM(CASE WHEN home_team_id = ?1 THEN ft_away_goals ELSE ft_home_goals END), 0)
             FROM silver_matches
             WHERE competition_code = ?2
               AND status IN ('FINISHED','AWARDED')
               AND (home_team_id = ?1 OR away_team_id = ?1)
             GROUP BY matchday, location
             ORDER BY matchday",
        )?;
        let rows = stmt
            .query_map(params![team_id, competition_code], |r| {
                Ok(GoalsByMatchday {
                    matchday: r.get(0)?,
                    location: r.get(1)?,
                    goals_for: r.get(2)?,
                    goals_against: r.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn last_games(&self, team_id: i64, limit: i64) -> Result<Vec<RecentMatchRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT
                match_utc_datetime,
                competition_name,
                home_team_name,
                away_team_name,
                ft_home_goals,
                ft_away_goals,
                CASE
                    WHEN ft_home_goals = ft_away_goals THEN 'Draw'
                    WHEN home_team_id = ?1 AND ft_home_goals > ft_away_goals THEN 'Win'
                    WHEN away_team_id = ?1 AND ft_away_goals > ft_home_goals THEN 'Win'
                    ELSE 'Loss'
                END
             FROM silver_matches
             WHERE status IN ('FINISHED','AWARDED')
               AND (home_team_id = ?1 OR away_team_id = ?1)
             ORDER BY match_utc_datetime DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![team_id, limit], |r| {
                Ok(RecentMatchRow {
                    match_utc_datetime: r.get(0)?,
                    competition_name: r.get(1)?,
                    home_team_name: r.get(2)?,
                    away_team_name: r.get(3)?,
                    ft_home_goals: r.get(4)?,
                    ft_away_goals: r.get(5)?,
                    result: r.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

// ── Upsert helpers ─────────────────────────────────────────────────────────────

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// SQLite type affinity for a column, inferred from the first non-null value
fn column_affinity(rows: &[serde_json::Map<String, Value>], col: &str) -> &'static str {
    for row in rows {
        match row.get(col) {
            Some(Value::Bool(_)) => return "INTEGER",
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => return "INTEGER",
            Some(Value::Number(_)) => return "REAL",
            Some(Value::String(_)) => return "TEXT",
            Some(Value::Array(_)) | Some(Value::Object(_)) => return "TEXT",
            Some(Value::Null) | None => continue,
        }
    }
    "TEXT"
}

fn ensure_table(
    conn: &Connection,
    table: &str,
    columns: &[String],
    rows: &[serde_json::Map<String, Value>],
    key_cols: &[&str],
) -> Result<()> {
    let col_defs = columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(c), column_affinity(rows, c)))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} ({});",
        quote_ident(table),
        col_defs
    ))?;
    let key_list = key_cols.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    conn.execute_batch(&format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({});",
        quote_ident(&format!("ux_{table}_key")),
        quote_ident(table),
        key_list
    ))?;
    Ok(())
}

/// Add any columns the table is missing so the merge never fails when the
/// incoming row set grows a column
fn ensure_columns(
    conn: &Connection,
    table: &str,
    columns: &[String],
    rows: &[serde_json::Map<String, Value>],
) -> Result<()> {
    let existing: Vec<String> = {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let cols = stmt
            .query_map([], |r| r.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        cols
    };
    for col in columns {
        if !existing.iter().any(|c| c == col) {
            conn.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {} {};",
                quote_ident(table),
                quote_ident(col),
                column_affinity(rows, col)
            ))?;
        }
    }
    Ok(())
}

fn to_sql_value(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Sql::Integer(i)
            } else {
                Sql::Real(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => Sql::Text(s.clone()),
        other => Sql::Text(other.to_string()),
    }
}

fn ignore_no_rows<T>(err: rusqlite::Error) -> rusqlite::Result<Option<T>> {
    match err {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        e => Err(e),
    }
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS).
///
/// `raw_matches` is created on first upsert from the incoming column set;
/// the silver/gold tables are owned here so reporting queries never race a
/// missing table, while the SQL scripts only rebuild their contents.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS meta_watermarks (
    source          TEXT NOT NULL,
    entity          TEXT NOT NULL,
    key             TEXT NOT NULL,
    last_success_at TEXT,
    high_watermark  TEXT,
    updated_at      TEXT NOT NULL,
    PRIMARY KEY (source, entity, key)
);

CREATE TABLE IF NOT EXISTS silver_matches (
    match_id           INTEGER PRIMARY KEY,
    match_utc_datetime TEXT    NOT NULL,
    competition_code   TEXT,
    competition_name   TEXT,
    matchday           INTEGER,
    stage              TEXT,
    group_name         TEXT,
    status             TEXT,
    home_team_id       INTEGER,
    home_team_name     TEXT,
    away_team_id       INTEGER,
    away_team_name     TEXT,
    ft_home_goals      INTEGER,
    ft_away_goals      INTEGER,
    ht_home_goals      INTEGER,
    ht_away_goals      INTEGER,
    winner             TEXT,
    last_updated       TEXT
);

CREATE INDEX IF NOT EXISTS idx_silver_matches_team
    ON silver_matches(home_team_id, away_team_id);
CREATE INDEX IF NOT EXISTS idx_silver_matches_comp
    ON silver_matches(competition_code, status);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> serde_json::Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_upsert_inserts_then_updates() {
        let db = Database::open_in_memory().unwrap();
        let rows = vec![
            row(&[("id", json!(1)), ("status", json!("SCHEDULED"))]),
            row(&[("id", json!(2)), ("status", json!("SCHEDULED"))]),
        ];
        assert_eq!(db.upsert("raw_matches", &rows, &["id"]).unwrap(), 2);

        let updated = vec![row(&[("id", json!(1)), ("status", json!("FINISHED"))])];
        assert_eq!(db.upsert("raw_matches", &updated, &["id"]).unwrap(), 1);

        let conn = db.conn.lock().unwrap();
        let status: String = conn
            .query_row("SELECT status FROM raw_matches WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(status, "FINISHED");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM raw_matches", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_upsert_widens_schema_with_new_column() {
        let db = Database::open_in_memory().unwrap();
        db.upsert(
            "raw_matches",
            &[row(&[("id", json!(1)), ("status", json!("SCHEDULED"))])],
            &["id"],
        )
        .unwrap();
        // Second batch carries a column the table has never seen
        db.upsert(
            "raw_matches",
            &[row(&[
                ("id", json!(1)),
                ("status", json!("FINISHED")),
                ("winner", json!("HOME_TEAM")),
            ])],
            &["id"],
        )
        .unwrap();

        let conn = db.conn.lock().unwrap();
        let winner: Option<String> = conn
            .query_row("SELECT winner FROM raw_matches WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(winner.as_deref(), Some("HOME_TEAM"));
    }

    #[test]
    fn test_upsert_empty_rows_is_noop() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.upsert("raw_matches", &[], &["id"]).unwrap(), 0);
        assert!(!db.table_exists("raw_matches").unwrap());
    }

    #[test]
    fn test_watermark_defaults_to_epoch() {
        let db = Database::open_in_memory().unwrap();
        let wm = db.high_watermark("football-data", "matches", "global").unwrap();
        assert_eq!(wm, Utc.timestamp_opt(0, 0).unwrap());
    }

    #[test]
    fn test_watermark_partial_update_keeps_other_column() {
        let db = Database::open_in_memory().unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 9, 2, 12, 0, 0).unwrap();
        db.set_watermarks("football-data", "matches", "global", Some(t1), Some(t1))
            .unwrap();
        // Advance only last_success_at; high watermark must survive
        db.set_watermarks("football-data", "matches", "global", Some(t2), None)
            .unwrap();
        assert_eq!(db.last_success_at("football-data", "matches", "global").unwrap(), t2);
        assert_eq!(db.high_watermark("football-data", "matches", "global").unwrap(), t1);
    }

    fn seed_match(
        db: &Database,
        id: i64,
        dt: &str,
        home: (i64, &str),
        away: (i64, &str),
        score: (i64, i64),
        matchday: i64,
    ) {
        let conn = db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO silver_matches (
                match_id, match_utc_datetime, competition_code, competition_name,
                matchday, stage, status,
                home_team_id, home_team_name, away_team_id, away_team_name,
                ft_home_goals, ft_away_goals
             ) VALUES (?1, ?2, 'CL', 'UEFA Champions League', ?3, 'LEAGUE_STAGE', 'FINISHED',
                       ?4, ?5, ?6, ?7, ?8, ?9)",
            params![id, dt, matchday, home.0, home.1, away.0, away.1, score.0, score.1],
        )
        .unwrap();
    }

    #[test]
    fn test_team_insights_stats_and_form() {
        let db = Database::open_in_memory().unwrap();
        // Team 10: home win 3-1, away draw 2-2, home loss 0-1 (newest last)
        seed_match(&db, 1, "2025-09-16T19:00:00Z", (10, "Porto"), (20, "Ajax"), (3, 1), 1);
        seed_match(&db, 2, "2025-09-30T19:00:00Z", (30, "Inter"), (10, "Porto"), (2, 2), 2);
        seed_match(&db, 3, "2025-10-21T19:00:00Z", (10, "Porto"), (40, "Lille"), (0, 1), 3);

        let insights = db.team_insights(10, "CL").unwrap();
        assert_eq!(insights.stats.matches_played, 3);
        assert_eq!(insights.stats.goals_for, 5);
        assert_eq!(insights.stats.goals_against, 4);
        assert_eq!(insights.stats.points_total, 4);
        // Newest first: loss, draw, win
        assert_eq!(insights.form.as_deref(), Some("L - D - W"));
        assert_eq!(insights.location.games_home, 2);
        assert_eq!(insights.location.games_away, 1);
        assert_eq!(insights.location.clean_total, 0);
        assert_eq!(insights.matches.len(), 3);
        assert_eq!(insights.matches[0].result, "Loss");
        assert_eq!(insights.last_games.len(), 3);
    }

    #[test]
    fn test_clean_sheets_counted_per_venue() {
        let db = Database::open_in_memory().unwrap();
        seed_match(&db, 1, "2025-09-16T19:00:00Z", (10, "Porto"), (20, "Ajax"), (2, 0), 1);
        seed_match(&db, 2, "2025-09-30T19:00:00Z", (30, "Inter"), (10, "Porto"), (0, 1), 2);
        let insights = db.team_insights(10, "CL").unwrap();
        assert_eq!(insights.location.clean_home, 1);
        assert_eq!(insights.location.clean_away, 1);
        assert_eq!(insights.location.clean_total, 2);
    }
}
