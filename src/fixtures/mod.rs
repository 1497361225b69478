//! Client for the football-data.org v4 API and the next-round fixture
//! selector used by the dashboard.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::db::models::Fixture;

/// Largest dateFrom..dateTo span the API accepts per request
const MAX_WINDOW_DAYS: i64 = 7;
/// Wait applied once per chunk when the API answers 429
const RATE_LIMIT_WAIT_SECS: u64 = 60;

#[derive(Clone)]
pub struct FootballDataClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    local_offset: FixedOffset,
}

impl FootballDataClient {
    pub fn new(base_url: &str, api_key: Option<String>, local_utc_offset_hours: i32) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        let local_offset = FixedOffset::east_opt(local_utc_offset_hours * 3600)
            .context("Invalid local UTC offset")?;
        Ok(FootballDataClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            local_offset,
        })
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        let mut req = self.http.get(url).header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("X-Auth-Token", key);
        }
        req
    }

    /// Scheduled matches for one competition, parsed into fixtures
    pub async fn fetch_scheduled(&self, competition: &str) -> Result<Vec<Fixture>> {
        let url = Url::parse_with_params(
            &format!("{}/competitions/{}/matches", self.base_url, competition),
            [("status", "SCHEDULED")],
        )?;
        debug!("Fetching scheduled matches from {}", url);

        let resp = self
            .get(url)
            .send()
            .await
            .context("football-data.org request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("football-data.org error {}: {}", status, body);
        }

        let raw: Value = resp
            .json()
            .await
            .context("Failed to parse football-data.org response")?;
        Ok(parse_scheduled(&raw, self.local_offset))
    }

    /// Matches in [since, until), chunked into windows the API accepts,
    /// flattened into raw rows for the ingest zone.
    ///
    /// A 429 on a chunk waits once and retries that chunk; any other failure
    /// aborts the whole fetch so the caller's watermark does not advance.
    pub async fn fetch_matches_since(
        &self,
        since: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
        competitions: Option<&str>,
    ) -> Result<Vec<serde_json::Map<String, Value>>> {
        let start = since.date_naive();
        let end = until.unwrap_or_else(|| Utc::now() + Duration::days(1)).date_naive();

        let mut rows = Vec::new();
        for (chunk_start, chunk_end) in chunk_date_range(start, end, MAX_WINDOW_DAYS) {
            let mut params = vec![
                ("dateFrom".to_string(), chunk_start.to_string()),
                ("dateTo".to_string(), chunk_end.to_string()),
            ];
            if let Some(comps) = competitions {
                params.push(("competitions".to_string(), comps.to_string()));
            }
            let url = Url::parse_with_params(&format!("{}/matches", self.base_url), &params)?;

            let mut resp = self
                .get(url.clone())
                .send()
                .await
                .context("football-data.org request failed")?;
            if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                warn!(
                    "Rate limited on {}..{}, waiting {}s",
                    chunk_start, chunk_end, RATE_LIMIT_WAIT_SECS
                );
                tokio::time::sleep(std::time::Duration::from_secs(RATE_LIMIT_WAIT_SECS)).await;
                resp = self
                    .get(url)
                    .send()
                    .await
                    .context("football-data.org request failed")?;
            }
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("football-data.org error {}: {}", status, body);
            }

            let raw: Value = resp
                .json()
                .await
                .context("Failed to parse football-data.org response")?;
            let matches = raw["matches"].as_array().cloned().unwrap_or_default();
            debug!(
                "Chunk {}..{}: {} matches",
                chunk_start,
                chunk_end,
                matches.len()
            );
            let extracted_at = Utc::now();
            rows.extend(matches.iter().map(|m| flatten_match(m, extracted_at)));
        }

        info!("Fetched {} match rows since {}", rows.len(), since);
        Ok(rows)
    }
}

/// Split [start, end] into inclusive windows of at most `window_days` days
fn chunk_date_range(
    mut start: NaiveDate,
    mut end: NaiveDate,
    window_days: i64,
) -> Vec<(NaiveDate, NaiveDate)> {
    debug_assert!(window_days >= 1);
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }
    let mut chunks = Vec::new();
    let mut current = start;
    while current <= end {
        let chunk_end = (current + Duration::days(window_days - 1)).min(end);
        chunks.push((current, chunk_end));
        current = chunk_end + Duration::days(1);
    }
    chunks
}

/// Flatten one football-data match object into a raw-zone row
fn flatten_match(m: &Value, extracted_at: DateTime<Utc>) -> serde_json::Map<String, Value> {
    let mut row = serde_json::Map::new();
    row.insert("id".into(), m["id"].clone());
    row.insert("utc_date".into(), m["utcDate"].clone());
    row.insert("status".into(), m["status"].clone());
    row.insert("matchday".into(), m["matchday"].clone());
    row.insert("stage".into(), m["stage"].clone());
    row.insert("group_name".into(), m["group"].clone());
    row.insert("last_updated".into(), m["lastUpdated"].clone());
    row.insert("season_id".into(), m["season"]["id"].clone());
    row.insert("competition_code".into(), m["competition"]["code"].clone());
    row.insert("competition_name".into(), m["competition"]["name"].clone());
    row.insert("home_team_id".into(), m["homeTeam"]["id"].clone());
    row.insert("home_team_name".into(), m["homeTeam"]["name"].clone());
    row.insert("away_team_id".into(), m["awayTeam"]["id"].clone());
    row.insert("away_team_name".into(), m["awayTeam"]["name"].clone());
    row.insert("ft_home_goals".into(), m["score"]["fullTime"]["home"].clone());
    row.insert("ft_away_goals".into(), m["score"]["fullTime"]["away"].clone());
    row.insert("ht_home_goals".into(), m["score"]["halfTime"]["home"].clone());
    row.insert("ht_away_goals".into(), m["score"]["halfTime"]["away"].clone());
    row.insert("winner".into(), m["score"]["winner"].clone());
    row.insert("extracted_at".into(), json!(extracted_at.to_rfc3339()));
    row.insert("source".into(), json!("football-data.org"));
    row
}

fn parse_scheduled(raw: &Value, local_offset: FixedOffset) -> Vec<Fixture> {
    let matches = match raw["matches"].as_array() {
        Some(a) => a,
        None => return vec![],
    };

    matches
        .iter()
        .filter_map(|m| {
            let kickoff_utc = m["utcDate"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())?
                .with_timezone(&Utc);
            let kickoff_local = kickoff_utc
                .with_timezone(&local_offset)
                .format("%d/%m %H:%M")
                .to_string();
            Some(Fixture {
                matchday: m["matchday"].as_u64().map(|v| v as u32),
                kickoff_utc,
                kickoff_local,
                stage: m["stage"].as_str().map(str::to_string),
                home_team_id: m["homeTeam"]["id"].as_i64(),
                home_team: m["homeTeam"]["name"].as_str().map(str::to_string),
                away_team_id: m["awayTeam"]["id"].as_i64(),
                away_team: m["awayTeam"]["name"].as_str().map(str::to_string),
            })
        })
        .collect()
}

/// How many fixtures the chronological fallback keeps when no matchday can
/// anchor a round
const FALLBACK_LIMIT: usize = 20;

/// Pick the next round to display.
///
/// Fixtures with unassigned teams (TBD knockout slots) are excluded before
/// choosing the minimum matchday; when no matchday or no assigned pairing
/// exists the earliest fixtures are shown instead. Output is always ordered
/// by kickoff.
pub fn select_next_round(fixtures: Vec<Fixture>) -> Vec<Fixture> {
    let valid: Vec<Fixture> = fixtures.iter().filter(|f| f.has_teams()).cloned().collect();

    let mut target: Vec<Fixture> = if valid.is_empty() {
        let mut all = fixtures;
        all.sort_by_key(|f| f.kickoff_utc);
        all.truncate(FALLBACK_LIMIT);
        all
    } else if let Some(next_matchday) = valid.iter().filter_map(|f| f.matchday).min() {
        valid
            .into_iter()
            .filter(|f| f.matchday == Some(next_matchday))
            .collect()
    } else {
        let mut v = valid;
        v.sort_by_key(|f| f.kickoff_utc);
        v.truncate(FALLBACK_LIMIT);
        v
    };

    target.sort_by_key(|f| f.kickoff_utc);
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixture(matchday: Option<u32>, kickoff: &str, teams: bool) -> Fixture {
        Fixture {
            matchday,
            kickoff_utc: DateTime::parse_from_rfc3339(kickoff).unwrap().with_timezone(&Utc),
            kickoff_local: String::new(),
            stage: Some("LEAGUE_STAGE".into()),
            home_team_id: teams.then_some(1),
            home_team: teams.then(|| "Porto".to_string()),
            away_team_id: teams.then_some(2),
            away_team: teams.then(|| "Ajax".to_string()),
        }
    }

    #[test]
    fn test_select_minimum_matchday_ordered_by_kickoff() {
        let fixtures = vec![
            fixture(Some(3), "2025-10-21T19:00:00Z", true),
            fixture(Some(2), "2025-09-30T19:00:00Z", true),
            fixture(Some(2), "2025-09-30T17:45:00Z", true),
            fixture(None, "2025-09-01T19:00:00Z", true),
        ];
        let round = select_next_round(fixtures);
        assert_eq!(round.len(), 2);
        assert!(round.iter().all(|f| f.matchday == Some(2)));
        assert!(round[0].kickoff_utc < round[1].kickoff_utc);
    }

    #[test]
    fn test_tbd_fixtures_excluded_from_matchday_choice() {
        // The TBD fixture has the lowest matchday but no teams assigned
        let fixtures = vec![
            fixture(Some(1), "2025-09-16T19:00:00Z", false),
            fixture(Some(2), "2025-09-30T19:00:00Z", true),
        ];
        let round = select_next_round(fixtures);
        assert_eq!(round.len(), 1);
        assert_eq!(round[0].matchday, Some(2));
    }

    #[test]
    fn test_no_matchdays_falls_back_to_earliest() {
        let mut fixtures: Vec<Fixture> = (0..30)
            .map(|i| fixture(None, &format!("2025-09-{:02}T19:00:00Z", i % 28 + 1), true))
            .collect();
        fixtures.reverse();
        let round = select_next_round(fixtures);
        assert_eq!(round.len(), 20);
        assert!(round.windows(2).all(|w| w[0].kickoff_utc <= w[1].kickoff_utc));
    }

    #[test]
    fn test_no_assigned_teams_falls_back_to_earliest_overall() {
        let fixtures: Vec<Fixture> = (0..25)
            .map(|i| fixture(Some(1), &format!("2025-09-{:02}T19:00:00Z", i % 28 + 1), false))
            .collect();
        let round = select_next_round(fixtures);
        assert_eq!(round.len(), 20);
    }

    #[test]
    fn test_chunk_date_range_splits_and_swaps() {
        let start = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 9, 16).unwrap();
        let chunks = chunk_date_range(start, end, 7);
        assert_eq!(
            chunks,
            vec![
                (start, NaiveDate::from_ymd_opt(2025, 9, 7).unwrap()),
                (
                    NaiveDate::from_ymd_opt(2025, 9, 8).unwrap(),
                    NaiveDate::from_ymd_opt(2025, 9, 14).unwrap()
                ),
                (NaiveDate::from_ymd_opt(2025, 9, 15).unwrap(), end),
            ]
        );
        // Reversed bounds are swapped, not rejected
        assert_eq!(chunk_date_range(end, start, 7).len(), 3);
    }

    #[test]
    fn test_parse_scheduled_and_flatten() {
        let raw = serde_json::json!({
            "matches": [{
                "id": 551111,
                "utcDate": "2025-09-16T19:00:00Z",
                "status": "SCHEDULED",
                "matchday": 1,
                "stage": "LEAGUE_STAGE",
                "competition": { "code": "CL", "name": "UEFA Champions League" },
                "homeTeam": { "id": 503, "name": "FC Porto" },
                "awayTeam": { "id": 678, "name": "AFC Ajax" },
                "score": { "fullTime": { "home": null, "away": null },
                           "halfTime": { "home": null, "away": null }, "winner": null }
            }]
        });
        let offset = FixedOffset::east_opt(-3 * 3600).unwrap();
        let fixtures = parse_scheduled(&raw, offset);
        assert_eq!(fixtures.len(), 1);
        assert_eq!(fixtures[0].home_team.as_deref(), Some("FC Porto"));
        assert_eq!(fixtures[0].matchday, Some(1));
        assert_eq!(fixtures[0].kickoff_local, "16/09 16:00");

        let extracted = Utc.with_ymd_and_hms(2025, 9, 16, 12, 0, 0).unwrap();
        let row = flatten_match(&raw["matches"][0], extracted);
        assert_eq!(row["id"], serde_json::json!(551111));
        assert_eq!(row["competition_code"], serde_json::json!("CL"));
        assert_eq!(row["home_team_name"], serde_json::json!("FC Porto"));
        assert_eq!(row["ft_home_goals"], Value::Null);
        assert_eq!(row["source"], serde_json::json!("football-data.org"));
    }
}
