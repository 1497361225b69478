use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::cache::TtlCache;
use crate::db::models::Fixture;
use crate::db::Database;
use crate::fixtures::{select_next_round, FootballDataClient};
use crate::odds::{
    exact_matches, moneyline_summary, normalize_team_name, odds_overview, swapped_matches,
    totals_table, MoneylineSummary, OddsApiClient, OddsApiMeta, OddsEventOverview, OddsSnapshot,
    TotalsLine,
};

/// Markets requested on every odds refresh; the 422 fallback may narrow
/// the snapshot to moneyline only
const REQUESTED_MARKETS: &[&str] = &["h2h", "totals"];

pub struct AppState {
    pub db: Database,
    pub fixtures_client: FootballDataClient,
    pub odds_client: OddsApiClient,
    pub fixtures_cache: TtlCache<Vec<Fixture>>,
    pub odds_cache: TtlCache<OddsSnapshot>,
    pub fixtures_ttl: Duration,
    pub odds_ttl: Duration,
    pub competition_code: String,
    pub debug_odds: bool,
}

/// Build the Axum router for the dashboard.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/fixtures", get(fixtures_handler))
        .route("/api/odds", get(odds_handler))
        .route("/api/team/:id", get(team_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Serve the dashboard HTML page, injecting the competition code.
async fn index_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let html = DASHBOARD_HTML.replace(
        r#"<body>"#,
        &format!(r#"<body data-competition="{}">"#, state.competition_code),
    );
    Html(html)
}

#[derive(Serialize)]
struct FixturesResponse {
    fixtures: Vec<Fixture>,
    warning: Option<String>,
}

/// GET /api/fixtures
async fn fixtures_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (fixtures, warning) = next_round_fixtures(&state).await;
    Json(FixturesResponse { fixtures, warning })
}

#[derive(Deserialize)]
struct OddsQuery {
    home: String,
    away: String,
}

#[derive(Serialize)]
struct OddsDebug {
    overview: Vec<OddsEventOverview>,
    exact: Vec<OddsEventOverview>,
    swapped: Vec<OddsEventOverview>,
}

#[derive(Serialize)]
struct OddsResponse {
    fixture: Fixture,
    moneyline: Option<MoneylineSummary>,
    /// `None` when the totals market was dropped by the availability
    /// fallback, as opposed to an empty table with no coverage
    totals: Option<Vec<TotalsLine>>,
    quota: OddsApiMeta,
    stale: bool,
    warning: Option<String>,
    debug: Option<OddsDebug>,
}

/// GET /api/odds?home=...&away=...
async fn odds_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OddsQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (fixtures, _) = next_round_fixtures(&state).await;
    let fixture = find_fixture(&fixtures, &query.home, &query.away).ok_or((
        StatusCode::NOT_FOUND,
        format!("No fixture {} x {} in the current round", query.home, query.away),
    ))?;

    let (snapshot, stale, warning) = match odds_snapshot(&state).await {
        Some(result) => result,
        None => {
            return Ok(Json(OddsResponse {
                fixture,
                moneyline: None,
                totals: None,
                quota: OddsApiMeta::default(),
                stale: false,
                warning: Some("Odds are unavailable right now".to_string()),
                debug: None,
            }))
        }
    };

    let moneyline = moneyline_summary(&fixture, &snapshot.quotes);
    let totals = snapshot
        .used_markets
        .iter()
        .any(|m| m == "totals")
        .then(|| totals_table(&fixture, &snapshot.quotes));
    let debug = state.debug_odds.then(|| {
        let overview = odds_overview(&snapshot.quotes);
        OddsDebug {
            exact: exact_matches(&fixture, &overview).into_iter().cloned().collect(),
            swapped: swapped_matches(&fixture, &overview).into_iter().cloned().collect(),
            overview,
        }
    });

    Ok(Json(OddsResponse {
        fixture,
        moneyline,
        totals,
        quota: snapshot.meta,
        stale,
        warning,
        debug,
    }))
}

/// GET /api/team/:id
async fn team_handler(
    State(state): State<Arc<AppState>>,
    Path(team_id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .db
        .team_insights(team_id, &state.competition_code)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Next-round fixtures, served from cache and refreshed on expiry. A failed
/// refresh degrades to the empty list with a warning instead of an error
/// page; the stale cache entry, if any, is preferred over nothing.
async fn next_round_fixtures(state: &AppState) -> (Vec<Fixture>, Option<String>) {
    if let Some(fixtures) = state.fixtures_cache.get(state.fixtures_ttl) {
        return (fixtures, None);
    }
    match state.fixtures_client.fetch_scheduled(&state.competition_code).await {
        Ok(all) => {
            let round = select_next_round(all);
            state.fixtures_cache.put(round.clone());
            (round, None)
        }
        Err(e) => {
            warn!("Fixture refresh failed: {e:#}");
            match state.fixtures_cache.last_good() {
                Some((fixtures, age)) => (
                    fixtures,
                    Some(format!("Showing fixtures cached {}s ago", age.as_secs())),
                ),
                None => (vec![], Some("Fixtures are unavailable right now".to_string())),
            }
        }
    }
}

/// Odds snapshot, cache-first. Returns the snapshot plus staleness flag and
/// warning; `None` when there is no snapshot at all to fall back on.
async fn odds_snapshot(state: &AppState) -> Option<(OddsSnapshot, bool, Option<String>)> {
    if let Some(snapshot) = state.odds_cache.get(state.odds_ttl) {
        return Some((snapshot, false, None));
    }
    match state.odds_client.fetch_odds_with_fallback(REQUESTED_MARKETS).await {
        Ok(snapshot) => {
            state.odds_cache.put(snapshot.clone());
            Some((snapshot, false, None))
        }
        Err(e) => {
            warn!("Odds refresh failed: {e}");
            let (snapshot, age) = state.odds_cache.last_good()?;
            Some((
                snapshot,
                true,
                Some(format!("Showing odds cached {}s ago", age.as_secs())),
            ))
        }
    }
}

fn find_fixture(fixtures: &[Fixture], home: &str, away: &str) -> Option<Fixture> {
    let home_key = normalize_team_name(Some(home));
    let away_key = normalize_team_name(Some(away));
    fixtures
        .iter()
        .find(|f| {
            normalize_team_name(f.home_team.as_deref()) == home_key
                && normalize_team_name(f.away_team.as_deref()) == away_key
        })
        .cloned()
}

/// Embedded single-file dashboard (HTML + CSS + JS)
const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Fixtures &amp; Odds</title>
<style>
  :root {
    --bg: #0f1117;
    --card: #1a1d27;
    --border: #2a2d3a;
    --accent: #6c63ff;
    --green: #00c896;
    --amber: #ff9800;
    --red: #ff4f6a;
    --text: #e0e0e0;
    --muted: #8888aa;
  }
  * { box-sizing: border-box; margin: 0; padding: 0; }
  body { background: var(--bg); color: var(--text); font-family: 'Segoe UI', system-ui, sans-serif; }
  header { display: flex; align-items: center; gap: 1rem; padding: 1rem 2rem; border-bottom: 1px solid var(--border); }
  header h1 { font-size: 1.4rem; font-weight: 700; }
  .badge { padding: .2rem .6rem; border-radius: 4px; font-size: .75rem; font-weight: 700; text-transform: uppercase; background: var(--accent); color: #000; }
  main { padding: 1.5rem 2rem; display: grid; gap: 1.5rem; }
  .panel { background: var(--card); border: 1px solid var(--border); border-radius: 10px; overflow: hidden; }
  .panel-header { padding: .9rem 1.2rem; border-bottom: 1px solid var(--border); font-weight: 600; display: flex; justify-content: space-between; align-items: center; }
  table { width: 100%; border-collapse: collapse; }
  th { padding: .7rem 1rem; text-align: left; font-size: .75rem; text-transform: uppercase; color: var(--muted); border-bottom: 1px solid var(--border); }
  td { padding: .65rem 1rem; font-size: .88rem; border-bottom: 1px solid #1e2130; }
  tr:last-child td { border-bottom: none; }
  tr.fixture-row { cursor: pointer; }
  tr.fixture-row:hover td { background: rgba(108,99,255,.08); }
  tr.odds-row td { background: #151823; padding: 1rem 1.4rem; }
  .team-link { color: var(--accent); cursor: pointer; text-decoration: none; }
  .team-link:hover { text-decoration: underline; }
  .price { font-variant-numeric: tabular-nums; font-weight: 600; }
  .warning { background: rgba(255,152,0,.12); color: var(--amber); padding: .6rem 1.2rem; font-size: .85rem; border-bottom: 1px solid var(--border); }
  .empty { color: var(--muted); text-align: center; padding: 2rem; font-size: .9rem; }
  .muted { color: var(--muted); font-size: .8rem; }
  .refresh-btn { background: none; border: 1px solid var(--border); color: var(--muted); padding: .3rem .8rem; border-radius: 6px; cursor: pointer; font-size: .8rem; }
  .refresh-btn:hover { border-color: var(--accent); color: var(--accent); }
  .stats-grid { display: grid; grid-template-columns: repeat(auto-fill, minmax(160px, 1fr)); gap: 1rem; padding: 1.2rem; }
  .stat-card { background: #151823; border: 1px solid var(--border); border-radius: 10px; padding: 1rem; }
  .stat-card .label { color: var(--muted); font-size: .75rem; text-transform: uppercase; letter-spacing: .06em; margin-bottom: .35rem; }
  .stat-card .value { font-size: 1.4rem; font-weight: 700; }
  .pill { display: inline-block; padding: .15rem .55rem; border-radius: 20px; font-size: .75rem; font-weight: 600; }
  .pill.win { background: rgba(0,200,150,.15); color: var(--green); }
  .pill.draw { background: rgba(136,136,170,.2); color: var(--muted); }
  .pill.loss { background: rgba(255,79,106,.15); color: var(--red); }
  .odds-tables { display: grid; grid-template-columns: 1fr 1fr; gap: 1.2rem; }
  @media (max-width: 768px) { .odds-tables { grid-template-columns: 1fr; } }
</style>
</head>
<body>
<header>
  <h1>⚽ Fixtures &amp; Odds</h1>
  <span class="badge" id="competition-badge">…</span>
  <span class="muted" id="quota"></span>
  <span style="margin-left:auto;" class="muted" id="last-updated"></span>
</header>

<main>
  <div class="panel">
    <div class="panel-header">Next Round <button class="refresh-btn" onclick="loadFixtures()">↻ Refresh</button></div>
    <div class="warning" id="fixtures-warning" style="display:none;"></div>
    <table>
      <thead><tr><th>Kickoff</th><th>Matchday</th><th>Home</th><th>Away</th></tr></thead>
      <tbody id="fixtures-tbody"><tr><td colspan="4" class="empty">Loading…</td></tr></tbody>
    </table>
  </div>

  <div class="panel" id="team-panel" style="display:none;">
    <div class="panel-header"><span id="team-title">Team</span></div>
    <div class="stats-grid" id="team-stats"></div>
    <table>
      <thead><tr><th>Date</th><th>Match</th><th>Score</th><th>Result</th><th>Opp. Pts Before</th></tr></thead>
      <tbody id="team-matches-tbody"></tbody>
    </table>
  </div>
</main>

<script>
const priceFmt = v => v != null ? v.toFixed(2) : '–';
const resultPill = r => `<span class="pill ${r.toLowerCase()}">${r}</span>`;
let openOddsRow = null;

async function loadFixtures() {
  const r = await fetch('/api/fixtures');
  if (!r.ok) return;
  const data = await r.json();
  const warnEl = document.getElementById('fixtures-warning');
  if (data.warning) { warnEl.textContent = data.warning; warnEl.style.display = ''; }
  else { warnEl.style.display = 'none'; }

  const tbody = document.getElementById('fixtures-tbody');
  if (!data.fixtures.length) {
    tbody.innerHTML = '<tr><td colspan="4" class="empty">No upcoming fixtures</td></tr>';
    return;
  }
  tbody.innerHTML = data.fixtures.map(f => {
    const home = f.home_team
      ? `<span class="team-link" onclick="event.stopPropagation(); loadTeam(${f.home_team_id}, '${(f.home_team || '').replace(/'/g, "\\'")}')">${f.home_team}</span>`
      : 'TBD';
    const away = f.away_team
      ? `<span class="team-link" onclick="event.stopPropagation(); loadTeam(${f.away_team_id}, '${(f.away_team || '').replace(/'/g, "\\'")}')">${f.away_team}</span>`
      : 'TBD';
    const attrs = f.home_team && f.away_team
      ? `class="fixture-row" onclick="toggleOdds(this, '${encodeURIComponent(f.home_team)}', '${encodeURIComponent(f.away_team)}')"`
      : '';
    return `<tr ${attrs}>
      <td>${f.kickoff_local}</td>
      <td>${f.matchday ?? '–'}</td>
      <td>${home}</td>
      <td>${away}</td>
    </tr>`;
  }).join('');
  document.getElementById('last-updated').textContent = 'Updated ' + new Date().toLocaleTimeString();
}

async function toggleOdds(row, home, away) {
  if (openOddsRow) {
    const wasThis = openOddsRow.previousElementSibling === row;
    openOddsRow.remove();
    openOddsRow = null;
    if (wasThis) return;
  }
  const oddsRow = document.createElement('tr');
  oddsRow.className = 'odds-row';
  oddsRow.innerHTML = '<td colspan="4" class="empty">Loading odds…</td>';
  row.after(oddsRow);
  openOddsRow = oddsRow;

  const r = await fetch(`/api/odds?home=${home}&away=${away}`);
  if (!r.ok) { oddsRow.innerHTML = '<td colspan="4" class="empty">Odds request failed</td>'; return; }
  const data = await r.json();
  if (data.quota && data.quota.requests_remaining != null) {
    document.getElementById('quota').textContent = `Odds quota: ${data.quota.requests_remaining} left`;
  }

  const parts = [];
  if (data.warning) parts.push(`<div class="warning">${data.warning}</div>`);
  if (data.moneyline) {
    const m = data.moneyline;
    parts.push(`<table>
      <thead><tr><th>1</th><th>X</th><th>2</th><th>Books</th></tr></thead>
      <tbody><tr>
        <td class="price">${priceFmt(m.home_price)}</td>
        <td class="price">${priceFmt(m.draw_price)}</td>
        <td class="price">${priceFmt(m.away_price)}</td>
        <td>${m.bookmaker_count}</td>
      </tr></tbody>
    </table>`);
  } else {
    parts.push('<div class="empty">No moneyline odds for this fixture</div>');
  }
  if (data.totals === null) {
    parts.push('<div class="empty">Goal totals unavailable for this sport</div>');
  } else if (data.totals.length) {
    parts.push(`<table>
      <thead><tr><th>Line</th><th>Over</th><th>Under</th><th>Books</th></tr></thead>
      <tbody>${data.totals.map(t => `<tr>
        <td>${t.line}</td>
        <td class="price">${priceFmt(t.over_price)}</td>
        <td class="price">${priceFmt(t.under_price)}</td>
        <td>${t.bookmaker_count}</td>
      </tr>`).join('')}</tbody>
    </table>`);
  } else {
    parts.push('<div class="empty">No goal-total odds for this fixture</div>');
  }
  oddsRow.innerHTML = `<td colspan="4"><div class="odds-tables">${parts.join('')}</div></td>`;
}

async function loadTeam(teamId, teamName) {
  if (teamId == null) return;
  const r = await fetch(`/api/team/${teamId}`);
  if (!r.ok) return;
  const t = await r.json();
  document.getElementById('team-panel').style.display = '';
  document.getElementById('team-title').textContent = teamName;

  const avg = v => v != null ? v.toFixed(2) : '–';
  document.getElementById('team-stats').innerHTML = `
    <div class="stat-card"><div class="label">Played</div><div class="value">${t.stats.matches_played}</div></div>
    <div class="stat-card"><div class="label">Points</div><div class="value">${t.stats.points_total}</div></div>
    <div class="stat-card"><div class="label">Goals</div><div class="value">${t.stats.goals_for}:${t.stats.goals_against}</div></div>
    <div class="stat-card"><div class="label">Form</div><div class="value">${t.form ?? '–'}</div></div>
    <div class="stat-card"><div class="label">GF/GA Home</div><div class="value">${avg(t.location.gf_home_avg)} / ${avg(t.location.ga_home_avg)}</div></div>
    <div class="stat-card"><div class="label">GF/GA Away</div><div class="value">${avg(t.location.gf_away_avg)} / ${avg(t.location.ga_away_avg)}</div></div>
    <div class="stat-card"><div class="label">Clean Sheets</div><div class="value">${t.location.clean_total}</div></div>`;

  const tbody = document.getElementById('team-matches-tbody');
  if (!t.matches.length) {
    tbody.innerHTML = '<tr><td colspan="5" class="empty">No finished matches yet</td></tr>';
  } else {
    tbody.innerHTML = t.matches.map(m => `<tr>
      <td>${new Date(m.match_utc_datetime).toLocaleDateString()}</td>
      <td>${m.home_team_name} x ${m.away_team_name}</td>
      <td>${m.ft_home_goals}–${m.ft_away_goals}</td>
      <td>${resultPill(m.result)}</td>
      <td>${m.opponent_points_before ?? '–'}</td>
    </tr>`).join('');
  }
  document.getElementById('team-panel').scrollIntoView({ behavior: 'smooth' });
}

document.getElementById('competition-badge').textContent = document.body.dataset.competition || '…';
loadFixtures();
setInterval(loadFixtures, 60000);
</script>
</body>
</html>"#;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn fixture(home: &str, away: &str) -> Fixture {
        Fixture {
            matchday: Some(1),
            kickoff_utc: Utc.with_ymd_and_hms(2025, 9, 16, 19, 0, 0).unwrap(),
            kickoff_local: "16/09 16:00".into(),
            stage: None,
            home_team_id: Some(1),
            home_team: Some(home.to_string()),
            away_team_id: Some(2),
            away_team: Some(away.to_string()),
        }
    }

    #[test]
    fn test_find_fixture_normalizes_both_sides() {
        let fixtures = vec![fixture("FC Porto", "AFC Ajax"), fixture("Inter", "LOSC Lille")];
        let found = find_fixture(&fixtures, "Porto", "AFC AJAX").unwrap();
        assert_eq!(found.home_team.as_deref(), Some("FC Porto"));
    }

    #[test]
    fn test_find_fixture_rejects_swapped_order() {
        let fixtures = vec![fixture("FC Porto", "AFC Ajax")];
        assert!(find_fixture(&fixtures, "Ajax", "Porto").is_none());
        assert!(find_fixture(&fixtures, "Porto", "Inter").is_none());
    }
}
