//! Odds-to-fixture reconciliation and aggregation.
//!
//! Quotes are joined to a fixture on the exact normalized (home, away) key
//! pair; the swapped order is computed only by the diagnostic helpers and
//! never feeds the summaries. Per-bookmaker prices collapse to medians.
//!
//! Every function here is pure over borrowed inputs, and an empty
//! intermediate result short-circuits to an empty output: missing odds
//! coverage is a normal outcome, not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::db::models::Fixture;
use crate::odds::client::OddsQuote;
use crate::odds::normalize::normalize_team_name;

pub const MONEYLINE_MARKET: &str = "h2h";
pub const TOTALS_MARKET: &str = "totals";

const DRAW_SYNONYMS: &[&str] = &["draw", "empate"];

/// Median prices per moneyline outcome for one fixture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoneylineSummary {
    pub matchday: Option<u32>,
    pub stage: Option<String>,
    pub kickoff_local: String,
    /// "Home Team x Away Team", fixture-side names
    pub fixture_label: String,
    pub home_price: Option<f64>,
    pub draw_price: Option<f64>,
    pub away_price: Option<f64>,
    pub bookmaker_count: usize,
    pub last_update: Option<DateTime<Utc>>,
}

/// Median Over/Under prices for one goal line of one fixture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalsLine {
    pub line: f64,
    pub over_price: Option<f64>,
    pub under_price: Option<f64>,
    pub bookmaker_count: usize,
    pub last_update: Option<DateTime<Utc>>,
}

/// Per-event digest of the raw odds feed, for the debug view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsEventOverview {
    pub event_id: String,
    pub commence_time: Option<DateTime<Utc>>,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub markets: Vec<String>,
    pub bookmaker_count: usize,
    pub home_key: String,
    pub away_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum OutcomeLabel {
    Home,
    Draw,
    Away,
}

/// Quotes for `market` whose normalized team pair equals the fixture's pair,
/// in order. No swapped-side matching here; that is diagnostic-only.
fn matching_quotes<'a>(
    fixture: &Fixture,
    quotes: &'a [OddsQuote],
    market: &str,
) -> Vec<&'a OddsQuote> {
    let home_key = normalize_team_name(fixture.home_team.as_deref());
    let away_key = normalize_team_name(fixture.away_team.as_deref());
    if home_key.is_empty() || away_key.is_empty() {
        return vec![];
    }
    quotes
        .iter()
        .filter(|q| q.market_key == market)
        .filter(|q| {
            normalize_team_name(q.home_team.as_deref()) == home_key
                && normalize_team_name(q.away_team.as_deref()) == away_key
        })
        .collect()
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

fn map_outcome(outcome_name: &str, home_key: &str, away_key: &str) -> Option<OutcomeLabel> {
    let key = normalize_team_name(Some(outcome_name));
    if key == home_key {
        Some(OutcomeLabel::Home)
    } else if key == away_key {
        Some(OutcomeLabel::Away)
    } else if DRAW_SYNONYMS.contains(&key.as_str()) {
        Some(OutcomeLabel::Draw)
    } else {
        None
    }
}

/// Median moneyline prices for the fixture, or `None` when no bookmaker
/// covers it.
pub fn moneyline_summary(fixture: &Fixture, quotes: &[OddsQuote]) -> Option<MoneylineSummary> {
    let matched = matching_quotes(fixture, quotes, MONEYLINE_MARKET);
    if matched.is_empty() {
        return None;
    }

    let home_key = normalize_team_name(fixture.home_team.as_deref());
    let away_key = normalize_team_name(fixture.away_team.as_deref());

    // Quotes whose outcome maps to neither side nor a draw synonym are
    // dropped before any aggregate is computed
    let mapped: Vec<(OutcomeLabel, &OddsQuote)> = matched
        .into_iter()
        .filter_map(|q| map_outcome(&q.outcome_name, &home_key, &away_key).map(|l| (l, q)))
        .collect();
    if mapped.is_empty() {
        return None;
    }

    let mut prices: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    let mut bookmakers: HashSet<&str> = HashSet::new();
    let mut last_update: Option<DateTime<Utc>> = None;
    for (label, quote) in &mapped {
        let slot = match label {
            OutcomeLabel::Home => "home",
            OutcomeLabel::Draw => "draw",
            OutcomeLabel::Away => "away",
        };
        if let Some(price) = quote.outcome_price {
            prices.entry(slot).or_default().push(price);
        }
        bookmakers.insert(quote.bookmaker_key.as_str());
        last_update = last_update.max(quote.bookmaker_last_update);
    }

    let fixture_label = format!(
        "{} x {}",
        fixture.home_team.as_deref().unwrap_or("?"),
        fixture.away_team.as_deref().unwrap_or("?")
    );
    Some(MoneylineSummary {
        matchday: fixture.matchday,
        stage: fixture.stage.clone(),
        kickoff_local: fixture.kickoff_local.clone(),
        fixture_label,
        home_price: prices.remove("home").and_then(median),
        draw_price: prices.remove("draw").and_then(median),
        away_price: prices.remove("away").and_then(median),
        bookmaker_count: bookmakers.len(),
        last_update,
    })
}

/// Median Over/Under prices per goal line, sorted by line ascending.
/// Empty when the totals market has no coverage for the fixture.
pub fn totals_table(fixture: &Fixture, quotes: &[OddsQuote]) -> Vec<TotalsLine> {
    let matched = matching_quotes(fixture, quotes, TOTALS_MARKET);
    if matched.is_empty() {
        return vec![];
    }

    #[derive(Default)]
    struct LineAgg {
        line: f64,
        over: Vec<f64>,
        under: Vec<f64>,
        bookmakers: HashSet<String>,
        last_update: Option<DateTime<Utc>>,
    }

    // Goal lines are quarter-goal increments; keying by centi-goals keeps
    // f64 lines out of the map key while preserving ascending order
    let mut lines: BTreeMap<i64, LineAgg> = BTreeMap::new();
    for quote in matched {
        let line = match quote.outcome_point {
            Some(p) => p,
            None => continue,
        };
        let agg = lines.entry((line * 100.0).round() as i64).or_default();
        agg.line = line;
        match quote.outcome_name.to_lowercase().as_str() {
            "over" => agg.over.extend(quote.outcome_price),
            "under" => agg.under.extend(quote.outcome_price),
            _ => continue,
        }
        agg.bookmakers.insert(quote.bookmaker_key.clone());
        agg.last_update = agg.last_update.max(quote.bookmaker_last_update);
    }

    lines
        .into_values()
        .map(|agg| TotalsLine {
            line: agg.line,
            over_price: median(agg.over),
            under_price: median(agg.under),
            bookmaker_count: agg.bookmakers.len(),
            last_update: agg.last_update,
        })
        .collect()
}

/// Digest the raw quote stream into one row per odds event
pub fn odds_overview(quotes: &[OddsQuote]) -> Vec<OddsEventOverview> {
    struct EventAgg<'a> {
        commence_time: Option<DateTime<Utc>>,
        home_team: Option<&'a str>,
        away_team: Option<&'a str>,
        markets: BTreeSet<&'a str>,
        bookmakers: HashSet<&'a str>,
    }

    let mut events: BTreeMap<&str, EventAgg> = BTreeMap::new();
    for quote in quotes {
        let agg = events.entry(quote.event_id.as_str()).or_insert(EventAgg {
            commence_time: None,
            home_team: quote.home_team.as_deref(),
            away_team: quote.away_team.as_deref(),
            markets: BTreeSet::new(),
            bookmakers: HashSet::new(),
        });
        agg.commence_time = agg.commence_time.max(quote.commence_time);
        agg.markets.insert(quote.market_key.as_str());
        agg.bookmakers.insert(quote.bookmaker_key.as_str());
    }

    events
        .into_iter()
        .map(|(event_id, agg)| OddsEventOverview {
            event_id: event_id.to_string(),
            commence_time: agg.commence_time,
            home_team: agg.home_team.map(str::to_string),
            away_team: agg.away_team.map(str::to_string),
            markets: agg.markets.iter().map(|m| m.to_string()).collect(),
            bookmaker_count: agg.bookmakers.len(),
            home_key: normalize_team_name(agg.home_team),
            away_key: normalize_team_name(agg.away_team),
        })
        .collect()
}

/// Overview rows whose key pair equals the fixture's, in order
pub fn exact_matches<'a>(
    fixture: &Fixture,
    overview: &'a [OddsEventOverview],
) -> Vec<&'a OddsEventOverview> {
    let home_key = normalize_team_name(fixture.home_team.as_deref());
    let away_key = normalize_team_name(fixture.away_team.as_deref());
    overview
        .iter()
        .filter(|o| o.home_key == home_key && o.away_key == away_key)
        .collect()
}

/// Overview rows that match the fixture only with home/away reversed.
/// Diagnostic: these are excluded from the production join and usually
/// indicate a data-source inconsistency worth inspecting.
pub fn swapped_matches<'a>(
    fixture: &Fixture,
    overview: &'a [OddsEventOverview],
) -> Vec<&'a OddsEventOverview> {
    let home_key = normalize_team_name(fixture.home_team.as_deref());
    let away_key = normalize_team_name(fixture.away_team.as_deref());
    overview
        .iter()
        .filter(|o| o.home_key == away_key && o.away_key == home_key)
        .collect()
}
