//! Client for the-odds-api.com v4.
//!
//! Auth is a query-string `apiKey`; the API reports quota usage through
//! `x-requests-*` response headers which are surfaced to the operator.

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_SECS: u64 = 2;

#[derive(Debug, Error)]
pub enum OddsApiError {
    #[error("ODDS_API_KEY is not configured; set the env var or --odds-api-key")]
    MissingApiKey,
    #[error("odds API error {status}: {detail}")]
    Http { status: u16, detail: String },
    #[error("unexpected odds API payload (expected a list): {0}")]
    UnexpectedPayload(String),
    #[error("odds API network error: {0}")]
    Network(String),
}

/// Quota counters from the odds API response headers
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OddsApiMeta {
    pub requests_remaining: Option<i64>,
    pub requests_used: Option<i64>,
    pub requests_last: Option<i64>,
}

/// One flattened price quote: (event, bookmaker, market, outcome)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsQuote {
    pub event_id: String,
    pub sport_key: Option<String>,
    pub commence_time: Option<DateTime<Utc>>,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub bookmaker_key: String,
    pub bookmaker_title: Option<String>,
    pub bookmaker_last_update: Option<DateTime<Utc>>,
    pub market_key: String,
    pub outcome_name: String,
    pub outcome_price: Option<f64>,
    /// Goal line; only present for totals-style markets
    pub outcome_point: Option<f64>,
}

/// A successful odds fetch, including which markets actually came back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsSnapshot {
    pub quotes: Vec<OddsQuote>,
    pub meta: OddsApiMeta,
    pub used_markets: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct OddsApiClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    sport_key: String,
    regions: String,
}

impl OddsApiClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        sport_key: &str,
        regions: &str,
    ) -> Result<Self, OddsApiError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| OddsApiError::Network(e.to_string()))?;
        Ok(OddsApiClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            sport_key: sport_key.to_string(),
            regions: regions.to_string(),
        })
    }

    /// Current odds for the configured sport, flattened into quotes.
    ///
    /// 429/5xx and transport errors are retried up to [`MAX_RETRIES`] times
    /// with linear backoff plus jitter; other HTTP failures map to
    /// [`OddsApiError::Http`] with the server's detail message.
    pub async fn fetch_odds(
        &self,
        markets: &[&str],
    ) -> Result<(Vec<OddsQuote>, OddsApiMeta), OddsApiError> {
        let api_key = self.api_key.as_deref().ok_or(OddsApiError::MissingApiKey)?;

        let url = Url::parse_with_params(
            &format!("{}/sports/{}/odds/", self.base_url, self.sport_key),
            [
                ("regions", self.regions.as_str()),
                ("markets", &markets.join(",")),
                ("oddsFormat", "decimal"),
                ("dateFormat", "iso"),
                ("apiKey", api_key),
            ],
        )
        .map_err(|e| OddsApiError::Network(e.to_string()))?;

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let resp = match self.http.get(url.clone()).send().await {
                Ok(r) => r,
                Err(e) => {
                    if attempts <= MAX_RETRIES {
                        self.backoff(attempts).await;
                        continue;
                    }
                    return Err(OddsApiError::Network(e.to_string()));
                }
            };

            let status = resp.status();
            if !status.is_success() {
                if retryable(status.as_u16()) && attempts <= MAX_RETRIES {
                    warn!("Odds API {} on attempt {}, retrying", status, attempts);
                    self.backoff(attempts).await;
                    continue;
                }
                let detail = error_detail(resp).await;
                return Err(OddsApiError::Http {
                    status: status.as_u16(),
                    detail,
                });
            }

            let meta = build_meta(resp.headers());
            let payload: Value = resp
                .json()
                .await
                .map_err(|e| OddsApiError::Network(e.to_string()))?;
            let events = payload
                .as_array()
                .ok_or_else(|| OddsApiError::UnexpectedPayload(truncate(&payload.to_string())))?;

            let quotes = flatten_events(events);
            debug!(
                "Odds fetch: {} events, {} quotes, remaining={:?}",
                events.len(),
                quotes.len(),
                meta.requests_remaining
            );
            return Ok((quotes, meta));
        }
    }

    /// Fetch with the documented market-availability fallback: a 422 on a
    /// multi-market request is retried once with the moneyline market only.
    /// Every other failure propagates.
    pub async fn fetch_odds_with_fallback(
        &self,
        markets: &[&str],
    ) -> Result<OddsSnapshot, OddsApiError> {
        match self.fetch_odds(markets).await {
            Ok((quotes, meta)) => Ok(snapshot(quotes, meta, markets)),
            Err(err) => match fallback_markets(&err, markets) {
                Some(fallback) => {
                    warn!(
                        "Odds API rejected markets {:?} (422); retrying with {:?}",
                        markets, fallback
                    );
                    let refs: Vec<&str> = fallback.iter().map(String::as_str).collect();
                    let (quotes, meta) = self.fetch_odds(&refs).await?;
                    Ok(snapshot(quotes, meta, &refs))
                }
                None => Err(err),
            },
        }
    }

    async fn backoff(&self, attempt: u32) {
        let jitter_ms = rand::thread_rng().gen_range(0..250);
        let delay = std::time::Duration::from_secs(RETRY_DELAY_SECS * attempt as u64)
            + std::time::Duration::from_millis(jitter_ms);
        tokio::time::sleep(delay).await;
    }
}

fn snapshot(quotes: Vec<OddsQuote>, meta: OddsApiMeta, markets: &[&str]) -> OddsSnapshot {
    OddsSnapshot {
        quotes,
        meta,
        used_markets: markets.iter().map(|m| m.to_string()).collect(),
        fetched_at: Utc::now(),
    }
}

/// The single fallback the odds provider documents: an unprocessable
/// multi-market request may be retried as moneyline-only
fn fallback_markets(err: &OddsApiError, requested: &[&str]) -> Option<Vec<String>> {
    match err {
        OddsApiError::Http { status: 422, .. } if requested.len() > 1 => {
            Some(vec!["h2h".to_string()])
        }
        _ => None,
    }
}

fn retryable(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

async fn error_detail(resp: reqwest::Response) -> String {
    let body = resp.text().await.unwrap_or_default();
    if let Ok(value) = serde_json::from_str::<Value>(&body) {
        if let Some(msg) = value["message"].as_str().or_else(|| value["error"].as_str()) {
            return msg.to_string();
        }
    }
    truncate(&body)
}

fn truncate(s: &str) -> String {
    const MAX: usize = 300;
    if s.len() <= MAX {
        s.to_string()
    } else {
        let mut end = MAX;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

fn build_meta(headers: &HeaderMap) -> OddsApiMeta {
    let safe_int = |name: &str| -> Option<i64> {
        headers
            .get(name)?
            .to_str()
            .ok()?
            .trim()
            .parse::<i64>()
            .ok()
    };
    OddsApiMeta {
        requests_remaining: safe_int("x-requests-remaining"),
        requests_used: safe_int("x-requests-used"),
        requests_last: safe_int("x-requests-last"),
    }
}

/// Flatten event → bookmaker → market → outcome into one quote per price
fn flatten_events(events: &[Value]) -> Vec<OddsQuote> {
    let mut quotes = Vec::new();
    for event in events {
        let event_id = match event["id"].as_str() {
            Some(id) => id.to_string(),
            None => continue,
        };
        let sport_key = event["sport_key"].as_str().map(str::to_string);
        let commence_time = parse_ts(&event["commence_time"]);
        let home_team = event["home_team"].as_str().map(str::to_string);
        let away_team = event["away_team"].as_str().map(str::to_string);

        for bookmaker in event["bookmakers"].as_array().into_iter().flatten() {
            let bookmaker_key = match bookmaker["key"].as_str() {
                Some(k) => k.to_string(),
                None => continue,
            };
            let bookmaker_title = bookmaker["title"].as_str().map(str::to_string);
            let bookmaker_last_update = parse_ts(&bookmaker["last_update"]);

            for market in bookmaker["markets"].as_array().into_iter().flatten() {
                let market_key = match market["key"].as_str() {
                    Some(k) => k.to_string(),
                    None => continue,
                };
                for outcome in market["outcomes"].as_array().into_iter().flatten() {
                    let outcome_name = match outcome["name"].as_str() {
                        Some(n) => n.to_string(),
                        None => continue,
                    };
                    quotes.push(OddsQuote {
                        event_id: event_id.clone(),
                        sport_key: sport_key.clone(),
                        commence_time,
                        home_team: home_team.clone(),
                        away_team: away_team.clone(),
                        bookmaker_key: bookmaker_key.clone(),
                        bookmaker_title: bookmaker_title.clone(),
                        bookmaker_last_update,
                        market_key: market_key.clone(),
                        outcome_name,
                        outcome_price: outcome["price"].as_f64(),
                        outcome_point: outcome["point"].as_f64(),
                    });
                }
            }
        }
    }
    quotes
}

fn parse_ts(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_flatten_events_one_quote_per_outcome() {
        let payload = serde_json::json!([{
            "id": "abc123",
            "sport_key": "soccer_uefa_champions_league",
            "commence_time": "2025-09-16T19:00:00Z",
            "home_team": "FC Porto",
            "away_team": "Ajax",
            "bookmakers": [{
                "key": "pinnacle",
                "title": "Pinnacle",
                "last_update": "2025-09-16T12:00:00Z",
                "markets": [
                    {
                        "key": "h2h",
                        "outcomes": [
                            { "name": "FC Porto", "price": 1.90 },
                            { "name": "Draw", "price": 3.40 },
                            { "name": "Ajax", "price": 4.10 }
                        ]
                    },
                    {
                        "key": "totals",
                        "outcomes": [
                            { "name": "Over", "price": 1.85, "point": 2.5 },
                            { "name": "Under", "price": 1.95, "point": 2.5 }
                        ]
                    }
                ]
            }]
        }]);
        let quotes = flatten_events(payload.as_array().unwrap());
        assert_eq!(quotes.len(), 5);
        assert!(quotes.iter().all(|q| q.event_id == "abc123"));
        assert_eq!(quotes.iter().filter(|q| q.market_key == "h2h").count(), 3);
        let over = quotes
            .iter()
            .find(|q| q.outcome_name == "Over")
            .unwrap();
        assert_eq!(over.outcome_point, Some(2.5));
        assert_eq!(over.outcome_price, Some(1.85));
    }

    #[test]
    fn test_flatten_skips_events_without_id() {
        let payload = serde_json::json!([{ "home_team": "Porto", "bookmakers": [] }]);
        assert!(flatten_events(payload.as_array().unwrap()).is_empty());
    }

    #[test]
    fn test_build_meta_parses_quota_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-requests-remaining", HeaderValue::from_static("493"));
        headers.insert("x-requests-used", HeaderValue::from_static("7"));
        headers.insert("x-requests-last", HeaderValue::from_static("1"));
        let meta = build_meta(&headers);
        assert_eq!(meta.requests_remaining, Some(493));
        assert_eq!(meta.requests_used, Some(7));
        assert_eq!(meta.requests_last, Some(1));
    }

    #[test]
    fn test_build_meta_tolerates_missing_or_garbage_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-requests-remaining", HeaderValue::from_static("not-a-number"));
        let meta = build_meta(&headers);
        assert_eq!(meta.requests_remaining, None);
        assert_eq!(meta.requests_used, None);
    }

    #[test]
    fn test_fallback_only_for_422_on_multi_market() {
        let unprocessable = OddsApiError::Http {
            status: 422,
            detail: "markets not supported".into(),
        };
        assert_eq!(
            fallback_markets(&unprocessable, &["h2h", "totals"]),
            Some(vec!["h2h".to_string()])
        );
        // Single-market 422 is a hard failure
        assert_eq!(fallback_markets(&unprocessable, &["totals"]), None);
        // Other statuses propagate
        let not_found = OddsApiError::Http {
            status: 404,
            detail: "unknown sport".into(),
        };
        assert_eq!(fallback_markets(&not_found, &["h2h", "totals"]), None);
        assert_eq!(
            fallback_markets(&OddsApiError::MissingApiKey, &["h2h", "totals"]),
            None
        );
    }

    #[test]
    fn test_missing_api_key_fails_before_any_request() {
        let client = OddsApiClient::new(
            "https://api.the-odds-api.com/v4",
            None,
            "soccer_uefa_champions_league",
            "eu",
        )
        .unwrap();
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let err = rt.block_on(client.fetch_odds(&["h2h"])).unwrap_err();
        assert!(matches!(err, OddsApiError::MissingApiKey));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(retryable(429));
        assert!(retryable(503));
        assert!(!retryable(404));
        assert!(!retryable(422));
    }
}
