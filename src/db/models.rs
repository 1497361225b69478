use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scheduled match from football-data.org.
///
/// Knockout draws publish fixtures before both slots are filled, so team
/// fields are optional until the pairing is assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fixture {
    pub matchday: Option<u32>,
    pub kickoff_utc: DateTime<Utc>,
    /// Kickoff rendered in the configured local offset, "dd/mm HH:MM"
    pub kickoff_local: String,
    pub stage: Option<String>,
    pub home_team_id: Option<i64>,
    pub home_team: Option<String>,
    pub away_team_id: Option<i64>,
    pub away_team: Option<String>,
}

impl Fixture {
    pub fn has_teams(&self) -> bool {
        self.home_team.is_some() && self.away_team.is_some()
    }
}

/// Aggregate totals for one team in the tracked competition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamStats {
    pub matches_played: i64,
    pub goals_for: i64,
    pub goals_against: i64,
    pub points_total: i64,
}

/// Home/away goal averages and clean-sheet counts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSplits {
    pub gf_home_avg: Option<f64>,
    pub ga_home_avg: Option<f64>,
    pub gf_away_avg: Option<f64>,
    pub ga_away_avg: Option<f64>,
    pub games_home: i64,
    pub games_away: i64,
    pub clean_home: i64,
    pub clean_away: i64,
    pub clean_total: i64,
}

/// One finished match from the team's perspective, with the opponent's
/// pre-match points taken from the rolling-form table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMatchRow {
    pub match_utc_datetime: DateTime<Utc>,
    pub home_team_name: String,
    pub away_team_name: String,
    pub ft_home_goals: i64,
    pub ft_away_goals: i64,
    pub result: String,
    pub opponent_points_before: Option<i64>,
}

/// Goals scored/conceded per matchday, split by venue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalsByMatchday {
    pub matchday: Option<i64>,
    pub location: String,
    pub goals_for: i64,
    pub goals_against: i64,
}

/// A recent finished match in any competition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentMatchRow {
    pub match_utc_datetime: DateTime<Utc>,
    pub competition_name: Option<String>,
    pub home_team_name: String,
    pub away_team_name: String,
    pub ft_home_goals: i64,
    pub ft_away_goals: i64,
    pub result: String,
}

/// Everything the dashboard shows for one team
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamInsights {
    pub stats: TeamStats,
    /// Last-3 results, newest first, e.g. "W - W - L"
    pub form: Option<String>,
    pub location: LocationSplits,
    pub matches: Vec<TeamMatchRow>,
    pub goals_by_matchday: Vec<GoalsByMatchday>,
    pub last_games: Vec<RecentMatchRow>,
}
