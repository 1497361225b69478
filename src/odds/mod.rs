pub mod client;
pub mod normalize;
pub mod reconcile;

pub use client::{OddsApiClient, OddsApiError, OddsApiMeta, OddsQuote, OddsSnapshot};
pub use normalize::normalize_team_name;
pub use reconcile::{
    exact_matches, moneyline_summary, odds_overview, swapped_matches, totals_table,
    MoneylineSummary, OddsEventOverview, TotalsLine,
};
