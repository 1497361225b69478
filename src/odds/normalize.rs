//! Team-name canonicalization.
//!
//! Fixtures (football-data.org) and odds (the-odds-api.com) spell the same
//! club differently ("FC Porto" vs "Porto", "Atlético Madrid" vs "Atletico
//! Madrid"). Both sides are reduced to the same key before joining.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Generic name tokens that carry no club identity
const NOISE_TOKENS: &[&str] = &["fc", "cf", "ac", "club", "the"];

/// Canonical join key for a team name.
///
/// NFKD-decompose and drop combining marks, lowercase, split on
/// non-alphanumeric runs, drop noise tokens, join with single spaces.
/// Pure and total: `None` and empty input yield `""`.
///
/// Two distinct clubs that normalize to the same key will silently share a
/// join key; accepted limitation.
pub fn normalize_team_name(name: Option<&str>) -> String {
    let name = match name {
        Some(n) if !n.is_empty() => n,
        _ => return String::new(),
    };

    let stripped: String = name.nfkd().filter(|c| !is_combining_mark(*c)).collect();

    stripped
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty() && !NOISE_TOKENS.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}
