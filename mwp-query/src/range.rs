//! Range tokens and the query windows they resolve to.
//!
//! A range token is the string a client sends to pick the reporting window.
//! Tokens are classified in a fixed order:
//! 1. the live keyword (`live`, or the legacy `now`), case-insensitive
//! 2. a four digit year between 1900 and 2200
//! 3. a month name (`June`, `jun`), resolved against the current year
//! 4. a pre-formed absolute window, recognized by containing a `:`
//! 5. a relative Flux duration such as `24h`, `7d` or `-1h30m`
//!
//! Pre-formed windows are passed to the backend verbatim, e.g.
//! `start: 2024-05-01T00:00:00Z, stop: 2024-05-02T00:00:00Z`. They are the
//! only tokens callers may send that contain a colon; duration notation never
//! does.

use crate::error::InvalidRangeError;
use chrono::{DateTime, Datelike, Month, NaiveDate, SecondsFormat, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Keywords that request a live session.
pub const LIVE_KEYWORDS: [&str; 2] = ["live", "now"];

/// Window queried on every live tick.
pub const LIVE_HORIZON: &str = "-1m";

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2200;

lazy_static! {
    static ref FLUX_DURATION: Regex =
        Regex::new(r"^-?([0-9]+(ns|us|µs|ms|s|m|h|d|w|mo|y))+$").expect("valid duration regex");
}

/// The time range an aggregation query is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryWindow {
    /// Trailing window ending now, as a negative Flux duration (`-24h`).
    Relative(String),
    /// Window with explicit bounds.
    Absolute(AbsoluteWindow),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbsoluteWindow {
    /// Half-open `[start, stop)` interval.
    Bounded {
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    },
    /// Caller supplied `range()` arguments, used as-is.
    Preformed(String),
}

impl QueryWindow {
    /// The trailing window used by live sessions.
    pub fn live() -> Self {
        QueryWindow::Relative(LIVE_HORIZON.to_string())
    }

    pub fn bounded(start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        QueryWindow::Absolute(AbsoluteWindow::Bounded { start, stop })
    }

    /// Renders the arguments of a Flux `range()` call.
    pub fn flux_range(&self) -> String {
        match self {
            QueryWindow::Relative(duration) => format!("start: {}", duration),
            QueryWindow::Absolute(AbsoluteWindow::Bounded { start, stop }) => format!(
                "start: {}, stop: {}",
                start.to_rfc3339_opts(SecondsFormat::Secs, true),
                stop.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            QueryWindow::Absolute(AbsoluteWindow::Preformed(expr)) => expr.clone(),
        }
    }
}

impl Display for QueryWindow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.flux_range())
    }
}

/// A validated range token.
///
/// Month tokens stay symbolic until [`RangeToken::resolve`] so a remembered
/// steady range follows the calendar across a year boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeToken {
    Live,
    Year(i32),
    Month(Month),
    Preformed(String),
    /// Duration as sent by the client, without the leading minus.
    Duration(String),
}

impl RangeToken {
    pub fn parse(raw: &str) -> Result<Self, InvalidRangeError> {
        let token = raw.trim();
        if token.is_empty() {
            return Err(InvalidRangeError::Empty);
        }

        if LIVE_KEYWORDS.iter().any(|k| token.eq_ignore_ascii_case(k)) {
            return Ok(RangeToken::Live);
        }

        if let Some(year) = parse_year(token) {
            return Ok(RangeToken::Year(year));
        }

        if let Ok(month) = Month::from_str(token) {
            return Ok(RangeToken::Month(month));
        }

        if token.contains(':') {
            return Ok(RangeToken::Preformed(token.to_string()));
        }

        if FLUX_DURATION.is_match(token) {
            let duration = token.strip_prefix('-').unwrap_or(token);
            return Ok(RangeToken::Duration(duration.to_string()));
        }

        Err(InvalidRangeError::Unrecognized(token.to_string()))
    }

    pub fn is_live(&self) -> bool {
        matches!(self, RangeToken::Live)
    }

    /// Resolves the token into a concrete window relative to `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<QueryWindow, InvalidRangeError> {
        match self {
            RangeToken::Live => Ok(QueryWindow::live()),
            RangeToken::Year(year) => {
                let start = utc_midnight(*year, 1).ok_or_else(|| self.unresolvable())?;
                let stop = utc_midnight(year + 1, 1).ok_or_else(|| self.unresolvable())?;
                Ok(QueryWindow::bounded(start, stop))
            }
            RangeToken::Month(month) => {
                let year = now.year();
                let number = month.number_from_month();
                let (next_year, next_month) = if number == 12 {
                    (year + 1, 1)
                } else {
                    (year, number + 1)
                };
                let start = utc_midnight(year, number).ok_or_else(|| self.unresolvable())?;
                let stop =
                    utc_midnight(next_year, next_month).ok_or_else(|| self.unresolvable())?;
                Ok(QueryWindow::bounded(start, stop))
            }
            RangeToken::Preformed(expr) => {
                Ok(QueryWindow::Absolute(AbsoluteWindow::Preformed(expr.clone())))
            }
            RangeToken::Duration(duration) => Ok(QueryWindow::Relative(format!("-{}", duration))),
        }
    }

    fn unresolvable(&self) -> InvalidRangeError {
        InvalidRangeError::Unrecognized(self.to_string())
    }
}

impl FromStr for RangeToken {
    type Err = InvalidRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RangeToken::parse(s)
    }
}

impl Display for RangeToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RangeToken::Live => f.write_str(LIVE_KEYWORDS[0]),
            RangeToken::Year(year) => write!(f, "{}", year),
            RangeToken::Month(month) => f.write_str(month.name()),
            RangeToken::Preformed(expr) => f.write_str(expr),
            RangeToken::Duration(duration) => f.write_str(duration),
        }
    }
}

/// Parses and resolves a raw token in one step.
pub fn resolve_window(raw: &str, now: DateTime<Utc>) -> Result<QueryWindow, InvalidRangeError> {
    RangeToken::parse(raw)?.resolve(now)
}

fn parse_year(token: &str) -> Option<i32> {
    if token.len() != 4 || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = token.parse().ok()?;
    (MIN_YEAR..=MAX_YEAR).contains(&year).then_some(year)
}

fn utc_midnight(year: i32, month: u32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
