//! Time arguments: RFC3339 timestamps and Grafana-style relative times.

use chrono::{DateTime, Duration, Utc};
use mcp_grafana_upstream::{GrafanaError, Result};

/// Parse `now`, `now-<n><unit>` (units `s m h d w M y`, integer `n`) or an RFC3339 timestamp.
///
/// A month is 30 days and a year 365 days.
pub(crate) fn parse_time(field: &str, raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(GrafanaError::argument(format!("{field} is required")));
    }
    if raw == "now" {
        return Ok(now);
    }
    if let Some(offset) = raw.strip_prefix("now-") {
        return parse_offset(offset)
            .map(|d| now - d)
            .ok_or_else(|| GrafanaError::argument(format!("{field}: invalid relative time '{raw}'")));
    }
    parse_rfc3339(field, raw)
}

pub(crate) fn parse_rfc3339(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| GrafanaError::argument(format!("{field}: invalid RFC3339 time '{raw}': {e}")))
}

/// Parse an optional RFC3339 argument, substituting `default` when empty.
pub(crate) fn rfc3339_or(
    field: &str,
    raw: Option<&str>,
    default: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => parse_rfc3339(field, raw),
        None => Ok(default),
    }
}

fn parse_offset(offset: &str) -> Option<Duration> {
    let unit = offset.chars().last()?;
    let amount: i64 = offset[..offset.len() - unit.len_utf8()].parse().ok()?;
    if amount < 0 {
        return None;
    }
    match unit {
        's' => Some(Duration::seconds(amount)),
        'm' => Some(Duration::minutes(amount)),
        'h' => Some(Duration::hours(amount)),
        'd' => Some(Duration::days(amount)),
        'w' => Some(Duration::weeks(amount)),
        'M' => Some(Duration::days(amount.checked_mul(30)?)),
        'y' => Some(Duration::days(amount.checked_mul(365)?)),
        _ => None,
    }
}
