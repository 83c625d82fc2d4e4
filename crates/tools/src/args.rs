//! Local argument validation, run before any upstream call.

use mcp_grafana_upstream::{GrafanaError, Result};

pub(crate) fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GrafanaError::argument(format!("{field} is required")));
    }
    Ok(())
}

/// Validate an optional count and apply its default.
pub(crate) fn count_or(field: &str, value: Option<i64>, default: i64) -> Result<i64> {
    match value {
        Some(v) if v < 0 => Err(GrafanaError::argument(format!(
            "{field} must not be negative, got {v}"
        ))),
        Some(0) | None => Ok(default),
        Some(v) => Ok(v),
    }
}

/// Drop empty optional strings so they can be skipped as query parameters.
pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// One page of `items`, with 1-based `page`. Pages past the end are empty.
pub(crate) fn paginate<T>(items: Vec<T>, limit: i64, page: i64) -> Vec<T> {
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    let page = usize::try_from(page.max(1)).unwrap_or(usize::MAX);
    let start = (page - 1).saturating_mul(limit);
    items.into_iter().skip(start).take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_grafana_upstream::ErrorKind;

    #[test]
    fn require_rejects_blank() {
        assert_eq!(
            require("uid", " ").unwrap_err().kind(),
            ErrorKind::Argument
        );
        require("uid", "abc").expect("non-empty");
    }

    #[test]
    fn count_or_rejects_negative_and_defaults_zero() {
        let err = count_or("limit", Some(-1), 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert_eq!(err.to_string(), "limit must not be negative, got -1");
        assert_eq!(count_or("limit", None, 10).expect("default"), 10);
        assert_eq!(count_or("limit", Some(0), 10).expect("default"), 10);
        assert_eq!(count_or("limit", Some(3), 10).expect("value"), 3);
    }

    #[test]
    fn paginate_slices_one_based_pages() {
        let items: Vec<i32> = (1..=25).collect();
        assert_eq!(paginate(items.clone(), 10, 1), (1..=10).collect::<Vec<_>>());
        assert_eq!(paginate(items.clone(), 10, 3), (21..=25).collect::<Vec<_>>());
        assert!(paginate(items, 10, 4).is_empty());
    }
}
