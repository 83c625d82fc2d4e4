//! Label selectors shared by the Prometheus and alerting tools.

use mcp_grafana_upstream::{GrafanaError, Result};
use regex::Regex;
use rmcp::schemars;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct LabelMatcher {
    /// The name of the label to match against
    pub name: String,
    /// The value to match against
    pub value: String,
    /// One of the '=' or '!=' or '=~' or '!~'
    #[serde(rename = "type", default = "default_match_type")]
    pub kind: String,
}

fn default_match_type() -> String {
    "=".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Selector {
    pub filters: Vec<LabelMatcher>,
}

impl LabelMatcher {
    fn matches(&self, labels: &BTreeMap<String, String>) -> Result<bool> {
        // A missing label behaves as an empty value.
        let actual = labels.get(&self.name).map_or("", String::as_str);
        match self.kind.as_str() {
            "" | "=" => Ok(actual == self.value),
            "!=" => Ok(actual != self.value),
            "=~" => Ok(self.anchored()?.is_match(actual)),
            "!~" => Ok(!self.anchored()?.is_match(actual)),
            other => Err(GrafanaError::argument(format!(
                "invalid matcher type '{other}' for label '{}'",
                self.name
            ))),
        }
    }

    fn anchored(&self) -> Result<Regex> {
        Regex::new(&format!("^(?:{})$", self.value)).map_err(|e| {
            GrafanaError::argument(format!("invalid regex for label '{}': {e}", self.name))
        })
    }
}

impl Selector {
    /// True when every filter matches.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> Result<bool> {
        for filter in &self.filters {
            if !filter.matches(labels)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Renders a Prometheus series selector, e.g. `{job="api",env=~"prod.*"}`.
impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, m) in self.filters.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            let op = if m.kind.is_empty() { "=" } else { m.kind.as_str() };
            let value = m.value.replace('\\', "\\\\").replace('"', "\\\"");
            write!(f, "{}{op}\"{value}\"", m.name)?;
        }
        f.write_str("}")
    }
}
