// SPDX-License-Identifier: MIT OR Apache-2.0
//! Drilldowns — suggested follow-up calls generated from truncation and
//! completeness context.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A suggested follow-up tool call.
///
/// Drilldowns are ranked by `relevance_score` descending, then by `label`
/// ascending, and capped by the response budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Drilldown {
    /// The tool to call.
    pub tool: String,
    /// Parameters for the call, already normalized.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, serde_json::Value>,
    /// Human-readable label shown to the caller.
    pub label: String,
    /// Why this follow-up is being suggested.
    pub reason: String,
    /// Relevance in `[0, 1]`; higher sorts first.
    pub relevance_score: f64,
}

impl Drilldown {
    /// Create a drilldown with no parameters.
    #[must_use]
    pub fn new(
        tool: impl Into<String>,
        label: impl Into<String>,
        reason: impl Into<String>,
        relevance_score: f64,
    ) -> Self {
        Self {
            tool: tool.into(),
            params: BTreeMap::new(),
            label: label.into(),
            reason: reason.into(),
            relevance_score,
        }
    }

    /// Add a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Sort drilldowns by relevance descending, label ascending, and truncate to
/// `cap` entries.
pub fn rank_and_cap(mut drilldowns: Vec<Drilldown>, cap: usize) -> Vec<Drilldown> {
    drilldowns.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.label.cmp(&b.label))
    });
    drilldowns.truncate(cap);
    drilldowns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranking_is_relevance_then_label() {
        let ds = vec![
            Drilldown::new("status", "b", "r", 0.5),
            Drilldown::new("status", "a", "r", 0.5),
            Drilldown::new("refs", "c", "r", 0.9),
        ];
        let ranked = rank_and_cap(ds, 5);
        assert_eq!(ranked[0].label, "c");
        assert_eq!(ranked[1].label, "a");
        assert_eq!(ranked[2].label, "b");
    }

    #[test]
    fn cap_truncates() {
        let ds = (0..10)
            .map(|i| Drilldown::new("t", format!("l{i}"), "r", i as f64 / 10.0))
            .collect();
        assert_eq!(rank_and_cap(ds, 5).len(), 5);
    }

    #[test]
    fn params_roundtrip() {
        let d = Drilldown::new("references", "explore", "truncated", 0.8)
            .with_param("merge", serde_json::json!("union"));
        let json = serde_json::to_string(&d).unwrap();
        let back: Drilldown = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
