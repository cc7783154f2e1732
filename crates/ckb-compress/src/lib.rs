// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! ckb-compress
//!
//! Every response has a budget. Compression trims arrays to their budget
//! caps, records *why* it trimmed, and turns the truncation and
//! completeness context into ranked follow-up suggestions.

use ckb_core::{
    CompletenessReason, Drilldown, ImpactItem, ModuleFacts, Reference, SymbolFacts,
    TruncationMeta, rank_and_cap,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

/// Per-response shaping limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseBudget {
    /// Maximum module entries in an architecture view.
    pub max_modules: usize,
    /// Maximum symbols listed per module.
    pub max_symbols_per_module: usize,
    /// Maximum impact items.
    pub max_impact_items: usize,
    /// Maximum drilldown suggestions.
    pub max_drilldowns: usize,
    /// Approximate token ceiling for the serialized response.
    pub est_max_tokens: usize,
}

impl Default for ResponseBudget {
    fn default() -> Self {
        Self {
            max_modules: 10,
            max_symbols_per_module: 5,
            max_impact_items: 20,
            max_drilldowns: 5,
            est_max_tokens: 4000,
        }
    }
}

/// Rough token estimate for a serialized payload: one token per four bytes.
#[must_use]
pub fn estimate_tokens(value: &serde_json::Value) -> usize {
    serde_json::to_string(value).map_or(0, |s| s.len().div_ceil(4))
}

// ---------------------------------------------------------------------------
// Architecture views
// ---------------------------------------------------------------------------

/// One module plus its headline symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleView {
    /// The module summary.
    pub module: ModuleFacts,
    /// Headline symbols, already in contractual order.
    pub symbols: Vec<SymbolFacts>,
}

/// A budget-shaped architecture response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureView {
    /// Modules in contractual order.
    pub modules: Vec<ModuleView>,
}

/// What compression removed, for drilldown generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TruncationOutcome {
    /// The envelope truncation record, when anything was dropped.
    pub meta: Option<TruncationMeta>,
    /// ID of the highest-ranked module that fell past the cap.
    pub top_truncated_module: Option<String>,
}

/// Shape an architecture view: sort modules and per-module symbols into
/// contractual order, then apply `max_modules` / `max_symbols_per_module`.
pub fn compress_architecture(
    mut modules: Vec<ModuleView>,
    budget: &ResponseBudget,
) -> (ArchitectureView, TruncationOutcome) {
    let mut bare: Vec<ModuleFacts> = modules.iter().map(|m| m.module.clone()).collect();
    ckb_core::order::sort_modules(&mut bare);
    let rank: Vec<String> = bare.iter().map(|m| m.id.clone()).collect();
    modules.sort_by_key(|m| rank.iter().position(|id| *id == m.module.id));

    let mut dropped = 0u32;
    let mut outcome = TruncationOutcome::default();

    if modules.len() > budget.max_modules {
        outcome.top_truncated_module = modules.get(budget.max_modules).map(|m| m.module.id.clone());
        dropped += (modules.len() - budget.max_modules) as u32;
        modules.truncate(budget.max_modules);
        outcome.meta = Some(TruncationMeta {
            reason: "max-modules".into(),
            dropped,
        });
    }

    let mut symbol_drops = 0u32;
    for view in &mut modules {
        ckb_core::order::sort_symbols(&mut view.symbols);
        if view.symbols.len() > budget.max_symbols_per_module {
            symbol_drops += (view.symbols.len() - budget.max_symbols_per_module) as u32;
            view.symbols.truncate(budget.max_symbols_per_module);
        }
    }
    if symbol_drops > 0 {
        dropped += symbol_drops;
        let reason = match &outcome.meta {
            Some(meta) => meta.reason.clone(),
            None => "max-symbols-per-module".into(),
        };
        outcome.meta = Some(TruncationMeta { reason, dropped });
    }

    if dropped > 0 {
        debug!(target: "ckb.compress", dropped, "architecture view truncated");
    }

    (ArchitectureView { modules }, outcome)
}

/// Shape an impact list: contractual order then `max_impact_items`.
pub fn compress_impact(
    mut items: Vec<ImpactItem>,
    budget: &ResponseBudget,
) -> (Vec<ImpactItem>, Option<TruncationMeta>) {
    ckb_core::order::sort_impact_items(&mut items);
    if items.len() > budget.max_impact_items {
        let dropped = (items.len() - budget.max_impact_items) as u32;
        items.truncate(budget.max_impact_items);
        return (
            items,
            Some(TruncationMeta {
                reason: "max-items".into(),
                dropped,
            }),
        );
    }
    (items, None)
}

/// Shape a reference list: contractual order, then trim until the token
/// estimate fits the budget.
pub fn compress_references(
    mut references: Vec<Reference>,
    budget: &ResponseBudget,
) -> (Vec<Reference>, Option<TruncationMeta>) {
    ckb_core::order::sort_references(&mut references);
    let original = references.len();
    // Each reference serializes to roughly 30 tokens.
    let max_items = (budget.est_max_tokens / 30).max(1);
    if references.len() > max_items {
        references.truncate(max_items);
        return (
            references,
            Some(TruncationMeta {
                reason: "max-tokens".into(),
                dropped: (original - max_items) as u32,
            }),
        );
    }
    (references, None)
}

// ---------------------------------------------------------------------------
// Drilldown generation
// ---------------------------------------------------------------------------

/// Context a query hands to the drilldown generator.
#[derive(Debug, Clone)]
pub struct DrilldownContext {
    /// Tool that produced the response.
    pub tool: String,
    /// Truncation outcome, when compression dropped entries.
    pub truncation: Option<TruncationMeta>,
    /// Module past the cut, for the "explore top module" suggestion.
    pub top_truncated_module: Option<String>,
    /// Primary completeness score.
    pub completeness: f64,
    /// Primary completeness reason.
    pub completeness_reason: CompletenessReason,
}

/// Generate and rank drilldowns from truncation and completeness context.
///
/// Sorted by relevance descending then label, capped at
/// `budget.max_drilldowns`.
#[must_use]
pub fn generate_drilldowns(ctx: &DrilldownContext, budget: &ResponseBudget) -> Vec<Drilldown> {
    let mut out = Vec::new();

    if let Some(trunc) = &ctx.truncation {
        match trunc.reason.as_str() {
            "max-modules" => {
                if let Some(module_id) = &ctx.top_truncated_module {
                    out.push(
                        Drilldown::new(
                            ctx.tool.clone(),
                            format!("explore module {module_id}"),
                            "the module list was truncated; this entry ranked highest among the dropped",
                            0.9,
                        )
                        .with_param("module", serde_json::json!(module_id)),
                    );
                }
            }
            "max-items" | "max-tokens" | "max-symbols-per-module" => {
                out.push(
                    Drilldown::new(
                        ctx.tool.clone(),
                        "narrow the scope",
                        format!("{} entries were dropped to fit the budget", trunc.dropped),
                        0.7,
                    )
                    .with_param("scope", serde_json::json!("narrower")),
                );
            }
            _ => {}
        }
    }

    match ctx.completeness_reason {
        CompletenessReason::BestEffortLsp => {
            out.push(Drilldown::new(
                "status",
                "check backend status",
                "only the language server answered; the indexed source may need attention",
                0.8,
            ));
        }
        CompletenessReason::IndexStale => {
            out.push(Drilldown::new(
                "index",
                "regenerate the index",
                "the semantic index predates the current repository state",
                0.95,
            ));
        }
        CompletenessReason::WorkspaceNotReady => {
            out.push(Drilldown::new(
                "status",
                "wait for workspace",
                "the language server is still initializing",
                0.6,
            ));
        }
        _ => {}
    }

    if ctx.completeness < 0.8 {
        out.push(
            Drilldown::new(
                ctx.tool.clone(),
                "retry with union merge",
                "completeness fell below threshold; union mode consults every backend",
                0.75,
            )
            .with_param("merge", serde_json::json!("union")),
        );
    }

    rank_and_cap(out, budget.max_drilldowns)
}
