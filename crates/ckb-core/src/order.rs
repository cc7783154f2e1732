// SPDX-License-Identifier: MIT OR Apache-2.0
//! Contractual array orderings.
//!
//! | Array | Primary | Secondary | Tertiary |
//! |-------|---------|-----------|----------|
//! | modules | impact_count ↓ | symbol_count ↓ | id ↑ |
//! | symbols | confidence ↓ | ref_count ↓ | stable_id ↑ |
//! | references | file ↑ | start_line ↑ | start_column ↑ |
//! | impact items | kind priority | confidence ↓ | stable_id ↑ |
//! | drilldowns | relevance ↓ | label ↑ | — |
//!
//! Drilldown ordering lives with [`crate::drilldown::rank_and_cap`].

use crate::facts::{ImpactItem, ModuleFacts, Reference, SymbolFacts};
use std::cmp::Ordering;

fn desc_f64(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Sort modules in place per the contract.
pub fn sort_modules(modules: &mut [ModuleFacts]) {
    modules.sort_by(|a, b| {
        b.impact_count
            .cmp(&a.impact_count)
            .then_with(|| b.symbol_count.cmp(&a.symbol_count))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Sort symbols in place per the contract.
pub fn sort_symbols(symbols: &mut [SymbolFacts]) {
    symbols.sort_by(|a, b| {
        desc_f64(a.confidence, b.confidence)
            .then_with(|| b.ref_count.unwrap_or(0).cmp(&a.ref_count.unwrap_or(0)))
            .then_with(|| a.stable_id.cmp(&b.stable_id))
    });
}

/// Sort references in place per the contract.
pub fn sort_references(references: &mut [Reference]) {
    references.sort_by(|a, b| {
        a.location
            .file
            .cmp(&b.location.file)
            .then_with(|| a.location.start_line.cmp(&b.location.start_line))
            .then_with(|| a.location.start_column.cmp(&b.location.start_column))
    });
}

/// Sort impact items in place per the contract.
pub fn sort_impact_items(items: &mut [ImpactItem]) {
    items.sort_by(|a, b| {
        a.kind
            .priority()
            .cmp(&b.kind.priority())
            .then_with(|| desc_f64(a.confidence, b.confidence))
            .then_with(|| a.stable_id.cmp(&b.stable_id))
    });
}
