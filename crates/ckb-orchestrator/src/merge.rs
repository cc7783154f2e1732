// SPDX-License-Identifier: MIT OR Apache-2.0
//! The two merge modes.
//!
//! **Prefer-first** takes one primary backend's answer and supplements only
//! a whitelist of metadata fields from equal-or-higher-precedence peers.
//! It never adds references, never changes locations, never mutates stable
//! IDs. Disagreements are recorded; higher precedence wins.
//!
//! **Union** merges every backend's references by reference key; field
//! conflicts resolve by precedence and are recorded with both values.

use ckb_core::{BackendKind, MetadataConflict, Reference, SymbolFacts, SymbolKind};
use serde_json::json;
use std::collections::BTreeMap;

/// Fields prefer-first mode may supplement from peers.
pub const SUPPLEMENT_WHITELIST: &[&str] = &[
    "visibility",
    "visibility_confidence",
    "signature_normalized",
    "signature_full",
    "kind",
    "container",
    "module_id",
];

/// Merge whitelisted metadata from one peer into the primary answer.
///
/// `primary_kind` and `peer_kind` drive conflict resolution: when both
/// sides carry a value and they disagree, the higher-precedence side wins
/// and the disagreement is recorded.
pub fn supplement_whitelist(
    primary: &mut SymbolFacts,
    primary_kind: BackendKind,
    peer: &SymbolFacts,
    peer_kind: BackendKind,
    conflicts: &mut Vec<MetadataConflict>,
) {
    let peer_wins = peer_kind.precedence() < primary_kind.precedence();

    // visibility + visibility_confidence travel together.
    match (primary.visibility, peer.visibility) {
        (None, Some(v)) => {
            primary.visibility = Some(v);
            primary.visibility_confidence = peer.visibility_confidence;
        }
        (Some(ours), Some(theirs)) if ours != theirs => {
            conflicts.push(conflict(
                "visibility",
                json!(if peer_wins { theirs } else { ours }),
                json!(if peer_wins { ours } else { theirs }),
                primary_kind,
                peer_kind,
                peer_wins,
            ));
            if peer_wins {
                primary.visibility = Some(theirs);
                primary.visibility_confidence = peer.visibility_confidence;
            }
        }
        _ => {}
    }

    supplement_string(
        &mut primary.signature_normalized,
        &peer.signature_normalized,
        "signature_normalized",
        primary_kind,
        peer_kind,
        peer_wins,
        conflicts,
    );
    supplement_string(
        &mut primary.signature_full,
        &peer.signature_full,
        "signature_full",
        primary_kind,
        peer_kind,
        peer_wins,
        conflicts,
    );
    supplement_string(
        &mut primary.module_id,
        &peer.module_id,
        "module_id",
        primary_kind,
        peer_kind,
        peer_wins,
        conflicts,
    );

    // Kind refinement: Unknown may be refined; disagreements are recorded.
    if primary.kind == SymbolKind::Unknown && peer.kind != SymbolKind::Unknown {
        primary.kind = peer.kind;
    } else if primary.kind != peer.kind && peer.kind != SymbolKind::Unknown {
        conflicts.push(conflict(
            "kind",
            json!(if peer_wins { peer.kind } else { primary.kind }),
            json!(if peer_wins { primary.kind } else { peer.kind }),
            primary_kind,
            peer_kind,
            peer_wins,
        ));
        if peer_wins {
            primary.kind = peer.kind;
        }
    }

    // Container name: fill when absent; disagreements are recorded.
    if primary.container.is_empty() && !peer.container.is_empty() {
        primary.container = peer.container.clone();
    } else if !peer.container.is_empty() && primary.container != peer.container {
        conflicts.push(conflict(
            "container",
            json!(if peer_wins {
                peer.container.clone()
            } else {
                primary.container.clone()
            }),
            json!(if peer_wins {
                primary.container.clone()
            } else {
                peer.container.clone()
            }),
            primary_kind,
            peer_kind,
            peer_wins,
        ));
        if peer_wins {
            primary.container = peer.container.clone();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn supplement_string(
    ours: &mut Option<String>,
    theirs: &Option<String>,
    field: &str,
    primary_kind: BackendKind,
    peer_kind: BackendKind,
    peer_wins: bool,
    conflicts: &mut Vec<MetadataConflict>,
) {
    match (ours.as_ref(), theirs.as_ref()) {
        (None, Some(v)) => *ours = Some(v.clone()),
        (Some(a), Some(b)) if a != b => {
            conflicts.push(conflict(
                field,
                json!(if peer_wins { b } else { a }),
                json!(if peer_wins { a } else { b }),
                primary_kind,
                peer_kind,
                peer_wins,
            ));
            if peer_wins {
                *ours = Some(b.clone());
            }
        }
        _ => {}
    }
}

fn conflict(
    field: &str,
    chosen: serde_json::Value,
    rejected: serde_json::Value,
    primary_kind: BackendKind,
    peer_kind: BackendKind,
    peer_wins: bool,
) -> MetadataConflict {
    MetadataConflict {
        field: field.to_string(),
        chosen,
        rejected,
        chosen_from: if peer_wins { peer_kind } else { primary_kind },
        rejected_from: if peer_wins { primary_kind } else { peer_kind },
    }
}

// ---------------------------------------------------------------------------
// Union merge
// ---------------------------------------------------------------------------

/// Merge reference sets from several backends by reference key.
///
/// Commutative up to reference-key equality: the surviving entry for each
/// key is the one from the highest-precedence backend; kind disagreements
/// for the same key are recorded.
pub fn union_references(
    per_backend: Vec<(BackendKind, Vec<Reference>)>,
    conflicts: &mut Vec<MetadataConflict>,
) -> Vec<Reference> {
    let mut merged: BTreeMap<String, (BackendKind, Reference)> = BTreeMap::new();

    for (kind, references) in per_backend {
        for reference in references {
            let key = reference.merge_key();
            match merged.get_mut(&key) {
                None => {
                    merged.insert(key, (kind, reference));
                }
                Some((existing_kind, existing)) => {
                    // Same key means same file/line/column/kind; the sides
                    // can still disagree on confidence.
                    let incoming_wins = kind.precedence() < existing_kind.precedence();
                    if (existing.confidence - reference.confidence).abs() > f64::EPSILON {
                        conflicts.push(MetadataConflict {
                            field: "confidence".into(),
                            chosen: json!(if incoming_wins {
                                reference.confidence
                            } else {
                                existing.confidence
                            }),
                            rejected: json!(if incoming_wins {
                                existing.confidence
                            } else {
                                reference.confidence
                            }),
                            chosen_from: if incoming_wins { kind } else { *existing_kind },
                            rejected_from: if incoming_wins { *existing_kind } else { kind },
                        });
                    }
                    if incoming_wins {
                        *existing_kind = kind;
                        *existing = reference;
                    }
                }
            }
        }
    }

    let mut out: Vec<Reference> = merged.into_values().map(|(_, r)| r).collect();
    ckb_core::order::sort_references(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ckb_core::{Location, LocationFreshness, ReferenceKind, Visibility};

    fn facts(name: &str) -> SymbolFacts {
        SymbolFacts {
            stable_id: Some(format!("ckb:demo:sym:{name}")),
            name: name.into(),
            container: String::new(),
            kind: SymbolKind::Unknown,
            arity: None,
            signature_full: None,
            signature_normalized: None,
            visibility: None,
            visibility_confidence: None,
            module_id: None,
            location: None,
            location_freshness: LocationFreshness::Fresh,
            ref_count: None,
            confidence: 0.9,
        }
    }

    fn reference(file: &str, line: u32, kind: ReferenceKind) -> Reference {
        Reference {
            location: Location {
                file: file.into(),
                start_line: line,
                start_column: 1,
                end_line: line,
                end_column: 5,
            },
            kind,
            confidence: 1.0,
        }
    }

    #[test]
    fn supplement_fills_missing_fields_without_conflict() {
        let mut primary = facts("foo");
        let mut peer = facts("foo");
        peer.visibility = Some(Visibility::Public);
        peer.visibility_confidence = Some(0.9);
        peer.signature_normalized = Some("fn(_) -> _".into());
        peer.module_id = Some("core".into());
        peer.kind = SymbolKind::Function;

        let mut conflicts = Vec::new();
        supplement_whitelist(
            &mut primary,
            BackendKind::IndexedSemantic,
            &peer,
            BackendKind::CrossRepo,
            &mut conflicts,
        );
        assert!(conflicts.is_empty());
        assert_eq!(primary.visibility, Some(Visibility::Public));
        assert_eq!(primary.signature_normalized.as_deref(), Some("fn(_) -> _"));
        assert_eq!(primary.module_id.as_deref(), Some("core"));
        assert_eq!(primary.kind, SymbolKind::Function);
    }

    #[test]
    fn higher_precedence_primary_keeps_its_value_and_records_conflict() {
        let mut primary = facts("foo");
        primary.visibility = Some(Visibility::Internal);
        let mut peer = facts("foo");
        peer.visibility = Some(Visibility::Public);

        let mut conflicts = Vec::new();
        supplement_whitelist(
            &mut primary,
            BackendKind::IndexedSemantic,
            &peer,
            BackendKind::CrossRepo,
            &mut conflicts,
        );
        // Primary outranks the peer: its value stands.
        assert_eq!(primary.visibility, Some(Visibility::Internal));
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].field, "visibility");
        assert_eq!(conflicts[0].chosen_from, BackendKind::IndexedSemantic);
        assert_eq!(conflicts[0].rejected_from, BackendKind::CrossRepo);
    }

    #[test]
    fn higher_precedence_peer_overrides_and_records_conflict() {
        let mut primary = facts("foo");
        primary.signature_full = Some("fn foo(x: u8)".into());
        let mut peer = facts("foo");
        peer.signature_full = Some("fn foo(x: u32)".into());

        let mut conflicts = Vec::new();
        supplement_whitelist(
            &mut primary,
            BackendKind::LanguageServer,
            &peer,
            BackendKind::IndexedSemantic,
            &mut conflicts,
        );
        assert_eq!(primary.signature_full.as_deref(), Some("fn foo(x: u32)"));
        assert_eq!(conflicts[0].chosen_from, BackendKind::IndexedSemantic);
    }

    #[test]
    fn supplement_never_touches_identity_or_location() {
        let mut primary = facts("foo");
        primary.location = Some(Location {
            file: "src/a.rs".into(),
            start_line: 1,
            start_column: 1,
            end_line: 1,
            end_column: 2,
        });
        let before_id = primary.stable_id.clone();
        let before_loc = primary.location.clone();

        let mut peer = facts("foo");
        peer.stable_id = Some("ckb:demo:sym:OTHER".into());
        peer.location = Some(Location {
            file: "src/b.rs".into(),
            start_line: 9,
            start_column: 9,
            end_line: 9,
            end_column: 10,
        });

        let mut conflicts = Vec::new();
        supplement_whitelist(
            &mut primary,
            BackendKind::IndexedSemantic,
            &peer,
            BackendKind::CrossRepo,
            &mut conflicts,
        );
        assert_eq!(primary.stable_id, before_id);
        assert_eq!(primary.location, before_loc);
    }

    #[test]
    fn union_deduplicates_by_reference_key() {
        let a = vec![
            reference("a.rs", 1, ReferenceKind::Use),
            reference("a.rs", 2, ReferenceKind::Use),
        ];
        let b = vec![
            reference("a.rs", 1, ReferenceKind::Use),
            reference("b.rs", 5, ReferenceKind::Use),
        ];
        let mut conflicts = Vec::new();
        let merged = union_references(
            vec![
                (BackendKind::IndexedSemantic, a),
                (BackendKind::LanguageServer, b),
            ],
            &mut conflicts,
        );
        assert_eq!(merged.len(), 3);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn union_is_commutative_up_to_reference_key() {
        let a = vec![
            reference("a.rs", 1, ReferenceKind::Use),
            reference("b.rs", 2, ReferenceKind::Write),
        ];
        let b = vec![reference("c.rs", 3, ReferenceKind::Use)];

        let mut c1 = Vec::new();
        let ab = union_references(
            vec![
                (BackendKind::IndexedSemantic, a.clone()),
                (BackendKind::LanguageServer, b.clone()),
            ],
            &mut c1,
        );
        let mut c2 = Vec::new();
        let ba = union_references(
            vec![
                (BackendKind::LanguageServer, b),
                (BackendKind::IndexedSemantic, a),
            ],
            &mut c2,
        );
        let keys = |rs: &[Reference]| -> Vec<String> {
            rs.iter().map(Reference::merge_key).collect()
        };
        assert_eq!(keys(&ab), keys(&ba));
    }

    #[test]
    fn union_output_is_in_contractual_order() {
        let refs = vec![
            reference("z.rs", 9, ReferenceKind::Use),
            reference("a.rs", 5, ReferenceKind::Use),
            reference("a.rs", 1, ReferenceKind::Use),
        ];
        let mut conflicts = Vec::new();
        let merged = union_references(vec![(BackendKind::IndexedSemantic, refs)], &mut conflicts);
        assert_eq!(merged[0].location.file, "a.rs");
        assert_eq!(merged[0].location.start_line, 1);
        assert_eq!(merged[2].location.file, "z.rs");
    }
}
