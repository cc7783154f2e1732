// SPDX-License-Identifier: MIT OR Apache-2.0
//! Confidence assembly.
//!
//! Every backend participating in a query contributes exactly one factor,
//! plus one `repo_state` factor reflecting working-tree dirtiness.

use ckb_core::{BackendKind, Confidence, ConfidenceFactor, ConfidenceTier, FactorStatus};

/// One participating backend, as observed during this call.
#[derive(Debug, Clone, Copy)]
pub struct Participant {
    /// Backend class.
    pub backend: BackendKind,
    /// Availability status.
    pub status: FactorStatus,
    /// Completeness of its contribution (0.0 when unused or unavailable).
    pub completeness: f64,
    /// Whether this backend's answer was the primary.
    pub primary: bool,
}

/// Build the confidence block from the participants and the repo state.
#[must_use]
pub fn build_confidence(participants: &[Participant], dirty: bool) -> Confidence {
    let mut factors = Vec::with_capacity(participants.len() + 1);
    let mut score = 0.0;
    let mut reasons = Vec::new();

    for p in participants {
        let impact = match p.status {
            FactorStatus::Available if p.primary => p.completeness * 0.8,
            FactorStatus::Available => 0.05,
            FactorStatus::AvailableUnused => 0.02,
            FactorStatus::Unavailable => -0.05,
        };
        score += impact;
        if p.primary {
            reasons.push(format!(
                "{} answered with completeness {:.2}",
                p.backend.name(),
                p.completeness
            ));
        } else if p.status == FactorStatus::Unavailable {
            reasons.push(format!("{} unavailable", p.backend.name()));
        }
        factors.push(ConfidenceFactor {
            name: p.backend.name().to_string(),
            status: p.status,
            impact,
        });
    }

    let repo_impact = if dirty { -0.1 } else { 0.05 };
    score += repo_impact;
    if dirty {
        reasons.push("working tree is dirty".to_string());
    }
    factors.push(ConfidenceFactor {
        name: "repo_state".to_string(),
        status: FactorStatus::Available,
        impact: repo_impact,
    });

    let score = score.clamp(0.0, 1.0);
    Confidence {
        score,
        tier: ConfidenceTier::from_score(score),
        factors,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primary(completeness: f64) -> Participant {
        Participant {
            backend: BackendKind::IndexedSemantic,
            status: FactorStatus::Available,
            completeness,
            primary: true,
        }
    }

    #[test]
    fn repo_state_factor_is_always_present() {
        let c = build_confidence(&[primary(1.0)], false);
        assert!(c.factors.iter().any(|f| f.name == "repo_state"));
        assert_eq!(c.factors.len(), 2);
    }

    #[test]
    fn dirty_state_lowers_score_and_adds_reason() {
        let clean = build_confidence(&[primary(1.0)], false);
        let dirty = build_confidence(&[primary(1.0)], true);
        assert!(dirty.score < clean.score);
        assert!(dirty.reasons.iter().any(|r| r.contains("dirty")));
        let repo_factor = dirty.factors.iter().find(|f| f.name == "repo_state").unwrap();
        assert!(repo_factor.impact < 0.0);
    }

    #[test]
    fn unavailable_backends_drag_the_score() {
        let with_loss = build_confidence(
            &[
                primary(1.0),
                Participant {
                    backend: BackendKind::LanguageServer,
                    status: FactorStatus::Unavailable,
                    completeness: 0.0,
                    primary: false,
                },
            ],
            false,
        );
        let without = build_confidence(&[primary(1.0)], false);
        assert!(with_loss.score < without.score);
    }

    #[test]
    fn one_factor_per_participant() {
        let participants = [
            primary(0.9),
            Participant {
                backend: BackendKind::Vcs,
                status: FactorStatus::AvailableUnused,
                completeness: 0.0,
                primary: false,
            },
            Participant {
                backend: BackendKind::Scanner,
                status: FactorStatus::Unavailable,
                completeness: 0.0,
                primary: false,
            },
        ];
        let c = build_confidence(&participants, false);
        assert_eq!(c.factors.len(), 4);
    }

    #[test]
    fn tier_follows_score() {
        let high = build_confidence(&[primary(1.0)], false);
        assert_eq!(high.tier, ConfidenceTier::High);
        let low = build_confidence(
            &[Participant {
                backend: BackendKind::Scanner,
                status: FactorStatus::Available,
                completeness: 0.3,
                primary: true,
            }],
            true,
        );
        assert_eq!(low.tier, ConfidenceTier::Low);
    }
}
