// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cross-repository contract impact.
//!
//! Direct consumers come from the edge table; transitive consumers (proto
//! only) come from a reverse-import walk followed by each dependent's own
//! direct consumers. Risk is an additive score with every contributing
//! factor recorded; ownership weights decay by pattern specificity.

use crate::ownership::{pattern_matches, pattern_specificity};
use crate::staleness::FederationStaleness;
use crate::store::{DEFAULT_MAX_DEPTH, FederationIndex, StoreResult};
use crate::types::{ContractRecord, EdgeRecord, OwnershipRecord};
use ckb_detectors::{ContractType, ContractVisibility, EvidenceTier};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::debug;

static VERSIONED_PKG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.v\d+(alpha|beta)?\d*$").expect("versioned package regex"));

/// Options for one impact query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactOptions {
    /// Walk the proto import graph for indirect consumers.
    pub include_transitive: bool,
    /// Reverse-import walk depth.
    pub max_depth: u32,
    /// Include heuristic-tier edges (hidden by default).
    pub include_heuristic: bool,
}

impl Default for ImpactOptions {
    fn default() -> Self {
        Self {
            include_transitive: false,
            max_depth: DEFAULT_MAX_DEPTH,
            include_heuristic: false,
        }
    }
}

/// One consuming repository entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerEntry {
    /// Consuming repository UID.
    pub repo_uid: String,
    /// Consuming repository ID.
    pub repo_id: String,
    /// Consuming files.
    pub paths: Vec<String>,
    /// Evidence tier of the edge.
    pub tier: EvidenceTier,
    /// Evidence type of the edge.
    pub evidence_type: String,
    /// Edge confidence.
    pub confidence: f64,
    /// For transitive entries: the intermediate contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via_contract: Option<String>,
    /// Graph distance; 0 for direct consumers.
    pub depth: u32,
}

/// One contributing risk factor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFactor {
    /// Factor name.
    pub name: String,
    /// Points contributed.
    pub points: u32,
}

/// Risk classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Score ≥ 4.
    High,
    /// Score ≥ 2.
    Medium,
    /// Anything lower.
    Low,
}

impl RiskLevel {
    fn from_score(score: u32) -> Self {
        if score >= 4 {
            Self::High
        } else if score >= 2 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// An owner with its accumulated weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerEntry {
    /// Owner type (`team`, `person`).
    pub owner_type: String,
    /// Owner identifier.
    pub owner_id: String,
    /// Accumulated weight.
    pub weight: f64,
}

/// The impact analysis result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactResponse {
    /// The analyzed contract ID.
    pub contract_id: String,
    /// Whether the path names a known contract.
    pub found: bool,
    /// Set to `not_a_contract` when the path is not in the catalog —
    /// distinct from an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limitation: Option<String>,
    /// Direct consumers, confidence descending.
    pub direct_consumers: Vec<ConsumerEntry>,
    /// Transitive consumers with `via_contract` and `depth`.
    pub transitive_consumers: Vec<ConsumerEntry>,
    /// Additive risk score.
    pub risk_score: u32,
    /// Derived level.
    pub risk_level: RiskLevel,
    /// Every contributing factor.
    pub risk_factors: Vec<RiskFactor>,
    /// Owners of the contract definition.
    pub definition_owners: Vec<OwnerEntry>,
    /// Top owners across consumer paths.
    pub consumer_owners: Vec<OwnerEntry>,
    /// Union of definition and top consumer owners.
    pub approval_required: Vec<OwnerEntry>,
    /// Federation staleness at analysis time.
    pub staleness: FederationStaleness,
}

/// Analyze the impact of changing the contract at `repo_uid:path`.
pub fn analyze_contract_impact(
    store: &FederationIndex,
    repo_uid: &str,
    path: &str,
    opts: &ImpactOptions,
) -> StoreResult<ImpactResponse> {
    let contract_id = ContractRecord::compose_id(repo_uid, path);
    let staleness = store.staleness()?;

    let Some(contract) = store.get_contract(&contract_id)? else {
        return Ok(ImpactResponse {
            contract_id,
            found: false,
            limitation: Some("not_a_contract".into()),
            direct_consumers: Vec::new(),
            transitive_consumers: Vec::new(),
            risk_score: 0,
            risk_level: RiskLevel::Low,
            risk_factors: Vec::new(),
            definition_owners: Vec::new(),
            consumer_owners: Vec::new(),
            approval_required: Vec::new(),
            staleness,
        });
    };

    let min_tier = if opts.include_heuristic {
        EvidenceTier::Heuristic
    } else {
        EvidenceTier::Derived
    };

    let direct_edges = store.edges_for_contract(&contract_id, min_tier)?;
    let direct_consumers: Vec<ConsumerEntry> = direct_edges
        .iter()
        .map(|edge| consumer_entry(edge, None, 0))
        .collect();

    // Transitive consumption only makes sense along the proto import graph.
    let mut transitive_consumers = Vec::new();
    if opts.include_transitive && contract.contract_type == ContractType::Proto {
        for (dependent, depth, _via) in store.reverse_imports(&contract_id, opts.max_depth)? {
            // The consumer reaches us through `dependent`, so that is the
            // via-contract it needs to know about.
            for edge in store.edges_for_contract(&dependent, min_tier)? {
                transitive_consumers.push(consumer_entry(&edge, Some(dependent.clone()), depth));
            }
        }
        transitive_consumers.sort_by(|a, b| {
            a.depth.cmp(&b.depth).then_with(|| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });
    }

    let (risk_score, risk_factors) =
        score_risk(&contract, &direct_consumers, &transitive_consumers);

    let (definition_owners, consumer_owners, approval_required) = resolve_owners(
        store,
        &contract,
        &direct_consumers,
        &transitive_consumers,
    )?;

    debug!(
        target: "ckb.federation.impact",
        contract = %contract_id,
        direct = direct_consumers.len(),
        transitive = transitive_consumers.len(),
        risk_score,
        "impact analyzed"
    );

    Ok(ImpactResponse {
        contract_id,
        found: true,
        limitation: None,
        direct_consumers,
        transitive_consumers,
        risk_score,
        risk_level: RiskLevel::from_score(risk_score),
        risk_factors,
        definition_owners,
        consumer_owners,
        approval_required,
        staleness,
    })
}

fn consumer_entry(edge: &EdgeRecord, via: Option<String>, depth: u32) -> ConsumerEntry {
    ConsumerEntry {
        repo_uid: edge.consumer_repo_uid.clone(),
        repo_id: edge.consumer_repo_id.clone(),
        paths: edge.consumer_paths.clone(),
        tier: edge.tier,
        evidence_type: edge.evidence_type.clone(),
        confidence: edge.confidence,
        via_contract: via,
        depth,
    }
}

/// Additive risk scoring with every factor recorded.
fn score_risk(
    contract: &ContractRecord,
    direct: &[ConsumerEntry],
    transitive: &[ConsumerEntry],
) -> (u32, Vec<RiskFactor>) {
    let mut score = 0u32;
    let mut factors = Vec::new();

    let consuming_repos: std::collections::BTreeSet<&str> = direct
        .iter()
        .chain(transitive)
        .map(|c| c.repo_uid.as_str())
        .collect();
    let repo_count = consuming_repos.len();
    if repo_count >= 5 {
        score += 3;
        factors.push(RiskFactor {
            name: format!("consuming-repos-{repo_count}"),
            points: 3,
        });
    } else if repo_count >= 2 {
        score += 2;
        factors.push(RiskFactor {
            name: format!("consuming-repos-{repo_count}"),
            points: 2,
        });
    }

    if contract.visibility == ContractVisibility::Public {
        score += 1;
        factors.push(RiskFactor {
            name: "public-visibility".into(),
            points: 1,
        });
    }

    if contract.contract_type == ContractType::Proto {
        let has_services = contract
            .metadata
            .get("services")
            .and_then(|s| s.as_array())
            .is_some_and(|s| !s.is_empty());
        if has_services {
            score += 1;
            factors.push(RiskFactor {
                name: "service-definitions".into(),
                points: 1,
            });
        }
        let versioned = contract
            .metadata
            .get("package")
            .and_then(|p| p.as_str())
            .is_some_and(|p| VERSIONED_PKG_RE.is_match(p));
        if !versioned {
            score += 1;
            factors.push(RiskFactor {
                name: "non-versioned-package".into(),
                points: 1,
            });
        }
    }

    let declared = direct
        .iter()
        .chain(transitive)
        .filter(|c| c.tier == EvidenceTier::Declared)
        .count();
    if declared >= 3 {
        score += 1;
        factors.push(RiskFactor {
            name: format!("declared-consumers-{declared}"),
            points: 1,
        });
    }

    (score, factors)
}

/// Owner resolution: weight = record confidence × pattern specificity;
/// duplicate `(type, id)` pairs accumulate; top five consumer owners join
/// the definition owners in the approval set.
fn resolve_owners(
    store: &FederationIndex,
    contract: &ContractRecord,
    direct: &[ConsumerEntry],
    transitive: &[ConsumerEntry],
) -> StoreResult<(Vec<OwnerEntry>, Vec<OwnerEntry>, Vec<OwnerEntry>)> {
    let definition_rules = store.ownership_for_repo(&contract.repo_uid)?;
    let definition_owners =
        weigh_owners(&definition_rules, std::iter::once(contract.path.as_str()));

    let mut consumer_weights: BTreeMap<(String, String), f64> = BTreeMap::new();
    let mut rules_cache: BTreeMap<String, Vec<OwnershipRecord>> = BTreeMap::new();
    for consumer in direct.iter().chain(transitive) {
        if !rules_cache.contains_key(&consumer.repo_uid) {
            let rules = store.ownership_for_repo(&consumer.repo_uid)?;
            rules_cache.insert(consumer.repo_uid.clone(), rules);
        }
        let rules = &rules_cache[&consumer.repo_uid];
        for path in &consumer.paths {
            for rule in rules {
                if pattern_matches(&rule.pattern, path) {
                    let weight = rule.confidence * pattern_specificity(&rule.pattern);
                    *consumer_weights
                        .entry((rule.owner_type.clone(), rule.owner_id.clone()))
                        .or_insert(0.0) += weight;
                }
            }
        }
    }

    let mut consumer_owners: Vec<OwnerEntry> = consumer_weights
        .into_iter()
        .map(|((owner_type, owner_id), weight)| OwnerEntry {
            owner_type,
            owner_id,
            weight,
        })
        .collect();
    consumer_owners.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.owner_id.cmp(&b.owner_id))
    });
    consumer_owners.truncate(5);

    // Approval set: definition owners plus top consumer owners, deduplicated
    // by (type, id) keeping the heavier weight.
    let mut approval: BTreeMap<(String, String), f64> = BTreeMap::new();
    for owner in definition_owners.iter().chain(consumer_owners.iter()) {
        let entry = approval
            .entry((owner.owner_type.clone(), owner.owner_id.clone()))
            .or_insert(0.0);
        if owner.weight > *entry {
            *entry = owner.weight;
        }
    }
    let mut approval_required: Vec<OwnerEntry> = approval
        .into_iter()
        .map(|((owner_type, owner_id), weight)| OwnerEntry {
            owner_type,
            owner_id,
            weight,
        })
        .collect();
    approval_required.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.owner_id.cmp(&b.owner_id))
    });

    Ok((definition_owners, consumer_owners, approval_required))
}

fn weigh_owners<'a>(
    rules: &[OwnershipRecord],
    paths: impl Iterator<Item = &'a str>,
) -> Vec<OwnerEntry> {
    let mut weights: BTreeMap<(String, String), f64> = BTreeMap::new();
    for path in paths {
        for rule in rules {
            if pattern_matches(&rule.pattern, path) {
                let weight = rule.confidence * pattern_specificity(&rule.pattern);
                *weights
                    .entry((rule.owner_type.clone(), rule.owner_id.clone()))
                    .or_insert(0.0) += weight;
            }
        }
    }
    let mut owners: Vec<OwnerEntry> = weights
        .into_iter()
        .map(|((owner_type, owner_id), weight)| OwnerEntry {
            owner_type,
            owner_id,
            weight,
        })
        .collect();
    owners.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.owner_id.cmp(&b.owner_id))
    });
    owners
}
