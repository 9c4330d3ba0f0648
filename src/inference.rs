// 🧭 Mapping Inference Engine - Cardinality is derived, never chosen
//
// Given a proposed source → target connection and the current mappings:
//
//   1. identical (source, target) already mapped → DUPLICATE_MAPPING
//   2. Ns = mappings from the same source, Nt = mappings into the same target
//   3. Ns > 0 → ONE_TO_MANY, reuse/mint group, every member weight = 1/(Ns+1)
//   4. Nt > 0 → MANY_TO_ONE, reuse/mint group, weights untouched
//   5. else   → ONE_TO_ONE, no group, weight 1.0
//
// The result is one change-set: the new mapping plus every sibling whose
// cardinality, group or weight was rewritten.
//
// Fan-out takes precedence over fan-in: a mapping already in a 1:N group is
// never pulled into an N:1 group by a later drop on its target.

use crate::entities::{AccountSide, Mapping, MappingShape};
use crate::error::{MappingError, MappingResult};
use crate::history::{ChangeSet, MappingChange};
use crate::store::ReferenceData;
use chrono::Utc;
use serde::{Deserialize, Serialize};

// ============================================================================
// PROPOSAL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProposal {
    pub source_account_number: String,
    pub target_account_number: String,
}

impl ConnectionProposal {
    pub fn new(source: &str, target: &str) -> Self {
        ConnectionProposal {
            source_account_number: source.to_string(),
            target_account_number: target.to_string(),
        }
    }

    pub fn label(&self) -> String {
        format!(
            "connect {} → {}",
            self.source_account_number, self.target_account_number
        )
    }
}

/// Accepted proposal: the new mapping and the full change-set to apply
#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    pub mapping: Mapping,
    pub change_set: ChangeSet,
}

impl Inference {
    /// Siblings rewritten alongside the new mapping
    pub fn rewritten_siblings(&self) -> usize {
        self.change_set.len().saturating_sub(1)
    }
}

// ============================================================================
// INFERENCE ENGINE
// ============================================================================

pub struct InferenceEngine {
    /// Recorded as `created_by` on new mappings
    actor: String,
}

impl InferenceEngine {
    pub fn new(actor: &str) -> Self {
        InferenceEngine {
            actor: actor.to_string(),
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Decide the outcome of connecting `proposal.source` to `proposal.target`.
    ///
    /// Pure: neither `mappings` nor `reference` are modified.
    pub fn propose(
        &self,
        proposal: &ConnectionProposal,
        mappings: &[Mapping],
        reference: &ReferenceData,
    ) -> MappingResult<Inference> {
        let source = &proposal.source_account_number;
        let target = &proposal.target_account_number;

        let source_account =
            reference
                .sources
                .get(source)
                .ok_or_else(|| MappingError::AccountNotFound {
                    side: AccountSide::Source,
                    account_number: source.clone(),
                })?;
        let target_account =
            reference
                .targets
                .get(target)
                .ok_or_else(|| MappingError::AccountNotFound {
                    side: AccountSide::Target,
                    account_number: target.clone(),
                })?;

        if mappings.iter().any(|m| m.connects(source, target)) {
            return Err(MappingError::DuplicateMapping {
                source_account: source.clone(),
                target_account: target.clone(),
            });
        }

        let same_source: Vec<&Mapping> = mappings
            .iter()
            .filter(|m| &m.source_account_number == source)
            .collect();
        let same_target: Vec<&Mapping> = mappings
            .iter()
            .filter(|m| &m.target_account_number == target)
            .collect();

        let mut mapping = Mapping::new(&Mapping::generate_id(source), source, target, &self.actor)
            .describe(Some(source_account), Some(target_account));
        let mut changes = Vec::new();

        if !same_source.is_empty() {
            // Fan-out: equal redistribution across the whole group
            let group_id = existing_group(&same_source, |shape| match shape {
                MappingShape::OneToMany { group_id } => Some(group_id),
                _ => None,
            })
            .unwrap_or_else(Mapping::generate_group_id);
            let weight = 1.0 / (same_source.len() + 1) as f64;
            let shape = MappingShape::OneToMany { group_id };

            for sibling in &same_source {
                if let Some(change) = rewrite(sibling, &shape, weight) {
                    changes.push(change);
                }
            }
            mapping.shape = shape;
            mapping.split_weight = weight;
        } else if !same_target.is_empty() {
            // Fan-in: join the target's group, weights stay as they are.
            // A target held only by 1:N members has no N:1 group yet; the new
            // mapping seeds one on its own and later sources join it.
            let group_id = existing_group(&same_target, |shape| match shape {
                MappingShape::ManyToOne { group_id } => Some(group_id),
                _ => None,
            })
            .unwrap_or_else(Mapping::generate_group_id);
            let shape = MappingShape::ManyToOne { group_id };

            for sibling in same_target
                .iter()
                .filter(|m| !matches!(m.shape, MappingShape::OneToMany { .. }))
            {
                if let Some(change) = rewrite(sibling, &shape, sibling.split_weight) {
                    changes.push(change);
                }
            }
            mapping.shape = shape;
        }

        log::debug!(
            "inference source={} target={} cardinality={} siblings={}",
            source,
            target,
            mapping.cardinality(),
            changes.len()
        );

        changes.push(MappingChange::Create {
            after: mapping.clone(),
            index: None,
        });

        Ok(Inference {
            mapping,
            change_set: ChangeSet::new(&proposal.label(), changes),
        })
    }

    /// Remove a mapping and re-derive what is left of its group.
    ///
    /// - ONE_TO_MANY survivors are rebalanced to equal weights
    /// - a group reduced to a single member becomes ONE_TO_ONE
    ///   (weight 1.0 for a former fan-out, kept for a former fan-in)
    pub fn retract(&self, mapping_id: &str, mappings: &[Mapping]) -> MappingResult<ChangeSet> {
        let position = mappings
            .iter()
            .position(|m| m.mapping_id == mapping_id)
            .ok_or_else(|| MappingError::MappingNotFound(mapping_id.to_string()))?;
        let removed = &mappings[position];

        let mut changes = Vec::new();

        if let Some(group_id) = removed.group_id() {
            let survivors: Vec<&Mapping> = mappings
                .iter()
                .filter(|m| m.mapping_id != mapping_id && m.group_id() == Some(group_id))
                .collect();

            match (&removed.shape, survivors.len()) {
                (_, 0) => {}
                (MappingShape::OneToMany { .. }, 1) => {
                    if let Some(change) = rewrite(survivors[0], &MappingShape::OneToOne, 1.0) {
                        changes.push(change);
                    }
                }
                (MappingShape::ManyToOne { .. }, 1) => {
                    let survivor = survivors[0];
                    if let Some(change) =
                        rewrite(survivor, &MappingShape::OneToOne, survivor.split_weight)
                    {
                        changes.push(change);
                    }
                }
                (MappingShape::OneToMany { .. }, n) => {
                    let weight = 1.0 / n as f64;
                    for survivor in &survivors {
                        if let Some(change) = rewrite(survivor, &survivor.shape, weight) {
                            changes.push(change);
                        }
                    }
                }
                (MappingShape::ManyToOne { .. }, _) | (MappingShape::OneToOne, _) => {}
            }
        }

        changes.push(MappingChange::Delete {
            before: removed.clone(),
            index: Some(position),
        });

        Ok(ChangeSet::new(&format!("delete {}", removed.endpoints()), changes))
    }
}

/// First group id found among the siblings for the wanted cardinality
fn existing_group<F>(siblings: &[&Mapping], pick: F) -> Option<String>
where
    F: Fn(&MappingShape) -> Option<&String>,
{
    siblings.iter().find_map(|m| pick(&m.shape).cloned())
}

/// UPDATE change moving `before` to the given shape/weight, or None if nothing changes
fn rewrite(before: &Mapping, shape: &MappingShape, weight: f64) -> Option<MappingChange> {
    if before.shape == *shape && before.split_weight == weight {
        return None;
    }
    let mut after = before.clone();
    after.shape = shape.clone();
    after.split_weight = weight;
    after.updated_at = Utc::now();
    Some(MappingChange::Update {
        before: before.clone(),
        after,
    })
}

// ============================================================================
// TESTS
// ============================================================================
