// 🔗 Mapping Entity - One connection from a source account to a target account
//
// "Mapping ID is IDENTITY, cardinality/weight/status are VALUES"
//
// Cardinality is derived from topology when the connection is made and is
// modelled as a closed variant: the group id exists exactly when the mapping
// participates in a fan-out (1:N) or fan-in (N:1).

use super::account::{Account, LedgerSection};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Tolerance for "weights of a 1:N group sum to one"
pub const WEIGHT_TOLERANCE: f64 = 1e-2;

// ============================================================================
// CARDINALITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToOne,
}

impl Cardinality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cardinality::OneToOne => "ONE_TO_ONE",
            Cardinality::OneToMany => "ONE_TO_MANY",
            Cardinality::ManyToOne => "MANY_TO_ONE",
        }
    }

    /// "1:1", "1:N", "N:1"
    pub fn short_label(&self) -> &'static str {
        match self {
            Cardinality::OneToOne => "1:1",
            Cardinality::OneToMany => "1:N",
            Cardinality::ManyToOne => "N:1",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_uppercase().as_str() {
            "ONE_TO_ONE" | "1:1" => Some(Cardinality::OneToOne),
            "ONE_TO_MANY" | "1:N" => Some(Cardinality::OneToMany),
            "MANY_TO_ONE" | "N:1" => Some(Cardinality::ManyToOne),
            _ => None,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cardinality together with the fields each variant requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cardinality", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingShape {
    OneToOne,
    OneToMany {
        #[serde(rename = "groupId")]
        group_id: String,
    },
    ManyToOne {
        #[serde(rename = "groupId")]
        group_id: String,
    },
}

impl MappingShape {
    pub fn cardinality(&self) -> Cardinality {
        match self {
            MappingShape::OneToOne => Cardinality::OneToOne,
            MappingShape::OneToMany { .. } => Cardinality::OneToMany,
            MappingShape::ManyToOne { .. } => Cardinality::ManyToOne,
        }
    }

    pub fn group_id(&self) -> Option<&str> {
        match self {
            MappingShape::OneToOne => None,
            MappingShape::OneToMany { group_id } | MappingShape::ManyToOne { group_id } => {
                Some(group_id)
            }
        }
    }

    /// Rebuild a shape from its flat persisted form.
    ///
    /// A grouped cardinality without a group id cannot be represented and
    /// falls back to ONE_TO_ONE.
    pub fn from_parts(cardinality: Cardinality, group_id: Option<String>) -> Self {
        match (cardinality, group_id) {
            (Cardinality::OneToMany, Some(group_id)) => MappingShape::OneToMany { group_id },
            (Cardinality::ManyToOne, Some(group_id)) => MappingShape::ManyToOne { group_id },
            (Cardinality::OneToOne, _) | (_, None) => MappingShape::OneToOne,
        }
    }
}

// ============================================================================
// STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingStatus {
    Draft,
    Active,
}

impl MappingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingStatus::Draft => "DRAFT",
            MappingStatus::Active => "ACTIVE",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_uppercase().as_str() {
            "DRAFT" => Some(MappingStatus::Draft),
            "ACTIVE" => Some(MappingStatus::Active),
            _ => None,
        }
    }
}

// ============================================================================
// MAPPING ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    // ========================================================================
    // IDENTITY
    // ========================================================================
    pub mapping_id: String,

    // ========================================================================
    // ENDPOINTS (denormalized from reference data at creation)
    // ========================================================================
    pub source_account_number: String,
    #[serde(default)]
    pub source_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_section: Option<LedgerSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_provider: Option<String>,

    pub target_account_number: String,
    #[serde(default)]
    pub target_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_section: Option<LedgerSection>,

    // ========================================================================
    // VALUES
    // ========================================================================
    #[serde(flatten)]
    pub shape: MappingShape,

    /// Share of the source balance attributed to this target, in (0, 1]
    pub split_weight: f64,

    pub status: MappingStatus,

    // ========================================================================
    // AUDIT
    // ========================================================================
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<NaiveDate>,
}

impl Mapping {
    /// Bare ONE_TO_ONE draft between two account numbers
    pub fn new(mapping_id: &str, source: &str, target: &str, created_by: &str) -> Self {
        let now = Utc::now();
        Mapping {
            mapping_id: mapping_id.to_string(),
            source_account_number: source.to_string(),
            source_description: String::new(),
            source_section: None,
            source_provider: None,
            target_account_number: target.to_string(),
            target_description: String::new(),
            target_section: None,
            shape: MappingShape::OneToOne,
            split_weight: 1.0,
            status: MappingStatus::Draft,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
            effective_date: None,
        }
    }

    /// Copy description/section/provider from the reference accounts
    pub fn describe(mut self, source: Option<&Account>, target: Option<&Account>) -> Self {
        if let Some(source) = source {
            self.source_description = source.description.clone();
            self.source_section = Some(source.ledger_section);
            self.source_provider = source.provider.clone();
        }
        if let Some(target) = target {
            self.target_description = target.description.clone();
            self.target_section = Some(target.ledger_section);
        }
        self
    }

    pub fn cardinality(&self) -> Cardinality {
        self.shape.cardinality()
    }

    pub fn group_id(&self) -> Option<&str> {
        self.shape.group_id()
    }

    pub fn connects(&self, source: &str, target: &str) -> bool {
        self.source_account_number == source && self.target_account_number == target
    }

    /// "1001 → A-100"
    pub fn endpoints(&self) -> String {
        format!("{} → {}", self.source_account_number, self.target_account_number)
    }

    pub fn sections_match(&self) -> bool {
        match (self.source_section, self.target_section) {
            (Some(s), Some(t)) => s == t,
            _ => true,
        }
    }

    /// Mint a mapping id: MAP-<timestamp>-<source prefix>-<random>
    pub fn generate_id(source_account_number: &str) -> String {
        let prefix: String = source_account_number.chars().take(6).collect();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "MAP-{}-{}-{}",
            Utc::now().format("%Y%m%d%H%M%S"),
            prefix,
            &suffix[..8]
        )
    }

    /// Mint a group id shared by the members of a fan-out / fan-in
    pub fn generate_group_id() -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("GRP-{}", &suffix[..8])
    }
}

/// Partial update of a mapping's values; identity and endpoints never change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<MappingShape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MappingStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<NaiveDate>,
    /// Modification time to record; supplied by the caller, never read from the clock here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl MappingPatch {
    pub fn weight(split_weight: f64) -> Self {
        MappingPatch {
            split_weight: Some(split_weight),
            ..Default::default()
        }
    }

    pub fn status(status: MappingStatus) -> Self {
        MappingPatch {
            status: Some(status),
            ..Default::default()
        }
    }

    /// The patch that turns `before` into `after`
    pub fn between(before: &Mapping, after: &Mapping) -> Self {
        MappingPatch {
            shape: (before.shape != after.shape).then(|| after.shape.clone()),
            split_weight: (before.split_weight != after.split_weight).then_some(after.split_weight),
            status: (before.status != after.status).then_some(after.status),
            effective_date: if before.effective_date != after.effective_date {
                after.effective_date
            } else {
                None
            },
            updated_at: (before.updated_at != after.updated_at).then_some(after.updated_at),
        }
    }

    pub fn stamped(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// True when no value field changes; a bare timestamp does not count
    pub fn is_empty(&self) -> bool {
        self.shape.is_none()
            && self.split_weight.is_none()
            && self.status.is_none()
            && self.effective_date.is_none()
    }

    pub fn apply_to(&self, mapping: &mut Mapping) {
        if let Some(shape) = &self.shape {
            mapping.shape = shape.clone();
        }
        if let Some(weight) = self.split_weight {
            mapping.split_weight = weight;
        }
        if let Some(status) = self.status {
            mapping.status = status;
        }
        if let Some(date) = self.effective_date {
            mapping.effective_date = Some(date);
        }
        if let Some(at) = self.updated_at {
            mapping.updated_at = at;
        }
    }
}

/// Sum of split weights per group id
pub fn group_weight_totals(mappings: &[Mapping]) -> HashMap<String, f64> {
    let mut totals: HashMap<String, f64> = HashMap::new();
    for mapping in mappings {
        if let Some(group_id) = mapping.group_id() {
            *totals.entry(group_id.to_string()).or_insert(0.0) += mapping.split_weight;
        }
    }
    totals
}

// ============================================================================
// PENDING CHANGE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// A local mutation not yet reconciled with the persistence collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub kind: ChangeKind,
    /// Snapshot after the change (CREATE/UPDATE) or before it (DELETE)
    pub mapping: Mapping,
    pub recorded_at: DateTime<Utc>,
}

impl PendingChange {
    pub fn new(kind: ChangeKind, mapping: Mapping) -> Self {
        PendingChange {
            kind,
            mapping,
            recorded_at: Utc::now(),
        }
    }

    pub fn mapping_id(&self) -> &str {
        &self.mapping.mapping_id
    }
}

/// Collapse a pending queue to at most one change per mapping id.
///
/// CREATE then UPDATE → CREATE with the latest snapshot
/// CREATE then DELETE → nothing (never reached the collaborator)
/// UPDATE then DELETE → DELETE
/// DELETE then CREATE → UPDATE (the record still exists remotely)
///
/// Output keeps the order in which each mapping id was first touched.
pub fn coalesce_pending(changes: &[PendingChange]) -> Vec<PendingChange> {
    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, Option<PendingChange>> = HashMap::new();

    for change in changes {
        let id = change.mapping_id().to_string();
        let merged = match latest.get(&id) {
            None => {
                order.push(id.clone());
                Some(change.clone())
            }
            Some(None) => match change.kind {
                // Created and deleted earlier in this batch, now re-created
                ChangeKind::Create | ChangeKind::Update => {
                    Some(PendingChange { kind: ChangeKind::Create, ..change.clone() })
                }
                ChangeKind::Delete => None,
            },
            // The merged change keeps the time the mapping first became dirty
            Some(Some(previous)) => {
                let kind = match (previous.kind, change.kind) {
                    (ChangeKind::Create, ChangeKind::Delete) => None,
                    (ChangeKind::Create, _) => Some(ChangeKind::Create),
                    (ChangeKind::Delete, ChangeKind::Create) => Some(ChangeKind::Update),
                    (_, kind) => Some(kind),
                };
                kind.map(|kind| PendingChange {
                    kind,
                    mapping: change.mapping.clone(),
                    recorded_at: previous.recorded_at,
                })
            }
        };
        latest.insert(id, merged);
    }

    order
        .into_iter()
        .filter_map(|id| latest.remove(&id).flatten())
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
