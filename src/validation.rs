// ✅ Mapping Validation - rule set applied by repositories on validate
//
// Rules:
//   INVALID_SPLIT_WEIGHT     (error)   source with >1 mappings whose weights don't sum to 1
//   UNMAPPED_ACCOUNTS        (warning) source accounts of the workspace provider with no mapping
//   LEDGER_SECTION_MISMATCH  (warning) mapping whose source and target sections differ
//
// Validation never mutates anything; it reports.

use crate::entities::{Account, LedgerSection, Mapping, WEIGHT_TOLERANCE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

// ============================================================================
// ISSUES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    InvalidSplitWeight,
    UnmappedAccounts,
    LedgerSectionMismatch,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::InvalidSplitWeight => "INVALID_SPLIT_WEIGHT",
            IssueType::UnmappedAccounts => "UNMAPPED_ACCOUNTS",
            IssueType::LedgerSectionMismatch => "LEDGER_SECTION_MISMATCH",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_account_number: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mapping_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub mapping_count: usize,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// "2 errors, 3 warnings across 14 mappings"
    pub fn summary(&self) -> String {
        format!(
            "{} error{}, {} warning{} across {} mapping{}",
            self.errors.len(),
            plural(self.errors.len()),
            self.warnings.len(),
            plural(self.warnings.len()),
            self.mapping_count,
            plural(self.mapping_count)
        )
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

// ============================================================================
// RULES
// ============================================================================

/// Validate one workspace's mappings against its provider's source chart.
pub fn validate(mappings: &[Mapping], provider_sources: &[Account]) -> ValidationReport {
    let errors = check_split_weights(mappings);
    let mut warnings = Vec::new();

    if let Some(issue) = check_unmapped(mappings, provider_sources) {
        warnings.push(issue);
    }
    warnings.extend(check_sections(mappings));

    ValidationReport {
        is_valid: errors.is_empty(),
        mapping_count: mappings.len(),
        errors,
        warnings,
    }
}

fn check_split_weights(mappings: &[Mapping]) -> Vec<ValidationIssue> {
    // BTreeMap keeps the report ordered by source account
    let mut by_source: BTreeMap<&str, Vec<&Mapping>> = BTreeMap::new();
    for mapping in mappings {
        by_source
            .entry(mapping.source_account_number.as_str())
            .or_default()
            .push(mapping);
    }

    by_source
        .into_iter()
        .filter(|(_, group)| group.len() > 1)
        .filter_map(|(source, group)| {
            let total: f64 = group.iter().map(|m| m.split_weight).sum();
            if (total - 1.0).abs() <= WEIGHT_TOLERANCE {
                return None;
            }
            Some(ValidationIssue {
                issue_type: IssueType::InvalidSplitWeight,
                message: format!("Split weights sum to {:.4}, expected 1.0", total),
                source_account_number: Some(source.to_string()),
                mapping_ids: group.iter().map(|m| m.mapping_id.clone()).collect(),
            })
        })
        .collect()
}

fn check_unmapped(mappings: &[Mapping], provider_sources: &[Account]) -> Option<ValidationIssue> {
    let mapped: HashSet<&str> = mappings
        .iter()
        .map(|m| m.source_account_number.as_str())
        .collect();
    let unmapped = provider_sources
        .iter()
        .filter(|a| !mapped.contains(a.account_number.as_str()))
        .count();

    (unmapped > 0).then(|| ValidationIssue {
        issue_type: IssueType::UnmappedAccounts,
        message: format!("{} source GL accounts are not mapped", unmapped),
        source_account_number: None,
        mapping_ids: Vec::new(),
    })
}

fn check_sections(mappings: &[Mapping]) -> Vec<ValidationIssue> {
    mappings
        .iter()
        .filter(|m| !m.sections_match())
        .map(|m| ValidationIssue {
            issue_type: IssueType::LedgerSectionMismatch,
            message: format!(
                "Source ({}) and target ({}) ledger sections differ",
                section_label(m.source_section),
                section_label(m.target_section)
            ),
            source_account_number: Some(m.source_account_number.clone()),
            mapping_ids: vec![m.mapping_id.clone()],
        })
        .collect()
}

fn section_label(section: Option<LedgerSection>) -> &'static str {
    section.map(|s| s.as_str()).unwrap_or("UNKNOWN")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::MappingShape;

    fn mapping(id: &str, source: &str, target: &str, weight: f64) -> Mapping {
        let mut m = Mapping::new(id, source, target, "tester");
        m.split_weight = weight;
        m
    }

    fn accounts(numbers: &[&str]) -> Vec<Account> {
        numbers
            .iter()
            .map(|n| Account::new(n, "Account", LedgerSection::Assets))
            .collect()
    }

    #[test]
    fn test_clean_workspace_is_valid() {
        let mut a = mapping("MAP-1", "S1", "T1", 0.5);
        let mut b = mapping("MAP-2", "S1", "T2", 0.5);
        a.shape = MappingShape::OneToMany { group_id: "G".into() };
        b.shape = MappingShape::OneToMany { group_id: "G".into() };

        let report = validate(&[a, b], &accounts(&["S1"]));
        assert!(report.is_valid);
        assert_eq!(report.mapping_count, 2);
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_split_weights_must_sum_to_one() {
        let report = validate(
            &[mapping("MAP-1", "S1", "T1", 0.5), mapping("MAP-2", "S1", "T2", 0.3)],
            &[],
        );
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 1);
        let issue = &report.errors[0];
        assert_eq!(issue.issue_type, IssueType::InvalidSplitWeight);
        assert_eq!(issue.source_account_number.as_deref(), Some("S1"));
        assert_eq!(issue.mapping_ids, vec!["MAP-1", "MAP-2"]);
    }

    #[test]
    fn test_thirds_are_within_tolerance() {
        let third = 1.0 / 3.0;
        let report = validate(
            &[
                mapping("MAP-1", "S1", "T1", third),
                mapping("MAP-2", "S1", "T2", third),
                mapping("MAP-3", "S1", "T3", 0.33),
            ],
            &[],
        );
        assert!(report.is_valid);
    }

    #[test]
    fn test_single_mapping_weight_is_not_checked() {
        // N:1 members keep their own weights
        let report = validate(&[mapping("MAP-1", "S1", "T1", 0.4)], &[]);
        assert!(report.is_valid);
    }

    #[test]
    fn test_unmapped_accounts_warning_counts_provider_sources() {
        let report = validate(
            &[mapping("MAP-1", "S1", "T1", 1.0)],
            &accounts(&["S1", "S2", "S3"]),
        );
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].issue_type, IssueType::UnmappedAccounts);
        assert!(report.warnings[0].message.starts_with("2 "));
    }

    #[test]
    fn test_section_mismatch_warning() {
        let mut m = mapping("MAP-1", "S1", "T1", 1.0);
        m.source_section = Some(LedgerSection::Assets);
        m.target_section = Some(LedgerSection::Expense);
        let report = validate(&[m], &[]);
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].issue_type, IssueType::LedgerSectionMismatch);
        assert_eq!(report.warnings[0].mapping_ids, vec!["MAP-1"]);
    }

    #[test]
    fn test_summary_and_wire_format() {
        let report = validate(
            &[mapping("MAP-1", "S1", "T1", 0.5), mapping("MAP-2", "S1", "T2", 0.3)],
            &[],
        );
        assert_eq!(report.summary(), "1 error, 0 warnings across 2 mappings");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["isValid"], false);
        assert_eq!(json["errors"][0]["type"], "INVALID_SPLIT_WEIGHT");
    }
}
