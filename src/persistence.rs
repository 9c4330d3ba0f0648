// 💾 Persistence Collaborator - contract consumed by the workspace
//
// Everything the workspace reads or writes outside its own state tree goes
// through `MappingRepository`. Two adapters ship with the crate:
// - InMemoryRepository (here): tests and scratch sessions
// - SqliteRepository (db.rs): the durable store used by the binary
//
// Repositories fill the denormalized account details of new mappings from
// their own reference tables, so callers only send identities and values.

use crate::entities::{
    Account, AccountSide, LedgerSection, Mapping, MappingPatch, MappingShape, MappingStatus,
};
use crate::error::{MappingError, MappingResult};
use crate::validation::{self, ValidationReport};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// REQUEST TYPES
// ============================================================================

/// Create request. `mapping_id` is honoured when present so client-side
/// history keeps pointing at the same record after a save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_id: Option<String>,
    pub source_account_number: String,
    pub target_account_number: String,
    #[serde(flatten)]
    pub shape: MappingShape,
    pub split_weight: f64,
    pub status: MappingStatus,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<NaiveDate>,
}

impl NewMapping {
    pub fn from_mapping(mapping: &Mapping) -> Self {
        NewMapping {
            mapping_id: Some(mapping.mapping_id.clone()),
            source_account_number: mapping.source_account_number.clone(),
            target_account_number: mapping.target_account_number.clone(),
            shape: mapping.shape.clone(),
            split_weight: mapping.split_weight,
            status: mapping.status,
            created_by: mapping.created_by.clone(),
            effective_date: mapping.effective_date,
        }
    }

    /// Materialize against reference accounts (denormalized fields filled)
    pub fn into_mapping(self, source: &Account, target: &Account) -> Mapping {
        let mapping_id = self
            .mapping_id
            .unwrap_or_else(|| Mapping::generate_id(&self.source_account_number));
        let mut mapping = Mapping::new(
            &mapping_id,
            &self.source_account_number,
            &self.target_account_number,
            &self.created_by,
        )
        .describe(Some(source), Some(target));
        mapping.shape = self.shape;
        mapping.split_weight = self.split_weight;
        mapping.status = self.status;
        mapping.effective_date = self.effective_date;
        mapping
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemError {
    pub index: usize,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkCreateResult {
    pub created: usize,
    pub errors: Vec<BulkItemError>,
    pub mappings: Vec<Mapping>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BulkDeleteResult {
    pub deleted: usize,
    pub requested: usize,
}

// ============================================================================
// REPOSITORY TRAIT
// ============================================================================

pub trait MappingRepository {
    /// Remember which source provider a workspace migrates from
    fn register_workspace(&mut self, workspace_id: &str, provider: Option<&str>) -> MappingResult<()>;

    fn list_source_accounts(&self, provider: Option<&str>) -> MappingResult<Vec<Account>>;

    fn list_target_accounts(&self, section: Option<LedgerSection>) -> MappingResult<Vec<Account>>;

    fn list_mappings(
        &self,
        workspace_id: &str,
        status: Option<MappingStatus>,
        provider: Option<&str>,
    ) -> MappingResult<Vec<Mapping>>;

    fn create_mapping(&mut self, workspace_id: &str, request: NewMapping) -> MappingResult<Mapping>;

    fn update_mapping(&mut self, mapping_id: &str, patch: &MappingPatch) -> MappingResult<Mapping>;

    fn delete_mapping(&mut self, mapping_id: &str) -> MappingResult<()>;

    fn validate_mappings(&self, workspace_id: &str) -> MappingResult<ValidationReport>;

    /// Create each request independently; failures are reported per index
    fn bulk_create(
        &mut self,
        workspace_id: &str,
        requests: Vec<NewMapping>,
    ) -> MappingResult<BulkCreateResult> {
        let mut result = BulkCreateResult::default();
        for (index, request) in requests.into_iter().enumerate() {
            match self.create_mapping(workspace_id, request) {
                Ok(mapping) => {
                    result.created += 1;
                    result.mappings.push(mapping);
                }
                Err(err) => result.errors.push(BulkItemError {
                    index,
                    error: err.to_string(),
                }),
            }
        }
        Ok(result)
    }

    /// Delete what exists; ids that are already gone are not an error
    fn bulk_delete(&mut self, mapping_ids: &[String]) -> MappingResult<BulkDeleteResult> {
        let mut deleted = 0;
        for id in mapping_ids {
            match self.delete_mapping(id) {
                Ok(()) => deleted += 1,
                Err(MappingError::MappingNotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(BulkDeleteResult {
            deleted,
            requested: mapping_ids.len(),
        })
    }
}

// ============================================================================
// IN-MEMORY ADAPTER
// ============================================================================

/// Which operation an injected failure applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListAccounts,
    ListMappings,
    Create,
    Update,
    Delete,
    Validate,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    sources: Vec<Account>,
    targets: Vec<Account>,
    /// workspace id → mappings in insertion order
    mappings: HashMap<String, Vec<Mapping>>,
    providers: HashMap<String, Option<String>>,
    failures: HashMap<Operation, String>,
}

impl InMemoryRepository {
    pub fn new(sources: Vec<Account>, targets: Vec<Account>) -> Self {
        InMemoryRepository {
            sources,
            targets,
            ..Default::default()
        }
    }

    /// Seed stored mappings directly
    pub fn with_mappings(mut self, workspace_id: &str, mappings: Vec<Mapping>) -> Self {
        self.mappings.insert(workspace_id.to_string(), mappings);
        self
    }

    /// Make every call of `operation` fail until `heal` is called
    pub fn fail(&mut self, operation: Operation, message: &str) {
        self.failures.insert(operation, message.to_string());
    }

    pub fn heal(&mut self) {
        self.failures.clear();
    }

    pub fn stored(&self, workspace_id: &str) -> &[Mapping] {
        self.mappings
            .get(workspace_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn check(&self, operation: Operation) -> MappingResult<()> {
        match self.failures.get(&operation) {
            None => Ok(()),
            Some(message) => match operation {
                Operation::ListAccounts | Operation::ListMappings => {
                    Err(MappingError::Load(message.clone()))
                }
                Operation::Create | Operation::Update | Operation::Delete | Operation::Validate => {
                    Err(MappingError::Persistence(message.clone()))
                }
            },
        }
    }

    fn find_mut(&mut self, mapping_id: &str) -> Option<&mut Mapping> {
        self.mappings
            .values_mut()
            .flat_map(|list| list.iter_mut())
            .find(|m| m.mapping_id == mapping_id)
    }

    fn provider_sources(&self, workspace_id: &str) -> Vec<Account> {
        let provider = self.providers.get(workspace_id).cloned().flatten();
        self.sources
            .iter()
            .filter(|a| provider.is_none() || a.provider == provider)
            .cloned()
            .collect()
    }
}

impl MappingRepository for InMemoryRepository {
    fn register_workspace(&mut self, workspace_id: &str, provider: Option<&str>) -> MappingResult<()> {
        self.providers
            .insert(workspace_id.to_string(), provider.map(str::to_string));
        Ok(())
    }

    fn list_source_accounts(&self, provider: Option<&str>) -> MappingResult<Vec<Account>> {
        self.check(Operation::ListAccounts)?;
        Ok(self
            .sources
            .iter()
            .filter(|a| provider.is_none() || a.provider.as_deref() == provider)
            .cloned()
            .collect())
    }

    fn list_target_accounts(&self, section: Option<LedgerSection>) -> MappingResult<Vec<Account>> {
        self.check(Operation::ListAccounts)?;
        Ok(self
            .targets
            .iter()
            .filter(|a| section.map_or(true, |s| a.ledger_section == s))
            .cloned()
            .collect())
    }

    fn list_mappings(
        &self,
        workspace_id: &str,
        status: Option<MappingStatus>,
        provider: Option<&str>,
    ) -> MappingResult<Vec<Mapping>> {
        self.check(Operation::ListMappings)?;
        let mut list: Vec<Mapping> = self
            .stored(workspace_id)
            .iter()
            .filter(|m| status.map_or(true, |s| m.status == s))
            .filter(|m| provider.is_none() || m.source_provider.as_deref() == provider)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.source_account_number.cmp(&b.source_account_number));
        Ok(list)
    }

    fn create_mapping(&mut self, workspace_id: &str, request: NewMapping) -> MappingResult<Mapping> {
        self.check(Operation::Create)?;
        let source = self
            .sources
            .iter()
            .find(|a| a.account_number == request.source_account_number)
            .ok_or_else(|| MappingError::AccountNotFound {
                side: AccountSide::Source,
                account_number: request.source_account_number.clone(),
            })?;
        let target = self
            .targets
            .iter()
            .find(|a| a.account_number == request.target_account_number)
            .ok_or_else(|| MappingError::AccountNotFound {
                side: AccountSide::Target,
                account_number: request.target_account_number.clone(),
            })?;

        let mapping = request.into_mapping(source, target);
        self.mappings
            .entry(workspace_id.to_string())
            .or_default()
            .push(mapping.clone());
        Ok(mapping)
    }

    fn update_mapping(&mut self, mapping_id: &str, patch: &MappingPatch) -> MappingResult<Mapping> {
        self.check(Operation::Update)?;
        let mapping = self
            .find_mut(mapping_id)
            .ok_or_else(|| MappingError::MappingNotFound(mapping_id.to_string()))?;
        patch.apply_to(mapping);
        if patch.updated_at.is_none() {
            mapping.updated_at = Utc::now();
        }
        Ok(mapping.clone())
    }

    fn delete_mapping(&mut self, mapping_id: &str) -> MappingResult<()> {
        self.check(Operation::Delete)?;
        for list in self.mappings.values_mut() {
            if let Some(pos) = list.iter().position(|m| m.mapping_id == mapping_id) {
                list.remove(pos);
                return Ok(());
            }
        }
        Err(MappingError::MappingNotFound(mapping_id.to_string()))
    }

    fn validate_mappings(&self, workspace_id: &str) -> MappingResult<ValidationReport> {
        self.check(Operation::Validate)?;
        Ok(validation::validate(
            self.stored(workspace_id),
            &self.provider_sources(workspace_id),
        ))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> InMemoryRepository {
        InMemoryRepository::new(
            vec![
                Account::new("1000", "Cash", LedgerSection::Assets).with_provider("STATE_STREET"),
                Account::new("2000", "Payables", LedgerSection::Liabilities).with_provider("BNY"),
            ],
            vec![
                Account::new("A-100", "Cash at bank", LedgerSection::Assets),
                Account::new("L-200", "Accounts payable", LedgerSection::Liabilities),
            ],
        )
    }

    fn request(source: &str, target: &str) -> NewMapping {
        NewMapping::from_mapping(&Mapping::new(&Mapping::generate_id(source), source, target, "tester"))
    }

    #[test]
    fn test_create_fills_denormalized_fields() {
        let mut repo = repo();
        let created = repo.create_mapping("ws", request("1000", "A-100")).unwrap();
        assert_eq!(created.source_description, "Cash");
        assert_eq!(created.target_description, "Cash at bank");
        assert_eq!(created.source_section, Some(LedgerSection::Assets));
        assert_eq!(created.source_provider.as_deref(), Some("STATE_STREET"));
        assert_eq!(repo.stored("ws").len(), 1);
    }

    #[test]
    fn test_create_keeps_client_id_or_mints_one() {
        let mut repo = repo();
        let mut req = request("1000", "A-100");
        req.mapping_id = Some("MAP-client".to_string());
        assert_eq!(repo.create_mapping("ws", req).unwrap().mapping_id, "MAP-client");

        let mut req = request("2000", "L-200");
        req.mapping_id = None;
        assert!(repo
            .create_mapping("ws", req)
            .unwrap()
            .mapping_id
            .starts_with("MAP-"));
    }

    #[test]
    fn test_create_unknown_account_is_rejected() {
        let mut repo = repo();
        let err = repo.create_mapping("ws", request("9999", "A-100")).unwrap_err();
        assert!(matches!(err, MappingError::AccountNotFound { side: AccountSide::Source, .. }));
    }

    #[test]
    fn test_list_filters() {
        let mut repo = repo();
        repo.create_mapping("ws", request("2000", "L-200")).unwrap();
        repo.create_mapping("ws", request("1000", "A-100")).unwrap();
        repo.create_mapping("other", request("1000", "L-200")).unwrap();

        let all = repo.list_mappings("ws", None, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].source_account_number, "1000");

        let bny = repo.list_mappings("ws", None, Some("BNY")).unwrap();
        assert_eq!(bny.len(), 1);
        assert!(repo
            .list_mappings("ws", Some(MappingStatus::Active), None)
            .unwrap()
            .is_empty());

        assert_eq!(repo.list_source_accounts(Some("BNY")).unwrap().len(), 1);
        assert_eq!(
            repo.list_target_accounts(Some(LedgerSection::Assets)).unwrap()[0].account_number,
            "A-100"
        );
    }

    #[test]
    fn test_update_and_delete() {
        let mut repo = repo();
        let created = repo.create_mapping("ws", request("1000", "A-100")).unwrap();
        let updated = repo
            .update_mapping(&created.mapping_id, &MappingPatch::status(MappingStatus::Active))
            .unwrap();
        assert_eq!(updated.status, MappingStatus::Active);

        repo.delete_mapping(&created.mapping_id).unwrap();
        assert!(matches!(
            repo.delete_mapping(&created.mapping_id),
            Err(MappingError::MappingNotFound(_))
        ));
    }

    #[test]
    fn test_bulk_operations() {
        let mut repo = repo();
        let result = repo
            .bulk_create(
                "ws",
                vec![request("1000", "A-100"), request("9999", "A-100"), request("2000", "L-200")],
            )
            .unwrap();
        assert_eq!(result.created, 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].index, 1);

        let mut ids: Vec<String> = result.mappings.iter().map(|m| m.mapping_id.clone()).collect();
        ids.push("MAP-missing".to_string());
        let deleted = repo.bulk_delete(&ids).unwrap();
        assert_eq!(deleted, BulkDeleteResult { deleted: 2, requested: 3 });
    }

    #[test]
    fn test_validate_uses_workspace_provider() {
        let mut repo = repo();
        repo.register_workspace("ws", Some("STATE_STREET")).unwrap();
        repo.create_mapping("ws", request("1000", "A-100")).unwrap();
        let report = repo.validate_mappings("ws").unwrap();
        assert!(report.is_valid);
        // 2000 belongs to another provider
        assert!(report.warnings.is_empty());

        repo.register_workspace("ws", None).unwrap();
        assert_eq!(repo.validate_mappings("ws").unwrap().warnings.len(), 1);
    }

    #[test]
    fn test_injected_failures_are_classified() {
        let mut repo = repo();
        repo.fail(Operation::ListAccounts, "offline");
        repo.fail(Operation::Create, "timeout");
        assert!(matches!(repo.list_source_accounts(None), Err(MappingError::Load(_))));
        assert!(matches!(
            repo.create_mapping("ws", request("1000", "A-100")),
            Err(MappingError::Persistence(_))
        ));
        repo.heal();
        assert!(repo.list_source_accounts(None).is_ok());
    }
}
