use crate::entities::{
    Account, AccountSide, Cardinality, LedgerSection, Mapping, MappingPatch, MappingShape,
    MappingStatus,
};
use crate::error::{MappingError, MappingResult};
use crate::persistence::{MappingRepository, NewMapping};
use crate::validation::{self, ValidationReport};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One row of a chart-of-accounts CSV export
/// Header: account_number,description,ledger_section,provider,category
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AccountRow {
    pub account_number: String,
    pub description: String,
    pub ledger_section: String,

    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default)]
    pub category: Option<String>,
}

impl AccountRow {
    pub fn into_account(self) -> Result<Account> {
        let section = LedgerSection::parse(&self.ledger_section).ok_or_else(|| {
            anyhow!(
                "unknown ledger section '{}' for account {}",
                self.ledger_section,
                self.account_number
            )
        })?;
        Ok(Account {
            account_number: self.account_number.trim().to_string(),
            description: self.description.trim().to_string(),
            ledger_section: section,
            provider: non_empty(self.provider),
            category: non_empty(self.category),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Event for audit trail ("every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Reference Accounts (both charts, keyed by side)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts (
            side TEXT NOT NULL,
            account_number TEXT NOT NULL,
            description TEXT NOT NULL,
            ledger_section TEXT NOT NULL,
            provider TEXT,
            category TEXT,
            PRIMARY KEY (side, account_number)
        )",
        [],
    )?;

    // ==========================================================================
    // Workspaces (provider the source chart is filtered by)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS workspaces (
            workspace_id TEXT PRIMARY KEY,
            provider TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Mappings (denormalized account details, one row per connector)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS mappings (
            mapping_id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            source_account_number TEXT NOT NULL,
            source_description TEXT NOT NULL,
            source_section TEXT,
            source_provider TEXT,
            target_account_number TEXT NOT NULL,
            target_description TEXT NOT NULL,
            target_section TEXT,
            cardinality TEXT NOT NULL,
            group_id TEXT,
            split_weight REAL NOT NULL,
            status TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            effective_date TEXT,
            UNIQUE (workspace_id, source_account_number, target_account_number)
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mappings_workspace ON mappings(workspace_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_accounts_provider ON accounts(provider)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    Ok(())
}

pub fn load_accounts_csv(csv_path: &Path) -> Result<Vec<Account>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file {}", csv_path.display()))?;

    let mut accounts = Vec::new();

    for (line, result) in rdr.deserialize().enumerate() {
        let row: AccountRow =
            result.with_context(|| format!("Failed to deserialize account on row {}", line + 2))?;
        accounts.push(row.into_account()?);
    }

    Ok(accounts)
}

/// Upsert reference accounts for one side; returns rows written
pub fn insert_accounts(conn: &mut Connection, side: AccountSide, accounts: &[Account]) -> Result<usize> {
    let tx = conn.transaction()?;
    let mut written = 0;

    for account in accounts {
        written += tx.execute(
            "INSERT INTO accounts (side, account_number, description, ledger_section, provider, category)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(side, account_number) DO UPDATE SET
                description = excluded.description,
                ledger_section = excluded.ledger_section,
                provider = excluded.provider,
                category = excluded.category",
            params![
                side.as_str(),
                account.account_number,
                account.description,
                account.ledger_section.as_str(),
                account.provider,
                account.category,
            ],
        )?;
    }

    tx.commit()?;
    log::info!("accounts imported side={} rows={}", side, written);
    Ok(written)
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id ASC",
    )?;

    let raw = stmt
        .query_map(params![entity_type, entity_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(
            |(event_id, timestamp, event_type, entity_type, entity_id, data, actor)| -> Result<Event> {
                Ok(Event {
                    event_id,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp)
                        .with_context(|| format!("Bad event timestamp '{}'", timestamp))?
                        .with_timezone(&Utc),
                    event_type,
                    entity_type,
                    entity_id,
                    data: serde_json::from_str(&data).context("Bad event payload")?,
                    actor,
                })
            },
        )
        .collect()
}

// ============================================================================
// MAPPING ROWS
// ============================================================================

const MAPPING_COLUMNS: &str = "mapping_id, source_account_number, source_description, source_section,
    source_provider, target_account_number, target_description, target_section, cardinality,
    group_id, split_weight, status, created_by, created_at, updated_at, effective_date";

/// Raw column values, decoded outside the rusqlite row closure
struct MappingRow {
    mapping_id: String,
    source_account_number: String,
    source_description: String,
    source_section: Option<String>,
    source_provider: Option<String>,
    target_account_number: String,
    target_description: String,
    target_section: Option<String>,
    cardinality: String,
    group_id: Option<String>,
    split_weight: f64,
    status: String,
    created_by: String,
    created_at: String,
    updated_at: String,
    effective_date: Option<String>,
}

impl MappingRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(MappingRow {
            mapping_id: row.get(0)?,
            source_account_number: row.get(1)?,
            source_description: row.get(2)?,
            source_section: row.get(3)?,
            source_provider: row.get(4)?,
            target_account_number: row.get(5)?,
            target_description: row.get(6)?,
            target_section: row.get(7)?,
            cardinality: row.get(8)?,
            group_id: row.get(9)?,
            split_weight: row.get(10)?,
            status: row.get(11)?,
            created_by: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
            effective_date: row.get(15)?,
        })
    }

    fn decode(self) -> Result<Mapping> {
        let cardinality = Cardinality::parse(&self.cardinality)
            .ok_or_else(|| anyhow!("unknown cardinality '{}'", self.cardinality))?;
        let status = MappingStatus::parse(&self.status)
            .ok_or_else(|| anyhow!("unknown status '{}'", self.status))?;
        let effective_date = self
            .effective_date
            .as_deref()
            .map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d"))
            .transpose()
            .context("Bad effective date")?;

        Ok(Mapping {
            source_section: self.source_section.as_deref().and_then(LedgerSection::parse),
            target_section: self.target_section.as_deref().and_then(LedgerSection::parse),
            shape: MappingShape::from_parts(cardinality, self.group_id),
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            mapping_id: self.mapping_id,
            source_account_number: self.source_account_number,
            source_description: self.source_description,
            source_provider: self.source_provider,
            target_account_number: self.target_account_number,
            target_description: self.target_description,
            split_weight: self.split_weight,
            status,
            created_by: self.created_by,
            effective_date,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Bad timestamp '{}'", value))?
        .with_timezone(&Utc))
}

fn read_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, Option<String>, Option<String>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_account(
    (account_number, description, section, provider, category): (
        String,
        String,
        String,
        Option<String>,
        Option<String>,
    ),
) -> Result<Account> {
    let ledger_section = LedgerSection::parse(&section)
        .ok_or_else(|| anyhow!("unknown ledger section '{}'", section))?;
    Ok(Account {
        account_number,
        description,
        ledger_section,
        provider,
        category,
    })
}

// ============================================================================
// SQLITE REPOSITORY
// ============================================================================

/// Durable `MappingRepository` over a single SQLite file
pub struct SqliteRepository {
    conn: Connection,
    /// Recorded on audit events
    actor: String,
}

impl SqliteRepository {
    pub fn open(path: &Path, actor: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Self::from_connection(conn, actor)
    }

    pub fn open_in_memory(actor: &str) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, actor)
    }

    fn from_connection(conn: Connection, actor: &str) -> Result<Self> {
        setup_database(&conn)?;
        Ok(SqliteRepository {
            conn,
            actor: actor.to_string(),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Load a chart-of-accounts CSV into one side of the reference tables
    pub fn import_accounts(&mut self, side: AccountSide, csv_path: &Path) -> Result<usize> {
        let accounts = load_accounts_csv(csv_path)?;
        insert_accounts(&mut self.conn, side, &accounts)
    }

    pub fn add_accounts(&mut self, side: AccountSide, accounts: &[Account]) -> Result<usize> {
        insert_accounts(&mut self.conn, side, accounts)
    }

    pub fn events_for_mapping(&self, mapping_id: &str) -> Result<Vec<Event>> {
        get_events_for_entity(&self.conn, "mapping", mapping_id)
    }

    fn accounts(&self, side: AccountSide, provider: Option<&str>, section: Option<LedgerSection>) -> Result<Vec<Account>> {
        let mut stmt = self.conn.prepare(
            "SELECT account_number, description, ledger_section, provider, category
             FROM accounts
             WHERE side = ?1
               AND (?2 IS NULL OR provider = ?2)
               AND (?3 IS NULL OR ledger_section = ?3)
             ORDER BY account_number",
        )?;
        let rows = stmt
            .query_map(
                params![side.as_str(), provider, section.map(|s| s.as_str())],
                read_account,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(decode_account).collect()
    }

    fn account(&self, side: AccountSide, account_number: &str) -> Result<Option<Account>> {
        let row = self
            .conn
            .query_row(
                "SELECT account_number, description, ledger_section, provider, category
                 FROM accounts WHERE side = ?1 AND account_number = ?2",
                params![side.as_str(), account_number],
                read_account,
            )
            .optional()?;
        row.map(decode_account).transpose()
    }

    fn mappings(
        &self,
        workspace_id: &str,
        status: Option<MappingStatus>,
        provider: Option<&str>,
    ) -> Result<Vec<Mapping>> {
        let sql = format!(
            "SELECT {} FROM mappings
             WHERE workspace_id = ?1
               AND (?2 IS NULL OR status = ?2)
               AND (?3 IS NULL OR source_provider = ?3)
             ORDER BY source_account_number, created_at",
            MAPPING_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![workspace_id, status.map(|s| s.as_str()), provider],
                MappingRow::read,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(MappingRow::decode).collect()
    }

    fn mapping(&self, mapping_id: &str) -> Result<Option<Mapping>> {
        let sql = format!("SELECT {} FROM mappings WHERE mapping_id = ?1", MAPPING_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![mapping_id], MappingRow::read)
            .optional()?;
        row.map(MappingRow::decode).transpose()
    }

    fn workspace_provider(&self, workspace_id: &str) -> Result<Option<String>> {
        let provider: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT provider FROM workspaces WHERE workspace_id = ?1",
                params![workspace_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(provider.flatten())
    }

    fn record(&self, event_type: &str, mapping: &Mapping) {
        let event = Event::new(
            event_type,
            "mapping",
            &mapping.mapping_id,
            serde_json::json!({
                "source": mapping.source_account_number,
                "target": mapping.target_account_number,
                "cardinality": mapping.cardinality().as_str(),
                "splitWeight": mapping.split_weight,
                "status": mapping.status.as_str(),
            }),
            &self.actor,
        );
        // Audit is best-effort; the mutation already committed
        if let Err(err) = insert_event(&self.conn, &event) {
            log::warn!("audit event dropped mapping={} err={:#}", mapping.mapping_id, err);
        }
    }

    fn insert_mapping(&self, workspace_id: &str, mapping: &Mapping) -> rusqlite::Result<usize> {
        self.conn.execute(
            "INSERT INTO mappings (
                mapping_id, workspace_id, source_account_number, source_description,
                source_section, source_provider, target_account_number, target_description,
                target_section, cardinality, group_id, split_weight, status, created_by,
                created_at, updated_at, effective_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                mapping.mapping_id,
                workspace_id,
                mapping.source_account_number,
                mapping.source_description,
                mapping.source_section.map(|s| s.as_str()),
                mapping.source_provider,
                mapping.target_account_number,
                mapping.target_description,
                mapping.target_section.map(|s| s.as_str()),
                mapping.cardinality().as_str(),
                mapping.group_id(),
                mapping.split_weight,
                mapping.status.as_str(),
                mapping.created_by,
                mapping.created_at.to_rfc3339(),
                mapping.updated_at.to_rfc3339(),
                mapping.effective_date.map(|d| d.format("%Y-%m-%d").to_string()),
            ],
        )
    }
}

fn load_error(err: anyhow::Error) -> MappingError {
    MappingError::Load(format!("{:#}", err))
}

impl MappingRepository for SqliteRepository {
    fn register_workspace(&mut self, workspace_id: &str, provider: Option<&str>) -> MappingResult<()> {
        self.conn
            .execute(
                "INSERT INTO workspaces (workspace_id, provider) VALUES (?1, ?2)
                 ON CONFLICT(workspace_id) DO UPDATE SET provider = excluded.provider",
                params![workspace_id, provider],
            )
            .context("Failed to register workspace")?;
        Ok(())
    }

    fn list_source_accounts(&self, provider: Option<&str>) -> MappingResult<Vec<Account>> {
        self.accounts(AccountSide::Source, provider, None)
            .map_err(load_error)
    }

    fn list_target_accounts(&self, section: Option<LedgerSection>) -> MappingResult<Vec<Account>> {
        self.accounts(AccountSide::Target, None, section)
            .map_err(load_error)
    }

    fn list_mappings(
        &self,
        workspace_id: &str,
        status: Option<MappingStatus>,
        provider: Option<&str>,
    ) -> MappingResult<Vec<Mapping>> {
        self.mappings(workspace_id, status, provider)
            .map_err(load_error)
    }

    fn create_mapping(&mut self, workspace_id: &str, request: NewMapping) -> MappingResult<Mapping> {
        let source = self
            .account(AccountSide::Source, &request.source_account_number)?
            .ok_or_else(|| MappingError::AccountNotFound {
                side: AccountSide::Source,
                account_number: request.source_account_number.clone(),
            })?;
        let target = self
            .account(AccountSide::Target, &request.target_account_number)?
            .ok_or_else(|| MappingError::AccountNotFound {
                side: AccountSide::Target,
                account_number: request.target_account_number.clone(),
            })?;

        let mapping = request.into_mapping(&source, &target);
        match self.insert_mapping(workspace_id, &mapping) {
            Ok(_) => {
                self.record("mapping_created", &mapping);
                Ok(mapping)
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(MappingError::DuplicateMapping {
                    source_account: mapping.source_account_number,
                    target_account: mapping.target_account_number,
                })
            }
            Err(e) => Err(anyhow::Error::from(e).context("Failed to insert mapping").into()),
        }
    }

    fn update_mapping(&mut self, mapping_id: &str, patch: &MappingPatch) -> MappingResult<Mapping> {
        let mut mapping = self
            .mapping(mapping_id)?
            .ok_or_else(|| MappingError::MappingNotFound(mapping_id.to_string()))?;
        patch.apply_to(&mut mapping);
        if patch.updated_at.is_none() {
            mapping.updated_at = Utc::now();
        }

        self.conn
            .execute(
                "UPDATE mappings SET
                    cardinality = ?2, group_id = ?3, split_weight = ?4, status = ?5,
                    effective_date = ?6, updated_at = ?7
                 WHERE mapping_id = ?1",
                params![
                    mapping.mapping_id,
                    mapping.cardinality().as_str(),
                    mapping.group_id(),
                    mapping.split_weight,
                    mapping.status.as_str(),
                    mapping.effective_date.map(|d| d.format("%Y-%m-%d").to_string()),
                    mapping.updated_at.to_rfc3339(),
                ],
            )
            .context("Failed to update mapping")?;

        self.record("mapping_updated", &mapping);
        Ok(mapping)
    }

    fn delete_mapping(&mut self, mapping_id: &str) -> MappingResult<()> {
        let mapping = self
            .mapping(mapping_id)?
            .ok_or_else(|| MappingError::MappingNotFound(mapping_id.to_string()))?;

        self.conn
            .execute("DELETE FROM mappings WHERE mapping_id = ?1", params![mapping_id])
            .context("Failed to delete mapping")?;

        self.record("mapping_deleted", &mapping);
        Ok(())
    }

    fn validate_mappings(&self, workspace_id: &str) -> MappingResult<ValidationReport> {
        let mappings = self.mappings(workspace_id, None, None)?;
        let provider = self.workspace_provider(workspace_id)?;
        let sources = self.accounts(AccountSide::Source, provider.as_deref(), None)?;
        let report = validation::validate(&mappings, &sources);
        log::info!(
            "validated workspace={} mappings={} errors={} warnings={}",
            workspace_id,
            report.mapping_count,
            report.errors.len(),
            report.warnings.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn seeded() -> SqliteRepository {
        let mut repo = SqliteRepository::open_in_memory("tester").unwrap();
        repo.add_accounts(
            AccountSide::Source,
            &[
                Account::new("1000", "Cash", LedgerSection::Assets).with_provider("STATE_STREET"),
                Account::new("1100", "Receivables", LedgerSection::Assets).with_provider("STATE_STREET"),
                Account::new("5000", "Custody fees", LedgerSection::Expense).with_provider("BNY"),
            ],
        )
        .unwrap();
        repo.add_accounts(
            AccountSide::Target,
            &[
                Account::new("A-100", "Cash at bank", LedgerSection::Assets),
                Account::new("A-110", "Cash in transit", LedgerSection::Assets),
                Account::new("X-500", "Fees", LedgerSection::Expense),
            ],
        )
        .unwrap();
        repo
    }

    fn request(source: &str, target: &str) -> NewMapping {
        NewMapping::from_mapping(&Mapping::new(&Mapping::generate_id(source), source, target, "tester"))
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();
    }

    #[test]
    fn test_accounts_filtered_by_provider_and_section() {
        let repo = seeded();
        assert_eq!(repo.list_source_accounts(None).unwrap().len(), 3);
        let ss = repo.list_source_accounts(Some("STATE_STREET")).unwrap();
        assert_eq!(ss.len(), 2);
        assert_eq!(ss[0].account_number, "1000");

        let expense = repo.list_target_accounts(Some(LedgerSection::Expense)).unwrap();
        assert_eq!(expense.len(), 1);
        assert_eq!(expense[0].description, "Fees");
    }

    #[test]
    fn test_account_import_upserts() {
        let mut repo = seeded();
        repo.add_accounts(
            AccountSide::Target,
            &[Account::new("A-100", "Cash at bank (USD)", LedgerSection::Assets)],
        )
        .unwrap();
        let targets = repo.list_target_accounts(None).unwrap();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].description, "Cash at bank (USD)");
    }

    #[test]
    fn test_create_round_trips_through_sqlite() {
        let mut repo = seeded();
        let mut req = request("1000", "A-100");
        req.shape = MappingShape::OneToMany {
            group_id: "GRP-0001".to_string(),
        };
        req.split_weight = 0.5;
        req.effective_date = NaiveDate::from_ymd_opt(2024, 1, 31);
        let created = repo.create_mapping("ws", req).unwrap();

        let listed = repo.list_mappings("ws", None, None).unwrap();
        assert_eq!(listed.len(), 1);
        let stored = &listed[0];
        assert_eq!(stored.mapping_id, created.mapping_id);
        assert_eq!(stored.shape, created.shape);
        assert_eq!(stored.split_weight, 0.5);
        assert_eq!(stored.source_description, "Cash");
        assert_eq!(stored.target_section, Some(LedgerSection::Assets));
        assert_eq!(stored.source_provider.as_deref(), Some("STATE_STREET"));
        assert_eq!(stored.effective_date, NaiveDate::from_ymd_opt(2024, 1, 31));
    }

    #[test]
    fn test_duplicate_pair_is_rejected() {
        let mut repo = seeded();
        repo.create_mapping("ws", request("1000", "A-100")).unwrap();
        let err = repo.create_mapping("ws", request("1000", "A-100")).unwrap_err();
        assert!(matches!(err, MappingError::DuplicateMapping { .. }));

        // Same pair in another workspace is fine
        assert!(repo.create_mapping("other", request("1000", "A-100")).is_ok());
    }

    #[test]
    fn test_unknown_account_is_rejected() {
        let mut repo = seeded();
        let err = repo.create_mapping("ws", request("1000", "Z-999")).unwrap_err();
        assert!(matches!(
            err,
            MappingError::AccountNotFound {
                side: AccountSide::Target,
                ..
            }
        ));
    }

    #[test]
    fn test_update_delete_and_audit_trail() {
        let mut repo = seeded();
        let created = repo.create_mapping("ws", request("1000", "A-100")).unwrap();
        let id = created.mapping_id.clone();

        let updated = repo
            .update_mapping(&id, &MappingPatch::status(MappingStatus::Active))
            .unwrap();
        assert_eq!(updated.status, MappingStatus::Active);
        assert_eq!(
            repo.list_mappings("ws", Some(MappingStatus::Active), None)
                .unwrap()
                .len(),
            1
        );

        repo.delete_mapping(&id).unwrap();
        assert!(repo.list_mappings("ws", None, None).unwrap().is_empty());
        assert!(matches!(
            repo.delete_mapping(&id),
            Err(MappingError::MappingNotFound(_))
        ));

        let events: Vec<String> = repo
            .events_for_mapping(&id)
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(events, vec!["mapping_created", "mapping_updated", "mapping_deleted"]);
    }

    #[test]
    fn test_validate_against_workspace_provider() {
        let mut repo = seeded();
        repo.register_workspace("ws", Some("STATE_STREET")).unwrap();
        repo.create_mapping("ws", request("1000", "X-500")).unwrap();

        let report = repo.validate_mappings("ws").unwrap();
        assert!(report.is_valid);
        assert_eq!(report.mapping_count, 1);
        // 1100 unmapped + ASSETS → EXPENSE mismatch
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings[0].message.starts_with("1 "));
    }

    #[test]
    fn test_bulk_delete_counts() {
        let mut repo = seeded();
        let a = repo.create_mapping("ws", request("1000", "A-100")).unwrap();
        let b = repo.create_mapping("ws", request("1100", "A-110")).unwrap();
        let result = repo
            .bulk_delete(&[a.mapping_id, b.mapping_id, "MAP-gone".to_string()])
            .unwrap();
        assert_eq!(result.deleted, 2);
        assert_eq!(result.requested, 3);
    }

    #[test]
    fn test_load_accounts_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "account_number,description,ledger_section,provider,category").unwrap();
        writeln!(file, "1000,Cash,ASSETS,STATE_STREET,cash").unwrap();
        writeln!(file, "2000,\"Payables, trade\",liability,,").unwrap();
        file.flush().unwrap();

        let accounts = load_accounts_csv(file.path()).unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].provider.as_deref(), Some("STATE_STREET"));
        assert_eq!(accounts[1].description, "Payables, trade");
        assert_eq!(accounts[1].ledger_section, LedgerSection::Liabilities);
        assert!(accounts[1].provider.is_none());
    }

    #[test]
    fn test_load_accounts_csv_rejects_unknown_section() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "account_number,description,ledger_section,provider,category").unwrap();
        writeln!(file, "1000,Cash,OFF_BALANCE,,").unwrap();
        file.flush().unwrap();
        assert!(load_accounts_csv(file.path()).is_err());
    }

    #[test]
    fn test_event_log() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let event = Event::new(
            "test_event",
            "mapping",
            "MAP-1",
            serde_json::json!({"test": "data"}),
            "test_actor",
        );

        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "mapping", "MAP-1").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "test_event");
        assert_eq!(events[0].actor, "test_actor");
    }
}
