// 📒 Account Entity - One row of a chart of accounts
//
// "Account number is IDENTITY (unique within its side), everything else is a VALUE"
//
// Accounts arrive once per provider/session from the reference collaborator
// and are never mutated by the workspace:
// - Source side: the incumbent chart being migrated from
// - Target side: the chart being migrated to
// - Ledger section drives the section filter and the mismatch warning

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// LEDGER SECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerSection {
    Assets,
    Liabilities,
    Equity,
    Income,
    Expense,
}

impl LedgerSection {
    pub const ALL: [LedgerSection; 5] = [
        LedgerSection::Assets,
        LedgerSection::Liabilities,
        LedgerSection::Equity,
        LedgerSection::Income,
        LedgerSection::Expense,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerSection::Assets => "ASSETS",
            LedgerSection::Liabilities => "LIABILITIES",
            LedgerSection::Equity => "EQUITY",
            LedgerSection::Income => "INCOME",
            LedgerSection::Expense => "EXPENSE",
        }
    }

    /// Parse a section label (case-insensitive, tolerates singular/plural)
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_uppercase().as_str() {
            "ASSETS" | "ASSET" => Some(LedgerSection::Assets),
            "LIABILITIES" | "LIABILITY" => Some(LedgerSection::Liabilities),
            "EQUITY" => Some(LedgerSection::Equity),
            "INCOME" | "REVENUE" => Some(LedgerSection::Income),
            "EXPENSE" | "EXPENSES" => Some(LedgerSection::Expense),
            _ => None,
        }
    }
}

impl fmt::Display for LedgerSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ACCOUNT SIDE
// ============================================================================

/// Which chart of accounts an item belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountSide {
    Source,
    Target,
}

impl AccountSide {
    pub fn opposite(&self) -> Self {
        match self {
            AccountSide::Source => AccountSide::Target,
            AccountSide::Target => AccountSide::Source,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountSide::Source => "source",
            AccountSide::Target => "target",
        }
    }
}

impl fmt::Display for AccountSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ACCOUNT ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Identity within its side (e.g. "1001", "A-100-01")
    pub account_number: String,

    /// Human label (e.g. "Cash at Bank - USD")
    pub description: String,

    pub ledger_section: LedgerSection,

    /// Source-side provider (e.g. "STATE_STREET"); target accounts usually have none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Account {
    pub fn new(account_number: &str, description: &str, ledger_section: LedgerSection) -> Self {
        Account {
            account_number: account_number.to_string(),
            description: description.to_string(),
            ledger_section,
            provider: None,
            category: None,
        }
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    /// Case-insensitive substring match against number + description.
    /// Empty needle matches everything.
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.account_number.to_lowercase().contains(&needle)
            || self.description.to_lowercase().contains(&needle)
    }

    /// "1001 - Cash at Bank"
    pub fn label(&self) -> String {
        format!("{} - {}", self.account_number, self.description)
    }
}

// ============================================================================
// ACCOUNT CATALOG
// ============================================================================

/// Read-only reference list for one side, indexed by account number.
///
/// Order is preserved as loaded (the collaborator sorts by account number).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountCatalog {
    accounts: Vec<Account>,
    index: HashMap<String, usize>,
}

impl AccountCatalog {
    pub fn new(accounts: Vec<Account>) -> Self {
        let mut catalog = AccountCatalog::default();
        for account in accounts {
            // First occurrence wins; account numbers are unique per side
            if catalog.index.contains_key(&account.account_number) {
                continue;
            }
            catalog
                .index
                .insert(account.account_number.clone(), catalog.accounts.len());
            catalog.accounts.push(account);
        }
        catalog
    }

    pub fn get(&self, account_number: &str) -> Option<&Account> {
        self.index.get(account_number).map(|&i| &self.accounts[i])
    }

    pub fn contains(&self, account_number: &str) -> bool {
        self.index.contains_key(account_number)
    }

    pub fn all(&self) -> &[Account] {
        &self.accounts
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.iter()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn by_section(&self, section: LedgerSection) -> Vec<&Account> {
        self.accounts
            .iter()
            .filter(|a| a.ledger_section == section)
            .collect()
    }

    pub fn by_provider(&self, provider: &str) -> Vec<&Account> {
        self.accounts
            .iter()
            .filter(|a| a.provider.as_deref() == Some(provider))
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
