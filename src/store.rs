// 🗃️ Mapping Store - The single workspace state tree and its transition function
//
// Every write to workspace state goes through `reduce(state, action)`:
// - total: every action is accepted, unknown ids are no-ops
// - deterministic: same state + same action → same result
// - never fails: there is no error path out of a transition
//
// Filtering, mapped-sets and visibility are computed on demand from the
// current tree, never stored.

use crate::entities::{
    Account, AccountCatalog, AccountSide, LedgerSection, Mapping, MappingPatch, PendingChange,
};
use std::collections::{BTreeSet, HashSet};

// ============================================================================
// REFERENCE DATA
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceData {
    pub sources: AccountCatalog,
    pub targets: AccountCatalog,
}

impl ReferenceData {
    pub fn new(sources: Vec<Account>, targets: Vec<Account>) -> Self {
        ReferenceData {
            sources: AccountCatalog::new(sources),
            targets: AccountCatalog::new(targets),
        }
    }

    pub fn side(&self, side: AccountSide) -> &AccountCatalog {
        match side {
            AccountSide::Source => &self.sources,
            AccountSide::Target => &self.targets,
        }
    }
}

// ============================================================================
// FILTERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SectionFilter {
    #[default]
    All,
    Only(LedgerSection),
}

impl SectionFilter {
    pub fn admits(&self, section: LedgerSection) -> bool {
        match self {
            SectionFilter::All => true,
            SectionFilter::Only(wanted) => *wanted == section,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SectionFilter::All => "ALL",
            SectionFilter::Only(section) => section.as_str(),
        }
    }
}

/// Mapped/unmapped exclusivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MappedFilter {
    #[default]
    Any,
    MappedOnly,
    UnmappedOnly,
}

impl MappedFilter {
    pub fn admits(&self, is_mapped: bool) -> bool {
        match self {
            MappedFilter::Any => true,
            MappedFilter::MappedOnly => is_mapped,
            MappedFilter::UnmappedOnly => !is_mapped,
        }
    }

    pub fn next(&self) -> Self {
        match self {
            MappedFilter::Any => MappedFilter::MappedOnly,
            MappedFilter::MappedOnly => MappedFilter::UnmappedOnly,
            MappedFilter::UnmappedOnly => MappedFilter::Any,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MappedFilter::Any => "all",
            MappedFilter::MappedOnly => "mapped",
            MappedFilter::UnmappedOnly => "unmapped",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideFilter {
    pub search: String,
    pub section: SectionFilter,
    pub mapped: MappedFilter,
}

impl SideFilter {
    pub fn admits(&self, account: &Account, is_mapped: bool) -> bool {
        account.matches_search(&self.search)
            && self.section.admits(account.ledger_section)
            && self.mapped.admits(is_mapped)
    }

    pub fn is_active(&self) -> bool {
        !self.search.trim().is_empty()
            || self.section != SectionFilter::All
            || self.mapped != MappedFilter::Any
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    pub source: SideFilter,
    pub target: SideFilter,
}

impl Filters {
    pub fn side(&self, side: AccountSide) -> &SideFilter {
        match side {
            AccountSide::Source => &self.source,
            AccountSide::Target => &self.target,
        }
    }

    fn side_mut(&mut self, side: AccountSide) -> &mut SideFilter {
        match side {
            AccountSide::Source => &mut self.source,
            AccountSide::Target => &mut self.target,
        }
    }
}

/// Partial filter update for one side; `None` leaves a field untouched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPatch {
    pub side: AccountSide,
    pub search: Option<String>,
    pub section: Option<SectionFilter>,
    pub mapped: Option<MappedFilter>,
}

impl FilterPatch {
    pub fn new(side: AccountSide) -> Self {
        FilterPatch {
            side,
            search: None,
            section: None,
            mapped: None,
        }
    }

    pub fn search(mut self, text: &str) -> Self {
        self.search = Some(text.to_string());
        self
    }

    pub fn section(mut self, section: SectionFilter) -> Self {
        self.section = Some(section);
        self
    }

    pub fn mapped(mut self, mapped: MappedFilter) -> Self {
        self.mapped = Some(mapped);
        self
    }
}

// ============================================================================
// SELECTION
// ============================================================================

/// Account selection and mapping focus are mutually exclusive by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Accounts {
        sources: BTreeSet<String>,
        targets: BTreeSet<String>,
    },
    Mapping(String),
}

impl Default for Selection {
    fn default() -> Self {
        Selection::Accounts {
            sources: BTreeSet::new(),
            targets: BTreeSet::new(),
        }
    }
}

impl Selection {
    pub fn focused_mapping(&self) -> Option<&str> {
        match self {
            Selection::Mapping(id) => Some(id),
            Selection::Accounts { .. } => None,
        }
    }

    pub fn selected(&self, side: AccountSide) -> Vec<&str> {
        match self {
            Selection::Accounts { sources, targets } => {
                let set = match side {
                    AccountSide::Source => sources,
                    AccountSide::Target => targets,
                };
                set.iter().map(String::as_str).collect()
            }
            Selection::Mapping(_) => Vec::new(),
        }
    }

    pub fn is_selected(&self, side: AccountSide, account_number: &str) -> bool {
        match self {
            Selection::Accounts { sources, targets } => match side {
                AccountSide::Source => sources.contains(account_number),
                AccountSide::Target => targets.contains(account_number),
            },
            Selection::Mapping(_) => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Selection::Accounts { sources, targets } => sources.is_empty() && targets.is_empty(),
            Selection::Mapping(_) => false,
        }
    }

    /// Click semantics, applied to one side:
    /// - plain click on the item that is selected alone → clear that side
    /// - plain click on anything else → that item alone
    /// - multi-select click → toggle membership, leave the rest alone
    ///
    /// Toggling an account always drops a mapping focus.
    fn toggle(self, side: AccountSide, account_number: &str, multi: bool) -> Selection {
        let (mut sources, mut targets) = match self {
            Selection::Accounts { sources, targets } => (sources, targets),
            Selection::Mapping(_) => (BTreeSet::new(), BTreeSet::new()),
        };
        let set = match side {
            AccountSide::Source => &mut sources,
            AccountSide::Target => &mut targets,
        };

        if multi {
            if !set.remove(account_number) {
                set.insert(account_number.to_string());
            }
        } else if set.len() == 1 && set.contains(account_number) {
            set.clear();
        } else {
            set.clear();
            set.insert(account_number.to_string());
        }

        Selection::Accounts { sources, targets }
    }
}

// ============================================================================
// STATE & ACTIONS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkspaceState {
    pub reference: ReferenceData,
    pub mappings: Vec<Mapping>,
    pub pending: Vec<PendingChange>,
    pub selection: Selection,
    pub filters: Filters,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ReplaceReferenceData {
        sources: Vec<Account>,
        targets: Vec<Account>,
    },
    ReplaceMappings(Vec<Mapping>),
    /// Insert, or replace the mapping with the same id in place
    UpsertMapping(Mapping),
    /// Insert at a position (clamped to the end); replaces in place if the id exists
    InsertMapping {
        index: usize,
        mapping: Mapping,
    },
    PatchMapping {
        mapping_id: String,
        patch: MappingPatch,
    },
    RemoveMapping(String),
    AppendPending(Vec<PendingChange>),
    /// Drop every pending change touching this mapping id
    RemovePending(String),
    ClearPending,
    ReplacePending(Vec<PendingChange>),
    ToggleSelection {
        side: AccountSide,
        account_number: String,
        multi: bool,
    },
    FocusMapping(String),
    Unfocus,
    ClearSelection,
    PatchFilters(FilterPatch),
    /// Several actions applied as one transition
    Batch(Vec<Action>),
}

/// The transition function.
pub fn reduce(mut state: WorkspaceState, action: Action) -> WorkspaceState {
    match action {
        Action::ReplaceReferenceData { sources, targets } => {
            state.reference = ReferenceData::new(sources, targets);
            state.selection = Selection::default();
        }
        Action::ReplaceMappings(mappings) => {
            state.mappings = mappings;
            if let Some(id) = state.selection.focused_mapping() {
                if !state.mappings.iter().any(|m| m.mapping_id == id) {
                    state.selection = Selection::default();
                }
            }
        }
        Action::UpsertMapping(mapping) => {
            match state
                .mappings
                .iter_mut()
                .find(|m| m.mapping_id == mapping.mapping_id)
            {
                Some(existing) => *existing = mapping,
                None => state.mappings.push(mapping),
            }
        }
        Action::InsertMapping { index, mapping } => {
            match state
                .mappings
                .iter_mut()
                .find(|m| m.mapping_id == mapping.mapping_id)
            {
                Some(existing) => *existing = mapping,
                None => {
                    let index = index.min(state.mappings.len());
                    state.mappings.insert(index, mapping);
                }
            }
        }
        Action::PatchMapping { mapping_id, patch } => {
            if let Some(existing) = state.mappings.iter_mut().find(|m| m.mapping_id == mapping_id) {
                patch.apply_to(existing);
            }
        }
        Action::RemoveMapping(mapping_id) => {
            state.mappings.retain(|m| m.mapping_id != mapping_id);
            if state.selection.focused_mapping() == Some(mapping_id.as_str()) {
                state.selection = Selection::default();
            }
        }
        Action::AppendPending(changes) => state.pending.extend(changes),
        Action::RemovePending(mapping_id) => {
            state.pending.retain(|c| c.mapping_id() != mapping_id)
        }
        Action::ClearPending => state.pending.clear(),
        Action::ReplacePending(changes) => state.pending = changes,
        Action::ToggleSelection {
            side,
            account_number,
            multi,
        } => {
            let selection = std::mem::take(&mut state.selection);
            state.selection = selection.toggle(side, &account_number, multi);
        }
        Action::FocusMapping(mapping_id) => {
            if state.mappings.iter().any(|m| m.mapping_id == mapping_id) {
                state.selection = Selection::Mapping(mapping_id);
            }
        }
        Action::Unfocus => {
            if state.selection.focused_mapping().is_some() {
                state.selection = Selection::default();
            }
        }
        Action::ClearSelection => state.selection = Selection::default(),
        Action::PatchFilters(patch) => {
            let filter = state.filters.side_mut(patch.side);
            if let Some(search) = patch.search {
                filter.search = search;
            }
            if let Some(section) = patch.section {
                filter.section = section;
            }
            if let Some(mapped) = patch.mapped {
                filter.mapped = mapped;
            }
        }
        Action::Batch(actions) => {
            for action in actions {
                state = reduce(state, action);
            }
        }
    }
    state
}

// ============================================================================
// COMPUTED VIEWS
// ============================================================================

impl WorkspaceState {
    pub fn mapping(&self, mapping_id: &str) -> Option<&Mapping> {
        self.mappings.iter().find(|m| m.mapping_id == mapping_id)
    }

    pub fn focused_mapping(&self) -> Option<&Mapping> {
        self.selection
            .focused_mapping()
            .and_then(|id| self.mapping(id))
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Mappings that reference an account on the given side
    pub fn mappings_for(&self, side: AccountSide, account_number: &str) -> Vec<&Mapping> {
        self.mappings
            .iter()
            .filter(|m| endpoint(m, side) == account_number)
            .collect()
    }

    /// Account numbers with at least one mapping on that side
    pub fn mapped_accounts(&self, side: AccountSide) -> HashSet<&str> {
        self.mappings.iter().map(|m| endpoint(m, side)).collect()
    }

    /// Post-filter accounts for one side, in reference order
    pub fn visible_accounts(&self, side: AccountSide) -> Vec<&Account> {
        let mapped = self.mapped_accounts(side);
        let filter = self.filters.side(side);
        self.reference
            .side(side)
            .iter()
            .filter(|a| filter.admits(a, mapped.contains(a.account_number.as_str())))
            .collect()
    }

    pub fn unmapped_accounts(&self, side: AccountSide) -> Vec<&Account> {
        let mapped = self.mapped_accounts(side);
        self.reference
            .side(side)
            .iter()
            .filter(|a| !mapped.contains(a.account_number.as_str()))
            .collect()
    }
}

fn endpoint(mapping: &Mapping, side: AccountSide) -> &str {
    match side {
        AccountSide::Source => &mapping.source_account_number,
        AccountSide::Target => &mapping.target_account_number,
    }
}

// ============================================================================
// TESTS
// ============================================================================
