// 🗂️ Workspace Session - one explicit context per mapping workspace
//
// Owns everything a session needs and routes every mutation through the
// store's transition function:
//
//   operation → change-set → reduce(state, Batch[apply, pending]) → history
//
// State and its history record are updated together or not at all: the new
// state is computed first and assigned in one step, and a change-set is only
// recorded after it has been applied.
//
// The pending queue mirrors every applied change-set (undo/redo included)
// and is kept coalesced, so it is always the minimal list of writes the
// repository still needs. Each recorded change-set carries the queue as it
// was before and after it; undo/redo restore those snapshots exactly until
// the next save rewrites the queue.
//
// Nothing mutates the state while a save is in flight.

use crate::config::Config;
use crate::drag::ProposalSink;
use crate::entities::{
    coalesce_pending, AccountSide, ChangeKind, Mapping, MappingPatch, MappingStatus, PendingChange,
};
use crate::error::{ErrorKind, MappingError, MappingResult};
use crate::export;
use crate::history::{ChangeSet, HistoryManager, MappingChange, PendingJournal};
use crate::inference::{ConnectionProposal, InferenceEngine};
use crate::persistence::{MappingRepository, NewMapping};
use crate::store::{reduce, Action, FilterPatch, MappedFilter, SectionFilter, WorkspaceState};
use crate::validation::ValidationReport;
use chrono::{NaiveDate, Utc};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

const MAX_NOTICES: usize = 50;

// ============================================================================
// NOTICES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Transient, operator-facing message
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub code: Option<&'static str>,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Notice {
            level: NoticeLevel::Info,
            code: None,
            message: message.into(),
        }
    }

    pub fn from_error(err: &MappingError) -> Self {
        let level = match err.kind() {
            ErrorKind::RejectedProposal | ErrorKind::Validation => NoticeLevel::Warning,
            ErrorKind::Persistence | ErrorKind::Load => NoticeLevel::Error,
        };
        Notice {
            level,
            code: Some(err.code()),
            message: err.to_string(),
        }
    }
}

// ============================================================================
// OPTIONS / COMMANDS / SUMMARIES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceOptions {
    pub workspace_id: String,
    pub provider: Option<String>,
    pub actor: String,
    pub history_capacity: Option<usize>,
}

impl WorkspaceOptions {
    pub fn new(workspace_id: &str, actor: &str) -> Self {
        WorkspaceOptions {
            workspace_id: workspace_id.to_string(),
            provider: None,
            actor: actor.to_string(),
            history_capacity: None,
        }
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }

    pub fn from_config(config: &Config) -> Self {
        WorkspaceOptions {
            workspace_id: config.workspace_id.clone(),
            provider: config.provider.clone(),
            actor: config.actor.clone(),
            history_capacity: config.history_capacity,
        }
    }
}

/// Keyboard contract shared by every front end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    Undo,
    Redo,
    SaveIfDirty,
    Escape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaveSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl SaveSummary {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Writes captured by `begin_save`, handed back to `complete_save`
#[derive(Debug, Clone, PartialEq)]
pub struct SaveBatch {
    changes: Vec<PendingChange>,
}

impl SaveBatch {
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

// ============================================================================
// WORKSPACE
// ============================================================================

pub struct Workspace<R: MappingRepository> {
    options: WorkspaceOptions,
    repository: R,
    engine: InferenceEngine,
    state: WorkspaceState,
    history: HistoryManager,
    save_in_flight: bool,
    /// Bumped by every completed save; journals from older epochs are stale
    save_epoch: u64,
    /// Page-level load error; the session stays usable underneath it
    banner: Option<String>,
    notices: VecDeque<Notice>,
    last_report: Option<ValidationReport>,
}

impl<R: MappingRepository> Workspace<R> {
    /// Open a workspace and load its data. Load failures never fail the
    /// open: they set the banner and leave the workspace empty.
    pub fn open(repository: R, options: WorkspaceOptions) -> Self {
        let history = match options.history_capacity {
            Some(capacity) => HistoryManager::with_capacity_limit(capacity),
            None => HistoryManager::new(),
        };
        let mut workspace = Workspace {
            engine: InferenceEngine::new(&options.actor),
            options,
            repository,
            state: WorkspaceState::default(),
            history,
            save_in_flight: false,
            save_epoch: 0,
            banner: None,
            notices: VecDeque::new(),
            last_report: None,
        };

        let registered = workspace
            .repository
            .register_workspace(&workspace.options.workspace_id, workspace.options.provider.as_deref());
        match registered {
            Ok(()) => {
                // reload() already records the banner
                let _ = workspace.reload();
            }
            Err(err) => workspace.fail_load(err),
        }
        workspace
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn workspace_id(&self) -> &str {
        &self.options.workspace_id
    }

    pub fn provider(&self) -> Option<&str> {
        self.options.provider.as_deref()
    }

    pub fn state(&self) -> &WorkspaceState {
        &self.state
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn repository_mut(&mut self) -> &mut R {
        &mut self.repository
    }

    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn notices(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter()
    }

    pub fn latest_notice(&self) -> Option<&Notice> {
        self.notices.back()
    }

    pub fn last_report(&self) -> Option<&ValidationReport> {
        self.last_report.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    pub fn is_saving(&self) -> bool {
        self.save_in_flight
    }

    /// Save trigger availability (disabled rather than queued while in flight)
    pub fn can_save(&self) -> bool {
        self.is_dirty() && !self.save_in_flight
    }

    // ------------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------------

    /// Replace reference data and mappings with the repository's view.
    pub fn reload(&mut self) -> MappingResult<()> {
        let workspace_id = self.options.workspace_id.clone();
        let provider = self.options.provider.clone();

        let loaded = self
            .repository
            .list_source_accounts(provider.as_deref())
            .and_then(|sources| {
                let targets = self.repository.list_target_accounts(None)?;
                let mappings = self.repository.list_mappings(&workspace_id, None, None)?;
                Ok((sources, targets, mappings))
            });

        match loaded {
            Ok((sources, targets, mappings)) => {
                log::info!(
                    "workspace loaded workspace={} sources={} targets={} mappings={}",
                    workspace_id,
                    sources.len(),
                    targets.len(),
                    mappings.len()
                );
                self.transition(Action::Batch(vec![
                    Action::ReplaceReferenceData { sources, targets },
                    Action::ReplaceMappings(mappings),
                ]));
                self.banner = None;
                Ok(())
            }
            Err(err) => {
                let err = match err {
                    MappingError::Load(_) => err,
                    other => MappingError::Load(other.to_string()),
                };
                self.fail_load(err.clone());
                Err(err)
            }
        }
    }

    fn fail_load(&mut self, err: MappingError) {
        log::error!(
            "workspace load failed workspace={} err={}",
            self.options.workspace_id,
            err
        );
        self.banner = Some(err.to_string());
        self.transition(Action::Batch(vec![
            Action::ReplaceReferenceData {
                sources: Vec::new(),
                targets: Vec::new(),
            },
            Action::ReplaceMappings(Vec::new()),
        ]));
    }

    // ------------------------------------------------------------------------
    // Mapping operations (recorded in history)
    // ------------------------------------------------------------------------

    /// Connect a source to a target; cardinality is inferred.
    pub fn connect(&mut self, source: &str, target: &str) -> MappingResult<Mapping> {
        self.ensure_editable()?;
        let proposal = ConnectionProposal::new(source, target);
        match self
            .engine
            .propose(&proposal, &self.state.mappings, &self.state.reference)
        {
            Ok(inference) => {
                log::info!(
                    "proposal accepted workspace={} mapping={} cardinality={} siblings={}",
                    self.options.workspace_id,
                    inference.mapping.mapping_id,
                    inference.mapping.cardinality(),
                    inference.rewritten_siblings()
                );
                self.commit(inference.change_set);
                Ok(inference.mapping)
            }
            Err(err) => {
                log::debug!("proposal rejected {} err={}", proposal.label(), err.code());
                Err(self.reject(err))
            }
        }
    }

    /// Delete a mapping and rebalance what remains of its group.
    pub fn delete_mapping(&mut self, mapping_id: &str) -> MappingResult<()> {
        self.ensure_editable()?;
        match self.engine.retract(mapping_id, &self.state.mappings) {
            Ok(change_set) => {
                log::info!(
                    "mapping deleted workspace={} mapping={} siblings={}",
                    self.options.workspace_id,
                    mapping_id,
                    change_set.len().saturating_sub(1)
                );
                self.commit(change_set);
                Ok(())
            }
            Err(err) => Err(self.reject(err)),
        }
    }

    pub fn delete_focused(&mut self) -> MappingResult<()> {
        let id = self
            .state
            .selection
            .focused_mapping()
            .map(str::to_string)
            .ok_or_else(|| MappingError::MappingNotFound("no focused mapping".to_string()))?;
        self.delete_mapping(&id)
    }

    /// Edit one split weight; must be in (0, 1].
    pub fn set_split_weight(&mut self, mapping_id: &str, weight: f64) -> MappingResult<()> {
        self.ensure_editable()?;
        if !weight.is_finite() || weight <= 0.0 || weight > 1.0 {
            return Err(self.reject(MappingError::InvalidWeight(weight)));
        }
        let before = match self.state.mapping(mapping_id) {
            Some(m) => m.clone(),
            None => return Err(self.reject(MappingError::MappingNotFound(mapping_id.to_string()))),
        };
        if before.split_weight == weight {
            return Ok(());
        }

        let mut after = before.clone();
        MappingPatch::weight(weight).stamped(Utc::now()).apply_to(&mut after);
        let label = format!("weight {} = {:.2}", before.endpoints(), weight);
        self.commit(ChangeSet::single(
            &label,
            MappingChange::Update { before, after },
        ));
        Ok(())
    }

    /// Nudge the focused mapping's weight, clamped to [0.01, 1.0].
    pub fn adjust_focused_weight(&mut self, delta: f64) -> MappingResult<()> {
        let (id, current) = match self.state.focused_mapping() {
            Some(m) => (m.mapping_id.clone(), m.split_weight),
            None => return Ok(()),
        };
        let next = ((current + delta) * 100.0).round() / 100.0;
        self.set_split_weight(&id, next.clamp(0.01, 1.0))
    }

    /// Promote every DRAFT mapping to ACTIVE as one undoable step.
    pub fn activate_all(&mut self) -> usize {
        if self.ensure_editable().is_err() {
            return 0;
        }
        let now = Utc::now();
        let changes: Vec<MappingChange> = self
            .state
            .mappings
            .iter()
            .filter(|m| m.status == MappingStatus::Draft)
            .map(|before| {
                let mut after = before.clone();
                MappingPatch::status(MappingStatus::Active)
                    .stamped(now)
                    .apply_to(&mut after);
                MappingChange::Update {
                    before: before.clone(),
                    after,
                }
            })
            .collect();

        let count = changes.len();
        if count > 0 {
            self.commit(ChangeSet::new(&format!("activate {} mappings", count), changes));
            self.notify(Notice::info(format!("{} mappings activated", count)));
        }
        count
    }

    // ------------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------------

    /// Revert the most recent change-set. `None` when there is nothing to undo.
    pub fn undo(&mut self) -> Option<ChangeSet> {
        self.ensure_editable().ok()?;
        let Some(entry) = self.history.undo() else {
            self.notify(Notice::info("nothing to undo"));
            return None;
        };
        let inverse = entry.inverse();
        if let Err(err) = self.check_applicable(&inverse) {
            self.history.restore_undo();
            self.notify(Notice::from_error(&err));
            return None;
        }
        log::debug!("undo {}", entry.label);
        self.apply(&inverse);
        Some(entry)
    }

    /// Re-apply the next change-set. `None` at the head of history.
    pub fn redo(&mut self) -> Option<ChangeSet> {
        self.ensure_editable().ok()?;
        let Some(entry) = self.history.redo() else {
            self.notify(Notice::info("nothing to redo"));
            return None;
        };
        if let Err(err) = self.check_applicable(&entry) {
            self.history.restore_redo();
            self.notify(Notice::from_error(&err));
            return None;
        }
        log::debug!("redo {}", entry.label);
        self.apply(&entry);
        Some(entry)
    }

    // ------------------------------------------------------------------------
    // Save / discard
    // ------------------------------------------------------------------------

    /// Mark a save in flight and capture the coalesced writes.
    pub fn begin_save(&mut self) -> MappingResult<SaveBatch> {
        if self.save_in_flight {
            return Err(self.reject(MappingError::SaveInFlight));
        }
        if !self.is_dirty() {
            return Err(MappingError::NothingToSave);
        }
        self.save_in_flight = true;
        log::info!(
            "save started workspace={} changes={}",
            self.options.workspace_id,
            self.state.pending.len()
        );
        Ok(SaveBatch {
            changes: coalesce_pending(&self.state.pending),
        })
    }

    /// Push a captured batch. Successful writes leave the pending queue;
    /// on the first failure the rest stays queued for retry. A fully
    /// successful save re-reads the workspace from the repository.
    pub fn complete_save(&mut self, batch: SaveBatch) -> MappingResult<SaveSummary> {
        let workspace_id = self.options.workspace_id.clone();
        let mut summary = SaveSummary::default();
        let mut saved: Vec<String> = Vec::new();

        // Deletes free (source, target) pairs before creates reuse them
        let mut ordered = batch.changes;
        ordered.sort_by_key(|c| match c.kind {
            ChangeKind::Delete => 0,
            ChangeKind::Create => 1,
            ChangeKind::Update => 2,
        });

        let mut failure = None;
        for change in &ordered {
            match self.push_change(&workspace_id, change) {
                Ok(()) => {
                    match change.kind {
                        ChangeKind::Create => summary.created += 1,
                        ChangeKind::Update => summary.updated += 1,
                        ChangeKind::Delete => summary.deleted += 1,
                    }
                    saved.push(change.mapping_id().to_string());
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        let remove: Vec<Action> = saved.into_iter().map(Action::RemovePending).collect();
        self.transition(Action::Batch(remove));
        self.save_in_flight = false;
        self.save_epoch += 1;

        if let Some(err) = failure {
            let err = match err {
                MappingError::Persistence(_) => err,
                other => MappingError::Persistence(other.to_string()),
            };
            log::warn!(
                "save failed workspace={} saved={} remaining={} err={}",
                workspace_id,
                summary.total(),
                self.state.pending.len(),
                err
            );
            self.notify(Notice::from_error(&err));
            return Err(err);
        }

        log::info!(
            "save finished workspace={} created={} updated={} deleted={}",
            workspace_id,
            summary.created,
            summary.updated,
            summary.deleted
        );
        // A failed re-read sets the banner; the save itself still succeeded
        let _ = self.reload();
        self.notify(Notice::info(format!("saved {} changes", summary.total())));
        Ok(summary)
    }

    pub fn save(&mut self) -> MappingResult<SaveSummary> {
        let batch = self.begin_save()?;
        self.complete_save(batch)
    }

    /// Drop unsaved changes and history, then re-read the repository.
    pub fn discard(&mut self) -> MappingResult<usize> {
        self.ensure_editable()?;
        let dropped = self.state.pending.len();
        self.transition(Action::ClearPending);
        self.history.clear();
        self.reload()?;
        if dropped > 0 {
            self.notify(Notice::info(format!("discarded {} changes", dropped)));
        }
        Ok(dropped)
    }

    fn push_change(&mut self, workspace_id: &str, change: &PendingChange) -> MappingResult<()> {
        match change.kind {
            ChangeKind::Create => self
                .repository
                .create_mapping(workspace_id, NewMapping::from_mapping(&change.mapping))
                .map(|_| ()),
            ChangeKind::Update => self
                .repository
                .update_mapping(&change.mapping.mapping_id, &full_patch(&change.mapping))
                .map(|_| ()),
            ChangeKind::Delete => match self.repository.delete_mapping(&change.mapping.mapping_id) {
                Ok(()) | Err(MappingError::MappingNotFound(_)) => Ok(()),
                Err(err) => Err(err),
            },
        }
    }

    // ------------------------------------------------------------------------
    // Validation / export
    // ------------------------------------------------------------------------

    /// Run the repository's rule set; result is surfaced as a count notice.
    pub fn validate(&mut self) -> MappingResult<ValidationReport> {
        let report = match self.repository.validate_mappings(&self.options.workspace_id) {
            Ok(report) => report,
            Err(err) => return Err(self.reject(err)),
        };
        let notice = if report.is_valid {
            Notice::info(format!("validation passed: {}", report.summary()))
        } else {
            let mut notice = Notice::from_error(&MappingError::ValidationFailed(report.errors.len()));
            notice.message = format!("validation failed: {}", report.summary());
            notice
        };
        self.notify(notice);
        self.last_report = Some(report.clone());
        Ok(report)
    }

    /// Write the current mappings to `dir`; returns the file path.
    pub fn export(&mut self, dir: &Path, date: NaiveDate) -> anyhow::Result<PathBuf> {
        let written = export::export_to_dir(
            dir,
            &self.options.workspace_id,
            date,
            &self.state.mappings,
            &self.state.reference,
        );
        match written {
            Ok(path) => {
                self.notify(Notice::info(format!("exported {}", path.display())));
                Ok(path)
            }
            Err(err) => {
                log::warn!("export failed workspace={} err={:#}", self.options.workspace_id, err);
                self.notify(Notice::from_error(&MappingError::Persistence(format!("export failed: {err:#}"))));
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Selection / filters (view state, not recorded)
    // ------------------------------------------------------------------------

    pub fn toggle_account(&mut self, side: AccountSide, account_number: &str, multi: bool) {
        self.transition(Action::ToggleSelection {
            side,
            account_number: account_number.to_string(),
            multi,
        });
    }

    pub fn focus_mapping(&mut self, mapping_id: &str) {
        self.transition(Action::FocusMapping(mapping_id.to_string()));
    }

    pub fn clear_selection(&mut self) {
        self.transition(Action::ClearSelection);
    }

    /// Move focus along the visible mappings (wraps around).
    pub fn focus_step(&mut self, forward: bool) {
        let visible: Vec<String> = {
            let sources = self.state.visible_accounts(AccountSide::Source);
            let targets = self.state.visible_accounts(AccountSide::Target);
            self.state
                .mappings
                .iter()
                .filter(|m| {
                    sources.iter().any(|a| a.account_number == m.source_account_number)
                        && targets.iter().any(|a| a.account_number == m.target_account_number)
                })
                .map(|m| m.mapping_id.clone())
                .collect()
        };
        if visible.is_empty() {
            return;
        }
        let current = self
            .state
            .selection
            .focused_mapping()
            .and_then(|id| visible.iter().position(|v| v == id));
        let next = match (current, forward) {
            (None, true) => 0,
            (None, false) => visible.len() - 1,
            (Some(i), true) => (i + 1) % visible.len(),
            (Some(i), false) => (i + visible.len() - 1) % visible.len(),
        };
        self.focus_mapping(&visible[next]);
    }

    pub fn set_search(&mut self, side: AccountSide, text: &str) {
        self.transition(Action::PatchFilters(FilterPatch::new(side).search(text)));
    }

    pub fn set_section(&mut self, side: AccountSide, section: SectionFilter) {
        self.transition(Action::PatchFilters(FilterPatch::new(side).section(section)));
    }

    pub fn set_mapped_filter(&mut self, side: AccountSide, mapped: MappedFilter) {
        self.transition(Action::PatchFilters(FilterPatch::new(side).mapped(mapped)));
    }

    pub fn cycle_mapped_filter(&mut self, side: AccountSide) {
        let next = self.state.filters.side(side).mapped.next();
        self.set_mapped_filter(side, next);
    }

    // ------------------------------------------------------------------------
    // Keyboard contract
    // ------------------------------------------------------------------------

    pub fn handle_key(&mut self, command: KeyCommand) {
        match command {
            KeyCommand::Undo => {
                self.undo();
            }
            KeyCommand::Redo => {
                self.redo();
            }
            KeyCommand::SaveIfDirty => {
                if self.can_save() {
                    // Failures are already surfaced as notices
                    let _ = self.save();
                }
            }
            KeyCommand::Escape => self.clear_selection(),
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn transition(&mut self, action: Action) {
        let state = std::mem::take(&mut self.state);
        self.state = reduce(state, action);
    }

    /// Apply a change-set and bring the pending queue along: the journaled
    /// queue when it is still current, otherwise the changes mirrored onto
    /// the existing queue and coalesced.
    fn apply(&mut self, change_set: &ChangeSet) {
        let pending = match &change_set.journal {
            Some(journal) if journal.epoch == self.save_epoch => journal.after.clone(),
            Some(_) | None => {
                let mut pending = self.state.pending.clone();
                pending.extend(change_set.to_pending());
                coalesce_pending(&pending)
            }
        };
        self.transition(Action::Batch(vec![
            change_set.to_action(),
            Action::ReplacePending(pending),
        ]));
    }

    /// Apply, then record in history together with the queue on both sides
    fn commit(&mut self, change_set: ChangeSet) {
        let before = self.state.pending.clone();
        self.apply(&change_set);
        let journal = PendingJournal {
            epoch: self.save_epoch,
            before,
            after: self.state.pending.clone(),
        };
        self.history.record_changes(change_set.with_journal(journal));
    }

    /// Edits wait until an in-flight save completes
    fn ensure_editable(&mut self) -> MappingResult<()> {
        if self.save_in_flight {
            return Err(self.reject(MappingError::SaveInFlight));
        }
        Ok(())
    }

    /// Whether every change in the set still matches the current state
    fn check_applicable(&self, change_set: &ChangeSet) -> MappingResult<()> {
        for change in &change_set.changes {
            let exists = self.state.mapping(change.mapping_id()).is_some();
            let ok = match change {
                MappingChange::Create { .. } => !exists,
                MappingChange::Update { .. } | MappingChange::Delete { .. } => exists,
            };
            if !ok {
                return Err(MappingError::MappingNotFound(change.mapping_id().to_string()));
            }
        }
        Ok(())
    }

    fn notify(&mut self, notice: Notice) {
        if self.notices.len() == MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(notice);
    }

    /// Surface an error as a notice and hand it back
    fn reject(&mut self, err: MappingError) -> MappingError {
        self.notify(Notice::from_error(&err));
        err
    }
}

impl<R: MappingRepository> ProposalSink for Workspace<R> {
    fn submit(&mut self, proposal: ConnectionProposal) -> MappingResult<Mapping> {
        self.connect(
            &proposal.source_account_number,
            &proposal.target_account_number,
        )
    }
}

/// Every value field of a snapshot, for repository updates
fn full_patch(mapping: &Mapping) -> MappingPatch {
    MappingPatch {
        shape: Some(mapping.shape.clone()),
        split_weight: Some(mapping.split_weight),
        status: Some(mapping.status),
        effective_date: mapping.effective_date,
        updated_at: Some(mapping.updated_at),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drag::{DragController, DragItem, DropOutcome};
    use crate::entities::{Account, Cardinality, LedgerSection, MappingShape};
    use crate::persistence::{InMemoryRepository, Operation};
    use crate::store::Selection;

    fn repo() -> InMemoryRepository {
        InMemoryRepository::new(
            vec![
                Account::new("S1", "Cash", LedgerSection::Assets),
                Account::new("S2", "Petty cash", LedgerSection::Assets),
                Account::new("S3", "Custody fees", LedgerSection::Expense),
            ],
            vec![
                Account::new("T1", "Cash at bank", LedgerSection::Assets),
                Account::new("T2", "Cash in transit", LedgerSection::Assets),
                Account::new("T3", "Fees", LedgerSection::Expense),
            ],
        )
    }

    fn open() -> Workspace<InMemoryRepository> {
        Workspace::open(repo(), WorkspaceOptions::new("ws", "tester"))
    }

    fn weights(ws: &Workspace<InMemoryRepository>, source: &str) -> Vec<f64> {
        ws.state()
            .mappings_for(AccountSide::Source, source)
            .iter()
            .map(|m| m.split_weight)
            .collect()
    }

    #[test]
    fn test_open_loads_reference_data() {
        let ws = open();
        assert!(ws.banner().is_none());
        assert_eq!(ws.state().reference.sources.len(), 3);
        assert_eq!(ws.state().reference.targets.len(), 3);
        assert!(!ws.is_dirty());
    }

    #[test]
    fn test_load_failure_sets_banner_and_stays_interactive() {
        let mut repository = repo();
        repository.fail(Operation::ListAccounts, "reference service down");
        let mut ws = Workspace::open(repository, WorkspaceOptions::new("ws", "tester"));

        assert!(ws.banner().unwrap().contains("reference service down"));
        assert!(ws.state().reference.sources.is_empty());
        assert!(ws.state().mappings.is_empty());

        // Still usable: operations are rejected, not fatal
        assert!(ws.connect("S1", "T1").is_err());
        ws.set_search(AccountSide::Source, "cash");

        ws.repository_mut().heal();
        ws.reload().unwrap();
        assert!(ws.banner().is_none());
        assert_eq!(ws.state().reference.sources.len(), 3);
    }

    #[test]
    fn test_connect_then_undo_restores_state() {
        let mut ws = open();
        ws.connect("S1", "T1").unwrap();
        let before = ws.state().clone();

        ws.connect("S1", "T2").unwrap();
        assert_eq!(weights(&ws, "S1"), vec![0.5, 0.5]);

        ws.undo().unwrap();
        assert_eq!(ws.state(), &before);

        ws.undo().unwrap();
        assert!(ws.state().mappings.is_empty());
        assert!(!ws.is_dirty());
    }

    #[test]
    fn test_redo_and_redo_tail_truncation() {
        let mut ws = open();
        ws.connect("S1", "T1").unwrap();
        ws.connect("S2", "T2").unwrap();
        ws.undo().unwrap();
        assert!(ws.history().can_redo());

        let redone = ws.redo().unwrap();
        assert_eq!(redone.label, "connect S2 → T2");
        assert_eq!(ws.state().mappings.len(), 2);

        ws.undo().unwrap();
        ws.connect("S3", "T3").unwrap();
        assert!(!ws.history().can_redo());
        assert!(ws.redo().is_none());
    }

    #[test]
    fn test_undo_on_empty_history() {
        let mut ws = open();
        let before = ws.state().clone();
        assert!(ws.undo().is_none());
        assert_eq!(ws.history().cursor(), -1);
        assert_eq!(ws.state(), &before);
        assert_eq!(ws.latest_notice().unwrap().message, "nothing to undo");
    }

    #[test]
    fn test_duplicate_connect_is_rejected_without_change() {
        let mut ws = open();
        ws.connect("S1", "T1").unwrap();
        let before = ws.state().clone();
        let history_len = ws.history().len();

        let err = ws.connect("S1", "T1").unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_MAPPING");
        assert_eq!(ws.state(), &before);
        assert_eq!(ws.history().len(), history_len);
        let notice = ws.latest_notice().unwrap();
        assert_eq!(notice.level, NoticeLevel::Warning);
        assert_eq!(notice.code, Some("DUPLICATE_MAPPING"));
    }

    #[test]
    fn test_fan_in_keeps_weights() {
        let mut ws = open();
        ws.connect("S1", "T1").unwrap();
        ws.connect("S2", "T1").unwrap();
        let members = ws.state().mappings_for(AccountSide::Target, "T1");
        assert!(members.iter().all(|m| m.cardinality() == Cardinality::ManyToOne));
        assert!(members.iter().all(|m| m.split_weight == 1.0));
        assert_eq!(members[0].group_id(), members[1].group_id());
    }

    #[test]
    fn test_save_pushes_changes_and_reloads() {
        let mut ws = open();
        ws.connect("S1", "T1").unwrap();
        ws.connect("S1", "T2").unwrap();
        assert!(ws.can_save());

        let summary = ws.save().unwrap();
        assert_eq!(summary.created, 2);
        assert!(!ws.is_dirty());
        assert_eq!(ws.repository().stored("ws").len(), 2);
        // Reloaded from the repository with denormalized details
        assert!(ws
            .state()
            .mappings
            .iter()
            .all(|m| m.source_description == "Cash"));
        assert!(ws
            .repository()
            .stored("ws")
            .iter()
            .all(|m| matches!(m.shape, MappingShape::OneToMany { .. })));
    }

    #[test]
    fn test_save_failure_keeps_pending_for_retry() {
        let mut ws = open();
        ws.connect("S1", "T1").unwrap();
        ws.repository_mut().fail(Operation::Create, "timeout");

        let err = ws.save().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(ws.is_dirty());
        assert!(!ws.is_saving());
        assert_eq!(ws.latest_notice().unwrap().level, NoticeLevel::Error);

        ws.repository_mut().heal();
        ws.save().unwrap();
        assert!(!ws.is_dirty());
        assert_eq!(ws.repository().stored("ws").len(), 1);
    }

    #[test]
    fn test_second_save_blocked_while_in_flight() {
        let mut ws = open();
        ws.connect("S1", "T1").unwrap();
        let batch = ws.begin_save().unwrap();
        assert_eq!(batch.len(), 1);
        assert!(!ws.can_save());
        assert_eq!(ws.begin_save().unwrap_err(), MappingError::SaveInFlight);
        assert_eq!(ws.discard().unwrap_err(), MappingError::SaveInFlight);

        ws.complete_save(batch).unwrap();
        assert!(!ws.is_saving());
    }

    #[test]
    fn test_nothing_to_save() {
        let mut ws = open();
        assert_eq!(ws.save().unwrap_err(), MappingError::NothingToSave);
    }

    #[test]
    fn test_undo_after_save_queues_delete() {
        let mut ws = open();
        ws.connect("S1", "T1").unwrap();
        ws.save().unwrap();

        ws.undo().unwrap();
        assert!(ws.state().mappings.is_empty());
        assert_eq!(ws.state().pending.len(), 1);
        assert_eq!(ws.state().pending[0].kind, ChangeKind::Delete);

        let summary = ws.save().unwrap();
        assert_eq!(summary.deleted, 1);
        assert!(ws.repository().stored("ws").is_empty());
    }

    #[test]
    fn test_undo_delete_restores_exact_state() {
        let mut ws = open();
        let first = ws.connect("S1", "T1").unwrap();
        ws.connect("S2", "T2").unwrap();
        let before = ws.state().clone();

        ws.delete_mapping(&first.mapping_id).unwrap();
        assert_eq!(ws.state().pending.len(), 1);

        ws.undo().unwrap();
        assert_eq!(ws.state(), &before);
        assert_eq!(ws.state().mappings[0].mapping_id, first.mapping_id);

        ws.redo().unwrap();
        assert_eq!(ws.state().mappings.len(), 1);
        assert_eq!(ws.state().pending.len(), 1);
    }

    #[test]
    fn test_edit_then_undo_after_save_is_clean() {
        let mut ws = open();
        ws.connect("S1", "T1").unwrap();
        ws.save().unwrap();
        let saved = ws.state().clone();
        let id = saved.mappings[0].mapping_id.clone();

        ws.set_split_weight(&id, 0.4).unwrap();
        assert!(ws.is_dirty());

        ws.undo().unwrap();
        assert!(!ws.is_dirty());
        assert_eq!(ws.state(), &saved);

        ws.redo().unwrap();
        assert_eq!(ws.state().pending.len(), 1);
        assert_eq!(ws.state().pending[0].kind, ChangeKind::Update);
    }

    #[test]
    fn test_edits_rejected_while_save_in_flight() {
        let mut ws = open();
        let first = ws.connect("S1", "T1").unwrap();
        let batch = ws.begin_save().unwrap();
        let during = ws.state().clone();

        assert_eq!(ws.connect("S2", "T2").unwrap_err(), MappingError::SaveInFlight);
        assert_eq!(
            ws.set_split_weight(&first.mapping_id, 0.5).unwrap_err(),
            MappingError::SaveInFlight
        );
        assert_eq!(
            ws.delete_mapping(&first.mapping_id).unwrap_err(),
            MappingError::SaveInFlight
        );
        assert_eq!(ws.activate_all(), 0);
        assert!(ws.undo().is_none());
        assert_eq!(ws.state(), &during);
        assert_eq!(ws.latest_notice().unwrap().code, Some("SAVE_IN_FLIGHT"));

        ws.complete_save(batch).unwrap();
        assert!(!ws.is_dirty());

        ws.connect("S2", "T2").unwrap();
        assert!(ws.is_dirty());
        ws.save().unwrap();
        assert_eq!(ws.repository().stored("ws").len(), 2);
    }

    #[test]
    fn test_delete_rebalances_fan_out() {
        let mut ws = open();
        ws.connect("S1", "T1").unwrap();
        ws.connect("S1", "T2").unwrap();
        let third = ws.connect("S1", "T3").unwrap();

        ws.delete_mapping(&third.mapping_id).unwrap();
        assert_eq!(weights(&ws, "S1"), vec![0.5, 0.5]);

        ws.undo().unwrap();
        let w = weights(&ws, "S1");
        assert_eq!(w.len(), 3);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_set_split_weight() {
        let mut ws = open();
        let m = ws.connect("S1", "T1").unwrap();
        assert_eq!(
            ws.set_split_weight(&m.mapping_id, 0.0).unwrap_err(),
            MappingError::InvalidWeight(0.0)
        );
        assert!(ws.set_split_weight(&m.mapping_id, 1.5).is_err());

        ws.set_split_weight(&m.mapping_id, 0.4).unwrap();
        assert_eq!(ws.state().mapping(&m.mapping_id).unwrap().split_weight, 0.4);
        ws.undo().unwrap();
        assert_eq!(ws.state().mapping(&m.mapping_id).unwrap().split_weight, 1.0);
    }

    #[test]
    fn test_adjust_focused_weight_clamps() {
        let mut ws = open();
        let m = ws.connect("S1", "T1").unwrap();
        ws.focus_mapping(&m.mapping_id);
        ws.adjust_focused_weight(0.1).unwrap();
        assert_eq!(ws.state().mapping(&m.mapping_id).unwrap().split_weight, 1.0);
        ws.adjust_focused_weight(-0.25).unwrap();
        assert_eq!(ws.state().mapping(&m.mapping_id).unwrap().split_weight, 0.75);
    }

    #[test]
    fn test_activate_all_is_one_step() {
        let mut ws = open();
        ws.connect("S1", "T1").unwrap();
        ws.connect("S2", "T2").unwrap();
        assert_eq!(ws.activate_all(), 2);
        assert!(ws
            .state()
            .mappings
            .iter()
            .all(|m| m.status == MappingStatus::Active));

        ws.undo().unwrap();
        assert!(ws
            .state()
            .mappings
            .iter()
            .all(|m| m.status == MappingStatus::Draft));
        assert_eq!(ws.activate_all(), 2);
        assert_eq!(ws.activate_all(), 0);
    }

    #[test]
    fn test_validate_reports_counts() {
        let mut ws = open();
        ws.connect("S1", "T3").unwrap();
        ws.save().unwrap();

        let report = ws.validate().unwrap();
        assert!(report.is_valid);
        // S2, S3 unmapped + ASSETS → EXPENSE
        assert_eq!(report.warnings.len(), 2);
        assert!(ws
            .latest_notice()
            .unwrap()
            .message
            .starts_with("validation passed"));
        assert_eq!(ws.last_report(), Some(&report));
    }

    #[test]
    fn test_validate_failure_is_count_notice() {
        let repository = repo().with_mappings(
            "ws",
            vec![
                {
                    let mut m = Mapping::new("MAP-1", "S1", "T1", "t");
                    m.split_weight = 0.5;
                    m
                },
                {
                    let mut m = Mapping::new("MAP-2", "S1", "T2", "t");
                    m.split_weight = 0.2;
                    m
                },
            ],
        );
        let mut ws = Workspace::open(repository, WorkspaceOptions::new("ws", "tester"));
        let report = ws.validate().unwrap();
        assert!(!report.is_valid);
        let notice = ws.latest_notice().unwrap();
        assert_eq!(notice.code, Some("VALIDATION_FAILED"));
        assert!(notice.message.contains("1 error"));

        // Edits continue
        assert!(ws.connect("S2", "T3").is_ok());
    }

    #[test]
    fn test_keyboard_contract() {
        let mut ws = open();
        ws.toggle_account(AccountSide::Source, "S1", false);
        ws.handle_key(KeyCommand::Escape);
        assert_eq!(ws.state().selection, Selection::default());

        ws.connect("S1", "T1").unwrap();
        ws.handle_key(KeyCommand::Undo);
        assert!(ws.state().mappings.is_empty());
        ws.handle_key(KeyCommand::Redo);
        assert_eq!(ws.state().mappings.len(), 1);

        ws.handle_key(KeyCommand::SaveIfDirty);
        assert!(!ws.is_dirty());
        // Not dirty: no save attempted, no NOTHING_TO_SAVE notice
        ws.handle_key(KeyCommand::SaveIfDirty);
        assert_ne!(ws.latest_notice().unwrap().code, Some("NOTHING_TO_SAVE"));
    }

    #[test]
    fn test_focus_and_selection_exclusive() {
        let mut ws = open();
        let m = ws.connect("S1", "T1").unwrap();
        ws.toggle_account(AccountSide::Target, "T2", false);
        ws.focus_mapping(&m.mapping_id);
        assert!(ws.state().selection.selected(AccountSide::Target).is_empty());
        ws.toggle_account(AccountSide::Source, "S2", false);
        assert!(ws.state().selection.focused_mapping().is_none());
    }

    #[test]
    fn test_focus_step_wraps() {
        let mut ws = open();
        let a = ws.connect("S1", "T1").unwrap();
        let b = ws.connect("S2", "T2").unwrap();
        ws.focus_step(true);
        assert_eq!(ws.state().selection.focused_mapping(), Some(a.mapping_id.as_str()));
        ws.focus_step(true);
        assert_eq!(ws.state().selection.focused_mapping(), Some(b.mapping_id.as_str()));
        ws.focus_step(true);
        assert_eq!(ws.state().selection.focused_mapping(), Some(a.mapping_id.as_str()));
        ws.focus_step(false);
        assert_eq!(ws.state().selection.focused_mapping(), Some(b.mapping_id.as_str()));
    }

    #[test]
    fn test_drag_drop_into_workspace() {
        let mut ws = open();
        let mut drag = DragController::new();

        drag.start(DragItem::new(AccountSide::Target, "T1"));
        drag.hover(DragItem::new(AccountSide::Source, "S1"));
        assert!(matches!(drag.end(&mut ws), DropOutcome::Connected(_)));

        drag.start(DragItem::new(AccountSide::Source, "S1"));
        drag.hover(DragItem::new(AccountSide::Target, "T1"));
        assert!(matches!(
            drag.end(&mut ws),
            DropOutcome::Rejected(MappingError::DuplicateMapping { .. })
        ));
        assert!(!drag.is_active());
        assert_eq!(ws.state().mappings.len(), 1);
    }

    #[test]
    fn test_discard_reverts_to_repository() {
        let mut ws = open();
        ws.connect("S1", "T1").unwrap();
        ws.save().unwrap();
        ws.connect("S2", "T2").unwrap();

        assert_eq!(ws.discard().unwrap(), 1);
        assert_eq!(ws.state().mappings.len(), 1);
        assert!(!ws.is_dirty());
        assert!(!ws.history().can_undo());
    }

    #[test]
    fn test_export_writes_file() {
        let mut ws = open();
        ws.connect("S1", "T1").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let path = ws.export(dir.path(), date).unwrap();
        assert!(path.ends_with("gl-mappings-ws-2024-06-30.csv"));
    }
}
