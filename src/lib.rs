// COA Mapper - Core Library
// Chart-of-accounts mapping workspace: store, inference, history, layout,
// drag state machine and persistence adapters. Used by the CLI, the TUI and tests.

pub mod config;
pub mod db;
pub mod drag;
pub mod entities;
pub mod error;
pub mod export;
pub mod history;
pub mod inference;
pub mod layout;
pub mod persistence;
pub mod store;
pub mod validation;
pub mod workspace;

// Re-export commonly used types
pub use config::Config;
pub use db::{
    Event, SqliteRepository,
    load_accounts_csv, setup_database, insert_accounts,
    insert_event, get_events_for_entity,
};
pub use drag::{DragController, DragItem, DragPhase, DropOutcome, ProposalSink};
pub use entities::{
    Account, AccountCatalog, AccountSide, LedgerSection,
    Cardinality, ChangeKind, Mapping, MappingPatch, MappingShape, MappingStatus, PendingChange,
    coalesce_pending, group_weight_totals, WEIGHT_TOLERANCE,
};
pub use error::{ErrorKind, MappingError, MappingResult};
pub use export::{export_filename, export_to_dir, write_mappings};
pub use history::{ChangeSet, HistoryManager, MappingChange, PendingJournal};
pub use inference::{ConnectionProposal, Inference, InferenceEngine};
pub use layout::{
    AnchorId, AnchorPositions, ConnectorDescriptor, ConnectorLabel, ConnectorLayout, DashPattern,
    ConnectorStyle, CubicPath, Point, VisibleAccounts,
};
pub use persistence::{
    BulkCreateResult, BulkDeleteResult, InMemoryRepository, MappingRepository, NewMapping,
};
pub use store::{
    reduce, Action, FilterPatch, Filters, MappedFilter, ReferenceData, SectionFilter,
    Selection, SideFilter, WorkspaceState,
};
pub use validation::{IssueType, ValidationIssue, ValidationReport};
pub use workspace::{
    KeyCommand, Notice, NoticeLevel, SaveSummary, Workspace, WorkspaceOptions,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
