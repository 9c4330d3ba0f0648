// ⚠️ Mapping Errors - One taxonomy for the whole workspace
//
// Four families, each with its own surfacing policy:
//   RejectedProposal → transient notice, state unchanged
//   Validation       → count-style notice, edits continue
//   Persistence      → notice, pending-change queue preserved for retry
//   Load             → page-level banner, workspace stays usable with empty data

use crate::entities::AccountSide;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MappingError {
    #[error("mapping {source_account} -> {target_account} already exists")]
    DuplicateMapping {
        source_account: String,
        target_account: String,
    },

    #[error("mapping not found: {0}")]
    MappingNotFound(String),

    #[error("{side} account not found: {account_number}")]
    AccountNotFound {
        side: AccountSide,
        account_number: String,
    },

    #[error("split weight must be in (0, 1], got {0}")]
    InvalidWeight(f64),

    #[error("{0} validation error(s)")]
    ValidationFailed(usize),

    #[error("a save is already in flight for this workspace")]
    SaveInFlight,

    #[error("no pending changes to save")]
    NothingToSave,

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("load error: {0}")]
    Load(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse classification used to decide how an error is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RejectedProposal,
    Validation,
    Persistence,
    Load,
}

impl MappingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MappingError::DuplicateMapping { .. }
            | MappingError::MappingNotFound(_)
            | MappingError::AccountNotFound { .. }
            | MappingError::InvalidWeight(_)
            | MappingError::SaveInFlight
            | MappingError::NothingToSave => ErrorKind::RejectedProposal,
            MappingError::ValidationFailed(_) => ErrorKind::Validation,
            MappingError::Persistence(_) => ErrorKind::Persistence,
            MappingError::Load(_) | MappingError::Config(_) => ErrorKind::Load,
        }
    }

    /// Short machine-readable code, shown next to notices.
    pub fn code(&self) -> &'static str {
        match self {
            MappingError::DuplicateMapping { .. } => "DUPLICATE_MAPPING",
            MappingError::MappingNotFound(_) => "MAPPING_NOT_FOUND",
            MappingError::AccountNotFound { .. } => "ACCOUNT_NOT_FOUND",
            MappingError::InvalidWeight(_) => "INVALID_WEIGHT",
            MappingError::ValidationFailed(_) => "VALIDATION_FAILED",
            MappingError::SaveInFlight => "SAVE_IN_FLIGHT",
            MappingError::NothingToSave => "NOTHING_TO_SAVE",
            MappingError::Persistence(_) => "PERSISTENCE_ERROR",
            MappingError::Load(_) => "LOAD_ERROR",
            MappingError::Config(_) => "CONFIG_ERROR",
        }
    }
}

impl From<anyhow::Error> for MappingError {
    fn from(err: anyhow::Error) -> Self {
        MappingError::Persistence(format!("{:#}", err))
    }
}

pub type MappingResult<T> = std::result::Result<T, MappingError>;
