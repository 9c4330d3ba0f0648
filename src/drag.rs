// 🖐️ Drag Interaction Controller
//
// Explicit state machine, decoupled from pointer/keyboard plumbing:
//
//   Idle ──start──▶ Dragging ──hover──▶ Hovering ──hover/leave──▶ ...
//     ▲                │                    │
//     └──── cancel ────┴────── end ─────────┘
//
// `end` over a cross-side candidate emits exactly one proposal to the sink.
// Every `end`/`cancel` returns the controller to Idle, whatever the sink says.

use crate::entities::{AccountSide, Mapping};
use crate::error::{MappingError, MappingResult};
use crate::inference::ConnectionProposal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DragItem {
    pub side: AccountSide,
    pub account_number: String,
}

impl DragItem {
    pub fn new(side: AccountSide, account_number: &str) -> Self {
        DragItem {
            side,
            account_number: account_number.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DragPhase {
    #[default]
    Idle,
    Dragging {
        item: DragItem,
    },
    Hovering {
        item: DragItem,
        over: DragItem,
    },
}

/// Receives the single proposal a valid drop produces.
pub trait ProposalSink {
    fn submit(&mut self, proposal: ConnectionProposal) -> MappingResult<Mapping>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum DropOutcome {
    /// Proposal accepted; the new mapping
    Connected(Mapping),
    /// Proposal reached the sink and was rejected
    Rejected(MappingError),
    /// No proposal emitted (same side, no candidate, or not dragging)
    Ignored,
}

#[derive(Debug, Clone, Default)]
pub struct DragController {
    phase: DragPhase,
}

impl DragController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &DragPhase {
        &self.phase
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.phase, DragPhase::Idle)
    }

    pub fn dragged(&self) -> Option<&DragItem> {
        match &self.phase {
            DragPhase::Idle => None,
            DragPhase::Dragging { item } | DragPhase::Hovering { item, .. } => Some(item),
        }
    }

    /// Gesture start. A second start replaces the captured item.
    pub fn start(&mut self, item: DragItem) {
        log::debug!("drag start side={} account={}", item.side, item.account_number);
        self.phase = DragPhase::Dragging { item };
    }

    /// Track the current drop candidate. Ignored while idle.
    pub fn hover(&mut self, over: DragItem) {
        self.phase = match std::mem::take(&mut self.phase) {
            DragPhase::Idle => DragPhase::Idle,
            DragPhase::Dragging { item } | DragPhase::Hovering { item, .. } => {
                DragPhase::Hovering { item, over }
            }
        };
    }

    /// Pointer left the candidate without releasing.
    pub fn leave(&mut self) {
        if let DragPhase::Hovering { item, .. } = std::mem::take(&mut self.phase) {
            self.phase = DragPhase::Dragging { item };
        }
    }

    pub fn cancel(&mut self) {
        if self.is_active() {
            log::debug!("drag cancelled");
        }
        self.phase = DragPhase::Idle;
    }

    /// Release. Only a cross-side candidate produces a proposal.
    pub fn end<S: ProposalSink>(&mut self, sink: &mut S) -> DropOutcome {
        let (item, over) = match std::mem::take(&mut self.phase) {
            DragPhase::Hovering { item, over } => (item, over),
            DragPhase::Dragging { .. } | DragPhase::Idle => return DropOutcome::Ignored,
        };

        let proposal = match (item.side, over.side) {
            (AccountSide::Source, AccountSide::Target) => {
                ConnectionProposal::new(&item.account_number, &over.account_number)
            }
            (AccountSide::Target, AccountSide::Source) => {
                ConnectionProposal::new(&over.account_number, &item.account_number)
            }
            (AccountSide::Source, AccountSide::Source) | (AccountSide::Target, AccountSide::Target) => {
                return DropOutcome::Ignored;
            }
        };

        match sink.submit(proposal) {
            Ok(mapping) => DropOutcome::Connected(mapping),
            Err(err) => DropOutcome::Rejected(err),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
