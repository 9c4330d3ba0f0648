// Entity Models
//
// Each entity has a stable identity and immutable-once-loaded or
// snapshot-style values:
// - Account: identity = account number within its side, read-only
// - Mapping: identity = mapping id, values change via the inference engine

pub mod account;
pub mod mapping;

pub use account::{Account, AccountCatalog, AccountSide, LedgerSection};
pub use mapping::{
    coalesce_pending, group_weight_totals, Cardinality, ChangeKind, Mapping, MappingPatch,
    MappingShape, MappingStatus, PendingChange, WEIGHT_TOLERANCE,
};
