//! Persistence layer
//!
//! One canonical in-memory copy of:
//! - Session governance state and anchors
//! - The legacy epic/task store
//! - Delegation records
//! - The task graph
//!
//! mirrored to a document or SQLite backend through debounced writes.

mod anchor;
mod backend;
mod context;
mod database;
mod delegation;
mod document;
mod relational;
mod scheduler;
mod session;

pub use anchor::{Anchor, AnchorPriority};
pub use backend::{Envelope, StateSnapshot, StorageBackend, StorageError, StoreKind};
pub use context::{MaintenanceReport, PersistenceContext};
pub use database::Database;
pub use delegation::{Delegation, DelegationStatus, DelegationStore};
pub use document::DocumentBackend;
pub use relational::RelationalBackend;
pub use scheduler::{FlushScheduler, FlushTarget};
pub use session::{ActiveTaskRef, BlockedCall, SessionState};
