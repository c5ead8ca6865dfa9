//! Transactional file operations for cairn.
//!
//! This crate provides:
//! - Batch copy and move with conflict resolution, per-batch rollback and
//!   backups of overwritten items
//! - Delete, rename, create file and create directory
//! - A bounded undo/redo ledger for moves, renames and creations
//! - A stash for backups that could not be restored, with periodic sweeping
//! - Cancellation of in-flight batches and privilege escalation on
//!   permission errors
//!
//! [`Engine`] is the entry point; the other modules are exposed for hosts
//! that want to drive planning or execution themselves.

pub mod backup;
mod engine;
mod executor;
pub mod fsutil;
mod ledger;
mod planner;
mod progress;
mod registry;
mod resolver;
mod stash;

pub use engine::{Engine, TransferRequest};
pub use executor::{Executor, TransferReport};
pub use ledger::{Ledger, LedgerEntry, MovedItem, SharedLedger, UndoAction};
pub use planner::Planner;
pub use progress::{OperationComplete, OperationProgress, ProgressEvent, ProgressSender};
pub use registry::{DestinationGuard, DestinationLocks, OperationRegistry, Registration};
pub use resolver::{ChannelResolver, ConflictPrompt, ConflictResolver};
pub use stash::{StashManager, StashedBackup, SweepReport};

/// Default capacity for progress channels.
pub const PROGRESS_CHANNEL_SIZE: usize = 100;
