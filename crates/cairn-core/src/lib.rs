//! Core types and traits for cairn.
//!
//! This crate provides the data structures shared by the planner, executor
//! and escalation bridge: operation and conflict types, the error taxonomy,
//! path safety validation, engine configuration and user settings.

mod config;
mod conflict;
mod error;
mod operation;
mod settings;
mod validate;

pub use config::{EngineConfig, EngineConfigBuilder, default_stash_root};
pub use conflict::{Conflict, ConflictBehavior, ConflictDecision};
pub use error::{OpError, OpResult};
pub use operation::{
    FileOperation, OpOutcome, OperationId, OperationKind, PlannedOperation, TransferMode,
};
pub use settings::{MemorySettings, SettingsStore, UserSettings};
pub use validate::{
    MAX_NAME_LEN, PathPolicy, is_reserved_device_name, validate_filename, validate_path,
};
