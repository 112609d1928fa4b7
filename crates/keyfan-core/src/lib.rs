//! keyfan-core: shared types, configuration schema, and error types
//!
//! Everything the derivation tree and the bulk engine agree on lives here:
//! the hierarchy shape and key paths, label/context tables, root secrets,
//! per-task outcomes, and the batch report.

pub mod config;
pub mod error;
pub mod types;

pub use error::{KeyfanError, KeyfanResult};
pub use types::{
    DerivationStats, EncryptionReport, FileRecord, HierarchyShape, KeyPath, NodeParameters,
    RootSecret, SkipReason, TaskOutcome,
};

/// Length of every derived key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;
