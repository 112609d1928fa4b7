//! keyfan-bulk: binds each leaf key to exactly one input file and encrypts
//! the batch on a bounded worker pool
//!
//! File naming (1-based): position `i` reads `file_{i+1}.bin` and writes
//! `enc_file_{i+1}.bin`.

pub mod engine;
pub mod pool;

pub use engine::{
    artifact_file_name, decrypt_artifact, input_file_name, input_files, BulkEngine,
    EncryptionTask, EngineOptions, ProgressFn,
};
pub use pool::CancelToken;
