//! Encryption worker pool and cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use keyfan_core::{KeyfanError, KeyfanResult};

/// Cloneable cancellation flag. Tasks check it before starting; a task that
/// is already running finishes normally.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Build a pool with exactly `workers` threads named `{name}-{i}`.
pub fn build_pool(name: &'static str, workers: usize) -> KeyfanResult<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(move |i| format!("{name}-{i}"))
        .build()
        .map_err(|e| KeyfanError::Other(anyhow::anyhow!("building {name} pool: {e}")))
}
