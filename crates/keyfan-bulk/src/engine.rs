//! Bulk file encryption
//!
//! Keys and files are zipped by position: key `i` encrypts input `i` and
//! nothing else. Each task owns its key and drops it when done, so a key is
//! never reused across files. Per-file problems become a [`TaskOutcome`] in
//! the report; only failures that affect the whole batch (output directory,
//! pool construction) are returned as errors.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use keyfan_core::{
    EncryptionReport, FileRecord, KeyfanError, KeyfanResult, SkipReason, TaskOutcome,
};
use keyfan_crypto::{DerivedKey, FileCipher};

use crate::pool::{build_pool, CancelToken};

/// Progress callback: `(tasks_done, tasks_total)`.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

/// `file_{index+1}.bin`
pub fn input_file_name(index: usize) -> String {
    format!("file_{}.bin", index + 1)
}

/// `enc_file_{index+1}.bin`
pub fn artifact_file_name(index: usize) -> String {
    format!("enc_file_{}.bin", index + 1)
}

/// The first `count` conventional input paths under `dir`.
pub fn input_files(dir: &Path, count: usize) -> Vec<PathBuf> {
    (0..count).map(|i| dir.join(input_file_name(i))).collect()
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

/// One unit of work: a single key bound to a single input/output pair.
#[derive(Debug)]
pub struct EncryptionTask {
    index: usize,
    key: DerivedKey,
    input: PathBuf,
    output: PathBuf,
}

impl EncryptionTask {
    /// Bind `key` to `input`, writing under `output_dir`.
    ///
    /// Rejects a binding whose artifact path would overwrite its own input.
    pub fn new(
        index: usize,
        key: DerivedKey,
        input: PathBuf,
        output_dir: &Path,
    ) -> KeyfanResult<Self> {
        let output = output_dir.join(artifact_file_name(index));
        if output == input {
            return Err(KeyfanError::InvalidInput(format!(
                "artifact path {} is the input file",
                output.display()
            )));
        }
        Ok(Self {
            index,
            key,
            input,
            output,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Read, encrypt once, write atomically. Consumes the task so the key
    /// is zeroized on return.
    fn run<C: FileCipher>(self, cipher: &C) -> FileRecord {
        let outcome = match self.encrypt_file(cipher) {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_fatal() {
                    error!(index = self.index, input = %self.input.display(), error = %e, "encryption task misconfigured");
                } else {
                    warn!(index = self.index, input = %self.input.display(), error = %e, "encryption failed");
                }
                TaskOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        let output = matches!(outcome, TaskOutcome::Encrypted { .. }).then(|| self.output.clone());
        FileRecord {
            index: self.index,
            input: self.input.clone(),
            output,
            outcome,
        }
    }

    fn encrypt_file<C: FileCipher>(&self, cipher: &C) -> KeyfanResult<TaskOutcome> {
        let plaintext = match std::fs::read(&self.input) {
            Ok(data) => Zeroizing::new(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(index = self.index, input = %self.input.display(), "input missing, skipped");
                return Ok(TaskOutcome::Skipped {
                    reason: SkipReason::FileNotFound,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let blob = cipher.encrypt(self.key.as_bytes(), &plaintext)?.to_bytes();

        let tmp = partial_path(&self.output);
        if let Err(e) = std::fs::write(&tmp, &blob) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        if let Err(e) = std::fs::rename(&tmp, &self.output) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!(index = self.index, output = %self.output.display(), bytes = blob.len(), "encrypted");
        Ok(TaskOutcome::Encrypted {
            bytes_in: plaintext.len() as u64,
            bytes_out: blob.len() as u64,
        })
    }
}

/// Work item after zipping keys with files.
enum Work {
    Encrypt(EncryptionTask),
    NoKey {
        index: usize,
        input: PathBuf,
    },
    /// The binding failed validation; its key has already been dropped.
    Rejected {
        index: usize,
        input: PathBuf,
        error: String,
    },
}

impl Work {
    fn index(&self) -> usize {
        match self {
            Work::Encrypt(task) => task.index,
            Work::NoKey { index, .. } | Work::Rejected { index, .. } => *index,
        }
    }

    fn input(&self) -> &Path {
        match self {
            Work::Encrypt(task) => &task.input,
            Work::NoKey { input, .. } | Work::Rejected { input, .. } => input,
        }
    }
}

/// Engine settings.
pub struct EngineOptions {
    /// Worker pool size (at least 1)
    pub workers: usize,
    pub cancel: CancelToken,
    pub progress: Option<ProgressFn>,
}

impl EngineOptions {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            cancel: CancelToken::new(),
            progress: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl std::fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineOptions")
            .field("workers", &self.workers)
            .field("cancel", &self.cancel)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Encrypts a batch of files, one derived key per file.
#[derive(Debug)]
pub struct BulkEngine<C> {
    cipher: C,
    options: EngineOptions,
}

impl<C: FileCipher> BulkEngine<C> {
    pub fn new(cipher: C, options: EngineOptions) -> Self {
        Self { cipher, options }
    }

    pub fn cipher(&self) -> &C {
        &self.cipher
    }

    pub fn workers(&self) -> usize {
        self.options.workers
    }

    /// Encrypt `input_files[i]` with `keys[i]` into
    /// `output_dir/enc_file_{i+1}.bin`.
    ///
    /// Files without a key are reported as skipped; surplus keys are
    /// dropped unused. Existing artifacts are overwritten.
    pub fn encrypt_all(
        &self,
        keys: Vec<DerivedKey>,
        input_files: &[PathBuf],
        output_dir: &Path,
    ) -> KeyfanResult<EncryptionReport> {
        std::fs::create_dir_all(output_dir)?;
        let pool = build_pool("keyfan-encrypt", self.options.workers)?;

        let key_count = keys.len();
        let mut keys = keys.into_iter();
        let mut work = Vec::with_capacity(input_files.len());
        for (index, input) in input_files.iter().enumerate() {
            match keys.next() {
                Some(key) => match EncryptionTask::new(index, key, input.clone(), output_dir) {
                    Ok(task) => work.push(Work::Encrypt(task)),
                    Err(e) => {
                        warn!(index, input = %input.display(), error = %e, "task rejected");
                        work.push(Work::Rejected {
                            index,
                            input: input.clone(),
                            error: e.to_string(),
                        });
                    }
                },
                None => work.push(Work::NoKey {
                    index,
                    input: input.clone(),
                }),
            }
        }
        let unused = keys.len();
        drop(keys);
        if unused > 0 {
            debug!(unused, "more keys than input files");
        }
        if key_count < input_files.len() {
            warn!(
                keys = key_count,
                files = input_files.len(),
                "fewer keys than input files, extra files are skipped"
            );
        }

        let start = Instant::now();
        let total = work.len() as u64;
        let done = AtomicU64::new(0);
        let records: Vec<FileRecord> = pool.install(|| {
            work.into_par_iter()
                .map(|item| {
                    let record = self.process(item);
                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(progress) = &self.options.progress {
                        progress(n, total);
                    }
                    record
                })
                .collect()
        });

        let report = EncryptionReport::from_records(records, self.options.workers, start.elapsed());
        info!(
            cipher = self.cipher.name(),
            processed = report.processed,
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled,
            workers = report.workers,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "encryption batch finished"
        );
        Ok(report)
    }

    fn process(&self, item: Work) -> FileRecord {
        if self.options.cancel.is_cancelled() {
            return FileRecord {
                index: item.index(),
                input: item.input().to_path_buf(),
                output: None,
                outcome: TaskOutcome::Cancelled,
            };
        }
        match item {
            Work::Encrypt(task) => task.run(&self.cipher),
            Work::NoKey { index, input } => FileRecord {
                index,
                input,
                output: None,
                outcome: TaskOutcome::Skipped {
                    reason: SkipReason::NoKey,
                },
            },
            Work::Rejected {
                index,
                input,
                error,
            } => FileRecord {
                index,
                input,
                output: None,
                outcome: TaskOutcome::Failed { error },
            },
        }
    }
}

/// Decrypt one artifact produced by [`BulkEngine::encrypt_all`].
pub fn decrypt_artifact<C: FileCipher>(
    cipher: &C,
    key: &DerivedKey,
    path: &Path,
) -> KeyfanResult<Zeroizing<Vec<u8>>> {
    let blob = std::fs::read(path)?;
    cipher.decrypt(key.as_bytes(), &blob)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_one_based() {
        assert_eq!(input_file_name(0), "file_1.bin");
        assert_eq!(artifact_file_name(59), "enc_file_60.bin");
        let paths = input_files(Path::new("/data"), 2);
        assert_eq!(paths[1], Path::new("/data/file_2.bin"));
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/out/enc_file_3.bin")),
            Path::new("/out/enc_file_3.bin.partial")
        );
    }

    #[test]
    fn task_refuses_to_overwrite_its_input() {
        let dir = Path::new("/same");
        let err = EncryptionTask::new(
            0,
            DerivedKey::from_bytes([1; 32]),
            dir.join("enc_file_1.bin"),
            dir,
        )
        .unwrap_err();
        assert!(matches!(err, KeyfanError::InvalidInput(_)));
    }

    #[test]
    fn options_clamp_workers() {
        assert_eq!(EngineOptions::new(0).workers, 1);
    }
}
