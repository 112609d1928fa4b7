use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{KeyfanError, KeyfanResult};

/// Dimensions of the company → department → unit hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyShape {
    pub companies: usize,
    pub departments: usize,
    pub units: usize,
}

impl HierarchyShape {
    /// Build a shape, rejecting zero-sized dimensions.
    pub fn new(companies: usize, departments: usize, units: usize) -> KeyfanResult<Self> {
        let shape = Self {
            companies,
            departments,
            units,
        };
        shape.validate()?;
        Ok(shape)
    }

    pub fn validate(&self) -> KeyfanResult<()> {
        if self.companies == 0 || self.departments == 0 || self.units == 0 {
            return Err(KeyfanError::InvalidInput(format!(
                "hierarchy dimensions must be positive, got {}x{}x{}",
                self.companies, self.departments, self.units
            )));
        }
        if self
            .companies
            .checked_mul(self.departments)
            .and_then(|n| n.checked_mul(self.units))
            .is_none()
        {
            return Err(KeyfanError::InvalidInput(format!(
                "hierarchy {}x{}x{} has more leaves than fit in usize",
                self.companies, self.departments, self.units
            )));
        }
        Ok(())
    }

    /// Number of (company, department) derivation tasks.
    pub fn department_count(&self) -> usize {
        self.companies * self.departments
    }

    /// Total number of leaf (unit) keys.
    pub fn leaf_count(&self) -> usize {
        self.companies * self.departments * self.units
    }

    /// Row-major position of `path` in the flattened leaf-key sequence.
    pub fn flat_index(&self, path: KeyPath) -> Option<usize> {
        if path.company >= self.companies
            || path.department >= self.departments
            || path.unit >= self.units
        {
            return None;
        }
        Some(
            path.company * self.departments * self.units
                + path.department * self.units
                + path.unit,
        )
    }

    /// Inverse of [`flat_index`](Self::flat_index).
    pub fn key_path(&self, index: usize) -> Option<KeyPath> {
        if index >= self.leaf_count() {
            return None;
        }
        let per_company = self.departments * self.units;
        Some(KeyPath {
            company: index / per_company,
            department: (index % per_company) / self.units,
            unit: index % self.units,
        })
    }
}

/// `(company, department, unit)` coordinates of one leaf key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPath {
    pub company: usize,
    pub department: usize,
    pub unit: usize,
}

impl KeyPath {
    pub fn new(company: usize, department: usize, unit: usize) -> Self {
        Self {
            company,
            department,
            unit,
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.company, self.department, self.unit)
    }
}

/// Label and context identifying one derivation step.
///
/// Position in its table is significant: entry `i` of the department table
/// is department `i` of every company.
#[derive(Clone, PartialEq, Eq)]
pub struct NodeParameters {
    pub label: Vec<u8>,
    pub context: Vec<u8>,
}

impl NodeParameters {
    pub fn new(label: impl Into<Vec<u8>>, context: impl Into<Vec<u8>>) -> Self {
        Self {
            label: label.into(),
            context: context.into(),
        }
    }
}

impl fmt::Debug for NodeParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeParameters")
            .field("label", &String::from_utf8_lossy(&self.label))
            .field("context", &String::from_utf8_lossy(&self.context))
            .finish()
    }
}

/// Per-company root secret. Zeroized on drop, redacted in `Debug`.
pub struct RootSecret {
    bytes: SecretBox<[u8]>,
}

impl RootSecret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: SecretBox::new(bytes.into_boxed_slice()),
        }
    }

    pub fn expose(&self) -> &[u8] {
        self.bytes.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.expose().len()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl From<&str> for RootSecret {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }
}

impl fmt::Debug for RootSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootSecret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Why a file was not encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The input file does not exist
    FileNotFound,
    /// More input files than leaf keys
    NoKey,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::FileNotFound => f.write_str("file not found"),
            SkipReason::NoKey => f.write_str("no key"),
        }
    }
}

/// Result of one per-file encryption task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Encrypted { bytes_in: u64, bytes_out: u64 },
    Skipped { reason: SkipReason },
    Failed { error: String },
    /// Never started because the batch was cancelled
    Cancelled,
}

/// One slot of the batch result, filled by exactly one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub index: usize,
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub outcome: TaskOutcome,
}

/// Aggregate result of a bulk encryption run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionReport {
    pub processed: usize,
    pub skipped: Vec<(usize, SkipReason)>,
    pub failed: Vec<(usize, String)>,
    pub cancelled: usize,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub workers: usize,
    pub elapsed: Duration,
    pub records: Vec<FileRecord>,
}

impl EncryptionReport {
    /// Reduce per-task records (ordered by index) into a report.
    pub fn from_records(records: Vec<FileRecord>, workers: usize, elapsed: Duration) -> Self {
        let mut report = Self {
            processed: 0,
            skipped: Vec::new(),
            failed: Vec::new(),
            cancelled: 0,
            bytes_in: 0,
            bytes_out: 0,
            workers,
            elapsed,
            records: Vec::new(),
        };

        for record in &records {
            match &record.outcome {
                TaskOutcome::Encrypted { bytes_in, bytes_out } => {
                    report.processed += 1;
                    report.bytes_in += bytes_in;
                    report.bytes_out += bytes_out;
                }
                TaskOutcome::Skipped { reason } => report.skipped.push((record.index, *reason)),
                TaskOutcome::Failed { error } => report.failed.push((record.index, error.clone())),
                TaskOutcome::Cancelled => report.cancelled += 1,
            }
        }
        report.records = records;
        report
    }

    pub fn skipped_count(&self, reason: SkipReason) -> usize {
        self.skipped.iter().filter(|(_, r)| *r == reason).count()
    }

    /// Encrypted files per second of wall time.
    pub fn throughput(&self) -> f64 {
        rate(self.processed, self.elapsed)
    }
}

/// Timing of one key derivation run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DerivationStats {
    pub keys: usize,
    pub workers: usize,
    pub elapsed: Duration,
}

impl DerivationStats {
    /// Derived keys per second of wall time.
    pub fn rate(&self) -> f64 {
        rate(self.keys, self.elapsed)
    }
}

fn rate(count: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(HierarchyShape::new(0, 3, 4).is_err());
        assert!(HierarchyShape::new(5, 0, 4).is_err());
        assert!(HierarchyShape::new(5, 3, 0).is_err());
        assert_eq!(HierarchyShape::new(5, 3, 4).unwrap().leaf_count(), 60);
    }

    #[test]
    fn overflowing_leaf_count_is_rejected() {
        let err = HierarchyShape::new(usize::MAX / 2, 3, 1).unwrap_err();
        assert!(matches!(err, KeyfanError::InvalidInput(_)));
        assert!(HierarchyShape::new(1 << 20, 1 << 20, 1 << 30).is_err());
    }

    #[test]
    fn flat_index_is_row_major() {
        let shape = HierarchyShape::new(5, 3, 4).unwrap();
        for i in 0..5 {
            for j in 0..3 {
                for k in 0..4 {
                    let path = KeyPath::new(i, j, k);
                    let idx = shape.flat_index(path).unwrap();
                    assert_eq!(idx, i * 3 * 4 + j * 4 + k);
                    assert_eq!(shape.key_path(idx), Some(path));
                }
            }
        }
        assert_eq!(shape.flat_index(KeyPath::new(5, 0, 0)), None);
        assert_eq!(shape.key_path(60), None);
    }

    #[test]
    fn root_secret_debug_is_redacted() {
        let secret = RootSecret::from("QRm9yuXDi2kfRJkxR6hyAUaNw7OV7OTu");
        let debug = format!("{secret:?}");
        assert!(!debug.contains("QRm9"));
        assert!(debug.contains("REDACTED"));
        assert_eq!(secret.len(), 32);
    }

    #[test]
    fn report_reduces_outcomes() {
        let records = vec![
            FileRecord {
                index: 0,
                input: "file_1.bin".into(),
                output: Some("enc_file_1.bin".into()),
                outcome: TaskOutcome::Encrypted {
                    bytes_in: 10,
                    bytes_out: 38,
                },
            },
            FileRecord {
                index: 1,
                input: "file_2.bin".into(),
                output: None,
                outcome: TaskOutcome::Skipped {
                    reason: SkipReason::FileNotFound,
                },
            },
            FileRecord {
                index: 2,
                input: "file_3.bin".into(),
                output: None,
                outcome: TaskOutcome::Skipped {
                    reason: SkipReason::NoKey,
                },
            },
            FileRecord {
                index: 3,
                input: "file_4.bin".into(),
                output: None,
                outcome: TaskOutcome::Cancelled,
            },
        ];

        let report = EncryptionReport::from_records(records, 4, Duration::from_secs(2));
        assert_eq!(report.processed, 1);
        assert_eq!(report.bytes_in, 10);
        assert_eq!(report.bytes_out, 38);
        assert_eq!(report.skipped_count(SkipReason::FileNotFound), 1);
        assert_eq!(report.skipped_count(SkipReason::NoKey), 1);
        assert_eq!(report.cancelled, 1);
        assert!(report.failed.is_empty());
        assert!((report.throughput() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn rate_of_zero_elapsed_is_zero() {
        let stats = DerivationStats {
            keys: 100,
            workers: 1,
            elapsed: Duration::ZERO,
        };
        assert_eq!(stats.rate(), 0.0);
    }
}
