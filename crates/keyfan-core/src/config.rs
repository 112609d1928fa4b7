use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{KeyfanError, KeyfanResult};
use crate::types::{HierarchyShape, NodeParameters, RootSecret};

/// Top-level configuration (loaded from keyfan.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyfanConfig {
    pub hierarchy: HierarchyConfig,
    pub paths: PathsConfig,
    pub kdf: KdfConfig,
    pub cipher: CipherConfig,
    pub log: LogConfig,
}

impl KeyfanConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml(content: &str) -> KeyfanResult<Self> {
        toml::from_str(content).map_err(|e| KeyfanError::Config(e.to_string()))
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> KeyfanResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)
            .map_err(|e| KeyfanError::Config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn shape(&self) -> KeyfanResult<HierarchyShape> {
        HierarchyShape::new(
            self.hierarchy.companies,
            self.hierarchy.departments,
            self.hierarchy.units,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    /// Number of companies (one root secret each)
    pub companies: usize,
    /// Departments per company
    pub departments: usize,
    /// Units per department
    pub units: usize,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            companies: 10,
            departments: 10,
            units: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding `file_1.bin` .. `file_N.bin`
    pub input_dir: PathBuf,
    /// Directory receiving `enc_file_1.bin` .. `enc_file_N.bin`
    pub output_dir: PathBuf,
    /// Root secret file, one secret per line
    pub root_secrets: PathBuf,
    /// Label/context tables (TOML)
    pub tables: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("./config/files"),
            output_dir: PathBuf::from("./config/encrypted_files"),
            root_secrets: PathBuf::from("./config/company_keys.txt"),
            tables: PathBuf::from("./config/labels_contexts.toml"),
        }
    }
}

/// Pseudo-random function behind the counter-mode KDF.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrfAlgorithm {
    #[default]
    HmacSha256,
    CmacAes256,
}

/// Where the iteration counter sits relative to the fixed input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CounterLocation {
    #[default]
    BeforeFixed,
    AfterFixed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    pub prf: PrfAlgorithm,
    pub counter_location: CounterLocation,
    /// Derivation worker threads (0 = cpu_count)
    pub workers: usize,
}

/// Per-file encryption transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CipherSuite {
    #[default]
    Aes256Gcm,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
    /// Unauthenticated AES-256-CTR with zero-padded final block
    Aes256Ctr,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CipherConfig {
    pub suite: CipherSuite,
    /// Encryption worker threads (0 = 2 * cpu_count)
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Resolve a configured worker count, where 0 means `cpu_count * factor`.
pub fn resolve_workers(configured: usize, factor: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    (cpus * factor).max(1)
}

// ── Tables ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableEntry {
    label: String,
    context: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct TablesFile {
    departments: Vec<TableEntry>,
    units: Vec<TableEntry>,
}

/// Ordered department and unit label/context tables.
#[derive(Debug, Clone, Default)]
pub struct LabelTables {
    pub departments: Vec<NodeParameters>,
    pub units: Vec<NodeParameters>,
}

impl LabelTables {
    /// Placeholder tables: `Label department {j}` / `Context department {j}`
    /// and `Label unit {k}` / `Context unit {k}`.
    pub fn placeholder(departments: usize, units: usize) -> Self {
        Self {
            departments: (0..departments)
                .map(|j| {
                    NodeParameters::new(
                        format!("Label department {j}"),
                        format!("Context department {j}"),
                    )
                })
                .collect(),
            units: (0..units)
                .map(|k| NodeParameters::new(format!("Label unit {k}"), format!("Context unit {k}")))
                .collect(),
        }
    }

    pub fn from_toml(content: &str) -> KeyfanResult<Self> {
        let file: TablesFile =
            toml::from_str(content).map_err(|e| KeyfanError::Config(e.to_string()))?;
        let convert = |entries: Vec<TableEntry>| {
            entries
                .into_iter()
                .map(|e| NodeParameters::new(e.label, e.context))
                .collect()
        };
        Ok(Self {
            departments: convert(file.departments),
            units: convert(file.units),
        })
    }

    pub fn to_toml(&self) -> KeyfanResult<String> {
        let convert = |params: &[NodeParameters]| {
            params
                .iter()
                .map(|p| TableEntry {
                    label: String::from_utf8_lossy(&p.label).into_owned(),
                    context: String::from_utf8_lossy(&p.context).into_owned(),
                })
                .collect()
        };
        let file = TablesFile {
            departments: convert(&self.departments),
            units: convert(&self.units),
        };
        toml::to_string_pretty(&file).map_err(|e| KeyfanError::Config(e.to_string()))
    }
}

/// Load label/context tables from a TOML file with `[[departments]]` and
/// `[[units]]` arrays. Order is preserved.
pub fn load_tables(path: &Path) -> KeyfanResult<LabelTables> {
    let content = std::fs::read_to_string(path)?;
    let tables = LabelTables::from_toml(&content)
        .map_err(|e| KeyfanError::Config(format!("{}: {e}", path.display())))?;
    debug!(
        path = %path.display(),
        departments = tables.departments.len(),
        units = tables.units.len(),
        "loaded label tables"
    );
    Ok(tables)
}

/// Parse root secrets: one per line, UTF-8 bytes, blank lines and `#`
/// comments ignored. Only the line terminator is stripped; surrounding
/// whitespace is part of the secret.
pub fn parse_root_secrets(content: &str) -> Vec<RootSecret> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .map(RootSecret::from)
        .collect()
}

/// Load root secrets from a file (see [`parse_root_secrets`]).
pub fn load_root_secrets(path: &Path) -> KeyfanResult<Vec<RootSecret>> {
    let content = zeroize::Zeroizing::new(std::fs::read_to_string(path)?);
    let secrets = parse_root_secrets(&content);
    debug!(path = %path.display(), count = secrets.len(), "loaded root secrets");
    Ok(secrets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = KeyfanConfig::from_toml("").unwrap();
        assert_eq!(config.hierarchy.companies, 10);
        assert_eq!(config.kdf.prf, PrfAlgorithm::HmacSha256);
        assert_eq!(config.kdf.counter_location, CounterLocation::BeforeFixed);
        assert_eq!(config.cipher.suite, CipherSuite::Aes256Gcm);
        assert_eq!(config.paths.input_dir, PathBuf::from("./config/files"));
    }

    #[test]
    fn config_sections_parse() {
        let config = KeyfanConfig::from_toml(
            r#"
            [hierarchy]
            companies = 5
            departments = 3
            units = 4

            [kdf]
            prf = "cmac-aes256"
            counter_location = "after-fixed"
            workers = 2

            [cipher]
            suite = "chacha20-poly1305"
            workers = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.shape().unwrap().leaf_count(), 60);
        assert_eq!(config.kdf.prf, PrfAlgorithm::CmacAes256);
        assert_eq!(config.kdf.counter_location, CounterLocation::AfterFixed);
        assert_eq!(config.cipher.suite, CipherSuite::ChaCha20Poly1305);
        assert_eq!(config.cipher.workers, 16);
        // untouched sections keep defaults
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn unknown_prf_is_config_error() {
        let err = KeyfanConfig::from_toml("[kdf]\nprf = \"md5\"\n").unwrap_err();
        assert!(matches!(err, KeyfanError::Config(_)));
    }

    #[test]
    fn tables_roundtrip_preserves_order() {
        let tables = LabelTables::placeholder(3, 4);
        let text = tables.to_toml().unwrap();
        let parsed = LabelTables::from_toml(&text).unwrap();
        assert_eq!(parsed.departments, tables.departments);
        assert_eq!(parsed.units, tables.units);
        assert_eq!(parsed.units[2].label, b"Label unit 2".to_vec());
    }

    #[test]
    fn root_secrets_skip_blank_and_comment_lines() {
        let secrets = parse_root_secrets("# company keys\nalpha\n\n   \nbeta\r\n");
        assert_eq!(secrets.len(), 2);
        assert_eq!(secrets[0].expose(), b"alpha");
        assert_eq!(secrets[1].expose(), b"beta");
    }

    #[test]
    fn root_secret_whitespace_is_kept() {
        let secrets = parse_root_secrets("  padded secret \n\tTabbed\n");
        assert_eq!(secrets[0].expose(), b"  padded secret ");
        assert_eq!(secrets[1].expose(), b"\tTabbed");
    }

    #[test]
    fn resolve_workers_prefers_configured() {
        assert_eq!(resolve_workers(3, 2), 3);
        assert!(resolve_workers(0, 2) >= 2);
    }
}
