//! keyfan: hierarchical key derivation and bulk file encryption
//!
//! Commands:
//!   derive        - derive every leaf key and report timing
//!   encrypt       - derive keys and encrypt file_N.bin -> enc_file_N.bin
//!   decrypt       - re-derive one leaf key and decrypt its artifact
//!   bench         - repeat derive + encrypt and print a timing table
//!   generate      - write tables, root secrets and synthetic input files
//!   config show   - display the active configuration

mod generate;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use keyfan_bulk::{
    artifact_file_name, decrypt_artifact, input_files, BulkEngine, CancelToken, EngineOptions,
};
use keyfan_core::config::{
    load_root_secrets, load_tables, resolve_workers, CipherSuite, CounterLocation, KeyfanConfig,
    LabelTables, PrfAlgorithm,
};
use keyfan_core::{DerivationStats, EncryptionReport, HierarchyShape, RootSecret};
use keyfan_crypto::{CounterModeKdf, DerivedKey, FileCipher, KeyTree, KeyedPrf};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "keyfan",
    version,
    about = "Hierarchical key derivation and per-file bulk encryption"
)]
struct Cli {
    /// Path to keyfan.toml configuration file
    #[arg(long, short = 'c', env = "KEYFAN_CONFIG", default_value = "keyfan.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "KEYFAN_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "KEYFAN_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Derive all leaf keys and report timing (keys are never printed)
    Derive {
        #[command(flatten)]
        overrides: Overrides,
        /// Print derivation stats as JSON
        #[arg(long)]
        json: bool,
    },

    /// Derive all leaf keys and encrypt one input file per key
    Encrypt {
        #[command(flatten)]
        overrides: Overrides,
        /// Number of input files (default: one per leaf key)
        #[arg(long)]
        files: Option<usize>,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decrypt one artifact with its re-derived leaf key
    Decrypt {
        #[command(flatten)]
        overrides: Overrides,
        /// 1-based file number: decrypts enc_file_N.bin with leaf key N
        #[arg(long)]
        index: usize,
        /// Where to write the plaintext (default: ./dec_file_N.bin)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Run derive + encrypt repeatedly and print a timing table
    Bench {
        #[command(flatten)]
        overrides: Overrides,
        /// Number of rounds
        #[arg(long, default_value_t = 5)]
        rounds: usize,
    },

    /// Generate label/context tables, root secrets and input files
    Generate {
        #[arg(long, default_value_t = 10)]
        companies: usize,
        #[arg(long, default_value_t = 10)]
        departments: usize,
        #[arg(long, default_value_t = 10)]
        units: usize,
        /// Number of input files (default: companies * departments * units)
        #[arg(long)]
        files: Option<usize>,
        /// Size of each input file in MiB
        #[arg(long, default_value_t = 4)]
        size_mb: u64,
        /// Replace existing tables, secrets and input files
        #[arg(long)]
        force: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (defaults merged with the config file)
    Show,
}

/// Command-line overrides for configuration values.
#[derive(Args, Debug, Default)]
struct Overrides {
    #[arg(long)]
    companies: Option<usize>,
    #[arg(long)]
    departments: Option<usize>,
    #[arg(long)]
    units: Option<usize>,
    /// Input directory holding file_N.bin
    #[arg(long)]
    input_dir: Option<PathBuf>,
    /// Output directory for enc_file_N.bin
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Root secret file
    #[arg(long)]
    root_secrets: Option<PathBuf>,
    /// Label/context tables file
    #[arg(long)]
    tables: Option<PathBuf>,
    /// hmac-sha256 | cmac-aes256
    #[arg(long, value_parser = parse_kebab::<PrfAlgorithm>)]
    prf: Option<PrfAlgorithm>,
    /// before-fixed | after-fixed
    #[arg(long, value_parser = parse_kebab::<CounterLocation>)]
    counter_location: Option<CounterLocation>,
    /// aes256-gcm | chacha20-poly1305 | aes256-ctr
    #[arg(long, value_parser = parse_kebab::<CipherSuite>)]
    suite: Option<CipherSuite>,
    /// Derivation worker threads (0 = cpu count)
    #[arg(long)]
    kdf_workers: Option<usize>,
    /// Encryption worker threads (0 = 2 * cpu count)
    #[arg(long)]
    workers: Option<usize>,
}

impl Overrides {
    fn apply(&self, config: &mut KeyfanConfig) {
        if let Some(v) = self.companies {
            config.hierarchy.companies = v;
        }
        if let Some(v) = self.departments {
            config.hierarchy.departments = v;
        }
        if let Some(v) = self.units {
            config.hierarchy.units = v;
        }
        if let Some(v) = &self.input_dir {
            config.paths.input_dir = v.clone();
        }
        if let Some(v) = &self.output_dir {
            config.paths.output_dir = v.clone();
        }
        if let Some(v) = &self.root_secrets {
            config.paths.root_secrets = v.clone();
        }
        if let Some(v) = &self.tables {
            config.paths.tables = v.clone();
        }
        if let Some(v) = self.prf {
            config.kdf.prf = v;
        }
        if let Some(v) = self.counter_location {
            config.kdf.counter_location = v;
        }
        if let Some(v) = self.suite {
            config.cipher.suite = v;
        }
        if let Some(v) = self.kdf_workers {
            config.kdf.workers = v;
        }
        if let Some(v) = self.workers {
            config.cipher.workers = v;
        }
    }
}

/// Parse a kebab-case config enum value (`aes256-gcm`, `cmac-aes256`, ...).
fn parse_kebab<T: DeserializeOwned>(s: &str) -> Result<T, String> {
    use serde::de::value::{Error as ValueError, StrDeserializer};
    T::deserialize(StrDeserializer::<ValueError>::new(s)).map_err(|e| e.to_string())
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (mut config, found) = load_config(&cli.config)?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or_else(|| {
        if config.log.format.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    });
    init_logging(&level, &format);
    if !found {
        warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    match cli.command {
        Commands::Derive { overrides, json } => {
            overrides.apply(&mut config);
            cmd_derive(&config, json)
        }
        Commands::Encrypt {
            overrides,
            files,
            json,
        } => {
            overrides.apply(&mut config);
            cmd_encrypt(&config, files, json)
        }
        Commands::Decrypt {
            overrides,
            index,
            out,
        } => {
            overrides.apply(&mut config);
            cmd_decrypt(&config, index, out.as_deref())
        }
        Commands::Bench { overrides, rounds } => {
            overrides.apply(&mut config);
            cmd_bench(&config, rounds)
        }
        Commands::Generate {
            companies,
            departments,
            units,
            files,
            size_mb,
            force,
        } => cmd_generate(&config, companies, departments, units, files, size_mb, force),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config, found),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Load the config file, or defaults when it does not exist. The flag
/// reports whether a file was found.
fn load_config(path: &Path) -> Result<(KeyfanConfig, bool)> {
    if path.exists() {
        let config = KeyfanConfig::load(path)
            .with_context(|| format!("loading config: {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((KeyfanConfig::default(), false))
    }
}

// ── Shared setup ──────────────────────────────────────────────────────────────

/// Everything a derivation run needs, loaded from the configured paths.
struct Inputs {
    shape: HierarchyShape,
    roots: Vec<RootSecret>,
    tables: LabelTables,
    tree: KeyTree<PrfAlgorithm>,
}

impl Inputs {
    fn load(config: &KeyfanConfig) -> Result<Self> {
        let shape = config.shape().context("invalid [hierarchy]")?;
        let roots = load_root_secrets(&config.paths.root_secrets).with_context(|| {
            format!(
                "reading root secrets: {}",
                config.paths.root_secrets.display()
            )
        })?;
        let tables = load_tables(&config.paths.tables)
            .with_context(|| format!("reading tables: {}", config.paths.tables.display()))?;
        let tree = KeyTree::new(
            CounterModeKdf::new(config.kdf.prf, config.kdf.counter_location),
            resolve_workers(config.kdf.workers, 1),
        );
        Ok(Self {
            shape,
            roots,
            tables,
            tree,
        })
    }

    fn derive(&self) -> Result<(Vec<DerivedKey>, DerivationStats)> {
        self.tree
            .derive_all_timed(
                &self.roots,
                &self.tables.departments,
                &self.tables.units,
                self.shape,
            )
            .context("key derivation failed")
    }
}

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map(|s| s.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb
}

fn encryption_engine(config: &KeyfanConfig, options: EngineOptions) -> BulkEngine<CipherSuite> {
    BulkEngine::new(config.cipher.suite, options)
}

// ── `keyfan derive` ───────────────────────────────────────────────────────────

fn cmd_derive(config: &KeyfanConfig, json: bool) -> Result<()> {
    let inputs = Inputs::load(config)?;
    let (keys, stats) = inputs.derive()?;
    drop(keys);

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "derived {} keys ({} x {} x {}) in {:.3}s with {} workers ({:.0} keys/s)",
            stats.keys,
            inputs.shape.companies,
            inputs.shape.departments,
            inputs.shape.units,
            stats.elapsed.as_secs_f64(),
            stats.workers,
            stats.rate()
        );
    }
    Ok(())
}

// ── `keyfan encrypt` ──────────────────────────────────────────────────────────

fn cmd_encrypt(config: &KeyfanConfig, files: Option<usize>, json: bool) -> Result<()> {
    let inputs = Inputs::load(config)?;
    let (keys, stats) = inputs.derive()?;
    info!(keys = stats.keys, "keys ready");

    let count = files.unwrap_or(inputs.shape.leaf_count());
    let input_paths = input_files(&config.paths.input_dir, count);

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .context("installing interrupt handler")?;

    let pb = make_progress_bar(count as u64, "encrypt");
    let progress_pb = pb.clone();
    let options = EngineOptions::new(resolve_workers(config.cipher.workers, 2))
        .with_cancel(cancel)
        .with_progress(Box::new(move |done, _| progress_pb.set_position(done)));

    let report = encryption_engine(config, options)
        .encrypt_all(keys, &input_paths, &config.paths.output_dir)
        .with_context(|| format!("encrypting into {}", config.paths.output_dir.display()))?;
    pb.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, config.cipher.suite);
    }

    if !report.failed.is_empty() {
        anyhow::bail!("{} file(s) failed to encrypt", report.failed.len());
    }
    Ok(())
}

fn print_report(report: &EncryptionReport, suite: CipherSuite) {
    println!(
        "encrypted {} file(s) with {} in {:.3}s using {} workers ({:.0} files/s)",
        report.processed,
        suite.name(),
        report.elapsed.as_secs_f64(),
        report.workers,
        report.throughput()
    );
    println!("  bytes in:  {}", report.bytes_in);
    println!("  bytes out: {}", report.bytes_out);
    if !report.skipped.is_empty() {
        println!("  skipped:   {}", report.skipped.len());
        for (index, reason) in &report.skipped {
            println!("    {}: {reason}", input_name(*index));
        }
    }
    if !report.failed.is_empty() {
        println!("  failed:    {}", report.failed.len());
        for (index, error) in &report.failed {
            println!("    {}: {error}", input_name(*index));
        }
    }
    if report.cancelled > 0 {
        println!("  cancelled: {}", report.cancelled);
    }
}

fn input_name(index: usize) -> String {
    keyfan_bulk::input_file_name(index)
}

// ── `keyfan decrypt` ──────────────────────────────────────────────────────────

fn cmd_decrypt(config: &KeyfanConfig, number: usize, out: Option<&Path>) -> Result<()> {
    let index = number
        .checked_sub(1)
        .context("--index is 1-based (enc_file_1.bin is index 1)")?;
    let inputs = Inputs::load(config)?;
    let path = inputs.shape.key_path(index).with_context(|| {
        format!(
            "index {number} is outside the hierarchy ({} keys)",
            inputs.shape.leaf_count()
        )
    })?;
    let key = inputs
        .tree
        .derive_leaf(
            &inputs.roots,
            &inputs.tables.departments,
            &inputs.tables.units,
            inputs.shape,
            path,
        )
        .with_context(|| format!("deriving key {path}"))?;

    let artifact = config.paths.output_dir.join(artifact_file_name(index));
    let plaintext = decrypt_artifact(&config.cipher.suite, &key, &artifact)
        .with_context(|| format!("decrypting {}", artifact.display()))?;

    let target = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(format!("dec_file_{number}.bin")));
    std::fs::write(&target, plaintext.as_slice())
        .with_context(|| format!("writing {}", target.display()))?;

    println!(
        "decrypted {} with key {path} -> {} ({} bytes)",
        artifact.display(),
        target.display(),
        plaintext.len()
    );
    if !config.cipher.suite.is_authenticated() {
        println!("  note: {} output keeps its block padding", config.cipher.suite.name());
    }
    Ok(())
}

// ── `keyfan bench` ────────────────────────────────────────────────────────────

struct RoundResult {
    derivation: DerivationStats,
    encryption: EncryptionReport,
}

fn cmd_bench(config: &KeyfanConfig, rounds: usize) -> Result<()> {
    if rounds == 0 {
        anyhow::bail!("--rounds must be at least 1");
    }
    let inputs = Inputs::load(config)?;
    let input_paths = input_files(&config.paths.input_dir, inputs.shape.leaf_count());
    let engine = encryption_engine(
        config,
        EngineOptions::new(resolve_workers(config.cipher.workers, 2)),
    );

    let mut results = Vec::with_capacity(rounds);
    for round in 1..=rounds {
        info!(round, rounds, "bench round starting");
        let (keys, derivation) = inputs.derive()?;
        let encryption = engine
            .encrypt_all(keys, &input_paths, &config.paths.output_dir)
            .with_context(|| format!("round {round}: encryption failed"))?;
        if encryption.processed == 0 {
            warn!(round, input_dir = %config.paths.input_dir.display(), "no input files were encrypted");
        }
        results.push(RoundResult {
            derivation,
            encryption,
        });
    }

    println!(
        "\n=== Results summary ({} keys, {}, {}) ===",
        inputs.shape.leaf_count(),
        config.kdf.prf.name(),
        config.cipher.suite.name()
    );
    print!("{}", render_bench_table(&results));
    Ok(())
}

fn render_bench_table(results: &[RoundResult]) -> String {
    let mut rows: Vec<(String, Vec<String>)> = vec![
        ("Round".into(), Vec::new()),
        ("Key derivation time (s)".into(), Vec::new()),
        ("Key derivation rate (keys/s)".into(), Vec::new()),
        ("File encryption time (s)".into(), Vec::new()),
        ("File encryption rate (files/s)".into(), Vec::new()),
    ];
    for (i, r) in results.iter().enumerate() {
        rows[0].1.push(format!("Round {}", i + 1));
        rows[1].1.push(format!("{:.5}", r.derivation.elapsed.as_secs_f64()));
        rows[2].1.push(format!("{:.0}", r.derivation.rate()));
        rows[3].1.push(format!("{:.5}", r.encryption.elapsed.as_secs_f64()));
        rows[4].1.push(format!("{:.0}", r.encryption.throughput()));
    }

    let label_width = rows.iter().map(|(l, _)| l.len()).max().unwrap_or(0);
    let col_width = rows
        .iter()
        .flat_map(|(_, cells)| cells.iter().map(String::len))
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    for (n, (label, cells)) in rows.iter().enumerate() {
        out.push_str(&format!("{label:<label_width$}"));
        for cell in cells {
            out.push_str(&format!(" | {cell:>col_width$}"));
        }
        out.push('\n');
        if n == 0 {
            let width = label_width + cells.len() * (col_width + 3);
            out.push_str(&"-".repeat(width));
            out.push('\n');
        }
    }
    out
}

// ── `keyfan generate` ─────────────────────────────────────────────────────────

fn cmd_generate(
    config: &KeyfanConfig,
    companies: usize,
    departments: usize,
    units: usize,
    files: Option<usize>,
    size_mb: u64,
    force: bool,
) -> Result<()> {
    let shape = HierarchyShape::new(companies, departments, units)?;
    let files = files.unwrap_or(shape.leaf_count());
    generate::check_limits(files, size_mb)?;

    let paths = &config.paths;
    for (path, what) in [(&paths.tables, "tables"), (&paths.root_secrets, "root secrets")] {
        if path.exists() && !force {
            anyhow::bail!(
                "{what} file {} already exists (use --force to replace)",
                path.display()
            );
        }
    }

    generate::write_tables(&paths.tables, departments, units)?;
    println!(
        "wrote {} department and {} unit entries to {}",
        departments,
        units,
        paths.tables.display()
    );
    generate::write_root_secrets(&paths.root_secrets, companies)?;
    println!(
        "wrote {} root secrets to {}",
        companies,
        paths.root_secrets.display()
    );

    let pb = make_progress_bar(files as u64, "generate");
    let created = generate::write_input_files(
        &paths.input_dir,
        files,
        size_mb * 1024 * 1024,
        force,
        |n| pb.set_position(n),
    )?;
    pb.finish_and_clear();
    println!(
        "created {created} of {files} input files ({size_mb} MiB each) in {}",
        paths.input_dir.display()
    );
    Ok(())
}

// ── `keyfan config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &KeyfanConfig, config_path: &Path, found: bool) -> Result<()> {
    if found {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyfan_core::{FileRecord, TaskOutcome};
    use std::time::Duration;

    #[test]
    fn cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn kebab_values_parse() {
        assert_eq!(
            parse_kebab::<CipherSuite>("chacha20-poly1305").unwrap(),
            CipherSuite::ChaCha20Poly1305
        );
        assert_eq!(
            parse_kebab::<PrfAlgorithm>("cmac-aes256").unwrap(),
            PrfAlgorithm::CmacAes256
        );
        assert!(parse_kebab::<CipherSuite>("des").is_err());
    }

    #[test]
    fn overrides_replace_config_values() {
        let cli = Cli::try_parse_from([
            "keyfan",
            "encrypt",
            "--companies",
            "2",
            "--suite",
            "aes256-ctr",
            "--workers",
            "3",
            "--output-dir",
            "/tmp/out",
        ])
        .unwrap();
        let Commands::Encrypt { overrides, .. } = cli.command else {
            panic!("expected encrypt");
        };
        let mut config = KeyfanConfig::default();
        overrides.apply(&mut config);
        assert_eq!(config.hierarchy.companies, 2);
        assert_eq!(config.hierarchy.departments, 10);
        assert_eq!(config.cipher.suite, CipherSuite::Aes256Ctr);
        assert_eq!(config.cipher.workers, 3);
        assert_eq!(config.paths.output_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn missing_config_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, found) = load_config(&tmp.path().join("absent.toml")).unwrap();
        assert!(!found);
        assert_eq!(config.hierarchy.units, 10);
    }

    #[test]
    fn bench_table_has_a_column_per_round() {
        let record = FileRecord {
            index: 0,
            input: PathBuf::from("file_1.bin"),
            output: None,
            outcome: TaskOutcome::Encrypted {
                bytes_in: 10,
                bytes_out: 38,
            },
        };
        let round = || RoundResult {
            derivation: DerivationStats {
                keys: 1000,
                workers: 4,
                elapsed: Duration::from_millis(500),
            },
            encryption: EncryptionReport::from_records(
                vec![record.clone()],
                8,
                Duration::from_millis(250),
            ),
        };
        let table = render_bench_table(&[round(), round()]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].contains("Round 2"));
        assert!(lines[2].starts_with("Key derivation time (s)"));
        assert!(lines[3].contains("2000"));
        assert!(lines[5].contains('4'));
    }
}
