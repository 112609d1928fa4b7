//! Fixture generation for `keyfan generate`

use anyhow::{bail, Context, Result};
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use std::io::Write;
use std::path::Path;

use keyfan_bulk::input_file_name;
use keyfan_core::config::LabelTables;

pub const MAX_FILES: usize = 250_000;
pub const MAX_FILE_SIZE_MB: u64 = 2_048;
pub const MAX_TOTAL_MB: u64 = 500 * 1024;

const SECRET_LEN: usize = 32;
const WRITE_CHUNK: usize = 1024 * 1024;

/// Refuse fixture sets that are too large before anything is written.
pub fn check_limits(files: usize, size_mb: u64) -> Result<()> {
    if files > MAX_FILES {
        bail!("cannot create more than {MAX_FILES} files (asked for {files})");
    }
    if size_mb > MAX_FILE_SIZE_MB {
        bail!("cannot create files larger than {MAX_FILE_SIZE_MB} MiB (asked for {size_mb})");
    }
    let total = (files as u64).saturating_mul(size_mb);
    if total > MAX_TOTAL_MB {
        bail!(
            "fixture set would total {} GiB, limit is {} GiB",
            total / 1024,
            MAX_TOTAL_MB / 1024
        );
    }
    Ok(())
}

/// Write placeholder label/context tables.
pub fn write_tables(path: &Path, departments: usize, units: usize) -> Result<()> {
    let rendered = LabelTables::placeholder(departments, units).to_toml()?;
    create_parent(path)?;
    std::fs::write(path, rendered).with_context(|| format!("writing {}", path.display()))
}

/// Write `companies` fresh 32-character root secrets, one per line.
pub fn write_root_secrets(path: &Path, companies: usize) -> Result<()> {
    let mut rng = rand::thread_rng();
    let mut content = String::with_capacity(companies * (SECRET_LEN + 1));
    for _ in 0..companies {
        let secret: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(SECRET_LEN)
            .map(char::from)
            .collect();
        content.push_str(&secret);
        content.push('\n');
    }
    create_parent(path)?;
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))
}

/// Fill `dir` with `file_1.bin` .. `file_{count}.bin` of random content.
///
/// One random base file is written and copied to the remaining names.
/// Existing files are kept unless `overwrite` is set. Returns the number
/// of files created.
pub fn write_input_files(
    dir: &Path,
    count: usize,
    size_bytes: u64,
    overwrite: bool,
    on_file: impl Fn(u64),
) -> Result<usize> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    if count == 0 {
        return Ok(0);
    }

    let base = dir.join(".keyfan-base.bin");
    write_random(&base, size_bytes)?;

    let mut created = 0;
    for i in 0..count {
        let target = dir.join(input_file_name(i));
        if overwrite || !target.exists() {
            std::fs::copy(&base, &target)
                .with_context(|| format!("writing {}", target.display()))?;
            created += 1;
        }
        on_file(i as u64 + 1);
    }
    std::fs::remove_file(&base).with_context(|| format!("removing {}", base.display()))?;
    Ok(created)
}

fn write_random(path: &Path, size_bytes: u64) -> Result<()> {
    let file =
        std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    let mut rng = rand::thread_rng();
    let mut chunk = vec![0u8; WRITE_CHUNK];
    let mut remaining = size_bytes;
    while remaining > 0 {
        let n = remaining.min(WRITE_CHUNK as u64) as usize;
        rng.fill_bytes(&mut chunk[..n]);
        writer.write_all(&chunk[..n])?;
        remaining -= n as u64;
    }
    writer.flush()?;
    Ok(())
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(())
}
