//! Migration function packaging
//!
//! Builds the zip the migration function is deployed from: the `bootstrap`
//! executable at the archive root and the migration scripts under
//! `migrations/`, which is where the function looks for them at run time.
//! Entries carry a fixed timestamp, so identical inputs give an identical
//! archive and the same content-addressed key.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::{Error, Result};

pub const ASSET_DIR: &str = "assets";
pub const BOOTSTRAP_ENTRY: &str = "bootstrap";
pub const MIGRATIONS_ENTRY: &str = "migrations";
pub const DEFAULT_MIGRATIONS_SOURCE: &str = "rds_migrator/migrations";

/// A packaged migration function
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionPackage {
    /// Archive path relative to the synth output directory
    pub file: String,
    /// Key to upload the archive under in the code bucket
    pub s3_key: String,
    pub sha256: String,
    /// Script names as stored under `migrations/`
    pub migrations: Vec<String>,
    #[serde(skip)]
    pub path: PathBuf,
}

/// Zip `bootstrap` and the scripts in `migrations_dir` into `<out_dir>/assets`
pub fn package_function(
    bootstrap: &Path,
    migrations_dir: &Path,
    out_dir: &Path,
) -> Result<FunctionPackage> {
    if !bootstrap.is_file() {
        return Err(Error::PackageError(format!(
            "bootstrap executable not found: {}",
            bootstrap.display()
        )));
    }
    if !migrations_dir.is_dir() {
        return Err(Error::PackageError(format!(
            "migrations directory not found: {}",
            migrations_dir.display()
        )));
    }

    let scripts = collect_scripts(migrations_dir)?;
    let archive = build_archive(bootstrap, &scripts)?;
    let sha256 = hex::encode(Sha256::digest(&archive));

    let asset_dir = out_dir.join(ASSET_DIR);
    fs::create_dir_all(&asset_dir)?;
    let file_name = format!("migrator.{}.zip", sha256);
    let path = asset_dir.join(&file_name);
    fs::write(&path, &archive)?;

    info!(
        path = %path.display(),
        scripts = scripts.len(),
        bytes = archive.len(),
        "Packaged migration function"
    );

    Ok(FunctionPackage {
        file: format!("{}/{}", ASSET_DIR, file_name),
        s3_key: format!("migrator/{}.zip", sha256),
        sha256,
        migrations: scripts.into_iter().map(|(name, _)| name).collect(),
        path,
    })
}

/// Files below `dir` as (`/`-separated relative name, path), hidden files skipped
fn collect_scripts(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut scripts = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| Error::PackageError(e.to_string()))?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.iter().any(|part| part.starts_with('.')) {
            debug!(path = %entry.path().display(), "Skipping hidden file");
            continue;
        }

        scripts.push((parts.join("/"), entry.into_path()));
    }

    Ok(scripts)
}

fn entry_options(mode: u32) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(mode)
}

fn build_archive(bootstrap: &Path, scripts: &[(String, PathBuf)]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    writer.start_file(BOOTSTRAP_ENTRY, entry_options(0o755))?;
    writer.write_all(&fs::read(bootstrap)?)?;

    // The directory entry keeps `migrations/` present even with no scripts
    writer.add_directory(format!("{}/", MIGRATIONS_ENTRY), entry_options(0o755))?;
    for (name, path) in scripts {
        writer.start_file(format!("{}/{}", MIGRATIONS_ENTRY, name), entry_options(0o644))?;
        writer.write_all(&fs::read(path)?)?;
    }

    Ok(writer.finish()?.into_inner())
}
