//! Backup and restore (§4.K): a directory snapshot of every collection and
//! metadata file, with a manifest recording what was captured.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

use crate::config::Mode;
use crate::error::{Error, TdbxResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub timestamp: String,
    pub collections: Vec<String>,
    pub version: String,
    pub mode: String,
}

const MANIFEST_VERSION: &str = "1.0";

/// Creates `backup-<iso-timestamp>/` under `target_dir`, copying every
/// `.tdbx` collection file and the `.auth`/`.users` metadata documents
/// byte-for-byte (no re-encryption: the backup inherits whatever envelope
/// the source files are already in), then writes `manifest.json`.
///
/// Returns the backup directory's path.
pub fn create(
    database_dir: &Path,
    target_dir: &Path,
    mode: Mode,
    timestamp: &str,
) -> TdbxResult<PathBuf> {
    let backup_dir = target_dir.join(format!("backup-{timestamp}"));
    std::fs::create_dir_all(&backup_dir)
        .map_err(|e| Error::Backup(format!("{}: {e}", backup_dir.display())))?;

    let mut collections = Vec::new();
    let entries = std::fs::read_dir(database_dir).map_err(|e| Error::Backup(format!("{}: {e}", database_dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::Backup(e.to_string()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();

        let is_collection = name.ends_with(".tdbx");
        let is_metadata = name == ".auth" || name == ".users";
        if !is_collection && !is_metadata {
            continue;
        }

        std::fs::copy(&path, backup_dir.join(name.as_ref()))
            .map_err(|e| Error::Backup(format!("copying {}: {e}", path.display())))?;

        if is_collection {
            collections.push(name.trim_end_matches(".tdbx").to_string());
        }
    }

    let manifest = Manifest {
        timestamp: timestamp.to_string(),
        collections,
        version: MANIFEST_VERSION.to_string(),
        mode: mode.as_str().to_string(),
    };
    let manifest_text = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| Error::Backup(format!("failed to encode manifest: {e}")))?;
    std::fs::write(backup_dir.join("manifest.json"), manifest_text)
        .map_err(|e| Error::Backup(format!("writing manifest.json: {e}")))?;

    Ok(backup_dir)
}

/// Reads and validates `backup_dir`'s manifest. Requires `manifest.json` to
/// exist, and fails with `validation-error` (not `restore-error`: this is a
/// caller-correctable mismatch, not an I/O failure) if the backup's mode
/// doesn't match the engine's current mode.
pub fn read_manifest(backup_dir: &Path, engine_mode: Mode) -> TdbxResult<Manifest> {
    let path = backup_dir.join("manifest.json");
    let text = std::fs::read_to_string(&path)
        .map_err(|e| Error::Restore(format!("missing manifest at {}: {e}", path.display())))?;
    let manifest: Manifest =
        serde_json::from_str(&text).map_err(|e| Error::Restore(format!("malformed manifest.json: {e}")))?;

    if manifest.mode != engine_mode.as_str() {
        return Err(Error::Validation(format!(
            "backup mode '{}' does not match the engine's configured mode '{}'",
            manifest.mode,
            engine_mode.as_str()
        )));
    }

    Ok(manifest)
}

/// Copies every collection file named in `manifest`, plus the metadata
/// documents, from `backup_dir` over `database_dir`. The caller is
/// responsible for clearing caches/indexes and reloading auth/users
/// afterwards (§4.K), since those are engine-instance state this module
/// has no access to.
pub fn restore(backup_dir: &Path, database_dir: &Path, manifest: &Manifest) -> TdbxResult<()> {
    for collection in &manifest.collections {
        let file_name = format!("{collection}.tdbx");
        copy_if_present(backup_dir, database_dir, &file_name)?;
    }
    copy_if_present(backup_dir, database_dir, ".auth")?;
    copy_if_present(backup_dir, database_dir, ".users")?;
    Ok(())
}

fn copy_if_present(backup_dir: &Path, database_dir: &Path, file_name: &str) -> TdbxResult<()> {
    let source = backup_dir.join(file_name);
    if !source.exists() {
        return Ok(());
    }
    std::fs::copy(&source, database_dir.join(file_name))
        .map_err(|e| Error::Restore(format!("restoring {file_name}: {e}")))?;
    Ok(())
}
