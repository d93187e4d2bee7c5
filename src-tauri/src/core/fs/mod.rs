//! Filesystem utilities.
//!
//! This module provides safe primitives for writing files in a crash-tolerant way,
//! and for validating the identifier components (`username`, `container`) that get
//! embedded in mount-point paths and persistence-artifact names.
//!
//! Why this exists:
//! - `accounts.json`, `mount_agent.conf`, and unit/task files are critical to
//!   recoverability. A partial write (power loss, crash) must not leave them corrupt.
//! - Windows semantics differ from Unix for rename-over-existing; we handle both.
//! - Usernames and container names ultimately become path components and unit-file
//!   names; they must be validated before that happens.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::{HaioError, HaioResult};

// =============================================================================
// Path/Identifier Validation
// =============================================================================

/// Validates that an identifier component (username or container name) is safe
/// to embed in file paths and OS-level artifact names (unit files, scheduled
/// task names).
///
/// Rejects:
/// - Empty or whitespace-only strings
/// - Path traversal sequences (`..`)
/// - Path separators (`/`, `\`)
/// - Drive letter indicators (`:`)
/// - Control characters
pub fn validate_path_id_component(id: &str, label: &str) -> Result<(), String> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(format!("{label} is empty or contains only whitespace"));
    }
    if trimmed.contains("..")
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed.contains(':')
    {
        return Err(format!(
            "Invalid {label}: contains path traversal characters"
        ));
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(format!("Invalid {label}: contains control characters"));
    }
    Ok(())
}

// =============================================================================
// Atomic Writes
// =============================================================================

/// Write bytes to `path` using an atomic replace pattern.
///
/// Implementation notes:
/// - Write to a sibling temporary file.
/// - Flush and sync the temp file.
/// - Swap into place by renaming.
/// - If the destination exists, it is first moved aside as a `.bak` file, then removed.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> HaioResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = tmp_path_for(path);
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    atomic_replace(path, &tmp_path)?;
    Ok(())
}

/// Write a JSON file atomically with pretty formatting.
pub fn atomic_write_json_pretty<T: serde::Serialize>(path: &Path, value: &T) -> HaioResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(HaioError::from)?;
    atomic_write_bytes(path, &bytes)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "tmp".to_string());
    tmp.set_file_name(format!("{file_name}.tmp"));
    tmp
}

fn bak_path_for(path: &Path) -> PathBuf {
    let mut bak = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "bak".to_string());
    bak.set_file_name(format!("{file_name}.bak"));
    bak
}

fn atomic_replace(dest: &Path, src_tmp: &Path) -> HaioResult<()> {
    if !dest.exists() {
        std::fs::rename(src_tmp, dest)?;
        return Ok(());
    }

    // Windows: rename-over-existing may fail depending on filesystem; use a backup swap.
    let bak = bak_path_for(dest);
    if bak.exists() {
        let _ = std::fs::remove_file(&bak);
    }

    std::fs::rename(dest, &bak)?;
    match std::fs::rename(src_tmp, dest) {
        Ok(()) => {
            let _ = std::fs::remove_file(&bak);
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::rename(&bak, dest);
            let _ = std::fs::remove_file(src_tmp);
            Err(HaioError::IoError(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_bytes_creates_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.json");

        atomic_write_bytes(&path, b"one").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one");

        atomic_write_bytes(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
    }

    #[test]
    fn validate_path_id_component_valid() {
        assert!(validate_path_id_component("alice", "username").is_ok());
        assert!(validate_path_id_component("my-bucket.01", "container").is_ok());
    }

    #[test]
    fn validate_path_id_component_empty() {
        let result = validate_path_id_component("", "username");
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("empty"));
    }

    #[test]
    fn validate_path_id_component_path_traversal() {
        assert!(validate_path_id_component("..", "username").is_err());
        assert!(validate_path_id_component("foo/../bar", "username").is_err());
        assert!(validate_path_id_component("prefix..", "username").is_err());
    }

    #[test]
    fn validate_path_id_component_path_separators() {
        assert!(validate_path_id_component("foo/bar", "container").is_err());
        assert!(validate_path_id_component("foo\\bar", "container").is_err());
        assert!(validate_path_id_component("C:", "container").is_err());
    }

    #[test]
    fn validate_path_id_component_control_characters() {
        assert!(validate_path_id_component("foo\0bar", "container").is_err());
        assert!(validate_path_id_component("foo\tbar", "container").is_err());
        assert!(validate_path_id_component("foo\nbar", "container").is_err());
    }
}
