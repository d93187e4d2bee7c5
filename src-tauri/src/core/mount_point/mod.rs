//! Mount Point Inspector (C4).
//!
//! Classifies a path into exactly one of the states the supervisor (C5) and
//! reconciliation engine (C7) need to make decisions: `ABSENT`, `NON_DIR`,
//! `EMPTY_DIR`, `NON_EMPTY_DIR`, `LIVE_MOUNT`, `STALE_MOUNT`. Every probe
//! runs under a 2s watchdog and degrades to `STALE_MOUNT` on timeout rather
//! than hanging — a wedged FUSE mount can make `stat`/`readdir` block
//! indefinitely, and the caller must never be blocked by it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Absent,
    NonDir,
    EmptyDir,
    NonEmptyDir,
    LiveMount,
    StaleMount,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Classification::Absent => "ABSENT",
            Classification::NonDir => "NON_DIR",
            Classification::EmptyDir => "EMPTY_DIR",
            Classification::NonEmptyDir => "NON_EMPTY_DIR",
            Classification::LiveMount => "LIVE_MOUNT",
            Classification::StaleMount => "STALE_MOUNT",
        };
        f.write_str(s)
    }
}

/// Classifies `path`, never hanging past the probe watchdog.
///
/// Tie-break: a path that is both `NON_DIR` and listed in the mount table
/// (agent died leaving an inconsistent inode) resolves to `STALE_MOUNT` —
/// this is worth calling out since an orphaned special file must
/// not be mistaken for ordinary non-directory content.
pub async fn classify(path: &Path) -> Classification {
    let owned = path.to_path_buf();
    let result = tokio::time::timeout(PROBE_TIMEOUT, tokio::task::spawn_blocking(move || classify_blocking(&owned))).await;

    match result {
        Ok(Ok(classification)) => classification,
        Ok(Err(_join_error)) => Classification::StaleMount,
        Err(_timeout) => {
            warn!(?path, "classify() probe timed out, degrading to STALE_MOUNT");
            Classification::StaleMount
        }
    }
}

fn classify_blocking(path: &Path) -> Classification {
    let in_mount_table = is_in_mount_table(path);

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return if in_mount_table {
                Classification::StaleMount
            } else {
                Classification::Absent
            };
        }
        Err(_) => {
            return if in_mount_table {
                Classification::StaleMount
            } else {
                Classification::Absent
            };
        }
    };

    if !metadata.is_dir() {
        // Tie-break: a non-directory that the kernel still lists
        // as mounted is an agent that died leaving an inconsistent inode —
        // STALE_MOUNT wins over NON_DIR. An ordinary stray file does not.
        return if in_mount_table {
            Classification::StaleMount
        } else {
            Classification::NonDir
        };
    }

    match std::fs::read_dir(path) {
        Ok(mut entries) => {
            if in_mount_table {
                Classification::LiveMount
            } else if entries.next().is_some() {
                Classification::NonEmptyDir
            } else {
                Classification::EmptyDir
            }
        }
        Err(e) => {
            if in_mount_table || is_transport_endpoint_error(&e) {
                Classification::StaleMount
            } else {
                Classification::NonDir
            }
        }
    }
}

/// True if the OS error indicates the backing FUSE/mount agent is gone while
/// the kernel still thinks the mount exists ("transport endpoint is not
/// connected" on Unix, the corresponding condition on Windows).
fn is_transport_endpoint_error(e: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        if e.raw_os_error() == Some(libc::ENOTCONN) {
            return true;
        }
    }
    e.to_string().to_lowercase().contains("transport endpoint is not connected")
}

#[cfg(target_os = "linux")]
fn is_in_mount_table(path: &Path) -> bool {
    let Ok(canonical) = path.canonicalize() else {
        // canonicalize() fails for a broken mount point; fall back to the raw path.
        return mounts_contains(path);
    };
    mounts_contains(&canonical) || mounts_contains(path)
}

#[cfg(target_os = "linux")]
fn mounts_contains(path: &Path) -> bool {
    let Ok(content) = std::fs::read_to_string("/proc/mounts") else {
        return false;
    };
    let target = path.to_string_lossy();
    content.lines().any(|line| {
        line.split_whitespace()
            .nth(1)
            .map(|mount_point| mount_point == target)
            .unwrap_or(false)
    })
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_in_mount_table(path: &Path) -> bool {
    // BSD/macOS: no /proc; shell out to `mount` and match the target column.
    let Ok(output) = std::process::Command::new("mount").output() else {
        return false;
    };
    let target = path.to_string_lossy();
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .any(|line| line.contains(&*target))
}

#[cfg(windows)]
fn is_in_mount_table(path: &Path) -> bool {
    // Windows mounts resolve to either a drive letter (checked via
    // GetDriveTypeW) or a directory junction; the junction case is treated
    // as "present" if it resolves at all, since WinFsp-backed mounts report
    // themselves as ordinary reparse points once live.
    use windows_sys::Win32::Storage::FileSystem::{GetDriveTypeW, DRIVE_REMOTE, DRIVE_FIXED};

    if let Some(root) = drive_root(path) {
        let wide: Vec<u16> = root.encode_utf16().chain(std::iter::once(0)).collect();
        let drive_type = unsafe { GetDriveTypeW(wide.as_ptr()) };
        return matches!(drive_type, DRIVE_REMOTE | DRIVE_FIXED);
    }
    path.exists()
}

#[cfg(windows)]
fn drive_root(path: &Path) -> Option<String> {
    let s = path.to_string_lossy();
    if s.len() >= 2 && s.as_bytes()[1] == b':' {
        Some(format!("{}\\", &s[0..2]))
    } else {
        None
    }
}

/// Scans `home` for entries matching the `haio-<username>-*` naming
/// convention and returns those classified `LIVE_MOUNT`/`STALE_MOUNT` for
/// which `known_buckets` has no record — candidates for the startup
/// bulk-cleanup dialog.
pub async fn find_orphan_mounts(
    home: &Path,
    username: &str,
    known_buckets: &[String],
) -> Vec<PathBuf> {
    let prefix = format!("haio-{username}-");
    let entries = match std::fs::read_dir(home) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };

    let mut candidates = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(container) = name.strip_prefix(&prefix) else {
            continue;
        };
        if known_buckets.iter().any(|b| b == container) {
            continue;
        }
        candidates.push(entry.path());
    }

    let mut orphans = Vec::new();
    for path in candidates {
        match classify(&path).await {
            Classification::LiveMount | Classification::StaleMount => orphans.push(path),
            _ => {}
        }
    }
    orphans
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn classify_absent_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("does-not-exist");
        assert_eq!(classify(&path).await, Classification::Absent);
    }

    #[tokio::test]
    async fn classify_empty_directory() {
        let dir = TempDir::new().unwrap();
        assert_eq!(classify(dir.path()).await, Classification::EmptyDir);
    }

    #[tokio::test]
    async fn classify_non_empty_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("file.txt"), b"content").unwrap();
        assert_eq!(classify(dir.path()).await, Classification::NonEmptyDir);
    }

    #[tokio::test]
    async fn classify_non_directory_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain-file");
        std::fs::write(&path, b"x").unwrap();
        assert_eq!(classify(&path).await, Classification::NonDir);
    }

    #[tokio::test]
    async fn find_orphan_mounts_skips_plain_unmounted_directories() {
        // Plain directories that merely follow the naming convention but are
        // neither LIVE_MOUNT nor STALE_MOUNT (no real mount present) are not
        // orphans — only a path the kernel still considers mounted counts.
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("haio-alice-docs")).unwrap();
        std::fs::create_dir(dir.path().join("haio-alice-photos")).unwrap();

        let orphans = find_orphan_mounts(dir.path(), "alice", &["docs".to_string()]).await;
        assert!(orphans.is_empty());
    }

    #[tokio::test]
    async fn find_orphan_mounts_ignores_unrelated_directories() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("Documents")).unwrap();
        let orphans = find_orphan_mounts(dir.path(), "alice", &[]).await;
        assert!(orphans.is_empty());
    }
}
