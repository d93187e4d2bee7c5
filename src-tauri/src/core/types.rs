//! Shared data-model types: Account, Container, Mount, PersistenceEntry.
//!
//! These are plain records, not owners of behaviour — the owning components
//! (credentials, supervisor, persistence) hold the logic. Kept together here
//! so every component speaks the same vocabulary, mirroring how the teacher
//! centralizes `ProjectMeta`/`AssetKind` in one `core/types.rs`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Mount lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MountState {
    Unmounted,
    Mounting,
    Mounted,
    Degraded,
    Unmounting,
    Failed,
}

impl std::fmt::Display for MountState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MountState::Unmounted => "UNMOUNTED",
            MountState::Mounting => "MOUNTING",
            MountState::Mounted => "MOUNTED",
            MountState::Degraded => "DEGRADED",
            MountState::Unmounting => "UNMOUNTING",
            MountState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Logical mount record. `pid`/`started_at`/`last_health_ok` are
/// `None` until the mount has actually been attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mount {
    pub username: String,
    pub container: String,
    pub mount_point: PathBuf,
    pub state: MountState,
    pub pid: Option<u32>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_health_ok: Option<bool>,
}

impl Mount {
    pub fn new(username: &str, container: &str, mount_point: PathBuf) -> Self {
        Self {
            username: username.to_string(),
            container: container.to_string(),
            mount_point,
            state: MountState::Unmounted,
            pid: None,
            started_at: None,
            last_health_ok: None,
        }
    }
}

/// Key identifying a per-bucket state machine / lock: `(username, container)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub username: String,
    pub container: String,
}

impl BucketKey {
    pub fn new(username: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            container: container.into(),
        }
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.username, self.container)
    }
}

/// Derives the deterministic mount-point path for a bucket.
pub fn derive_mount_point(home: &std::path::Path, username: &str, container: &str) -> PathBuf {
    home.join(format!("haio-{username}-{container}"))
}

/// Known state of a boot-persistence artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceState {
    Absent,
    PresentEnabled,
    PresentDisabled,
    Orphaned,
}

impl std::fmt::Display for PersistenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PersistenceState::Absent => "absent",
            PersistenceState::PresentEnabled => "present-and-enabled",
            PersistenceState::PresentDisabled => "present-and-disabled",
            PersistenceState::Orphaned => "orphaned",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_mount_point_matches_unix_naming_convention() {
        let home = std::path::Path::new("/home/alice");
        let p = derive_mount_point(home, "alice", "docs");
        assert_eq!(p, PathBuf::from("/home/alice/haio-alice-docs"));
    }

    #[test]
    fn bucket_key_display_is_slash_joined() {
        let key = BucketKey::new("alice", "docs");
        assert_eq!(key.to_string(), "alice/docs");
    }

    #[test]
    fn mount_state_display_uses_screaming_snake_case() {
        assert_eq!(MountState::Degraded.to_string(), "DEGRADED");
        assert_eq!(MountState::Unmounting.to_string(), "UNMOUNTING");
    }
}
