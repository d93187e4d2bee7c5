//! View-Model Bus contract (C9).
//!
//! `BucketVM` is the one mutable record the GUI layer renders; `Command`
//! is what the webview sends; `ViewModelEvent` is what gets pushed back.
//! These types are GUI-agnostic on purpose — the Tauri IPC layer
//! (`ipc::commands`/`ipc::events`) is a thin bridge that serializes them
//! over `#[tauri::command]`/`AppHandle::emit`, mirroring how the teacher
//! keeps `core::jobs::JobEvent` free of any `tauri` dependency and only
//! wraps it at the IPC boundary.
//!
//! `BucketVM::id` is a stable identity (a `ulid`) distinct from `name` so
//! reconciliation can mutate `bytes`/`count` in place without recreating the
//! record — the critical UX contract: scroll
//! position, focus, and in-flight clicks must survive a stats-only tick.

use serde::{Deserialize, Serialize};

use crate::core::types::MountState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketVM {
    pub id: String,
    pub name: String,
    pub bytes: u64,
    pub count: u64,
    pub mount_state: MountState,
    pub mount_point: String,
    pub persist_installed: bool,
    pub busy: bool,
}

impl BucketVM {
    pub fn new(name: impl Into<String>, count: u64, bytes: u64) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            name: name.into(),
            bytes,
            count,
            mount_state: MountState::Unmounted,
            mount_point: String::new(),
            persist_installed: false,
            busy: false,
        }
    }
}

/// Commands the webview issues.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ViewModelCommand {
    Mount { container: String },
    Unmount { container: String },
    TogglePersist { container: String },
    Share { container: String, object: String },
    Browse { container: String },
    Logout,
}

/// Events pushed back to the webview.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ViewModelEvent {
    StatusMessage { text: String, dwell_s: u32 },
    ProgressStep { op: String, step: u32, total: u32 },
    Error { kind: String, detail: String, remediation: Option<String> },
    Prompt { kind: String, payload: serde_json::Value },
    BucketsChanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_vm_identity_is_stable_and_unique() {
        let a = BucketVM::new("docs", 1, 2);
        let b = BucketVM::new("docs", 1, 2);
        assert_ne!(a.id, b.id, "two distinct widgets must not share identity");
    }

    #[test]
    fn command_tag_deserializes_camel_case() {
        let json = serde_json::json!({"type": "mount", "container": "docs"});
        let cmd: ViewModelCommand = serde_json::from_value(json).unwrap();
        assert!(matches!(cmd, ViewModelCommand::Mount { container } if container == "docs"));
    }
}
