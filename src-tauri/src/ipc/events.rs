//! Tauri Event Emission Module
//!
//! Handles broadcasting state changes to the frontend via Tauri's event system.
//! Bridges the GUI-agnostic view-model event stream (`core::viewmodel::ViewModelEvent`)
//! and the mount supervisor's internal channel (`core::supervisor::SupervisorEvent`)
//! onto named Tauri events the webview subscribes to.

use serde::{Deserialize, Serialize};
use tauri::{AppHandle, Emitter};

use crate::core::supervisor::SupervisorEvent;
use crate::core::viewmodel::ViewModelEvent;
use crate::core::MountState;

// =============================================================================
// Event Types
// =============================================================================

/// Event names used for frontend communication
pub mod event_names {
    /// The bucket list (and any in-place stats mutation) changed.
    pub const BUCKETS_CHANGED: &str = "buckets:changed";
    /// A transient status line to show the user (e.g. "Reconnecting...").
    pub const STATUS_MESSAGE: &str = "status:message";
    /// Progress within a multi-step operation (mount, unmount, persist install).
    pub const PROGRESS_STEP: &str = "progress:step";
    /// A recoverable or terminal error, carrying a stable kind for targeted UI.
    pub const ERROR: &str = "error";
    /// A prompt the webview must resolve (e.g. confirm orphan mount cleanup).
    pub const PROMPT: &str = "prompt";
    /// A single bucket's mount state machine transitioned.
    pub const MOUNT_STATE_CHANGED: &str = "mount:state-changed";
}

// =============================================================================
// Event Payloads
// =============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessagePayload {
    pub text: String,
    pub dwell_s: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStepPayload {
    pub op: String,
    pub step: u32,
    pub total: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub kind: String,
    pub detail: String,
    pub remediation: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountStateChangedPayload {
    pub username: String,
    pub container: String,
    pub state: MountState,
}

/// Forwards one `ViewModelEvent` from the reconciliation engine (C7) onto the
/// corresponding named Tauri event. Emit failures are logged, never panicked
/// on — a detached webview shouldn't take the backend down with it.
pub fn emit_viewmodel_event(app: &AppHandle, event: &ViewModelEvent) {
    match event {
        ViewModelEvent::StatusMessage { text, dwell_s } => {
            emit(app, event_names::STATUS_MESSAGE, StatusMessagePayload { text: text.clone(), dwell_s: *dwell_s });
        }
        ViewModelEvent::ProgressStep { op, step, total } => {
            emit(app, event_names::PROGRESS_STEP, ProgressStepPayload { op: op.clone(), step: *step, total: *total });
        }
        ViewModelEvent::Error { kind, detail, remediation } => {
            emit(
                app,
                event_names::ERROR,
                ErrorPayload { kind: kind.clone(), detail: detail.clone(), remediation: remediation.clone() },
            );
        }
        ViewModelEvent::Prompt { kind, payload } => {
            emit(app, event_names::PROMPT, serde_json::json!({ "kind": kind, "payload": payload }));
        }
        ViewModelEvent::BucketsChanged => {
            emit(app, event_names::BUCKETS_CHANGED, ());
        }
    }
}

/// Forwards one `SupervisorEvent` from the mount supervisor (C5) onto the
/// corresponding named Tauri event.
pub fn emit_supervisor_event(app: &AppHandle, event: &SupervisorEvent) {
    match event {
        SupervisorEvent::ProgressStep { key, step, total, detail } => {
            emit(
                app,
                event_names::PROGRESS_STEP,
                ProgressStepPayload { op: format!("{key}: {detail}"), step: *step, total: *total },
            );
        }
        SupervisorEvent::Degraded { key, observed } => {
            emit(
                app,
                event_names::ERROR,
                ErrorPayload {
                    kind: "STALE_MOUNT_RECOVERED".to_string(),
                    detail: format!("{key} degraded, observed as {observed}"),
                    remediation: None,
                },
            );
        }
        SupervisorEvent::StateChanged { key, state } => {
            emit(
                app,
                event_names::MOUNT_STATE_CHANGED,
                MountStateChangedPayload { username: key.username.clone(), container: key.container.clone(), state: *state },
            );
        }
        SupervisorEvent::Error { key, error } => {
            emit(
                app,
                event_names::ERROR,
                ErrorPayload { kind: "SUPERVISOR_ERROR".to_string(), detail: format!("{key}: {error}"), remediation: None },
            );
        }
    }
}

fn emit<T: Serialize + Clone>(app: &AppHandle, name: &str, payload: T) {
    if let Err(err) = app.emit(name, payload) {
        tracing::warn!(event = name, error = %err, "failed to emit event to webview");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_step_payload_serializes_camel_case() {
        let payload = ProgressStepPayload { op: "mount".to_string(), step: 2, total: 5 };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["op"], "mount");
        assert_eq!(json["step"], 2);
        assert_eq!(json["total"], 5);
    }

    #[test]
    fn error_payload_omits_remediation_when_none() {
        let payload = ErrorPayload { kind: "AGENT_NOT_FOUND".to_string(), detail: "missing".to_string(), remediation: None };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json["remediation"].is_null());
    }
}
