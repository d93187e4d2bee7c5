//! Bucket Commands
//!
//! Lists buckets (as maintained by the reconciliation engine, C7), and
//! drives mount/unmount/persistence toggles through the active session's
//! supervisor (C5) and persistence installer (C6).

use tauri::State;

use crate::core::mount_agent::{build_mount_argv, MountOptions};
use crate::core::viewmodel::BucketVM;
use crate::core::{derive_mount_point, BucketKey, HaioError, IpcError};
use crate::ipc::commands::helpers::ToIpcError;
use crate::ipc::payloads::{MountPayload, TogglePersistPayload, UnmountPayload};
use crate::{require_session, AppState};

#[tauri::command]
pub async fn list_buckets(state: State<'_, AppState>) -> Result<Vec<BucketVM>, IpcError> {
    let guard = require_session!(state)?;
    let session = guard.as_ref().unwrap();
    Ok(session.reconcile.buckets().await)
}

/// Mounts a container (C3/C5). Idempotent: re-mounting an already-live
/// bucket returns success without re-spawning the agent.
#[tauri::command]
pub async fn mount(state: State<'_, AppState>, payload: MountPayload) -> Result<(), IpcError> {
    let guard = require_session!(state)?;
    let session = guard.as_ref().unwrap();

    let key = BucketKey::new(session.username.clone(), payload.container.clone());
    let mount_point = derive_mount_point(&session.home, &session.username, &payload.container);
    let config_name = format!("haio_{}", session.username);
    let (token, endpoint) = session.api_client.session_credentials().await.map_err(ToIpcError::to_ipc_error)?;

    session
        .supervisor
        .mount(key, mount_point, &config_name, &endpoint, &token, session.cancel.clone())
        .await
        .map_err(ToIpcError::to_ipc_error)
}

/// Unmounts a container (C3/C5), falling through graceful → forced → lazy.
#[tauri::command]
pub async fn unmount(state: State<'_, AppState>, payload: UnmountPayload) -> Result<(), IpcError> {
    let guard = require_session!(state)?;
    let session = guard.as_ref().unwrap();

    let key = BucketKey::new(session.username.clone(), payload.container);
    session.supervisor.unmount(key, session.cancel.clone()).await.map_err(ToIpcError::to_ipc_error)
}

/// Installs or removes the boot-persistence artifact for a mounted
/// container (C6). Enabling persistence requires the bucket to already be
/// mounted, since the unit/task records the live mount point.
#[tauri::command]
pub async fn toggle_persist(state: State<'_, AppState>, payload: TogglePersistPayload) -> Result<(), IpcError> {
    let guard = require_session!(state)?;
    let session = guard.as_ref().unwrap();

    if !payload.enable {
        return session.persistence.remove(&session.username, &payload.container).await.map_err(ToIpcError::to_ipc_error);
    }

    let agent_path = state.mount_agent_path.clone().ok_or_else(|| HaioError::AgentNotFound.to_ipc_error())?;
    let mount_point = derive_mount_point(&session.home, &session.username, &payload.container);
    let cache_dir = state.config.read().await.config_dir.join("cache");
    let config_name = format!("haio_{}", session.username);
    let options = MountOptions::defaults(cache_dir.clone());
    let argv_tail = build_mount_argv(&config_name, &payload.container, &mount_point, &options);

    session
        .persistence
        .install(&session.username, &payload.container, &mount_point, &cache_dir, &agent_path, &argv_tail)
        .await
        .map_err(ToIpcError::to_ipc_error)
}
