//! Account Commands
//!
//! Login/logout and saved-credential management. `login` is also where an
//! account's whole runtime — API client, supervisor, reconciliation engine,
//! persistence installer, TempURL key manager — gets built and handed off to
//! background tasks that bridge their event streams onto the webview.

use std::sync::Arc;
use std::time::Duration;

use tauri::{AppHandle, State};
use tokio_util::sync::CancellationToken;

use crate::core::api_client::ApiClient;
use crate::core::mount_point;
use crate::core::persistence::PersistenceInstaller;
use crate::core::tempurl::TempUrlKeyManager;
use crate::core::viewmodel::{BucketVM, ViewModelEvent};
use crate::core::{reconcile::ReconcileEngine, supervisor::Supervisor, HaioError, IpcError};
use crate::ipc::commands::helpers::ToIpcError;
use crate::ipc::events;
use crate::ipc::payloads::{ForgetAccountPayload, KnownAccountDto, LoginPayload};
use crate::{build_privilege_helper, AppState, Session};

/// Authenticates against the account API, builds the account's runtime, and
/// starts the reconciliation loop (C7) and event-bridging background tasks.
/// Any previously active session is torn down first.
#[tauri::command]
pub async fn login(app: AppHandle, state: State<'_, AppState>, payload: LoginPayload) -> Result<Vec<BucketVM>, IpcError> {
    {
        let mut guard = state.session.lock().await;
        if let Some(previous) = guard.take() {
            previous.cancel.cancel();
        }
    }

    let config = state.config.read().await.clone();

    let api_client = Arc::new(
        ApiClient::new(config.base_url.clone(), Duration::from_secs(config.request_timeout_s)).map_err(ToIpcError::to_ipc_error)?,
    );
    api_client
        .authenticate(&payload.username, &payload.username, &payload.password)
        .await
        .map_err(ToIpcError::to_ipc_error)?;
    let (token, _) = api_client.session_credentials().await.map_err(ToIpcError::to_ipc_error)?;

    state
        .credentials
        .save(&config.base_url, &payload.username, &token, payload.remember.then_some(payload.password.as_str()))
        .await
        .map_err(|e| HaioError::CredentialStoreError(e.to_string()).to_ipc_error())?;

    let mount_agent_path = state.mount_agent_path.clone().ok_or_else(|| HaioError::AgentNotFound.to_ipc_error())?;
    let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
    let agent_config_path = config.config_dir.join("mount-agent.conf");

    let (supervisor, mut supervisor_events) =
        Supervisor::new(mount_agent_path, agent_config_path, Duration::from_secs(config.health_check_interval_s));

    let persistence = Arc::new(PersistenceInstaller::new(
        build_privilege_helper(),
        config.config_dir.join("systemd-user"),
        std::path::PathBuf::from("/etc/systemd/system"),
        config.config_dir.join("startup"),
    ));

    let (reconcile, mut viewmodel_events) =
        ReconcileEngine::new(api_client.clone(), persistence.clone(), supervisor.clone(), payload.username.clone());
    let reconcile = Arc::new(reconcile);

    let cancel = CancellationToken::new();

    let supervisor_bridge_app = app.clone();
    let supervisor_bridge_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = supervisor_bridge_cancel.cancelled() => break,
                event = supervisor_events.recv() => match event {
                    Some(event) => events::emit_supervisor_event(&supervisor_bridge_app, &event),
                    None => break,
                },
            }
        }
    });

    let viewmodel_bridge_app = app.clone();
    let viewmodel_bridge_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = viewmodel_bridge_cancel.cancelled() => break,
                event = viewmodel_events.recv() => match event {
                    Some(event) => events::emit_viewmodel_event(&viewmodel_bridge_app, &event),
                    None => break,
                },
            }
        }
    });

    let reconcile_loop = reconcile.clone();
    let reconcile_cancel = cancel.clone();
    let reconcile_interval = Duration::from_secs(config.reconcile_interval_s);
    tokio::spawn(async move {
        reconcile_loop.run(reconcile_interval, reconcile_cancel).await;
    });

    // Run one tick synchronously so the caller gets an immediate bucket list
    // instead of waiting for the first scheduled interval.
    reconcile.tick().await;
    let buckets = reconcile.buckets().await;

    let known_containers: Vec<String> = buckets.iter().map(|b| b.name.clone()).collect();
    let orphans = mount_point::find_orphan_mounts(&home, &payload.username, &known_containers).await;
    if !orphans.is_empty() {
        let paths: Vec<String> = orphans.iter().map(|p| p.to_string_lossy().to_string()).collect();
        events::emit_viewmodel_event(
            &app,
            &ViewModelEvent::Prompt { kind: "orphan-mounts".to_string(), payload: serde_json::json!({ "paths": paths }) },
        );
    }

    let session = Session {
        username: payload.username,
        base_url: config.base_url,
        home,
        api_client,
        supervisor,
        persistence,
        tempurl: Arc::new(TempUrlKeyManager::default()),
        reconcile,
        cancel,
    };

    *state.session.lock().await = Some(session);

    Ok(buckets)
}

/// Tears down the active session's background tasks. Mounted buckets are
/// left mounted — logout is an account-switch operation, not an unmount-all.
#[tauri::command]
pub async fn logout(state: State<'_, AppState>) -> Result<(), IpcError> {
    if let Some(session) = state.session.lock().await.take() {
        session.cancel.cancel();
    }
    Ok(())
}

#[tauri::command]
pub async fn forget_account(state: State<'_, AppState>, payload: ForgetAccountPayload) -> Result<(), IpcError> {
    let config = state.config.read().await.clone();
    state
        .credentials
        .forget(&config.base_url, &payload.username)
        .await
        .map_err(|e| HaioError::CredentialStoreError(e.to_string()).to_ipc_error())
}

#[tauri::command]
pub async fn list_known_accounts(state: State<'_, AppState>) -> Result<Vec<KnownAccountDto>, IpcError> {
    let known = state
        .credentials
        .list_known()
        .await
        .map_err(|e| HaioError::CredentialStoreError(e.to_string()).to_ipc_error())?;

    Ok(known
        .into_iter()
        .map(|a| KnownAccountDto { base_url: a.base_url, username: a.username, scheme: storage_scheme_name(a.scheme) })
        .collect())
}

fn storage_scheme_name(scheme: crate::core::credentials::StorageScheme) -> String {
    use crate::core::credentials::StorageScheme;
    match scheme {
        StorageScheme::Dpapi => "dpapi",
        StorageScheme::Keychain => "keychain",
        StorageScheme::Encrypted => "encrypted",
    }
    .to_string()
}
