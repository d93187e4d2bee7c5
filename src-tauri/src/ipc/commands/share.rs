//! Share and Browse Commands
//!
//! TempURL signing/validation (C8) and container browsing, both against the
//! active session's API client and TempURL key manager.

use std::time::{SystemTime, UNIX_EPOCH};

use tauri::State;

use crate::core::tempurl::{self, HttpMethod, SignRequest};
use crate::core::{HaioError, IpcError};
use crate::ipc::commands::helpers::ToIpcError;
use crate::ipc::payloads::{BrowseContainerPayload, ObjectInfoDto, ShareObjectPayload, SignedUrlResponse, ValidateUrlPayload, ValidationResponse};
use crate::{require_session, AppState};

fn now_epoch_s() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Splits a Swift storage URL (`https://host/v1/AUTH_xxx`) into the origin
/// TempURL signatures are rooted at and the account path prefix object
/// paths are built under.
fn split_storage_url(storage_url: &str) -> Result<(String, String), IpcError> {
    let parsed = reqwest::Url::parse(storage_url).map_err(|e| HaioError::ValidationError(e.to_string()).to_ipc_error())?;
    let origin = parsed.origin().ascii_serialization();
    let account_path = parsed.path().trim_end_matches('/').to_string();
    Ok((origin, account_path))
}

fn method_from_str(method: Option<&str>) -> HttpMethod {
    match method.map(str::to_ascii_uppercase).as_deref() {
        Some("PUT") => HttpMethod::Put,
        Some("POST") => HttpMethod::Post,
        Some("DELETE") => HttpMethod::Delete,
        _ => HttpMethod::Get,
    }
}

/// Signs an object or prefix TempURL (C8), generating and installing the
/// account's signing key on first use.
#[tauri::command]
pub async fn share(state: State<'_, AppState>, payload: ShareObjectPayload) -> Result<SignedUrlResponse, IpcError> {
    let guard = require_session!(state)?;
    let session = guard.as_ref().unwrap();

    let key = session.tempurl.ensure_key(&session.api_client).await.map_err(ToIpcError::to_ipc_error)?;
    let (_, storage_url) = session.api_client.session_credentials().await.map_err(ToIpcError::to_ipc_error)?;
    let (base, account_path) = split_storage_url(&storage_url)?;

    let object_path = format!("{account_path}/{}/{}", payload.container, payload.object);
    let request = SignRequest {
        method: method_from_str(payload.method.as_deref()),
        duration_seconds: payload.duration_s,
        object_path: &object_path,
        ip: payload.ip.as_deref(),
    };

    let now = now_epoch_s();
    let signed = if payload.is_prefix { tempurl::sign_prefix(&base, &key, now, &request) } else { tempurl::sign(&base, &key, now, &request) };

    Ok(SignedUrlResponse { url: signed.url, expires_epoch_s: signed.expires_epoch_s })
}

/// Validates a previously signed TempURL's expiration (client-side only;
/// signature equality requires the key and isn't re-checked here).
#[tauri::command]
pub async fn validate_share_url(payload: ValidateUrlPayload) -> Result<ValidationResponse, IpcError> {
    let result = tempurl::validate(&payload.url, now_epoch_s());
    Ok(ValidationResponse {
        valid: result.valid,
        expires_at: result.expires_at,
        time_remaining_s: result.time_remaining_s,
        reason: result.reason.map(|r| format!("{r:?}")),
    })
}

/// Lists objects in a container, optionally under a prefix.
#[tauri::command]
pub async fn browse(state: State<'_, AppState>, payload: BrowseContainerPayload) -> Result<Vec<ObjectInfoDto>, IpcError> {
    let guard = require_session!(state)?;
    let session = guard.as_ref().unwrap();

    let objects = session
        .api_client
        .list_objects(&payload.container, payload.prefix.as_deref())
        .await
        .map_err(ToIpcError::to_ipc_error)?;

    Ok(objects.into_iter().map(|o| ObjectInfoDto { name: o.name, bytes: o.bytes, last_modified: o.last_modified }).collect())
}
