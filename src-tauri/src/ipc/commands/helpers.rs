//! IPC Command Helpers
//!
//! Shared utilities, macros, and error handling for Tauri IPC commands.
//! This module reduces boilerplate across command implementations.

use crate::core::{HaioError, IpcError};

/// Converts a `HaioError` into the structured payload that crosses the IPC
/// boundary, carrying the stable `kind()` and any known remediation text
/// instead of just a display string.
pub trait ToIpcError {
    fn to_ipc_error(self) -> IpcError;
}

impl ToIpcError for HaioError {
    fn to_ipc_error(self) -> IpcError {
        HaioError::to_ipc_error(&self)
    }
}

/// Macro to get a lock guard on the active session from `AppState`.
///
/// This reduces the common boilerplate pattern:
/// ```ignore
/// let guard = state.session.lock().await;
/// let session = guard
///     .as_ref()
///     .ok_or_else(|| HaioError::NotFound("no account is logged in".into()).to_ipc_error())?;
/// ```
///
/// # Usage
/// ```ignore
/// #[tauri::command]
/// pub async fn my_command(state: State<'_, AppState>) -> Result<(), IpcError> {
///     let guard = require_session!(state)?;
///     let session = guard.as_ref().unwrap();
///     // ... use session
///     Ok(())
/// }
/// ```
///
/// # Returns
/// A `Result<MutexGuard<Option<Session>>, IpcError>` where the inner `Option`
/// is guaranteed to be `Some`. Use `.as_ref().unwrap()` after the macro call.
#[macro_export]
macro_rules! require_session {
    ($state:expr) => {{
        let guard = $state.session.lock().await;
        if guard.is_none() {
            Err($crate::core::HaioError::NotFound("no account is logged in".to_string()).to_ipc_error())
        } else {
            Ok(guard)
        }
    }};
}

/// Convenience function to check if an account is currently logged in.
pub async fn is_logged_in(state: &crate::AppState) -> bool {
    let guard = state.session.lock().await;
    guard.is_some()
}

pub use require_session;
