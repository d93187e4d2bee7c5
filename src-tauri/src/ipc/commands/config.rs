//! Configuration Commands
//!
//! Reads and persists the application's `Config` (base URL, timeouts,
//! intervals, mount agent override). Saving re-normalizes before writing so
//! a bad value from the webview can't brick the next launch.

use tauri::State;

use crate::core::config::{Config, ConfigManager};
use crate::core::{HaioError, IpcError};
use crate::ipc::commands::helpers::ToIpcError;
use crate::AppState;

#[tauri::command]
pub async fn get_config(state: State<'_, AppState>) -> Result<Config, IpcError> {
    Ok(state.config.read().await.clone())
}

#[tauri::command]
pub async fn save_config(state: State<'_, AppState>, mut config: Config) -> Result<Config, IpcError> {
    config.normalize();

    let config_dir = state.config.read().await.config_dir.clone();
    config.config_dir = config_dir;

    let manager = ConfigManager::new(config.config_dir.clone());
    manager.save(&config).map_err(HaioError::ConfigError).map_err(ToIpcError::to_ipc_error)?;

    *state.config.write().await = config.clone();
    Ok(config)
}
