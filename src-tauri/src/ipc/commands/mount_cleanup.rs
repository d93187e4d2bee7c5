//! Orphan Mount Cleanup
//!
//! Orphan mounts (live mounts under the Haio naming convention with no
//! matching bucket in the current account's container list) sit outside
//! the supervisor's bucket registry, so cleanup unmounts them directly
//! rather than going through `Supervisor::unmount`.

use std::path::PathBuf;
use std::time::Duration;

use crate::core::mount_agent;
use crate::core::IpcError;
use crate::ipc::commands::helpers::ToIpcError;
use crate::ipc::payloads::CleanupOrphanMountsPayload;

const UNMOUNT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

#[tauri::command]
pub async fn cleanup_orphan_mounts(payload: CleanupOrphanMountsPayload) -> Result<(), IpcError> {
    for path in payload.paths {
        mount_agent::unmount(&PathBuf::from(path), UNMOUNT_ATTEMPT_TIMEOUT).await.map_err(ToIpcError::to_ipc_error)?;
    }
    Ok(())
}
