//! Stable error-kind catalogue for the Haio mount client core.
//!
//! Every variant maps to one of the stable error kind identifiers the UI and
//! any scripting surface can match on (`kind()`), independent of the
//! human-readable message. This lets the webview render targeted remediation
//! without string-matching `Display` output.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HaioError {
    // =========================================================================
    // Authentication
    // =========================================================================
    #[error("invalid username or password")]
    AuthInvalid,

    #[error("session expired, re-authentication required")]
    AuthExpired,

    // =========================================================================
    // Network / API client
    // =========================================================================
    #[error("request to {0} timed out")]
    NetworkTimeout(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("server returned status {0}")]
    ServerError(u16),

    // =========================================================================
    // Mount agent
    // =========================================================================
    #[error("mount agent binary not found")]
    AgentNotFound,

    #[error("mount agent process exited unexpectedly: {0}")]
    AgentCrashed(String),

    #[error("mount agent resolved to a volatile extraction path: {0}")]
    AgentVolatilePath(String),

    // =========================================================================
    // Mount point inspection / supervisor
    // =========================================================================
    #[error("timed out waiting for mount to become visible")]
    MountVerifyTimeout,

    #[error("mount point is not empty: {0}")]
    MountPointNotEmpty(String),

    #[error("mount point could not be cleaned: {0}")]
    MountPointUncleanable(String),

    #[error("recovered a stale mount at {0}")]
    StaleMountRecovered(String),

    // =========================================================================
    // Boot persistence
    // =========================================================================
    #[error("user cancelled the elevation prompt")]
    PersistUserCancelled { commands: Vec<String> },

    #[error("failed to obtain elevated privileges: {0}")]
    PersistElevationFailed(String),

    #[error("persistence artifact references a stale path: {0}")]
    PersistArtifactStale(String),

    // =========================================================================
    // TempURL signing
    // =========================================================================
    #[error("TempURL key was not accepted by the server")]
    TempUrlKeyNotAccepted,

    #[error("local TempURL key is out of sync with the server")]
    TempUrlKeyDesync,

    // =========================================================================
    // Reconciliation
    // =========================================================================
    #[error("found {} orphaned mount(s)", .0.len())]
    OrphanMountDetected(Vec<String>),

    // =========================================================================
    // Credential store
    // =========================================================================
    #[error("credential store error: {0}")]
    CredentialStoreError(String),

    // =========================================================================
    // Configuration
    // =========================================================================
    #[error("configuration error: {0}")]
    ConfigError(String),

    // =========================================================================
    // General
    // =========================================================================
    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type HaioResult<T> = Result<T, HaioError>;

/// Structured representation of an error suitable for crossing the IPC boundary.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpcError {
    pub kind: &'static str,
    pub detail: String,
    pub remediation: Option<String>,
}

impl HaioError {
    /// The stable, matchable identifier for this error, independent of its message.
    pub fn kind(&self) -> &'static str {
        match self {
            HaioError::AuthInvalid => "AUTH_INVALID",
            HaioError::AuthExpired => "AUTH_EXPIRED",
            HaioError::NetworkTimeout(_) => "NETWORK_TIMEOUT",
            HaioError::NetworkError(_) => "NETWORK_ERROR",
            HaioError::ServerError(_) => "SERVER_ERROR",
            HaioError::AgentNotFound => "AGENT_NOT_FOUND",
            HaioError::AgentCrashed(_) => "AGENT_CRASHED",
            HaioError::AgentVolatilePath(_) => "AGENT_VOLATILE_PATH",
            HaioError::MountVerifyTimeout => "MOUNT_VERIFY_TIMEOUT",
            HaioError::MountPointNotEmpty(_) => "MOUNT_POINT_NOT_EMPTY",
            HaioError::MountPointUncleanable(_) => "MOUNT_POINT_UNCLEANABLE",
            HaioError::StaleMountRecovered(_) => "STALE_MOUNT_RECOVERED",
            HaioError::PersistUserCancelled { .. } => "PERSIST_USER_CANCELLED",
            HaioError::PersistElevationFailed(_) => "PERSIST_ELEVATION_FAILED",
            HaioError::PersistArtifactStale(_) => "PERSIST_ARTIFACT_STALE",
            HaioError::TempUrlKeyNotAccepted => "TEMPURL_KEY_NOT_ACCEPTED",
            HaioError::TempUrlKeyDesync => "TEMPURL_KEY_DESYNC",
            HaioError::OrphanMountDetected(_) => "ORPHAN_MOUNT_DETECTED",
            HaioError::CredentialStoreError(_) => "CREDENTIAL_STORE_ERROR",
            HaioError::ConfigError(_) => "CONFIG_ERROR",
            HaioError::ValidationError(_) => "VALIDATION_ERROR",
            HaioError::NotFound(_) => "NOT_FOUND",
            HaioError::IoError(_) => "IO_ERROR",
            HaioError::JsonError(_) => "JSON_ERROR",
            HaioError::Internal(_) => "INTERNAL",
        }
    }

    fn remediation(&self) -> Option<String> {
        match self {
            HaioError::AuthInvalid | HaioError::AuthExpired => {
                Some("Re-enter your credentials and try again.".to_string())
            }
            HaioError::AgentNotFound => {
                Some("Reinstall the application or set HAIO_MOUNT_AGENT to the agent binary.".to_string())
            }
            HaioError::MountPointNotEmpty(_) => {
                Some("Choose an empty directory as the mount point, or remove its contents.".to_string())
            }
            HaioError::PersistElevationFailed(_) => {
                Some("Retry and approve the elevation prompt when it appears.".to_string())
            }
            HaioError::PersistUserCancelled { commands } => Some(format!(
                "Elevation was cancelled. Remove the boot-persistence artifact manually:\n{}",
                commands.join("\n")
            )),
            HaioError::TempUrlKeyDesync | HaioError::TempUrlKeyNotAccepted => {
                Some("Reset the TempURL key from the account settings panel.".to_string())
            }
            _ => None,
        }
    }

    /// Convert to a structured payload for the webview / scripting surface.
    pub fn to_ipc_error(&self) -> IpcError {
        IpcError {
            kind: self.kind(),
            detail: self.to_string(),
            remediation: self.remediation(),
        }
    }
}

impl serde::Serialize for HaioError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_ipc_error().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_regardless_of_message() {
        let a = HaioError::NetworkError("dns failure".into());
        let b = HaioError::NetworkError("connection reset".into());
        assert_eq!(a.kind(), b.kind());
        assert_eq!(a.kind(), "NETWORK_ERROR");
    }

    #[test]
    fn orphan_mount_detected_carries_paths() {
        let err = HaioError::OrphanMountDetected(vec!["/mnt/a".into(), "/mnt/b".into()]);
        assert_eq!(err.kind(), "ORPHAN_MOUNT_DETECTED");
        assert!(err.to_string().contains('2'));
    }

    #[test]
    fn ipc_error_carries_remediation_when_known() {
        let err = HaioError::AgentNotFound;
        let ipc = err.to_ipc_error();
        assert_eq!(ipc.kind, "AGENT_NOT_FOUND");
        assert!(ipc.remediation.is_some());
    }

    #[test]
    fn ipc_error_omits_remediation_when_unknown() {
        let err = HaioError::Internal("unexpected".into());
        let ipc = err.to_ipc_error();
        assert!(ipc.remediation.is_none());
    }
}
