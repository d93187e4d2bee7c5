//! IPC Payload Structs (Strict / Injection-Resistant)
//!
//! Every payload that crosses the webview boundary is `deny_unknown_fields`
//! so a typo or a stale frontend build surfaces as a rejected call instead of
//! silently ignored fields.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoginPayload {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub remember: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ForgetAccountPayload {
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MountPayload {
    pub container: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UnmountPayload {
    pub container: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TogglePersistPayload {
    pub container: String,
    pub enable: bool,
}

fn default_share_duration_s() -> u64 {
    3600
}

/// `method` mirrors the Swift TempURL verb (`GET`/`PUT`/`POST`/`DELETE`);
/// defaults to `GET` when omitted, the common case of sharing a download link.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ShareObjectPayload {
    pub container: String,
    pub object: String,
    #[serde(default = "default_share_duration_s")]
    pub duration_s: u64,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    /// Sign a whole prefix instead of a single object.
    #[serde(default)]
    pub is_prefix: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ValidateUrlPayload {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BrowseContainerPayload {
    pub container: String,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CleanupOrphanMountsPayload {
    pub paths: Vec<String>,
}

// =============================================================================
// Response DTOs
// =============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlResponse {
    pub url: String,
    pub expires_epoch_s: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub valid: bool,
    pub expires_at: Option<u64>,
    pub time_remaining_s: Option<i64>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfoDto {
    pub name: String,
    pub bytes: u64,
    pub last_modified: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct KnownAccountDto {
    pub base_url: String,
    pub username: String,
    pub scheme: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_payload_rejects_unknown_fields() {
        let json = serde_json::json!({"username": "alice", "password": "hunter2", "extra": true});
        let result: Result<LoginPayload, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }

    #[test]
    fn login_payload_defaults_remember_to_false() {
        let json = serde_json::json!({"username": "alice", "password": "hunter2"});
        let payload: LoginPayload = serde_json::from_value(json).unwrap();
        assert!(!payload.remember);
    }

    #[test]
    fn share_payload_defaults_duration_to_one_hour() {
        let json = serde_json::json!({"container": "docs", "object": "report.pdf"});
        let payload: ShareObjectPayload = serde_json::from_value(json).unwrap();
        assert_eq!(payload.duration_s, 3600);
        assert!(payload.ip.is_none());
        assert!(!payload.is_prefix);
    }
}
