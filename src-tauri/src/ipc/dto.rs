//! IPC DTO helpers
//!
//! This module is compiled in unit tests (unlike the Tauri command entry points).
//! Keep it free of `tauri` dependencies so we can validate serialization and
//! cross-layer type stability with normal `cargo test`.

use serde::Serialize;

/// Serializes a serde value expected to become a JSON string.
///
/// This is primarily used for enums with `#[serde(rename_all = ...)]` where
/// `Debug` formatting is not a stable wire format.
pub fn serialize_to_json_string<T: Serialize>(value: &T) -> Result<String, String> {
    let json_value = serde_json::to_value(value).map_err(|e| e.to_string())?;
    json_value
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| "Expected value to serialize as a JSON string".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MountState, PersistenceState};
    use crate::core::viewmodel::BucketVM;

    #[test]
    fn serializes_mount_state_with_screaming_snake_case() {
        assert_eq!(serialize_to_json_string(&MountState::Degraded).unwrap(), "DEGRADED");
        assert_eq!(serialize_to_json_string(&MountState::Unmounting).unwrap(), "UNMOUNTING");
    }

    #[test]
    fn serializes_persistence_state_with_snake_case() {
        assert_eq!(
            serialize_to_json_string(&PersistenceState::PresentEnabled).unwrap(),
            "present_enabled"
        );
        assert_eq!(serialize_to_json_string(&PersistenceState::Orphaned).unwrap(), "orphaned");
    }

    #[test]
    fn bucket_vm_round_trips_camel_case_fields() {
        let vm = BucketVM::new("docs", 3, 1024);
        let json = serde_json::to_value(&vm).unwrap();
        assert!(json.get("mountState").is_some());
        assert!(json.get("persistInstalled").is_some());
        assert!(json.get("mount_state").is_none());
    }
}
