//! Typed payloads of the individual message types.
//!
//! Field names follow the reader firmware, which uses camelCase
//! throughout (`cardUID` being the one irregular spelling).

use attractap_core::{
    CardId, CardUid, FirmwareDefinition, FirmwareDescriptor, Key128, KeySlot, Maintenance,
    ReaderId, ResourceId, User, UserId,
};
use serde::{Deserialize, Deserializer, Serialize};

/// `READER_REGISTER` event from a reader that has no identity yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<FirmwareDescriptor>,
}

/// `READER_REGISTER` response carrying the freshly issued credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub id: ReaderId,
    pub token: String,
}

impl std::fmt::Debug for RegisterResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RegisterResponse")
            .field("id", &self.id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// `READER_AUTHENTICATE` event.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateRequest {
    pub id: ReaderId,
    pub token: String,
}

impl std::fmt::Debug for AuthenticateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("AuthenticateRequest")
            .field("id", &self.id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// `READER_AUTHENTICATED` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedResponse {
    pub name: String,
}

/// `READER_UNAUTHORIZED` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unauthorized {
    pub message: String,
}

/// `NFC_TAP` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NfcTap {
    #[serde(rename = "cardUID")]
    pub card_uid: CardUid,
}

/// `NFC_CHANGE_KEYS` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeKeysRequest {
    pub key_number: KeySlot,
    pub auth_key: Key128,
    pub old_key: Key128,
    pub new_key: Key128,
}

/// `NFC_CHANGE_KEYS` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeKeysResponse {
    #[serde(default)]
    pub successful_keys: Vec<u8>,
    #[serde(default)]
    pub failed_keys: Vec<u8>,
}

impl ChangeKeysResponse {
    /// A key change only counts when nothing failed and the master slot
    /// is confirmed as changed.
    pub fn is_confirmed(&self) -> bool {
        self.failed_keys.is_empty() && self.successful_keys.contains(&KeySlot::MASTER.as_u8())
    }
}

/// `NFC_AUTHENTICATE` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateCardRequest {
    pub key_number: KeySlot,
    pub authentication_key: Key128,
}

/// `NFC_AUTHENTICATE` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateCardResponse {
    #[serde(default)]
    pub authentication_successful: bool,
}

/// `SHOW_TEXT`, `DISPLAY_SUCCESS` and `DISPLAY_ERROR` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Text {
    pub message: String,
}

impl Text {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub id: ResourceId,
    pub label: String,
}

/// `SELECT_ITEM` event sent to the reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectItem {
    pub label: String,
    pub options: Vec<SelectOption>,
}

/// `SELECT_ITEM` event sent back by the reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedItem {
    #[serde(default, deserialize_with = "lenient_id")]
    pub selected_id: Option<i64>,
}

/// Accepts a number or a numeric string; anything else becomes `None`.
fn lenient_id<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareLayout {
    pub chunks: usize,
    pub size: u64,
    #[serde(rename = "chunkSize")]
    pub chunk_size: usize,
}

/// `READER_FIRMWARE_UPDATE_REQUIRED` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareUpdateRequired {
    pub current: FirmwareDescriptor,
    pub available: FirmwareDefinition,
    pub firmware: FirmwareLayout,
}

/// `READER_FIRMWARE_STREAM_CHUNK` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    pub chunk_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub id: ResourceId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveUsage {
    pub user: UserSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRef {
    pub id: CardId,
}

/// `NFC_ENABLE_CARD_CHECKING` payload, tagged by the reason for scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CardChecking {
    #[serde(rename_all = "camelCase")]
    ToggleResourceUsage {
        resource: ResourceSummary,
        is_active: bool,
        active_usage_session: Option<ActiveUsage>,
        has_active_maintenance: bool,
        maintenances: Vec<Maintenance>,
    },
    EnrollNfcCard {
        user: UserSummary,
    },
    ResetNfcCard {
        card: CardRef,
        user: UserSummary,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!({"successfulKeys": [0], "failedKeys": []}), true)]
    #[case(json!({"successfulKeys": [0, 1], "failedKeys": []}), true)]
    #[case(json!({"successfulKeys": [1], "failedKeys": []}), false)]
    #[case(json!({"successfulKeys": [0], "failedKeys": [1]}), false)]
    #[case(json!({}), false)]
    fn test_change_keys_confirmation(#[case] payload: serde_json::Value, #[case] confirmed: bool) {
        let response: ChangeKeysResponse = serde_json::from_value(payload).unwrap();
        assert_eq!(response.is_confirmed(), confirmed);
    }

    #[rstest]
    #[case(json!({"selectedId": 3}), Some(3))]
    #[case(json!({"selectedId": "3"}), Some(3))]
    #[case(json!({"selectedId": " 12 "}), Some(12))]
    #[case(json!({"selectedId": "abc"}), None)]
    #[case(json!({"selectedId": null}), None)]
    #[case(json!({}), None)]
    fn test_selected_id_is_lenient(#[case] payload: serde_json::Value, #[case] expected: Option<i64>) {
        let selected: SelectedItem = serde_json::from_value(payload).unwrap();
        assert_eq!(selected.selected_id, expected);
    }

    #[test]
    fn test_card_uid_field_name() {
        let tap: NfcTap = serde_json::from_value(json!({"cardUID": "04A1B2C3D4E5F6"})).unwrap();
        assert_eq!(tap.card_uid.as_str(), "04A1B2C3D4E5F6");

        assert!(serde_json::from_value::<NfcTap>(json!({"cardUID": ""})).is_err());
    }

    #[test]
    fn test_change_keys_request_shape() {
        let request = ChangeKeysRequest {
            key_number: KeySlot::MASTER,
            auth_key: Key128::FACTORY_DEFAULT,
            old_key: Key128::FACTORY_DEFAULT,
            new_key: Key128::from_bytes([0xAB; 16]),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["keyNumber"], 0);
        assert_eq!(value["authKey"], "00000000000000000000000000000000");
        assert_eq!(value["newKey"], "abababababababababababababababab");
    }

    #[test]
    fn test_toggle_payload_shape() {
        let payload = CardChecking::ToggleResourceUsage {
            resource: ResourceSummary {
                id: ResourceId::new(4),
                name: "Laser".into(),
            },
            is_active: false,
            active_usage_session: None,
            has_active_maintenance: false,
            maintenances: vec![],
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "toggle-resource-usage",
                "resource": {"id": 4, "name": "Laser"},
                "isActive": false,
                "activeUsageSession": null,
                "hasActiveMaintenance": false,
                "maintenances": []
            })
        );
    }

    #[test]
    fn test_reset_payload_shape() {
        let payload = CardChecking::ResetNfcCard {
            card: CardRef { id: CardId::new(9) },
            user: UserSummary {
                id: UserId::new(2),
                username: "ada".into(),
            },
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["type"], "reset-nfc-card");
        assert_eq!(value["card"]["id"], 9);
        assert_eq!(value["user"]["username"], "ada");
    }

    #[test]
    fn test_firmware_layout_shape() {
        let layout = FirmwareLayout {
            chunks: 3,
            size: 20_000,
            chunk_size: 8192,
        };
        let value = serde_json::to_value(&layout).unwrap();
        assert_eq!(value, json!({"chunks": 3, "size": 20000, "chunkSize": 8192}));
    }
}
