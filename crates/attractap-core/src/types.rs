use crate::{
    Result,
    constants::{KEY_SEED_LENGTH, MAX_CARD_UID_LENGTH, NTAG424_KEY_LENGTH, NTAG424_MAX_KEY_SLOT},
    error::Error,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use subtle::ConstantTimeEq;
use uuid::Uuid;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

numeric_id!(
    /// Persistent identifier of a reader (terminal).
    ReaderId
);
numeric_id!(
    /// Persistent identifier of a resource a reader can toggle.
    ResourceId
);
numeric_id!(
    /// Persistent identifier of a user.
    UserId
);
numeric_id!(
    /// Persistent identifier of an enrolled card record.
    CardId
);
numeric_id!(
    /// Identifier of a resource usage session.
    SessionId
);
numeric_id!(
    /// Identifier of a maintenance window.
    MaintenanceId
);

/// Ephemeral identifier of one live reader connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh random connection id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // The first group is plenty to tell connections apart in logs.
        let simple = self.0.simple().to_string();
        write!(f, "{}", &simple[..8])
    }
}

/// Physical card UID as reported by a reader (hex string).
///
/// # Security
/// Comparison runs in constant time, UIDs gate access to key material.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CardUid(String);

impl CardUid {
    /// Create a card UID with validation.
    ///
    /// The value is trimmed but otherwise kept as reported, since the UID
    /// feeds key derivation and must match what the card presents.
    ///
    /// # Errors
    /// Returns `Error::InvalidCardUid` if the UID is empty, longer than
    /// [`MAX_CARD_UID_LENGTH`] or contains non-alphanumeric characters.
    pub fn new(uid: &str) -> Result<Self> {
        let uid = uid.trim();

        if uid.is_empty() {
            return Err(Error::InvalidCardUid("Card UID must not be empty".to_string()));
        }

        if uid.len() > MAX_CARD_UID_LENGTH {
            return Err(Error::InvalidCardUid(format!(
                "Card UID must be at most {MAX_CARD_UID_LENGTH} chars, got {}",
                uid.len()
            )));
        }

        if !uid.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidCardUid(format!(
                "Card UID must be ASCII alphanumeric: {uid}"
            )));
        }

        Ok(CardUid(uid.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl PartialEq for CardUid {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl std::hash::Hash for CardUid {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Display for CardUid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CardUid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CardUid::new(s)
    }
}

impl TryFrom<String> for CardUid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        CardUid::new(&value)
    }
}

impl From<CardUid> for String {
    fn from(uid: CardUid) -> Self {
        uid.0
    }
}

/// Key slot number on an NTAG424 card (0-4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct KeySlot(u8);

impl KeySlot {
    /// Application master key.
    pub const MASTER: KeySlot = KeySlot(0);

    /// # Errors
    /// Returns `Error::InvalidKeySlot` above [`NTAG424_MAX_KEY_SLOT`].
    pub fn new(slot: u8) -> Result<Self> {
        if slot > NTAG424_MAX_KEY_SLOT {
            return Err(Error::InvalidKeySlot(slot));
        }
        Ok(KeySlot(slot))
    }

    #[must_use]
    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for KeySlot {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        KeySlot::new(value)
    }
}

impl From<KeySlot> for u8 {
    fn from(slot: KeySlot) -> Self {
        slot.0
    }
}

impl fmt::Display for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 128-bit AES key as used by NTAG424 cards.
///
/// Serialized as a lowercase hex string. `Debug` never prints the key.
///
/// # Security
/// Equality runs in constant time.
#[derive(Clone, Copy, Eq)]
pub struct Key128([u8; NTAG424_KEY_LENGTH]);

impl Key128 {
    /// Factory default key of a blank card (all zero).
    pub const FACTORY_DEFAULT: Key128 = Key128([0u8; NTAG424_KEY_LENGTH]);

    #[must_use]
    pub const fn from_bytes(bytes: [u8; NTAG424_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse a key from its hex representation.
    ///
    /// # Errors
    /// Returns `Error::InvalidKey` unless the input is exactly 32 hex digits.
    pub fn from_hex(value: &str) -> Result<Self> {
        let bytes = hex::decode(value.trim())
            .map_err(|e| Error::InvalidKey(format!("Key is not valid hex: {e}")))?;

        let bytes: [u8; NTAG424_KEY_LENGTH] = bytes.try_into().map_err(|v: Vec<u8>| {
            Error::InvalidKey(format!(
                "Key must be {NTAG424_KEY_LENGTH} bytes, got {}",
                v.len()
            ))
        })?;

        Ok(Self(bytes))
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NTAG424_KEY_LENGTH] {
        &self.0
    }

    #[must_use]
    pub fn is_factory_default(&self) -> bool {
        *self == Self::FACTORY_DEFAULT
    }
}

impl Default for Key128 {
    fn default() -> Self {
        Self::FACTORY_DEFAULT
    }
}

impl PartialEq for Key128 {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Debug for Key128 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Key128(**redacted**)")
    }
}

impl Serialize for Key128 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Key128 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Key128::from_hex(&value).map_err(serde::de::Error::custom)
    }
}

/// Per-user secret from which all of that user's card keys are derived.
///
/// Generated once per user and persisted; never sent to a reader.
#[derive(Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeySeed(String);

impl KeySeed {
    /// Wrap a hex encoded seed.
    ///
    /// # Errors
    /// Returns `Error::InvalidKey` unless the seed is [`KEY_SEED_LENGTH`] bytes of hex.
    pub fn from_hex(value: &str) -> Result<Self> {
        let value = value.trim();
        let decoded = hex::decode(value)
            .map_err(|e| Error::InvalidKey(format!("Key seed is not valid hex: {e}")))?;

        if decoded.len() != KEY_SEED_LENGTH {
            return Err(Error::InvalidKey(format!(
                "Key seed must be {KEY_SEED_LENGTH} bytes, got {}",
                decoded.len()
            )));
        }

        Ok(Self(value.to_ascii_lowercase()))
    }

    #[must_use]
    pub fn from_bytes(bytes: &[u8; KEY_SEED_LENGTH]) -> Self {
        Self(hex::encode(bytes))
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl PartialEq for KeySeed {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl fmt::Debug for KeySeed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("KeySeed(**redacted**)")
    }
}

impl TryFrom<String> for KeySeed {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        KeySeed::from_hex(&value)
    }
}

impl From<KeySeed> for String {
    fn from(seed: KeySeed) -> Self {
        seed.0
    }
}

/// Firmware a reader reports it is running.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FirmwareDescriptor {
    pub name: String,
    pub variant: String,
    pub version: String,
}

impl fmt::Display for FirmwareDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}@{}", self.name, self.variant, self.version)
    }
}

/// Catalog entry describing the latest firmware for a name and variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareDefinition {
    pub name: String,
    #[serde(default)]
    pub friendly_name: String,
    pub variant: String,
    #[serde(default)]
    pub variant_friendly_name: String,
    pub version: String,
    pub filename: String,
}

impl FirmwareDefinition {
    #[must_use]
    pub fn descriptor(&self) -> FirmwareDescriptor {
        FirmwareDescriptor {
            name: self.name.clone(),
            variant: self.variant.clone(),
            version: self.version.clone(),
        }
    }

    /// Whether a reader running `current` needs this firmware.
    ///
    /// Versions are compared as opaque strings.
    #[must_use]
    pub fn supersedes(&self, current: &FirmwareDescriptor) -> bool {
        self.name == current.name && self.variant == current.variant && self.version != current.version
    }
}

/// Resource a reader can be bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Persisted reader identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderIdentity {
    pub id: ReaderId,
    pub name: String,
    pub api_token_hash: String,
    pub firmware: Option<FirmwareDescriptor>,
    pub resources: Vec<Resource>,
    pub first_connection: Option<DateTime<Utc>>,
    pub last_connection: Option<DateTime<Utc>>,
}

impl ReaderIdentity {
    #[must_use]
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        self.resources.iter().map(|r| r.id).collect()
    }

    #[must_use]
    pub fn resource(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }
}

/// Data needed to create a reader on registration.
#[derive(Debug, Clone)]
pub struct NewReader {
    pub name: String,
    pub api_token_hash: String,
    pub firmware: Option<FirmwareDescriptor>,
}

/// Partial update of a reader. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ReaderUpdate {
    pub name: Option<String>,
    pub firmware: Option<FirmwareDescriptor>,
    pub resource_ids: Option<Vec<ResourceId>>,
}

impl ReaderUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn firmware(mut self, firmware: FirmwareDescriptor) -> Self {
        self.firmware = Some(firmware);
        self
    }

    pub fn resource_ids(mut self, ids: Vec<ResourceId>) -> Self {
        self.resource_ids = Some(ids);
        self
    }
}

/// Enrolled card and its per-slot key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardRecord {
    pub id: CardId,
    pub uid: CardUid,
    pub keys: BTreeMap<KeySlot, Key128>,
    pub owner: UserId,
    pub last_seen: Option<DateTime<Utc>>,
}

impl CardRecord {
    #[must_use]
    pub fn key(&self, slot: KeySlot) -> Option<Key128> {
        self.keys.get(&slot).copied()
    }
}

/// Card record to persist after a successful enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCard {
    pub uid: CardUid,
    pub keys: BTreeMap<KeySlot, Key128>,
    pub owner: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

/// Active or historic use of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSession {
    pub id: SessionId,
    pub resource_id: ResourceId,
    pub user_id: UserId,
    pub username: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Maintenance window blocking a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Maintenance {
    pub id: MaintenanceId,
    pub resource_id: ResourceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl Maintenance {
    /// Whether the window covers `at`.
    #[must_use]
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.start_time <= at && self.end_time.is_none_or(|end| end > at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rstest::rstest;

    #[rstest]
    #[case("04A1B2C3D4E5F6")]
    #[case("UID1")]
    #[case("  04a1b2  ")]
    fn test_card_uid_valid(#[case] input: &str) {
        let uid = CardUid::new(input).unwrap();
        assert_eq!(uid.as_str(), input.trim());
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("04:A1:B2")]
    #[case("123456789012345678901234567890123")]
    fn test_card_uid_invalid(#[case] input: &str) {
        assert!(matches!(CardUid::new(input), Err(Error::InvalidCardUid(_))));
    }

    #[test]
    fn test_card_uid_keeps_case() {
        let lower = CardUid::new("04a1").unwrap();
        let upper = CardUid::new("04A1").unwrap();
        assert_ne!(lower, upper);
    }

    #[test]
    fn test_key_hex_roundtrip() {
        let key = Key128::from_bytes([0xAB; 16]);
        assert_eq!(key.to_hex(), "abababababababababababababababab");
        assert_eq!(Key128::from_hex(&key.to_hex()).unwrap(), key);
    }

    #[rstest]
    #[case("zz")]
    #[case("00")]
    #[case("000000000000000000000000000000000000")]
    fn test_key_from_hex_invalid(#[case] input: &str) {
        assert!(matches!(Key128::from_hex(input), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = Key128::from_bytes([0x11; 16]);
        let debug = format!("{key:?}");
        assert!(!debug.contains("11"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_factory_default_key() {
        assert!(Key128::default().is_factory_default());
        assert_eq!(Key128::FACTORY_DEFAULT.to_hex(), "0".repeat(32));
    }

    #[test]
    fn test_key_serde_as_hex_string() {
        let key = Key128::from_bytes([0x01; 16]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"01010101010101010101010101010101\"");
        let back: Key128 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[rstest]
    #[case(0, true)]
    #[case(4, true)]
    #[case(5, false)]
    fn test_key_slot_range(#[case] slot: u8, #[case] valid: bool) {
        assert_eq!(KeySlot::new(slot).is_ok(), valid);
    }

    #[test]
    fn test_key_seed_validation() {
        let seed = KeySeed::from_bytes(&[7u8; KEY_SEED_LENGTH]);
        assert_eq!(KeySeed::from_hex(seed.expose()).unwrap(), seed);
        assert!(KeySeed::from_hex("abcd").is_err());
        assert!(!format!("{seed:?}").contains("0707"));
    }

    #[test]
    fn test_firmware_supersedes() {
        let definition = FirmwareDefinition {
            name: "attractap".to_string(),
            friendly_name: "Attractap".to_string(),
            variant: "eth".to_string(),
            variant_friendly_name: "Ethernet".to_string(),
            version: "1.2.0".to_string(),
            filename: "attractap_eth.bin".to_string(),
        };

        let mut current = definition.descriptor();
        assert!(!definition.supersedes(&current));

        current.version = "1.1.0".to_string();
        assert!(definition.supersedes(&current));

        current.variant = "wifi".to_string();
        assert!(!definition.supersedes(&current));
    }

    #[test]
    fn test_maintenance_window() {
        let now = Utc::now();
        let open_ended = Maintenance {
            id: MaintenanceId::new(1),
            resource_id: ResourceId::new(1),
            reason: None,
            start_time: now - Duration::hours(1),
            end_time: None,
        };
        assert!(open_ended.is_active_at(now));

        let finished = Maintenance {
            end_time: Some(now - Duration::minutes(1)),
            ..open_ended.clone()
        };
        assert!(!finished.is_active_at(now));

        let upcoming = Maintenance {
            start_time: now + Duration::hours(1),
            ..open_ended
        };
        assert!(!upcoming.is_active_at(now));
    }

    #[test]
    fn test_connection_id_display_is_short() {
        let id = ConnectionId::new();
        assert_eq!(id.to_string().len(), 8);
        assert_ne!(id, ConnectionId::new());
    }

    #[test]
    fn test_reader_update_builder() {
        let update = ReaderUpdate::new()
            .name("Lathe")
            .resource_ids(vec![ResourceId::new(3)]);
        assert_eq!(update.name.as_deref(), Some("Lathe"));
        assert!(update.firmware.is_none());
        assert_eq!(update.resource_ids, Some(vec![ResourceId::new(3)]));
    }
}
