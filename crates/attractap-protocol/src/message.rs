//! JSON envelope exchanged with readers.
//!
//! Every text frame carries exactly one [`Envelope`]:
//!
//! ```text
//! {"event": "EVENT",     "data": {"type": "NFC_TAP", "payload": {"cardUID": "04A1B2"}}}
//! {"event": "RESPONSE",  "data": {"type": "ACK_NFC_ENABLE_CARD_CHECKING", "payload": {}}}
//! {"event": "HEARTBEAT", "data": {}}
//! ```
//!
//! The `type` field is parsed into a [`TypeTag`]: either a plain
//! [`MessageType`] or an acknowledgement of one (`ACK_` prefix).

use std::fmt;

use attractap_core::constants::{ACK_PREFIX, KIND_EVENT, KIND_HEARTBEAT, KIND_RESPONSE};
use attractap_core::{Error, ReaderId, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Direction-independent kind of a structured message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Unsolicited message, from either side.
    Event,
    /// Reply to an earlier event, including acknowledgements.
    Response,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Event => KIND_EVENT,
            MessageKind::Response => KIND_RESPONSE,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Message types understood by the gateway.
///
/// Names the gateway does not know are preserved in [`MessageType::Other`]
/// so they can be logged and dropped without failing the whole frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    ReaderRegister,
    ReaderAuthenticate,
    ReaderUnauthorized,
    ReaderAuthenticated,
    /// Ask a reader to authenticate again (REAUTHENTICATE).
    ReaderRequestAuthentication,
    Cancel,
    NfcTap,
    NfcEnableCardChecking,
    NfcDisableCardChecking,
    NfcChangeKeys,
    NfcAuthenticate,
    DisplaySuccess,
    DisplayError,
    ClearSuccess,
    ClearError,
    ShowText,
    SelectItem,
    ReaderFirmwareInfo,
    ReaderFirmwareUpdateRequired,
    ReaderFirmwareStreamChunk,
    Other(String),
}

impl MessageType {
    /// Parse a wire name. Never fails; unknown names become [`MessageType::Other`].
    ///
    /// # Example
    ///
    /// ```
    /// use attractap_protocol::MessageType;
    ///
    /// assert_eq!(MessageType::parse("NFC_TAP"), MessageType::NfcTap);
    /// assert_eq!(MessageType::parse("BLINK"), MessageType::Other("BLINK".into()));
    /// ```
    pub fn parse(s: &str) -> Self {
        match s {
            "READER_REGISTER" => MessageType::ReaderRegister,
            "READER_AUTHENTICATE" => MessageType::ReaderAuthenticate,
            "READER_UNAUTHORIZED" => MessageType::ReaderUnauthorized,
            "READER_AUTHENTICATED" => MessageType::ReaderAuthenticated,
            "READER_REQUEST_AUTHENTICATION" => MessageType::ReaderRequestAuthentication,
            "CANCEL" => MessageType::Cancel,
            "NFC_TAP" => MessageType::NfcTap,
            "NFC_ENABLE_CARD_CHECKING" => MessageType::NfcEnableCardChecking,
            "NFC_DISABLE_CARD_CHECKING" => MessageType::NfcDisableCardChecking,
            "NFC_CHANGE_KEYS" => MessageType::NfcChangeKeys,
            "NFC_AUTHENTICATE" => MessageType::NfcAuthenticate,
            "DISPLAY_SUCCESS" => MessageType::DisplaySuccess,
            "DISPLAY_ERROR" => MessageType::DisplayError,
            "CLEAR_SUCCESS" => MessageType::ClearSuccess,
            "CLEAR_ERROR" => MessageType::ClearError,
            "SHOW_TEXT" => MessageType::ShowText,
            "SELECT_ITEM" => MessageType::SelectItem,
            "READER_FIRMWARE_INFO" => MessageType::ReaderFirmwareInfo,
            "READER_FIRMWARE_UPDATE_REQUIRED" => MessageType::ReaderFirmwareUpdateRequired,
            "READER_FIRMWARE_STREAM_CHUNK" => MessageType::ReaderFirmwareStreamChunk,
            other => MessageType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageType::ReaderRegister => "READER_REGISTER",
            MessageType::ReaderAuthenticate => "READER_AUTHENTICATE",
            MessageType::ReaderUnauthorized => "READER_UNAUTHORIZED",
            MessageType::ReaderAuthenticated => "READER_AUTHENTICATED",
            MessageType::ReaderRequestAuthentication => "READER_REQUEST_AUTHENTICATION",
            MessageType::Cancel => "CANCEL",
            MessageType::NfcTap => "NFC_TAP",
            MessageType::NfcEnableCardChecking => "NFC_ENABLE_CARD_CHECKING",
            MessageType::NfcDisableCardChecking => "NFC_DISABLE_CARD_CHECKING",
            MessageType::NfcChangeKeys => "NFC_CHANGE_KEYS",
            MessageType::NfcAuthenticate => "NFC_AUTHENTICATE",
            MessageType::DisplaySuccess => "DISPLAY_SUCCESS",
            MessageType::DisplayError => "DISPLAY_ERROR",
            MessageType::ClearSuccess => "CLEAR_SUCCESS",
            MessageType::ClearError => "CLEAR_ERROR",
            MessageType::ShowText => "SHOW_TEXT",
            MessageType::SelectItem => "SELECT_ITEM",
            MessageType::ReaderFirmwareInfo => "READER_FIRMWARE_INFO",
            MessageType::ReaderFirmwareUpdateRequired => "READER_FIRMWARE_UPDATE_REQUIRED",
            MessageType::ReaderFirmwareStreamChunk => "READER_FIRMWARE_STREAM_CHUNK",
            MessageType::Other(name) => name,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed `type` field of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TypeTag {
    Message(MessageType),
    /// Acknowledgement of the wrapped type (`ACK_<TYPE>`).
    Ack(MessageType),
}

impl TypeTag {
    pub fn parse(s: &str) -> Self {
        match s.strip_prefix(ACK_PREFIX) {
            Some(acked) => TypeTag::Ack(MessageType::parse(acked)),
            None => TypeTag::Message(MessageType::parse(s)),
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, TypeTag::Ack(_))
    }

    /// The message type, acknowledged or not.
    pub fn message_type(&self) -> &MessageType {
        match self {
            TypeTag::Message(ty) | TypeTag::Ack(ty) => ty,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypeTag::Message(ty) => write!(f, "{ty}"),
            TypeTag::Ack(ty) => write!(f, "{ACK_PREFIX}{ty}"),
        }
    }
}

impl From<String> for TypeTag {
    fn from(value: String) -> Self {
        TypeTag::parse(&value)
    }
}

impl From<TypeTag> for String {
    fn from(tag: TypeTag) -> Self {
        tag.to_string()
    }
}

impl From<MessageType> for TypeTag {
    fn from(ty: MessageType) -> Self {
        TypeTag::Message(ty)
    }
}

/// Credentials a reader may attach to any message.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    pub id: ReaderId,
    pub token: String,
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Auth")
            .field("id", &self.id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// A structured event or response.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    pub tag: TypeTag,
    pub payload: Value,
    pub auth: Option<Auth>,
}

impl Message {
    pub fn new(kind: MessageKind, tag: impl Into<TypeTag>, payload: Value) -> Self {
        Self {
            kind,
            tag: tag.into(),
            payload,
            auth: None,
        }
    }

    pub fn event(ty: MessageType, payload: Value) -> Self {
        Self::new(MessageKind::Event, ty, payload)
    }

    pub fn response(ty: MessageType, payload: Value) -> Self {
        Self::new(MessageKind::Response, ty, payload)
    }

    /// Event with an empty object payload.
    pub fn bare_event(ty: MessageType) -> Self {
        Self::event(ty, Value::Object(Default::default()))
    }

    /// Acknowledgement a reader sends for a received message of type `ty`.
    pub fn ack(ty: MessageType) -> Self {
        Self::new(
            MessageKind::Response,
            TypeTag::Ack(ty),
            Value::Object(Default::default()),
        )
    }

    pub fn typed_event<P: Serialize>(ty: MessageType, payload: &P) -> Result<Self> {
        Ok(Self::event(ty, to_value(payload)?))
    }

    pub fn typed_response<P: Serialize>(ty: MessageType, payload: &P) -> Result<Self> {
        Ok(Self::response(ty, to_value(payload)?))
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Decode the payload into a typed structure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessageFormat`] naming the message type if the
    /// payload does not have the expected shape.
    pub fn payload_as<P: DeserializeOwned>(&self) -> Result<P> {
        P::deserialize(&self.payload)
            .map_err(|e| Error::InvalidMessageFormat(format!("{} payload: {e}", self.tag)))
    }

    pub fn is_ack(&self) -> bool {
        self.tag.is_ack()
    }

    /// Message type of a non-acknowledgement message.
    pub fn message_type(&self) -> Option<&MessageType> {
        match &self.tag {
            TypeTag::Message(ty) => Some(ty),
            TypeTag::Ack(_) => None,
        }
    }

    pub fn is(&self, ty: &MessageType) -> bool {
        self.message_type() == Some(ty)
    }
}

/// One text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Heartbeat,
    Message(Message),
}

#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    event: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Serialize, Deserialize)]
struct RawData {
    #[serde(rename = "type")]
    tag: TypeTag,
    #[serde(default)]
    payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth: Option<Auth>,
}

impl Envelope {
    /// Parse one text frame.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON, an unknown `event` discriminator, or a
    /// structured message without a `data.type` field.
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(|e| Error::Json(e.to_string()))?;

        let kind = match raw.event.as_str() {
            KIND_HEARTBEAT => return Ok(Envelope::Heartbeat),
            KIND_EVENT => MessageKind::Event,
            KIND_RESPONSE => MessageKind::Response,
            other => {
                return Err(Error::InvalidMessageFormat(format!(
                    "unknown envelope kind '{other}'"
                )));
            }
        };

        let data = raw.data.ok_or_else(|| Error::MissingField("data".to_string()))?;
        let data: RawData = serde_json::from_value(data)
            .map_err(|e| Error::InvalidMessageFormat(format!("{kind} data: {e}")))?;

        Ok(Envelope::Message(Message {
            kind,
            tag: data.tag,
            payload: data.payload,
            auth: data.auth,
        }))
    }

    pub fn to_json(&self) -> Result<String> {
        let raw = match self {
            Envelope::Heartbeat => RawEnvelope {
                event: KIND_HEARTBEAT.to_string(),
                data: Some(Value::Object(Default::default())),
            },
            Envelope::Message(msg) => {
                let data = RawData {
                    tag: msg.tag.clone(),
                    payload: msg.payload.clone(),
                    auth: msg.auth.clone(),
                };
                RawEnvelope {
                    event: msg.kind.as_str().to_string(),
                    data: Some(to_value(&data)?),
                }
            }
        };
        serde_json::to_string(&raw).map_err(|e| Error::Json(e.to_string()))
    }
}

impl From<Message> for Envelope {
    fn from(msg: Message) -> Self {
        Envelope::Message(msg)
    }
}

fn to_value<P: Serialize>(payload: &P) -> Result<Value> {
    serde_json::to_value(payload).map_err(|e| Error::Json(e.to_string()))
}
