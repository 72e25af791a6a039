//! Wire protocol spoken between Attractap readers and the gateway.
//!
//! Three layers:
//!
//! - [`codec`]: length-prefixed framing of text and binary frames
//! - [`message`]: the JSON envelope and its message type tags
//! - [`payloads`]: typed payloads of the individual message types
//!
//! # Example
//!
//! ```
//! use attractap_protocol::{Envelope, Message, MessageType};
//! use attractap_protocol::payloads::Text;
//!
//! let msg = Message::typed_event(MessageType::ShowText, &Text::new("Do not remove card!")).unwrap();
//! let json = Envelope::Message(msg).to_json().unwrap();
//! assert!(json.contains("\"SHOW_TEXT\""));
//! ```

pub mod codec;
pub mod message;
pub mod payloads;

pub use codec::{Frame, ReaderCodec};
pub use message::{Auth, Envelope, Message, MessageKind, MessageType, TypeTag};
