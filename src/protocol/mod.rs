//! Protocol module - Defines the wire protocol between backend and UI
//!
//! All integers are little-endian:
//! - Frame: 4 bytes payload length (unsigned) + payload
//! - Payload: 4 bytes signed variant tag + variant body
//! - String field: 4 bytes signed UTF-16 unit count (negative = null) + units

mod codec;
mod message;
mod registry;
pub mod wire;

pub use codec::*;
pub use message::*;
pub use registry::{DecodeFn, Message, Registry, VariantEntry, WireVariant};

/// Default channel name when none is configured
pub const DEFAULT_CHANNEL_NAME: &str = "pipelink";
