//! Binary wire frame codec and message types for the chat hub protocol.
//!
//! Layered bottom-up: [`wire`] provides cursor primitives for scalars,
//! strings and optionals; [`frame`] wraps a payload in the length-prefixed
//! frame envelope; [`codec`] adapts [`frame::Frame`] to `tokio_util`'s
//! `Decoder`/`Encoder` traits so any `AsyncRead + AsyncWrite` transport can
//! drive it through `Framed`; [`messages`] defines the typed payload for
//! every message kind on top of `wire`.

mod codec;
mod error;
mod frame;
mod wire;

pub mod messages;

pub use codec::ChatCodec;
pub use error::ProtocolError;
pub use frame::{Frame, HEADER_LEN, MAX_PAYLOAD_LEN, PROTOCOL_VERSION};
pub use messages::{decode_message, encode_message, Message};
pub use wire::{WireReader, WireWriter};
