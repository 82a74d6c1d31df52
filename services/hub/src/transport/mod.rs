//! Transport listeners (§4: "Transport listeners"). Each transport wraps
//! its own channel/stream primitive in a [`chathub_core::model::ByteSink`]
//! and hands the dispatcher a `Stream<Item = Result<Frame, ProtocolError>>`;
//! all three produce identical `(Session, ByteStream)` pairs so
//! [`crate::dispatch::run_frame_loop`] never needs to know which transport a
//! session arrived on (§9 "Polymorphism over transports").

pub mod ssh;
pub mod tcp;
pub mod ws;
