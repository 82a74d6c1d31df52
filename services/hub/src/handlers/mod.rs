//! Per-message-type handlers (§4.5). Each function owns one wire message
//! type: it validates against [`chathub_core::MemDb`]/[`chathub_core::SessionManager`],
//! mutates state, and sends the type's natural response frame. Handlers
//! return [`crate::error::HandlerError`] only for the two things they can't
//! resolve inline (disconnect, database failure) -- everything else is
//! folded into a response frame before returning `Ok(())`.

pub mod admin;
pub mod auth;
pub mod channel;
pub mod directory;
pub mod message;
pub mod nickname;
pub mod subscribe;
