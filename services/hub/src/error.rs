//! Handler- and transport-level error types (§7 "Error handling design").
//!
//! `CoreError` already carries the business-rule failures MemDB and the
//! session manager raise; handlers translate those into type-specific
//! wire responses themselves and never let a `HandlerError` escape for
//! them. `HandlerError` exists for the two things a handler legitimately
//! can't recover from inline: the client asked to disconnect, or the
//! durable/database layer failed underneath it.

use chathub_protocol::messages::error_code;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Sentinel recognized by the dispatcher (§7 "graceful disconnect"):
    /// the session has already been removed, so the loop exits without
    /// logging an error.
    #[error("client requested disconnect")]
    ClientDisconnecting,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HandlerError {
    /// The `ERROR` frame code/message the dispatcher sends for this error.
    /// Never called for `ClientDisconnecting`, which exits before replying.
    pub fn wire_code(&self) -> (u16, &'static str) {
        match self {
            HandlerError::ClientDisconnecting => (error_code::INTERNAL_ERROR, "internal error"),
            HandlerError::Database(_) => (error_code::DATABASE_ERROR, "database error"),
            HandlerError::Io(_) => (error_code::INTERNAL_ERROR, "internal error"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ssh error: {0}")]
    Ssh(#[from] russh::Error),
}

/// Maps a [`chathub_core::CoreError`] to the stable `(code, message)` pair
/// used when a handler has no dedicated failure response for its message
/// type and falls back to an `ERROR` frame (§6 "Error codes").
pub fn core_error_wire(err: &chathub_core::CoreError) -> (u16, String) {
    use chathub_core::CoreError::*;
    let code = match err {
        ChatDoesNotThread => error_code::CHAT_NO_THREAD,
        MessageTooLong => error_code::MESSAGE_TOO_LONG,
        SubscriptionLimit => error_code::SUBSCRIPTION_LIMIT,
        PermissionDenied => error_code::PERMISSION_DENIED,
        ParentNotFound | ChannelNotFound | MessageNotFound | UserNotFound | SessionNotFound => {
            error_code::NOT_FOUND
        }
        ServerNotRegistered => error_code::SERVER_NOT_REGISTERED,
        Database(_) => error_code::DATABASE_ERROR,
        ChannelNameTaken | NicknameTaken | InvalidNickname | AlreadyDeleted => {
            error_code::INVALID_FORMAT
        }
    };
    (code, err.to_string())
}
