/// Errors raised by MemDB and the session manager (§4.2, §4.3).
///
/// Deliberately distinct from [`chathub_protocol::ProtocolError`]: these are
/// business-rule failures, not wire-format failures, and handlers map them
/// to type-specific failure responses rather than to `ERROR` frames (§7).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("chat channels do not support threaded replies")]
    ChatDoesNotThread,
    #[error("message exceeds the maximum length")]
    MessageTooLong,
    #[error("parent message not found")]
    ParentNotFound,
    #[error("channel not found")]
    ChannelNotFound,
    #[error("channel name already in use")]
    ChannelNameTaken,
    #[error("message not found")]
    MessageNotFound,
    #[error("message has already been deleted")]
    AlreadyDeleted,
    #[error("user not found")]
    UserNotFound,
    #[error("nickname already in use")]
    NicknameTaken,
    #[error("nickname does not match the required pattern")]
    InvalidNickname,
    #[error("session not found")]
    SessionNotFound,
    #[error("subscription limit exceeded")]
    SubscriptionLimit,
    #[error("permission denied")]
    PermissionDenied,
    #[error("server is not registered with a directory")]
    ServerNotRegistered,
    #[error("database error: {0}")]
    Database(String),
}
