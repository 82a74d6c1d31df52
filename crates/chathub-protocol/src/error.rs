/// Errors produced by frame and message (de)serialization.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame payload of {0} bytes exceeds the {1} byte limit")]
    PayloadTooLarge(u32, u32),
    #[error("unsupported frame version {0}, expected {1}")]
    UnsupportedVersion(u8, u8),
    #[error("unexpected end of buffer while decoding")]
    UnexpectedEof,
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    #[error("unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),
    #[error("message kind {0:?} does not match frame type 0x{1:02x}")]
    KindMismatch(&'static str, u8),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket message did not contain a complete frame")]
    Incomplete,
    #[error("non-binary websocket message")]
    NonBinaryMessage,
}
