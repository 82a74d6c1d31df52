use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Current (and only) wire protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Frame header size: version(1) + type(1) + flags(1) + payload_len(4).
pub const HEADER_LEN: usize = 7;

/// Maximum payload length accepted by the codec (1 MiB).
pub const MAX_PAYLOAD_LEN: u32 = 1024 * 1024;

/// A decoded wire frame: `version | type | flags | payload_len:u32(BE) | payload`.
///
/// `msg_type` identifies the payload's schema (see [`crate::messages::msg_type`]);
/// the codec itself is agnostic to what the payload means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub msg_type: u8,
    pub flags: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(msg_type: u8, payload: Bytes) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            msg_type,
            flags: 0,
            payload,
        }
    }

    /// Encode this frame's header + payload onto `dst`.
    pub fn write(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if self.payload.len() as u64 > MAX_PAYLOAD_LEN as u64 {
            return Err(ProtocolError::PayloadTooLarge(
                self.payload.len() as u32,
                MAX_PAYLOAD_LEN,
            ));
        }
        dst.reserve(HEADER_LEN + self.payload.len());
        dst.put_u8(self.version);
        dst.put_u8(self.msg_type);
        dst.put_u8(self.flags);
        dst.put_u32(self.payload.len() as u32);
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Attempt to decode one frame from the front of `src`, consuming it only
    /// on success. Returns `Ok(None)` when more bytes are needed.
    pub fn try_parse(src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &src[..HEADER_LEN];
        let version = header.get_u8();
        let msg_type = header.get_u8();
        let flags = header.get_u8();
        let payload_len = header.get_u32();

        if payload_len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge(payload_len, MAX_PAYLOAD_LEN));
        }
        if version != PROTOCOL_VERSION {
            // Still consume the frame so the connection can be closed cleanly
            // by the caller rather than wedging the codec on a bad header.
            return Err(ProtocolError::UnsupportedVersion(version, PROTOCOL_VERSION));
        }

        let total_len = HEADER_LEN + payload_len as usize;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(payload_len as usize).freeze();

        Ok(Some(Frame {
            version,
            msg_type,
            flags,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_frame_through_write_and_try_parse() {
        let frame = Frame::new(0x06, Bytes::from_static(b"hello"));
        let mut buf = BytesMut::new();
        frame.write(&mut buf).unwrap();

        let parsed = Frame::try_parse(&mut buf).unwrap().unwrap();
        assert_eq!(parsed, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn returns_none_on_partial_header() {
        let mut buf = BytesMut::from(&b"\x01\x06"[..]);
        assert_eq!(Frame::try_parse(&mut buf).unwrap(), None);
    }

    #[test]
    fn returns_none_on_partial_payload() {
        let frame = Frame::new(0x06, Bytes::from_static(b"hello world"));
        let mut full = BytesMut::new();
        frame.write(&mut full).unwrap();
        let mut partial = BytesMut::from(&full[..full.len() - 2]);
        assert_eq!(Frame::try_parse(&mut partial).unwrap(), None);
    }

    #[test]
    fn rejects_oversized_payload_length() {
        let mut buf = BytesMut::new();
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(0x06);
        buf.put_u8(0);
        buf.put_u32(MAX_PAYLOAD_LEN + 1);
        let err = Frame::try_parse(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadTooLarge(_, _)));
    }

    #[test]
    fn rejects_mismatched_version() {
        let mut buf = BytesMut::new();
        buf.put_u8(7);
        buf.put_u8(0x06);
        buf.put_u8(0);
        buf.put_u32(0);
        let err = Frame::try_parse(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedVersion(7, 1)));
    }
}
