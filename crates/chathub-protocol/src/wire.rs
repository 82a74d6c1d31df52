//! Low-level primitives shared by every message payload's encode/decode impl
//! (§4.1): big-endian integers, presence-byte optionals, `u16`-length-prefixed
//! UTF-8 strings, and millisecond timestamps.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;

/// Append-only cursor used by `WireEncode::encode` implementations.
pub struct WireWriter<'a> {
    buf: &'a mut BytesMut,
}

impl<'a> WireWriter<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    pub fn put_str(&mut self, s: &str) {
        let bytes = s.as_bytes();
        self.buf.put_u16(bytes.len() as u16);
        self.buf.put_slice(bytes);
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_u32(bytes.len() as u32);
        self.buf.put_slice(bytes);
    }

    /// Presence byte (`0`/`1`) followed by the value when present.
    pub fn put_option<T>(&mut self, value: &Option<T>, write: impl FnOnce(&mut Self, &T)) {
        match value {
            Some(v) => {
                self.put_bool(true);
                write(self, v);
            }
            None => self.put_bool(false),
        }
    }

    /// `u16` element count followed by each element via `write`.
    pub fn put_vec<T>(&mut self, values: &[T], mut write: impl FnMut(&mut Self, &T)) {
        self.buf.put_u16(values.len() as u16);
        for v in values {
            write(self, v);
        }
    }
}

/// Read-only cursor used by `WireDecode::decode` implementations. Never
/// panics: every read that would run past the end of the buffer returns
/// [`ProtocolError::UnexpectedEof`].
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize) -> Result<(), ProtocolError> {
        if self.buf.len() < n {
            Err(ProtocolError::UnexpectedEof)
        } else {
            Ok(())
        }
    }

    pub fn get_u8(&mut self) -> Result<u8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn get_u16(&mut self) -> Result<u16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn get_u32(&mut self) -> Result<u32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn get_u64(&mut self) -> Result<u64, ProtocolError> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    pub fn get_i64(&mut self) -> Result<i64, ProtocolError> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn get_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_str(&mut self) -> Result<String, ProtocolError> {
        let len = self.get_u16()? as usize;
        self.need(len)?;
        let bytes = &self.buf[..len];
        let s = std::str::from_utf8(bytes)
            .map_err(|_| ProtocolError::InvalidUtf8)?
            .to_owned();
        self.buf.advance(len);
        Ok(s)
    }

    pub fn get_bytes(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.get_u32()? as usize;
        self.need(len)?;
        let out = self.buf[..len].to_vec();
        self.buf.advance(len);
        Ok(out)
    }

    pub fn get_option<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> Result<T, ProtocolError>,
    ) -> Result<Option<T>, ProtocolError> {
        if self.get_bool()? {
            Ok(Some(read(self)?))
        } else {
            Ok(None)
        }
    }

    pub fn get_vec<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> Result<T, ProtocolError>,
    ) -> Result<Vec<T>, ProtocolError> {
        let count = self.get_u16()? as usize;
        let mut out = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            out.push(read(self)?);
        }
        Ok(out)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalars_strings_and_options() {
        let mut buf = BytesMut::new();
        {
            let mut w = WireWriter::new(&mut buf);
            w.put_u8(7);
            w.put_i64(-42);
            w.put_str("hello");
            w.put_option(&Some(3u32), |w, v| w.put_u32(*v));
            w.put_option(&None::<u32>, |w, v| w.put_u32(*v));
            w.put_vec(&[1u16, 2, 3], |w, v| w.put_u16(*v));
        }

        let mut r = WireReader::new(&buf);
        assert_eq!(r.get_u8().unwrap(), 7);
        assert_eq!(r.get_i64().unwrap(), -42);
        assert_eq!(r.get_str().unwrap(), "hello");
        assert_eq!(r.get_option(|r| r.get_u32()).unwrap(), Some(3));
        assert_eq!(r.get_option(|r| r.get_u32()).unwrap(), None);
        assert_eq!(r.get_vec(|r| r.get_u16()).unwrap(), vec![1, 2, 3]);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn truncated_buffer_yields_unexpected_eof_instead_of_panicking() {
        let mut r = WireReader::new(&[0x00, 0x05, b'h', b'i']);
        assert!(matches!(r.get_str(), Err(ProtocolError::UnexpectedEof)));
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut buf = BytesMut::new();
        WireWriter::new(&mut buf).put_u16(2);
        buf.extend_from_slice(&[0xff, 0xfe]);
        let mut r = WireReader::new(&buf);
        assert!(matches!(r.get_str(), Err(ProtocolError::InvalidUtf8)));
    }
}
