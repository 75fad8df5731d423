//! Response Writer
//!
//! Builds one framed response directly in a connection's write buffer.
//!
//! Neither the frame length nor an array's element count is known before
//! the command finishes producing output, so both are written as zero
//! placeholders and patched afterwards:
//!
//! ```text
//!   [ len: u32 ][ 4 ][ count: u32 ][ elem ][ elem ] ...
//!     ^ patched by finish()  ^ patched by end_array()
//! ```

use bytes::{BufMut, BytesMut};

use super::types::tag;

/// Largest response body; anything bigger is replaced by an error.
pub const MAX_RESPONSE_SIZE: usize = 32 << 20;

/// Position of an array's count placeholder, returned by
/// [`ResponseWriter::begin_array`].
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct ArrayMark(usize);

/// Appends one response frame to a buffer.
pub struct ResponseWriter<'a> {
    buf: &'a mut BytesMut,
    start: usize,
}

impl<'a> ResponseWriter<'a> {
    /// Starts a frame at the end of `buf`.
    pub fn begin(buf: &'a mut BytesMut) -> Self {
        let start = buf.len();
        buf.put_u32_le(0);
        Self { buf, start }
    }

    pub fn nil(&mut self) {
        self.buf.put_u8(tag::NIL);
    }

    pub fn error(&mut self, msg: &str) {
        self.buf.put_u8(tag::ERROR);
        self.buf.put_u32_le(msg.len() as u32);
        self.buf.put_slice(msg.as_bytes());
    }

    pub fn string(&mut self, data: &[u8]) {
        self.buf.put_u8(tag::STRING);
        self.buf.put_u32_le(data.len() as u32);
        self.buf.put_slice(data);
    }

    pub fn integer(&mut self, n: i64) {
        self.buf.put_u8(tag::INTEGER);
        self.buf.put_i64_le(n);
    }

    /// Opens an array whose count is filled in by [`end_array`](Self::end_array).
    pub fn begin_array(&mut self) -> ArrayMark {
        self.buf.put_u8(tag::ARRAY);
        let pos = self.buf.len();
        self.buf.put_u32_le(0);
        ArrayMark(pos)
    }

    pub fn end_array(&mut self, mark: ArrayMark, count: u32) {
        let ArrayMark(pos) = mark;
        self.buf[pos..pos + 4].copy_from_slice(&count.to_le_bytes());
    }

    /// Size of the body written so far.
    pub fn body_len(&self) -> usize {
        self.buf.len() - self.start - 4
    }

    /// Patches the frame length. An oversized body is discarded and
    /// replaced with an error.
    pub fn finish(mut self) {
        if self.body_len() > MAX_RESPONSE_SIZE {
            self.buf.truncate(self.start + 4);
            self.error("response is too big");
        }
        let len = self.body_len() as u32;
        let start = self.start;
        self.buf[start..start + 4].copy_from_slice(&len.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Value;

    #[test]
    fn test_frame_length_is_patched() {
        let mut buf = BytesMut::new();
        let mut w = ResponseWriter::begin(&mut buf);
        w.integer(7);
        w.finish();
        assert_eq!(&buf[..], &[9, 0, 0, 0, 3, 7, 0, 0, 0, 0, 0, 0, 0][..]);
    }

    #[test]
    fn test_array_count_is_patched() {
        let mut buf = BytesMut::new();
        let mut w = ResponseWriter::begin(&mut buf);
        let mark = w.begin_array();
        for i in 0..3 {
            w.integer(i);
        }
        w.end_array(mark, 3);
        w.finish();

        assert_eq!(&buf[0..4], &(5u32 + 27).to_le_bytes());
        assert_eq!(buf[4], tag::ARRAY);
        assert_eq!(&buf[5..9], &3u32.to_le_bytes());
    }

    #[test]
    fn test_matches_value_serialization() {
        let value = Value::array(vec![
            Value::array(vec![Value::string(&b"m2"[..]), Value::integer(3)]),
            Value::Nil,
            Value::error("x"),
        ]);

        let mut buf = BytesMut::new();
        let mut w = ResponseWriter::begin(&mut buf);
        let outer = w.begin_array();
        let inner = w.begin_array();
        w.string(b"m2");
        w.integer(3);
        w.end_array(inner, 2);
        w.nil();
        w.error("x");
        w.end_array(outer, 3);
        w.finish();

        assert_eq!(&buf[4..], &value.serialize()[..]);
    }

    #[test]
    fn test_frames_append_after_existing_data() {
        let mut buf = BytesMut::from(&b"xx"[..]);
        let mut w = ResponseWriter::begin(&mut buf);
        w.nil();
        w.finish();
        assert_eq!(&buf[..], &[b'x', b'x', 1, 0, 0, 0, 0][..]);
    }

    #[test]
    fn test_oversized_response_becomes_error() {
        let mut buf = BytesMut::new();
        let mut w = ResponseWriter::begin(&mut buf);
        let chunk = vec![0u8; 1 << 20];
        for _ in 0..33 {
            w.string(&chunk);
        }
        w.finish();

        let msg = b"response is too big";
        assert_eq!(buf.len(), 4 + 5 + msg.len());
        assert_eq!(buf[4], tag::ERROR);
        assert_eq!(&buf[9..], msg);
    }
}
