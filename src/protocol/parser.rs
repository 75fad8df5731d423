//! Request and Response Decoding
//!
//! ## Requests
//!
//! ```text
//!   [ argc: u32 ][ len: u32 ][ bytes ... ][ len: u32 ][ bytes ... ] ...
//! ```
//!
//! A request has no outer length. It is decodable only once every declared
//! argument is fully buffered. Decoding returns:
//! - `Ok(Some((args, consumed)))` - a complete request, `consumed` bytes long
//! - `Ok(None)` - need more data
//! - `Err(ParseError)` - the peer violated the protocol; the connection
//!   is closed without a response
//!
//! Size limits are checked while walking the headers, so a request that
//! could never fit the read buffer is rejected as soon as its headers say
//! so, not after the buffer fills up.
//!
//! ## Responses
//!
//! `u32 total_length` followed by one tagged value (see
//! [`types`](super::types)). Decoding responses is what clients and tests
//! do; the server only encodes them.

use bytes::Bytes;
use thiserror::Error;

use super::types::{tag, Value};

/// Largest request payload accepted after the argument count.
pub const MAX_MSG_SIZE: usize = 4096;

/// Most arguments in one request.
pub const MAX_ARGS: usize = 1024;

/// Arrays nested deeper than this are rejected when decoding responses.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Errors that can occur while decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Request declares more arguments than allowed
    #[error("too many arguments: {count} (max: {max})")]
    TooManyArgs { count: usize, max: usize },

    /// Request or response exceeds the maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Unknown response value tag
    #[error("unknown value tag: {0:#04x}")]
    UnknownTag(u8),

    /// Error message is not valid UTF-8
    #[error("invalid UTF-8 in error message")]
    InvalidUtf8,

    /// A value ends before its declared payload
    #[error("truncated value")]
    Truncated,

    /// Response arrays nest too deeply
    #[error("nesting deeper than {0} levels")]
    TooDeep(usize),

    /// A frame's value does not use exactly the declared length
    #[error("frame declares {declared} bytes but the value uses {used}")]
    Trailing { declared: usize, used: usize },
}

/// Result type for decoding operations.
pub type ParseResult<T> = Result<T, ParseError>;

#[inline]
fn read_u32(buf: &[u8], pos: usize) -> Option<u32> {
    let bytes = buf.get(pos..pos + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Decodes one request from the front of `buf`. `max_size` bounds the
/// whole request, headers included.
pub fn parse_request(buf: &[u8], max_size: usize) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
    let Some(argc) = read_u32(buf, 0) else {
        return Ok(None);
    };
    let argc = argc as usize;
    if argc > MAX_ARGS {
        return Err(ParseError::TooManyArgs {
            count: argc,
            max: MAX_ARGS,
        });
    }

    // Walk the headers first; nothing is copied until the request is whole.
    let mut spans = Vec::with_capacity(argc);
    let mut pos = 4;
    for _ in 0..argc {
        let header_end = pos + 4;
        if header_end > max_size {
            return Err(ParseError::MessageTooLarge {
                size: header_end,
                max: max_size,
            });
        }
        let Some(len) = read_u32(buf, pos) else {
            return Ok(None);
        };
        let end = header_end + len as usize;
        if end > max_size {
            return Err(ParseError::MessageTooLarge {
                size: end,
                max: max_size,
            });
        }
        if end > buf.len() {
            return Ok(None);
        }
        spans.push(header_end..end);
        pos = end;
    }

    let args = spans
        .into_iter()
        .map(|span| Bytes::copy_from_slice(&buf[span]))
        .collect();
    Ok(Some((args, pos)))
}

/// Encodes a request. Used by clients, tests and benchmarks.
pub fn encode_request<A: AsRef<[u8]>>(args: &[A]) -> Vec<u8> {
    let size = 4 + args.iter().map(|a| 4 + a.as_ref().len()).sum::<usize>();
    let mut buf = Vec::with_capacity(size);
    buf.extend_from_slice(&(args.len() as u32).to_le_bytes());
    for arg in args {
        let arg = arg.as_ref();
        buf.extend_from_slice(&(arg.len() as u32).to_le_bytes());
        buf.extend_from_slice(arg);
    }
    buf
}

/// Decodes one framed response from the front of `buf`.
pub fn parse_response(buf: &[u8]) -> ParseResult<Option<(Value, usize)>> {
    let Some(len) = read_u32(buf, 0) else {
        return Ok(None);
    };
    let len = len as usize;
    let Some(body) = buf.get(4..4 + len) else {
        return Ok(None);
    };
    let (value, used) = parse_value(body)?;
    if used != len {
        return Err(ParseError::Trailing {
            declared: len,
            used,
        });
    }
    Ok(Some((value, 4 + len)))
}

/// Decodes one value from a complete response body. Returns the value and
/// the number of bytes it used.
pub fn parse_value(buf: &[u8]) -> ParseResult<(Value, usize)> {
    parse_value_at(buf, 0, 0)
}

fn parse_value_at(buf: &[u8], pos: usize, depth: usize) -> ParseResult<(Value, usize)> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ParseError::TooDeep(MAX_NESTING_DEPTH));
    }
    let &t = buf.get(pos).ok_or(ParseError::Truncated)?;
    let pos = pos + 1;

    match t {
        tag::NIL => Ok((Value::Nil, pos)),
        tag::ERROR | tag::STRING => {
            let len = read_u32(buf, pos).ok_or(ParseError::Truncated)? as usize;
            let start = pos + 4;
            let data = buf
                .get(start..start + len)
                .ok_or(ParseError::Truncated)?;
            let value = if t == tag::ERROR {
                let msg = std::str::from_utf8(data).map_err(|_| ParseError::InvalidUtf8)?;
                Value::Error(msg.to_owned())
            } else {
                Value::Str(Bytes::copy_from_slice(data))
            };
            Ok((value, start + len))
        }
        tag::INTEGER => {
            let data = buf.get(pos..pos + 8).ok_or(ParseError::Truncated)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(data);
            Ok((Value::Int(i64::from_le_bytes(raw)), pos + 8))
        }
        tag::ARRAY => {
            let count = read_u32(buf, pos).ok_or(ParseError::Truncated)? as usize;
            let mut pos = pos + 4;
            // Every element takes at least one byte.
            let mut values = Vec::with_capacity(count.min(buf.len().saturating_sub(pos)));
            for _ in 0..count {
                let (value, next) = parse_value_at(buf, pos, depth + 1)?;
                values.push(value);
                pos = next;
            }
            Ok((Value::Array(values), pos))
        }
        other => Err(ParseError::UnknownTag(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::writer::ResponseWriter;
    use bytes::BytesMut;

    const MAX: usize = 4 + MAX_MSG_SIZE;

    #[test]
    fn test_parse_request() {
        let buf = encode_request(&["set", "name", "Ariz"]);
        let (args, consumed) = parse_request(&buf, MAX).unwrap().unwrap();
        assert_eq!(args, vec!["set", "name", "Ariz"]);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn test_parse_request_incomplete() {
        let buf = encode_request(&["get", "key"]);
        for cut in 0..buf.len() {
            assert_eq!(parse_request(&buf[..cut], MAX), Ok(None), "cut at {cut}");
        }
    }

    #[test]
    fn test_parse_request_leaves_pipelined_data() {
        let mut buf = encode_request(&["keys"]);
        let first = buf.len();
        buf.extend_from_slice(&encode_request(&["get", "a"]));

        let (args, consumed) = parse_request(&buf, MAX).unwrap().unwrap();
        assert_eq!(args, vec!["keys"]);
        assert_eq!(consumed, first);

        let (args, _) = parse_request(&buf[consumed..], MAX).unwrap().unwrap();
        assert_eq!(args, vec!["get", "a"]);
    }

    #[test]
    fn test_parse_empty_request() {
        let buf = encode_request::<&str>(&[]);
        assert_eq!(parse_request(&buf, MAX), Ok(Some((vec![], 4))));
    }

    #[test]
    fn test_binary_safe_arguments() {
        let key: &[u8] = b"k\x00\xff\r\n";
        let buf = encode_request(&[&b"get"[..], key]);
        let (args, _) = parse_request(&buf, MAX).unwrap().unwrap();
        assert_eq!(&args[1][..], key);
    }

    #[test]
    fn test_too_many_args() {
        let buf = ((MAX_ARGS + 1) as u32).to_le_bytes();
        assert_eq!(
            parse_request(&buf, MAX),
            Err(ParseError::TooManyArgs {
                count: MAX_ARGS + 1,
                max: MAX_ARGS
            })
        );
    }

    #[test]
    fn test_oversized_argument_rejected_from_header() {
        // Only the headers have arrived; the declared length alone is enough.
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&5000u32.to_le_bytes());
        assert_eq!(
            parse_request(&buf, MAX),
            Err(ParseError::MessageTooLarge {
                size: 5008,
                max: MAX
            })
        );
    }

    #[test]
    fn test_request_filling_buffer_exactly_is_accepted() {
        let arg = vec![b'x'; MAX - 8];
        let buf = encode_request(&[arg]);
        assert_eq!(buf.len(), MAX);
        assert!(parse_request(&buf, MAX).unwrap().is_some());
    }

    #[test]
    fn test_parse_response_from_writer() {
        let mut buf = BytesMut::new();
        let mut w = ResponseWriter::begin(&mut buf);
        let mark = w.begin_array();
        let pair = w.begin_array();
        w.string(b"m2");
        w.integer(3);
        w.end_array(pair, 2);
        w.end_array(mark, 1);
        w.finish();

        let (value, consumed) = parse_response(&buf).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(
            value,
            Value::array(vec![Value::array(vec![
                Value::string(&b"m2"[..]),
                Value::integer(3)
            ])])
        );
    }

    #[test]
    fn test_parse_response_incomplete() {
        let mut buf = BytesMut::new();
        let mut w = ResponseWriter::begin(&mut buf);
        w.error("Not found");
        w.finish();
        for cut in 0..buf.len() {
            assert_eq!(parse_response(&buf[..cut]), Ok(None));
        }
        assert_eq!(
            parse_response(&buf).unwrap().unwrap().0,
            Value::error("Not found")
        );
    }

    #[test]
    fn test_parse_value_errors() {
        assert_eq!(parse_value(&[9]), Err(ParseError::UnknownTag(9)));
        assert_eq!(parse_value(&[3, 1, 2]), Err(ParseError::Truncated));
        assert_eq!(
            parse_value(&[1, 1, 0, 0, 0, 0xff]),
            Err(ParseError::InvalidUtf8)
        );
        // Array claims two elements but holds one
        assert_eq!(parse_value(&[4, 2, 0, 0, 0, 0]), Err(ParseError::Truncated));
    }

    #[test]
    fn test_parse_response_trailing_bytes() {
        // Frame says 2 bytes but a nil only uses 1
        let buf = [2, 0, 0, 0, 0, 0];
        assert_eq!(
            parse_response(&buf),
            Err(ParseError::Trailing {
                declared: 2,
                used: 1
            })
        );
    }

    #[test]
    fn test_nesting_limit() {
        let mut buf = Vec::new();
        for _ in 0..=MAX_NESTING_DEPTH + 1 {
            buf.extend_from_slice(&[4, 1, 0, 0, 0]);
        }
        buf.push(0);
        assert_eq!(
            parse_value(&buf),
            Err(ParseError::TooDeep(MAX_NESTING_DEPTH))
        );
    }
}
