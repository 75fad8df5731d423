//! Wire Value Types
//!
//! Responses are framed as `u32 total_length` followed by one
//! self-describing value. Every value starts with a tag byte:
//!
//! | tag | value   | payload                               |
//! |-----|---------|---------------------------------------|
//! | 0   | Nil     | none                                  |
//! | 1   | Error   | `u32 len` + message bytes             |
//! | 2   | String  | `u32 len` + raw bytes                 |
//! | 3   | Integer | 8-byte signed                         |
//! | 4   | Array   | `u32 count` + `count` nested values   |
//!
//! All integers are little-endian with no padding.
//!
//! ## Example
//!
//! `Integer(1)` is the nine bytes `03 01 00 00 00 00 00 00 00`; framed for
//! the wire it becomes `09 00 00 00 03 01 00 00 00 00 00 00 00`.

use bytes::{BufMut, Bytes};
use std::fmt;

/// Response value tags.
pub mod tag {
    pub const NIL: u8 = 0;
    pub const ERROR: u8 = 1;
    pub const STRING: u8 = 2;
    pub const INTEGER: u8 = 3;
    pub const ARRAY: u8 = 4;
}

/// A decoded response value.
///
/// The server writes responses straight into the connection buffer with a
/// [`ResponseWriter`](super::ResponseWriter); this type is what clients and
/// tests decode them into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// No value (e.g. an absent sorted-set member).
    Nil,

    /// A command-level failure. The connection stays usable.
    Error(String),

    /// Binary-safe string.
    Str(Bytes),

    /// 64-bit signed integer.
    Int(i64),

    /// Ordered list of nested values.
    Array(Vec<Value>),
}

impl Value {
    pub fn error(msg: impl Into<String>) -> Self {
        Value::Error(msg.into())
    }

    pub fn string(data: impl Into<Bytes>) -> Self {
        Value::Str(data.into())
    }

    pub fn integer(n: i64) -> Self {
        Value::Int(n)
    }

    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(values)
    }

    /// Encodes the value body (no frame length).
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Encodes the value body into an existing buffer.
    pub fn serialize_into<B: BufMut>(&self, buf: &mut B) {
        match self {
            Value::Nil => buf.put_u8(tag::NIL),
            Value::Error(msg) => {
                buf.put_u8(tag::ERROR);
                buf.put_u32_le(msg.len() as u32);
                buf.put_slice(msg.as_bytes());
            }
            Value::Str(data) => {
                buf.put_u8(tag::STRING);
                buf.put_u32_le(data.len() as u32);
                buf.put_slice(data);
            }
            Value::Int(n) => {
                buf.put_u8(tag::INTEGER);
                buf.put_i64_le(*n);
            }
            Value::Array(values) => {
                buf.put_u8(tag::ARRAY);
                buf.put_u32_le(values.len() as u32);
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Attempts to extract the inner bytes from a String.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Str(b) => Some(b),
            _ => None,
        }
    }

    /// Attempts to read a String as UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "(nil)"),
            Value::Error(msg) => write!(f, "(err) {}", msg),
            Value::Int(n) => write!(f, "(int) {}", n),
            Value::Str(data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    write!(f, "(str) {}", s)
                } else {
                    write!(f, "(str) <{} bytes>", data.len())
                }
            }
            Value::Array(values) => {
                writeln!(f, "(arr) len={}", values.len())?;
                for v in values {
                    writeln!(f, "{}", v)?;
                }
                write!(f, "(arr) end")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_serialize() {
        assert_eq!(Value::Nil.serialize(), [0]);
    }

    #[test]
    fn test_error_serialize() {
        let value = Value::error("Not found");
        let mut expected = vec![1, 9, 0, 0, 0];
        expected.extend_from_slice(b"Not found");
        assert_eq!(value.serialize(), expected);
    }

    #[test]
    fn test_integer_serialize() {
        assert_eq!(Value::integer(1).serialize(), [3, 1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            Value::integer(-2).serialize(),
            [3, 0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_string_serialize() {
        let value = Value::string(Bytes::from("hi"));
        assert_eq!(value.serialize(), [2, 2, 0, 0, 0, b'h', b'i']);
    }

    #[test]
    fn test_nested_array_serialize() {
        let value = Value::array(vec![
            Value::string(Bytes::from("m")),
            Value::array(vec![Value::integer(5), Value::Nil]),
        ]);
        let expected = [
            4, 2, 0, 0, 0, // outer array, 2 elements
            2, 1, 0, 0, 0, b'm', // "m"
            4, 2, 0, 0, 0, // inner array, 2 elements
            3, 5, 0, 0, 0, 0, 0, 0, 0, // 5
            0, // nil
        ];
        assert_eq!(value.serialize(), expected);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Nil.to_string(), "(nil)");
        assert_eq!(Value::error("Not found").to_string(), "(err) Not found");
        assert_eq!(Value::integer(3).to_string(), "(int) 3");
        assert_eq!(Value::string(Bytes::from("a")).to_string(), "(str) a");
        assert_eq!(
            Value::array(vec![Value::integer(1)]).to_string(),
            "(arr) len=1\n(int) 1\n(arr) end"
        );
    }
}
