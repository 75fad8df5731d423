//! Binary Protocol Implementation
//!
//! QuillKV speaks a small length-prefixed binary protocol over TCP.
//!
//! ## Overview
//!
//! A request is an array of byte strings: `u32 argc` and then, per argument,
//! `u32 len` followed by the raw bytes. A response is `u32 total_len`
//! followed by one tagged value (nil, error, string, integer or a nested
//! array). Everything is little-endian.
//!
//! ## Modules
//!
//! - `types`: the `Value` enum, value tags and serialization
//! - `writer`: `ResponseWriter`, which builds frames in place
//! - `parser`: request decoding, request encoding and response decoding
//!
//! ## Example
//!
//! ```
//! use quillkv::protocol::{encode_request, parse_request, parse_response, ResponseWriter, Value};
//! use bytes::BytesMut;
//!
//! // Parsing an incoming request
//! let data = encode_request(&["get", "name"]);
//! let (args, consumed) = parse_request(&data, 4096).unwrap().unwrap();
//! assert_eq!(args, vec!["get", "name"]);
//! assert_eq!(consumed, data.len());
//!
//! // Writing a response
//! let mut out = BytesMut::new();
//! let mut writer = ResponseWriter::begin(&mut out);
//! writer.string(b"Ariz");
//! writer.finish();
//! let (value, _) = parse_response(&out).unwrap().unwrap();
//! assert_eq!(value, Value::string("Ariz"));
//! ```

pub mod parser;
pub mod types;
pub mod writer;

// Re-export commonly used types for convenience
pub use parser::{
    encode_request, parse_request, parse_response, parse_value, ParseError, ParseResult, MAX_ARGS,
    MAX_MSG_SIZE,
};
pub use types::Value;
pub use writer::{ResponseWriter, MAX_RESPONSE_SIZE};
