//! RESP reply values.

use bytes::Bytes;

/// A single decoded RESP value.
///
/// Null bulk strings (`$-1`) and null arrays (`*-1`) are kept as distinct
/// variants: callers such as the sentinel resolver need to tell "key absent"
/// apart from "no such element set".
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `+OK\r\n`
    SimpleString(String),
    /// `-ERR message\r\n`
    Error(String),
    /// `:1000\r\n`
    Integer(i64),
    /// `$6\r\nfoobar\r\n` (binary safe, zero-copy slice of the read buffer)
    BulkString(Bytes),
    /// `$-1\r\n`
    Nil,
    /// `*2\r\n…` (elements recurse)
    Array(Vec<Value>),
    /// `*-1\r\n`
    NilArray,
}

impl Value {
    /// Interpret this value as a UTF-8 string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::SimpleString(s) => Some(s),
            Self::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Interpret this value as raw bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::SimpleString(s) => Some(s.as_bytes()),
            Self::BulkString(b) => Some(b),
            _ => None,
        }
    }

    /// Interpret this value as a signed integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Unwrap an array, consuming self.
    pub fn into_array(self) -> Option<Vec<Value>> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// True for both null forms.
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil | Self::NilArray)
    }

    /// True when the server answered with an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The error payload, if this is an error reply.
    pub fn as_error_msg(&self) -> Option<&str> {
        match self {
            Self::Error(msg) => Some(msg),
            _ => None,
        }
    }

    /// Static tag name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SimpleString(_) => "simple_string",
            Self::Error(_) => "error",
            Self::Integer(_) => "integer",
            Self::BulkString(_) => "bulk_string",
            Self::Nil => "nil",
            Self::Array(_) => "array",
            Self::NilArray => "nil_array",
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
