//! Streaming RESP parser.
//!
//! Two layers: [`parse`] decodes one complete value from the front of a
//! buffer, returning `Err(Error::Incomplete)` when the data runs out
//! mid-value; [`Decoder`] sits on top and owns the continuation between
//! arbitrary byte fragments, making maximal progress on every feed and
//! retaining only the unconsumed prefix.
//!
//! Buffers are `Bytes` so bulk string payloads come out as zero-copy
//! `slice()`s of the read buffer.

use bytes::{Bytes, BytesMut};
use memchr::memchr;

use crate::error::{Error, Result};
use crate::resp::types::Value;

/// Parse one RESP value from the front of `buf`.
///
/// Returns `(value, bytes_consumed)` on success, `Err(Error::Incomplete)`
/// when `buf` ends before the value does. A line is only taken once its
/// terminating CRLF is visible; bulk payloads are taken by declared length,
/// so embedded CRLFs pass through untouched.
pub fn parse(buf: &Bytes) -> Result<(Value, usize)> {
    if buf.is_empty() {
        return Err(Error::Incomplete);
    }
    match buf[0] {
        b'+' => {
            let (line, next) = take_line(buf, 1)?;
            Ok((Value::SimpleString(line_to_string(line)?), next))
        }
        b'-' => {
            let (line, next) = take_line(buf, 1)?;
            Ok((Value::Error(line_to_string(line)?), next))
        }
        b':' => {
            let (line, next) = take_line(buf, 1)?;
            Ok((Value::Integer(decode_int(line)?), next))
        }
        b'$' => parse_bulk(buf),
        b'*' => parse_array(buf),
        other => Err(Error::Protocol(format!(
            "unknown RESP tag byte: 0x{other:02x}"
        ))),
    }
}

/// `$<len>\r\n<payload>\r\n`, or `$-1\r\n` for the null bulk.
fn parse_bulk(buf: &Bytes) -> Result<(Value, usize)> {
    let (line, next) = take_line(buf, 1)?;
    let len = decode_int(line)?;
    if len < 0 {
        return Ok((Value::Nil, next));
    }
    let len = len as usize;
    let end = next + len;
    if buf.len() < end + 2 {
        return Err(Error::Incomplete);
    }
    if &buf[end..end + 2] != b"\r\n" {
        return Err(Error::Protocol("bulk payload not CRLF-terminated".into()));
    }
    Ok((Value::BulkString(buf.slice(next..end)), end + 2))
}

/// `*<count>\r\n<elements>…`, or `*-1\r\n` for the null array.
fn parse_array(buf: &Bytes) -> Result<(Value, usize)> {
    let (line, mut next) = take_line(buf, 1)?;
    let count = decode_int(line)?;
    if count < 0 {
        return Ok((Value::NilArray, next));
    }
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (item, used) = parse(&buf.slice(next..))?;
        items.push(item);
        next += used;
    }
    Ok((Value::Array(items), next))
}

// ── Line helpers ───────────────────────────────────────────────────

/// The line starting at `buf[from]` up to (not including) CRLF, plus the
/// offset just past the CRLF.
#[inline]
fn take_line(buf: &[u8], from: usize) -> Result<(&[u8], usize)> {
    let mut search = from;
    loop {
        let Some(pos) = memchr(b'\r', &buf[search..]) else {
            return Err(Error::Incomplete);
        };
        let cr = search + pos;
        match buf.get(cr + 1) {
            Some(b'\n') => return Ok((&buf[from..cr], cr + 2)),
            // Stray CR inside a line; keep scanning.
            Some(_) => search = cr + 1,
            None => return Err(Error::Incomplete),
        }
    }
}

fn line_to_string(line: &[u8]) -> Result<String> {
    String::from_utf8(line.to_vec())
        .map_err(|e| Error::Protocol(format!("invalid UTF-8 in status line: {e}")))
}

/// Decode a signed decimal from a header line without allocating.
///
/// Accumulates negatively so `i64::MIN` round-trips: its magnitude does not
/// fit a positive i64, but every digit subtraction fits a negative one.
fn decode_int(line: &[u8]) -> Result<i64> {
    let (negative, digits) = match line.first() {
        Some(b'-') => (true, &line[1..]),
        _ => (false, line),
    };
    if digits.is_empty() {
        return Err(Error::Protocol("integer line has no digits".into()));
    }
    let mut acc: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(Error::Protocol(format!(
                "invalid byte in integer line: 0x{b:02x}"
            )));
        }
        acc = acc
            .checked_mul(10)
            .and_then(|n| n.checked_sub(i64::from(b - b'0')))
            .ok_or_else(|| Error::Protocol("integer overflows i64".into()))?;
    }
    Ok(if negative { acc } else { -acc })
}

// ── Decoder ────────────────────────────────────────────────────────

/// Incremental decoder over arbitrary byte fragments.
///
/// [`feed`](Decoder::feed) appends a fragment; [`try_next`](Decoder::try_next)
/// yields complete values until the remainder is insufficient, at which point
/// the remainder (the smallest continuation) is retained for the next feed.
/// Feeding an empty fragment leaves the state untouched.
#[derive(Debug, Default)]
pub struct Decoder {
    buf: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an inbound fragment.
    pub fn feed(&mut self, fragment: &[u8]) {
        self.buf.extend_from_slice(fragment);
    }

    /// Decode the next complete value, if the buffered bytes hold one.
    ///
    /// `Ok(None)` means more data is needed. Protocol errors are returned
    /// with the buffer left as-is; the stream cannot be resynchronized after
    /// one, so callers treat them as fatal for the connection.
    pub fn try_next(&mut self) -> Result<Option<Value>> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        // Freeze for zero-copy slicing; only the unconsumed tail is copied
        // back. On Incomplete the buffer is a partial frame, typically small.
        let snapshot = self.buf.split().freeze();
        match parse(&snapshot) {
            Ok((value, consumed)) => {
                if consumed < snapshot.len() {
                    self.buf.extend_from_slice(&snapshot[consumed..]);
                }
                Ok(Some(value))
            }
            Err(Error::Incomplete) => {
                self.buf.extend_from_slice(&snapshot);
                Ok(None)
            }
            Err(e) => {
                self.buf.extend_from_slice(&snapshot);
                Err(e)
            }
        }
    }

    /// True when no partial value is buffered.
    pub fn is_idle(&self) -> bool {
        self.buf.is_empty()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
