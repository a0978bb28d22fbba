//! RESP request encoder.
//!
//! The clients consume already-encoded buffers, but the handshake (AUTH,
//! SELECT), the sentinel query, the subscriber's SUBSCRIBE traffic and the
//! test suite all need the multi-bulk form:
//! `*<N>\r\n$<len>\r\narg…\r\n`.

use itoa::Buffer;

/// Append one binary-safe bulk string (`$<len>\r\n<data>\r\n`).
#[inline]
fn put_bulk(buf: &mut Vec<u8>, digits: &mut Buffer, arg: &[u8]) {
    buf.push(b'$');
    buf.extend_from_slice(digits.format(arg.len()).as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(arg);
    buf.extend_from_slice(b"\r\n");
}

fn put_command(buf: &mut Vec<u8>, digits: &mut Buffer, args: &[&[u8]]) {
    buf.push(b'*');
    buf.extend_from_slice(digits.format(args.len()).as_bytes());
    buf.extend_from_slice(b"\r\n");
    for arg in args {
        put_bulk(buf, digits, arg);
    }
}

fn command_wire_len(args: &[&[u8]]) -> usize {
    // Tag + up to 20 length digits + CRLF per header, payload + CRLF per arg.
    let mut cap = 1 + 20 + 2;
    for arg in args {
        cap += 1 + 20 + 2 + arg.len() + 2;
    }
    cap
}

/// Encode one command as a multi-bulk array.
pub fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(command_wire_len(args));
    let mut digits = Buffer::new();
    put_command(&mut buf, &mut digits, args);
    buf
}

/// [`encode_command`] over string arguments.
pub fn encode_command_str(args: &[&str]) -> Vec<u8> {
    let bytes: Vec<&[u8]> = args.iter().map(|s| s.as_bytes()).collect();
    encode_command(&bytes)
}

/// Encode several commands back to back, with no intervening bytes, for a
/// single pipelined write.
pub fn encode_pipeline(commands: &[Vec<Vec<u8>>]) -> Vec<u8> {
    let mut cap = 0;
    for cmd in commands {
        let refs: Vec<&[u8]> = cmd.iter().map(|a| a.as_slice()).collect();
        cap += command_wire_len(&refs);
    }
    let mut buf = Vec::with_capacity(cap);
    let mut digits = Buffer::new();
    for cmd in commands {
        let refs: Vec<&[u8]> = cmd.iter().map(|a| a.as_slice()).collect();
        put_command(&mut buf, &mut digits, &refs);
    }
    buf
}

/// Encode an inline command (`COMMAND args\r\n`). Used for `SELECT <db>`.
pub fn encode_inline(cmd: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(cmd.len() + 2);
    buf.extend_from_slice(cmd.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

/// Build a command from string-ish arguments.
///
/// ```ignore
/// let wire = cmd!("SET", "key", "value");
/// ```
#[macro_export]
macro_rules! cmd {
    ($($arg:expr),+ $(,)?) => {{
        $crate::resp::writer::encode_command_str(&[$($arg),+])
    }};
}

// ── Tests ──────────────────────────────────────────────────────────
