//! RESP2 protocol encoder and decoder.
//!
//! Implements the Redis Serialization Protocol (RESP2) wire format used to
//! talk to source and destination nodes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;

use crate::error::{Error, Result};
use crate::types::Value;

/// Encode a command as a RESP2 array of bulk strings.
///
/// # Example wire format
/// ```text
/// *3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n
/// ```
pub fn encode_command(args: &[Bytes], buf: &mut BytesMut) {
    buf.put_u8(b'*');
    buf.put_slice(args.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");

    for arg in args {
        buf.put_u8(b'$');
        buf.put_slice(arg.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(arg);
        buf.put_slice(b"\r\n");
    }
}

/// Attempt to decode a RESP2 value from the buffer.
///
/// Returns `Ok(Some(value))` if a complete frame was parsed and consumed,
/// `Ok(None)` if more data is needed, or `Err` if the data is malformed.
/// Error replies decode to [`Value::Error`] so one failed command in a
/// pipeline does not desynchronise the replies that follow it.
pub fn decode_value(buf: &mut BytesMut) -> Result<Option<Value>> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut cursor = Cursor::new(&buf[..]);

    match check_complete(&mut cursor) {
        Ok(len) => {
            cursor.set_position(0);
            let value = parse_value(&mut cursor)?;
            buf.advance(len);
            Ok(Some(value))
        }
        Err(Error::Protocol(ref s)) if s == "incomplete" => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if a complete frame is available, returning its byte length.
fn check_complete(cursor: &mut Cursor<&[u8]>) -> Result<usize> {
    match peek_byte(cursor)? {
        b'+' | b'-' | b':' => {
            find_line(cursor)?;
            Ok(cursor.position() as usize)
        }
        b'$' => {
            cursor.advance(1);
            let len = read_decimal(cursor)?;
            if len == -1 {
                Ok(cursor.position() as usize)
            } else if len < -1 {
                Err(Error::Protocol("negative bulk string length".into()))
            } else {
                let total = cursor.position() as usize + len as usize + 2;
                if cursor.get_ref().len() < total {
                    Err(incomplete())
                } else {
                    cursor.set_position(total as u64);
                    Ok(total)
                }
            }
        }
        b'*' => {
            cursor.advance(1);
            let count = read_decimal(cursor)?;
            if count == -1 {
                Ok(cursor.position() as usize)
            } else if count < -1 {
                Err(Error::Protocol("negative array length".into()))
            } else {
                for _ in 0..count {
                    check_complete(cursor)?;
                }
                Ok(cursor.position() as usize)
            }
        }
        byte => Err(Error::Protocol(format!("unexpected byte: 0x{:02x}", byte))),
    }
}

/// Parse a RESP value from the cursor (assumes complete data).
fn parse_value(cursor: &mut Cursor<&[u8]>) -> Result<Value> {
    match get_byte(cursor)? {
        b'+' => Ok(Value::Status(read_text(cursor)?)),
        b'-' => Ok(Value::Error(read_text(cursor)?)),
        b':' => Ok(Value::Integer(read_decimal(cursor)?)),
        b'$' => {
            let len = read_decimal(cursor)?;
            if len == -1 {
                Ok(Value::Nil)
            } else {
                let data = read_bytes(cursor, len as usize)?;
                let val = Bytes::copy_from_slice(data);
                skip_crlf(cursor)?;
                Ok(Value::String(val))
            }
        }
        b'*' => {
            let count = read_decimal(cursor)?;
            if count == -1 {
                Ok(Value::Nil)
            } else {
                let count = count as usize;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(parse_value(cursor)?);
                }
                Ok(Value::Array(values))
            }
        }
        byte => Err(Error::Protocol(format!("unexpected byte: 0x{:02x}", byte))),
    }
}

// ── Low-level cursor helpers ────────────────────────────────────────────────

fn incomplete() -> Error {
    Error::Protocol("incomplete".into())
}

fn peek_byte(cursor: &Cursor<&[u8]>) -> Result<u8> {
    let pos = cursor.position() as usize;
    cursor.get_ref().get(pos).copied().ok_or_else(incomplete)
}

fn get_byte(cursor: &mut Cursor<&[u8]>) -> Result<u8> {
    let byte = peek_byte(cursor)?;
    cursor.advance(1);
    Ok(byte)
}

fn find_line(cursor: &mut Cursor<&[u8]>) -> Result<()> {
    read_line(cursor).map(|_| ())
}

fn read_line<'a>(cursor: &mut Cursor<&'a [u8]>) -> Result<&'a [u8]> {
    let start = cursor.position() as usize;
    let buf: &'a [u8] = *cursor.get_ref();
    for i in start..buf.len().saturating_sub(1) {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            cursor.set_position((i + 2) as u64);
            return Ok(&buf[start..i]);
        }
    }
    Err(incomplete())
}

fn read_text(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let line = read_line(cursor)?;
    String::from_utf8(line.to_vec()).map_err(|e| Error::Protocol(format!("invalid UTF-8: {}", e)))
}

fn read_decimal(cursor: &mut Cursor<&[u8]>) -> Result<i64> {
    let line = read_line(cursor)?;
    let s = std::str::from_utf8(line)
        .map_err(|_| Error::Protocol("invalid UTF-8 in integer".into()))?;
    s.parse::<i64>()
        .map_err(|_| Error::Protocol(format!("invalid integer: {}", s)))
}

fn read_bytes<'a>(cursor: &mut Cursor<&'a [u8]>, n: usize) -> Result<&'a [u8]> {
    let start = cursor.position() as usize;
    let buf: &'a [u8] = *cursor.get_ref();
    if start + n > buf.len() {
        return Err(incomplete());
    }
    cursor.set_position((start + n) as u64);
    Ok(&buf[start..start + n])
}

fn skip_crlf(cursor: &mut Cursor<&[u8]>) -> Result<()> {
    let pos = cursor.position() as usize;
    let buf = cursor.get_ref();
    if pos + 2 > buf.len() {
        return Err(incomplete());
    }
    if buf[pos] != b'\r' || buf[pos + 1] != b'\n' {
        return Err(Error::Protocol("expected CRLF".into()));
    }
    cursor.advance(2);
    Ok(())
}
