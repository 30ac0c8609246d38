//! Token Transport.
//!
//! Frames and deframes length-prefixed tokens on any byte-duplex stream.
//! This is the lowest layer of the protocol: it knows nothing about
//! security contexts, commands, or replies, only about moving an opaque
//! `flags` byte plus a payload across a [`Read`]/[`Write`] pair with robust
//! partial-I/O handling.
//!
//! ## Wire format
//!
//! ```text
//! flags:u8  length:u32 (big-endian)  payload[length]
//! ```
//!
//! No padding, no trailer. `length` is always transmitted as exactly four
//! bytes regardless of the host's word size.

use std::io::{ErrorKind, Read, Write};

use crate::error::TokenError;

/// No-op; used on the first handshake token.
pub const NOOP: u8 = 0x01;
/// The next token continues context establishment.
pub const CONTEXT_NEXT: u8 = 0x02;
/// This token carries a context-establishment blob.
pub const CONTEXT: u8 = 0x04;
/// This token carries an application message.
pub const DATA: u8 = 0x08;
/// Speaker supports protocol v2.
pub const PROTOCOL: u8 = 0x40;

/// Token cap used during handshake, before a protocol version and message
/// cap have been negotiated.
pub const HANDSHAKE_TOKEN_MAX: u32 = 64 * 1024;

/// Default cap on application tokens once a session is established.
pub const DEFAULT_MESSAGE_TOKEN_MAX: u32 = 1024 * 1024;

/// Writes `buf` to `writer` in full, retrying on [`ErrorKind::Interrupted`]
/// and treating any other error or a zero-length write as fatal.
fn write_full<W: Write>(writer: &mut W, buf: &[u8]) -> Result<(), TokenError> {
  let mut sent = 0;
  while sent < buf.len() {
    match writer.write(&buf[sent..]) {
      Ok(0) => {
        return Err(TokenError::Io(std::io::Error::new(
          ErrorKind::WriteZero,
          "write returned zero bytes",
        )))
      }
      Ok(n) => sent += n,
      Err(e) if e.kind() == ErrorKind::Interrupted => continue,
      Err(e) => return Err(TokenError::Io(e)),
    }
  }
  Ok(())
}

/// Reads exactly `buf.len()` bytes from `reader`, retrying on
/// [`ErrorKind::Interrupted`]. A zero-length read before `buf` is full is a
/// protocol failure ([`TokenError::Eof`]), not a clean close.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), TokenError> {
  let mut filled = 0;
  while filled < buf.len() {
    match reader.read(&mut buf[filled..]) {
      Ok(0) => return Err(TokenError::Eof),
      Ok(n) => filled += n,
      Err(e) if e.kind() == ErrorKind::Interrupted => continue,
      Err(e) => return Err(TokenError::Io(e)),
    }
  }
  Ok(())
}

/// Sends a token: `flags`, the big-endian length of `payload`, then
/// `payload` itself. Loops internally over short writes.
pub fn send_token<W: Write>(writer: &mut W, flags: u8, payload: &[u8]) -> Result<(), TokenError> {
  let mut header = [0u8; 5];
  header[0] = flags;
  header[1..5].copy_from_slice(&(payload.len() as u32).to_be_bytes());
  write_full(writer, &header)?;
  write_full(writer, payload)?;
  tracing::trace!(flags, len = payload.len(), "send_token");
  Ok(())
}

/// Receives a token, validating that its declared length does not exceed
/// `max_len`. Loops internally over short reads.
pub fn recv_token<R: Read>(reader: &mut R, max_len: u32) -> Result<(u8, Vec<u8>), TokenError> {
  let mut header = [0u8; 5];
  read_full(reader, &mut header)?;
  let flags = header[0];
  let length = u32::from_be_bytes(header[1..5].try_into().unwrap());
  if length > max_len {
    return Err(TokenError::Oversize { length, max: max_len });
  }
  let mut payload = vec![0u8; length as usize];
  read_full(reader, &mut payload)?;
  tracing::trace!(flags, len = payload.len(), "recv_token");
  Ok((flags, payload))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  #[test]
  fn round_trip() {
    let mut buf = Vec::new();
    send_token(&mut buf, DATA, b"hello").unwrap();
    let (flags, payload) = recv_token(&mut Cursor::new(buf), 1024).unwrap();
    assert_eq!(flags, DATA);
    assert_eq!(payload, b"hello");
  }

  #[test]
  fn empty_payload_round_trips() {
    let mut buf = Vec::new();
    send_token(&mut buf, NOOP | CONTEXT_NEXT, &[]).unwrap();
    let (flags, payload) = recv_token(&mut Cursor::new(buf), 64).unwrap();
    assert_eq!(flags, NOOP | CONTEXT_NEXT);
    assert!(payload.is_empty());
  }

  #[test]
  fn payload_at_cap_is_accepted() {
    let payload = vec![0u8; 16];
    let mut buf = Vec::new();
    send_token(&mut buf, DATA, &payload).unwrap();
    let (_, received) = recv_token(&mut Cursor::new(buf), 16).unwrap();
    assert_eq!(received, payload);
  }

  #[test]
  fn payload_over_cap_is_rejected() {
    let payload = vec![0u8; 17];
    let mut buf = Vec::new();
    send_token(&mut buf, DATA, &payload).unwrap();
    let err = recv_token(&mut Cursor::new(buf), 16).unwrap_err();
    assert!(matches!(
      err,
      TokenError::Oversize { length: 17, max: 16 }
    ));
  }

  #[test]
  fn truncated_frame_is_eof() {
    let mut buf = Vec::new();
    send_token(&mut buf, DATA, b"hello").unwrap();
    buf.truncate(buf.len() - 2);
    let err = recv_token(&mut Cursor::new(buf), 1024).unwrap_err();
    assert!(matches!(err, TokenError::Eof));
  }

  /// A reader that returns `Interrupted` once before yielding real data,
  /// simulating an EINTR-interrupted `read(2)`.
  struct FlakyReader {
    interrupted: bool,
    inner: Cursor<Vec<u8>>,
  }

  impl Read for FlakyReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
      if !self.interrupted {
        self.interrupted = true;
        return Err(std::io::Error::new(ErrorKind::Interrupted, "eintr"));
      }
      self.inner.read(buf)
    }
  }

  #[test]
  fn interrupted_read_is_retried_transparently() {
    let mut buf = Vec::new();
    send_token(&mut buf, DATA, b"hi").unwrap();
    let mut reader = FlakyReader {
      interrupted: false,
      inner: Cursor::new(buf),
    };
    let (flags, payload) = recv_token(&mut reader, 1024).unwrap();
    assert_eq!(flags, DATA);
    assert_eq!(payload, b"hi");
  }

  struct FlakyWriter {
    interrupted: bool,
    inner: Vec<u8>,
  }

  impl Write for FlakyWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
      if !self.interrupted {
        self.interrupted = true;
        return Err(std::io::Error::new(ErrorKind::Interrupted, "eintr"));
      }
      self.inner.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
      self.inner.flush()
    }
  }

  #[test]
  fn interrupted_write_is_retried_transparently() {
    let mut writer = FlakyWriter {
      interrupted: false,
      inner: Vec::new(),
    };
    send_token(&mut writer, DATA, b"hi").unwrap();
    let (flags, payload) = recv_token(&mut Cursor::new(writer.inner), 1024).unwrap();
    assert_eq!(flags, DATA);
    assert_eq!(payload, b"hi");
  }
}
