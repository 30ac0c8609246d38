use std::io;

use thiserror::Error;

/// ## TOKEN TRANSPORT ERROR
///
/// Failures surfaced by [`crate::token::send_token`] and
/// [`crate::token::recv_token`].
#[derive(Debug, Error)]
pub enum TokenError {
  /// The underlying stream returned an I/O error other than a transparently
  /// retried interruption.
  #[error("token I/O error: {0}")]
  Io(#[from] io::Error),

  /// A zero-byte read occurred before a frame was fully received. This is a
  /// protocol failure, not a clean close: nothing on the wire ever promises
  /// to end a connection between tokens.
  #[error("connection closed before a complete token was received")]
  Eof,

  /// The declared payload length exceeded the caller-supplied cap.
  #[error("token payload length {length} exceeds the {max} byte cap")]
  Oversize { length: u32, max: u32 },
}

/// ## WIRE MESSAGE ERROR
///
/// Failures decoding a v1 or v2 message body out of an already-framed,
/// already-unsealed token payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
  /// The payload ended before a fixed-size field could be read.
  #[error("message truncated")]
  Truncated,

  /// A length-prefixed field claims more bytes than remain in the payload.
  #[error("length field overruns the token payload")]
  LengthOverrun,

  /// The message-type byte did not match any known v2 message type.
  #[error("unknown message type {0}")]
  UnknownMessageType(u8),

  /// The message-version byte did not match the version this decoder
  /// understands.
  #[error("unsupported message version {0}")]
  VersionMismatch(u8),
}
