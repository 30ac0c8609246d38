//! The client-visible error taxonomy (§7 of the protocol description this
//! crate implements): `Network`, `TokenFraming`, `Security`, `Protocol`,
//! `Usage`, and `ResourceExhaustion`. A server-reported failure is
//! never one of these — see [`crate::OutputEvent::Error`] — it is a normal
//! reply event, not a library failure.

use remctl_protocol::{TokenError, WireError};
use thiserror::Error;

/// Everything a [`crate::Client`] operation can fail with.
#[derive(Debug, Error)]
pub enum ClientError {
  /// Connect, DNS, or read/write failure on the underlying socket.
  #[error("network error: {0}")]
  Network(#[source] std::io::Error),

  /// Short read, premature EOF, or an oversize length in the token
  /// framing layer.
  #[error("token framing error: {0}")]
  TokenFraming(String),

  /// Context establishment failure, a wrap/unwrap failure, a reply that
  /// claimed confidentiality was not in fact applied, or granted flags
  /// that did not meet what v2 requires.
  #[error("security error: {0}")]
  Security(String),

  /// Unknown message type, a malformed message, a length that overruns
  /// its token's payload, or a protocol-version mismatch.
  #[error("protocol error: {0}")]
  Protocol(String),

  /// The caller used the API incorrectly: sent without an open
  /// connection, sent while a previous reply was still draining, sent a
  /// second command before draining the first, or used `finished=false`
  /// on a v1 session.
  #[error("usage error: {0}")]
  Usage(String),

  /// A buffer allocation failed.
  #[error("resource exhaustion: {0}")]
  ResourceExhaustion(String),
}

impl From<TokenError> for ClientError {
  fn from(err: TokenError) -> Self {
    match err {
      TokenError::Io(io_err) => ClientError::Network(io_err),
      other => ClientError::TokenFraming(other.to_string()),
    }
  }
}

impl From<WireError> for ClientError {
  fn from(err: WireError) -> Self {
    ClientError::Protocol(err.to_string())
  }
}
