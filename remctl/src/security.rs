//! Security Channel.
//!
//! Drives context establishment with the server and, once established,
//! seals outgoing messages and unseals incoming ones. The cryptographic
//! mechanism itself is consumed through the [`SecurityMechanism`] trait; a
//! canonical binding is a Kerberos-based GSS-API mechanism keyed by a
//! service principal name, but this crate does not ship one — the
//! mechanism is an external collaborator, same as the server side or a
//! name-resolution layer. Production callers bring their own
//! `SecurityMechanism` implementation (typically wrapping a GSS-API
//! binding crate).

use std::io::{Read, Write};

use remctl_protocol::token::{self, CONTEXT, CONTEXT_NEXT, NOOP, PROTOCOL};
use remctl_protocol::{recv_token, send_token};

use crate::error::ClientError;
use crate::ProtocolVersion;

/// The four flags remctl requires of its security mechanism: mutual
/// authentication, replay detection, confidentiality, and integrity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MechanismFlags {
  pub mutual_authentication: bool,
  pub replay_detection: bool,
  pub confidentiality: bool,
  pub integrity: bool,
}

impl MechanismFlags {
  /// All four required flags are present.
  pub fn satisfies_required(&self) -> bool {
    self.mutual_authentication
      && self.replay_detection
      && self.confidentiality
      && self.integrity
  }
}

/// One round of [`SecurityMechanism::init_sec_context`].
pub struct InitSecContext<C> {
  /// The (possibly new) context handle to carry into the next round, or
  /// to use for sealing once `continue_needed` is false.
  pub context: C,
  /// A token to send to the server, if the mechanism produced one.
  pub output_token: Option<Vec<u8>>,
  /// Whether another round trip is required before the context is
  /// established.
  pub continue_needed: bool,
  /// The flags the mechanism has (so far) been granted.
  pub flags: MechanismFlags,
}

/// Abstract security mechanism consumed by the Security Channel (§6.2).
///
/// Modeled directly on a GSS-API-style handshake: `import_name` resolves a
/// principal string once, `init_sec_context` is called in a loop feeding
/// back each token received from the peer, and once established, `wrap`
/// and `unwrap` seal and unseal individual messages.
pub trait SecurityMechanism {
  /// An imported, mechanism-specific name.
  type Name;
  /// An established (or in-progress) security context.
  type Context;
  /// The mechanism's own error type.
  type Error: std::error::Error + Send + Sync + 'static;

  /// Resolves a principal string (e.g. `host/example.org@REALM`) into a
  /// mechanism-specific name.
  fn import_name(&self, principal: &str) -> Result<Self::Name, Self::Error>;

  /// Advances context establishment by one round. `context` is `None` on
  /// the first call; `input_token` is `None` on the first call and
  /// `Some` on every subsequent call, carrying the token most recently
  /// received from the peer.
  fn init_sec_context(
    &self,
    name: &Self::Name,
    context: Option<Self::Context>,
    input_token: Option<&[u8]>,
  ) -> Result<InitSecContext<Self::Context>, Self::Error>;

  /// Seals `plaintext` for transmission, requesting confidentiality.
  fn wrap(&self, context: &mut Self::Context, plaintext: &[u8]) -> Result<Vec<u8>, Self::Error>;

  /// Unseals `ciphertext`, reporting whether confidentiality was in fact
  /// applied by the peer.
  fn unwrap(
    &self,
    context: &mut Self::Context,
    ciphertext: &[u8],
  ) -> Result<(Vec<u8>, bool), Self::Error>;

  /// Releases a context. Called on any handshake failure and on session
  /// close.
  fn delete_context(&self, context: Self::Context);
}

fn security_error<E: std::error::Error>(doing: &str, err: E) -> ClientError {
  ClientError::Security(format!("{doing}: {err}"))
}

/// Drives the four-way handshake (§4.2): the initial `NOOP` token, the
/// `init_sec_context` loop, in-band v1/v2 version negotiation, and the
/// post-handshake flag check for v2.
///
/// On any failure, deletes any partially built context and leaves the
/// stream in whatever state the failed I/O left it; the caller is
/// responsible for closing the connection.
pub fn establish<M, S>(
  mechanism: &M,
  stream: &mut S,
  principal: &str,
) -> Result<(M::Context, ProtocolVersion), ClientError>
where
  M: SecurityMechanism,
  S: Read + Write,
{
  let name = mechanism
    .import_name(principal)
    .map_err(|e| security_error("importing name", e))?;

  send_token(stream, NOOP | CONTEXT_NEXT | PROTOCOL, &[])?;

  let mut protocol = ProtocolVersion::V2;
  let mut context: Option<M::Context> = None;
  let mut input_token: Option<Vec<u8>> = None;

  loop {
    let round = mechanism
      .init_sec_context(&name, context.take(), input_token.as_deref())
      .map_err(|e| security_error("initializing context", e))?;
    context = Some(round.context);

    if let Some(output_token) = &round.output_token {
      if !output_token.is_empty() {
        let mut flags = CONTEXT;
        if protocol == ProtocolVersion::V2 {
          flags |= PROTOCOL;
        }
        send_token(stream, flags, output_token)?;
      }
    }

    if !round.continue_needed {
      if protocol == ProtocolVersion::V2 && !round.flags.satisfies_required() {
        mechanism.delete_context(context.take().unwrap());
        return Err(ClientError::Security(
          "server did not grant required GSS-API flags".into(),
        ));
      }
      return Ok((context.unwrap(), protocol));
    }

    let (recv_flags, token) = match recv_token(stream, token::HANDSHAKE_TOKEN_MAX) {
      Ok(v) => v,
      Err(e) => {
        mechanism.delete_context(context.take().unwrap());
        return Err(e.into());
      }
    };
    if protocol == ProtocolVersion::V2 && recv_flags & PROTOCOL == 0 {
      protocol = ProtocolVersion::V1;
    }
    input_token = Some(token);
  }
}

/// Seals `plaintext` and sends it as a `DATA` token.
pub fn send_sealed<M, S>(
  mechanism: &M,
  context: &mut M::Context,
  stream: &mut S,
  plaintext: &[u8],
) -> Result<(), ClientError>
where
  M: SecurityMechanism,
  S: Write,
{
  let ciphertext = mechanism
    .wrap(context, plaintext)
    .map_err(|e| security_error("sealing message", e))?;
  send_token(stream, token::DATA, &ciphertext)?;
  Ok(())
}

/// Receives a token and unseals it, failing if the peer's reply was not in
/// fact confidential.
pub fn recv_sealed<M, S>(
  mechanism: &M,
  context: &mut M::Context,
  stream: &mut S,
  cap: u32,
) -> Result<Vec<u8>, ClientError>
where
  M: SecurityMechanism,
  S: Read,
{
  let (_flags, ciphertext) = recv_token(stream, cap)?;
  let (plaintext, confidential) = mechanism
    .unwrap(context, &ciphertext)
    .map_err(|e| security_error("unsealing message", e))?;
  if !confidential {
    return Err(ClientError::Security(
      "server reply was not confidentiality-protected".into(),
    ));
  }
  Ok(plaintext)
}


#[cfg(test)]
mod tests {
  use super::testing::{InsufficientFlagsMechanism, LoopbackMechanism, NoConfidentialityMechanism};
  use super::*;
  use std::io::Cursor;

  /// An in-memory duplex stream: reads come from `peer_to_us`, writes go
  /// to `us_to_peer`. Stands in for a `TcpStream` in tests.
  struct ByteDuplex {
    inbound: Cursor<Vec<u8>>,
    outbound: Vec<u8>,
  }

  impl Read for ByteDuplex {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
      self.inbound.read(buf)
    }
  }

  impl Write for ByteDuplex {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
      self.outbound.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
      Ok(())
    }
  }

  /// Builds the bytes a server would send in reply to the client's two
  /// handshake tokens: first an empty NOOP-ack carrying `PROTOCOL` (or
  /// not, per `grants_protocol`), then nothing further (the loopback
  /// mechanism completes after one round trip).
  fn server_handshake_reply(grants_protocol: bool) -> Vec<u8> {
    let mut flags = CONTEXT;
    if grants_protocol {
      flags |= PROTOCOL;
    }
    let mut buf = Vec::new();
    send_token(&mut buf, flags, b"loopback-reply").unwrap();
    buf
  }

  #[test]
  fn handshake_negotiates_v2_when_server_grants_protocol_and_flags() {
    let mut stream = ByteDuplex {
      inbound: Cursor::new(server_handshake_reply(true)),
      outbound: Vec::new(),
    };
    let mechanism = LoopbackMechanism {
      grant_v2_flags: true,
    };
    let (_context, protocol) = establish(&mechanism, &mut stream, "host/test@REALM").unwrap();
    assert_eq!(protocol, ProtocolVersion::V2);
  }

  #[test]
  fn handshake_downgrades_to_v1_when_server_omits_protocol_flag() {
    let mut stream = ByteDuplex {
      inbound: Cursor::new(server_handshake_reply(false)),
      outbound: Vec::new(),
    };
    let mechanism = LoopbackMechanism {
      grant_v2_flags: true,
    };
    let (_context, protocol) = establish(&mechanism, &mut stream, "host/test@REALM").unwrap();
    assert_eq!(protocol, ProtocolVersion::V1);
  }

  #[test]
  fn handshake_fails_closed_when_v2_flags_are_insufficient() {
    let mut stream = ByteDuplex {
      inbound: Cursor::new(server_handshake_reply(true)),
      outbound: Vec::new(),
    };
    let mechanism = InsufficientFlagsMechanism;
    let err = establish(&mechanism, &mut stream, "host/test@REALM").unwrap_err();
    match err {
      ClientError::Security(msg) => assert!(msg.contains("flags")),
      other => panic!("expected Security error, got {other:?}"),
    }
  }

  #[test]
  fn sealed_round_trip_preserves_plaintext() {
    let mechanism = LoopbackMechanism::default();
    let mut context = LoopbackContext;
    let mut wire = Vec::new();
    send_sealed(&mechanism, &mut context, &mut wire, b"hello").unwrap();
    let plaintext = recv_sealed(&mechanism, &mut context, &mut Cursor::new(wire), 1024).unwrap();
    assert_eq!(plaintext, b"hello");
  }

  #[test]
  fn missing_confidentiality_on_unwrap_is_a_security_error() {
    let mechanism = NoConfidentialityMechanism;
    let mut context = LoopbackContext;
    let mut wire = Vec::new();
    send_token(&mut wire, token::DATA, b"hello").unwrap();
    let err = recv_sealed(&mechanism, &mut context, &mut Cursor::new(wire), 1024).unwrap_err();
    assert!(matches!(err, ClientError::Security(_)));
  }
}
