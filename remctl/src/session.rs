//! Session State Machine and Reply Assembler.
//!
//! The session owns the connection, the negotiated protocol version, the
//! security context, and the reply-draining state, and exposes the
//! caller-facing operations (`open`, `commandv`, `output`, `error`,
//! `close`). It is the one component that ties Token Transport, Security
//! Channel, and wire message encoding/decoding together into the lifecycle
//! a caller actually drives.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::TcpStream;

use remctl_protocol::message::{self, ReplyMessage, V1Reply};
use remctl_protocol::token;

use crate::error::ClientError;
use crate::security::{self, SecurityMechanism};

/// The two incompatible wire framings, negotiated in-band during the
/// handshake. Immutable for the lifetime of a session once set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolVersion {
  V1,
  V2,
}

/// Which of the two output streams a chunk of `Output` data belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
  Stdout,
  Stderr,
}

/// One element of the reply stream a command produces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputEvent {
  /// A fragment of stdout or stderr.
  Output { stream: Stream, data: Vec<u8> },
  /// A protocol-level error from the server (v2 only as a discrete
  /// event). Terminal.
  Error { code: u32, message: Vec<u8> },
  /// The remote command's exit status. Terminal.
  Status { code: u8 },
  /// Sentinel returned by every fetch once the reply has ended, until a
  /// new command is sent.
  Done,
}

/// Observable session states. `Negotiating` and `Sending` from the
/// handshake and send path are transient — they never outlive a single
/// `open`/`commandv` call, so they are not represented as states a caller
/// can observe between calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
  Disconnected,
  Ready,
  Draining,
  Closed,
}

/// Caller-overridable limits, analogous to the teacher's `ParameterSettings`.
/// The handshake token cap is not included here: it is fixed at the
/// protocol's 64 KiB handshake limit and is not meant to vary per session.
#[derive(Clone, Copy, Debug)]
pub struct OpenOptions {
  /// Cap on application (post-handshake) token payloads. Default 1 MiB.
  pub message_token_cap: u32,
}

impl Default for OpenOptions {
  fn default() -> Self {
    OpenOptions {
      message_token_cap: token::DEFAULT_MESSAGE_TOKEN_MAX,
    }
  }
}

/// Open parameters remembered so a v1 session can auto-reopen after the
/// server's post-reply hang-up, without the caller resupplying them.
#[derive(Clone, Debug)]
struct OpenParams {
  host: String,
  port: u16,
  principal: String,
}

/// A connection type a [`Client`] can (re-)establish by itself, given a
/// host and port. `TcpStream` is the only production implementor; tests
/// substitute their own in-memory duplex.
pub trait Reconnectable: Sized {
  fn reconnect(host: &str, port: u16) -> std::io::Result<Self>;
}

impl Reconnectable for TcpStream {
  fn reconnect(host: &str, port: u16) -> std::io::Result<Self> {
    TcpStream::connect((host, port))
  }
}

/// The remctl client session (§3, §4.3).
///
/// Generic over both the security mechanism (`M`) and the connection type
/// (`S`, defaulting to `TcpStream`) so tests can substitute an in-memory
/// duplex and a loopback mechanism instead of a real socket and a real
/// GSS-API binding.
pub struct Client<M: SecurityMechanism, S: Read + Write = TcpStream> {
  mechanism: M,
  state: SessionState,
  protocol: Option<ProtocolVersion>,
  connection: Option<S>,
  context: Option<M::Context>,
  open_params: Option<OpenParams>,
  /// Set once a v1 reply has been fully received; the server has closed
  /// its end, but the session remembers enough to auto-reopen on the
  /// caller's next command.
  v1_ready: bool,
  last_error: Option<String>,
  current_output: OutputEvent,
  /// Pre-decoded v1 reply events, drained front-to-back by `output()`.
  pending_v1: VecDeque<OutputEvent>,
  /// Argument vector accumulated across `finished=false` v2 calls.
  pending_command: Vec<Vec<u8>>,
  message_cap: u32,
}

impl<M: SecurityMechanism, S: Read + Write> Client<M, S> {
  /// Records `err` as the last error and, unless it is a [`ClientError::Usage`],
  /// closes the connection and security context — `Network`, `TokenFraming`,
  /// `Security`, and `Protocol` failures all leave the session `Closed` per
  /// the error handling design; a usage error leaves state untouched.
  fn fail(&mut self, err: ClientError) -> ClientError {
    self.last_error = Some(err.to_string());
    if !matches!(err, ClientError::Usage(_)) {
      if let Some(context) = self.context.take() {
        self.mechanism.delete_context(context);
      }
      self.connection = None;
      self.state = SessionState::Closed;
    }
    err
  }

  fn usage_error(&mut self, message: impl Into<String>) -> ClientError {
    self.fail(ClientError::Usage(message.into()))
  }

  fn send_sealed(&mut self, plaintext: &[u8]) -> Result<(), ClientError> {
    let connection = self
      .connection
      .as_mut()
      .expect("send path requires a live connection");
    let context = self
      .context
      .as_mut()
      .expect("send path requires an established context");
    match security::send_sealed(&self.mechanism, context, connection, plaintext) {
      Ok(()) => Ok(()),
      Err(e) => Err(self.fail(e)),
    }
  }

  fn recv_sealed(&mut self) -> Result<Vec<u8>, ClientError> {
    let connection = self
      .connection
      .as_mut()
      .expect("recv path requires a live connection");
    let context = self
      .context
      .as_mut()
      .expect("recv path requires an established context");
    match security::recv_sealed(&self.mechanism, context, connection, self.message_cap) {
      Ok(plaintext) => Ok(plaintext),
      Err(e) => Err(self.fail(e)),
    }
  }

  /// Receives and decodes the single v1 reply token, translating it into
  /// the three-event sequence (`Output{1,·}?`, `Output{2,·}?`, `Status`)
  /// and queuing them for `output()`. The server closes its end once this
  /// reply is sent, so the connection is dropped here rather than left to
  /// fail on the next read.
  fn begin_v1_drain(&mut self) -> Result<(), ClientError> {
    let plaintext = self.recv_sealed()?;
    let reply = V1Reply::decode(&plaintext).map_err(|e| self.fail(e.into()))?;
    self.v1_ready = true;
    self.connection = None;
    if !reply.stdout.is_empty() {
      self.pending_v1.push_back(OutputEvent::Output {
        stream: Stream::Stdout,
        data: reply.stdout,
      });
    }
    if !reply.stderr.is_empty() {
      self.pending_v1.push_back(OutputEvent::Output {
        stream: Stream::Stderr,
        data: reply.stderr,
      });
    }
    self.pending_v1.push_back(OutputEvent::Status {
      code: reply.status as u8,
    });
    Ok(())
  }

  /// Receives and decodes v2 reply tokens one at a time until an event
  /// worth surfacing is found; zero-length `Output` chunks are skipped
  /// rather than surfaced (§8, boundary behavior).
  fn next_v2_event(&mut self) -> Result<OutputEvent, ClientError> {
    loop {
      let plaintext = self.recv_sealed()?;
      let message = ReplyMessage::decode(&plaintext).map_err(|e| self.fail(e.into()))?;
      match message {
        ReplyMessage::Output { stream, data } => {
          if data.is_empty() {
            continue;
          }
          let stream = match stream {
            1 => Stream::Stdout,
            2 => Stream::Stderr,
            other => {
              return Err(self.fail(ClientError::Protocol(format!(
                "unknown output stream {other}"
              ))))
            }
          };
          return Ok(OutputEvent::Output { stream, data });
        }
        ReplyMessage::Status { code } => {
          self.state = SessionState::Ready;
          return Ok(OutputEvent::Status { code });
        }
        ReplyMessage::Error { code, message } => {
          self.state = SessionState::Ready;
          return Ok(OutputEvent::Error { code, message });
        }
        ReplyMessage::Version { highest_supported } => {
          return Err(self.fail(ClientError::Protocol(format!(
            "server rejected our protocol version; highest it supports is {highest_supported}"
          ))));
        }
      }
    }
  }

  /// Returns the next reply event (§4.4). The returned reference is
  /// invalidated by the next call to `output()` or by `close()` — the
  /// borrow checker enforces this statically, rather than the caller
  /// having to honor a "do not use after the next call" convention.
  pub fn output(&mut self) -> Result<&OutputEvent, ClientError> {
    self.last_error = None;
    let event = match self.state {
      SessionState::Disconnected | SessionState::Closed => {
        return Err(self.usage_error("no open connection"));
      }
      SessionState::Ready => OutputEvent::Done,
      SessionState::Draining => match self.protocol {
        Some(ProtocolVersion::V1) => {
          let event = self.pending_v1.pop_front().unwrap_or(OutputEvent::Done);
          if matches!(event, OutputEvent::Status { .. } | OutputEvent::Error { .. }) {
            self.state = SessionState::Ready;
          }
          event
        }
        Some(ProtocolVersion::V2) => self.next_v2_event()?,
        None => unreachable!("Draining implies a negotiated protocol"),
      },
    };
    self.current_output = event;
    Ok(&self.current_output)
  }

  /// Returns the last-error string, or `"No error"` if the last fallible
  /// operation succeeded.
  pub fn error(&self) -> &str {
    self.last_error.as_deref().unwrap_or("No error")
  }

  /// The current observable state.
  pub fn state(&self) -> SessionState {
    self.state
  }

  /// Releases the security context, closes the socket, and forgets the
  /// current output event. Idempotent, and safe to call on a session that
  /// was never successfully opened.
  ///
  /// Unlike the implicit v1 "server hung up after its single reply" case,
  /// an explicit `close()` always forgets the remembered open parameters:
  /// it is a deliberate terminal action, not a handshake the session
  /// should transparently resume from on the next command.
  pub fn close(&mut self) {
    if let Some(context) = self.context.take() {
      self.mechanism.delete_context(context);
    }
    self.connection = None;
    self.open_params = None;
    self.current_output = OutputEvent::Done;
    self.pending_v1.clear();
    self.pending_command.clear();
    self.state = SessionState::Closed;
  }

  fn ensure_ready_to_send(&mut self) -> Result<(), ClientError> {
    match self.state {
      SessionState::Ready => Ok(()),
      SessionState::Draining => Err(self.usage_error(
        "a command is already in progress; drain its reply before sending another",
      )),
      SessionState::Disconnected | SessionState::Closed => {
        Err(self.usage_error("no open connection"))
      }
    }
  }

  /// Sends a command given as a vector of already-measured byte slices
  /// (the iovec form: `remctl`'s C API distinguishes NUL-terminated
  /// strings from explicit-length buffers, but in Rust a `&[u8]` is
  /// always explicit-length, so `command` and `commandv` share one
  /// implementation here).
  fn send_commandv(&mut self, argv: &[&[u8]], finished: bool) -> Result<(), ClientError> {
    self.last_error = None;
    if argv.is_empty() && self.pending_command.is_empty() {
      return Err(self.usage_error("command requires a non-empty argument vector"));
    }
    self.ensure_ready_to_send()?;

    match self.protocol {
      Some(ProtocolVersion::V1) => {
        if !finished {
          return Err(
            self.usage_error("protocol v1 does not support a partial command")
          );
        }
        let owned: Vec<Vec<u8>> = argv.iter().map(|a| a.to_vec()).collect();
        let body = message::encode_v1_command(&owned);
        self.state = SessionState::Draining;
        self.send_sealed(&body)?;
        self.begin_v1_drain()
      }
      Some(ProtocolVersion::V2) => {
        self.pending_command
          .extend(argv.iter().map(|a| a.to_vec()));
        if finished {
          let argv = std::mem::take(&mut self.pending_command);
          let fragments =
            message::encode_v2_command(&argv, true, self.message_cap as usize);
          self.state = SessionState::Draining;
          for fragment in fragments {
            self.send_sealed(&fragment)?;
          }
        }
        Ok(())
      }
      None => unreachable!("Ready implies a negotiated protocol"),
    }
  }
}

impl<M: SecurityMechanism, S: Read + Write + Reconnectable> Client<M, S> {
  /// Establishes a new session: connects, drives the handshake, and
  /// returns a `Client` in the `Ready` state. Because this always
  /// constructs a fresh `Client`, any previous session the caller held a
  /// reference to is superseded without needing a separate "close first"
  /// step.
  pub fn open(mechanism: M, host: &str, port: u16, principal: &str) -> Result<Self, ClientError> {
    Self::open_with_options(mechanism, host, port, principal, OpenOptions::default())
  }

  pub fn open_with_options(
    mechanism: M,
    host: &str,
    port: u16,
    principal: &str,
    options: OpenOptions,
  ) -> Result<Self, ClientError> {
    let mut connection = S::reconnect(host, port).map_err(ClientError::Network)?;
    let (context, protocol) = security::establish(&mechanism, &mut connection, principal)?;
    Ok(Client {
      mechanism,
      state: SessionState::Ready,
      protocol: Some(protocol),
      connection: Some(connection),
      context: Some(context),
      open_params: Some(OpenParams {
        host: host.to_string(),
        port,
        principal: principal.to_string(),
      }),
      v1_ready: false,
      last_error: None,
      current_output: OutputEvent::Done,
      pending_v1: VecDeque::new(),
      pending_command: Vec::new(),
      message_cap: options.message_token_cap,
    })
  }

  fn reopen(&mut self) -> Result<(), ClientError> {
    let params = self
      .open_params
      .clone()
      .expect("auto-reopen only runs once a session has remembered open parameters");
    let mut connection =
      S::reconnect(&params.host, params.port).map_err(|e| self.fail(ClientError::Network(e)))?;
    let (context, protocol) = match security::establish(&self.mechanism, &mut connection, &params.principal) {
      Ok(v) => v,
      Err(e) => return Err(self.fail(e)),
    };
    self.connection = Some(connection);
    self.context = Some(context);
    self.protocol = Some(protocol);
    self.v1_ready = false;
    self.state = SessionState::Ready;
    Ok(())
  }

  /// Sends a command (argv form). `finished` indicates whether this call
  /// completes the command; only v2 accepts `finished=false`, appending
  /// to a client-side pending buffer rather than sending partial input
  /// (no command input streaming is supported).
  ///
  /// If the connection has been dropped (the v1 server closes its end
  /// right after delivering a reply, leaving the session `Ready` but
  /// without a live socket) and open parameters are remembered for v1,
  /// the session auto-reopens before sending. Otherwise, sending without
  /// a connection fails with [`ClientError::Usage`] without touching the
  /// network — in particular, a session closed explicitly via
  /// [`Client::close`] never auto-reopens, since `close` forgets the
  /// remembered open parameters.
  pub fn commandv(&mut self, argv: &[&[u8]], finished: bool) -> Result<(), ClientError> {
    if self.connection.is_none()
      && self.state == SessionState::Ready
      && self.protocol == Some(ProtocolVersion::V1)
      && self.v1_ready
      && self.open_params.is_some()
    {
      self.reopen()?;
    }
    self.send_commandv(argv, finished)
  }

  /// Equivalent to [`Client::commandv`] — see its documentation for why
  /// the two forms coincide in this crate.
  pub fn command(&mut self, argv: &[&[u8]], finished: bool) -> Result<(), ClientError> {
    self.commandv(argv, finished)
  }
}

#[cfg(test)]
impl<M: SecurityMechanism, S: Read + Write> Client<M, S> {
  /// Constructs a `Client` already past the handshake, for exercising the
  /// session state machine without a real (or reconnectable) transport.
  fn for_testing(mechanism: M, connection: Option<S>, context: Option<M::Context>, protocol: Option<ProtocolVersion>) -> Self {
    Client {
      mechanism,
      state: if connection.is_some() {
        SessionState::Ready
      } else {
        SessionState::Disconnected
      },
      protocol,
      connection,
      context,
      open_params: None,
      v1_ready: false,
      last_error: None,
      current_output: OutputEvent::Done,
      pending_v1: VecDeque::new(),
      pending_command: Vec::new(),
      message_cap: token::DEFAULT_MESSAGE_TOKEN_MAX,
    }
  }
}
