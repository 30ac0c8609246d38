//! # REMCTL CLIENT
//!
//! A client library for remctl, a small authenticated remote
//! command-execution protocol. Given a host, port, and service principal,
//! [`Client::open`] establishes a mutually authenticated,
//! confidentiality-protected session; [`Client::commandv`] sends an
//! argument vector naming a remote command; [`Client::output`] drains the
//! reply as a sequence of [`OutputEvent`]s (stdout/stderr chunks, an exit
//! status, or a server-side error).
//!
//! Three components do the real work, leaf first:
//! - [`remctl_protocol`] — token framing and v1/v2 wire message encoding.
//! - [`security`] — the [`SecurityMechanism`] abstraction and the
//!   handshake that establishes a security context over it.
//! - [`session`] — the [`Client`] state machine tying the two together.
//!
//! Callers who only want a single aggregated result rather than streaming
//! events can use [`run`] instead of driving a [`Client`] directly.

pub mod convenience;
pub mod error;
pub mod security;
pub mod session;

pub use convenience::{run, RemctlResult};
pub use error::ClientError;
pub use security::{InitSecContext, MechanismFlags, SecurityMechanism};
pub use session::{
  Client, OpenOptions, OutputEvent, ProtocolVersion, Reconnectable, SessionState, Stream,
};
