//! # REMCTL WIRE PROTOCOL
//!
//! Framing and message encoding for remctl, a small authenticated
//! remote command-execution protocol. This crate is the leaf layer: it
//! knows how to frame tokens on a byte stream and how to lay out command
//! and reply message bodies, but nothing about security contexts,
//! sessions, or sockets. See the `remctl` crate for the client built on
//! top of it.
//!
//! remctl speaks two incompatible message framings, negotiated at
//! handshake time via the [`token::PROTOCOL`] flag bit:
//!
//! - **v1** — a single message carries the whole command, and a single
//!   reply message carries the whole result (status, stdout, stderr).
//! - **v2** — commands and replies are exchanged as a sequence of typed,
//!   streamable messages, and a command may be fragmented across several
//!   tokens.

pub mod error;
pub mod message;
pub mod token;

pub use error::{TokenError, WireError};
pub use message::{Continuation, ReplyMessage, V1Reply};
pub use token::{recv_token, send_token};
