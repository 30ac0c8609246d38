//! Command and reply message bodies for protocol v1 and v2, as carried
//! inside a token's (unsealed) payload.
//!
//! A client only ever *encodes* command messages and *decodes* reply
//! messages; the reverse directions are the server's job and are out of
//! scope here.

use crate::error::WireError;

/// v2 message-type byte, second byte of every v2 payload.
pub mod types {
  pub const COMMAND: u8 = 1;
  pub const OUTPUT: u8 = 2;
  pub const STATUS: u8 = 3;
  pub const ERROR: u8 = 4;
  pub const VERSION: u8 = 5;
}

/// First byte of every v2 payload.
pub const V2_VERSION: u8 = 2;

/// `continued` byte of a v2 `COMMAND` message: which piece of a
/// possibly-fragmented logical command this token carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Continuation {
  /// The only fragment.
  Single = 0,
  /// The first of several fragments.
  First = 1,
  /// Neither the first nor the last fragment.
  Middle = 2,
  /// The last fragment.
  Last = 3,
}

/// Header size, in bytes, of a v2 `COMMAND` fragment: version, type,
/// keep-alive, continued.
const COMMAND_HEADER_LEN: usize = 4;

/// Encodes a logical command (an argument vector) as one or more v2
/// `COMMAND` token payloads, splitting the serialized body across fragments
/// no larger than `cap` bytes (including the per-fragment header) when it
/// would not otherwise fit in one token.
///
/// Fragment bodies are raw continuations of a single serialized
/// `argc ‖ (len ‖ bytes)*` buffer: only the first fragment's body begins
/// with the argument count, and a receiver reassembles the full command by
/// concatenating fragment bodies in order before parsing it.
pub fn encode_v2_command(argv: &[Vec<u8>], keep_alive: bool, cap: usize) -> Vec<Vec<u8>> {
  let body = encode_v1_command(argv);
  let chunk_cap = cap.saturating_sub(COMMAND_HEADER_LEN).max(1);
  if body.len() <= chunk_cap {
    return vec![frame_command(&body, keep_alive, Continuation::Single)];
  }
  let chunks: Vec<&[u8]> = body.chunks(chunk_cap).collect();
  let last = chunks.len() - 1;
  chunks
    .into_iter()
    .enumerate()
    .map(|(i, chunk)| {
      let continued = if i == 0 {
        Continuation::First
      } else if i == last {
        Continuation::Last
      } else {
        Continuation::Middle
      };
      frame_command(chunk, keep_alive, continued)
    })
    .collect()
}

fn frame_command(body: &[u8], keep_alive: bool, continued: Continuation) -> Vec<u8> {
  let mut out = Vec::with_capacity(COMMAND_HEADER_LEN + body.len());
  out.push(V2_VERSION);
  out.push(types::COMMAND);
  out.push(keep_alive as u8);
  out.push(continued as u8);
  out.extend_from_slice(body);
  out
}

/// Encodes a command as a single v1 message body:
/// `argc:u32be ‖ (len:u32be ‖ bytes)*`.
///
/// v2 also uses this as the raw body carried (possibly fragmented) inside
/// its `COMMAND` tokens.
pub fn encode_v1_command(argv: &[Vec<u8>]) -> Vec<u8> {
  let mut out = Vec::new();
  out.extend_from_slice(&(argv.len() as u32).to_be_bytes());
  for arg in argv {
    out.extend_from_slice(&(arg.len() as u32).to_be_bytes());
    out.extend_from_slice(arg);
  }
  out
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32, WireError> {
  let slice = buf.get(*pos..*pos + 4).ok_or(WireError::Truncated)?;
  *pos += 4;
  Ok(u32::from_be_bytes(slice.try_into().unwrap()))
}

fn read_bytes<'a>(buf: &'a [u8], pos: &mut usize, len: u32) -> Result<&'a [u8], WireError> {
  let len = len as usize;
  let slice = buf
    .get(*pos..*pos + len)
    .ok_or(WireError::LengthOverrun)?;
  *pos += len;
  Ok(slice)
}

/// A fully decoded v1 reply token: status plus the complete stdout and
/// stderr buffers, all carried in a single message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct V1Reply {
  pub status: u32,
  pub stdout: Vec<u8>,
  pub stderr: Vec<u8>,
}

impl V1Reply {
  /// Decodes `status:u32be ‖ stdout_len:u32be ‖ stdout ‖ stderr_len:u32be
  /// ‖ stderr` from a v1 reply token payload.
  pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
    let mut pos = 0;
    let status = read_u32(payload, &mut pos)?;
    let stdout_len = read_u32(payload, &mut pos)?;
    let stdout = read_bytes(payload, &mut pos, stdout_len)?.to_vec();
    let stderr_len = read_u32(payload, &mut pos)?;
    let stderr = read_bytes(payload, &mut pos, stderr_len)?.to_vec();
    Ok(V1Reply {
      status,
      stdout,
      stderr,
    })
  }
}

/// A decoded v2 reply message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyMessage {
  /// `OUTPUT`: a fragment of stdout (1) or stderr (2).
  Output { stream: u8, data: Vec<u8> },
  /// `STATUS`: the command's exit status. Terminal.
  Status { code: u8 },
  /// `ERROR`: a protocol-level error from the server. Terminal.
  Error { code: u32, message: Vec<u8> },
  /// `VERSION`: the highest protocol version the server supports, sent
  /// when it rejects the client's advertised version.
  Version { highest_supported: u8 },
}

impl ReplyMessage {
  /// Decodes a v2 reply message from an unsealed token payload.
  pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
    if payload.len() < 2 {
      return Err(WireError::Truncated);
    }
    let version = payload[0];
    if version != V2_VERSION {
      return Err(WireError::VersionMismatch(version));
    }
    let message_type = payload[1];
    let body = &payload[2..];
    let mut pos = 0;
    match message_type {
      types::OUTPUT => {
        let stream = *body.first().ok_or(WireError::Truncated)?;
        pos = 1;
        let len = read_u32(body, &mut pos)?;
        let data = read_bytes(body, &mut pos, len)?.to_vec();
        Ok(ReplyMessage::Output { stream, data })
      }
      types::STATUS => {
        let code = *body.first().ok_or(WireError::Truncated)?;
        Ok(ReplyMessage::Status { code })
      }
      types::ERROR => {
        let code = read_u32(body, &mut pos)?;
        let len = read_u32(body, &mut pos)?;
        let message = read_bytes(body, &mut pos, len)?.to_vec();
        Ok(ReplyMessage::Error { code, message })
      }
      types::VERSION => {
        let highest_supported = *body.first().ok_or(WireError::Truncated)?;
        Ok(ReplyMessage::Version {
          highest_supported,
        })
      }
      other => Err(WireError::UnknownMessageType(other)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn v1_command_round_trips_through_v1_reply_style_decode() {
    let argv = vec![b"echo".to_vec(), b"hi".to_vec()];
    let encoded = encode_v1_command(&argv);
    // argc
    assert_eq!(&encoded[0..4], &4u32.to_be_bytes());
    // first arg length + bytes
    assert_eq!(&encoded[4..8], &4u32.to_be_bytes());
    assert_eq!(&encoded[8..12], b"echo");
  }

  #[test]
  fn v2_command_fits_in_single_fragment() {
    let argv = vec![b"echo".to_vec(), b"hi".to_vec()];
    let fragments = encode_v2_command(&argv, false, 1024);
    assert_eq!(fragments.len(), 1);
    assert_eq!(fragments[0][0], V2_VERSION);
    assert_eq!(fragments[0][1], types::COMMAND);
    assert_eq!(fragments[0][3], Continuation::Single as u8);
  }

  #[test]
  fn v2_command_splits_when_oversize() {
    let argv = vec![vec![b'a'; 50]];
    let fragments = encode_v2_command(&argv, false, 20);
    assert!(fragments.len() > 1);
    assert_eq!(fragments[0][3], Continuation::First as u8);
    assert_eq!(fragments.last().unwrap()[3], Continuation::Last as u8);
    for fragment in &fragments[1..fragments.len() - 1] {
      assert_eq!(fragment[3], Continuation::Middle as u8);
    }
    let reassembled: Vec<u8> = fragments
      .iter()
      .flat_map(|f| f[COMMAND_HEADER_LEN..].to_vec())
      .collect();
    assert_eq!(reassembled, encode_v1_command(&argv));
  }

  #[test]
  fn v1_reply_decodes_status_stdout_stderr() {
    let mut payload = Vec::new();
    payload.extend_from_slice(&0u32.to_be_bytes());
    payload.extend_from_slice(&3u32.to_be_bytes());
    payload.extend_from_slice(b"hi\n");
    payload.extend_from_slice(&0u32.to_be_bytes());
    let reply = V1Reply::decode(&payload).unwrap();
    assert_eq!(reply.status, 0);
    assert_eq!(reply.stdout, b"hi\n");
    assert!(reply.stderr.is_empty());
  }

  #[test]
  fn v1_reply_rejects_overrunning_length() {
    let mut payload = Vec::new();
    payload.extend_from_slice(&0u32.to_be_bytes());
    payload.extend_from_slice(&100u32.to_be_bytes());
    payload.extend_from_slice(b"short");
    let err = V1Reply::decode(&payload).unwrap_err();
    assert_eq!(err, WireError::LengthOverrun);
  }

  #[test]
  fn v2_output_message_round_trips() {
    let mut payload = vec![V2_VERSION, types::OUTPUT, 1];
    payload.extend_from_slice(&2u32.to_be_bytes());
    payload.extend_from_slice(b"hi");
    let message = ReplyMessage::decode(&payload).unwrap();
    assert_eq!(
      message,
      ReplyMessage::Output {
        stream: 1,
        data: b"hi".to_vec()
      }
    );
  }

  #[test]
  fn v2_status_message_decodes() {
    let payload = vec![V2_VERSION, types::STATUS, 3];
    assert_eq!(
      ReplyMessage::decode(&payload).unwrap(),
      ReplyMessage::Status { code: 3 }
    );
  }

  #[test]
  fn v2_error_message_decodes() {
    let mut payload = vec![V2_VERSION, types::ERROR];
    payload.extend_from_slice(&5u32.to_be_bytes());
    payload.extend_from_slice(&13u32.to_be_bytes());
    payload.extend_from_slice(b"Access denied");
    let message = ReplyMessage::decode(&payload).unwrap();
    assert_eq!(
      message,
      ReplyMessage::Error {
        code: 5,
        message: b"Access denied".to_vec()
      }
    );
  }

  #[test]
  fn v2_version_message_decodes() {
    let payload = vec![V2_VERSION, types::VERSION, 1];
    assert_eq!(
      ReplyMessage::decode(&payload).unwrap(),
      ReplyMessage::Version {
        highest_supported: 1
      }
    );
  }

  #[test]
  fn unknown_message_type_is_fatal() {
    let payload = vec![V2_VERSION, 200];
    let err = ReplyMessage::decode(&payload).unwrap_err();
    assert_eq!(err, WireError::UnknownMessageType(200));
  }

  #[test]
  fn length_overrunning_payload_is_rejected() {
    let mut payload = vec![V2_VERSION, types::OUTPUT, 1];
    payload.extend_from_slice(&100u32.to_be_bytes());
    payload.extend_from_slice(b"short");
    let err = ReplyMessage::decode(&payload).unwrap_err();
    assert_eq!(err, WireError::LengthOverrun);
  }
}
