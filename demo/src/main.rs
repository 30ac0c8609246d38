//! A minimal command-line driver exercising the `remctl` client API against
//! a caller-supplied host, port, principal, and command line.
//!
//! This crate does not ship a security mechanism (that binding is left to
//! the caller, per the library's scope), so it runs against
//! [`UnconfiguredMechanism`], which fails immediately with a clear message
//! explaining what to plug in instead of a real Kerberos/GSS-API adapter.

use std::convert::Infallible;

use remctl::{run, InitSecContext, SecurityMechanism};

/// A placeholder mechanism: it documents the shape a real binding must
/// take but does not perform any cryptography. Swap this out for a real
/// GSS-API adapter to actually talk to a server.
struct UnconfiguredMechanism;

#[derive(Debug, thiserror::Error)]
#[error("no security mechanism is configured; link a GSS-API binding and replace UnconfiguredMechanism")]
struct UnconfiguredError;

impl SecurityMechanism for UnconfiguredMechanism {
  type Name = ();
  type Context = Infallible;
  type Error = UnconfiguredError;

  fn import_name(&self, _principal: &str) -> Result<Self::Name, Self::Error> {
    Err(UnconfiguredError)
  }

  fn init_sec_context(
    &self,
    _name: &Self::Name,
    _context: Option<Self::Context>,
    _input_token: Option<&[u8]>,
  ) -> Result<InitSecContext<Self::Context>, Self::Error> {
    Err(UnconfiguredError)
  }

  fn wrap(&self, context: &mut Self::Context, _plaintext: &[u8]) -> Result<Vec<u8>, Self::Error> {
    match *context {}
  }

  fn unwrap(
    &self,
    context: &mut Self::Context,
    _ciphertext: &[u8],
  ) -> Result<(Vec<u8>, bool), Self::Error> {
    match *context {}
  }

  fn delete_context(&self, context: Self::Context) {
    match context {}
  }
}

fn usage(program: &str) -> ! {
  eprintln!("usage: {program} <host> <port> <principal> <command> [args...]");
  std::process::exit(2);
}

fn main() {
  tracing_subscriber::fmt::init();

  let mut args = std::env::args();
  let program = args.next().unwrap_or_else(|| "remctl-demo".to_string());
  let host = args.next().unwrap_or_else(|| usage(&program));
  let port: u16 = args
    .next()
    .unwrap_or_else(|| usage(&program))
    .parse()
    .unwrap_or_else(|_| usage(&program));
  let principal = args.next().unwrap_or_else(|| usage(&program));
  let command: Vec<String> = args.collect();
  if command.is_empty() {
    usage(&program);
  }
  let argv: Vec<&[u8]> = command.iter().map(|arg| arg.as_bytes()).collect();

  match run(UnconfiguredMechanism, &host, port, &principal, &argv) {
    Ok(result) => {
      print!("{}", String::from_utf8_lossy(&result.stdout));
      eprint!("{}", String::from_utf8_lossy(&result.stderr));
      if let Some(error) = result.error {
        eprintln!("remote error: {error}");
        std::process::exit(1);
      }
      std::process::exit(i32::from(result.status.unwrap_or(0)));
    }
    Err(err) => {
      eprintln!("{program}: {err}");
      std::process::exit(1);
    }
  }
}
