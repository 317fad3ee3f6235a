//! Command transport abstraction.
//!
//! The engine drives actions through a minimal contract: a [`Transport`] can
//! connect, close, and hand out single-shot [`CmdSession`]s; a session
//! executes one argv with optional stdin and returns captured stdout. A
//! non-zero remote exit is *not* a transport failure; only
//! [`TransportError::Session`] failures are eligible for the
//! reconnect-and-retry policy.

use thiserror::Error;

pub mod local;
pub mod ssh;

pub use local::LocalTransport;
pub use ssh::SshTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Transport-level failure; the connection may be re-established and the
    /// command retried.
    #[error("session failure: {0}")]
    Session(String),
    /// The command ran and exited non-zero. Carries whatever stdout was
    /// produced before exit.
    #[error("exited with a status of {code}")]
    ExitCode { code: i32, stdout: Vec<u8> },
    /// A terminal failure that is neither an exit status nor reconnectable.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// True for failures the retry policy may recover from.
    pub fn is_reconnectable(&self) -> bool {
        matches!(self, TransportError::Session(_))
    }

    /// The remote exit code, when this error carries one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            TransportError::ExitCode { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// A single-shot command channel.
pub trait CmdSession {
    /// Runs `argv`, feeding `stdin` when present, and returns captured
    /// stdout.
    fn execute(&mut self, stdin: Option<&[u8]>, argv: &[String]) -> Result<Vec<u8>, TransportError>;
}

/// A per-host command channel factory.
pub trait Transport: Send {
    /// Establishes the connection; a no-op when already connected.
    fn connect(&mut self) -> Result<(), TransportError>;
    /// Releases resources; idempotent.
    fn close(&mut self);
    /// Opens a fresh single-shot command session.
    fn new_cmd_session(&mut self) -> Result<Box<dyn CmdSession>, TransportError>;
}

/// True when `host` names the local machine, in which case commands run
/// through the local transport instead of the remote shell.
pub fn is_loopback_host(host: &str) -> bool {
    if matches!(host, "localhost" | "127.0.0.1" | "::1") {
        return true;
    }
    host.parse::<std::net::IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}
