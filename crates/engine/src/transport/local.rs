//! Local process execution.
//!
//! Used for `local: true` actions and for hosts whose address resolves to a
//! loopback interface. Commands run directly as child processes; there is
//! nothing to connect or close.

use std::io::Write;
use std::process::{Command, Stdio};

use super::{CmdSession, Transport, TransportError};

#[derive(Debug, Default)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for LocalTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn close(&mut self) {}

    fn new_cmd_session(&mut self) -> Result<Box<dyn CmdSession>, TransportError> {
        Ok(Box::new(LocalCmdSession))
    }
}

pub struct LocalCmdSession;

impl CmdSession for LocalCmdSession {
    fn execute(&mut self, stdin: Option<&[u8]>, argv: &[String]) -> Result<Vec<u8>, TransportError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(TransportError::Other("empty command".to_string()));
        };

        let mut command = Command::new(program);
        command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        command.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });

        let mut child = command
            .spawn()
            .map_err(|e| TransportError::Other(format!("unable to start {program}: {e}")))?;

        if let Some(bytes) = stdin {
            if let Some(mut handle) = child.stdin.take() {
                handle
                    .write_all(bytes)
                    .map_err(|e| TransportError::Other(format!("unable to write stdin: {e}")))?;
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| TransportError::Other(format!("unable to collect output: {e}")))?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(TransportError::ExitCode {
                code: output.status.code().unwrap_or(-1),
                stdout: output.stdout,
            })
        }
    }
}
