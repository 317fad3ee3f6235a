//! Remote execution over the system `ssh` binary.
//!
//! Each command session runs one `ssh` invocation in batch mode, so a
//! "session" maps to a single remote command. Host-key behavior and the
//! identity file come from the resolved per-host configuration. File sync
//! shells out to `rsync` with a matching `-e ssh` transport string.

use std::io::Write;
use std::process::{Command, Stdio};

use tracing::debug;

use super::{CmdSession, Transport, TransportError};

/// Connection settings for one target host.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_path: String,
    pub known_hosts_path: String,
    pub allow_unknown_hosts: bool,
    pub ignore_host_key_change: bool,
}

impl SshTarget {
    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Common `ssh` arguments, destination excluded.
    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if !self.key_path.is_empty() {
            args.push("-i".to_string());
            args.push(self.key_path.clone());
        }
        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }
        args.push("-o".to_string());
        args.push("BatchMode=yes".to_string());
        args.push("-o".to_string());
        args.push("ConnectTimeout=10".to_string());
        args.push("-o".to_string());
        args.push("ServerAliveInterval=15".to_string());
        args.push("-o".to_string());
        args.push("ServerAliveCountMax=3".to_string());
        if self.ignore_host_key_change {
            args.push("-o".to_string());
            args.push("StrictHostKeyChecking=no".to_string());
        } else if self.allow_unknown_hosts {
            args.push("-o".to_string());
            args.push("StrictHostKeyChecking=accept-new".to_string());
        }
        if !self.known_hosts_path.is_empty() {
            args.push("-o".to_string());
            args.push(format!("UserKnownHostsFile={}", self.known_hosts_path));
        }
        args
    }
}

pub struct SshTransport {
    target: SshTarget,
    connected: bool,
}

impl SshTransport {
    pub fn new(target: SshTarget) -> Self {
        Self {
            target,
            connected: false,
        }
    }
}

impl Transport for SshTransport {
    /// Probes the host with a no-op remote command. Idempotent while the
    /// connection is considered live.
    fn connect(&mut self) -> Result<(), TransportError> {
        if self.connected {
            return Ok(());
        }
        debug!(host = %self.target.host, "establishing ssh connectivity");
        let mut session = SshCmdSession {
            target: self.target.clone(),
        };
        session.execute(None, &["true".to_string()])?;
        self.connected = true;
        Ok(())
    }

    fn close(&mut self) {
        self.connected = false;
    }

    fn new_cmd_session(&mut self) -> Result<Box<dyn CmdSession>, TransportError> {
        Ok(Box::new(SshCmdSession {
            target: self.target.clone(),
        }))
    }
}

pub struct SshCmdSession {
    target: SshTarget,
}

impl CmdSession for SshCmdSession {
    fn execute(&mut self, stdin: Option<&[u8]>, argv: &[String]) -> Result<Vec<u8>, TransportError> {
        let mut args = self.target.base_args();
        args.push(self.target.destination());
        args.push(shell_join(argv));

        let mut command = Command::new("ssh");
        command.args(&args).stdout(Stdio::piped()).stderr(Stdio::piped());
        command.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });

        let mut child = command
            .spawn()
            .map_err(|e| TransportError::Session(format!("unable to start ssh: {e}")))?;

        if let Some(bytes) = stdin {
            if let Some(mut handle) = child.stdin.take() {
                handle
                    .write_all(bytes)
                    .map_err(|e| TransportError::Session(format!("unable to write stdin: {e}")))?;
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| TransportError::Session(format!("unable to collect output: {e}")))?;

        if output.status.success() {
            return Ok(output.stdout);
        }

        let code = output.status.code().unwrap_or(-1);
        // The ssh client itself exits 255 on connection-level failures; a
        // remote command's own exit status passes through unchanged.
        if code == 255 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::Session(format!(
                "ssh connection to {} failed: {}",
                self.target.host,
                stderr.trim()
            )));
        }
        Err(TransportError::ExitCode {
            code,
            stdout: output.stdout,
        })
    }
}

/// Pushes local resources to a remote destination through rsync over ssh.
pub fn rsync(target: &SshTarget, src: &str, dest: &str) -> Result<(), TransportError> {
    let mut ssh_command = vec!["ssh".to_string()];
    if !target.key_path.is_empty() {
        ssh_command.push("-i".to_string());
        ssh_command.push(target.key_path.clone());
    }
    if target.port != 22 {
        ssh_command.push("-p".to_string());
        ssh_command.push(target.port.to_string());
    }

    let status = Command::new("rsync")
        .arg("-e")
        .arg(ssh_command.join(" "))
        .arg(src)
        .arg(format!("{}:{}", target.destination(), dest))
        .status()
        .map_err(|e| TransportError::Other(format!("unable to start rsync: {e}")))?;

    if status.success() {
        Ok(())
    } else {
        Err(TransportError::ExitCode {
            code: status.code().unwrap_or(-1),
            stdout: Vec::new(),
        })
    }
}

/// Joins argv into one remote shell command, quoting parts with spaces.
pub fn shell_join(argv: &[String]) -> String {
    let mut parts = Vec::with_capacity(argv.len());
    for part in argv {
        if !part.contains(' ') {
            parts.push(part.clone());
            continue;
        }
        if (part.starts_with('"') && part.ends_with('"')) || (part.starts_with('\'') && part.ends_with('\'')) {
            parts.push(part.clone());
        } else if part.contains('"') {
            parts.push(format!("'{part}'"));
        } else {
            parts.push(format!("\"{part}\""));
        }
    }
    parts.join(" ")
}
