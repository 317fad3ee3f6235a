//! Run configuration: executor settings and the host table.
//!
//! Configuration is merged from one or more YAML files before unmarshal (the
//! engine's layered merger), then defaults are filled in for zero-valued
//! fields via [`ApplyDefaults`]. A `Config` is immutable for the duration of
//! a run and shared by reference across hosts.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::value::Mapping;

/// Fills declarative defaults into fields still holding their zero value.
///
/// Applied after unmarshal of the merged configuration tree, recursing into
/// nested records. Only zero-valued leaves are touched, so any explicit
/// setting from a config layer survives.
pub trait ApplyDefaults {
    fn apply_defaults(&mut self);
}

/// Transport settings; present at executor level as fleet-wide defaults and
/// per host as overrides.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SshConfig {
    /// Accept hosts not present in the known-hosts file.
    pub allow_unknown_hosts: bool,
    /// Proceed when a host key differs from the recorded one.
    pub ignore_host_key_change: bool,
    /// Private key used to reach hosts; `~` expands at load.
    pub key_path: String,
    pub known_hosts_path: String,
    pub user: String,
    pub port: u16,
    /// Reconnect budget for transport-level failures.
    pub max_connection_attempts: u32,
    /// Seconds to wait between reconnect attempts.
    pub delay_after_connection_failure: f64,
}

/// Executor-wide settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutorConfig {
    pub max_concurrent_hosts: usize,
    /// Shell used for `shell:` payloads, invoked as `<shell> -c <cmd>`.
    pub shell_binary: String,
    /// When true, every host completes step N before any host begins N+1.
    pub sync_execution_steps: bool,
    pub ssh: SshConfig,
}

impl ApplyDefaults for SshConfig {
    fn apply_defaults(&mut self) {
        if self.max_connection_attempts == 0 {
            self.max_connection_attempts = 20;
        }
        if self.delay_after_connection_failure == 0.0 {
            self.delay_after_connection_failure = 5.0;
        }
    }
}

impl ApplyDefaults for ExecutorConfig {
    fn apply_defaults(&mut self) {
        if self.max_concurrent_hosts == 0 {
            self.max_concurrent_hosts = 10;
        }
        if self.shell_binary.is_empty() {
            self.shell_binary = "sh".to_string();
        }
        self.ssh.apply_defaults();
    }
}

/// One target host. Host-level ssh fields are overrides and stay zero when
/// unset, so defaults are deliberately not applied here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostConfig {
    /// Network address or alias, optionally `host:port`.
    pub host: String,
    /// Optional group tag targetable alongside host identifiers.
    pub group: String,
    /// Seeds the per-host `.Host.` store.
    pub context: Option<Mapping>,
    pub ssh: SshConfig,
}

/// The current user running the tool.
#[derive(Debug, Clone, Default)]
pub struct UserInfo {
    pub username: String,
    pub home_dir: String,
}

impl UserInfo {
    /// Reads the invoking user from the environment.
    pub fn current() -> Self {
        Self {
            username: std::env::var("USER").unwrap_or_default(),
            home_dir: std::env::var("HOME").unwrap_or_default(),
        }
    }
}

/// The full merged run configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub executor: ExecutorConfig,
    /// Keyed by host identifier; the key is the identity used everywhere
    /// internally and has no network meaning itself.
    pub hosts: IndexMap<String, HostConfig>,

    #[serde(skip)]
    pub user: UserInfo,
    #[serde(skip)]
    pub debug: bool,
    #[serde(skip)]
    pub json: bool,
    /// Recipe working directory; relative paths resolve against it.
    #[serde(skip)]
    pub cwd: PathBuf,
}

impl ApplyDefaults for Config {
    fn apply_defaults(&mut self) {
        self.executor.apply_defaults();
    }
}

impl Config {
    fn host(&self, ident: &str) -> Option<&HostConfig> {
        self.hosts.get(ident)
    }

    /// Hostname and port for a host identity. A `host:port` address wins
    /// over configured ports; otherwise host-level ssh, executor-level ssh,
    /// then 22.
    pub fn address(&self, ident: &str) -> (String, u16) {
        let Some(host) = self.host(ident) else {
            return (String::new(), 22);
        };
        if let Some((name, port)) = host.host.rsplit_once(':') {
            // Bare IPv6 addresses contain colons without naming a port.
            if !name.contains(':') {
                if let Ok(port) = port.parse::<u16>() {
                    return (name.to_string(), port);
                }
            }
        }
        let port = if host.ssh.port != 0 {
            host.ssh.port
        } else if self.executor.ssh.port != 0 {
            self.executor.ssh.port
        } else {
            22
        };
        (host.host.clone(), port)
    }

    /// Remote username: host override, executor default, then the current
    /// local user.
    pub fn username(&self, ident: &str) -> String {
        let host_user = self.host(ident).map(|h| h.ssh.user.clone()).unwrap_or_default();
        if !host_user.is_empty() {
            return host_user;
        }
        if !self.executor.ssh.user.is_empty() {
            return self.executor.ssh.user.clone();
        }
        self.user.username.clone()
    }

    pub fn key_path(&self, ident: &str) -> String {
        let host_key = self.host(ident).map(|h| h.ssh.key_path.clone()).unwrap_or_default();
        if !host_key.is_empty() {
            return host_key;
        }
        self.executor.ssh.key_path.clone()
    }

    pub fn known_hosts_path(&self, ident: &str) -> String {
        let host_path = self
            .host(ident)
            .map(|h| h.ssh.known_hosts_path.clone())
            .unwrap_or_default();
        if !host_path.is_empty() {
            return host_path;
        }
        self.executor.ssh.known_hosts_path.clone()
    }

    pub fn allow_unknown_hosts(&self, ident: &str) -> bool {
        self.host(ident).map(|h| h.ssh.allow_unknown_hosts).unwrap_or(false)
            || self.executor.ssh.allow_unknown_hosts
    }

    pub fn ignore_host_key_change(&self, ident: &str) -> bool {
        self.host(ident).map(|h| h.ssh.ignore_host_key_change).unwrap_or(false)
            || self.executor.ssh.ignore_host_key_change
    }

    pub fn max_connection_attempts(&self, ident: &str) -> u32 {
        let host_attempts = self
            .host(ident)
            .map(|h| h.ssh.max_connection_attempts)
            .unwrap_or(0);
        if host_attempts != 0 {
            return host_attempts;
        }
        self.executor.ssh.max_connection_attempts
    }

    pub fn delay_after_connection_failure(&self, ident: &str) -> f64 {
        let host_delay = self
            .host(ident)
            .map(|h| h.ssh.delay_after_connection_failure)
            .unwrap_or(0.0);
        if host_delay != 0.0 {
            return host_delay;
        }
        self.executor.ssh.delay_after_connection_failure
    }

    /// Expands `~` in configured key and known-hosts paths against the
    /// current user's home directory.
    pub fn expand_home_paths(&mut self) {
        self.executor.ssh.key_path = expand_tilde(&self.executor.ssh.key_path);
        self.executor.ssh.known_hosts_path = expand_tilde(&self.executor.ssh.known_hosts_path);
        for host in self.hosts.values_mut() {
            host.ssh.key_path = expand_tilde(&host.ssh.key_path);
            host.ssh.known_hosts_path = expand_tilde(&host.ssh.known_hosts_path);
        }
    }
}

fn expand_tilde(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    shellexpand::tilde(path).into_owned()
}
