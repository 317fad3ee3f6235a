//! Action execution semantics.
//!
//! `execute` drives one action through its full pipeline: pause gates,
//! conditional `when`, iteration, payload dispatch (exec, shell, sync,
//! template), capture of stdout/exit code into the immediate namespace,
//! parse-json/yaml, the until retry loop, exit-code and failWhen checks, and
//! finally promotion of the immediate snapshot into the frame context for
//! named actions. Transport-level failures reconnect and re-execute within
//! the configured attempt budget; exit-code errors never retry.

use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use smelter_types::{Action, Mapping, PathSeg, Store, StoreError, SyncSpec, TemplateSpec, Value};

use crate::eval::EvalError;
use crate::instance::{ActionTrace, ExecutionInstance};
use crate::render;
use crate::transport::{ssh, Transport, TransportError};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unable to evaluate {what} {expr:?}: {source}")]
    Expr {
        what: &'static str,
        expr: String,
        #[source]
        source: EvalError,
    },
    #[error("iterate attribute does not return a sequence")]
    IterateNotSequence,
    #[error("exited with a status of {0}")]
    ExitCode(i32),
    #[error(transparent)]
    Transport(TransportError),
    #[error("maximum number of attempts occurred and until clause requirement was not met")]
    UntilExhausted,
    #[error("condition of failWhen clause evaluated to true")]
    FailWhen,
    #[error("unable to parse stdout as {format}: {message}")]
    Parse { format: &'static str, message: String },
    #[error("template error: {0}")]
    Template(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ExecutionInstance {
    /// Runs one top-level action. The immediate namespace resets here and
    /// only here, so iteration elements accumulate within a single action.
    pub fn execute(&mut self, action: &Action) -> Result<(), ExecError> {
        self.immediate = Store::new();
        self.execute_action(action)
    }

    fn execute_action(&mut self, action: &Action) -> Result<(), ExecError> {
        info!(host = %self.host_ident, "processing action {:?}", action.description);

        if let Some(pause) = &action.pause {
            if pause.before > 0.0 {
                debug!(host = %self.host_ident, seconds = pause.before, "pausing before action execution");
                thread::sleep(Duration::from_secs_f64(pause.before));
            }
        }

        if !self.when_satisfied(action)? {
            info!(host = %self.host_ident, "skipping due to falsey when clause");
            return Ok(());
        }

        if !action.iterate.is_empty() {
            return self.execute_iteration(action);
        }

        let exit_code = self.execute_with_until(action)?;

        if exit_code != 0 && !action.ignore_exit_code {
            return Err(ExecError::ExitCode(exit_code));
        }

        if !action.fail_when.is_empty() {
            let result = self.eval_expr("failWhen condition", &action.fail_when)?;
            if result.is_truthy() {
                return Err(ExecError::FailWhen);
            }
        }

        // Named actions retain their transient data in the frame context.
        if !action.name.is_empty() {
            let snapshot = self.immediate.get_mapping(&[]);
            self.current_context_mut()
                .set(Value::Mapping(snapshot), &[PathSeg::Key(action.name.clone())])?;
        }

        if let Some(pause) = &action.pause {
            if pause.after > 0.0 {
                debug!(host = %self.host_ident, seconds = pause.after, "pausing after action execution");
                thread::sleep(Duration::from_secs_f64(pause.after));
            }
        }

        Ok(())
    }

    /// Runs the inner action once per element of the evaluated iterable.
    /// `item` is set for each pass and deliberately not cleared between
    /// iterations; the first error halts the loop.
    fn execute_iteration(&mut self, action: &Action) -> Result<(), ExecError> {
        let iterable = self.eval_expr("iterate attribute", &action.iterate)?;
        let Value::Sequence(items) = iterable else {
            return Err(ExecError::IterateNotSequence);
        };
        let Some(inner) = &action.action else {
            return Ok(());
        };

        let total = items.len();
        for (index, item) in items.into_iter().enumerate() {
            self.immediate.set(item, &[PathSeg::Key("item".into())])?;
            let mut inner_action = (**inner).clone();
            inner_action.description =
                format!("{} (iteration {} of {})", action.description, index + 1, total);
            self.execute_action(&inner_action)?;
        }
        Ok(())
    }

    /// Payload dispatch wrapped in the until loop. Returns the final
    /// attempt's exit code; immediate capture reflects the final attempt.
    fn execute_with_until(&mut self, action: &Action) -> Result<i32, ExecError> {
        let mut exit_code;
        let mut until_attempts: u32 = 0;

        loop {
            let (stdout, code) = match self.execute_payload(action) {
                Ok(result) => result,
                Err(error) => {
                    self.trail.push(ActionTrace {
                        name: action.name.clone(),
                        description: action.description.clone(),
                        context: None,
                        error: Some(error.to_string()),
                    });
                    return Err(error);
                }
            };
            exit_code = code;

            let stdout_text = String::from_utf8_lossy(&stdout).into_owned();
            debug!(host = %self.host_ident, exit_code, "command finished");
            debug!(host = %self.host_ident, "stdout\n{stdout_text}");

            self.immediate
                .set(Value::String(stdout_text.clone()), &[PathSeg::Key("stdout".into())])?;
            self.immediate
                .set(Value::Number(exit_code as f64), &[PathSeg::Key("exitCode".into())])?;

            if self.config.debug {
                let snapshot = Value::Mapping(self.immediate.get_mapping(&[])).to_json();
                self.trail.push(ActionTrace {
                    name: action.name.clone(),
                    description: action.description.clone(),
                    context: Some(snapshot),
                    error: None,
                });
            }

            if exit_code == 0 {
                if action.parse_json {
                    let parsed: serde_json::Value =
                        serde_json::from_str(&stdout_text).map_err(|e| ExecError::Parse {
                            format: "json",
                            message: e.to_string(),
                        })?;
                    self.immediate
                        .set(Value::from_json(&parsed), &[PathSeg::Key("json".into())])?;
                }
                if action.parse_yaml {
                    let parsed: serde_yaml::Value =
                        serde_yaml::from_str(&stdout_text).map_err(|e| ExecError::Parse {
                            format: "yaml",
                            message: e.to_string(),
                        })?;
                    self.immediate
                        .set(Value::from_yaml(&parsed), &[PathSeg::Key("yaml".into())])?;
                }
            }

            let Some(until) = &action.until else {
                break;
            };

            let satisfied = self.eval_expr("until condition", &until.condition)?;
            if satisfied.is_truthy() {
                break;
            }

            until_attempts += 1;
            if until_attempts >= until.max_attempts {
                return Err(ExecError::UntilExhausted);
            }
            if until.pause_interval > 0.0 {
                thread::sleep(Duration::from_secs_f64(until.pause_interval));
            }
        }

        Ok(exit_code)
    }

    /// Dispatches the single payload an action carries.
    fn execute_payload(&mut self, action: &Action) -> Result<(Vec<u8>, i32), ExecError> {
        if !action.shell.is_empty() || !action.exec.is_empty() {
            let argv = if !action.shell.is_empty() {
                self.shell_argv(action)?
            } else {
                self.exec_argv(action)?
            };

            let stdin = if action.stdin.is_empty() {
                None
            } else {
                let rendered = self.render_value("action stdin", &action.stdin)?;
                match rendered {
                    Value::String(text) => Some(text.into_bytes()),
                    other => {
                        return Err(ExecError::Expr {
                            what: "action stdin",
                            expr: action.stdin.clone(),
                            source: EvalError::Type(format!(
                                "stdin must evaluate to a string (it is currently {})",
                                other.kind()
                            )),
                        });
                    }
                }
            };

            return self.run_command(action.local, stdin.as_deref(), &argv);
        }

        if let Some(sync) = &action.sync {
            self.sync_files(sync)?;
            return Ok((Vec::new(), 0));
        }

        if let Some(template) = &action.template {
            return self.push_template(action, template);
        }

        // An action without a payload (pure gate/pause) is a successful
        // no-op.
        Ok((Vec::new(), 0))
    }

    /// Runs argv through the chosen transport, reconnecting and re-executing
    /// on transport failures within the attempt budget. Exit-code errors are
    /// returned as captured results, never retried.
    fn run_command(
        &mut self,
        local: bool,
        stdin: Option<&[u8]>,
        argv: &[String],
    ) -> Result<(Vec<u8>, i32), ExecError> {
        let host = self.host_ident.clone();
        let max_attempts = self.config.max_connection_attempts(&host);
        let delay = self.config.delay_after_connection_failure(&host);

        let transport: &mut dyn Transport = if local {
            &mut self.local_transport
        } else {
            self.transport.as_mut()
        };

        let mut reconnect_attempts: u32 = 0;
        loop {
            let mut session = transport.new_cmd_session().map_err(ExecError::Transport)?;
            let failure = match session.execute(stdin, argv) {
                Ok(stdout) => return Ok((stdout, 0)),
                Err(TransportError::ExitCode { code, stdout }) => return Ok((stdout, code)),
                Err(error) if error.is_reconnectable() => error,
                Err(error) => return Err(ExecError::Transport(error)),
            };
            drop(session);

            warn!(host = %host, error = %failure, "transport failure, attempting reconnect");
            transport.close();

            loop {
                if reconnect_attempts >= max_attempts {
                    return Err(ExecError::Transport(failure));
                }
                reconnect_attempts += 1;

                match transport.connect() {
                    Ok(()) => break,
                    Err(connect_error) => {
                        debug!(host = %host, error = %connect_error, "reconnect attempt failed");
                        if reconnect_attempts >= max_attempts {
                            return Err(ExecError::Transport(connect_error));
                        }
                        thread::sleep(Duration::from_secs_f64(delay));
                    }
                }
            }
            // Reconnected; re-execute the original command.
        }
    }

    fn sync_files(&mut self, sync: &SyncSpec) -> Result<(), ExecError> {
        let host = self.host_ident.clone();
        let (address, port) = self.config.address(&host);
        let target = ssh::SshTarget {
            host: address,
            port,
            user: self.config.username(&host),
            key_path: self.config.key_path(&host),
            known_hosts_path: self.config.known_hosts_path(&host),
            allow_unknown_hosts: self.config.allow_unknown_hosts(&host),
            ignore_host_key_change: self.config.ignore_host_key_change(&host),
        };
        ssh::rsync(&target, &sync.src, &sync.dest).map_err(ExecError::Transport)
    }

    /// Renders a local template file and streams the result into
    /// `cat > dest` on the remote side.
    fn push_template(&mut self, action: &Action, template: &TemplateSpec) -> Result<(Vec<u8>, i32), ExecError> {
        let src = self.render_string("template src", &template.src)?;
        let dest = self.render_string("template dest", &template.dest)?;

        let src_path = if std::path::Path::new(&src).is_absolute() {
            std::path::PathBuf::from(&src)
        } else {
            self.config.cwd.join(&src)
        };
        let text = std::fs::read_to_string(&src_path)
            .map_err(|e| ExecError::Template(format!("unable to read template {}: {e}", src_path.display())))?;

        let mut bindings = Mapping::new();
        for (key, value_template) in &template.context {
            let rendered = self.render_value("template context value", value_template)?;
            bindings.insert(key.clone(), rendered);
        }

        let env = minijinja::Environment::new();
        let compiled = env
            .template_from_str(&text)
            .map_err(|e| ExecError::Template(e.to_string()))?;
        let rendered = compiled
            .render(minijinja::Value::from_serialize(&Value::Mapping(bindings)))
            .map_err(|e| ExecError::Template(e.to_string()))?;

        let shell_command = format!("cat > {dest}");
        let argv = self.prefix_elevation(
            action,
            vec![
                self.config.executor.shell_binary.clone(),
                "-c".to_string(),
                shell_command,
            ],
        )?;

        self.run_command(false, Some(rendered.as_bytes()), &argv)
    }

    fn shell_argv(&self, action: &Action) -> Result<Vec<String>, ExecError> {
        let combined = self.render_string("action shell command", &action.shell)?;
        self.prefix_elevation(
            action,
            vec![
                self.config.executor.shell_binary.clone(),
                "-c".to_string(),
                combined,
            ],
        )
    }

    fn exec_argv(&self, action: &Action) -> Result<Vec<String>, ExecError> {
        let mut argv = Vec::with_capacity(action.exec.len());
        for part in &action.exec {
            argv.push(self.render_string("action exec command", part)?);
        }
        self.prefix_elevation(action, argv)
    }

    /// Prepends the sudo/su elevation prefix when requested.
    fn prefix_elevation(&self, action: &Action, argv: Vec<String>) -> Result<Vec<String>, ExecError> {
        if action.sudo {
            let mut prefixed = vec!["sudo".to_string()];
            prefixed.extend(argv);
            return Ok(prefixed);
        }
        if !action.su.is_empty() {
            let su_user = self.render_string("su user", &action.su)?;
            let mut prefixed = vec![
                "sudo".to_string(),
                "-H".to_string(),
                "-u".to_string(),
                su_user,
            ];
            prefixed.extend(argv);
            return Ok(prefixed);
        }
        Ok(argv)
    }

    pub(crate) fn eval_expr(&self, what: &'static str, expression: &str) -> Result<Value, ExecError> {
        crate::eval::evaluate(expression, &self.store_view()).map_err(|source| ExecError::Expr {
            what,
            expr: expression.to_string(),
            source,
        })
    }

    fn render_value(&self, what: &'static str, template: &str) -> Result<Value, ExecError> {
        render::render(template, &self.store_view()).map_err(|source| ExecError::Expr {
            what,
            expr: template.to_string(),
            source,
        })
    }

    fn render_string(&self, what: &'static str, template: &str) -> Result<String, ExecError> {
        Ok(self.render_value(what, template)?.to_display_string())
    }
}
