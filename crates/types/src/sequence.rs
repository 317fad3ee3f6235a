//! Sequence and action data model.
//!
//! These types mirror the sequence YAML structure exactly. Expression strings
//! (`when`, `iterate`, `until.condition`, …) are kept verbatim and evaluated
//! by the engine at run time; `subSequence` is populated by the loader when
//! an `import` is resolved.

use std::path::PathBuf;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

static NAME_VALIDATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static pattern"));

/// Returns true when `name` is a legal action or sequence name.
pub fn is_valid_name(name: &str) -> bool {
    NAME_VALIDATOR.is_match(name)
}

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("name \"{0}\" is invalid, must contain only letters, numbers or underscores and cannot begin with a number")]
    BadName(String),
    #[error("action \"{0}\" declares more than one payload (exec, shell, sync, template, import)")]
    MultiplePayloads(String),
    #[error("action \"{0}\" sets stdin without an exec or shell payload")]
    StdinWithoutCommand(String),
    #[error("action \"{0}\" iterates without an inner action")]
    IterateWithoutAction(String),
}

/// Retry settings: re-run the action until the condition holds.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Until {
    /// Seconds to pause between attempts while the condition is unmet.
    pub pause_interval: f64,
    /// Attempt budget; exhausting it fails the action.
    pub max_attempts: u32,
    /// Expression which must become truthy to stop.
    pub condition: String,
}

/// Sleep before and/or after the action, in seconds.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Pause {
    pub before: f64,
    pub after: f64,
}

/// File-sync payload: push local resources to a remote destination.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncSpec {
    pub src: String,
    pub dest: String,
    // Preservation flags are parsed but reserved; they are not yet wired
    // into the sync invocation.
    pub preserve_owner: bool,
    pub preserve_perms: bool,
    pub preserve_group: bool,
}

/// Template payload: render a local template file to a remote path.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TemplateSpec {
    pub src: String,
    pub dest: String,
    /// Extra bindings for the template; each value is itself templated.
    pub context: IndexMap<String, String>,
}

/// Import payload: splice another sequence file in as a sub-sequence.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImportSpec {
    /// Path relative to the recipe root.
    pub path: String,
    /// Seed context for the imported sequence; values are templated.
    pub context: Option<IndexMap<String, String>>,
}

/// One unit of intent within a sequence.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Action {
    /// Optional name; named actions retain their captured output in the
    /// run context, addressable from later expressions.
    pub name: String,
    pub description: String,
    /// Expression yielding a sequence; the inner `action` runs per element.
    pub iterate: String,
    pub import: Option<ImportSpec>,
    /// Gate expression; a falsy result skips the action (or whole import).
    pub when: String,
    /// Expression which, when truthy after execution, fails the action.
    pub fail_when: String,
    /// Suppresses the non-zero exit code failure for this action.
    pub ignore_exit_code: bool,
    pub until: Option<Until>,
    /// Inner action executed per iteration element.
    pub action: Option<Box<Action>>,
    /// Parse captured stdout as JSON into the immediate `json` key.
    pub parse_json: bool,
    /// Parse captured stdout as YAML into the immediate `yaml` key.
    pub parse_yaml: bool,
    /// Run the command as this user via sudo; templated.
    pub su: String,
    /// Run the command as root.
    pub sudo: bool,
    /// Populated by the loader when `import` resolves.
    #[serde(skip)]
    pub sub_sequence: Option<Box<Sequence>>,
    /// Execute on the local machine instead of the target host.
    pub local: bool,
    pub pause: Option<Pause>,

    /// Rendered and piped to the command; exec/shell only.
    pub stdin: String,
    /// Argv-form command; each element is templated.
    pub exec: Vec<String>,
    /// Shell command string, run through the configured shell binary.
    pub shell: String,
    pub sync: Option<SyncSpec>,
    pub template: Option<TemplateSpec>,
}

impl Action {
    /// True when this action yields an execution step itself rather than
    /// splicing in a sub-sequence.
    pub fn is_leaf(&self) -> bool {
        self.sub_sequence.is_none()
    }

    fn payload_count(&self) -> usize {
        usize::from(!self.exec.is_empty())
            + usize::from(!self.shell.is_empty())
            + usize::from(self.sync.is_some())
            + usize::from(self.template.is_some())
            + usize::from(self.import.is_some())
    }

    pub fn validate(&self) -> Result<(), ValidateError> {
        if !self.name.is_empty() && !is_valid_name(&self.name) {
            return Err(ValidateError::BadName(self.name.clone()));
        }
        if self.payload_count() > 1 {
            return Err(ValidateError::MultiplePayloads(self.display_name()));
        }
        if !self.stdin.is_empty() && self.exec.is_empty() && self.shell.is_empty() {
            return Err(ValidateError::StdinWithoutCommand(self.display_name()));
        }
        if !self.iterate.is_empty() && self.action.is_none() {
            return Err(ValidateError::IterateWithoutAction(self.display_name()));
        }
        if let Some(inner) = &self.action {
            inner.validate()?;
        }
        Ok(())
    }

    fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.description.clone()
        } else {
            self.name.clone()
        }
    }
}

/// An ordered list of actions, possibly containing sub-sequence imports.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Sequence {
    pub name: String,
    pub description: String,
    pub sequence: Vec<Action>,
    #[serde(skip)]
    pub filename: PathBuf,
}

impl Sequence {
    pub fn validate(&self) -> Result<(), ValidateError> {
        if !self.name.is_empty() && !is_valid_name(&self.name) {
            return Err(ValidateError::BadName(self.name.clone()));
        }
        for action in &self.sequence {
            action.validate()?;
        }
        Ok(())
    }

    /// Total leaf actions across this sequence and its imports; the number of
    /// actions the execution iterator will yield.
    pub fn count_execution_steps(&self) -> usize {
        self.sequence
            .iter()
            .map(|action| match &action.sub_sequence {
                Some(sub) => sub.count_execution_steps(),
                None => 1,
            })
            .sum()
    }
}
