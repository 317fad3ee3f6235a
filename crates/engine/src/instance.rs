//! Per-host execution state and the sequence iterator.
//!
//! An [`ExecutionInstance`] owns everything one host needs for a run: the
//! transport pair (remote plus local fallback), the four value stores, an
//! explicit stack of sequence frames, and the step counter. The iterator
//! walks the sequence tree one leaf action at a time so the group runner can
//! interleave hosts between steps; when a named sub-sequence frame pops, its
//! accumulated context is written into the parent frame under that name.
//!
//! Exactly one worker touches an instance at a time (the runner hands out
//! `&mut` access per wave), so iteration, execution, and the error slot need
//! no further synchronization.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use smelter_types::{Action, Config, Mapping, PathSeg, Sequence, Store, Value};

use crate::eval::{EvalError, VariableLookup};
use crate::executor::ExecError;
use crate::render;
use crate::transport::{LocalTransport, Transport};

/// One stack frame: a position inside a (sub-)sequence plus its local
/// context store.
pub(crate) struct SeqPos {
    pub name: String,
    pub context: Store,
    pub sequence: Sequence,
    pub position: isize,
}

/// A per-action debug record appended to the instance trail.
#[derive(Debug, Clone, Serialize)]
pub struct ActionTrace {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Context", skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(rename = "Error", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Resolves expression variables against the four per-host stores.
pub(crate) struct StoreView<'a> {
    pub values: &'a Store,
    pub context: &'a Store,
    pub host: &'a Store,
    pub immediate: &'a Store,
}

impl VariableLookup for StoreView<'_> {
    fn lookup(&self, identifier: &str) -> Result<Value, EvalError> {
        if let Some(rest) = identifier.strip_prefix(".Values.") {
            return Ok(self.values.get_path(rest));
        }
        if let Some(rest) = identifier.strip_prefix(".Context.") {
            return Ok(self.context.get_path(rest));
        }
        if let Some(rest) = identifier.strip_prefix(".Host.") {
            return Ok(self.host.get_path(rest));
        }
        // Unprefixed paths address the per-action immediate namespace.
        Ok(self.immediate.get_path(identifier.trim_start_matches('.')))
    }
}

/// Everything one host carries through a run.
pub struct ExecutionInstance {
    pub(crate) host_ident: String,
    pub(crate) config: Arc<Config>,
    pub(crate) values: Arc<Store>,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) local_transport: LocalTransport,
    pub(crate) host_store: Store,
    pub(crate) immediate: Store,
    pub(crate) trail: Vec<ActionTrace>,

    sequence: Sequence,
    total_steps: usize,
    stack: Vec<SeqPos>,
    /// Holds the root frame's context once the stack unwinds, so captured
    /// state stays readable after the run.
    root_context: Store,
    current_step: usize,
    started: bool,
    finished: bool,
    error: Option<ExecError>,
}

impl ExecutionInstance {
    /// Builds an instance for `host_ident`, seeding the host store from the
    /// host's configured context mapping.
    pub fn new(
        sequence: Sequence,
        transport: Box<dyn Transport>,
        config: Arc<Config>,
        values: Arc<Store>,
        host_ident: impl Into<String>,
    ) -> Self {
        let host_ident = host_ident.into();
        let host_store = config
            .hosts
            .get(&host_ident)
            .and_then(|host| host.context.clone())
            .map(Store::from_mapping)
            .unwrap_or_default();

        let total_steps = sequence.count_execution_steps();
        Self {
            host_ident,
            config,
            values,
            transport,
            local_transport: LocalTransport::new(),
            host_store,
            immediate: Store::new(),
            trail: Vec::new(),
            sequence,
            total_steps,
            stack: Vec::new(),
            root_context: Store::new(),
            current_step: 0,
            started: false,
            finished: false,
            error: None,
        }
    }

    pub fn host_ident(&self) -> &str {
        &self.host_ident
    }

    /// True while un-yielded leaf actions remain and no error is set.
    pub fn has_more(&self) -> bool {
        self.error.is_none() && !self.finished && self.current_step < self.total_steps
    }

    pub fn error(&self) -> Option<&ExecError> {
        self.error.as_ref()
    }

    pub fn set_error(&mut self, error: ExecError) {
        self.error = Some(error);
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    /// The context store of the frame currently being executed; after the
    /// run it is the root frame's final context.
    pub(crate) fn current_context(&self) -> &Store {
        match self.stack.last() {
            Some(frame) => &frame.context,
            None => &self.root_context,
        }
    }

    pub(crate) fn current_context_mut(&mut self) -> &mut Store {
        match self.stack.last_mut() {
            Some(frame) => &mut frame.context,
            None => &mut self.root_context,
        }
    }

    /// A read view over the four stores for expression evaluation.
    pub(crate) fn store_view(&self) -> StoreView<'_> {
        StoreView {
            values: &self.values,
            context: self.current_context(),
            host: &self.host_store,
            immediate: &self.immediate,
        }
    }

    /// Snapshot of the current frame's context as a mapping.
    pub fn context_mapping(&self) -> Mapping {
        self.current_context().get_mapping(&[])
    }

    /// Returns the next leaf action, or `None` at end of sequence.
    ///
    /// Descending into an import evaluates the import's `when` gate (a falsy
    /// result skips the whole sub-sequence) and seeds the new frame's
    /// context from the rendered `import.context` mapping.
    pub fn next(&mut self) -> Result<Option<Action>, ExecError> {
        if self.error.is_some() {
            return Ok(None);
        }

        if !self.started {
            self.started = true;
            self.stack.push(SeqPos {
                name: String::new(),
                context: Store::new(),
                sequence: self.sequence.clone(),
                position: 0,
            });
            // The first frame starts at its first action; every later pass
            // through the loop advances the top frame by one.
            return self.advance(true);
        }

        self.advance(false)
    }

    fn advance(&mut self, mut fresh: bool) -> Result<Option<Action>, ExecError> {
        loop {
            if self.stack.is_empty() {
                self.finished = true;
                return Ok(None);
            }

            if !fresh {
                if let Some(top) = self.stack.last_mut() {
                    top.position += 1;
                }
            }
            fresh = false;

            let (position, sequence_len) = match self.stack.last() {
                Some(top) => (top.position, top.sequence.sequence.len() as isize),
                None => continue,
            };

            if position >= sequence_len {
                self.pop_frame()?;
                continue;
            }

            let action = match self.stack.last() {
                Some(top) => top.sequence.sequence[position as usize].clone(),
                None => continue,
            };

            if action.is_leaf() {
                self.current_step += 1;
                return Ok(Some(action));
            }

            // Import: gate on `when` before descending.
            if !self.when_satisfied(&action)? {
                info!(host = %self.host_ident, action = %action.name, "skipping import due to falsy when clause");
                continue;
            }

            let context = self.import_context(&action)?;
            let Some(sub_sequence) = action.sub_sequence.as_deref() else {
                continue;
            };
            self.stack.push(SeqPos {
                name: action.name.clone(),
                context,
                sequence: sub_sequence.clone(),
                position: -1,
            });
        }
    }

    /// Pops the finished frame and, when named, promotes its context into
    /// the parent frame under that name. The root frame's context is kept on
    /// the instance instead.
    fn pop_frame(&mut self) -> Result<(), ExecError> {
        let Some(popped) = self.stack.pop() else {
            return Ok(());
        };
        if self.stack.is_empty() {
            self.root_context = popped.context;
            return Ok(());
        }
        if popped.name.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.stack.last_mut() {
            parent.context.set(
                Value::Mapping(popped.context.get_mapping(&[])),
                &[PathSeg::Key(popped.name)],
            )?;
        }
        Ok(())
    }

    pub(crate) fn when_satisfied(&self, action: &Action) -> Result<bool, ExecError> {
        if action.when.is_empty() {
            return Ok(true);
        }
        Ok(self.eval_expr("when clause", &action.when)?.is_truthy())
    }

    /// Builds the seed context for an imported sub-sequence by rendering
    /// each `import.context` value as a template.
    fn import_context(&self, action: &Action) -> Result<Store, ExecError> {
        let Some(import) = &action.import else {
            return Ok(Store::new());
        };
        let Some(source) = &import.context else {
            return Ok(Store::new());
        };

        let mut mapping = Mapping::new();
        let view = self.store_view();
        for (key, template) in source {
            let rendered = render::render(template, &view).map_err(|source| ExecError::Expr {
                what: "sequence context value",
                expr: format!("{key}: {template}"),
                source,
            })?;
            mapping.insert(key.clone(), rendered);
        }
        Ok(Store::from_mapping(mapping))
    }
}
