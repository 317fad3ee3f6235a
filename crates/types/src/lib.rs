//! smelter-types: shared data model for the smelter recipe engine.
//!
//! Holds the dynamic [`value::Value`] tree, the namespaced [`store::Store`]
//! built on it, and the serde models for recipes, sequences, and run
//! configuration. The execution engine lives in `smelter-engine`.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod recipe;
pub mod sequence;
pub mod store;
pub mod value;

pub use config::{ApplyDefaults, Config, ExecutorConfig, HostConfig, SshConfig, UserInfo};
pub use recipe::Recipe;
pub use sequence::{Action, ImportSpec, Pause, Sequence, SyncSpec, TemplateSpec, Until};
pub use store::{parse_namespace, PathSeg, Store, StoreError};
pub use value::{Mapping, Value};
