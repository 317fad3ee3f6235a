//! The embedded expression language.
//!
//! Expressions parameterize conditional gates (`when`, `failWhen`,
//! `until.condition`), iteration sources, and template placeholders. An
//! expression goes through three phases before evaluation:
//!
//! 1. **Grouping**: a linear scan splits the text into quoted strings,
//!    balanced parenthesis groups, and unqualified spans ([`group`]).
//! 2. **Tokenization**: unqualified spans are scanned into operator,
//!    number, variable, and identifier tokens; an identifier followed by a
//!    parenthesis group is rectified into a function call ([`token`]).
//! 3. **Evaluation**: precedence-aware left-to-right reduction with
//!    short-circuiting logical operators ([`ops`]), dispatching calls to the
//!    registered function table ([`functions`]).
//!
//! Variable identifiers beginning with `.Values.`, `.Context.`, or `.Host.`
//! address the corresponding store; any other leading-dot path resolves
//! against the per-action immediate namespace. Missing lookups produce
//! [`Value::Absent`], which is falsy and equal only to itself.

use thiserror::Error;

use smelter_types::Value;

pub mod functions;
pub mod group;
pub mod ops;
pub mod token;

/// Errors raised while parsing or evaluating an expression.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("error with function \"{name}\": {message}")]
    Call { name: String, message: String },
}

impl EvalError {
    pub(crate) fn call(name: &str, message: impl Into<String>) -> Self {
        EvalError::Call {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

/// Resolves variable identifiers to values during evaluation.
///
/// The identifier arrives verbatim, prefix included (`.Values.a.b`,
/// `.Context.build.stdout`, `.item`); implementations decide which store
/// backs it. A missing path must yield [`Value::Absent`], not an error.
pub trait VariableLookup {
    fn lookup(&self, identifier: &str) -> Result<Value, EvalError>;
}

/// A lookup with no variables at all; every identifier is absent.
pub struct NoVariables;

impl VariableLookup for NoVariables {
    fn lookup(&self, _identifier: &str) -> Result<Value, EvalError> {
        Ok(Value::Absent)
    }
}

/// Parses and evaluates `expression` against `lookup`.
pub fn evaluate(expression: &str, lookup: &dyn VariableLookup) -> Result<Value, EvalError> {
    let root = token::tokenize(expression)?;
    ops::evaluate_tokens(&root.children, lookup)
}
