//! Recipe metadata and its naming grammar.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;

static RECIPE_NAME_VALIDATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z_0-9]*$").expect("static pattern"));
static SEQUENCE_KEY_VALIDATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]+$").expect("static pattern"));
static VERSION_VALIDATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d\.\d\.\d(\.[0-9a-z]+)?$").expect("static pattern"));

/// Recipe metadata, the contents of `recipe.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Recipe {
    pub version: String,
    pub name: String,
    pub description: String,
    /// Public sequence name to sequence file path, relative to the recipe
    /// directory.
    pub sequences: IndexMap<String, String>,
}

/// Lowercase alphanumeric plus underscore, starting with a letter.
pub fn is_valid_recipe_name(name: &str) -> bool {
    RECIPE_NAME_VALIDATOR.is_match(name)
}

/// Public sequence keys are lowercase letters only.
pub fn is_valid_sequence_key(key: &str) -> bool {
    SEQUENCE_KEY_VALIDATOR.is_match(key)
}

/// `<maj>.<min>.<patch>` with an optional lowercase alphanumeric extra.
pub fn is_valid_version(version: &str) -> bool {
    VERSION_VALIDATOR.is_match(version)
}
