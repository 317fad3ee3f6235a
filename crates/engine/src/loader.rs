//! Sequence file loading.
//!
//! Reads a sequence YAML file, rewrites `{{ }}` template delimiters to the
//! engine's `<! !>` form, unmarshals and validates it, then recursively
//! loads imported sub-sequences. Import paths resolve against the recipe
//! root, and a seen-set rejects import cycles.

use std::path::{Path, PathBuf};

use thiserror::Error;

use smelter_types::sequence::ValidateError;
use smelter_types::Sequence;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unable to read sequence file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sequence file {path} contained bad yaml data: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("sequence file {path}: {source}")]
    Validate {
        path: String,
        #[source]
        source: ValidateError,
    },
    #[error("import cycle detected at {0}")]
    ImportCycle(String),
}

/// Loads the sequence at `filename`, resolving imports relative to
/// `recipe_root`.
pub fn load_sequence(recipe_root: &Path, filename: &Path) -> Result<Sequence, LoadError> {
    let mut seen = Vec::new();
    load_sequence_inner(recipe_root, filename, &mut seen)
}

fn load_sequence_inner(
    recipe_root: &Path,
    filename: &Path,
    seen: &mut Vec<PathBuf>,
) -> Result<Sequence, LoadError> {
    let resolved = if filename.is_absolute() {
        filename.to_path_buf()
    } else {
        recipe_root.join(filename)
    };
    let canonical = resolved.canonicalize().unwrap_or_else(|_| resolved.clone());
    if seen.contains(&canonical) {
        return Err(LoadError::ImportCycle(resolved.display().to_string()));
    }
    seen.push(canonical);

    let result = load_validated(recipe_root, &resolved, seen);
    seen.pop();
    result
}

fn load_validated(
    recipe_root: &Path,
    resolved: &Path,
    seen: &mut Vec<PathBuf>,
) -> Result<Sequence, LoadError> {
    let text = std::fs::read_to_string(resolved).map_err(|source| LoadError::Io {
        path: resolved.display().to_string(),
        source,
    })?;
    let rewritten = rewrite_delimiters(&text);

    let mut sequence: Sequence = serde_yaml::from_str(&rewritten).map_err(|source| LoadError::Yaml {
        path: resolved.display().to_string(),
        source,
    })?;
    sequence.filename = resolved.to_path_buf();
    sequence.validate().map_err(|source| LoadError::Validate {
        path: resolved.display().to_string(),
        source,
    })?;

    for action in &mut sequence.sequence {
        if let Some(import) = &action.import {
            let import_path = PathBuf::from(&import.path);
            let mut sub = load_sequence_inner(recipe_root, &import_path, seen)?;
            // The frame is addressed by the importing action's name.
            sub.name = action.name.clone();
            action.sub_sequence = Some(Box::new(sub));
        }
    }

    Ok(sequence)
}

/// Rewrites moustache delimiters so the expression grammar is independent of
/// YAML's `{{ }}` convention.
pub(crate) fn rewrite_delimiters(text: &str) -> String {
    text.replace("{{", "<!").replace("}}", "!>")
}
