//! Layered YAML configuration merging.
//!
//! Config files stack in order of occurrence: mappings merge structurally,
//! scalars and sequences from a later file replace earlier values, and a
//! later file changing a mapping into a non-mapping is rejected. The merged
//! tree is re-serialized so the caller can unmarshal it into its schema.

use std::path::Path;

use serde_yaml::mapping::Entry;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StackError {
    #[error("unable to read file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("problem parsing yaml in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("layer changes mapping to non-mapping at key {0}")]
    TypeChange(String),
    #[error("unable to serialize merged configuration: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// Merges the YAML documents at `paths` in order and returns the merged tree
/// re-serialized as YAML text.
pub fn stack_yaml_files(paths: &[impl AsRef<Path>]) -> Result<String, StackError> {
    let mut base = Mapping::new();
    for path in paths {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| StackError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let layer: Mapping = if text.trim().is_empty() {
            Mapping::new()
        } else {
            serde_yaml::from_str(&text).map_err(|source| StackError::Yaml {
                path: path.display().to_string(),
                source,
            })?
        };
        stack_mapping(&mut base, layer, &mut Vec::new())?;
    }
    Ok(serde_yaml::to_string(&Value::Mapping(base))?)
}

/// Merges `top` onto `base` in place. `key_path` tracks the position for
/// type-change diagnostics.
fn stack_mapping(base: &mut Mapping, top: Mapping, key_path: &mut Vec<String>) -> Result<(), StackError> {
    for (key, value) in top {
        let key_name = key.as_str().map(str::to_string).unwrap_or_else(|| format!("{key:?}"));
        match base.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(mut slot) => {
                if let Value::Mapping(base_child) = slot.get_mut() {
                    match value {
                        Value::Mapping(top_child) => {
                            key_path.push(key_name);
                            stack_mapping(base_child, top_child, key_path)?;
                            key_path.pop();
                        }
                        _ => {
                            key_path.push(key_name);
                            return Err(StackError::TypeChange(key_path.join(".")));
                        }
                    }
                } else {
                    *slot.get_mut() = value;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn merge(layers: &[&str]) -> Result<serde_yaml::Value, StackError> {
        let files: Vec<NamedTempFile> = layers.iter().map(|text| yaml_file(text)).collect();
        let paths: Vec<&Path> = files.iter().map(|f| f.path()).collect();
        let merged = stack_yaml_files(&paths)?;
        Ok(serde_yaml::from_str(&merged).unwrap())
    }

    #[test]
    fn mappings_merge_structurally() {
        let merged = merge(&["a:\n  x: 1\n", "a:\n  y: 2\n"]).unwrap();
        assert_eq!(merged["a"]["x"], serde_yaml::Value::from(1));
        assert_eq!(merged["a"]["y"], serde_yaml::Value::from(2));
    }

    #[test]
    fn scalars_are_replaced_by_later_layers() {
        let merged = merge(&["a: 1\n", "a: 2\n"]).unwrap();
        assert_eq!(merged["a"], serde_yaml::Value::from(2));
    }

    #[test]
    fn sequences_are_never_merged() {
        let merged = merge(&["xs: [1, 2, 3]\n", "xs: [9]\n"]).unwrap();
        let xs = merged["xs"].as_sequence().unwrap();
        assert_eq!(xs.len(), 1);
    }

    #[test]
    fn mapping_to_non_mapping_is_a_type_change_error() {
        let err = merge(&["a:\n  x: 1\n", "a: [1, 2]\n"]).unwrap_err();
        assert!(matches!(err, StackError::TypeChange(path) if path == "a"));
    }

    #[test]
    fn nested_type_change_reports_full_path() {
        let err = merge(&["a:\n  b:\n    c: 1\n", "a:\n  b: scalar\n"]).unwrap_err();
        assert!(matches!(err, StackError::TypeChange(path) if path == "a.b"));
    }

    #[test]
    fn empty_layers_are_tolerated() {
        let merged = merge(&["", "a: 1\n"]).unwrap();
        assert_eq!(merged["a"], serde_yaml::Value::from(1));
    }
}
