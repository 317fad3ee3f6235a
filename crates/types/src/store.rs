//! The layered value store.
//!
//! A store is a rooted tree whose interior nodes are string-keyed mappings
//! and whose leaves are any [`Value`]. Four of these live per host during a
//! run (Values, Host, Context, Immediate); they also back expression variable
//! lookup and the values-file overlay chain.

use thiserror::Error;

use crate::value::{Mapping, Value};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Writing through an interior node that is not a mapping.
    #[error("cannot set below non-mapping node at '{0}'")]
    SetCollision(String),
    /// An index segment was applied where no sequence exists.
    #[error("cannot index into non-sequence node at '{0}'")]
    BadIndex(String),
}

/// One segment of a namespace path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    Key(String),
    Index(usize),
}

impl From<&str> for PathSeg {
    fn from(s: &str) -> Self {
        PathSeg::Key(s.to_string())
    }
}

impl From<usize> for PathSeg {
    fn from(i: usize) -> Self {
        PathSeg::Index(i)
    }
}

/// Splits a dotted namespace string into path segments.
///
/// Dots separate keys; a trailing `[N]` (repeatable) indexes into sequences:
/// `servers[0].address` becomes `Key(servers), Index(0), Key(address)`.
pub fn parse_namespace(input: &str) -> Vec<PathSeg> {
    let mut segments = Vec::new();
    for part in input.split('.') {
        if part.is_empty() {
            continue;
        }
        let (key, indices) = split_indices(part);
        if !key.is_empty() {
            segments.push(PathSeg::Key(key.to_string()));
        }
        for index in indices {
            segments.push(PathSeg::Index(index));
        }
    }
    segments
}

fn split_indices(segment: &str) -> (&str, Vec<usize>) {
    let bytes = segment.as_bytes();
    let key_end = bytes.iter().position(|&b| b == b'[').unwrap_or(segment.len());
    let mut indices = Vec::new();
    let mut i = key_end;
    while i < bytes.len() && bytes[i] == b'[' {
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i] != b']' {
            i += 1;
        }
        if i <= start {
            break;
        }
        if let Ok(n) = segment[start..i].parse::<usize>() {
            indices.push(n);
        }
        i += 1;
    }
    (&segment[..key_end], indices)
}

/// A mutable value tree with namespaced access and leaf-biased overlay.
#[derive(Debug, Clone, Default)]
pub struct Store {
    root: Mapping,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_mapping(mapping: Mapping) -> Self {
        Self { root: mapping }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Reads the value at `path`, returning [`Value::Absent`] when any
    /// segment is missing or typed wrong for the traversal.
    pub fn get(&self, path: &[PathSeg]) -> Value {
        if path.is_empty() {
            return Value::Mapping(self.root.clone());
        }
        let mut current = match path.first() {
            Some(PathSeg::Key(key)) => match self.root.get(key) {
                Some(v) => v,
                None => return Value::Absent,
            },
            _ => return Value::Absent,
        };
        for segment in &path[1..] {
            current = match (segment, current) {
                (PathSeg::Key(key), Value::Mapping(map)) => match map.get(key) {
                    Some(v) => v,
                    None => return Value::Absent,
                },
                (PathSeg::Index(index), Value::Sequence(items)) => match items.get(*index) {
                    Some(v) => v,
                    None => return Value::Absent,
                },
                _ => return Value::Absent,
            };
        }
        current.clone()
    }

    /// Convenience lookup through a dotted namespace string.
    pub fn get_path(&self, namespace: &str) -> Value {
        self.get(&parse_namespace(namespace))
    }

    /// Writes `value` at `path`, creating intermediate mappings as needed.
    /// Traversing through an existing non-mapping interior node is a
    /// set-collision error.
    pub fn set(&mut self, value: Value, path: &[PathSeg]) -> Result<(), StoreError> {
        let Some((last, interior)) = path.split_last() else {
            return match value {
                Value::Mapping(map) => {
                    self.root = map;
                    Ok(())
                }
                _ => Err(StoreError::SetCollision("<root>".to_string())),
            };
        };

        let mut current = &mut self.root;
        let mut walked = String::new();
        for segment in interior {
            match segment {
                PathSeg::Key(key) => {
                    if !walked.is_empty() {
                        walked.push('.');
                    }
                    walked.push_str(key);
                    let slot = current
                        .entry(key.clone())
                        .or_insert_with(|| Value::Mapping(Mapping::new()));
                    match slot {
                        Value::Mapping(map) => current = map,
                        _ => return Err(StoreError::SetCollision(walked)),
                    }
                }
                PathSeg::Index(_) => return Err(StoreError::BadIndex(walked)),
            }
        }

        match last {
            PathSeg::Key(key) => {
                current.insert(key.clone(), value);
                Ok(())
            }
            PathSeg::Index(_) => Err(StoreError::BadIndex(walked)),
        }
    }

    /// Returns the mapping at `path` by value; an empty mapping when the node
    /// is missing or not a mapping. Callers get a copy, never an alias.
    pub fn get_mapping(&self, path: &[PathSeg]) -> Mapping {
        match self.get(path) {
            Value::Mapping(map) => map,
            _ => Mapping::new(),
        }
    }

    /// Exposes the whole tree as a mapping value.
    pub fn to_value(&self) -> Value {
        Value::Mapping(self.root.clone())
    }

    /// Leaf-biased overlay: for every leaf reachable in `other`, the result
    /// holds `other`'s value; mappings present on both sides merge
    /// recursively; a non-mapping on either side replaces wholesale.
    pub fn overlay(&self, other: &Store) -> Store {
        let mut merged = self.root.clone();
        overlay_mapping(&mut merged, &other.root);
        Store { root: merged }
    }
}

fn overlay_mapping(base: &mut Mapping, top: &Mapping) {
    for (key, value) in top {
        match (base.get_mut(key), value) {
            (Some(Value::Mapping(base_child)), Value::Mapping(top_child)) => {
                overlay_mapping(base_child, top_child);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}
