//! RFC 6901 JSON Pointer algebra and an RFC 6902 `add`/`replace`/`remove`
//! patch-apply subset.
//!
//! Grounded on `idubrov-json-patch`'s `split_pointer`/`add`/`remove` shape:
//! a hand-written error enum implementing `Error`/`Display`, no `thiserror`,
//! pointers escaped per RFC 6901 (`~1` -> `/`, `~0` -> `~`).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error produced while splitting, joining or resolving a pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerError {
    /// A pointer segment was not prefixed with `/`.
    MalformedPointer(String),
    /// The pointer did not resolve to any node in the document.
    NotFound(String),
}

impl fmt::Display for PointerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointerError::MalformedPointer(p) => write!(f, "malformed pointer: {p}"),
            PointerError::NotFound(p) => write!(f, "pointer not found: {p}"),
        }
    }
}

impl std::error::Error for PointerError {}

/// Error produced while applying a patch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    Pointer(PointerError),
    UnknownOp(String),
    NonStringPath,
    MissingValue,
    IndexOutOfRange { index: String, len: usize },
    InvalidParent,
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchError::Pointer(inner) => write!(f, "{inner}"),
            PatchError::UnknownOp(op) => write!(f, "unknown patch op: {op}"),
            PatchError::NonStringPath => write!(f, "patch path must be a string"),
            PatchError::MissingValue => write!(f, "missing `value` for add/replace"),
            PatchError::IndexOutOfRange { index, len } => {
                write!(f, "index {index} out of range for list of length {len}")
            }
            PatchError::InvalidParent => write!(f, "parent container cannot hold this key"),
        }
    }
}

impl std::error::Error for PatchError {}

impl From<PointerError> for PatchError {
    fn from(e: PointerError) -> Self {
        PatchError::Pointer(e)
    }
}

/// Splits a JSON pointer (`"/a/0/b"`) into its unescaped segments
/// (`["a", "0", "b"]`). The root pointer (`""`) splits to an empty vec.
pub fn split(pointer: &str) -> Result<Vec<String>, PointerError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    if !pointer.starts_with('/') {
        return Err(PointerError::MalformedPointer(pointer.to_owned()));
    }
    Ok(pointer[1..]
        .split('/')
        .map(|seg| seg.replace("~1", "/").replace("~0", "~"))
        .collect())
}

/// Joins segments into a pointer string, escaping each segment.
#[must_use]
pub fn join(segments: &[String]) -> String {
    let mut out = String::new();
    for seg in segments {
        out.push('/');
        out.push_str(&escape(seg));
    }
    out
}

/// Escapes one raw segment for use in a pointer: `~` -> `~0`, `/` -> `~1`.
#[must_use]
pub fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Resolves a pointer against a document, returning the referenced node.
pub fn resolve<'a>(doc: &'a Value, pointer: &str) -> Result<&'a Value, PointerError> {
    let segments = split(pointer)?;
    let mut node = doc;
    for seg in &segments {
        node = match node {
            Value::Object(map) => map
                .get(seg)
                .ok_or_else(|| PointerError::NotFound(pointer.to_owned()))?,
            Value::Array(list) => {
                let idx: usize = seg
                    .parse()
                    .map_err(|_| PointerError::NotFound(pointer.to_owned()))?;
                list.get(idx).ok_or_else(|| PointerError::NotFound(pointer.to_owned()))?
            }
            _ => return Err(PointerError::NotFound(pointer.to_owned())),
        };
    }
    Ok(node)
}

/// One RFC 6902 operation, restricted to the `add`/`replace`/`remove` subset
/// spec.md §4.A supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
}

impl PatchOp {
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            PatchOp::Add { path, .. } | PatchOp::Replace { path, .. } | PatchOp::Remove { path } => path,
        }
    }
}

/// Applies a left-to-right, in-place sequence of patch operations to `doc`,
/// returning the (possibly replaced) document root.
pub fn apply(doc: &mut Value, ops: &[PatchOp]) -> Result<Value, PatchError> {
    let mut root = std::mem::take(doc);
    for op in ops {
        root = apply_one(root, op)?;
    }
    Ok(root)
}

fn apply_one(root: Value, op: &PatchOp) -> Result<Value, PatchError> {
    match op {
        PatchOp::Add { path, value } => add(root, path, value.clone()),
        PatchOp::Replace { path, value } => replace(root, path, value.clone()),
        PatchOp::Remove { path } => remove(root, path),
    }
}

fn is_root(path: &str) -> bool {
    path.is_empty() || path == "/"
}

fn split_parent(pointer: &str) -> Result<(String, String), PointerError> {
    let mut segments = split(pointer)?;
    let last = segments
        .pop()
        .ok_or_else(|| PointerError::MalformedPointer(pointer.to_owned()))?;
    Ok((join(&segments), last))
}

fn add(mut root: Value, path: &str, value: Value) -> Result<Value, PatchError> {
    if is_root(path) {
        return Ok(value);
    }
    let (parent_ptr, key) = split_parent(path)?;
    let parent = resolve_mut(&mut root, &parent_ptr)?;
    match parent {
        Value::Object(map) => {
            map.insert(key, value);
        }
        Value::Array(list) => {
            if key == "-" {
                list.push(value);
            } else {
                let idx: usize = key.parse().map_err(|_| PatchError::IndexOutOfRange {
                    index: key.clone(),
                    len: list.len(),
                })?;
                if idx > list.len() {
                    return Err(PatchError::IndexOutOfRange { index: key, len: list.len() });
                }
                list.insert(idx, value);
            }
        }
        _ => return Err(PatchError::InvalidParent),
    }
    Ok(root)
}

fn replace(mut root: Value, path: &str, value: Value) -> Result<Value, PatchError> {
    if is_root(path) {
        return Ok(value);
    }
    let (parent_ptr, key) = split_parent(path)?;
    let parent = resolve_mut(&mut root, &parent_ptr)?;
    match parent {
        Value::Object(map) => {
            if !map.contains_key(&key) {
                return Err(PatchError::Pointer(PointerError::NotFound(path.to_owned())));
            }
            map.insert(key, value);
        }
        Value::Array(list) => {
            let idx: usize = key.parse().map_err(|_| PatchError::IndexOutOfRange {
                index: key.clone(),
                len: list.len(),
            })?;
            let len = list.len();
            let slot = list
                .get_mut(idx)
                .ok_or_else(|| PatchError::IndexOutOfRange { index: key.clone(), len })?;
            *slot = value;
        }
        _ => return Err(PatchError::InvalidParent),
    }
    Ok(root)
}

fn remove(mut root: Value, path: &str) -> Result<Value, PatchError> {
    if is_root(path) {
        return Ok(Value::Null);
    }
    let (parent_ptr, key) = split_parent(path)?;
    let parent = resolve_mut(&mut root, &parent_ptr)?;
    match parent {
        Value::Object(map) => {
            map.remove(&key).ok_or_else(|| PatchError::Pointer(PointerError::NotFound(path.to_owned())))?;
        }
        Value::Array(list) => {
            let idx: usize = key.parse().map_err(|_| PatchError::IndexOutOfRange {
                index: key.clone(),
                len: list.len(),
            })?;
            if idx >= list.len() {
                return Err(PatchError::IndexOutOfRange { index: key, len: list.len() });
            }
            list.remove(idx);
        }
        _ => return Err(PatchError::InvalidParent),
    }
    Ok(root)
}

fn resolve_mut<'a>(doc: &'a mut Value, pointer: &str) -> Result<&'a mut Value, PatchError> {
    let segments = split(pointer).map_err(PatchError::Pointer)?;
    let mut node = doc;
    for seg in &segments {
        node = match node {
            Value::Object(map) => map
                .get_mut(seg)
                .ok_or_else(|| PatchError::Pointer(PointerError::NotFound(pointer.to_owned())))?,
            Value::Array(list) => {
                let idx: usize = seg
                    .parse()
                    .map_err(|_| PatchError::Pointer(PointerError::NotFound(pointer.to_owned())))?;
                list.get_mut(idx)
                    .ok_or_else(|| PatchError::Pointer(PointerError::NotFound(pointer.to_owned())))?
            }
            _ => return Err(PatchError::InvalidParent),
        };
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn split_join_round_trip() {
        let segs = split("/a~1b/0/c~0d").unwrap();
        assert_eq!(segs, vec!["a/b", "0", "c~d"]);
        assert_eq!(join(&segs), "/a~1b/0/c~0d");
    }

    #[test]
    fn split_root_is_empty() {
        assert_eq!(split("").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn resolve_walks_objects_and_arrays() {
        let doc = json!({"a": [1, {"b": 2}]});
        assert_eq!(resolve(&doc, "/a/1/b").unwrap(), &json!(2));
    }

    #[test]
    fn add_appends_with_dash() {
        let mut doc = json!({"xs": [1, 2]});
        let ops = vec![PatchOp::Add { path: "/xs/-".to_owned(), value: json!(3) }];
        let root = apply(&mut doc, &ops).unwrap();
        assert_eq!(root, json!({"xs": [1, 2, 3]}));
    }

    #[test]
    fn add_inserts_at_index() {
        let mut doc = json!({"xs": [1, 3]});
        let ops = vec![PatchOp::Add { path: "/xs/1".to_owned(), value: json!(2) }];
        let root = apply(&mut doc, &ops).unwrap();
        assert_eq!(root, json!({"xs": [1, 2, 3]}));
    }

    #[test]
    fn add_to_existing_key_overwrites() {
        let mut doc = json!({"a": 1});
        let ops = vec![PatchOp::Add { path: "/a".to_owned(), value: json!(2) }];
        let root = apply(&mut doc, &ops).unwrap();
        assert_eq!(root, json!({"a": 2}));
    }

    #[test]
    fn remove_from_list_shifts_down() {
        let mut doc = json!({"xs": [1, 2, 3]});
        let ops = vec![PatchOp::Remove { path: "/xs/1".to_owned() }];
        let root = apply(&mut doc, &ops).unwrap();
        assert_eq!(root, json!({"xs": [1, 3]}));
    }

    #[test]
    fn root_replacement() {
        let mut doc = json!({"a": 1});
        let ops = vec![PatchOp::Replace { path: String::new(), value: json!({"b": 2}) }];
        let root = apply(&mut doc, &ops).unwrap();
        assert_eq!(root, json!({"b": 2}));
    }

    #[test]
    fn out_of_range_index_errors() {
        let mut doc = json!({"xs": [1]});
        let ops = vec![PatchOp::Replace { path: "/xs/5".to_owned(), value: json!(9) }];
        assert!(matches!(apply(&mut doc, &ops), Err(PatchError::IndexOutOfRange { .. })));
    }

    #[test]
    fn disjoint_patches_commute() {
        let base = json!({"a": 1, "b": {"c": 2}});
        let p = PatchOp::Replace { path: "/a".to_owned(), value: json!(10) };
        let q = PatchOp::Replace { path: "/b/c".to_owned(), value: json!(20) };

        let mut doc1 = base.clone();
        let r1 = apply(&mut doc1, &[p.clone(), q.clone()]).unwrap();

        let mut doc2 = base;
        let r2 = apply(&mut doc2, &[q, p]).unwrap();

        assert_eq!(r1, r2);
    }
}
