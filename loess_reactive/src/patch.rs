#![forbid(unsafe_code)]

//! Path-based patch operations over store state.
//!
//! Store and projection drafts record every mutation as a [`PatchOp`] so the
//! same change can be replayed on the client against the first-state
//! snapshot. The wire encoding is positional: `[path]` deletes, `[path,
//! value]` sets, `[path, value, 1]` inserts into an array. Within a batch,
//! order is significant for array operations.

use serde_json::Value;

/// One segment of a key path: an object key or an array index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathKey {
    /// An object property.
    Key(String),
    /// An array index.
    Index(usize),
}

impl From<&str> for PathKey {
    fn from(value: &str) -> Self {
        PathKey::Key(value.to_owned())
    }
}

impl From<String> for PathKey {
    fn from(value: String) -> Self {
        PathKey::Key(value)
    }
}

impl From<usize> for PathKey {
    fn from(value: usize) -> Self {
        PathKey::Index(value)
    }
}

/// Builds a key path from mixed segments.
///
/// ```
/// # use loess_reactive::{path, PathKey};
/// let p = path!["items", 1];
/// assert_eq!(p, vec![PathKey::from("items"), PathKey::from(1usize)]);
/// ```
#[macro_export]
macro_rules! path {
    ($($seg:expr),* $(,)?) => {
        vec![$($crate::PathKey::from($seg)),*]
    };
}

/// A single recorded mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum PatchOp {
    /// Remove the value at `path`.
    Delete {
        /// Key path of the removed value.
        path: Vec<PathKey>,
    },
    /// Write `value` at `path`.
    Set {
        /// Key path of the written value.
        path: Vec<PathKey>,
        /// The written value.
        value: Value,
    },
    /// Insert `value` into an array; the last path segment is the index.
    Insert {
        /// Key path ending in the insertion index.
        path: Vec<PathKey>,
        /// The inserted value.
        value: Value,
    },
}

fn path_to_value(path: &[PathKey]) -> Value {
    Value::Array(
        path.iter()
            .map(|seg| match seg {
                PathKey::Key(k) => Value::String(k.clone()),
                PathKey::Index(i) => Value::from(*i),
            })
            .collect(),
    )
}

fn path_from_value(value: &Value) -> Option<Vec<PathKey>> {
    value
        .as_array()?
        .iter()
        .map(|seg| match seg {
            Value::String(k) => Some(PathKey::Key(k.clone())),
            Value::Number(n) => n.as_u64().map(|n| PathKey::Index(n as usize)),
            _ => None,
        })
        .collect()
}

impl PatchOp {
    /// The wire encoding of this operation.
    pub fn to_value(&self) -> Value {
        match self {
            PatchOp::Delete { path } => Value::Array(vec![path_to_value(path)]),
            PatchOp::Set { path, value } => {
                Value::Array(vec![path_to_value(path), value.clone()])
            }
            PatchOp::Insert { path, value } => Value::Array(vec![
                path_to_value(path),
                value.clone(),
                Value::from(1),
            ]),
        }
    }

    /// Decodes one operation; length 1 is a delete, 2 a set, 3 an insert.
    pub fn from_value(value: &Value) -> Option<PatchOp> {
        let parts = value.as_array()?;
        let path = path_from_value(parts.first()?)?;
        match parts.len() {
            1 => Some(PatchOp::Delete { path }),
            2 => Some(PatchOp::Set {
                path,
                value: parts[1].clone(),
            }),
            3 => Some(PatchOp::Insert {
                path,
                value: parts[1].clone(),
            }),
            _ => None,
        }
    }
}

/// Encodes a batch of operations for the side channel.
pub fn batch_to_value(ops: &[PatchOp]) -> Value {
    Value::Array(ops.iter().map(PatchOp::to_value).collect())
}

/// Decodes a batch; malformed entries are skipped with a warning.
pub fn batch_from_value(value: &Value) -> Vec<PatchOp> {
    match value.as_array() {
        Some(entries) => entries
            .iter()
            .filter_map(|entry| {
                let op = PatchOp::from_value(entry);
                if op.is_none() {
                    tracing::warn!("skipping malformed patch entry: {entry}");
                }
                op
            })
            .collect(),
        None => {
            tracing::warn!("patch batch was not an array");
            Vec::new()
        }
    }
}

/// Applies a batch to `target`, left to right.
///
/// Replaying the batches a draft emitted, against a structurally-equal
/// starting state, reproduces the draft's final state. A `length` set on an
/// array resizes it, mirroring array-length writes on the producing side.
pub fn apply_patches(target: &mut Value, ops: &[PatchOp]) {
    for op in ops {
        apply_patch(target, op);
    }
}

fn apply_patch(target: &mut Value, op: &PatchOp) {
    let (path, tail) = match op {
        PatchOp::Delete { path }
        | PatchOp::Set { path, .. }
        | PatchOp::Insert { path, .. } => {
            let Some((tail, parents)) = path.split_last() else {
                tracing::warn!("patch with an empty path ignored");
                return;
            };
            (parents, tail)
        }
    };

    let mut current = target;
    for seg in path {
        let next = match (seg, &mut *current) {
            (PathKey::Key(k), Value::Object(map)) => map.get_mut(k),
            (PathKey::Index(i), Value::Array(arr)) => arr.get_mut(*i),
            _ => None,
        };
        match next {
            Some(next) => current = next,
            None => {
                tracing::warn!("patch path missing in target; ignored");
                return;
            }
        }
    }

    match (op, tail, current) {
        (PatchOp::Delete { .. }, PathKey::Key(k), Value::Object(map)) => {
            map.remove(k);
        }
        (PatchOp::Delete { .. }, PathKey::Index(i), Value::Array(arr)) => {
            if *i < arr.len() {
                arr.remove(*i);
            }
        }
        (PatchOp::Set { value, .. }, PathKey::Key(k), Value::Object(map)) => {
            map.insert(k.clone(), value.clone());
        }
        (PatchOp::Set { value, .. }, PathKey::Key(k), Value::Array(arr))
            if k == "length" =>
        {
            if let Some(len) = value.as_u64() {
                arr.resize(len as usize, Value::Null);
            }
        }
        (PatchOp::Set { value, .. }, PathKey::Index(i), Value::Array(arr)) => {
            if *i < arr.len() {
                arr[*i] = value.clone();
            } else {
                arr.resize(*i, Value::Null);
                arr.push(value.clone());
            }
        }
        (PatchOp::Insert { value, .. }, PathKey::Index(i), Value::Array(arr)) => {
            let at = (*i).min(arr.len());
            arr.insert(at, value.clone());
        }
        _ => tracing::warn!("patch did not match target shape; ignored"),
    }
}

/// A recording draft over store state.
///
/// Every mutation both updates the underlying value and appends the
/// corresponding [`PatchOp`]s, with the array shortcuts emitting the same
/// sequences a mirrored applier expects: `shift` one delete at index 0,
/// `unshift` one insert per item in index order, `splice` its deletes at the
/// fixed start index followed by inserts at ascending indices, and
/// `push`/`pop` an element write plus a `length` write.
pub struct StoreDraft<'a> {
    state: &'a mut Value,
    log: &'a mut Vec<PatchOp>,
}

impl<'a> StoreDraft<'a> {
    pub(crate) fn new(state: &'a mut Value, log: &'a mut Vec<PatchOp>) -> Self {
        Self { state, log }
    }

    /// Reads the current draft state.
    pub fn state(&self) -> &Value {
        self.state
    }

    /// Writes `value` at `path`.
    pub fn set(&mut self, path: Vec<PathKey>, value: impl Into<Value>) {
        let value = value.into();
        let op = PatchOp::Set {
            path,
            value,
        };
        apply_patch(self.state, &op);
        self.log.push(op);
    }

    /// Removes the value at `path`.
    pub fn delete(&mut self, path: Vec<PathKey>) {
        let op = PatchOp::Delete { path };
        apply_patch(self.state, &op);
        self.log.push(op);
    }

    /// Inserts `value` into an array; the last path segment is the index.
    pub fn insert(&mut self, path: Vec<PathKey>, value: impl Into<Value>) {
        let op = PatchOp::Insert {
            path,
            value: value.into(),
        };
        apply_patch(self.state, &op);
        self.log.push(op);
    }

    fn array_len(&self, path: &[PathKey]) -> Option<usize> {
        let mut current = &*self.state;
        for seg in path {
            current = match (seg, current) {
                (PathKey::Key(k), Value::Object(map)) => map.get(k)?,
                (PathKey::Index(i), Value::Array(arr)) => arr.get(*i)?,
                _ => return None,
            };
        }
        current.as_array().map(Vec::len)
    }

    /// Appends to the array at `path`: one element write and one `length`
    /// write.
    pub fn push(&mut self, path: Vec<PathKey>, value: impl Into<Value>) {
        let Some(len) = self.array_len(&path) else {
            tracing::warn!("push on a non-array path ignored");
            return;
        };
        let mut element = path.clone();
        element.push(PathKey::Index(len));
        self.set(element, value);
        let mut length = path;
        length.push(PathKey::Key("length".into()));
        self.set(length, len + 1);
    }

    /// Removes the last element: one delete and one `length` write.
    pub fn pop(&mut self, path: Vec<PathKey>) {
        let Some(len) = self.array_len(&path) else {
            tracing::warn!("pop on a non-array path ignored");
            return;
        };
        if len == 0 {
            return;
        }
        let mut element = path.clone();
        element.push(PathKey::Index(len - 1));
        self.delete(element);
        let mut length = path;
        length.push(PathKey::Key("length".into()));
        self.set(length, len - 1);
    }

    /// Removes the first element: a single delete at index 0.
    pub fn shift(&mut self, path: Vec<PathKey>) {
        let mut element = path;
        element.push(PathKey::Index(0));
        self.delete(element);
    }

    /// Prepends `items`: one insert per item, in index order.
    pub fn unshift(
        &mut self,
        path: Vec<PathKey>,
        items: impl IntoIterator<Item = Value>,
    ) {
        for (i, item) in items.into_iter().enumerate() {
            let mut element = path.clone();
            element.push(PathKey::Index(i));
            self.insert(element, item);
        }
    }

    /// Removes `delete_count` elements at `start` and inserts `items` there.
    ///
    /// Deletes all target the same index, since each one shifts the
    /// remaining elements left; inserts follow at ascending indices.
    pub fn splice(
        &mut self,
        path: Vec<PathKey>,
        start: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = Value>,
    ) {
        for _ in 0..delete_count {
            let mut element = path.clone();
            element.push(PathKey::Index(start));
            self.delete(element);
        }
        for (i, item) in items.into_iter().enumerate() {
            let mut element = path.clone();
            element.push(PathKey::Index(start + i));
            self.insert(element, item);
        }
    }
}
