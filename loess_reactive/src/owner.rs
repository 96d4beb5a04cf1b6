#![forbid(unsafe_code)]
use crate::runtime::Runtime;
use loess_error::NoOwnerError;
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};

slotmap::new_key_type! {
    /// Unique ID assigned to an [`Owner`].
    pub struct OwnerKey;
}

pub(crate) struct OwnerState {
    pub wire_id: String,
    pub child_count: usize,
    pub parent: Option<OwnerKey>,
    pub children: Vec<OwnerKey>,
    pub cleanups: Vec<Box<dyn FnOnce()>>,
    pub contexts: FxHashMap<TypeId, Box<dyn Any>>,
    pub nodes: Vec<crate::node::NodeId>,
    pub snapshot_scope: bool,
}

impl OwnerState {
    pub(crate) fn new_detached(wire_id: String) -> Self {
        Self::new(wire_id, None)
    }

    fn new(wire_id: String, parent: Option<OwnerKey>) -> Self {
        Self {
            wire_id,
            child_count: 0,
            parent,
            children: Vec::new(),
            cleanups: Vec::new(),
            contexts: FxHashMap::default(),
            nodes: Vec::new(),
            snapshot_scope: false,
        }
    }
}

/// A node in the ownership tree.
///
/// Owners manage memory and identity within the reactive system. Each owner
/// carries a string id; the ids of its children are formed by appending the
/// child's index, so that the k-th primitive created under an owner receives
/// the same id on every execution of that owner's body. This is the contract
/// that lets server HTML and client DOM be reconciled without an explicit
/// DOM path scheme.
///
/// When an owner is disposed, its cleanup functions run and the signals,
/// memos, and effects registered to it no longer exist. Disposal always
/// resets the child counter, so re-executing the same owner regenerates an
/// identical id sequence.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Owner {
    pub(crate) key: OwnerKey,
}

impl Owner {
    /// Returns the owner under which reactive nodes are currently being
    /// created, if any.
    pub fn current() -> Option<Owner> {
        Runtime::with(|rt| rt.owner.get().map(|key| Owner { key }))
    }

    /// The owner's string id.
    pub fn id(&self) -> String {
        Runtime::with(|rt| {
            rt.owners
                .borrow()
                .get(self.key)
                .map(|o| o.wire_id.clone())
                .unwrap_or_default()
        })
    }

    /// The parent owner, if this owner is not a root and has not been
    /// detached.
    pub fn parent(&self) -> Option<Owner> {
        Runtime::with(|rt| {
            rt.owners
                .borrow()
                .get(self.key)
                .and_then(|o| o.parent)
                .map(|key| Owner { key })
        })
    }

    /// Whether this owner has been fully disposed.
    pub fn is_disposed(&self) -> bool {
        Runtime::with(|rt| !rt.owners.borrow().contains_key(self.key))
    }

    /// Disposes of this owner's contents: child owners are fully disposed,
    /// cleanup functions run in LIFO order, and owned reactive nodes are
    /// removed.
    ///
    /// The child counter is always reset, so a retained owner re-executes
    /// with a stable id sequence. If `keep_alive` is `false` the owner
    /// itself is also detached from its parent and removed.
    pub fn dispose(self, keep_alive: bool) {
        Runtime::with(|rt| {
            dispose_contents(rt, self.key);
            if !keep_alive {
                let parent = {
                    let mut owners = rt.owners.borrow_mut();
                    let parent = owners.get(self.key).and_then(|o| o.parent);
                    owners.remove(self.key);
                    parent
                };
                if let Some(parent) = parent {
                    if let Some(parent) =
                        rt.owners.borrow_mut().get_mut(parent)
                    {
                        parent.children.retain(|c| *c != self.key);
                    }
                }
            }
        })
    }

    pub(crate) fn with_state<T>(
        &self,
        f: impl FnOnce(&mut OwnerState) -> T,
    ) -> Option<T> {
        Runtime::with(|rt| {
            rt.owners.borrow_mut().get_mut(self.key).map(f)
        })
    }
}

fn dispose_contents(rt: &Runtime, key: OwnerKey) {
    let (children, cleanups, nodes) = {
        let mut owners = rt.owners.borrow_mut();
        let Some(state) = owners.get_mut(key) else {
            return;
        };
        state.child_count = 0;
        (
            std::mem::take(&mut state.children),
            std::mem::take(&mut state.cleanups),
            std::mem::take(&mut state.nodes),
        )
    };
    for child in children {
        dispose_contents(rt, child);
        rt.owners.borrow_mut().remove(child);
    }
    for cleanup in cleanups.into_iter().rev() {
        cleanup();
    }
    for node in nodes {
        rt.dispose_node(node);
    }
}

/// Creates a root owner with an explicit id and runs `f` under it.
///
/// Returns the function's value and the root owner, which the caller is
/// responsible for disposing.
#[must_use = "the root Owner must be disposed, or its nodes will leak"]
pub fn create_root<T>(id: impl Into<String>, f: impl FnOnce() -> T) -> (T, Owner) {
    let owner = Runtime::with(|rt| {
        let key = rt
            .owners
            .borrow_mut()
            .insert(OwnerState::new(id.into(), None));
        Owner { key }
    });
    let value = with_owner(owner, f);
    (value, owner)
}

/// Creates a temporary root owner, runs the given function, and disposes of
/// the root. Useful for short-lived renders where reactivity does not
/// outlive the synchronous operation.
pub fn run_root<T>(id: impl Into<String>, f: impl FnOnce() -> T) -> T {
    let (value, owner) = create_root(id, f);
    owner.dispose(false);
    value
}

/// Creates a child of the current owner, consuming one child-id slot.
///
/// # Panics
/// Panics if there is no current owner. Use [`try_create_owner`] to handle
/// that case as an error.
#[track_caller]
pub fn create_owner() -> Owner {
    try_create_owner().expect("tried to create an owner with no owner active")
}

/// Creates a child of the current owner, consuming one child-id slot.
pub fn try_create_owner() -> Result<Owner, NoOwnerError> {
    let parent = Owner::current().ok_or(NoOwnerError)?;
    let id = next_child_id(parent);
    Ok(create_owner_with_id(parent, id))
}

/// Creates a child of the given owner with an explicit id, without consuming
/// a child-id slot.
pub fn create_owner_with_id(parent: Owner, id: impl Into<String>) -> Owner {
    Runtime::with(|rt| {
        let key = rt
            .owners
            .borrow_mut()
            .insert(OwnerState::new(id.into(), Some(parent.key)));
        if let Some(parent) = rt.owners.borrow_mut().get_mut(parent.key) {
            parent.children.push(key);
        }
        Owner { key }
    })
}

/// Establishes `owner` as the current owner for the duration of `f`;
/// nesting restores the previous owner on all exit paths.
pub fn with_owner<T>(owner: Owner, f: impl FnOnce() -> T) -> T {
    let prev = Runtime::with(|rt| rt.owner.replace(Some(owner.key)));
    let restore = RestoreOwnerOnDrop(prev);
    let value = f();
    drop(restore);
    value
}

struct RestoreOwnerOnDrop(Option<OwnerKey>);

impl Drop for RestoreOwnerOnDrop {
    fn drop(&mut self) {
        Runtime::with(|rt| rt.owner.set(self.0));
    }
}

/// Runs `f` with no current owner.
///
/// Primitives created inside are detached: they consume no child-id slot
/// and must be disposed manually. Boundary machinery (triggers, re-run
/// effects) runs detached so that it never shifts the ids of the
/// application's own primitives.
pub fn detached<T>(f: impl FnOnce() -> T) -> T {
    let prev = Runtime::with(|rt| rt.owner.take());
    let restore = RestoreOwnerOnDrop(prev);
    let value = f();
    drop(restore);
    value
}

/// Consumes one child-id slot of the given owner and returns the id.
pub fn next_child_id(owner: Owner) -> String {
    owner
        .with_state(|state| {
            let id = format!("{}{}", state.wire_id, state.child_count);
            state.child_count += 1;
            id
        })
        .unwrap_or_default()
}

/// Returns the id the next child of `owner` would receive, without
/// consuming the slot.
pub fn peek_next_child_id(owner: Owner) -> String {
    owner
        .with_state(|state| {
            format!("{}{}", state.wire_id, state.child_count)
        })
        .unwrap_or_default()
}

/// Registers a cleanup function on the current owner. Cleanups run in LIFO
/// order when the owner is disposed, after its child owners have been
/// disposed.
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    let registered = Runtime::with(|rt| {
        let owner = rt.owner.get();
        if let Some(owner) = owner {
            if let Some(state) = rt.owners.borrow_mut().get_mut(owner) {
                state.cleanups.push(Box::new(f));
                return true;
            }
        }
        false
    });
    if !registered {
        tracing::warn!(
            "on_cleanup called outside an owner; the cleanup will never run"
        );
    }
}

/// Allocates an id for a primitive under the current owner, or a detached id
/// if no owner is active. Detached primitives are never serialized.
pub(crate) fn next_primitive_id() -> String {
    match Owner::current() {
        Some(owner) => next_child_id(owner),
        None => Runtime::with(|rt| {
            let n = rt.detached_ids.get();
            rt.detached_ids.set(n + 1);
            format!("d{n}")
        }),
    }
}

/// Registers a reactive node to the current owner for disposal.
pub(crate) fn register_node(node: crate::node::NodeId) {
    Runtime::with(|rt| {
        if let Some(owner) = rt.owner.get() {
            if let Some(state) = rt.owners.borrow_mut().get_mut(owner) {
                state.nodes.push(node);
            }
        }
    })
}
