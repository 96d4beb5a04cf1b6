#![forbid(unsafe_code)]

//! Snapshot scopes.
//!
//! During hydration, signal writes must be safe: writes update the real
//! value, but any computation created under a snapshot scope reads the value
//! a signal had at that computation family's *first* read, guaranteeing that
//! its output matches the server HTML being adopted. When the scope is
//! released, bindings are dropped, the scope's computations are marked stale,
//! and they re-run against live values.

use crate::{
    node::NodeId,
    owner::{Owner, OwnerKey},
    runtime::Runtime,
};
use rustc_hash::FxHashMap;
use std::{
    any::Any,
    cell::{Cell, RefCell},
    rc::Rc,
};

#[derive(Default)]
pub(crate) struct SnapshotRegistry {
    capture: Cell<bool>,
    scopes: RefCell<FxHashMap<OwnerKey, ScopeSnapshots>>,
}

#[derive(Default)]
struct ScopeSnapshots {
    bindings: FxHashMap<NodeId, Rc<dyn Any>>,
    computations: Vec<NodeId>,
}

impl SnapshotRegistry {
    pub fn forget_node(&self, node: NodeId) {
        for scope in self.scopes.borrow_mut().values_mut() {
            scope.bindings.remove(&node);
            scope.computations.retain(|c| *c != node);
        }
    }
}

/// Globally enables or disables snapshot capture. While off, marked scopes
/// have no effect on new computations.
pub fn set_snapshot_capture(on: bool) {
    Runtime::with(|rt| rt.snapshots.capture.set(on))
}

/// Whether snapshot capture is currently enabled.
pub fn snapshot_capture() -> bool {
    Runtime::with(|rt| rt.snapshots.capture.get())
}

/// Marks `owner` as a snapshot scope: computations created under it while
/// capture is on become snapshot readers.
pub fn mark_snapshot_scope(owner: Owner) {
    Runtime::with(|rt| {
        if let Some(state) = rt.owners.borrow_mut().get_mut(owner.key) {
            state.snapshot_scope = true;
        }
        rt.snapshots.scopes.borrow_mut().entry(owner.key).or_default();
    })
}

/// Releases the snapshot scope at `owner`: its bindings are dropped and its
/// computations are marked stale so they re-run with live values.
pub fn release_snapshot_scope(owner: Owner) {
    let computations = Runtime::with(|rt| {
        if let Some(state) = rt.owners.borrow_mut().get_mut(owner.key) {
            state.snapshot_scope = false;
        }
        rt.snapshots
            .scopes
            .borrow_mut()
            .remove(&owner.key)
            .map(|scope| scope.computations)
            .unwrap_or_default()
    });
    Runtime::with(|rt| {
        for comp in computations {
            if let Some(node) = rt.nodes.borrow_mut().get_mut(comp) {
                node.snapshot_scope = None;
            }
            rt.mark_dirty(comp);
        }
        rt.run_effects();
    });
}

/// Drops all snapshot bindings and scope marks.
pub fn clear_snapshots() {
    let scopes: Vec<OwnerKey> = Runtime::with(|rt| {
        rt.snapshots.scopes.borrow().keys().copied().collect()
    });
    for key in scopes {
        release_snapshot_scope(Owner { key });
    }
}

/// The snapshot scope the given computation should be created under, given
/// the current owner chain, or `None` when capture is off or no ancestor is
/// marked.
pub(crate) fn scope_for_new_computation() -> Option<OwnerKey> {
    Runtime::with(|rt| {
        if !rt.snapshots.capture.get() {
            return None;
        }
        let owners = rt.owners.borrow();
        let mut current = rt.owner.get();
        while let Some(key) = current {
            let Some(state) = owners.get(key) else {
                break;
            };
            if state.snapshot_scope {
                return Some(key);
            }
            current = state.parent;
        }
        None
    })
}

/// Records the computation under its scope so that release can find it.
pub(crate) fn register_computation(scope: OwnerKey, node: NodeId) {
    Runtime::with(|rt| {
        rt.snapshots
            .scopes
            .borrow_mut()
            .entry(scope)
            .or_default()
            .computations
            .push(node);
    })
}

/// The snapshot scope of the currently-running observer, if it is a
/// snapshot reader whose scope is still live.
pub(crate) fn observer_scope() -> Option<OwnerKey> {
    Runtime::with(|rt| {
        let observer = rt.observer.get()?;
        let scope = rt.nodes.borrow().get(observer)?.snapshot_scope?;
        rt.snapshots
            .scopes
            .borrow()
            .contains_key(&scope)
            .then_some(scope)
    })
}

/// Reads `source` on behalf of the current observer: if the observer is a
/// snapshot reader, the value recorded at its scope's first read of `source`
/// is returned (recording it now if this is that first read); otherwise the
/// live value.
pub(crate) fn read_maybe_snapshot<T, U>(
    source: NodeId,
    live: impl FnOnce() -> T,
    f: impl FnOnce(&T) -> U,
) -> U
where
    T: Clone + 'static,
{
    let Some(scope) = observer_scope() else {
        let value = live();
        return f(&value);
    };
    let recorded: Option<Rc<dyn Any>> = Runtime::with(|rt| {
        rt.snapshots
            .scopes
            .borrow()
            .get(&scope)
            .and_then(|s| s.bindings.get(&source).cloned())
    });
    match recorded {
        Some(any) => {
            let value = any
                .downcast_ref::<T>()
                .expect("snapshot binding had an unexpected type");
            f(value)
        }
        None => {
            let value = live();
            Runtime::with(|rt| {
                if let Some(s) =
                    rt.snapshots.scopes.borrow_mut().get_mut(&scope)
                {
                    s.bindings.insert(source, Rc::new(value.clone()));
                }
            });
            f(&value)
        }
    }
}
