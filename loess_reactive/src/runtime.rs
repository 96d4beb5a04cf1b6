#![forbid(unsafe_code)]
use crate::{
    hydration::HydrationState,
    node::{NodeId, ReactiveNode, ReactiveNodeState, ReactiveNodeType},
    owner::{OwnerKey, OwnerState},
    snapshot::SnapshotRegistry,
};
use core::hash::BuildHasherDefault;
use indexmap::IndexSet;
use loess_hydration::HydrationContext;
use rustc_hash::FxHasher;
use slotmap::{SecondaryMap, SlotMap};
use std::{
    cell::{Cell, RefCell},
    fmt::Debug,
    rc::Rc,
};

pub(crate) type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;

thread_local! {
    pub(crate) static RUNTIME: Runtime = Runtime::new();
}

// The data structure that owns all the signals, memos, effects, owners, and
// hydration state of the reactive system.
//
// The rendering model is single-threaded and cooperative, so there is one
// runtime per thread; overlapping renders are isolated by capturing the
// shared context at computation-creation time, not by separate runtimes.
#[derive(Default)]
pub(crate) struct Runtime {
    pub owner: Cell<Option<OwnerKey>>,
    pub observer: Cell<Option<NodeId>>,
    pub owners: RefCell<SlotMap<OwnerKey, OwnerState>>,
    pub nodes: RefCell<SlotMap<NodeId, ReactiveNode>>,
    pub node_subscribers:
        RefCell<SecondaryMap<NodeId, RefCell<FxIndexSet<NodeId>>>>,
    pub node_sources:
        RefCell<SecondaryMap<NodeId, RefCell<FxIndexSet<NodeId>>>>,
    pub pending_effects: RefCell<Vec<NodeId>>,
    pub batching: Cell<bool>,
    pub shared_context: RefCell<Option<Rc<dyn HydrationContext>>>,
    pub snapshots: SnapshotRegistry,
    pub hydration: HydrationState,
    pub detached_ids: Cell<usize>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn with<T>(f: impl FnOnce(&Runtime) -> T) -> T {
        RUNTIME.with(f)
    }

    pub(crate) fn update_if_necessary(&self, node_id: NodeId) {
        if self.current_state(node_id) == ReactiveNodeState::Check {
            let sources = {
                let sources = self.node_sources.borrow();
                sources.get(node_id).map(|n| {
                    n.borrow().iter().copied().collect::<Vec<_>>()
                })
            };

            for source in sources.into_iter().flatten() {
                self.update_if_necessary(source);
                if self.current_state(node_id) >= ReactiveNodeState::Dirty {
                    // as soon as a single parent has marked us dirty, we can
                    // stop checking the rest to avoid over-re-running
                    break;
                }
            }
        }

        if self.current_state(node_id) >= ReactiveNodeState::Dirty {
            self.update(node_id);
        }

        self.mark_clean(node_id);
    }

    pub(crate) fn update(&self, node_id: NodeId) {
        let node = {
            let nodes = self.nodes.borrow();
            nodes.get(node_id).cloned()
        };

        let Some(node) = node else {
            return;
        };

        // memos and effects re-run; signals simply have their value
        let changed = match node.node_type {
            ReactiveNodeType::Signal | ReactiveNodeType::Trigger => true,
            ReactiveNodeType::Memo { ref f }
            | ReactiveNodeType::Effect { ref f } => {
                let value = node.value();
                self.with_observer(node_id, || {
                    // detach from previous sources before re-running
                    self.cleanup_sources(node_id);
                    f.run(value)
                })
            }
        };

        if changed {
            let subs = self.node_subscribers.borrow();
            if let Some(subs) = subs.get(node_id) {
                let mut nodes = self.nodes.borrow_mut();
                for sub_id in subs.borrow().iter() {
                    if let Some(sub) = nodes.get_mut(*sub_id) {
                        sub.state = ReactiveNodeState::Dirty;
                    }
                }
            }
        }

        self.mark_clean(node_id);
    }

    pub(crate) fn cleanup_sources(&self, node_id: NodeId) {
        let sources = self.node_sources.borrow();
        if let Some(sources) = sources.get(node_id) {
            let subs = self.node_subscribers.borrow();
            for source in sources.borrow().iter() {
                if let Some(source) = subs.get(*source) {
                    source.borrow_mut().remove(&node_id);
                }
            }
        }
    }

    fn current_state(&self, node: NodeId) -> ReactiveNodeState {
        match self.nodes.borrow().get(node) {
            None => ReactiveNodeState::Clean,
            Some(node) => node.state,
        }
    }

    pub(crate) fn with_observer<T>(
        &self,
        observer: NodeId,
        f: impl FnOnce() -> T,
    ) -> T {
        let prev_observer = self.observer.replace(Some(observer));
        let restore = SetObserverOnDrop(prev_observer);
        let v = f();
        drop(restore);
        v
    }

    fn mark_clean(&self, node: NodeId) {
        let mut nodes = self.nodes.borrow_mut();
        if let Some(node) = nodes.get_mut(node) {
            node.state = ReactiveNodeState::Clean;
        }
    }

    pub(crate) fn mark_dirty(&self, node: NodeId) {
        let mut pending_effects = self.pending_effects.borrow_mut();
        let current_observer = self.observer.get();

        {
            let mut nodes = self.nodes.borrow_mut();
            let Some(current_node) = nodes.get_mut(node) else {
                return;
            };
            if current_node.state == ReactiveNodeState::DirtyMarked {
                return;
            }
            Runtime::mark(
                node,
                current_node,
                ReactiveNodeState::Dirty,
                &mut pending_effects,
                current_observer,
            );
        }

        // mark descendants Check, depth-first
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            let children: Vec<NodeId> = {
                let subs = self.node_subscribers.borrow();
                match subs.get(current) {
                    Some(children) => {
                        children.borrow().iter().copied().collect()
                    }
                    None => continue,
                }
            };
            let mut nodes = self.nodes.borrow_mut();
            for child in children {
                if let Some(node) = nodes.get_mut(child) {
                    if node.state == ReactiveNodeState::Check
                        || node.state == ReactiveNodeState::DirtyMarked
                    {
                        continue;
                    }
                    Runtime::mark(
                        child,
                        node,
                        ReactiveNodeState::Check,
                        &mut pending_effects,
                        current_observer,
                    );
                    stack.push(child);
                }
            }
        }
    }

    #[inline(always)] // small function, used in a hot loop
    fn mark(
        node_id: NodeId,
        node: &mut ReactiveNode,
        level: ReactiveNodeState,
        pending_effects: &mut Vec<NodeId>,
        current_observer: Option<NodeId>,
    ) {
        if level > node.state {
            node.state = level;
        }

        if matches!(node.node_type, ReactiveNodeType::Effect { .. } if current_observer != Some(node_id))
        {
            pending_effects.push(node_id)
        }

        if node.state == ReactiveNodeState::Dirty {
            node.state = ReactiveNodeState::DirtyMarked;
        }
    }

    pub(crate) fn run_effects(&self) {
        if !self.batching.get() {
            let effects = self.pending_effects.take();
            for effect_id in effects {
                self.update_if_necessary(effect_id);
            }
        }
    }

    pub(crate) fn dispose_node(&self, node: NodeId) {
        // each subscriber must drop this node from its dependencies so that
        // it does not try to read the now-disposed node
        let subs = self.node_subscribers.borrow_mut().remove(node);
        if let Some(subs) = subs {
            let source_map = self.node_sources.borrow();
            for sub in subs.borrow().iter() {
                if let Some(sub_sources) = source_map.get(*sub) {
                    sub_sources.borrow_mut().remove(&node);
                }
            }
        }
        self.cleanup_sources(node);
        self.node_sources.borrow_mut().remove(node);
        self.nodes.borrow_mut().remove(node);
        self.snapshots.forget_node(node);
    }

    /// Records a read of `source` by the current observer.
    pub(crate) fn track(&self, source: NodeId) {
        if let Some(observer) = self.observer.get() {
            {
                let mut subs = self.node_subscribers.borrow_mut();
                subs.entry(source)
                    .map(|entry| entry.or_default().borrow_mut().insert(observer));
            }
            let mut sources = self.node_sources.borrow_mut();
            sources
                .entry(observer)
                .map(|entry| entry.or_default().borrow_mut().insert(source));
        }
    }
}

impl Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("owner", &self.owner)
            .field("observer", &self.observer)
            .field("owners", &self.owners.borrow().len())
            .field("nodes", &self.nodes.borrow().len())
            .finish()
    }
}

struct SetObserverOnDrop(Option<NodeId>);

impl Drop for SetObserverOnDrop {
    fn drop(&mut self) {
        Runtime::with(|rt| rt.observer.set(self.0));
    }
}

/// Suspends reactive tracking while running the given function.
///
/// This can be used to isolate parts of the reactive graph from one another.
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    let prev = Runtime::with(|rt| rt.observer.take());
    let restore = SetObserverOnDrop(prev);
    let value = f();
    drop(restore);
    value
}

/// Batches reactive updates, preventing effects from running until the whole
/// function has run.
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    Runtime::with(|rt| {
        let restore = SetBatchingOnDrop(rt.batching.replace(true));
        let value = f();
        drop(restore);
        rt.run_effects();
        value
    })
}

struct SetBatchingOnDrop(bool);

impl Drop for SetBatchingOnDrop {
    fn drop(&mut self) {
        Runtime::with(|rt| rt.batching.set(self.0));
    }
}

/// Installs a [`HydrationContext`] for the current thread, returning the
/// previous one so the caller can restore it.
///
/// Computations capture the context installed at their creation; installing
/// a new context does not affect computations already created. This is what
/// keeps overlapping renders on one thread from observing each other's
/// side channels.
pub fn set_shared_context(
    ctx: Option<Rc<dyn HydrationContext>>,
) -> Option<Rc<dyn HydrationContext>> {
    Runtime::with(|rt| {
        std::mem::replace(&mut *rt.shared_context.borrow_mut(), ctx)
    })
}

/// The currently-installed [`HydrationContext`], if any.
pub fn shared_context() -> Option<Rc<dyn HydrationContext>> {
    Runtime::with(|rt| rt.shared_context.borrow().clone())
}

/// Runs `f` with the given context installed, restoring the previous context
/// afterwards (including on panic-free early returns inside `f`).
pub fn with_shared_context<T>(
    ctx: Rc<dyn HydrationContext>,
    f: impl FnOnce() -> T,
) -> T {
    let prev = set_shared_context(Some(ctx));
    let restore = RestoreContextOnDrop(prev);
    let value = f();
    drop(restore);
    value
}

struct RestoreContextOnDrop(Option<Rc<dyn HydrationContext>>);

impl Drop for RestoreContextOnDrop {
    fn drop(&mut self) {
        set_shared_context(self.0.take());
    }
}
