#![forbid(unsafe_code)]

//! Stores and projections.
//!
//! A store is reactive state shaped as a JSON document, mutated through a
//! recording [`StoreDraft`]. A projection is a store produced over time by
//! an asynchronous producer: the producer mutates a draft and calls
//! [`ProjectionDraft::flush`] at each yield point. The first flush emits the
//! full state snapshot (and locks the value rendering observes); every
//! later flush emits a patch batch, which a hydrating client replays
//! through the patch interpreter.

use crate::{
    async_memo::{
        create_handle, with_async_value, AsyncMemo, AsyncValue, PendingSource,
    },
    hydration::ensure_top_snapshot_scope,
    node::NodeId,
    owner::{next_primitive_id, peek_next_child_id, Owner},
    patch::{apply_patches, batch_from_value, batch_to_value, PatchOp, StoreDraft},
    runtime::Runtime,
    signal::{
        create_signal_node_with_id, try_clone_value, with_value_mut,
        SignalDispose,
    },
    snapshot,
    spawn::schedule_local,
};
use futures::{FutureExt, StreamExt};
use loess_hydration::{SerializedStream, SerializedValue};
use serde_json::Value;
use std::{cell::RefCell, future::Future, rc::Rc};

/// A projection handle; reads like an async memo whose value is a store.
pub type Projection = AsyncMemo<Value>;

/// The read half of a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Store {
    id: NodeId,
}

/// The write half of a store; mutations go through a recording draft.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetStore {
    id: NodeId,
}

impl Store {
    /// Applies `f` to the current state, subscribing the running
    /// computation.
    pub fn with<U>(&self, f: impl FnOnce(&Value) -> U) -> U {
        Runtime::with(|rt| rt.track(self.id));
        let read = || {
            try_clone_value::<Value>(self.id)
                .expect("tried to read a store that has been disposed")
        };
        if snapshot::observer_scope().is_some() {
            let live = read();
            snapshot::read_maybe_snapshot(self.id, move || live, f)
        } else {
            f(&read())
        }
    }

    /// Clones and returns the current state.
    pub fn get(&self) -> Value {
        self.with(Value::clone)
    }
}

impl SetStore {
    /// Runs `f` against a draft of the state and notifies subscribers.
    ///
    /// Returns the patch operations the mutation recorded.
    pub fn update(&self, f: impl FnOnce(&mut StoreDraft)) -> Vec<PatchOp> {
        let mut log = Vec::new();
        let wrote = with_value_mut::<Value, _>(self.id, |state| {
            let mut draft = StoreDraft::new(state, &mut log);
            f(&mut draft);
        })
        .is_some();
        if wrote {
            Runtime::with(|rt| {
                rt.mark_dirty(self.id);
                rt.run_effects();
            });
        }
        log
    }
}

impl SignalDispose for Store {
    fn dispose(self) {
        Runtime::with(|rt| rt.dispose_node(self.id));
    }
}

/// Creates a store over a plain initial state.
///
/// Plain stores are not serialized; both sides construct the same initial
/// state, and asynchronous state belongs in a projection instead.
#[track_caller]
pub fn create_store(initial: Value) -> (Store, SetStore) {
    let (id, _) = create_signal_node_with_id(initial);
    (Store { id }, SetStore { id })
}

/// Creates a store whose writes may run ahead of the server state.
///
/// The server serializes the creation-time state at the store's id; a
/// hydrating client seeds from that entry so adopted HTML and store state
/// agree.
#[track_caller]
pub fn create_optimistic_store(initial: Value) -> (Store, SetStore) {
    let ctx = crate::shared_context();
    if let Some(ctx) = &ctx {
        if ctx.is_browser() && crate::is_hydrating() {
            if let Some(parent) = Owner::current() {
                let wire_id = peek_next_child_id(parent);
                if let Some(entry) = ctx.load(&wire_id) {
                    if let Some(seed) = entry.peek() {
                        ensure_top_snapshot_scope();
                        let (id, _) = create_signal_node_with_id(seed);
                        ctx.gather(&wire_id);
                        return (Store { id }, SetStore { id });
                    }
                }
            }
        }
    }
    let (id, wire_id) = create_signal_node_with_id(initial.clone());
    if let Some(ctx) = ctx.filter(|c| !c.is_browser()) {
        ctx.serialize(&wire_id, SerializedValue::Sync(initial), false);
    }
    (Store { id }, SetStore { id })
}

struct ProjectionInner {
    state: Value,
    log: Vec<PatchOp>,
    first_done: bool,
    tx: futures::channel::mpsc::UnboundedSender<Value>,
}

/// The draft handed to a projection producer.
///
/// Mutations record patches; [`flush`](Self::flush) is the yield point that
/// emits either the first full-state snapshot or the pending patch batch.
#[derive(Clone)]
pub struct ProjectionDraft {
    inner: Rc<RefCell<ProjectionInner>>,
}

macro_rules! forward_draft {
    ($($(#[$attr:meta])* fn $name:ident(&self $(, $arg:ident : $ty:ty)*);)*) => {
        $(
            $(#[$attr])*
            pub fn $name(&self $(, $arg: $ty)*) {
                let mut inner = self.inner.borrow_mut();
                let inner = &mut *inner;
                let mut draft = StoreDraft::new(&mut inner.state, &mut inner.log);
                draft.$name($($arg),*);
            }
        )*
    };
}

impl ProjectionDraft {
    forward_draft! {
        /// Writes `value` at `path`.
        fn set(&self, path: Vec<crate::PathKey>, value: Value);
        /// Removes the value at `path`.
        fn delete(&self, path: Vec<crate::PathKey>);
        /// Inserts `value` into an array at the index ending `path`.
        fn insert(&self, path: Vec<crate::PathKey>, value: Value);
        /// Appends to the array at `path`.
        fn push(&self, path: Vec<crate::PathKey>, value: Value);
        /// Removes the last element of the array at `path`.
        fn pop(&self, path: Vec<crate::PathKey>);
        /// Removes the first element of the array at `path`.
        fn shift(&self, path: Vec<crate::PathKey>);
        /// Prepends `items` to the array at `path`.
        fn unshift(&self, path: Vec<crate::PathKey>, items: Vec<Value>);
        /// Splices the array at `path`.
        fn splice(&self, path: Vec<crate::PathKey>, start: usize, delete_count: usize, items: Vec<Value>);
    }

    /// Reads the current draft state.
    pub fn state(&self) -> Value {
        self.inner.borrow().state.clone()
    }

    /// The yield point. The first flush emits a deep clone of the full
    /// state; later flushes emit the patch batch recorded since the last
    /// flush.
    pub fn flush(&self) {
        let payload = {
            let mut inner = self.inner.borrow_mut();
            if !inner.first_done {
                inner.first_done = true;
                // mutations so far are already folded into the snapshot
                inner.log.clear();
                inner.state.clone()
            } else {
                let ops = std::mem::take(&mut inner.log);
                batch_to_value(&ops)
            }
        };
        _ = self.inner.borrow().tx.unbounded_send(payload);
    }
}

/// Creates a projection: a store whose state is produced over time.
///
/// The producer receives a [`ProjectionDraft`] and may await between
/// mutations; each [`ProjectionDraft::flush`] is a yield. Rendering reads
/// the first-flush snapshot (deep-cloned, so later mutations cannot leak
/// into it); the client receives the snapshot and then replays patch
/// batches as they stream in.
#[track_caller]
pub fn create_projection<Fu>(
    initial: Value,
    producer: impl FnOnce(ProjectionDraft) -> Fu + 'static,
) -> Projection
where
    Fu: Future<Output = ()> + 'static,
{
    let ctx = crate::shared_context();
    let browser = ctx.as_ref().map(|c| c.is_browser()).unwrap_or(false);

    if browser && crate::is_hydrating() {
        if let (Some(ctx), Some(parent)) = (&ctx, Owner::current()) {
            let wire_id = peek_next_child_id(parent);
            if let Some(entry) = ctx.load(&wire_id) {
                _ = next_primitive_id();
                ensure_top_snapshot_scope();
                return hydrate_projection(ctx.clone(), wire_id, entry);
            }
        }
    }

    let wire_id = next_primitive_id();
    let (tx, rx) = futures::channel::mpsc::unbounded();
    let draft = ProjectionDraft {
        inner: Rc::new(RefCell::new(ProjectionInner {
            state: initial,
            log: Vec::new(),
            first_done: false,
            tx,
        })),
    };
    // the draft inside the producer future holds the only sender; when the
    // producer finishes, the channel closes and the stream ends
    let fut = producer(draft);
    let driven = futures::stream::select(
        rx.map(Some),
        futures::stream::once(fut.map(|_| None)),
    )
    .filter_map(futures::future::ready);

    let tapped = SerializedStream::new(driven);
    let first = tapped.first();

    match ctx.filter(|c| !c.is_browser()) {
        Some(ctx) => {
            ctx.serialize(
                &wire_id,
                SerializedValue::Stream(tapped),
                false,
            );
            // rendering locks onto the first-flush snapshot
            create_handle(AsyncValue::pending(
                None,
                PendingSource::Wire(first),
                true,
            ))
        }
        None => {
            let projection = create_handle(AsyncValue::pending(
                None,
                PendingSource::Wire(first),
                false,
            ));
            if let Some(rest) = tapped.take_rest() {
                schedule_apply_batches(projection.id, rest);
            }
            projection
        }
    }
}

fn hydrate_projection(
    ctx: Rc<dyn loess_hydration::HydrationContext>,
    wire_id: String,
    entry: SerializedValue,
) -> Projection {
    match entry {
        SerializedValue::Stream(stream) => {
            let first = stream.first();
            let projection = match first.peek() {
                Some(v) => create_handle(AsyncValue::ready(Some(v.clone()))),
                None => create_handle(AsyncValue::pending(
                    None,
                    PendingSource::Wire(first.clone()),
                    false,
                )),
            };
            if let Some(rest) = stream.take_rest() {
                let id = projection.id;
                let gather_id = wire_id;
                schedule_local(async move {
                    let mut rest = rest;
                    while let Some(batch) = rest.next().await {
                        apply_batch(id, &batch);
                    }
                    ctx.gather(&gather_id);
                });
            }
            projection
        }
        other => {
            let projection = match other.peek() {
                Some(v) => create_handle(AsyncValue::ready(Some(v))),
                None => create_handle(AsyncValue::<Value>::ready(None)),
            };
            ctx.gather(&wire_id);
            projection
        }
    }
}

fn schedule_apply_batches(
    id: NodeId,
    rest: loess_hydration::PinnedLocalStream<Value>,
) {
    schedule_local(async move {
        let mut rest = rest;
        while let Some(batch) = rest.next().await {
            apply_batch(id, &batch);
        }
    });
}

/// Applies one streamed patch batch to a projection's state and re-flushes.
fn apply_batch(id: NodeId, batch: &Value) {
    let ops = batch_from_value(batch);
    let applied = with_async_value::<Value, _>(id, |state| {
        if let Some(value) = &mut state.value {
            apply_patches(value, &ops);
        }
    })
    .is_some();
    if applied {
        Runtime::with(|rt| {
            rt.mark_dirty(id);
            rt.run_effects();
        });
    }
}
