#![forbid(unsafe_code)]

//! Asynchronous memos: the bridge between `async` work and the synchronous
//! reactive system.
//!
//! On the server, the fetcher's future is started eagerly, shared with the
//! serialization side channel, and reads suspend with
//! [`Interrupt::NotReady`] until it settles. On a hydrating client the
//! serialized value is consumed instead of re-running the fetcher. The
//! `ssr_source` mode controls how compute and serialization cooperate.

use crate::{
    hydration::ensure_top_snapshot_scope,
    node::{NodeId, ReactiveNode, ReactiveNodeState, ReactiveNodeType},
    owner::{next_primitive_id, peek_next_child_id, register_node, Owner},
    runtime::Runtime,
    serialization::Serializable,
    signal::{SignalDispose, SignalGet, SignalGetUntracked},
    snapshot,
    spawn::schedule_local,
};
use futures::{future::Shared, FutureExt, StreamExt};
use loess_error::{Error, Interrupt, NotReady, WakeFuture};
use loess_hydration::{
    shared_value_future, HydrationContext, PinnedLocalFuture, SerializedValue,
};
use serde_json::Value;
use std::{cell::RefCell, future::Future, marker::PhantomData, rc::Rc};

/// Selects how a primitive's compute and serialization cooperate across the
/// server/client boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SsrSourceMode {
    /// Full streaming: the server starts the work, rendering sees the first
    /// value, and the client receives the whole stream.
    #[default]
    Server,
    /// Only the first value crosses the wire; rendering sees it, the client
    /// takes over from there.
    Hybrid,
    /// Skip the compute on both server and client; use the initial value.
    /// Dependencies are still captured by calling the fetcher once and
    /// dropping its future unpolled.
    Initial,
    /// As [`SsrSourceMode::Initial`] on the server; the client flips to the
    /// live compute once the snapshot scope releases.
    Client,
}

/// Options accepted by the asynchronous primitives.
pub struct AsyncOptions<T> {
    /// See [`SsrSourceMode`].
    pub ssr_source: SsrSourceMode,
    /// Delay the shell until this value has settled.
    pub defer_stream: bool,
    /// A value reads return before the asynchronous work settles. Required
    /// by the `Initial` and `Client` modes.
    pub initial: Option<T>,
}

impl<T> Default for AsyncOptions<T> {
    fn default() -> Self {
        Self {
            ssr_source: SsrSourceMode::default(),
            defer_stream: false,
            initial: None,
        }
    }
}

pub(crate) type TypedFirst<T> = Shared<PinnedLocalFuture<Option<T>>>;

#[derive(Clone)]
pub(crate) enum PendingSource<T> {
    Typed(TypedFirst<T>),
    Wire(loess_hydration::SharedValueFuture),
}

pub(crate) struct AsyncValue<T> {
    pub value: Option<T>,
    pub interrupt: Option<Interrupt>,
    pub pending: Option<PendingSource<T>>,
    pub lock_on_settle: bool,
    pub locked: bool,
}

impl<T> AsyncValue<T> {
    pub(crate) fn ready(value: Option<T>) -> Self {
        Self {
            value,
            interrupt: None,
            pending: None,
            lock_on_settle: false,
            locked: false,
        }
    }

    pub(crate) fn pending(
        initial: Option<T>,
        source: PendingSource<T>,
        lock_on_settle: bool,
    ) -> Self
    where
        T: Clone + 'static,
    {
        let interrupt = if initial.is_none() {
            Some(Interrupt::NotReady(not_ready_for(&source)))
        } else {
            None
        };
        Self {
            value: initial,
            interrupt,
            pending: Some(source),
            lock_on_settle,
            locked: false,
        }
    }
}

fn not_ready_for<T: Clone + 'static>(source: &PendingSource<T>) -> NotReady {
    match source {
        PendingSource::Typed(f) => NotReady::new(f.clone().map(|_| ())),
        PendingSource::Wire(f) => NotReady::new(f.clone().map(|_| ())),
    }
}

/// A reactive handle over asynchronous work; see [`create_async_memo`].
#[derive(Debug)]
pub struct AsyncMemo<T>
where
    T: 'static,
{
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
}

impl<T> Clone for AsyncMemo<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AsyncMemo<T> {}

/// Creates a memo over a [`Future`].
///
/// The fetcher runs once at creation. On the server the result is emitted to
/// the serialization side channel so a hydrating client can observe the same
/// value without re-running the work. Reads before settlement return
/// [`Interrupt::NotReady`] carrying a wake future; a Loading boundary
/// collects these and retries once they settle.
///
/// A fetcher that can fail should resolve to a `Result`; the error then
/// propagates out of the reading hole as [`Interrupt::Error`].
#[track_caller]
pub fn create_async_memo<T, Fu>(
    fetcher: impl Fn() -> Fu + 'static,
) -> AsyncMemo<T>
where
    T: Clone + Serializable + 'static,
    Fu: Future<Output = T> + 'static,
{
    create_async_memo_with_options(fetcher, AsyncOptions::default())
}

/// Creates an async memo with explicit [`AsyncOptions`].
#[track_caller]
pub fn create_async_memo_with_options<T, Fu>(
    fetcher: impl Fn() -> Fu + 'static,
    options: AsyncOptions<T>,
) -> AsyncMemo<T>
where
    T: Clone + Serializable + 'static,
    Fu: Future<Output = T> + 'static,
{
    let ctx = crate::shared_context();
    let browser = ctx.as_ref().map(|c| c.is_browser()).unwrap_or(false);
    let mode = options.ssr_source;

    if browser && crate::is_hydrating() {
        if let Some(memo) = try_hydrate::<T>(ctx.as_deref(), mode) {
            return memo;
        }
    }

    let id = next_primitive_id();

    match mode {
        SsrSourceMode::Initial => {
            // dependency scan: synchronous reads inside the fetcher are
            // tracked; the returned future is dropped unpolled
            drop(fetcher());
            if browser && crate::is_hydrating() {
                ensure_top_snapshot_scope();
            }
            let initial = options
                .initial
                .expect("ssr_source Initial requires an initial value");
            create_handle(AsyncValue::ready(Some(initial)))
        }
        SsrSourceMode::Client => {
            drop(fetcher());
            if browser && crate::is_hydrating() {
                ensure_top_snapshot_scope();
            }
            let initial = options
                .initial
                .expect("ssr_source Client requires an initial value");
            let memo = create_handle(AsyncValue::ready(Some(initial)));
            if browser {
                crate::hydration::defer_until_live(move || {
                    let typed = share_future(fetcher());
                    begin_pending::<T>(
                        memo.id,
                        PendingSource::Typed(typed.clone()),
                    );
                    drive_to_completion::<T>(memo.id, typed);
                });
            }
            memo
        }
        SsrSourceMode::Server | SsrSourceMode::Hybrid => {
            let typed = share_future(fetcher());
            let server_ctx = ctx.filter(|c| !c.is_browser());
            if let Some(ctx) = &server_ctx {
                let value_fut =
                    shared_value_future(typed.clone().map(serialize_first));
                ctx.serialize(
                    &id,
                    SerializedValue::Future(value_fut),
                    options.defer_stream,
                );
            }
            let memo = create_handle(AsyncValue::pending(
                options.initial,
                PendingSource::Typed(typed.clone()),
                false,
            ));
            if server_ctx.is_none() {
                // outside the renderer nothing awaits the boundary's wake
                // futures, so completion is driven in the background
                drive_to_completion::<T>(memo.id, typed);
            }
            memo
        }
    }
}

/// Polls the shared source to completion in the background and commits it,
/// so effects re-run without requiring a read.
pub(crate) fn drive_to_completion<T>(id: NodeId, typed: TypedFirst<T>)
where
    T: Clone + Serializable + 'static,
{
    schedule_local(async move {
        let _ = typed.await;
        commit_if_settled::<T>(id);
    });
}

pub(crate) fn share_future<T, Fu>(fut: Fu) -> TypedFirst<T>
where
    T: Clone + 'static,
    Fu: Future<Output = T> + 'static,
{
    (Box::pin(fut.map(Some)) as PinnedLocalFuture<Option<T>>).shared()
}

pub(crate) fn serialize_first<T: Serializable>(value: Option<T>) -> Value {
    match value {
        Some(value) => value.to_value().unwrap_or_else(|e| {
            tracing::warn!("failed to serialize async value: {e}");
            Value::Null
        }),
        None => Value::Null,
    }
}

pub(crate) fn create_handle<T>(value: AsyncValue<T>) -> AsyncMemo<T>
where
    T: 'static,
{
    let scope = snapshot::scope_for_new_computation();
    let id = Runtime::with(|rt| {
        rt.nodes.borrow_mut().insert(ReactiveNode {
            value: Some(Rc::new(RefCell::new(value))),
            state: ReactiveNodeState::Clean,
            node_type: ReactiveNodeType::Signal,
            snapshot_scope: scope,
        })
    });
    register_node(id);
    AsyncMemo {
        id,
        ty: PhantomData,
    }
}

/// The hydration path shared by async and stream memos: peek the id the
/// primitive is about to take, and consume the serialized entry if there is
/// one.
pub(crate) fn try_hydrate<T>(
    ctx: Option<&dyn HydrationContext>,
    mode: SsrSourceMode,
) -> Option<AsyncMemo<T>>
where
    T: Clone + Serializable + 'static,
{
    if !matches!(mode, SsrSourceMode::Server | SsrSourceMode::Hybrid) {
        // the server did not serialize anything for these modes
        return None;
    }
    let ctx = ctx?;
    let parent = Owner::current()?;
    let wire_id = peek_next_child_id(parent);
    let entry = ctx.load(&wire_id)?;
    _ = next_primitive_id();
    ensure_top_snapshot_scope();
    Some(hydrate_from_entry(ctx, wire_id, entry))
}

pub(crate) fn hydrate_from_entry<T>(
    ctx: &dyn HydrationContext,
    wire_id: String,
    entry: SerializedValue,
) -> AsyncMemo<T>
where
    T: Clone + Serializable + 'static,
{
    match entry {
        SerializedValue::Sync(v) => {
            let memo = create_handle(seeded::<T>(v));
            ctx.gather(&wire_id);
            memo
        }
        SerializedValue::Error(e) => {
            let memo = create_handle(AsyncValue {
                interrupt: Some(Interrupt::Error(e)),
                ..AsyncValue::ready(None)
            });
            ctx.gather(&wire_id);
            memo
        }
        SerializedValue::Future(fut) => match fut.peek() {
            Some(v) => {
                let memo = create_handle(seeded::<T>(v.clone()));
                ctx.gather(&wire_id);
                memo
            }
            None => create_handle(AsyncValue::pending(
                None,
                PendingSource::Wire(fut),
                false,
            )),
        },
        SerializedValue::Stream(stream) => {
            let first = stream.first();
            let memo = match first.peek() {
                Some(v) => create_handle(seeded::<T>(v.clone())),
                None => create_handle(AsyncValue::pending(
                    None,
                    PendingSource::Wire(first.clone()),
                    false,
                )),
            };
            if let Some(rest) = stream.take_rest() {
                let node = memo.id;
                schedule_local(async move {
                    let mut rest = rest;
                    while let Some(v) = rest.next().await {
                        match T::from_value(v) {
                            Ok(value) => write_async_value(node, value),
                            Err(e) => tracing::warn!(
                                "failed to deserialize streamed value: {e}"
                            ),
                        }
                    }
                });
            }
            memo
        }
        SerializedValue::DeferredFallback => {
            // "$$f" marks a deferred boundary, not a primitive value
            create_handle(AsyncValue {
                interrupt: Some(Interrupt::Error(Error::msg(
                    "deferred-fallback sentinel read as a value",
                ))),
                ..AsyncValue::ready(None)
            })
        }
    }
}

fn seeded<T>(v: Value) -> AsyncValue<T>
where
    T: Serializable,
{
    match T::from_value(v) {
        Ok(value) => AsyncValue::ready(Some(value)),
        Err(e) => AsyncValue {
            interrupt: Some(Interrupt::Error(Error::from(e))),
            ..AsyncValue::ready(None)
        },
    }
}

/// Installs a new pending source on a live handle (ssr_source `Client`
/// flipping to its real compute).
pub(crate) fn begin_pending<T>(id: NodeId, source: PendingSource<T>)
where
    T: Clone + 'static,
{
    let updated = with_async_value(id, |state: &mut AsyncValue<T>| {
        state.interrupt = None;
        state.pending = Some(source);
    })
    .is_some();
    if updated {
        Runtime::with(|rt| {
            rt.mark_dirty(id);
            rt.run_effects();
        });
    }
}

/// Writes a streamed continuation value into the handle and re-flushes.
pub(crate) fn write_async_value<T>(id: NodeId, value: T)
where
    T: 'static,
{
    let wrote = with_async_value(id, |state: &mut AsyncValue<T>| {
        if !state.locked {
            state.value = Some(value);
            state.interrupt = None;
            state.pending = None;
        }
    })
    .is_some();
    if wrote {
        Runtime::with(|rt| {
            rt.mark_dirty(id);
            rt.run_effects();
        });
    }
}

pub(crate) fn with_async_value<T, U>(
    id: NodeId,
    f: impl FnOnce(&mut AsyncValue<T>) -> U,
) -> Option<U>
where
    T: 'static,
{
    Runtime::with(|rt| {
        let value = rt.nodes.borrow().get(id).map(|n| n.value())?;
        let mut value = value.borrow_mut();
        value.downcast_mut::<AsyncValue<T>>().map(f)
    })
}

fn commit_if_settled<T>(id: NodeId)
where
    T: Clone + Serializable + 'static,
{
    let changed = with_async_value(id, |state: &mut AsyncValue<T>| {
        let Some(pending) = &state.pending else {
            return false;
        };
        let outcome: Option<Result<Option<T>, Interrupt>> = match pending {
            PendingSource::Typed(f) => f.peek().map(|opt| Ok(opt.clone())),
            PendingSource::Wire(f) => f.peek().map(|v| {
                T::from_value(v.clone())
                    .map(Some)
                    .map_err(|e| Interrupt::Error(Error::from(e)))
            }),
        };
        let Some(outcome) = outcome else {
            return false;
        };
        state.pending = None;
        match outcome {
            Ok(Some(v)) => {
                if !state.locked {
                    state.value = Some(v);
                    if state.lock_on_settle {
                        state.locked = true;
                    }
                }
                state.interrupt = None;
            }
            Ok(None) => {
                state.interrupt = Some(Interrupt::Error(Error::msg(
                    "stream ended before yielding a value",
                )));
            }
            Err(interrupt) => state.interrupt = Some(interrupt),
        }
        true
    })
    .unwrap_or(false);
    if changed {
        Runtime::with(|rt| {
            rt.mark_dirty(id);
            rt.run_effects();
        });
    }
}

impl<T> AsyncMemo<T>
where
    T: Clone + Serializable + 'static,
{
    /// Reads the current value, subscribing the running computation.
    ///
    /// Before the asynchronous work settles this returns
    /// [`Interrupt::NotReady`] (unless an initial value was provided); after
    /// settlement it returns the resolved value. A settled-but-uncommitted
    /// source is committed by this read.
    pub fn read(&self) -> Result<T, Interrupt> {
        Runtime::with(|rt| rt.track(self.id));
        commit_if_settled::<T>(self.id);
        let current = || {
            with_async_value(self.id, |state: &mut AsyncValue<T>| {
                match (&state.interrupt, &state.value) {
                    (Some(interrupt), _) => Err(interrupt.clone()),
                    (None, Some(value)) => Ok(value.clone()),
                    (None, None) => Err(Interrupt::Error(Error::msg(
                        "async value read before initialization",
                    ))),
                }
            })
            .unwrap_or_else(|| {
                Err(Interrupt::Error(Error::msg(
                    "async value has been disposed",
                )))
            })
        };
        if snapshot::observer_scope().is_some() {
            let live = current();
            snapshot::read_maybe_snapshot(self.id, move || live, |v| v.clone())
        } else {
            current()
        }
    }

    /// A future that settles when the in-flight work settles, or `None` when
    /// nothing is pending.
    pub fn ready(&self) -> Option<WakeFuture> {
        with_async_value(self.id, |state: &mut AsyncValue<T>| {
            state
                .pending
                .as_ref()
                .map(|p| not_ready_for(p).source())
        })
        .flatten()
    }
}

impl<T> SignalGet<T> for AsyncMemo<T>
where
    T: Clone + Serializable + 'static,
{
    /// # Panics
    /// Panics while the value is pending; use [`AsyncMemo::read`] to
    /// propagate suspension instead.
    #[track_caller]
    fn get(&self) -> T {
        self.read()
            .expect("async value read while pending; use AsyncMemo::read")
    }

    fn try_get(&self) -> Option<T> {
        self.read().ok()
    }
}

impl<T> SignalGetUntracked<T> for AsyncMemo<T>
where
    T: Clone + Serializable + 'static,
{
    fn get_untracked(&self) -> T {
        crate::untrack(|| self.get())
    }
}

impl<T> SignalDispose for AsyncMemo<T> {
    fn dispose(self) {
        Runtime::with(|rt| rt.dispose_node(self.id));
    }
}
