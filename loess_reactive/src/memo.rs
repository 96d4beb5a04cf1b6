#![forbid(unsafe_code)]
use crate::{
    node::{
        AnyComputation, NodeId, ReactiveNode, ReactiveNodeState,
        ReactiveNodeType,
    },
    owner::{
        create_owner_with_id, next_primitive_id, peek_next_child_id,
        register_node, Owner,
    },
    runtime::Runtime,
    serialization::Serializable,
    signal::{SignalDispose, SignalGet, SignalGetUntracked, SignalWith},
    snapshot, with_owner,
};
use loess_error::Interrupt;
use loess_hydration::SerializedValue;
use std::{any::Any, cell::RefCell, marker::PhantomData, rc::Rc};

/// Options accepted by [`create_memo_with_options`] and the other
/// suspension-aware primitives.
pub struct MemoOptions<T> {
    /// Defer the first computation to the first read instead of running
    /// eagerly at creation.
    pub lazy: bool,
    /// Custom equality for change detection; defaults to `PartialEq`.
    #[allow(clippy::type_complexity)]
    pub equals: Option<Rc<dyn Fn(&T, &T) -> bool>>,
}

impl<T> Default for MemoOptions<T> {
    fn default() -> Self {
        Self {
            lazy: false,
            equals: None,
        }
    }
}

/// Creates an efficient derived reactive value based on other reactive
/// values.
///
/// Memos here are suspension-aware: the computation returns
/// `Result<T, Interrupt>`, so a read of a pending asynchronous value
/// propagates with `?` and the memo retries once the dependency settles.
/// Unlike a plain derived closure, a memo runs only once per change and only
/// notifies dependents when its value actually changes.
///
/// Memos run eagerly at creation by default, so that a Loading boundary can
/// observe suspension; pass `lazy: true` in
/// [`create_memo_with_options`] to defer to the first read.
///
/// ```
/// # use loess_reactive::*;
/// # run_root("t", || {
/// let (value, set_value) = create_signal(2);
/// let doubled = create_memo(move |_| Ok(value.get() * 2));
/// assert_eq!(doubled.get(), 4);
/// set_value.set(5);
/// assert_eq!(doubled.get(), 10);
/// # });
/// ```
#[track_caller]
pub fn create_memo<T>(
    f: impl Fn(Option<&T>) -> Result<T, Interrupt> + 'static,
) -> Memo<T>
where
    T: Clone + PartialEq + 'static,
{
    create_memo_with_options(f, MemoOptions::default())
}

/// Creates a memo with explicit [`MemoOptions`].
#[track_caller]
pub fn create_memo_with_options<T>(
    f: impl Fn(Option<&T>) -> Result<T, Interrupt> + 'static,
    options: MemoOptions<T>,
) -> Memo<T>
where
    T: Clone + PartialEq + 'static,
{
    let owner = memo_owner();
    let equals = options
        .equals
        .unwrap_or_else(|| Rc::new(|a: &T, b: &T| a == b));
    let state = Rc::new(MemoState {
        f,
        owner,
        equals,
        t: PhantomData,
    });
    let id = create_memo_node::<T>(state, None);
    if !options.lazy {
        Runtime::with(|rt| rt.update_if_necessary(id));
    }
    Memo {
        id,
        owner,
        ty: PhantomData,
    }
}

/// Creates an owner for a memo-like computation, consuming one child-id slot
/// of the current owner. The owner's id is the primitive's wire id, and
/// re-running the computation disposes the owner's contents so nested
/// primitives regenerate the same ids.
pub(crate) fn memo_owner() -> Owner {
    match Owner::current() {
        Some(parent) => {
            let id = crate::owner::next_child_id(parent);
            create_owner_with_id(parent, id)
        }
        None => {
            let id = next_primitive_id();
            Runtime::with(|rt| {
                let key = rt.owners.borrow_mut().insert(
                    crate::owner::OwnerState::new_detached(id),
                );
                Owner { key }
            })
        }
    }
}

pub(crate) fn create_memo_node<T>(
    f: Rc<dyn AnyComputation>,
    initial: Option<MemoValue<T>>,
) -> NodeId
where
    T: 'static,
{
    let scope = snapshot::scope_for_new_computation();
    let id = Runtime::with(|rt| {
        rt.nodes.borrow_mut().insert(ReactiveNode {
            value: Some(Rc::new(RefCell::new(initial.unwrap_or(
                MemoValue {
                    value: None,
                    interrupt: None,
                },
            )))),
            // memos are created dirty and run the first time they are
            // pulled (or immediately, when eager)
            state: ReactiveNodeState::Dirty,
            node_type: ReactiveNodeType::Memo { f },
            snapshot_scope: scope,
        })
    });
    if let Some(scope) = scope {
        snapshot::register_computation(scope, id);
    }
    register_node(id);
    id
}

/// The stored state of a memo: its current value, or the reason the last
/// computation could not produce one.
pub(crate) struct MemoValue<T> {
    pub value: Option<T>,
    pub interrupt: Option<Interrupt>,
}

struct MemoState<T, F>
where
    F: Fn(Option<&T>) -> Result<T, Interrupt>,
{
    f: F,
    owner: Owner,
    equals: Rc<dyn Fn(&T, &T) -> bool>,
    t: PhantomData<T>,
}

impl<T, F> AnyComputation for MemoState<T, F>
where
    T: Clone + 'static,
    F: Fn(Option<&T>) -> Result<T, Interrupt>,
{
    fn run(&self, value: Rc<RefCell<dyn Any>>) -> bool {
        let prev = {
            let value = value.borrow();
            let state = value
                .downcast_ref::<MemoValue<T>>()
                .expect("to downcast memo value");
            state.value.clone()
        };
        // re-running under the memo's own owner resets nested ids and runs
        // nested cleanups
        self.owner.dispose(true);
        let result = with_owner(self.owner, || (self.f)(prev.as_ref()));
        let mut value = value.borrow_mut();
        let state = value
            .downcast_mut::<MemoValue<T>>()
            .expect("to downcast memo value");
        match result {
            Ok(new) => {
                let was_interrupted = state.interrupt.take().is_some();
                let changed = was_interrupted
                    || match &prev {
                        Some(prev) => !(self.equals)(prev, &new),
                        None => true,
                    };
                state.value = Some(new);
                changed
            }
            Err(interrupt) => {
                state.interrupt = Some(interrupt);
                true
            }
        }
    }
}

/// An efficient derived reactive value based on other reactive values.
///
/// See [`create_memo`].
#[derive(Debug)]
pub struct Memo<T>
where
    T: 'static,
{
    pub(crate) id: NodeId,
    pub(crate) owner: Owner,
    pub(crate) ty: PhantomData<T>,
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Memo<T> {}

impl<T> Memo<T>
where
    T: Clone + 'static,
{
    /// The memo's wire id (the id of its owner).
    pub fn id(&self) -> String {
        self.owner.id()
    }

    /// Reads the memo, subscribing the running computation.
    ///
    /// Returns `Err` when the last computation suspended on asynchronous
    /// work or failed; a suspension whose dependency has since settled is
    /// retried before returning.
    pub fn read(&self) -> Result<T, Interrupt> {
        Runtime::with(|rt| rt.track(self.id));
        read_memo_value(self.id)
    }
}

pub(crate) fn read_memo_value<T>(id: NodeId) -> Result<T, Interrupt>
where
    T: Clone + 'static,
{
    Runtime::with(|rt| rt.update_if_necessary(id));
    // a suspension whose source has settled is retried on this read: this is
    // the pull-based edge of the memo's wake chain
    let needs_retry = peek_memo(id, |state: &MemoValue<T>| {
        matches!(
            &state.interrupt,
            Some(Interrupt::NotReady(nr)) if nr.is_settled()
        )
    })
    .unwrap_or(false);
    if needs_retry {
        Runtime::with(|rt| {
            rt.mark_dirty(id);
            rt.update_if_necessary(id);
        });
    }

    let current = || {
        peek_memo(id, |state: &MemoValue<T>| match &state.interrupt {
            Some(interrupt) => Err(interrupt.clone()),
            None => state.value.clone().ok_or_else(|| {
                Interrupt::Error(loess_error::Error::msg(
                    "memo read before its first computation",
                ))
            }),
        })
        .unwrap_or_else(|| {
            Err(Interrupt::Error(loess_error::Error::msg(
                "memo has been disposed",
            )))
        })
    };

    if snapshot::observer_scope().is_some() {
        let live = current();
        snapshot::read_maybe_snapshot(id, move || live, |v| v.clone())
    } else {
        current()
    }
}

fn peek_memo<T, U>(
    id: NodeId,
    f: impl FnOnce(&MemoValue<T>) -> U,
) -> Option<U>
where
    T: 'static,
{
    Runtime::with(|rt| {
        let value = rt.nodes.borrow().get(id).map(|n| n.value())?;
        let value = value.borrow();
        value.downcast_ref::<MemoValue<T>>().map(f)
    })
}

impl<T: Clone + 'static> SignalGet<T> for Memo<T> {
    /// # Panics
    /// Panics if the memo is suspended or failed; use [`Memo::read`] to
    /// propagate instead.
    #[track_caller]
    fn get(&self) -> T {
        self.read()
            .expect("memo read while suspended or failed; use Memo::read")
    }

    fn try_get(&self) -> Option<T> {
        self.read().ok()
    }
}

impl<T: Clone + 'static> SignalGetUntracked<T> for Memo<T> {
    fn get_untracked(&self) -> T {
        crate::untrack(|| self.get())
    }
}

impl<T: Clone + 'static> SignalWith<T> for Memo<T> {
    fn with<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        f(&self.get())
    }
}

impl<T> SignalDispose for Memo<T> {
    fn dispose(self) {
        Runtime::with(|rt| rt.dispose_node(self.id));
        self.owner.dispose(false);
    }
}

/// The setter half of a writable memo; see [`create_writable_memo`].
#[derive(Debug)]
pub struct SetMemo<T>
where
    T: 'static,
{
    id: NodeId,
    ty: PhantomData<T>,
}

impl<T> Clone for SetMemo<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SetMemo<T> {}

impl<T> crate::signal::SignalSet<T> for SetMemo<T>
where
    T: 'static,
{
    fn set(&self, value: T) {
        let wrote = Runtime::with(|rt| {
            let node = rt.nodes.borrow().get(self.id).map(|n| n.value());
            if let Some(node) = node {
                let mut state = node.borrow_mut();
                if let Some(state) = state.downcast_mut::<MemoValue<T>>() {
                    state.value = Some(value);
                    state.interrupt = None;
                    return true;
                }
            }
            false
        });
        if wrote {
            Runtime::with(|rt| {
                rt.mark_dirty(self.id);
                rt.run_effects();
            });
        }
    }
}

/// Creates a memo whose value can also be set directly.
///
/// This is the suspension-aware carrier behind derived writable state:
/// writes override the computed value until a dependency next changes, at
/// which point the computation wins again.
#[track_caller]
pub fn create_writable_memo<T>(
    f: impl Fn(Option<&T>) -> Result<T, Interrupt> + 'static,
) -> (Memo<T>, SetMemo<T>)
where
    T: Clone + PartialEq + 'static,
{
    let memo = create_memo(f);
    (
        memo,
        SetMemo {
            id: memo.id,
            ty: PhantomData,
        },
    )
}

/// Creates a reactive value that tracks an underlying computation but may be
/// set optimistically ahead of it.
///
/// On the server the computed value is serialized at the primitive's id; a
/// hydrating client seeds from that entry instead of recomputing, so the
/// optimistic value matches the HTML being adopted.
#[track_caller]
pub fn create_optimistic<T>(
    f: impl Fn(Option<&T>) -> Result<T, Interrupt> + 'static,
) -> (Memo<T>, SetMemo<T>)
where
    T: Clone + PartialEq + Serializable + 'static,
{
    let ctx = crate::shared_context();
    if let Some(ctx) = &ctx {
        if let Some(parent) = Owner::current() {
            if ctx.is_browser() && crate::is_hydrating() {
                let id = peek_next_child_id(parent);
                if let Some(value) = ctx.load(&id) {
                    if let Some(seed) = deserialize_entry::<T>(&value) {
                        crate::hydration::ensure_top_snapshot_scope();
                        let owner = memo_owner();
                        let node = create_memo_node::<T>(
                            Rc::new(InertComputation),
                            Some(MemoValue {
                                value: Some(seed),
                                interrupt: None,
                            }),
                        );
                        mark_node_clean(node);
                        ctx.gather(&id);
                        return (
                            Memo {
                                id: node,
                                owner,
                                ty: PhantomData,
                            },
                            SetMemo {
                                id: node,
                                ty: PhantomData,
                            },
                        );
                    }
                }
            }
        }
    }
    let (memo, set_memo) = create_writable_memo(f);
    if let Some(ctx) = ctx {
        if !ctx.is_browser() {
            if let Ok(Ok(value)) =
                memo.read().map(|v| Serializable::to_value(&v))
            {
                ctx.serialize(
                    &memo.id(),
                    SerializedValue::Sync(value),
                    false,
                );
            }
        }
    }
    (memo, set_memo)
}

pub(crate) fn deserialize_entry<T>(value: &SerializedValue) -> Option<T>
where
    T: Serializable,
{
    value.peek().and_then(|v| T::from_value(v).ok())
}

pub(crate) fn mark_node_clean(id: NodeId) {
    Runtime::with(|rt| {
        if let Some(node) = rt.nodes.borrow_mut().get_mut(id) {
            node.state = ReactiveNodeState::Clean;
        }
    });
}

/// A computation that never runs; used for hydrated nodes whose value came
/// from the server.
pub(crate) struct InertComputation;

impl AnyComputation for InertComputation {
    fn run(&self, _value: Rc<RefCell<dyn Any>>) -> bool {
        false
    }
}
