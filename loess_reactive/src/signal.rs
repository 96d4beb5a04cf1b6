#![forbid(unsafe_code)]
use crate::{
    node::{NodeId, ReactiveNode, ReactiveNodeState, ReactiveNodeType},
    owner::{next_primitive_id, register_node},
    runtime::Runtime,
    snapshot,
};
use std::{cell::RefCell, marker::PhantomData, rc::Rc};

/// Creates a signal, the basic reactive primitive: a `(getter, setter)` pair
/// over plain storage.
///
/// Takes the initial value as an argument and returns a read handle and a
/// write handle. Reads inside computations subscribe the computation to the
/// signal; writes notify subscribers.
///
/// ```
/// # use loess_reactive::*;
/// # run_root("t", || {
/// let (count, set_count) = create_signal(0);
/// assert_eq!(count.get(), 0);
/// set_count.set(5);
/// assert_eq!(count.get(), 5);
/// # });
/// ```
#[track_caller]
pub fn create_signal<T>(value: T) -> (ReadSignal<T>, WriteSignal<T>)
where
    T: Clone + 'static,
{
    let id = create_signal_node(value);
    (
        ReadSignal {
            id,
            ty: PhantomData,
        },
        WriteSignal {
            id,
            ty: PhantomData,
        },
    )
}

/// Creates a signal exposed through a single read-write handle.
#[track_caller]
pub fn create_rw_signal<T>(value: T) -> RwSignal<T>
where
    T: Clone + 'static,
{
    let id = create_signal_node(value);
    RwSignal {
        id,
        ty: PhantomData,
    }
}

pub(crate) fn create_signal_node<T>(value: T) -> NodeId
where
    T: 'static,
{
    // every primitive consumes one child-id slot so that sibling ids stay
    // stable across re-execution
    create_signal_node_with_id(value).0
}

pub(crate) fn create_signal_node_with_id<T>(value: T) -> (NodeId, String)
where
    T: 'static,
{
    let wire_id = next_primitive_id();
    let id = Runtime::with(|rt| {
        rt.nodes.borrow_mut().insert(ReactiveNode {
            value: Some(Rc::new(RefCell::new(value))),
            state: ReactiveNodeState::Clean,
            node_type: ReactiveNodeType::Signal,
            snapshot_scope: None,
        })
    });
    register_node(id);
    (id, wire_id)
}

/// The getter half of a signal.
#[derive(Debug, PartialEq, Eq)]
pub struct ReadSignal<T>
where
    T: 'static,
{
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
}

impl<T> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ReadSignal<T> {}

/// The setter half of a signal.
#[derive(Debug, PartialEq, Eq)]
pub struct WriteSignal<T>
where
    T: 'static,
{
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
}

impl<T> Clone for WriteSignal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for WriteSignal<T> {}

/// A signal that can be both read and written through one handle.
#[derive(Debug, PartialEq, Eq)]
pub struct RwSignal<T>
where
    T: 'static,
{
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
}

impl<T> Clone for RwSignal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RwSignal<T> {}

impl<T> RwSignal<T>
where
    T: Clone + 'static,
{
    /// Returns the read half of this signal.
    pub fn read_only(&self) -> ReadSignal<T> {
        ReadSignal {
            id: self.id,
            ty: PhantomData,
        }
    }

    /// Returns the write half of this signal.
    pub fn write_only(&self) -> WriteSignal<T> {
        WriteSignal {
            id: self.id,
            ty: PhantomData,
        }
    }
}

/* Value plumbing */

pub(crate) fn try_clone_value<T>(id: NodeId) -> Option<T>
where
    T: Clone + 'static,
{
    Runtime::with(|rt| {
        let value = rt.nodes.borrow().get(id).map(|n| n.value())?;
        let value = value.borrow();
        value.downcast_ref::<T>().cloned()
    })
}

pub(crate) fn with_value_mut<T, U>(
    id: NodeId,
    f: impl FnOnce(&mut T) -> U,
) -> Option<U>
where
    T: 'static,
{
    Runtime::with(|rt| {
        let value = rt.nodes.borrow().get(id).map(|n| n.value())?;
        let mut value = value.borrow_mut();
        value.downcast_mut::<T>().map(f)
    })
}

pub(crate) fn write_and_notify<T>(id: NodeId, f: impl FnOnce(&mut T))
where
    T: 'static,
{
    let wrote = with_value_mut(id, f).is_some();
    if wrote {
        Runtime::with(|rt| {
            rt.mark_dirty(id);
            rt.run_effects();
        });
    } else {
        tracing::warn!("tried to write to a signal that has been disposed");
    }
}

fn read_tracked<T, U>(id: NodeId, f: impl FnOnce(&T) -> U) -> Option<U>
where
    T: Clone + 'static,
{
    Runtime::with(|rt| rt.track(id));
    if snapshot::observer_scope().is_some() {
        let live = try_clone_value::<T>(id)?;
        Some(snapshot::read_maybe_snapshot(id, move || live, f))
    } else {
        let value = try_clone_value::<T>(id)?;
        Some(f(&value))
    }
}

/* Access traits */

/// Clones and returns a reactive value, subscribing the running computation.
pub trait SignalGet<T> {
    /// Clones and returns the current value, subscribing the running
    /// computation.
    ///
    /// # Panics
    /// Panics if the underlying node has been disposed.
    fn get(&self) -> T;

    /// Clones and returns the current value, or `None` if the node has been
    /// disposed.
    fn try_get(&self) -> Option<T>;
}

/// Clones and returns a reactive value without subscribing.
pub trait SignalGetUntracked<T> {
    /// Clones and returns the current value without subscribing the running
    /// computation.
    fn get_untracked(&self) -> T;
}

/// Applies a function to a reactive value, subscribing the running
/// computation.
pub trait SignalWith<T> {
    /// Applies `f` to the current value, subscribing the running
    /// computation.
    fn with<U>(&self, f: impl FnOnce(&T) -> U) -> U;
}

/// Sets a reactive value, notifying subscribers.
pub trait SignalSet<T> {
    /// Replaces the current value and notifies subscribers.
    fn set(&self, value: T);
}

/// Updates a reactive value in place, notifying subscribers.
pub trait SignalUpdate<T> {
    /// Mutates the current value in place and notifies subscribers.
    fn update(&self, f: impl FnOnce(&mut T));
}

/// Disposes of a reactive node before its owner would.
pub trait SignalDispose {
    /// Removes the node from the reactive graph.
    fn dispose(self);
}

impl<T: Clone + 'static> SignalGet<T> for ReadSignal<T> {
    #[track_caller]
    fn get(&self) -> T {
        self.try_get()
            .expect("tried to access a signal that has been disposed")
    }

    fn try_get(&self) -> Option<T> {
        read_tracked(self.id, T::clone)
    }
}

impl<T: Clone + 'static> SignalGetUntracked<T> for ReadSignal<T> {
    #[track_caller]
    fn get_untracked(&self) -> T {
        try_clone_value(self.id)
            .expect("tried to access a signal that has been disposed")
    }
}

impl<T: Clone + 'static> SignalWith<T> for ReadSignal<T> {
    #[track_caller]
    fn with<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        read_tracked(self.id, f)
            .expect("tried to access a signal that has been disposed")
    }
}

impl<T: 'static> SignalSet<T> for WriteSignal<T> {
    fn set(&self, value: T) {
        write_and_notify(self.id, |v| *v = value);
    }
}

impl<T: 'static> SignalUpdate<T> for WriteSignal<T> {
    fn update(&self, f: impl FnOnce(&mut T)) {
        write_and_notify(self.id, f);
    }
}

impl<T: Clone + 'static> SignalGet<T> for RwSignal<T> {
    #[track_caller]
    fn get(&self) -> T {
        self.read_only().get()
    }

    fn try_get(&self) -> Option<T> {
        self.read_only().try_get()
    }
}

impl<T: Clone + 'static> SignalGetUntracked<T> for RwSignal<T> {
    fn get_untracked(&self) -> T {
        self.read_only().get_untracked()
    }
}

impl<T: Clone + 'static> SignalWith<T> for RwSignal<T> {
    fn with<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        self.read_only().with(f)
    }
}

impl<T: Clone + 'static> SignalSet<T> for RwSignal<T> {
    fn set(&self, value: T) {
        write_and_notify(self.id, |v| *v = value);
    }
}

impl<T: Clone + 'static> SignalUpdate<T> for RwSignal<T> {
    fn update(&self, f: impl FnOnce(&mut T)) {
        write_and_notify(self.id, f);
    }
}

impl<T> SignalDispose for ReadSignal<T> {
    fn dispose(self) {
        Runtime::with(|rt| rt.dispose_node(self.id));
    }
}

impl<T> SignalDispose for RwSignal<T> {
    fn dispose(self) {
        Runtime::with(|rt| rt.dispose_node(self.id));
    }
}
