#![forbid(unsafe_code)]

//! Client-side hydration state.
//!
//! Hydration proceeds as a synchronous walk that adopts server-rendered
//! output while primitives read their values from the serialized side
//! channel. This module owns the process-wide flags that drive that
//! lifecycle: the `hydrating` flag (whose transitions switch snapshot
//! capture on and off), the pending-boundary counter, and the queue of
//! callbacks to run once hydration has fully completed.

use crate::{
    owner::{Owner, OwnerKey},
    runtime::Runtime,
    snapshot,
};
use loess_hydration::{HydrationContext, PinnedLocalFuture};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

type AssetLoader =
    dyn Fn(Vec<(String, String)>) -> PinnedLocalFuture<()>;

#[derive(Default)]
pub(crate) struct HydrationState {
    hydrating: Cell<bool>,
    done: Cell<bool>,
    pending_boundaries: Cell<usize>,
    on_end: RefCell<Vec<Box<dyn FnOnce()>>>,
    deferred_live: RefCell<Vec<Box<dyn FnOnce()>>>,
    top_scope: Cell<Option<OwnerKey>>,
    asset_loader: RefCell<Option<Rc<AssetLoader>>>,
}

/// Installs the given context and enters hydration: snapshot capture is
/// switched on and the pending-boundary counter reset.
pub fn start_hydration(ctx: Rc<dyn HydrationContext>) {
    crate::set_shared_context(Some(ctx));
    set_hydrating(true);
}

/// Whether the client is currently inside the synchronous hydration walk.
pub fn is_hydrating() -> bool {
    Runtime::with(|rt| rt.hydration.hydrating.get())
}

/// Whether hydration has fully completed (all boundaries resumed).
pub fn hydration_done() -> bool {
    Runtime::with(|rt| rt.hydration.done.get())
}

/// Transitions the hydrating flag.
///
/// `false → true` switches snapshot capture on and resets the boundary
/// counter; `true → false` releases the top-level snapshot scope, re-runs
/// stale computations against live values, flips deferred primitives to
/// their live computations, and checks for completion.
pub fn set_hydrating(on: bool) {
    let prev = Runtime::with(|rt| rt.hydration.hydrating.replace(on));
    if !prev && on {
        snapshot::set_snapshot_capture(true);
        Runtime::with(|rt| rt.hydration.pending_boundaries.set(0));
    } else if prev && !on {
        snapshot::set_snapshot_capture(false);
        let top = Runtime::with(|rt| rt.hydration.top_scope.take());
        if let Some(key) = top {
            snapshot::release_snapshot_scope(Owner { key });
        }
        snapshot::clear_snapshots();
        let deferred = Runtime::with(|rt| {
            std::mem::take(&mut *rt.hydration.deferred_live.borrow_mut())
        });
        for start_live in deferred {
            start_live();
        }
        maybe_complete();
    }
}

/// Ends the synchronous hydration walk. Equivalent to
/// `set_hydrating(false)`.
pub fn finish_hydration() {
    set_hydrating(false);
}

/// Runs `f` with the hydrating flag scoped on, restoring it afterwards.
/// Used by boundaries that re-enter hydration locally when streamed data
/// arrives.
pub fn with_hydration_on<T>(f: impl FnOnce() -> T) -> T {
    let prev = Runtime::with(|rt| rt.hydration.hydrating.replace(true));
    let value = f();
    Runtime::with(|rt| rt.hydration.hydrating.set(prev));
    value
}

/// Runs `f` with the hydrating flag scoped off.
pub fn with_hydration_off<T>(f: impl FnOnce() -> T) -> T {
    let prev = Runtime::with(|rt| rt.hydration.hydrating.replace(false));
    let value = f();
    Runtime::with(|rt| rt.hydration.hydrating.set(prev));
    value
}

/// Registers a callback to run once hydration fully completes. Runs
/// immediately if it already has.
pub fn on_hydration_end(f: impl FnOnce() + 'static) {
    if hydration_done() {
        f();
    } else {
        Runtime::with(|rt| {
            rt.hydration.on_end.borrow_mut().push(Box::new(f))
        });
    }
}

/// The first hydrated primitive captures the enclosing root owner as the
/// top-level snapshot scope.
pub(crate) fn ensure_top_snapshot_scope() {
    Runtime::with(|rt| {
        if !rt.hydration.hydrating.get()
            || rt.hydration.top_scope.get().is_some()
        {
            return;
        }
        let mut current = rt.owner.get();
        let owners = rt.owners.borrow();
        let mut root = None;
        while let Some(key) = current {
            root = Some(key);
            current = owners.get(key).and_then(|o| o.parent);
        }
        drop(owners);
        if let Some(root) = root {
            rt.hydration.top_scope.set(Some(root));
        }
    });
    let top = Runtime::with(|rt| rt.hydration.top_scope.get());
    if let Some(key) = top {
        snapshot::mark_snapshot_scope(Owner { key });
    }
}

/// Records one boundary awaiting streamed data.
pub fn increment_pending_boundaries() {
    Runtime::with(|rt| {
        let n = rt.hydration.pending_boundaries.get();
        rt.hydration.pending_boundaries.set(n + 1);
    });
}

/// Marks one boundary as resumed; when no boundaries remain and the
/// synchronous walk has ended, hydration completes and end callbacks drain.
pub fn decrement_pending_boundaries() {
    let complete = Runtime::with(|rt| {
        let n = rt.hydration.pending_boundaries.get().saturating_sub(1);
        rt.hydration.pending_boundaries.set(n);
        n == 0 && !rt.hydration.hydrating.get()
    });
    if complete {
        maybe_complete();
    }
}

fn maybe_complete() {
    let callbacks = Runtime::with(|rt| {
        if rt.hydration.pending_boundaries.get() == 0
            && !rt.hydration.hydrating.get()
            && !rt.hydration.done.get()
        {
            rt.hydration.done.set(true);
            Some(std::mem::take(&mut *rt.hydration.on_end.borrow_mut()))
        } else {
            None
        }
    });
    if let Some(callbacks) = callbacks {
        for f in callbacks {
            f();
        }
    }
}

/// Defers a primitive's switch to live computation until hydration's
/// top-level scope releases.
pub(crate) fn defer_until_live(f: impl FnOnce() + 'static) {
    Runtime::with(|rt| {
        rt.hydration.deferred_live.borrow_mut().push(Box::new(f))
    });
}

/// Installs the hook that preloads a boundary's module assets, returning a
/// future that resolves when they are ready.
pub fn set_asset_loader(
    f: impl Fn(Vec<(String, String)>) -> PinnedLocalFuture<()> + 'static,
) {
    Runtime::with(|rt| {
        *rt.hydration.asset_loader.borrow_mut() = Some(Rc::new(f));
    });
}

/// Kicks off preloading for a boundary's modules.
pub fn load_assets(
    modules: Vec<(String, String)>,
) -> PinnedLocalFuture<()> {
    let loader = Runtime::with(|rt| rt.hydration.asset_loader.borrow().clone());
    match loader {
        Some(loader) if !modules.is_empty() => loader(modules),
        _ => Box::pin(futures::future::ready(())),
    }
}

/// Resets hydration state between renders; used by tests and by full
/// client-side navigations.
pub fn reset_hydration() {
    Runtime::with(|rt| {
        rt.hydration.hydrating.set(false);
        rt.hydration.done.set(false);
        rt.hydration.pending_boundaries.set(0);
        rt.hydration.on_end.borrow_mut().clear();
        rt.hydration.deferred_live.borrow_mut().clear();
        rt.hydration.top_scope.set(None);
    });
    snapshot::set_snapshot_capture(false);
    snapshot::clear_snapshots();
}
