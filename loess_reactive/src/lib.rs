#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! The reactive system for the Loess rendering runtime.
//!
//! This crate implements a pull-based fine-grained reactive graph with an
//! ownership tree whose string ids are deterministic across re-execution:
//! the k-th primitive created under an owner receives the same id on every
//! run of that owner's body. That determinism is what lets the server's
//! serialized side channel (see `loess_hydration`) line up with the client's
//! hydration walk without any explicit path scheme.
//!
//! The primitives come in three groups:
//!
//! - synchronous: [`create_signal`], [`create_memo`], [`create_effect`],
//!   [`create_trigger`], [`create_store`];
//! - asynchronous: [`create_async_memo`] over futures,
//!   [`create_stream_memo`] over streams, [`create_projection`] for stores
//!   produced over time, all suspension-aware through
//!   [`Interrupt`](loess_error::Interrupt);
//! - hydration-aware: every constructor consults the installed
//!   [`HydrationContext`](loess_hydration::HydrationContext) and, when
//!   hydrating in the browser, consumes the server-serialized value for its
//!   id instead of re-running work. Snapshot scopes (see
//!   [`mark_snapshot_scope`]) keep computations created during the
//!   hydration walk reading server-era values until their scope releases.

mod async_memo;
mod context;
mod effect;
mod hydration;
mod memo;
mod node;
mod owner;
mod patch;
mod runtime;
mod serialization;
mod signal;
mod snapshot;
mod spawn;
mod store;
mod stream_memo;
mod trigger;

pub use async_memo::{
    create_async_memo, create_async_memo_with_options, AsyncMemo,
    AsyncOptions, SsrSourceMode,
};
pub use context::*;
pub use effect::*;
pub use hydration::{
    decrement_pending_boundaries, finish_hydration, hydration_done,
    increment_pending_boundaries, is_hydrating, load_assets,
    on_hydration_end, reset_hydration, set_asset_loader, set_hydrating,
    start_hydration, with_hydration_off, with_hydration_on,
};
pub use loess_error::{
    ContextNotFoundError, Error, Interrupt, NoOwnerError, NotReady,
    WakeFuture,
};
pub use memo::{
    create_memo, create_memo_with_options, create_optimistic,
    create_writable_memo, Memo, MemoOptions, SetMemo,
};
pub use node::NodeId;
pub use owner::{
    create_owner, create_owner_with_id, create_root, detached, next_child_id,
    on_cleanup, peek_next_child_id, run_root, try_create_owner, with_owner,
    Owner, OwnerKey,
};
pub use patch::{
    apply_patches, batch_from_value, batch_to_value, PatchOp, PathKey,
    StoreDraft,
};
pub use runtime::{
    batch, set_shared_context, shared_context, untrack, with_shared_context,
};
pub use serialization::{Serializable, SerializationError};
pub use signal::{
    create_rw_signal, create_signal, ReadSignal, RwSignal, SignalDispose,
    SignalGet, SignalGetUntracked, SignalSet, SignalUpdate, SignalWith,
    WriteSignal,
};
pub use snapshot::{
    clear_snapshots, mark_snapshot_scope, release_snapshot_scope,
    set_snapshot_capture, snapshot_capture,
};
pub use spawn::{queue_microtask, run_scheduled, schedule_local, spawn_local};
pub use store::{
    create_optimistic_store, create_projection, create_store, Projection,
    ProjectionDraft, SetStore, Store,
};
pub use stream_memo::{create_stream_memo, create_stream_memo_with_options};
pub use trigger::{create_trigger, Trigger};
