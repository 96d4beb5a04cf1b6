#![forbid(unsafe_code)]

//! The Loading boundary.
//!
//! On the server, a boundary runs its children, captures suspensions as
//! template holes, and resolves them out of order: if everything settles
//! synchronously the resolved HTML is returned inline; otherwise the
//! boundary registers a streaming fragment, returns its fallback between
//! placeholder markers, and a retry loop re-executes the holes as their
//! dependencies settle until the final HTML can be handed to the transport.
//! In one-shot rendering there is nothing to stream to, so the boundary
//! serializes the `"$$f"` sentinel and the client loads its own data.
//!
//! On a hydrating client, the boundary looks up the fragment serialized at
//! its id, waits for the data (and any per-boundary module assets), then
//! re-enters hydration locally under a snapshot scope to adopt the streamed
//! content.

use futures::{future::join_all, FutureExt};
use loess_error::{Error, Interrupt, NotReady};
use loess_hydration::{
    FragmentHandle, HydrationContext, SerializedValue, ASSETS_KEY_SUFFIX,
};
use loess_reactive::{
    create_owner, create_trigger, decrement_pending_boundaries, detached,
    increment_pending_boundaries, is_hydrating, load_assets,
    mark_snapshot_scope, on_cleanup, queue_microtask,
    release_snapshot_scope, schedule_local, set_snapshot_capture,
    with_hydration_on, with_owner, with_shared_context, Owner, SignalDispose,
};
use loess_ssr::{
    placeholder_close, placeholder_open, resolve, SsrTemplate, TemplateValue,
};
use serde_json::Value;
use std::{cell::Cell, rc::Rc};

/// A view function: the children of a boundary or component.
pub type ViewFn = Rc<dyn Fn() -> Result<TemplateValue, Interrupt>>;

/// Runs `children` under a Loading boundary.
///
/// While any read inside `children` is still waiting on asynchronous work,
/// the boundary shows `fallback`; once everything has settled the children's
/// HTML replaces it, either inline, streamed as a fragment, or on the client
/// after hydration data arrives. See the module docs for the full protocol.
#[tracing::instrument(level = "trace", skip_all)]
pub fn loading_boundary(
    children: impl Fn() -> Result<TemplateValue, Interrupt> + 'static,
    fallback: impl Fn() -> TemplateValue + 'static,
) -> Result<TemplateValue, Interrupt> {
    let children: ViewFn = Rc::new(children);
    let fallback: Rc<dyn Fn() -> TemplateValue> = Rc::new(fallback);
    let Some(ctx) = loess_reactive::shared_context() else {
        // no rendering context: plain load-boundary semantics
        return create_load_boundary_view(children, fallback);
    };
    if ctx.is_browser() {
        client_boundary(ctx, children, fallback)
    } else {
        server_boundary(ctx, children, fallback)
    }
}

/* Server */

enum FirstAttempt {
    /// `{t, h, p}` captured; holes may remain.
    Template(SsrTemplate),
    /// The component body itself suspended before producing a template.
    BodyThrow(NotReady),
}

struct BoundaryMarker {
    ctx: Rc<dyn HydrationContext>,
    prev: Option<String>,
}

impl BoundaryMarker {
    fn install(ctx: &Rc<dyn HydrationContext>, id: &str) -> Self {
        Self {
            ctx: Rc::clone(ctx),
            prev: ctx.set_current_boundary(Some(id.to_owned())),
        }
    }
}

impl Drop for BoundaryMarker {
    fn drop(&mut self) {
        self.ctx.set_current_boundary(self.prev.take());
    }
}

/// One buffered render attempt: serializations leak out only if the attempt
/// is committed.
fn attempt(
    ctx: &Rc<dyn HydrationContext>,
    owner: Owner,
    children: &ViewFn,
) -> Result<FirstAttempt, Error> {
    ctx.push_serialize_buffer();
    let outcome = with_owner(owner, || {
        children().and_then(|v| resolve(v).map_err(Interrupt::Error))
    });
    match outcome {
        Ok(template) => {
            // holes are captured; this attempt's serializations are final
            ctx.pop_serialize_buffer(true);
            Ok(FirstAttempt::Template(template))
        }
        Err(Interrupt::NotReady(not_ready)) => {
            ctx.pop_serialize_buffer(false);
            Ok(FirstAttempt::BodyThrow(not_ready))
        }
        Err(Interrupt::Error(e)) => {
            ctx.pop_serialize_buffer(false);
            Err(e)
        }
    }
}

fn serialize_boundary_assets(ctx: &Rc<dyn HydrationContext>, id: &str) {
    let modules = ctx.boundary_modules(id);
    if modules.is_empty() {
        return;
    }
    let map: serde_json::Map<String, Value> = modules
        .into_iter()
        .map(|(module, entry)| (module, Value::String(entry)))
        .collect();
    ctx.serialize(
        &format!("{id}{ASSETS_KEY_SUFFIX}"),
        SerializedValue::Sync(Value::Object(map)),
        false,
    );
}

fn server_boundary(
    ctx: Rc<dyn HydrationContext>,
    children: ViewFn,
    fallback: Rc<dyn Fn() -> TemplateValue>,
) -> Result<TemplateValue, Interrupt> {
    let owner = create_owner();
    let id = owner.id();
    let marker = BoundaryMarker::install(&ctx, &id);

    let first = attempt(&ctx, owner, &children).map_err(Interrupt::Error)?;

    match first {
        FirstAttempt::Template(template) if template.is_complete() => {
            serialize_boundary_assets(&ctx, &id);
            drop(marker);
            Ok(TemplateValue::Raw(template.into_html()))
        }
        first => {
            serialize_boundary_assets(&ctx, &id);
            if ctx.is_async() {
                start_fragment(&ctx, owner, &id, first, &children);
                drop(marker);
                let fallback = resolve(fallback()).map_err(Interrupt::Error)?;
                Ok(TemplateValue::List(vec![
                    TemplateValue::Raw(placeholder_open(&id)),
                    TemplateValue::Raw(fallback.into_html_lossy()),
                    TemplateValue::Raw(placeholder_close(&id)),
                ]))
            } else {
                // nothing to stream to: the client shows the fallback and
                // loads data itself
                ctx.serialize(&id, SerializedValue::DeferredFallback, false);
                drop(marker);
                Ok(fallback())
            }
        }
    }
}

/// Registers the streaming slot and hands the transport the resolution
/// future: re-run the body while it suspends, then re-execute holes as
/// their dependencies settle, and settle the fragment exactly once.
fn start_fragment(
    ctx: &Rc<dyn HydrationContext>,
    owner: Owner,
    id: &str,
    first: FirstAttempt,
    children: &ViewFn,
) {
    let handle_slot: Rc<Cell<Option<FragmentHandle>>> =
        Rc::new(Cell::new(None));
    let work = {
        let ctx = Rc::clone(ctx);
        let id = id.to_owned();
        let children = Rc::clone(children);
        let handle_slot = Rc::clone(&handle_slot);
        async move {
            let result = resolve_fragment(&ctx, owner, &id, first, &children)
                .await;
            let Some(handle) = handle_slot.take() else {
                return;
            };
            match result {
                Ok(html) => handle.done(html),
                Err(e) => handle.done_with_error(e),
            }
        }
    };
    let handle = ctx.register_fragment(id, Box::pin(work));
    handle_slot.set(Some(handle));
}

async fn resolve_fragment(
    ctx: &Rc<dyn HydrationContext>,
    owner: Owner,
    id: &str,
    first: FirstAttempt,
    children: &ViewFn,
) -> Result<String, Error> {
    let mut template = match first {
        FirstAttempt::Template(template) => template,
        FirstAttempt::BodyThrow(mut not_ready) => loop {
            not_ready.source().await;
            // reset child ids so the re-run regenerates the same sequence
            owner.dispose(true);
            let retried = with_shared_context(Rc::clone(ctx), || {
                let _marker = BoundaryMarker::install(ctx, id);
                attempt(ctx, owner, children)
            })?;
            match retried {
                FirstAttempt::Template(template) => break template,
                FirstAttempt::BodyThrow(next) => not_ready = next,
            }
        },
    };

    loop {
        let pending = std::mem::take(&mut template.pending);
        if pending.is_empty() {
            break;
        }
        tracing::trace!(
            fragment = id,
            pending = pending.len(),
            "awaiting suspended holes"
        );
        join_all(pending).await;
        template = with_shared_context(Rc::clone(ctx), || {
            let _marker = BoundaryMarker::install(ctx, id);
            with_owner(owner, || template.retry())
        })?;
    }

    Ok(template.into_html())
}

/* Client */

fn client_boundary(
    ctx: Rc<dyn HydrationContext>,
    children: ViewFn,
    fallback: Rc<dyn Fn() -> TemplateValue>,
) -> Result<TemplateValue, Interrupt> {
    if !is_hydrating() {
        return create_load_boundary_view(children, fallback);
    }
    let owner = create_owner();
    let id = owner.id();

    let Some(entry) = ctx.load(&id) else {
        return create_load_boundary_view(children, fallback);
    };

    let assets = ctx
        .load(&format!("{id}{ASSETS_KEY_SUFFIX}"))
        .and_then(|entry| entry.peek())
        .and_then(|v| match v {
            Value::Object(map) => Some(
                map.into_iter()
                    .filter_map(|(module, url)| {
                        url.as_str()
                            .map(|url| (module, url.to_owned()))
                    })
                    .collect::<Vec<_>>(),
            ),
            _ => None,
        })
        .unwrap_or_default();

    match entry {
        SerializedValue::DeferredFallback => {
            // the server never loaded this boundary's data; show the
            // fallback and let client code take over after the walk
            increment_pending_boundaries();
            queue_microtask(decrement_pending_boundaries);
            Ok(fallback())
        }
        SerializedValue::Future(fut) if fut.peek().is_some() => {
            ctx.gather(&id);
            with_owner(owner, || children())
        }
        SerializedValue::Future(fut) => {
            let wake = fut.map(|_| ()).boxed_local();
            resume_later(ctx, owner, id, wake, assets, children, fallback)
        }
        SerializedValue::Stream(stream) => {
            let wake = stream.first().map(|_| ()).boxed_local();
            resume_later(ctx, owner, id, wake, assets, children, fallback)
        }
        _ => with_owner(owner, || children()),
    }
}

/// The pending-data path: install a re-run latch, adopt the fallback for
/// now, and when data and assets are ready re-enter hydration locally under
/// a per-boundary snapshot scope.
fn resume_later(
    ctx: Rc<dyn HydrationContext>,
    owner: Owner,
    id: String,
    data_ready: futures::future::LocalBoxFuture<'static, ()>,
    assets: Vec<(String, String)>,
    children: ViewFn,
    fallback: Rc<dyn Fn() -> TemplateValue>,
) -> Result<TemplateValue, Interrupt> {
    let trigger = detached(create_trigger);
    increment_pending_boundaries();

    let resumed = Rc::new(Cell::new(false));
    {
        // if the boundary is torn down before its data arrives, the
        // streamed fragment is orphaned and must be removed from the DOM
        let ctx = Rc::clone(&ctx);
        let id = id.clone();
        let resumed = Rc::clone(&resumed);
        let trigger = trigger;
        on_cleanup(move || {
            if !resumed.get() {
                ctx.cleanup_fragment(&id);
            }
            trigger.dispose();
        });
    }

    // the initial pass adopts the streamed fallback; child reads park on
    // their still-pending entries
    _ = with_owner(owner, || children());

    let asset_wait = load_assets(assets);
    schedule_local({
        let ctx = Rc::clone(&ctx);
        let children = Rc::clone(&children);
        async move {
            futures::join!(data_ready, asset_wait);
            if owner.is_disposed() {
                return;
            }
            resumed.set(true);
            // re-enter hydration locally: children re-run with the same
            // ids, now reading the arrived data, under a per-boundary
            // snapshot scope
            set_snapshot_capture(true);
            mark_snapshot_scope(owner);
            with_hydration_on(|| {
                owner.dispose(true);
                _ = with_owner(owner, || children());
                trigger.notify();
            });
            release_snapshot_scope(owner);
            set_snapshot_capture(false);
            ctx.gather(&id);
            decrement_pending_boundaries();
        }
    });

    // the adopted DOM keeps showing the streamed fallback until the trigger
    // fires; nothing new renders here
    let fallback = Rc::clone(&fallback);
    Ok(TemplateValue::dynamic(move || {
        trigger.track();
        match children() {
            Ok(view) => Ok(view),
            Err(Interrupt::NotReady(_)) => Ok(fallback()),
            Err(e) => Err(e),
        }
    }))
}

fn create_load_boundary_view(
    children: ViewFn,
    fallback: Rc<dyn Fn() -> TemplateValue>,
) -> Result<TemplateValue, Interrupt> {
    match children() {
        Ok(view) => Ok(view),
        Err(Interrupt::NotReady(_)) => Ok(fallback()),
        Err(e) => Err(e),
    }
}
