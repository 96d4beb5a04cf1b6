use futures::FutureExt;
use loess::prelude::*;
use std::{
    cell::{Cell, RefCell},
    future::Future,
    rc::Rc,
    task::{Context, Poll},
};

fn with_streaming_ctx<T>(
    f: impl FnOnce() -> T + 'static,
) -> (T, Rc<SsrSharedContext>, Owner) {
    let ctx = Rc::new(SsrSharedContext::new());
    let dyn_ctx: Rc<dyn HydrationContext> = ctx.clone();
    let (value, root) =
        create_root("t", move || with_shared_context(dyn_ctx, f));
    (value, ctx, root)
}

fn div_with(
    hole: impl FnMut() -> Result<TemplateValue, Interrupt> + 'static,
) -> Result<TemplateValue, Interrupt> {
    ssr_template(&["<div>", "</div>"], vec![TemplateValue::dynamic(hole)])
        .map(TemplateValue::from)
        .map_err(Into::into)
}

/// Wraps a oneshot receiver as a run-once fetcher.
fn once_fetcher<T: 'static>(
    rx: futures::channel::oneshot::Receiver<T>,
) -> impl Fn() -> futures::future::Map<
    futures::channel::oneshot::Receiver<T>,
    fn(Result<T, futures::channel::oneshot::Canceled>) -> T,
> {
    let rx = RefCell::new(Some(rx));
    move || {
        let rx = rx.borrow_mut().take().expect("fetcher runs once");
        rx.map(
            (|r| r.expect("sender dropped"))
                as fn(Result<T, futures::channel::oneshot::Canceled>) -> T,
        )
    }
}

/// A single async memo under a Loading boundary streams its fragment.
#[test]
fn async_boundary_streams_final_html() {
    let (view, ctx, root) = with_streaming_ctx(|| {
        loading_boundary(
            || {
                let greeting = create_async_memo(|| async {
                    "Hello World".to_owned()
                });
                div_with(move || Ok(TemplateValue::text(greeting.read()?)))
            },
            || TemplateValue::text("Loading..."),
        )
        .unwrap()
    });

    let shell = resolve(view).unwrap().into_html();
    assert!(shell.contains("<template id=\"pl-t0\"></template>"));
    assert!(shell.contains("<!--pl-t0-->"));
    assert!(shell.contains("Loading..."));

    let mut fragments = ctx.take_pending_fragments();
    assert_eq!(fragments.len(), 1);
    let fragment = fragments.remove(0);
    assert_eq!(fragment.id, "t0");
    let html = tokio_test::block_on(fragment.html).unwrap().unwrap();
    assert_eq!(html, "<div>Hello World</div>");
    root.dispose(false);
}

/// A boundary that settles synchronously emits its children inline.
#[test]
fn sync_success_renders_inline() {
    let (view, ctx, root) = with_streaming_ctx(|| {
        loading_boundary(
            || div_with(|| Ok(TemplateValue::text("static"))),
            || TemplateValue::text("Loading..."),
        )
        .unwrap()
    });
    let html = resolve(view).unwrap().into_html();
    assert_eq!(html, "<div>static</div>");
    assert!(ctx.take_pending_fragments().is_empty());
    root.dispose(false);
}

/// Parallel async work where one branch fails settles the fragment with the
/// error and emits no HTML for the boundary.
#[test]
fn rejection_settles_the_fragment_with_an_error() {
    let (_view, ctx, root) = with_streaming_ctx(|| {
        loading_boundary(
            || {
                let alpha =
                    create_async_memo(|| async { "Alpha".to_owned() });
                let beta = create_async_memo(|| async {
                    Err::<String, String>("B failed".to_owned())
                });
                ssr_template(
                    &["<div>", " ", "</div>"],
                    vec![
                        TemplateValue::dynamic(move || {
                            Ok(TemplateValue::text(alpha.read()?))
                        }),
                        TemplateValue::dynamic(move || match beta.read()? {
                            Ok(v) => Ok(TemplateValue::text(v)),
                            Err(msg) => {
                                Err(Interrupt::Error(Error::msg(msg)))
                            }
                        }),
                    ],
                )
                .map(TemplateValue::from)
                .map_err(Into::into)
            },
            || TemplateValue::text("Loading..."),
        )
        .unwrap()
    });

    let fragment = ctx.take_pending_fragments().remove(0);
    let outcome = tokio_test::block_on(fragment.html).unwrap();
    assert_eq!(outcome.unwrap_err().message(), "B failed");
    root.dispose(false);
}

/// Re-entrant holes: a hole that reveals a new dependency after its first
/// resolution is re-captured, and the fragment settles only once the chain
/// is exhausted.
#[test]
fn re_entrant_holes_resolve_in_passes() {
    let (gate_tx, gate_rx) =
        futures::channel::oneshot::channel::<String>();
    let (detail_tx, detail_rx) =
        futures::channel::oneshot::channel::<i32>();

    let (_view, ctx, root) = with_streaming_ctx(move || {
        let gate = create_async_memo(once_fetcher(gate_rx));
        let detail = create_async_memo(once_fetcher(detail_rx));
        loading_boundary(
            move || {
                div_with(move || {
                    if gate.read()? == "yes" {
                        Ok(TemplateValue::text(format!(
                            "detail:{}",
                            detail.read()?
                        )))
                    } else {
                        Ok(TemplateValue::Unit)
                    }
                })
            },
            || TemplateValue::text("Loading..."),
        )
        .unwrap()
    });

    let fragment = ctx.take_pending_fragments().remove(0);
    let mut html = fragment.html;
    let waker = futures::task::noop_waker();
    let mut poll_cx = Context::from_waker(&waker);

    assert!(html.as_mut().poll(&mut poll_cx).is_pending());
    gate_tx.send("yes".to_owned()).unwrap();
    // the gate alone is not enough: resolving it revealed a new dependency
    assert!(html.as_mut().poll(&mut poll_cx).is_pending());
    detail_tx.send(42).unwrap();
    match html.as_mut().poll(&mut poll_cx) {
        Poll::Ready(Some(Ok(html))) => {
            assert_eq!(html, "<div>detail:42</div>")
        }
        other => panic!("fragment did not settle cleanly: {other:?}"),
    }
    root.dispose(false);
}

/// The body-throw path: serializations from discarded attempts never leak,
/// and the re-run regenerates the same child-id sequence.
#[test]
fn retried_attempts_are_buffered_and_id_stable() {
    let attempts = Rc::new(Cell::new(0u32));
    let ids: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

    let (_view, ctx, root) = with_streaming_ctx({
        let attempts = Rc::clone(&attempts);
        let ids = Rc::clone(&ids);
        move || {
            loading_boundary(
                {
                    let attempts = Rc::clone(&attempts);
                    let ids = Rc::clone(&ids);
                    move || {
                        let n = attempts.get();
                        attempts.set(n + 1);
                        ids.borrow_mut().push(create_owner().id());
                        let value = create_async_memo(move || async move {
                            i32::try_from(n).unwrap()
                        });
                        let _ = value;
                        if n == 0 {
                            // the component body itself suspends
                            Err(NotReady::new(async {}).into())
                        } else {
                            Ok(TemplateValue::text("done"))
                        }
                    }
                },
                || TemplateValue::text("Loading..."),
            )
            .unwrap()
        }
    });

    // the doomed first attempt committed nothing
    assert!(ctx.take_serialized_entries().is_empty());

    let fragment = ctx.take_pending_fragments().remove(0);
    let html = tokio_test::block_on(fragment.html).unwrap().unwrap();
    assert_eq!(html, "done");
    assert_eq!(attempts.get(), 2);

    // property: the second attempt allocated the same ids as the first
    let ids = ids.borrow();
    assert_eq!(ids[0], ids[1]);

    // only the final attempt's serializations are visible
    let entries = ctx.take_serialized_entries();
    assert_eq!(entries.len(), 1);
    let SerializedValue::Future(fut) = &entries[0].1 else {
        panic!("expected the retried memo's entry")
    };
    assert_eq!(
        tokio_test::block_on(fut.clone()),
        serde_json::json!(1)
    );
    root.dispose(false);
}

/// In one-shot rendering the boundary defers: fallback now, `"$$f"` on the
/// side channel, no fragment registration.
#[test]
fn sync_rendering_defers_to_the_fallback() {
    let ctx = Rc::new(SsrSharedContext::new_sync());
    let dyn_ctx: Rc<dyn HydrationContext> = ctx.clone();
    let (view, root) = create_root("t", move || {
        with_shared_context(dyn_ctx, || {
            loading_boundary(
                || {
                    let value =
                        create_async_memo(|| async { 1i32 });
                    div_with(move || {
                        Ok(TemplateValue::text(value.read()?))
                    })
                },
                || TemplateValue::text("Loading..."),
            )
            .unwrap()
        })
    });

    let html = resolve(view).unwrap().into_html();
    assert_eq!(html, "Loading...");
    assert!(ctx.take_pending_fragments().is_empty());

    let entries = ctx.take_serialized_entries();
    // the async value itself was rejected by the sync context; only the
    // deferred-fallback sentinel remains
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "t0");
    assert!(matches!(entries[0].1, SerializedValue::DeferredFallback));
    root.dispose(false);
}
