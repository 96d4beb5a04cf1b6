use futures::FutureExt;
use loess_hydration::{HydrationContext, SerializedValue, SsrSharedContext};
use loess_reactive::{
    create_async_memo, create_async_memo_with_options, create_root,
    create_signal, create_stream_memo, run_root, with_shared_context,
    AsyncOptions, Interrupt, SignalGet, SsrSourceMode,
};
use std::rc::Rc;

fn with_server_ctx<T>(
    f: impl FnOnce() -> T + 'static,
) -> (T, Rc<SsrSharedContext>, loess_reactive::Owner) {
    let ctx = Rc::new(SsrSharedContext::new());
    let dyn_ctx: Rc<dyn HydrationContext> = ctx.clone();
    let (value, root) =
        create_root("t", move || with_shared_context(dyn_ctx, f));
    (value, ctx, root)
}

#[test]
fn suspends_until_polled_then_resolves() {
    let (memo, _ctx, root) = with_server_ctx(|| {
        create_async_memo(|| async { "Hello World".to_owned() })
    });

    let err = memo.read().unwrap_err();
    let Interrupt::NotReady(not_ready) = err else {
        panic!("expected suspension")
    };
    // awaiting the wake future drives the underlying fetcher
    tokio_test::block_on(not_ready.source());
    assert_eq!(memo.read().unwrap(), "Hello World");
    root.dispose(false);
}

#[test]
fn server_serializes_at_the_primitive_id() {
    let (_memo, ctx, root) =
        with_server_ctx(|| create_async_memo(|| async { 42i32 }));
    let entries = ctx.take_serialized_entries();
    assert_eq!(entries.len(), 1);
    // first primitive under the root owner
    assert_eq!(entries[0].0, "t0");
    let SerializedValue::Future(fut) = &entries[0].1 else {
        panic!("expected a future entry")
    };
    let value = tokio_test::block_on(fut.clone());
    assert_eq!(value, serde_json::json!(42));
    root.dispose(false);
}

#[test]
fn initial_value_reads_before_settlement() {
    let (memo, _ctx, root) = with_server_ctx(|| {
        create_async_memo_with_options(
            || async { 10i32 },
            AsyncOptions {
                initial: Some(0),
                ..Default::default()
            },
        )
    });
    assert_eq!(memo.read().unwrap(), 0);
    root.dispose(false);
}

#[test]
fn initial_and_client_modes_do_not_serialize() {
    for mode in [SsrSourceMode::Initial, SsrSourceMode::Client] {
        let (memo, ctx, root) = with_server_ctx(move || {
            create_async_memo_with_options(
                || async { 1i32 },
                AsyncOptions {
                    ssr_source: mode,
                    initial: Some(7),
                    ..Default::default()
                },
            )
        });
        assert_eq!(memo.read().unwrap(), 7);
        assert!(ctx.take_serialized_entries().is_empty());
        root.dispose(false);
    }
}

#[test]
fn initial_mode_still_captures_dependencies() {
    use loess_reactive::SignalSet;
    run_root("t", || {
        let (source, set_source) = create_signal(1);
        let runs = Rc::new(std::cell::Cell::new(0));
        let memo = loess_reactive::create_memo({
            let runs = Rc::clone(&runs);
            move |_| {
                runs.set(runs.get() + 1);
                // the fetcher's synchronous reads are tracked even though
                // its future is never polled
                let inner = create_async_memo_with_options(
                    move || {
                        let _ = source.get();
                        async move { 0i32 }
                    },
                    AsyncOptions {
                        ssr_source: SsrSourceMode::Initial,
                        initial: Some(7),
                        ..Default::default()
                    },
                );
                inner.read().map_err(Into::into)
            }
        });
        assert_eq!(memo.get(), 7);
        assert_eq!(runs.get(), 1);
        set_source.set(5);
        assert_eq!(memo.get(), 7);
        assert_eq!(runs.get(), 2);
    });
}

#[test]
fn stream_memo_locks_first_yield_on_server() {
    let (memo, ctx, root) = with_server_ctx(|| {
        create_stream_memo(|| futures::stream::iter(vec![1i32, 2, 3]))
    });

    let err = memo.read().unwrap_err();
    let Interrupt::NotReady(not_ready) = err else {
        panic!("expected suspension")
    };
    tokio_test::block_on(not_ready.source());
    assert_eq!(memo.read().unwrap(), 1);

    let entries = ctx.take_serialized_entries();
    let SerializedValue::Stream(stream) = &entries[0].1 else {
        panic!("expected a stream entry")
    };
    // the tapped wrapper replays V1 and forwards the remaining yields
    assert_eq!(
        tokio_test::block_on(stream.first()),
        serde_json::json!(1)
    );
    let rest: Vec<_> =
        tokio_test::block_on(futures::StreamExt::collect::<Vec<_>>(
            stream.take_rest().unwrap(),
        ));
    assert_eq!(rest, vec![serde_json::json!(2), serde_json::json!(3)]);

    // the server value stays locked at V1
    assert_eq!(memo.read().unwrap(), 1);
    root.dispose(false);
}

#[test]
fn hybrid_mode_serializes_only_the_first_yield() {
    let (_memo, ctx, root) = with_server_ctx(|| {
        loess_reactive::create_stream_memo_with_options(
            || futures::stream::iter(vec![1i32, 2]),
            AsyncOptions {
                ssr_source: SsrSourceMode::Hybrid,
                ..Default::default()
            },
        )
    });
    let entries = ctx.take_serialized_entries();
    let SerializedValue::Future(fut) = &entries[0].1 else {
        panic!("hybrid mode should serialize a settled-promise entry")
    };
    assert_eq!(
        tokio_test::block_on(fut.clone()),
        serde_json::json!(1)
    );
    root.dispose(false);
}

#[test]
fn rejection_travels_as_a_result() {
    let (memo, _ctx, root) = with_server_ctx(|| {
        create_async_memo(|| async {
            Err::<String, String>("B failed".to_owned())
        })
    });
    let Interrupt::NotReady(not_ready) = memo.read().unwrap_err() else {
        panic!("expected suspension")
    };
    tokio_test::block_on(not_ready.source());
    assert_eq!(memo.read().unwrap(), Err("B failed".to_owned()));
    root.dispose(false);
}

#[test]
fn defer_stream_registers_a_shell_gate() {
    let (_, ctx, root) = with_server_ctx(|| {
        create_async_memo_with_options(
            || async { 1i32 },
            AsyncOptions {
                defer_stream: true,
                ..Default::default()
            },
        )
    });
    let deferred = ctx.take_deferred();
    assert_eq!(deferred.len(), 1);
    for gate in deferred {
        tokio_test::block_on(gate);
    }
    root.dispose(false);
}

#[test]
fn ready_exposes_the_pending_wake() {
    let (memo, _ctx, root) =
        with_server_ctx(|| create_async_memo(|| async { 9i32 }));
    let wake = memo.ready().expect("pending work should expose a wake");
    tokio_test::block_on(wake.map(|_| ()));
    assert_eq!(memo.read().unwrap(), 9);
    assert!(memo.ready().is_none());
    root.dispose(false);
}
