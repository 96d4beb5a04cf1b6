use loess_hydration::{
    settled_value_future, HydrateSharedContext, HydrationContext,
    SerializedStream, SerializedValue, SsrSharedContext,
};
use loess_reactive::{
    create_async_memo, create_async_memo_with_options, create_memo,
    create_projection, create_root, create_signal, finish_hydration,
    hydration_done, on_hydration_end, reset_hydration, run_scheduled,
    start_hydration, with_shared_context, AsyncOptions, SignalGet,
    SignalSet, SsrSourceMode,
};
use serde_json::json;
use std::rc::Rc;

fn hydrate_ctx(
    entries: Vec<(String, SerializedValue)>,
) -> Rc<HydrateSharedContext> {
    reset_hydration();
    let ctx = Rc::new(HydrateSharedContext::new(entries));
    start_hydration(ctx.clone());
    ctx
}

#[test]
fn hydrated_memo_uses_the_serialized_value() {
    let ctx = hydrate_ctx(vec![(
        "t0".to_owned(),
        SerializedValue::settled(json!("from server")),
    )]);
    let (memo, root) = create_root("t", || {
        create_async_memo::<String, _>(|| async {
            panic!("the fetcher must not run during hydration")
        })
    });
    assert_eq!(memo.read().unwrap(), "from server".to_owned());
    // consumed entries are gathered
    assert!(!ctx.has("t0"));
    finish_hydration();
    root.dispose(false);
    reset_hydration();
}

#[test]
fn hydrated_stream_seeds_first_then_applies_continuations() {
    let stream = SerializedStream::from_parts(
        settled_value_future(json!(1)),
        futures::stream::iter(vec![json!(2), json!(3)]),
    );
    let _ctx =
        hydrate_ctx(vec![("t0".to_owned(), SerializedValue::Stream(stream))]);
    let (memo, root) = create_root("t", || {
        loess_reactive::create_stream_memo(|| {
            futures::stream::iter(vec![0i32])
        })
    });
    // the first value is consumed synchronously
    assert_eq!(memo.read().unwrap(), 1);
    finish_hydration();
    // remaining yields are scheduled, writing into the same handle
    tokio_test::block_on(run_scheduled());
    assert_eq!(memo.read().unwrap(), 3);
    root.dispose(false);
    reset_hydration();
}

#[test]
fn hydrated_projection_applies_patch_batches() {
    let stream = SerializedStream::from_parts(
        settled_value_future(json!({"name": "Alice", "items": []})),
        futures::stream::iter(vec![
            json!([[["items"], [1]]]),
            json!([[["items", 1], 2], [["items", "length"], 2]]),
        ]),
    );
    let _ctx =
        hydrate_ctx(vec![("t0".to_owned(), SerializedValue::Stream(stream))]);
    let (projection, root) = create_root("t", || {
        create_projection(json!({}), |_| async {
            panic!("the producer must not run during hydration")
        })
    });
    assert_eq!(
        projection.read().unwrap(),
        json!({"name": "Alice", "items": []})
    );
    finish_hydration();
    tokio_test::block_on(run_scheduled());
    assert_eq!(
        projection.read().unwrap(),
        json!({"name": "Alice", "items": [1, 2]})
    );
    root.dispose(false);
    reset_hydration();
}

#[test]
fn round_trip_preserves_the_server_value() {
    // server side
    let server_ctx = Rc::new(SsrSharedContext::new());
    let dyn_ctx: Rc<dyn HydrationContext> = server_ctx.clone();
    let (server_memo, server_root) = create_root("t", move || {
        with_shared_context(dyn_ctx, || {
            create_async_memo(|| async { vec![1i32, 2, 3] })
        })
    });
    let entries = server_ctx.take_serialized_entries();
    // the transport settles the entry while streaming
    for (_, entry) in &entries {
        if let SerializedValue::Future(fut) = entry {
            tokio_test::block_on(fut.clone());
        }
    }
    let server_value = server_memo.read().unwrap();
    server_root.dispose(false);

    // client side: same component shape, no re-execution
    let _ctx = hydrate_ctx(entries);
    let (client_memo, client_root) = create_root("t", || {
        create_async_memo::<Vec<i32>, _>(|| async {
            panic!("the fetcher must not run during hydration")
        })
    });
    assert_eq!(client_memo.read().unwrap(), server_value);
    finish_hydration();
    client_root.dispose(false);
    reset_hydration();
}

#[test]
fn client_mode_reads_initial_until_release_then_goes_live() {
    let _ctx = hydrate_ctx(Vec::new());
    let ((memo, set_x, doubled), root) = create_root("t", || {
        let memo = create_async_memo_with_options(
            || async { 50i32 },
            AsyncOptions {
                ssr_source: SsrSourceMode::Client,
                initial: Some(5),
                ..Default::default()
            },
        );
        let (x, set_x) = create_signal(10);
        let doubled = create_memo(move |_| Ok(x.get() * 2));
        (memo, set_x, doubled)
    });

    assert_eq!(memo.read().unwrap(), 5);
    assert_eq!(doubled.get(), 20);

    // a live write during hydration must not disturb adopted output
    set_x.set(100);
    assert_eq!(doubled.get(), 20);

    finish_hydration();
    assert_eq!(doubled.get(), 200);

    // the release flipped the memo to its live compute
    let wake = memo.ready().expect("live compute should be in flight");
    tokio_test::block_on(futures::FutureExt::map(wake, |_| ()));
    assert_eq!(memo.read().unwrap(), 50);
    root.dispose(false);
    reset_hydration();
}

#[test]
fn hydration_end_waits_for_pending_boundaries() {
    let _ctx = hydrate_ctx(Vec::new());
    let ended = Rc::new(std::cell::Cell::new(false));
    on_hydration_end({
        let ended = Rc::clone(&ended);
        move || ended.set(true)
    });

    loess_reactive::increment_pending_boundaries();
    finish_hydration();
    assert!(!hydration_done());
    assert!(!ended.get());

    loess_reactive::decrement_pending_boundaries();
    assert!(hydration_done());
    assert!(ended.get());
    reset_hydration();
}
