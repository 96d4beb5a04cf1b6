use loess_hydration::{HydrationContext, SerializedValue, SsrSharedContext};
use loess_reactive::{
    apply_patches, batch_from_value, create_projection, create_root,
    create_store, path, run_root, with_shared_context, Interrupt,
};
use serde_json::json;
use std::rc::Rc;

#[test]
fn store_updates_through_a_draft() {
    run_root("t", || {
        let (store, set_store) = create_store(json!({"items": [1]}));
        let log = set_store.update(|d| {
            d.push(path!["items"], 2);
            d.set(path!["flag"], true);
        });
        assert_eq!(store.get(), json!({"items": [1, 2], "flag": true}));
        assert_eq!(log.len(), 3); // element, length, flag
    });
}

#[test]
fn store_notifies_subscribers() {
    use std::{cell::Cell, rc::Rc};
    run_root("t", || {
        let runs = Rc::new(Cell::new(0));
        let (store, set_store) = create_store(json!({"n": 0}));
        loess_reactive::create_isomorphic_effect({
            let runs = Rc::clone(&runs);
            move |_| {
                let _ = store.get();
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(runs.get(), 1);
        set_store.update(|d| d.set(path!["n"], 1));
        assert_eq!(runs.get(), 2);
    });
}

#[test]
fn projection_serializes_snapshot_then_patch_batches() {
    let ctx = Rc::new(SsrSharedContext::new());
    let dyn_ctx: Rc<dyn HydrationContext> = ctx.clone();
    let (projection, root) = create_root("t", move || {
        with_shared_context(dyn_ctx, || {
            create_projection(json!({"name": "", "items": []}), |d| {
                async move {
                    d.set(path!["name"], json!("Alice"));
                    d.flush();
                    d.set(path!["items"], json!([1]));
                    d.flush();
                    d.push(path!["items"], json!(2));
                    d.flush();
                }
            })
        })
    });

    // rendering sees nothing until the first yield
    let Err(Interrupt::NotReady(not_ready)) = projection.read() else {
        panic!("projection should suspend before its first yield")
    };

    let entries = ctx.take_serialized_entries();
    assert_eq!(entries[0].0, "t0");
    let SerializedValue::Stream(stream) = &entries[0].1 else {
        panic!("expected a stream entry")
    };

    let first = tokio_test::block_on(stream.first());
    assert_eq!(first, json!({"name": "Alice", "items": []}));

    let batches: Vec<_> = tokio_test::block_on(
        futures::StreamExt::collect::<Vec<_>>(stream.take_rest().unwrap()),
    );
    assert_eq!(batches[0], json!([[["items"], [1]]]));
    assert_eq!(
        batches[1],
        json!([[["items", 1], 2], [["items", "length"], 2]])
    );

    // the wake settles with the first yield, and the server state is the
    // deep-cloned V1 snapshot, isolated from later mutations
    tokio_test::block_on(not_ready.source());
    assert_eq!(
        projection.read().unwrap(),
        json!({"name": "Alice", "items": []})
    );

    // replaying the batches over V1 reproduces the final producer state
    let mut replayed = first;
    for batch in &batches {
        apply_patches(&mut replayed, &batch_from_value(batch));
    }
    assert_eq!(replayed, json!({"name": "Alice", "items": [1, 2]}));

    root.dispose(false);
}
