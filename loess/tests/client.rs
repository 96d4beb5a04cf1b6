use loess::prelude::*;
use loess_hydration::settled_value_future;
use serde_json::json;
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

fn hydrate_ctx(
    entries: Vec<(String, SerializedValue)>,
) -> Rc<HydrateSharedContext> {
    reset_hydration();
    let ctx = Rc::new(HydrateSharedContext::new(entries));
    start_hydration(ctx.clone());
    ctx
}

fn eval(view: &mut TemplateValue) -> String {
    match view {
        TemplateValue::Dyn(hole) => {
            resolve(hole().unwrap()).unwrap().into_html()
        }
        _ => panic!("expected a dynamic view"),
    }
}

/// A serialized error at the boundary id restores the server's fallback
/// without running the children; reset clears it.
#[test]
fn client_error_boundary_restores_serialized_error() {
    let ctx = hydrate_ctx(vec![(
        "t0".to_owned(),
        SerializedValue::Error(Error::msg("server error")),
    )]);

    let children_ran = Rc::new(Cell::new(false));
    let reset_slot: Rc<RefCell<Option<Reset>>> =
        Rc::new(RefCell::new(None));

    let (mut view, root) = create_root("t", {
        let children_ran = Rc::clone(&children_ran);
        let reset_slot = Rc::clone(&reset_slot);
        move || {
            error_boundary(
                {
                    let children_ran = Rc::clone(&children_ran);
                    move || {
                        children_ran.set(true);
                        Ok(TemplateValue::text("recovered"))
                    }
                },
                {
                    let reset_slot = Rc::clone(&reset_slot);
                    move |e, reset| {
                        *reset_slot.borrow_mut() = Some(reset);
                        TemplateValue::text(format!(
                            "fallback: {}",
                            e.message()
                        ))
                    }
                },
            )
            .unwrap()
        }
    });

    assert_eq!(eval(&mut view), "fallback: server error");
    assert!(!children_ran.get());

    finish_hydration();
    reset_slot.borrow().as_ref().unwrap().reset();
    assert_eq!(eval(&mut view), "recovered");
    assert!(children_ran.get());
    // reset consumed the serialized entry
    assert!(!ctx.has("t0"));
    root.dispose(false);
    reset_hydration();
}

/// A pending serialized fragment parks the boundary: children re-run under
/// a local hydration scope once the data arrives, and hydration completes
/// only after every boundary has resumed.
#[test]
fn client_boundary_resumes_when_data_arrives() {
    let (data_tx, data_rx) = futures::channel::oneshot::channel::<()>();
    let boundary_entry = loess_hydration::shared_value_future(
        futures::FutureExt::map(data_rx, |_| json!("ready")),
    );
    // the child's value arrives in the same network flush as the fragment
    let child_entry = loess_hydration::shared_value_future({
        let boundary = boundary_entry.clone();
        futures::FutureExt::map(boundary, |_| json!("streamed value"))
    });
    let child_probe = child_entry.clone();

    let ctx = hydrate_ctx(vec![
        ("t0".to_owned(), SerializedValue::Future(boundary_entry)),
        ("t00".to_owned(), SerializedValue::Future(child_entry)),
    ]);

    let reads: Rc<RefCell<Vec<Result<String, ()>>>> =
        Rc::new(RefCell::new(Vec::new()));
    let (_view, root) = create_root("t", {
        let reads = Rc::clone(&reads);
        move || {
            loading_boundary(
                {
                    let reads = Rc::clone(&reads);
                    move || {
                        let value = create_async_memo(|| async {
                            panic!("must hydrate, not fetch")
                        });
                        let read: Result<String, ()> =
                            value.read().map_err(|_| ());
                        reads.borrow_mut().push(read.clone());
                        match read {
                            Ok(v) => Ok(TemplateValue::text(v)),
                            Err(()) => Ok(TemplateValue::text("pending")),
                        }
                    }
                },
                || TemplateValue::text("Loading..."),
            )
            .unwrap()
        }
    });

    let ended = Rc::new(Cell::new(false));
    on_hydration_end({
        let ended = Rc::clone(&ended);
        move || ended.set(true)
    });

    finish_hydration();
    // the walk is over but the boundary still waits on its data
    assert!(!hydration_done());
    assert!(!ended.get());

    data_tx.send(()).unwrap();
    // the transport settles the child record as it installs it
    tokio_test::block_on(child_probe);
    tokio_test::block_on(run_scheduled());

    assert!(hydration_done());
    assert!(ended.get());
    assert!(!ctx.has("t0"));
    // the re-run under local hydration consumed the streamed child value
    assert_eq!(
        reads.borrow().last().unwrap(),
        &Ok("streamed value".to_owned())
    );
    root.dispose(false);
    reset_hydration();
}

/// The `"$$f"` sentinel renders the fallback and releases its pending slot
/// on a microtask.
#[test]
fn deferred_fallback_sentinel_shows_fallback() {
    let _ctx = hydrate_ctx(vec![(
        "t0".to_owned(),
        SerializedValue::DeferredFallback,
    )]);
    let (view, root) = create_root("t", || {
        loading_boundary(
            || Ok(TemplateValue::text("children")),
            || TemplateValue::text("Loading..."),
        )
        .unwrap()
    });
    assert_eq!(resolve(view).unwrap().into_html(), "Loading...");
    finish_hydration();
    assert!(hydration_done());
    root.dispose(false);
    reset_hydration();
}

/// A boundary disposed before its streamed data resumes cancels the
/// orphaned fragment.
#[test]
fn orphaned_fragment_is_cleaned_up() {
    let (_tx, rx) = futures::channel::oneshot::channel::<()>();
    let never = loess_hydration::shared_value_future(
        futures::FutureExt::map(rx, |_| json!(null)),
    );
    let ctx = hydrate_ctx(vec![(
        "t0".to_owned(),
        SerializedValue::Future(never),
    )]);

    let (_view, root) = create_root("t", || {
        loading_boundary(
            || Ok(TemplateValue::text("children")),
            || TemplateValue::text("Loading..."),
        )
        .unwrap()
    });
    finish_hydration();
    root.dispose(false);
    assert_eq!(ctx.cleaned_fragments(), vec!["t0".to_owned()]);
    reset_hydration();
}

/// Server value and first client read agree for every streamed primitive
/// (the serialization round trip seen from the umbrella crate).
#[test]
fn round_trip_through_the_boundary() {
    // server
    let server_ctx = Rc::new(SsrSharedContext::new());
    let dyn_ctx: Rc<dyn HydrationContext> = server_ctx.clone();
    let (_view, server_root) = create_root("t", move || {
        with_shared_context(dyn_ctx, || {
            loading_boundary(
                || {
                    let user = create_async_memo(|| async {
                        "Alice".to_owned()
                    });
                    Ok(TemplateValue::dynamic(move || {
                        Ok(TemplateValue::text(user.read()?))
                    }))
                },
                || TemplateValue::text("Loading..."),
            )
            .unwrap()
        })
    });
    let fragment = server_ctx.take_pending_fragments().remove(0);
    let html = tokio_test::block_on(fragment.html).unwrap().unwrap();
    assert_eq!(html, "Alice");
    let mut entries = server_ctx.take_serialized_entries();
    // the transport settles each record as it streams
    for (_, entry) in &entries {
        if let SerializedValue::Future(fut) = entry {
            tokio_test::block_on(fut.clone());
        }
    }
    entries.push((
        "t0".to_owned(),
        SerializedValue::settled(json!(null)),
    ));

    // client
    server_root.dispose(false);
    let _ctx = hydrate_ctx(entries);
    let value: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));
    let (_view, client_root) = create_root("t", {
        let value = Rc::clone(&value);
        move || {
            loading_boundary(
                {
                    let value = Rc::clone(&value);
                    move || {
                        let user = create_async_memo(|| async {
                            panic!("must hydrate, not fetch")
                        });
                        let v: String = user.read().map_err(|_| ()).unwrap();
                        *value.borrow_mut() = Some(v.clone());
                        Ok(TemplateValue::text(v))
                    }
                },
                || TemplateValue::text("Loading..."),
            )
            .unwrap()
        }
    });
    assert_eq!(value.borrow().as_deref(), Some("Alice"));
    finish_hydration();
    client_root.dispose(false);
    reset_hydration();
}
