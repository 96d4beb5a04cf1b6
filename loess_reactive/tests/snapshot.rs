use loess_reactive::{
    clear_snapshots, create_memo, create_owner, create_signal,
    mark_snapshot_scope, release_snapshot_scope, run_root,
    set_snapshot_capture, with_owner, Owner, SignalGet, SignalSet,
};

#[test]
fn snapshot_reads_are_stable_across_writes() {
    run_root("t", || {
        let root = Owner::current().unwrap();
        set_snapshot_capture(true);
        mark_snapshot_scope(root);

        let (x, set_x) = create_signal(1);
        let doubled = create_memo(move |_| Ok(x.get() * 2));
        assert_eq!(doubled.get(), 2);

        set_x.set(10);
        // the computation re-runs but still observes the first-read value
        assert_eq!(doubled.get(), 2);

        release_snapshot_scope(root);
        set_snapshot_capture(false);
        assert_eq!(doubled.get(), 20);
    });
}

#[test]
fn computations_outside_a_scope_read_live() {
    run_root("t", || {
        let (x, set_x) = create_signal(1);
        // created before any scope exists: never frozen
        let live = create_memo(move |_| Ok(x.get()));

        let root = Owner::current().unwrap();
        set_snapshot_capture(true);
        mark_snapshot_scope(root);
        set_x.set(5);
        assert_eq!(live.get(), 5);
        release_snapshot_scope(root);
        set_snapshot_capture(false);
    });
}

#[test]
fn scopes_are_independent() {
    run_root("t", || {
        set_snapshot_capture(true);
        let scope_a = create_owner();
        let scope_b = create_owner();
        mark_snapshot_scope(scope_a);
        mark_snapshot_scope(scope_b);

        let (x, set_x) = create_signal(1);
        let in_a = with_owner(scope_a, || create_memo(move |_| Ok(x.get())));
        let in_b = with_owner(scope_b, || create_memo(move |_| Ok(x.get())));
        assert_eq!(in_a.get(), 1);
        assert_eq!(in_b.get(), 1);

        set_x.set(9);
        assert_eq!(in_a.get(), 1);
        assert_eq!(in_b.get(), 1);

        // releasing one scope leaves the other frozen
        release_snapshot_scope(scope_a);
        assert_eq!(in_a.get(), 9);
        assert_eq!(in_b.get(), 1);

        release_snapshot_scope(scope_b);
        assert_eq!(in_b.get(), 9);
        set_snapshot_capture(false);
    });
}

#[test]
fn clear_snapshots_drops_all_bindings() {
    run_root("t", || {
        let root = Owner::current().unwrap();
        set_snapshot_capture(true);
        mark_snapshot_scope(root);

        let (x, set_x) = create_signal(1);
        let frozen = create_memo(move |_| Ok(x.get()));
        assert_eq!(frozen.get(), 1);
        set_x.set(2);
        assert_eq!(frozen.get(), 1);

        clear_snapshots();
        set_snapshot_capture(false);
        assert_eq!(frozen.get(), 2);
    });
}
