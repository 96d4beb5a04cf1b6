use loess_reactive::{
    batch, create_effect, create_isomorphic_effect, create_rw_signal,
    create_signal, create_trigger, run_root, untrack, SignalGet,
    SignalGetUntracked, SignalSet, SignalUpdate, SignalWith,
};
use std::{cell::Cell, rc::Rc};

#[test]
fn basic_signal() {
    run_root("t", || {
        let (value, set_value) = create_signal(0);
        assert_eq!(value.get(), 0);
        set_value.set(5);
        assert_eq!(value.get(), 5);
        set_value.update(|n| *n += 1);
        assert_eq!(value.with(|n| *n), 6);
    });
}

#[test]
fn rw_signal_halves_agree() {
    run_root("t", || {
        let count = create_rw_signal(1);
        count.set(2);
        assert_eq!(count.read_only().get(), 2);
        count.write_only().set(3);
        assert_eq!(count.get_untracked(), 3);
    });
}

#[test]
fn effect_tracks_and_reruns() {
    run_root("t", || {
        let runs = Rc::new(Cell::new(0));
        let (value, set_value) = create_signal(0);
        create_isomorphic_effect({
            let runs = Rc::clone(&runs);
            move |_| {
                let _ = value.get();
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(runs.get(), 1);
        set_value.set(1);
        assert_eq!(runs.get(), 2);
        set_value.set(2);
        assert_eq!(runs.get(), 3);
    });
}

#[test]
fn untrack_skips_subscription() {
    run_root("t", || {
        let runs = Rc::new(Cell::new(0));
        let (a, set_a) = create_signal(0);
        let (b, set_b) = create_signal(0);
        create_isomorphic_effect({
            let runs = Rc::clone(&runs);
            move |_| {
                let _ = a.get() + untrack(|| b.get());
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(runs.get(), 1);
        set_b.set(1);
        // untracked read: no rerun
        assert_eq!(runs.get(), 1);
        set_a.set(1);
        assert_eq!(runs.get(), 2);
    });
}

#[test]
fn batch_coalesces_effect_runs() {
    run_root("t", || {
        let runs = Rc::new(Cell::new(0));
        let (a, set_a) = create_signal(0);
        let (b, set_b) = create_signal(0);
        create_isomorphic_effect({
            let runs = Rc::clone(&runs);
            move |_| {
                let _ = a.get() + b.get();
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(runs.get(), 1);
        batch(|| {
            set_a.set(1);
            set_b.set(1);
        });
        assert_eq!(runs.get(), 2);
    });
}

#[test]
fn trigger_always_notifies() {
    run_root("t", || {
        let runs = Rc::new(Cell::new(0));
        let trigger = create_trigger();
        create_isomorphic_effect({
            let runs = Rc::clone(&runs);
            move |_| {
                trigger.track();
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(runs.get(), 1);
        trigger.notify();
        trigger.notify();
        assert_eq!(runs.get(), 3);
    });
}

#[test]
fn create_effect_without_context_runs() {
    // with no rendering context installed there is no "server"; effects run
    run_root("t", || {
        let ran = Rc::new(Cell::new(false));
        create_effect({
            let ran = Rc::clone(&ran);
            move |_| ran.set(true)
        });
        assert!(ran.get());
    });
}
