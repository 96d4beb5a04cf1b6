use loess_reactive::{
    create_memo, create_memo_with_options, create_signal,
    create_writable_memo, run_root, MemoOptions, SignalGet, SignalSet,
};
use std::{cell::Cell, rc::Rc};

#[test]
fn basic_memo() {
    run_root("t", || {
        let a = create_memo(|_| Ok(5));
        assert_eq!(a.get(), 5);
    });
}

#[test]
fn memo_with_computed_value() {
    run_root("t", || {
        let (a, set_a) = create_signal(0);
        let (b, set_b) = create_signal(0);
        let c = create_memo(move |_| Ok(a.get() + b.get()));
        assert_eq!(c.get(), 0);
        set_a.set(5);
        assert_eq!(c.get(), 5);
        set_b.set(1);
        assert_eq!(c.get(), 6);
    });
}

#[test]
fn nested_memos() {
    run_root("t", || {
        let (a, set_a) = create_signal(0);
        let (b, set_b) = create_signal(0);
        let c = create_memo(move |_| Ok(a.get() + b.get()));
        let d = create_memo(move |_| Ok(c.get() * 2));
        let e = create_memo(move |_| Ok(d.get() + 1));
        assert_eq!(d.get(), 0);
        set_a.set(5);
        assert_eq!(e.get(), 11);
        assert_eq!(d.get(), 10);
        assert_eq!(c.get(), 5);
        set_b.set(1);
        assert_eq!(e.get(), 13);
        assert_eq!(d.get(), 12);
        assert_eq!(c.get(), 6);
    });
}

#[test]
fn memo_runs_only_when_inputs_change() {
    run_root("t", || {
        let call_count = Rc::new(Cell::new(0));
        let (a, set_a) = create_signal(0);
        let c = create_memo({
            let call_count = Rc::clone(&call_count);
            move |_| {
                call_count.set(call_count.get() + 1);
                Ok(a.get())
            }
        });
        // eager by default: one run at creation
        assert_eq!(call_count.get(), 1);
        assert_eq!(c.get(), 0);
        assert_eq!(c.get(), 0);
        assert_eq!(call_count.get(), 1);
        set_a.set(1);
        assert_eq!(c.get(), 1);
        assert_eq!(c.get(), 1);
        assert_eq!(call_count.get(), 2);
    });
}

#[test]
fn lazy_memo_defers_to_first_read() {
    run_root("t", || {
        let call_count = Rc::new(Cell::new(0));
        let c = create_memo_with_options(
            {
                let call_count = Rc::clone(&call_count);
                move |_| {
                    call_count.set(call_count.get() + 1);
                    Ok(1)
                }
            },
            MemoOptions {
                lazy: true,
                ..Default::default()
            },
        );
        assert_eq!(call_count.get(), 0);
        assert_eq!(c.get(), 1);
        assert_eq!(call_count.get(), 1);
    });
}

#[test]
fn memo_does_not_notify_on_equal_value() {
    run_root("t", || {
        let downstream_runs = Rc::new(Cell::new(0));
        let (a, set_a) = create_signal(1);
        let parity = create_memo(move |_| Ok(a.get() % 2));
        let watcher = create_memo({
            let downstream_runs = Rc::clone(&downstream_runs);
            move |_| {
                downstream_runs.set(downstream_runs.get() + 1);
                Ok(parity.get())
            }
        });
        assert_eq!(watcher.get(), 1);
        assert_eq!(downstream_runs.get(), 1);
        // 1 -> 3: parity unchanged, downstream does not re-run
        set_a.set(3);
        assert_eq!(watcher.get(), 1);
        assert_eq!(downstream_runs.get(), 1);
        set_a.set(4);
        assert_eq!(watcher.get(), 0);
        assert_eq!(downstream_runs.get(), 2);
    });
}

#[test]
fn custom_equality() {
    run_root("t", || {
        let runs = Rc::new(Cell::new(0));
        let (a, set_a) = create_signal(1);
        let always_equal = create_memo_with_options(
            move |_| Ok(a.get()),
            MemoOptions {
                equals: Some(Rc::new(|_: &i32, _: &i32| true)),
                ..Default::default()
            },
        );
        let downstream = create_memo({
            let runs = Rc::clone(&runs);
            move |_| {
                runs.set(runs.get() + 1);
                Ok(always_equal.get())
            }
        });
        assert_eq!(downstream.get(), 1);
        set_a.set(2);
        // the upstream memo recomputes but claims equality, so downstream
        // never re-runs
        assert_eq!(downstream.get(), 1);
        assert_eq!(runs.get(), 1);
    });
}

#[test]
fn writable_memo_overrides_until_recompute() {
    run_root("t", || {
        let (a, set_a) = create_signal(1);
        let (value, set_value) = create_writable_memo(move |_| Ok(a.get()));
        assert_eq!(value.get(), 1);
        set_value.set(10);
        assert_eq!(value.get(), 10);
        // a dependency change wins the slot back
        set_a.set(2);
        assert_eq!(value.get(), 2);
    });
}
