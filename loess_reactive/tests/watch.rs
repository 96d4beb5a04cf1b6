use loess_reactive::{create_signal, run_root, watch, SignalGet, SignalSet};
use std::{cell::RefCell, rc::Rc};

#[test]
fn watch_skips_first_run_without_immediate() {
    run_root("t", || {
        let calls: Rc<RefCell<Vec<(i32, Option<i32>)>>> =
            Rc::new(RefCell::new(Vec::new()));
        let (a, set_a) = create_signal(0);
        let stop = watch(
            move || a.get(),
            {
                let calls = Rc::clone(&calls);
                move |cur, prev, _: Option<()>| {
                    calls.borrow_mut().push((*cur, prev.copied()));
                }
            },
            false,
        );

        assert!(calls.borrow().is_empty());
        set_a.set(1);
        assert_eq!(*calls.borrow(), vec![(1, Some(0))]);
        set_a.set(2);
        assert_eq!(*calls.borrow(), vec![(1, Some(0)), (2, Some(1))]);

        stop();
        set_a.set(3);
        assert_eq!(calls.borrow().len(), 2);
    });
}

#[test]
fn watch_immediate_fires_at_once() {
    run_root("t", || {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let (a, _set_a) = create_signal(5);
        let _stop = watch(
            move || a.get(),
            {
                let calls = Rc::clone(&calls);
                move |cur, prev, _: Option<()>| {
                    calls.borrow_mut().push((*cur, prev.copied()));
                }
            },
            true,
        );
        assert_eq!(*calls.borrow(), vec![(5, None)]);
    });
}
