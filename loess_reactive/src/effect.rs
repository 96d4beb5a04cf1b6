#![forbid(unsafe_code)]
use crate::{
    node::{
        AnyComputation, NodeId, ReactiveNode, ReactiveNodeState,
        ReactiveNodeType,
    },
    owner::{next_primitive_id, register_node},
    runtime::Runtime,
    snapshot, untrack,
};
use std::{any::Any, cell::RefCell, marker::PhantomData, rc::Rc};

/// Effects run a side-effecting function whenever one of the reactive values
/// it reads changes.
///
/// On the server this is a no-op: HTML is rendered once, so there is nothing
/// for an effect to synchronize with. Use [`create_isomorphic_effect`] for
/// logic that must also run during server rendering.
///
/// The argument to the effect function is its previous return value, `None`
/// on the first run.
#[track_caller]
pub fn create_effect<T>(f: impl Fn(Option<T>) -> T + 'static)
where
    T: 'static,
{
    let server = crate::shared_context()
        .map(|ctx| !ctx.is_browser())
        .unwrap_or(false);
    if !server {
        create_isomorphic_effect(f);
    }
}

/// An effect that also runs during server rendering, immediately and
/// synchronously.
#[track_caller]
pub fn create_isomorphic_effect<T>(f: impl Fn(Option<T>) -> T + 'static)
where
    T: 'static,
{
    create_concrete_effect(Rc::new(EffectState {
        f,
        ty: PhantomData,
    }));
}

/// An effect meant to synchronize rendered output with reactive state; runs
/// wherever rendering runs.
#[track_caller]
pub fn create_render_effect<T>(f: impl Fn(Option<T>) -> T + 'static)
where
    T: 'static,
{
    create_isomorphic_effect(f);
}

fn create_concrete_effect<T, F>(state: Rc<EffectState<T, F>>) -> NodeId
where
    T: 'static,
    F: Fn(Option<T>) -> T + 'static,
{
    _ = next_primitive_id();
    let scope = snapshot::scope_for_new_computation();
    let id = Runtime::with(|rt| {
        rt.nodes.borrow_mut().insert(ReactiveNode {
            value: Some(Rc::new(RefCell::new(None::<T>))),
            state: ReactiveNodeState::Clean,
            node_type: ReactiveNodeType::Effect { f: state },
            snapshot_scope: scope,
        })
    });
    if let Some(scope) = scope {
        snapshot::register_computation(scope, id);
    }
    register_node(id);
    // run the effect for the first time
    Runtime::with(|rt| rt.update(id));
    id
}

struct EffectState<T, F>
where
    F: Fn(Option<T>) -> T,
{
    f: F,
    ty: PhantomData<T>,
}

impl<T, F> AnyComputation for EffectState<T, F>
where
    T: 'static,
    F: Fn(Option<T>) -> T,
{
    fn run(&self, value: Rc<RefCell<dyn Any>>) -> bool {
        let prev = {
            let mut value = value.borrow_mut();
            value
                .downcast_mut::<Option<T>>()
                .expect("to downcast effect value")
                .take()
        };
        let next = (self.f)(prev);
        *value
            .borrow_mut()
            .downcast_mut::<Option<T>>()
            .expect("to downcast effect value") = Some(next);
        true
    }
}

/// Runs `callback` whenever the value of `deps` changes, without tracking
/// the callback's own reads.
///
/// If `immediate` is false, the callback is skipped on the first run.
/// Returns a function that stops watching.
pub fn watch<W, T>(
    deps: impl Fn() -> W + 'static,
    callback: impl Fn(&W, Option<&W>, Option<T>) -> T + 'static,
    immediate: bool,
) -> impl Fn() + Clone
where
    W: Clone + 'static,
    T: 'static,
{
    let prev_deps_value = Rc::new(RefCell::new(None::<W>));
    let prev_callback_value = Rc::new(RefCell::new(None::<T>));

    let id = {
        let prev_deps_value = Rc::clone(&prev_deps_value);
        let prev_callback_value = Rc::clone(&prev_callback_value);
        let state = Rc::new(EffectState {
            f: move |did_run_before: Option<()>| {
                let deps_value = deps();

                if !immediate && did_run_before.is_none() {
                    prev_deps_value.replace(Some(deps_value));
                    return;
                }

                let prev = prev_deps_value.borrow().clone();
                let callback_value = untrack(|| {
                    callback(
                        &deps_value,
                        prev.as_ref(),
                        prev_callback_value.take(),
                    )
                });
                prev_callback_value.replace(Some(callback_value));
                prev_deps_value.replace(Some(deps_value));
            },
            ty: PhantomData,
        });
        create_concrete_effect(state)
    };

    move || {
        Runtime::with(|rt| rt.dispose_node(id));
    }
}
