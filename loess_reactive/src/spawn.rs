#![forbid(unsafe_code)]
use cfg_if::cfg_if;
use std::future::Future;

/// Spawns and runs a thread-local [`Future`] in a platform-independent way.
///
/// Do not use this to synchronize `async` work with rendering on the server;
/// the response will not wait for the spawned task. Use an async memo under
/// a Loading boundary instead, so the renderer coordinates the work.
pub fn spawn_local<F>(fut: F)
where
    F: Future<Output = ()> + 'static,
{
    cfg_if! {
        if #[cfg(target_arch = "wasm32")] {
            wasm_bindgen_futures::spawn_local(fut)
        } else if #[cfg(feature = "ssr")] {
            tokio::task::spawn_local(fut);
        } else {
            futures::executor::block_on(fut)
        }
    }
}

/// Schedules a function to run after the current unit of synchronous work.
///
/// Outside the browser there is no microtask queue to defer to, so the
/// function runs immediately.
pub fn queue_microtask(task: impl FnOnce() + 'static) {
    cfg_if! {
        if #[cfg(target_arch = "wasm32")] {
            wasm_bindgen_futures::spawn_local(async move { task() });
        } else {
            task();
        }
    }
}

thread_local! {
    static SCHEDULED: std::cell::RefCell<
        Vec<std::pin::Pin<Box<dyn Future<Output = ()>>>>,
    > = Default::default();
}

/// Schedules background reactive work, such as consuming the remaining
/// yields of a hydrated stream.
///
/// In the browser this spawns onto the microtask queue. Elsewhere the work
/// is queued and driven by [`run_scheduled`], so that a test or transport
/// controls when continuations run instead of blocking the render.
pub fn schedule_local(fut: impl Future<Output = ()> + 'static) {
    cfg_if! {
        if #[cfg(target_arch = "wasm32")] {
            wasm_bindgen_futures::spawn_local(fut);
        } else {
            SCHEDULED.with(|q| q.borrow_mut().push(Box::pin(fut)));
        }
    }
}

/// Drives all work queued by [`schedule_local`] to completion, including
/// work scheduled while running. A no-op in the browser, where scheduled
/// work runs on the microtask queue.
pub async fn run_scheduled() {
    loop {
        let batch = SCHEDULED.with(|q| std::mem::take(&mut *q.borrow_mut()));
        if batch.is_empty() {
            break;
        }
        futures::future::join_all(batch).await;
    }
}
