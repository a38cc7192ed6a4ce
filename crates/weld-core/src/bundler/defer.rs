//! Build-wide barrier behind `onLoad`'s `defer()`.
//!
//! Every in-flight module task is "active". A handler that defers parks itself;
//! once no active task remains, every parked handler is released together and
//! becomes active again. Loads that never defer are not slowed down.

use super::plugin::{HookResult, PluginError};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;

pub(crate) const DEFER_MISUSE: &str = "Can't call .defer() more than once within an onLoad plugin";

#[derive(Debug, Default)]
struct BarrierState {
    active: usize,
    parked: usize,
}

#[derive(Debug)]
pub(crate) struct DeferBarrier {
    state: Mutex<BarrierState>,
    generation: watch::Sender<u64>,
}

impl DeferBarrier {
    pub(crate) fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            state: Mutex::new(BarrierState::default()),
            generation,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A module task is about to start.
    pub(crate) fn enter(&self) {
        self.lock().active += 1;
    }

    /// A module task finished, after its children were entered.
    pub(crate) fn exit(&self) {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
        self.maybe_release(&mut state);
    }

    fn maybe_release(&self, state: &mut BarrierState) {
        if state.active == 0 && state.parked > 0 {
            debug!(released = state.parked, "defer barrier released");
            state.active += state.parked;
            state.parked = 0;
            self.generation.send_modify(|g| *g += 1);
        }
    }

    /// Wait until every other active task has finished or parked too.
    pub(crate) async fn park(&self) {
        let mut rx = self.generation.subscribe();
        let parked_at = {
            let mut state = self.lock();
            state.active = state.active.saturating_sub(1);
            state.parked += 1;
            let parked_at = *rx.borrow_and_update();
            self.maybe_release(&mut state);
            parked_at
        };

        let mut guard = ParkGuard {
            barrier: self,
            parked_at,
            released: false,
        };
        // The sender lives as long as the barrier, so this only ends on release.
        let _ = rx.wait_for(|g| *g > parked_at).await;
        guard.released = true;
    }

    #[cfg(test)]
    fn counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.active, state.parked)
    }
}

/// Undoes a park whose future was dropped before release.
struct ParkGuard<'a> {
    barrier: &'a DeferBarrier,
    parked_at: u64,
    released: bool,
}

impl Drop for ParkGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut state = self.barrier.lock();
        if *self.barrier.generation.borrow() == self.parked_at && state.parked > 0 {
            state.parked -= 1;
            state.active += 1;
        }
    }
}

/// The `defer` capability handed to one `onLoad` invocation.
#[derive(Debug, Clone)]
pub struct Defer {
    calls: Arc<AtomicUsize>,
    barrier: Arc<DeferBarrier>,
}

impl Defer {
    pub(crate) fn new(barrier: Arc<DeferBarrier>) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            barrier,
        }
    }

    /// Suspend until all other pending loads settle.
    ///
    /// The call is counted when made, not when awaited: a second call errors even
    /// if the first future was never polled.
    pub fn defer(&self) -> impl Future<Output = HookResult<()>> + Send + 'static {
        let previous = self.calls.fetch_add(1, Ordering::SeqCst);
        let barrier = Arc::clone(&self.barrier);
        async move {
            if previous > 0 {
                return Err(PluginError::msg(DEFER_MISUSE));
            }
            barrier.park().await;
            Ok(())
        }
    }

    pub(crate) fn misused(&self) -> bool {
        self.calls.load(Ordering::SeqCst) > 1
    }
}
