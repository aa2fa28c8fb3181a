//! Structured concurrency for ants, jobs and the farm monitor.
//!
//! A `TaskGroup` counts in-flight work and carries a one-shot stop signal.
//! Background tasks call [`TaskGroup::register`] (or [`TaskGroup::spawn`],
//! which does it for them) before doing anything and hold the returned
//! [`TaskGuard`] for as long as they run. Dropping the guard unregisters the
//! task, so every exit path (return, `?`, panic unwinding, observing the stop
//! signal) releases it.
//!
//! [`TaskGroup::stop`] closes the group to new registrations, fires the stop
//! signal, waits for the in-flight count to reach zero and then runs the
//! `on_stop` callbacks, most recently registered first.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::{Error, Result};

type StopCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct State {
    active: usize,
    stopping: bool,
    stopped: bool,
    on_stop: Vec<StopCallback>,
}

struct Inner {
    state: Mutex<State>,
    token: CancellationToken,
    idle: Notify,
    done: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        // Callbacks never run under the lock, so a poisoned mutex only means a
        // panicking task dropped its guard; the counters are still coherent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Registry of in-flight work plus a shared stop signal.
///
/// Cloning is cheap; all clones refer to the same group.
#[derive(Clone)]
pub struct TaskGroup {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("TaskGroup")
            .field("active", &state.active)
            .field("stopping", &state.stopping)
            .field("stopped", &state.stopped)
            .finish()
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGroup {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                token: CancellationToken::new(),
                idle: Notify::new(),
                done: Notify::new(),
            }),
        }
    }

    /// Register one unit of in-flight work.
    ///
    /// Fails with [`Error::Stopped`] once [`stop`](Self::stop) has been
    /// called, no matter how far the stop has progressed.
    pub fn register(&self) -> Result<TaskGuard> {
        let mut state = self.inner.lock();
        if state.stopping {
            return Err(Error::Stopped);
        }
        state.active += 1;
        Ok(TaskGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Register a task and run it on the tokio runtime.
    ///
    /// The registration is released when the future completes. The group
    /// does not wait on the returned handle; `stop` waits on the count.
    pub fn spawn<F>(&self, fut: F) -> Result<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.register()?;
        Ok(tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        }))
    }

    /// Number of registered tasks that have not yet unregistered.
    pub fn active_count(&self) -> usize {
        self.inner.lock().active
    }

    /// Whether `stop` has been initiated. Once true, `register` fails.
    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stopping
    }

    /// Future that resolves once `stop` has been initiated.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.token.cancelled()
    }

    /// Sleep for `duration`, returning early with [`Error::Stopped`] if the
    /// group is stopped first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.inner.token.cancelled() => Err(Error::Stopped),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Run `callback` exactly once after all registered work has finished
    /// during `stop`. If the group is already stopping, it runs immediately.
    pub fn on_stop<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.lock();
        if state.stopping {
            drop(state);
            callback();
            return;
        }
        state.on_stop.push(Box::new(callback));
    }

    /// Stop the group and wait until every registered task has unregistered
    /// and every `on_stop` callback has run.
    ///
    /// Only the first call performs the stop; later calls return
    /// [`Error::Stopped`] once the first has completed.
    pub async fn stop(&self) -> Result<()> {
        let first = {
            let mut state = self.inner.lock();
            let first = !state.stopping;
            state.stopping = true;
            first
        };

        if !first {
            self.wait_done().await;
            return Err(Error::Stopped);
        }

        self.inner.token.cancel();
        self.wait_idle().await;

        let callbacks = std::mem::take(&mut self.inner.lock().on_stop);
        for callback in callbacks.into_iter().rev() {
            callback();
        }

        self.inner.lock().stopped = true;
        self.inner.done.notify_waiters();
        Ok(())
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.lock().active == 0 {
                return;
            }
            notified.await;
        }
    }

    async fn wait_done(&self) {
        loop {
            let notified = self.inner.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.lock().stopped {
                return;
            }
            notified.await;
        }
    }
}

/// Proof of registration in a [`TaskGroup`]. Unregisters on drop.
#[must_use = "dropping the guard unregisters the task immediately"]
pub struct TaskGuard {
    inner: Arc<Inner>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.active = state.active.saturating_sub(1);
        if state.active == 0 {
            drop(state);
            self.inner.idle.notify_waiters();
        }
    }
}
