//! Trailing-edge debounce for bursts of media change notifications.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use log::trace;
use tokio::{runtime::Handle, task::JoinHandle};

pub const DEFAULT_QUIET_INTERVAL: Duration = Duration::from_millis(300);

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Pending {
    /// Bumped on every arm and cancel; a timer only fires if it still holds
    /// the current generation.
    generation: u64,
    task: Option<JoinHandle<()>>,
    disposed: bool,
}

impl Pending {
    fn disarm(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Collapses any number of [`notify`](ChangeDebouncer::notify) calls into a
/// single callback that runs once the calls have been quiet for `interval`.
///
/// Each call restarts the timer. Cancelling and re-arming happen under one
/// lock, so concurrent notifiers never leave two timers armed.
pub struct ChangeDebouncer {
    interval: Duration,
    runtime: Handle,
    callback: Callback,
    pending: Arc<Mutex<Pending>>,
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ChangeDebouncer {
    pub fn new<F>(runtime: Handle, interval: Duration, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            interval,
            runtime,
            callback: Arc::new(callback),
            pending: Arc::new(Mutex::new(Pending::default())),
        }
    }

    pub fn notify(&self) {
        let mut pending = lock(&self.pending);
        if pending.disposed {
            return;
        }
        pending.disarm();
        let generation = pending.generation;

        let shared = Arc::clone(&self.pending);
        let callback = Arc::clone(&self.callback);
        let interval = self.interval;
        pending.task = Some(self.runtime.spawn(async move {
            tokio::time::sleep(interval).await;
            {
                let mut pending = lock(&shared);
                if pending.disposed || pending.generation != generation {
                    return;
                }
                pending.task = None;
            }
            trace!("debounce interval elapsed, firing");
            callback();
        }));
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.pending).task.is_some()
    }

    /// Drops a pending timer without firing it. Later notifications still
    /// work.
    pub fn cancel(&self) {
        lock(&self.pending).disarm();
    }

    /// Cancels any pending timer and ignores every later notification.
    pub fn dispose(&self) {
        let mut pending = lock(&self.pending);
        pending.disposed = true;
        pending.disarm();
    }
}

impl Drop for ChangeDebouncer {
    fn drop(&mut self) {
        self.dispose();
    }
}
