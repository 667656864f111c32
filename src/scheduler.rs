//! Debounced save scheduling and the per-collection in-flight flag.
//!
//! ```text
//!  mutate ─▶ save() ─▶ [debounce timer] ─▶ fired() ─▶ flush(force=false)
//!  mutate ─▶ save() ─┘ (previous timer aborted)           │
//!                                                         ▼
//!                                           begin() ── in flight? ──▶ Skipped
//!                                              │                     (reschedule)
//!                                              ▼
//!                                     adapter writes, guard dropped
//! ```
//!
//! A timer that has fired detaches itself from the scheduler before the
//! flush starts, so a later `schedule` or `cancel` can only abort timers
//! that are still sleeping, never a write in progress.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::SaveSettings;

struct Pending {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Flag {
    token: u64,
    started: Instant,
}

pub struct SaveScheduler {
    debounce: Duration,
    in_flight_timeout: Duration,
    pending: Mutex<Option<Pending>>,
    generation: AtomicU64,
    in_flight: Arc<Mutex<Option<Flag>>>,
}

/// Held for the duration of a flush. Clears the in-flight flag on drop
/// unless a forced or stale-clearing flush has replaced it.
#[must_use]
pub struct InFlight {
    flag: Arc<Mutex<Option<Flag>>>,
    token: u64,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut flag = lock(&self.flag);
        if flag.map(|f| f.token) == Some(self.token) {
            *flag = None;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SaveScheduler {
    pub fn new(debounce: Duration, in_flight_timeout: Duration) -> Self {
        Self {
            debounce,
            in_flight_timeout,
            pending: Mutex::new(None),
            generation: AtomicU64::new(0),
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_settings(settings: &SaveSettings) -> Self {
        Self::new(settings.debounce(), settings.in_flight_timeout())
    }

    /// Run `task` after the debounce delay, replacing any timer that has
    /// not fired yet. `task` receives the generation it must pass to
    /// [`fired`](Self::fired).
    ///
    /// Returns `false` when called outside a tokio runtime.
    pub fn schedule<F, Fut>(&self, task: F) -> bool
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("no tokio runtime; debounced save not scheduled");
            return false;
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.debounce;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task(generation).await;
        });

        let previous = lock(&self.pending).replace(Pending { generation, handle });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
        true
    }

    /// Called by a timer task once its delay elapsed. Returns `false` if the
    /// timer was superseded and must not flush.
    pub fn fired(&self, generation: u64) -> bool {
        let mut pending = lock(&self.pending);
        if pending.as_ref().map(|p| p.generation) != Some(generation) {
            return false;
        }
        pending.take();
        true
    }

    /// Abort a sleeping timer. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        match lock(&self.pending).take() {
            Some(p) => {
                p.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self) -> bool {
        lock(&self.pending).is_some()
    }

    pub fn is_saving(&self) -> bool {
        lock(&self.in_flight).is_some()
    }

    /// Mark a flush as in flight. `None` if another flush holds the flag
    /// and is younger than the in-flight timeout. `force` takes the flag
    /// regardless.
    pub fn begin(&self, force: bool) -> Option<InFlight> {
        let mut flag = lock(&self.in_flight);
        if let Some(current) = *flag {
            let elapsed = current.started.elapsed();
            if !force {
                if elapsed < self.in_flight_timeout {
                    return None;
                }
                tracing::warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    "clearing stale in-flight save flag"
                );
            }
        }

        let token = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *flag = Some(Flag {
            token,
            started: Instant::now(),
        });
        Some(InFlight {
            flag: Arc::clone(&self.in_flight),
            token,
        })
    }
}

impl Drop for SaveScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
