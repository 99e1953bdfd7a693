//! Cancelable, reschedulable one-shot timers.
//!
//! A holder owns at most one pending firing. Every arm bumps a generation
//! counter under the holder's lock and aborts the previous task, so a
//! superseded or canceled firing can never run its callback. Once a firing
//! has claimed its slot it runs to completion; the callback is free to
//! rearm the same holder.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

type TimerTask = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Slot {
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

struct TimerCore {
    name: &'static str,
    task: TimerTask,
    runtime: Handle,
    slot: Arc<Mutex<Slot>>,
}

impl TimerCore {
    fn new(name: &'static str, runtime: Handle, task: TimerTask) -> Self {
        Self {
            name,
            task,
            runtime,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    fn arm(&self, delay: Duration) {
        let mut slot = self.slot.lock();
        slot.generation = slot.generation.wrapping_add(1);
        if let Some(previous) = slot.pending.take() {
            previous.abort();
        }

        let generation = slot.generation;
        let shared = Arc::clone(&self.slot);
        let task = Arc::clone(&self.task);
        let name = self.name;

        slot.pending = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = shared.lock();
                if slot.generation != generation {
                    return;
                }
                slot.pending = None;
            }
            trace!("Timer: {} fired after {:?}", name, delay);
            task();
        }));
    }

    fn cancel(&self) {
        let mut slot = self.slot.lock();
        slot.generation = slot.generation.wrapping_add(1);
        if let Some(pending) = slot.pending.take() {
            pending.abort();
        }
    }

    fn is_armed(&self) -> bool {
        self.slot.lock().pending.is_some()
    }
}

impl Drop for TimerCore {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// One-shot timer whose delay may change on every rearm (election timeout)
pub struct DelayTimeout {
    core: TimerCore,
    last_delay: Mutex<Duration>,
}

impl DelayTimeout {
    /// Prepare a timer; nothing is scheduled until the first refresh
    pub fn new<F>(name: &'static str, initial_delay: Duration, runtime: Handle, task: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            core: TimerCore::new(name, runtime, Arc::new(task)),
            last_delay: Mutex::new(initial_delay),
        }
    }

    /// Schedule a firing after `delay`, replacing any pending one. The
    /// delay is remembered for [`restart`](Self::restart).
    pub fn arm(&self, delay: Duration) {
        let mut last_delay = self.last_delay.lock();
        *last_delay = delay;
        self.core.arm(delay);
    }

    /// Cancel any pending firing and schedule one after `delay`
    pub fn refresh(&self, delay: Duration) {
        self.arm(delay);
    }

    /// Cancel any pending firing and schedule one after the last used delay
    pub fn restart(&self) {
        let last_delay = self.last_delay.lock();
        self.core.arm(*last_delay);
    }

    pub fn cancel(&self) {
        self.core.cancel();
    }

    pub fn is_armed(&self) -> bool {
        self.core.is_armed()
    }
}

/// One-shot timer always rearmed with the same interval (heartbeat)
pub struct FixedTimeout {
    core: TimerCore,
    interval: Duration,
}

impl FixedTimeout {
    /// Prepare a timer; nothing is scheduled until the first refresh
    pub fn new<F>(name: &'static str, interval: Duration, runtime: Handle, task: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            core: TimerCore::new(name, runtime, Arc::new(task)),
            interval,
        }
    }

    /// Schedule a single firing after `delay` instead of the interval
    pub fn arm(&self, delay: Duration) {
        self.core.arm(delay);
    }

    /// Cancel any pending firing and schedule one after the fixed interval
    pub fn refresh(&self) {
        self.core.arm(self.interval);
    }

    pub fn cancel(&self) {
        self.core.cancel();
    }

    pub fn is_armed(&self) -> bool {
        self.core.is_armed()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
