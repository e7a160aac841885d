//! Shared Cell Signals
//!
//! Everything the worker units share lives in one [`CellContext`] that is
//! cloned into each thread:
//!
//! - [`StopSignal`]: level-triggered, any unit may raise it, every loop polls it
//! - [`ReadySignal`]: one-shot edge; waiters block with a bounded timeout
//! - [`MotionFlag`]: true while the robot is executing a task. The dispatch
//!   loop's owner writes it, the perception pipeline only reads it.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Global stop request
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    raised: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every unit to wind down
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early in `step` increments if the signal
    /// is raised. Returns true if the signal was raised.
    pub fn sleep(&self, duration: Duration, step: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_raised() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(step.min(deadline - now));
        }
    }
}

#[derive(Debug, Default)]
struct ReadyState {
    set: Mutex<bool>,
    changed: Condvar,
}

/// One-shot readiness notification
#[derive(Debug, Clone, Default)]
pub struct ReadySignal {
    state: Arc<ReadyState>,
}

impl ReadySignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark ready and wake all waiters. Returns false if already set.
    pub fn set(&self) -> bool {
        let mut set = self.state.set.lock();
        if *set {
            return false;
        }
        *set = true;
        self.state.changed.notify_all();
        true
    }

    pub fn is_set(&self) -> bool {
        *self.state.set.lock()
    }

    /// Block until set or until `timeout` elapses. Returns whether it was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut set = self.state.set.lock();
        while !*set {
            if self.state.changed.wait_until(&mut set, deadline).timed_out() {
                return *set;
            }
        }
        true
    }
}

/// Robot-is-moving flag
#[derive(Debug, Clone, Default)]
pub struct MotionFlag {
    moving: Arc<AtomicBool>,
}

impl MotionFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.moving.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.moving.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.moving.load(Ordering::SeqCst)
    }
}

/// Signals shared by every unit of one cell run
#[derive(Debug, Clone, Default)]
pub struct CellContext {
    /// Global stop
    pub stop: StopSignal,
    /// Perception saw both hands for the first time
    pub model_ready: ReadySignal,
    /// Robot link connected and tasks preloaded
    pub robot_online: ReadySignal,
    /// Robot is executing a task
    pub motion: MotionFlag,
}

impl CellContext {
    pub fn new() -> Self {
        Self::default()
    }
}
