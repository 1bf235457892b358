//! Pause and stop signalling shared between the worker thread running a
//! measurement and the host that presents it.
//!
//! The host flips the flags, the worker polls them at checkpoints. Nothing is
//! ever preempted: a stop only takes effect when the worker reaches its next
//! [`ExecutionControl::checkpoint`] or wakes up from an
//! [`ExecutionControl::sleep`].

use std::{
    fmt,
    sync::{Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

/// Returned from any checkpoint once a stop has been requested. This is a
/// control signal rather than an error, it just unwinds the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stopped;

impl fmt::Display for Stopped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "measurement stopped")
    }
}

impl std::error::Error for Stopped {}

#[derive(Debug, Default)]
struct Flags {
    paused: bool,
    held: bool,
    stopped: bool,
}

/// The pause gate and stop flag for one measurement run.
///
/// The gate has two independent locks: [`pause`](Self::pause) is the user's,
/// [`hold`](Self::hold) belongs to a pending prompt. Answering a prompt never
/// clears a pause the user asked for.
#[derive(Debug, Default)]
pub struct ExecutionControl {
    flags: Mutex<Flags>,
    changed: Condvar,
}

impl ExecutionControl {
    /// A control that is neither paused nor stopped.
    pub fn new() -> Self {
        Self::default()
    }

    fn flags(&self) -> MutexGuard<'_, Flags> {
        // A poisoned lock only means another thread panicked mid-update of two
        // booleans, the values are still meaningful.
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Close the pause gate. The worker blocks at its next checkpoint.
    pub fn pause(&self) {
        self.flags().paused = true;
        self.changed.notify_all();
    }

    /// Open the pause gate again.
    pub fn resume(&self) {
        self.flags().paused = false;
        self.changed.notify_all();
    }

    /// Close the gate on behalf of a prompt waiting for the user.
    pub fn hold(&self) {
        self.flags().held = true;
        self.changed.notify_all();
    }

    /// The prompt was answered. The user's pause, if any, stays.
    pub fn release(&self) {
        self.flags().held = false;
        self.changed.notify_all();
    }

    /// Request a stop. Also wakes a worker blocked on the pause gate.
    pub fn stop(&self) {
        self.flags().stopped = true;
        self.changed.notify_all();
    }

    /// Clear both flags, ready for a fresh run.
    pub fn reset(&self) {
        let mut flags = self.flags();
        flags.paused = false;
        flags.held = false;
        flags.stopped = false;
        self.changed.notify_all();
    }

    /// Whether the pause gate is closed.
    pub fn is_paused(&self) -> bool {
        self.flags().paused
    }

    /// Whether a prompt holds the gate.
    pub fn is_held(&self) -> bool {
        self.flags().held
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.flags().stopped
    }

    /// Block while paused or held, then report whether the worker may carry on.
    pub fn checkpoint(&self) -> Result<(), Stopped> {
        let mut flags = self.flags();
        while (flags.paused || flags.held) && !flags.stopped {
            flags = self
                .changed
                .wait(flags)
                .unwrap_or_else(|e| e.into_inner());
        }
        if flags.stopped {
            Err(Stopped)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, returning early with [`Stopped`] if a stop is
    /// requested meanwhile. A pause during the sleep does not extend it; the
    /// gate is honoured by the checkpoint that follows.
    pub fn sleep(&self, duration: Duration) -> Result<(), Stopped> {
        let deadline = Instant::now() + duration;
        let mut flags = self.flags();
        loop {
            if flags.stopped {
                return Err(Stopped);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            flags = self
                .changed
                .wait_timeout(flags, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }
}
