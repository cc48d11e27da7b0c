//! Termination signal trap.
//!
//! SIGINT, SIGTERM and SIGHUP must never kill onelane outright: queue and
//! lock cleanup has to run on every exit path. A dedicated thread receives
//! the signals, records the first one, and terminates the supervised
//! command's process tree if one is running. The scheduler polls the
//! recorded signal and unwinds through its normal cleanup.

use crate::error::{Result, SchedError};
use crate::process::terminate;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Signals trapped for the lifetime of a [`SignalTrap`].
pub const TRAPPED: [i32; 3] = [SIGINT, SIGTERM, SIGHUP];

/// Installed signal handlers plus the forwarding thread.
///
/// Handlers are removed and the thread joined on drop.
#[derive(Debug)]
pub struct SignalTrap {
    interrupted: Arc<AtomicI32>,
    child: Arc<AtomicU32>,
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl SignalTrap {
    /// Start trapping. A running child is given `grace` to exit before it
    /// is force-killed.
    pub fn install(grace: Duration) -> Result<Self> {
        let mut signals = Signals::new(TRAPPED).map_err(|e| {
            SchedError::Process(format!("failed to install signal handlers: {}", e))
        })?;
        let handle = signals.handle();

        let interrupted = Arc::new(AtomicI32::new(0));
        let child = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&interrupted);
        let running = Arc::clone(&child);

        let thread = thread::spawn(move || {
            for signal in signals.forever() {
                let _ = seen.compare_exchange(0, signal, Ordering::SeqCst, Ordering::SeqCst);
                let pid = running.load(Ordering::SeqCst);
                if pid == 0 {
                    debug!(signal, "interrupted while waiting");
                    continue;
                }
                warn!(signal, pid, "interrupted; stopping supervised command");
                terminate(pid, grace);
            }
        });

        Ok(Self {
            interrupted,
            child,
            handle,
            thread: Some(thread),
        })
    }

    /// The first trapped signal, if any arrived.
    pub fn interrupted(&self) -> Option<i32> {
        match self.interrupted.load(Ordering::SeqCst) {
            0 => None,
            signal => Some(signal),
        }
    }

    /// Fail with `Interrupted` once a signal has arrived.
    pub fn check(&self) -> Result<()> {
        match self.interrupted() {
            Some(signal) => Err(SchedError::Interrupted { signal }),
            None => Ok(()),
        }
    }

    /// Route later signals to the process tree rooted at `pid`.
    pub fn set_child(&self, pid: u32) {
        self.child.store(pid, Ordering::SeqCst);
    }

    pub fn clear_child(&self) {
        self.child.store(0, Ordering::SeqCst);
    }
}

impl Drop for SignalTrap {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
