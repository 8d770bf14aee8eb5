//! One-shot readiness gate: opened exactly once by one producer, awaited by
//! any number of consumers.
//!
//! The gate is a rendezvous channel that never carries a message. Opening it
//! drops the only sender, which disconnects the channel and wakes every
//! blocked receiver at once.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};

use crate::error::WaitError;

/// A single-shot signal that stays open once opened.
#[derive(Debug)]
pub struct ReadyGate {
    signal: Mutex<Option<Sender<()>>>,
    wait: Receiver<()>,
}

impl ReadyGate {
    /// Creates a closed gate.
    pub fn new() -> Self {
        let (signal, wait) = bounded(0);
        Self {
            signal: Mutex::new(Some(signal)),
            wait,
        }
    }

    /// Creates a gate that is already open.
    pub fn opened() -> Self {
        let gate = Self::new();
        gate.open();
        gate
    }

    /// Opens the gate. Returns `true` only for the call that actually opened it.
    pub fn open(&self) -> bool {
        self.signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    /// Returns `true` once the gate has been opened.
    pub fn is_open(&self) -> bool {
        matches!(self.wait.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Blocks until the gate opens. Never times out.
    pub fn wait(&self) {
        // Nothing is ever sent, so recv only returns once the sender is gone.
        let _ = self.wait.recv();
    }

    /// Blocks until the gate opens or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), WaitError> {
        match self.wait.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(WaitError::Timeout(timeout)),
        }
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}
