//! Cooperative cancellation for the poll loops
//!
//! The trigger owns the only sender of a channel that never carries a message.
//! Dropping it disconnects every receiver at once, which both answers
//! `is_triggered` and wakes any loop parked in `sleep`.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::time::Duration;

/// Fires the shutdown signal
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: Mutex<Option<Sender<()>>>,
}

/// Observed by each loop once per iteration
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: Receiver<()>,
}

/// Create a linked trigger/signal pair
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = channel::bounded(0);
    (
        ShutdownTrigger {
            tx: Mutex::new(Some(tx)),
        },
        ShutdownSignal { rx },
    )
}

impl ShutdownTrigger {
    /// Signal every loop to stop. Idempotent.
    pub fn trigger(&self) {
        self.tx.lock().take();
    }

    pub fn is_triggered(&self) -> bool {
        self.tx.lock().is_none()
    }
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for `duration` unless shutdown fires first
    ///
    /// Returns `true` if shutdown was signalled.
    pub fn sleep(&self, duration: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(duration),
            Err(RecvTimeoutError::Disconnected)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_signal_starts_clear() {
        let (trigger, signal) = shutdown_channel();
        assert!(!signal.is_triggered());
        assert!(!trigger.is_triggered());
        assert!(!signal.sleep(Duration::from_millis(5)));
    }

    #[test]
    fn test_trigger_reaches_every_clone() {
        let (trigger, signal) = shutdown_channel();
        let other = signal.clone();

        trigger.trigger();
        trigger.trigger();

        assert!(trigger.is_triggered());
        assert!(signal.is_triggered());
        assert!(other.is_triggered());
    }

    #[test]
    fn test_trigger_wakes_sleeper() {
        let (trigger, signal) = shutdown_channel();

        let sleeper = std::thread::spawn(move || {
            let start = Instant::now();
            let cancelled = signal.sleep(Duration::from_secs(10));
            (cancelled, start.elapsed())
        });

        std::thread::sleep(Duration::from_millis(50));
        trigger.trigger();

        let (cancelled, elapsed) = sleeper.join().unwrap();
        assert!(cancelled);
        assert!(elapsed < Duration::from_secs(2));
    }
}
