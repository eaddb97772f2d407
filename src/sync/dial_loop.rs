//! Dial poll loop
//!
//! Reads the dial with a short timeout so shutdown is observed between reads.
//! Only a disconnect ends the loop from the device side; every other device
//! error is logged and reading continues.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::applier::VolumeApplier;
use super::shutdown::ShutdownSignal;
use super::{LoopExit, SharedState};
use crate::device::{DeviceError, DialDevice};
use crate::dial;

/// Where the loop is after an iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialLoopState {
    /// Got a report (or a transient error); keep reading
    Reading,
    /// Read timed out; keep reading
    IdleOnTimeout,
    /// Loop is done
    Terminated,
}

pub struct DialPollLoop<D: DialDevice> {
    device: D,
    state: Arc<SharedState>,
    applier: Arc<VolumeApplier>,
    shutdown: ShutdownSignal,
    read_timeout: Duration,
    exit: LoopExit,
}

impl<D: DialDevice> DialPollLoop<D> {
    pub fn new(
        device: D,
        state: Arc<SharedState>,
        applier: Arc<VolumeApplier>,
        shutdown: ShutdownSignal,
        read_timeout: Duration,
    ) -> Self {
        Self {
            device,
            state,
            applier,
            shutdown,
            read_timeout,
            exit: LoopExit::Cancelled,
        }
    }

    /// Run one iteration
    pub fn step(&mut self) -> DialLoopState {
        if self.shutdown.is_triggered() {
            self.exit = LoopExit::Cancelled;
            return DialLoopState::Terminated;
        }

        match self.device.read_report(self.read_timeout) {
            Ok(report) => {
                self.handle_report(&report);
                DialLoopState::Reading
            }
            Err(DeviceError::Timeout) => {
                trace!("Dial read timed out");
                DialLoopState::IdleOnTimeout
            }
            Err(DeviceError::Disconnected) => {
                info!("USB device disconnected");
                self.exit = LoopExit::DeviceDisconnected;
                DialLoopState::Terminated
            }
            Err(e) => {
                warn!("USB error: {}", e);
                DialLoopState::Reading
            }
        }
    }

    fn handle_report(&self, report: &[u8]) {
        let Some(levels) = dial::decode(report) else {
            debug!(
                "Voice or system level not at 100, ignoring report {}",
                hex::encode(report)
            );
            return;
        };

        info!(
            "Voice Level: {}, System Level: {}",
            levels.voice_level, levels.system_level
        );
        self.state.set_levels(levels);
        self.applier.apply(levels, self.state.table());
    }

    /// Read until shutdown or disconnect, then release the device
    pub fn run(mut self) -> LoopExit {
        info!("Starting USB chatmix dial position monitoring");

        while self.step() != DialLoopState::Terminated {}

        self.device.release();
        info!("Dial monitoring stopped ({})", self.exit);
        self.exit
    }
}
