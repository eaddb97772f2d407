//! Dial-to-volume synchronisation engine
//!
//! Two poll loops share one [`SharedState`]:
//! - the dial loop decodes reports and publishes new [`VolumeLevels`]
//! - the session loop classifies newly appeared audio apps
//!
//! Either loop then asks the [`VolumeApplier`] to reconcile live sessions
//! against the current levels and classification.

pub mod applier;
pub mod classifier;
pub mod controller;
pub mod dial_loop;
pub mod session_loop;
pub mod shutdown;

use parking_lot::RwLock;
use std::fmt;
use std::time::Duration;

use crate::dial::VolumeLevels;

pub use applier::{ApplyReport, VolumeApplier};
pub use classifier::{classify_new, AppClass, AppNameSets, ClassificationTable, ClassifyOutcome};
pub use controller::LifecycleController;
pub use dial_loop::{DialLoopState, DialPollLoop};
pub use session_loop::{SessionPoll, SessionPollLoop};
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};

/// State shared by both poll loops
#[derive(Debug, Default)]
pub struct SharedState {
    levels: RwLock<VolumeLevels>,
    table: ClassificationTable,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last valid dial levels (both sides at 100 before the first report)
    pub fn levels(&self) -> VolumeLevels {
        *self.levels.read()
    }

    /// Replace both levels at once
    pub fn set_levels(&self, levels: VolumeLevels) {
        *self.levels.write() = levels;
    }

    pub fn table(&self) -> &ClassificationTable {
        &self.table
    }
}

/// Loop timing and classification inputs
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub names: AppNameSets,
    /// Period of the session loop
    pub session_poll: Duration,
    /// Pause between spotting a new session and applying volumes
    pub settle_delay: Duration,
    /// Upper bound of a single dial read
    pub read_timeout: Duration,
}

/// Which poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKind {
    Dial,
    Session,
}

impl LoopKind {
    pub fn thread_name(&self) -> &'static str {
        match self {
            LoopKind::Dial => "dial-poll",
            LoopKind::Session => "session-poll",
        }
    }
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.thread_name())
    }
}

/// Why a poll loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Shutdown was signalled
    Cancelled,
    /// The dial went away; only the dial loop exits this way
    DeviceDisconnected,
    /// The loop panicked
    Panicked,
}

impl fmt::Display for LoopExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopExit::Cancelled => write!(f, "cancelled"),
            LoopExit::DeviceDisconnected => write!(f, "device disconnected"),
            LoopExit::Panicked => write!(f, "panicked"),
        }
    }
}
