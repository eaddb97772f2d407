//! Volume application
//!
//! Pushes the current dial levels onto every live session according to the
//! classification table. Invocations are serialised; both poll loops may
//! trigger a pass.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::classifier::{AppClass, ClassificationTable};
use crate::audio::{AudioSession, AudioSessionProvider};
use crate::dial::VolumeLevels;

/// Diagnostics for one apply pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Sessions whose volume was set
    pub applied: usize,
    /// Sessions left alone because their app is excluded
    pub excluded: usize,
    /// Sessions without a classification yet, driven as system apps
    pub unclassified: usize,
    /// Sessions whose volume call failed
    pub failed: usize,
}

impl fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} applied, {} excluded, {} unclassified, {} failed",
            self.applied, self.excluded, self.unclassified, self.failed
        )
    }
}

pub struct VolumeApplier {
    provider: Arc<dyn AudioSessionProvider>,
    serial: Mutex<()>,
}

impl VolumeApplier {
    pub fn new(provider: Arc<dyn AudioSessionProvider>) -> Self {
        Self {
            provider,
            serial: Mutex::new(()),
        }
    }

    /// Apply `levels` to a fresh snapshot of the live sessions
    pub fn apply(&self, levels: VolumeLevels, table: &ClassificationTable) -> ApplyReport {
        let _serial = self.serial.lock();

        match self.provider.list_sessions() {
            Ok(sessions) => self.apply_sessions(levels, table, &sessions),
            Err(e) => {
                warn!("Failed to list audio sessions, volumes not applied: {}", e);
                ApplyReport::default()
            }
        }
    }

    /// Apply `levels` to the given sessions
    pub fn apply_to(
        &self,
        levels: VolumeLevels,
        table: &ClassificationTable,
        sessions: &[AudioSession],
    ) -> ApplyReport {
        let _serial = self.serial.lock();
        self.apply_sessions(levels, table, sessions)
    }

    fn apply_sessions(
        &self,
        levels: VolumeLevels,
        table: &ClassificationTable,
        sessions: &[AudioSession],
    ) -> ApplyReport {
        let mut report = ApplyReport::default();

        for session in sessions {
            // Not classified yet: system for this pass, the table is left to the classifier
            let class = table.get(session.app.instance_id).unwrap_or_else(|| {
                report.unclassified += 1;
                AppClass::System
            });

            let (fraction, level) = match class {
                AppClass::Excluded => {
                    trace!("Ignoring volume for {}", session.app);
                    report.excluded += 1;
                    continue;
                }
                AppClass::Voice => (levels.voice_fraction(), levels.voice_level),
                AppClass::System => (levels.system_fraction(), levels.system_level),
            };

            debug!("Setting volume for {} to {}", session.app, level);
            match self.provider.set_volume(session, fraction) {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    warn!("Failed to set volume for {}: {}", session.app, e);
                    report.failed += 1;
                }
            }
        }

        debug!("Volume pass ({}): {}", levels, report);
        report
    }
}
