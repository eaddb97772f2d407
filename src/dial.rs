//! ChatMix dial report decoding
//!
//! The headset reports the dial position as a short interrupt packet:
//! byte 1 carries the system level and byte 2 the voice level, both 0-100.
//! A genuine dial position always has one of the two sides pinned at 100,
//! anything else is a garbled report and is dropped.

use std::fmt;

/// Offset of the system level in a dial report
pub const SYSTEM_LEVEL_OFFSET: usize = 1;

/// Offset of the voice level in a dial report
pub const VOICE_LEVEL_OFFSET: usize = 2;

/// Level at which one side of the dial is pinned for every valid report
pub const FULL_LEVEL: u8 = 100;

/// Pair of volume levels derived from one dial position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VolumeLevels {
    /// Level applied to voice apps (0-100)
    pub voice_level: u8,
    /// Level applied to every other non-excluded app (0-100)
    pub system_level: u8,
}

impl VolumeLevels {
    pub const fn new(voice_level: u8, system_level: u8) -> Self {
        Self {
            voice_level,
            system_level,
        }
    }

    /// Voice level as a scalar volume (0.0 - 1.0)
    pub fn voice_fraction(&self) -> f32 {
        to_fraction(self.voice_level)
    }

    /// System level as a scalar volume (0.0 - 1.0)
    pub fn system_fraction(&self) -> f32 {
        to_fraction(self.system_level)
    }
}

impl Default for VolumeLevels {
    /// Both sides at full volume, the state before the first valid report
    fn default() -> Self {
        Self::new(FULL_LEVEL, FULL_LEVEL)
    }
}

impl fmt::Display for VolumeLevels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice {}%, system {}%", self.voice_level, self.system_level)
    }
}

fn to_fraction(level: u8) -> f32 {
    f32::from(level.min(FULL_LEVEL)) / f32::from(FULL_LEVEL)
}

/// Decode a raw dial report into volume levels
///
/// Returns `None` for reports that are too short or where neither side is
/// at 100 (the dial occasionally emits partial reports).
pub fn decode(report: &[u8]) -> Option<VolumeLevels> {
    let system_level = *report.get(SYSTEM_LEVEL_OFFSET)?;
    let voice_level = *report.get(VOICE_LEVEL_OFFSET)?;

    if voice_level == FULL_LEVEL || system_level == FULL_LEVEL {
        Some(VolumeLevels::new(voice_level, system_level))
    } else {
        None
    }
}
