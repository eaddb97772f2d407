//! Session classification
//!
//! Every app instance is classified once, the first time it is seen producing
//! audio, and keeps that class for the rest of its life. Entries are never
//! evicted: a process id that shows up again is not reclassified.

use dashmap::DashMap;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use tracing::{debug, info};

use crate::audio::{AppInstance, InstanceId};

/// How an app instance's volume is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppClass {
    /// Follows the dial's voice level
    Voice,
    /// Never touched
    Excluded,
    /// Follows the dial's system level
    System,
}

impl fmt::Display for AppClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppClass::Voice => write!(f, "voice"),
            AppClass::Excluded => write!(f, "excluded"),
            AppClass::System => write!(f, "system"),
        }
    }
}

/// Configured executable names for the voice and excluded classes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppNameSets {
    pub voice: BTreeSet<String>,
    pub excluded: BTreeSet<String>,
}

impl AppNameSets {
    pub fn new<V, E>(voice: V, excluded: E) -> Self
    where
        V: IntoIterator,
        V::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            voice: voice.into_iter().map(Into::into).collect(),
            excluded: excluded.into_iter().map(Into::into).collect(),
        }
    }

    /// Class for an executable name; voice wins over excluded
    pub fn class_for(&self, name: &str) -> AppClass {
        if self.voice.contains(name) {
            AppClass::Voice
        } else if self.excluded.contains(name) {
            AppClass::Excluded
        } else {
            AppClass::System
        }
    }
}

/// Class of every instance observed so far, keyed by instance id
///
/// Append-only; only the session poll loop inserts.
#[derive(Debug, Default)]
pub struct ClassificationTable {
    entries: DashMap<InstanceId, AppClass>,
}

impl ClassificationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: InstanceId) -> Option<AppClass> {
        self.entries.get(&id).map(|entry| *entry)
    }

    /// Insert `class` unless `id` is already classified
    ///
    /// Returns the class now on record and whether it was inserted.
    pub fn classify_once(&self, id: InstanceId, class: AppClass) -> (AppClass, bool) {
        let mut inserted = false;
        let entry = self.entries.entry(id).or_insert_with(|| {
            inserted = true;
            class
        });
        (*entry, inserted)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of one classification pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifyOutcome {
    /// Instances present now but not in the previous snapshot, with their class
    pub appeared: Vec<(AppInstance, AppClass)>,
    /// How many of those received their first classification in this pass
    pub newly_classified: usize,
}

impl ClassifyOutcome {
    /// Whether volumes should be re-applied for the new arrivals
    pub fn has_new(&self) -> bool {
        !self.appeared.is_empty()
    }
}

/// Classify the instances of `current` that were not in `previous`
pub fn classify_new(
    previous: &HashSet<InstanceId>,
    current: &[AppInstance],
    names: &AppNameSets,
    table: &ClassificationTable,
) -> ClassifyOutcome {
    let mut outcome = ClassifyOutcome::default();

    for app in current {
        if previous.contains(&app.instance_id) {
            continue;
        }

        let (class, inserted) = table.classify_once(app.instance_id, names.class_for(&app.name));
        if inserted {
            outcome.newly_classified += 1;
            match class {
                AppClass::Voice => info!("New voice audio session: {}", app),
                AppClass::Excluded => debug!("Ignoring new audio session: {}", app),
                AppClass::System => info!("New general audio session: {}", app),
            }
        } else {
            debug!("Audio session reappeared: {} (still {})", app, class);
        }

        outcome.appeared.push((app.clone(), class));
    }

    outcome
}
