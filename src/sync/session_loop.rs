//! Session poll loop
//!
//! Snapshots the live audio sessions once per period, classifies instances
//! that were not in the previous snapshot, and re-applies volumes after a short
//! settling delay so a freshly created session has its volume control ready.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::applier::{ApplyReport, VolumeApplier};
use super::classifier::{classify_new, AppNameSets};
use super::shutdown::ShutdownSignal;
use super::{LoopExit, SharedState};
use crate::audio::{self, AudioSession, AudioSessionProvider, InstanceId, ProviderError};

/// Outcome of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPoll {
    /// Nothing new
    Idle,
    /// New instances showed up and volumes were applied
    Applied(ApplyReport),
    /// The snapshot could not be taken; retried next period
    SnapshotFailed,
    /// Shutdown fired during the settling delay
    Cancelled,
}

pub struct SessionPollLoop {
    provider: Arc<dyn AudioSessionProvider>,
    state: Arc<SharedState>,
    applier: Arc<VolumeApplier>,
    names: AppNameSets,
    shutdown: ShutdownSignal,
    period: Duration,
    settle_delay: Duration,
    /// `None` until a snapshot has succeeded
    known: Option<HashSet<InstanceId>>,
}

impl SessionPollLoop {
    pub fn new(
        provider: Arc<dyn AudioSessionProvider>,
        state: Arc<SharedState>,
        applier: Arc<VolumeApplier>,
        names: AppNameSets,
        shutdown: ShutdownSignal,
        period: Duration,
        settle_delay: Duration,
    ) -> Self {
        Self {
            provider,
            state,
            applier,
            names,
            shutdown,
            period,
            settle_delay,
            known: None,
        }
    }

    /// Seed the known set from the sessions already running
    ///
    /// These are not treated as new, so startup doesn't trigger a volume pass.
    /// If the snapshot fails, the first successful poll seeds the set instead.
    pub fn prime(&mut self) {
        match self.snapshot() {
            Ok(sessions) => self.seed(&sessions),
            Err(e) => warn!("Initial audio session snapshot failed: {}", e),
        }
    }

    fn seed(&mut self, sessions: &[AudioSession]) {
        let known = Self::ids(sessions);
        debug!("{} audio app(s) already running", known.len());
        self.known = Some(known);
    }

    /// Run one poll
    pub fn poll_once(&mut self) -> SessionPoll {
        let sessions = match self.snapshot() {
            Ok(sessions) => sessions,
            Err(ProviderError::ProcessVanished(pid)) => {
                debug!("Process {} vanished during session snapshot", pid);
                return SessionPoll::SnapshotFailed;
            }
            Err(e) => {
                warn!("Audio session snapshot failed: {}", e);
                return SessionPoll::SnapshotFailed;
            }
        };

        let Some(known) = &self.known else {
            self.seed(&sessions);
            return SessionPoll::Idle;
        };

        let current = audio::instances(&sessions);
        let outcome = classify_new(known, &current, &self.names, self.state.table());

        let result = if outcome.has_new() {
            if self.shutdown.sleep(self.settle_delay) {
                return SessionPoll::Cancelled;
            }
            SessionPoll::Applied(self.applier.apply(self.state.levels(), self.state.table()))
        } else {
            SessionPoll::Idle
        };

        self.known = Some(current.iter().map(|app| app.instance_id).collect());
        result
    }

    fn snapshot(&self) -> Result<Vec<AudioSession>, ProviderError> {
        self.provider.list_sessions()
    }

    fn ids(sessions: &[AudioSession]) -> HashSet<InstanceId> {
        sessions.iter().map(|s| s.app.instance_id).collect()
    }

    /// Poll until shutdown
    pub fn run(mut self) -> LoopExit {
        info!("Starting audio session monitoring");
        self.prime();

        while !self.shutdown.is_triggered() {
            if self.poll_once() == SessionPoll::Cancelled {
                break;
            }
            if self.shutdown.sleep(self.period) {
                break;
            }
        }

        info!("Audio session monitoring stopped");
        LoopExit::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dial::VolumeLevels;
    use crate::sync::classifier::AppClass;
    use crate::sync::dial_loop::DialPollLoop;
    use crate::sync::shutdown::{shutdown_channel, ShutdownTrigger};
    use crate::testing::{report, session, MockAudioProvider, ScriptedDial};
    use std::time::Instant;

    struct Fixture {
        provider: Arc<MockAudioProvider>,
        state: Arc<SharedState>,
        applier: Arc<VolumeApplier>,
        trigger: ShutdownTrigger,
        session_loop: SessionPollLoop,
    }

    fn fixture(initial: Vec<AudioSession>, period: Duration) -> Fixture {
        fixture_with_settle(initial, period, Duration::from_millis(1))
    }

    fn fixture_with_settle(
        initial: Vec<AudioSession>,
        period: Duration,
        settle_delay: Duration,
    ) -> Fixture {
        let provider = Arc::new(MockAudioProvider::new(initial));
        let state = Arc::new(SharedState::new());
        let applier = Arc::new(VolumeApplier::new(provider.clone()));
        let (trigger, signal) = shutdown_channel();
        let session_loop = SessionPollLoop::new(
            provider.clone(),
            state.clone(),
            applier.clone(),
            AppNameSets::new(["Discord.exe"], ["obs64.exe"]),
            signal,
            period,
            settle_delay,
        );
        Fixture {
            provider,
            state,
            applier,
            trigger,
            session_loop,
        }
    }

    #[test]
    fn test_sessions_present_at_startup_are_not_new() {
        let mut f = fixture(vec![session("chrome.exe", 1)], Duration::from_millis(10));

        f.session_loop.prime();

        assert_eq!(f.session_loop.poll_once(), SessionPoll::Idle);
        assert!(f.provider.calls().is_empty());
        assert!(f.state.table().is_empty());
    }

    #[test]
    fn test_new_session_classified_and_applied() {
        let mut f = fixture(vec![session("chrome.exe", 1)], Duration::from_millis(10));
        f.session_loop.prime();
        f.state.set_levels(VolumeLevels::new(30, 80));

        f.provider.set_sessions(vec![
            session("chrome.exe", 1),
            session("Discord.exe", 2),
            session("obs64.exe", 3),
        ]);
        let poll = f.session_loop.poll_once();

        let SessionPoll::Applied(report) = poll else {
            panic!("expected a volume pass, got {:?}", poll);
        };
        assert_eq!(report.applied, 2);
        assert_eq!(report.excluded, 1);
        assert_eq!(f.state.table().get(InstanceId(2)), Some(AppClass::Voice));
        assert_eq!(f.state.table().get(InstanceId(3)), Some(AppClass::Excluded));
        assert_eq!(f.provider.volume_of(1), Some(0.80));
        assert_eq!(f.provider.volume_of(2), Some(0.30));
        assert_eq!(f.provider.volume_of(3), None);

        // Known set replaced: the same snapshot is no longer new
        assert_eq!(f.session_loop.poll_once(), SessionPoll::Idle);
    }

    #[test]
    fn test_snapshot_failure_is_swallowed() {
        let mut f = fixture(Vec::new(), Duration::from_millis(10));
        f.session_loop.prime();

        f.provider.fail_listing(true);
        assert_eq!(f.session_loop.poll_once(), SessionPoll::SnapshotFailed);

        f.provider.fail_listing(false);
        f.provider.set_sessions(vec![session("chrome.exe", 4)]);
        assert!(matches!(f.session_loop.poll_once(), SessionPoll::Applied(_)));
    }

    #[test]
    fn test_failed_prime_seeds_on_first_good_snapshot() {
        let mut f = fixture(vec![session("chrome.exe", 1)], Duration::from_millis(10));
        f.provider.fail_listing(true);
        f.session_loop.prime();
        f.provider.fail_listing(false);

        // Apps running before the first good snapshot are not new
        assert_eq!(f.session_loop.poll_once(), SessionPoll::Idle);
        assert!(f.provider.calls().is_empty());
        assert!(f.state.table().is_empty());

        f.provider
            .set_sessions(vec![session("chrome.exe", 1), session("Discord.exe", 2)]);
        assert!(matches!(f.session_loop.poll_once(), SessionPoll::Applied(_)));
        assert_eq!(f.state.table().get(InstanceId(1)), None);
        assert_eq!(f.state.table().get(InstanceId(2)), Some(AppClass::Voice));
    }

    #[test]
    fn test_settle_delay_precedes_volume_pass() {
        let settle = Duration::from_millis(100);
        let mut f = fixture_with_settle(Vec::new(), Duration::from_millis(10), settle);
        f.session_loop.prime();

        f.provider.set_sessions(vec![session("chrome.exe", 5)]);
        let start = Instant::now();
        let poll = f.session_loop.poll_once();

        assert!(matches!(poll, SessionPoll::Applied(_)));
        let first_call = f.provider.first_call_at().expect("volume should be set");
        assert!(first_call.duration_since(start) >= settle);
        // Classified before the delay, applied after it
        assert_eq!(f.state.table().get(InstanceId(5)), Some(AppClass::System));
    }

    #[test]
    fn test_cancel_during_settle_delay_skips_volume_pass() {
        let mut f = fixture_with_settle(
            Vec::new(),
            Duration::from_millis(10),
            Duration::from_secs(5),
        );
        f.session_loop.prime();
        f.provider.set_sessions(vec![session("chrome.exe", 6)]);

        let mut session_loop = f.session_loop;
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            (session_loop.poll_once(), start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(50));
        f.trigger.trigger();

        let (poll, elapsed) = handle.join().unwrap();
        assert_eq!(poll, SessionPoll::Cancelled);
        assert!(elapsed < Duration::from_secs(5));
        assert!(f.provider.calls().is_empty());
        assert_eq!(f.provider.first_call_at(), None);
    }

    #[test]
    fn test_cancel_during_sleep_exits_within_period() {
        let f = fixture(Vec::new(), Duration::from_secs(1));
        let session_loop = f.session_loop;

        let handle = std::thread::spawn(move || session_loop.run());
        std::thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        f.trigger.trigger();
        let exit = handle.join().unwrap();

        assert_eq!(exit, LoopExit::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_new_app_then_dial_moves() {
        let mut f = fixture(Vec::new(), Duration::from_millis(10));
        f.session_loop.prime();

        // X appears, name in neither set
        f.provider.set_sessions(vec![session("game.exe", 77)]);
        assert!(matches!(f.session_loop.poll_once(), SessionPoll::Applied(_)));
        assert_eq!(f.state.table().get(InstanceId(77)), Some(AppClass::System));

        let (_trigger, signal) = shutdown_channel();
        let mut dial_loop = DialPollLoop::new(
            ScriptedDial::new([report(100, 40), report(40, 100)]),
            f.state.clone(),
            f.applier.clone(),
            signal,
            Duration::from_millis(5),
        );

        dial_loop.step();
        assert_eq!(f.provider.volume_of(77), Some(1.0));

        dial_loop.step();
        assert_eq!(f.provider.volume_of(77), Some(0.40));
        assert_eq!(f.state.table().get(InstanceId(77)), Some(AppClass::System));
    }
}
