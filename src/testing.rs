//! Test doubles for the dial and the audio session provider

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::{AppInstance, AudioSession, AudioSessionProvider, ProviderError};
use crate::device::{DeviceError, DialDevice};

pub fn session(name: &str, pid: u32) -> AudioSession {
    AudioSession::new(AppInstance::new(name, pid), format!("{}|{}", name, pid))
}

/// In-memory provider recording every volume call
#[derive(Default)]
pub struct MockAudioProvider {
    sessions: Mutex<Vec<AudioSession>>,
    calls: Mutex<Vec<(u32, f32)>>,
    first_call: Mutex<Option<Instant>>,
    failing: Mutex<HashSet<u32>>,
    fail_listing: AtomicBool,
    listings: AtomicUsize,
}

impl MockAudioProvider {
    pub fn new(sessions: Vec<AudioSession>) -> Self {
        Self {
            sessions: Mutex::new(sessions),
            ..Default::default()
        }
    }

    pub fn set_sessions(&self, sessions: Vec<AudioSession>) {
        *self.sessions.lock() = sessions;
    }

    pub fn fail_for(&self, pid: u32) {
        self.failing.lock().insert(pid);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Every `(pid, fraction)` passed to `set_volume`, in order
    pub fn calls(&self) -> Vec<(u32, f32)> {
        self.calls.lock().clone()
    }

    /// Last volume successfully set for `pid`
    pub fn volume_of(&self, pid: u32) -> Option<f32> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|(p, _)| *p == pid)
            .map(|(_, v)| *v)
    }

    /// When the first successful `set_volume` happened
    pub fn first_call_at(&self) -> Option<Instant> {
        *self.first_call.lock()
    }

    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }
}

impl AudioSessionProvider for MockAudioProvider {
    fn list_sessions(&self) -> Result<Vec<AudioSession>, ProviderError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(ProviderError::ProcessVanished(0));
        }
        Ok(self.sessions.lock().clone())
    }

    fn set_volume(&self, session: &AudioSession, fraction: f32) -> Result<(), ProviderError> {
        let pid = session.app.instance_id.0;
        if self.failing.lock().contains(&pid) {
            return Err(ProviderError::SessionNotFound(session.control.clone()));
        }
        self.first_call.lock().get_or_insert_with(Instant::now);
        self.calls.lock().push((pid, fraction));
        Ok(())
    }
}

/// One scripted outcome of a dial read
#[derive(Debug, Clone)]
pub enum DialStep {
    Report(Vec<u8>),
    Timeout,
    Disconnect,
    Error,
}

/// Dial replaying a script, then timing out forever
pub struct ScriptedDial {
    steps: VecDeque<DialStep>,
    released: Arc<AtomicBool>,
    reads: Arc<AtomicUsize>,
}

impl ScriptedDial {
    pub fn new(steps: impl IntoIterator<Item = DialStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            released: Arc::new(AtomicBool::new(false)),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn released_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }

    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }
}

pub fn report(system: u8, voice: u8) -> DialStep {
    DialStep::Report(vec![0x45, system, voice, 0, 0, 0, 0, 0])
}

impl DialDevice for ScriptedDial {
    fn read_report(&mut self, timeout: Duration) -> Result<Vec<u8>, DeviceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front() {
            Some(DialStep::Report(bytes)) => Ok(bytes),
            Some(DialStep::Timeout) => Err(DeviceError::Timeout),
            Some(DialStep::Disconnect) => Err(DeviceError::Disconnected),
            Some(DialStep::Error) => Err(DeviceError::Usb(rusb::Error::Pipe)),
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                Err(DeviceError::Timeout)
            }
        }
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}
