//! Lifecycle controller
//!
//! Owns the two poll loops. Each runs on its own named OS thread since both
//! block (device reads, periodic sleeps). A drop guard on each thread reports
//! the loop's exit, including panics, so a fault in one loop is logged at once
//! while the other keeps running.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::applier::VolumeApplier;
use super::dial_loop::DialPollLoop;
use super::session_loop::SessionPollLoop;
use super::shutdown::{shutdown_channel, ShutdownTrigger};
use super::{LoopExit, LoopKind, SharedState, SyncSettings};
use crate::audio::AudioSessionProvider;
use crate::device::{DeviceError, DialDevice};

/// Reports a loop's exit when its thread ends, however it ends
struct ExitNotice {
    kind: LoopKind,
    exit: Option<LoopExit>,
    tx: mpsc::UnboundedSender<(LoopKind, LoopExit)>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let exit = if thread::panicking() {
            error!("{} loop panicked", self.kind);
            LoopExit::Panicked
        } else {
            self.exit.unwrap_or(LoopExit::Cancelled)
        };
        let _ = self.tx.send((self.kind, exit));
    }
}

pub struct LifecycleController {
    trigger: ShutdownTrigger,
    handles: Vec<(LoopKind, JoinHandle<LoopExit>)>,
    exits_rx: mpsc::UnboundedReceiver<(LoopKind, LoopExit)>,
    running: usize,
}

impl LifecycleController {
    /// Open the dial, then start both loops
    ///
    /// Nothing is started if the dial can't be opened.
    pub fn launch<D, F>(
        open: F,
        provider: Arc<dyn AudioSessionProvider>,
        settings: SyncSettings,
    ) -> Result<Self>
    where
        D: DialDevice + 'static,
        F: FnOnce() -> Result<D, DeviceError>,
    {
        let device = open().context("Failed to open ChatMix dial")?;
        Self::start(device, provider, settings)
    }

    /// Start both loops around an opened dial
    pub fn start<D>(
        device: D,
        provider: Arc<dyn AudioSessionProvider>,
        settings: SyncSettings,
    ) -> Result<Self>
    where
        D: DialDevice + 'static,
    {
        let state = Arc::new(SharedState::new());
        let applier = Arc::new(VolumeApplier::new(provider.clone()));
        let (trigger, signal) = shutdown_channel();
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();

        let dial_loop = DialPollLoop::new(
            device,
            state.clone(),
            applier.clone(),
            signal.clone(),
            settings.read_timeout,
        );
        let session_loop = SessionPollLoop::new(
            provider,
            state,
            applier,
            settings.names,
            signal,
            settings.session_poll,
            settings.settle_delay,
        );

        let mut controller = Self {
            trigger,
            handles: Vec::with_capacity(2),
            exits_rx,
            running: 0,
        };

        // On failure the controller drops, which stops anything already spawned
        controller.spawn(LoopKind::Dial, exits_tx.clone(), move || dial_loop.run())?;
        controller.spawn(LoopKind::Session, exits_tx, move || session_loop.run())?;

        info!("Dial and session monitoring started");
        Ok(controller)
    }

    fn spawn<F>(
        &mut self,
        kind: LoopKind,
        tx: mpsc::UnboundedSender<(LoopKind, LoopExit)>,
        body: F,
    ) -> Result<()>
    where
        F: FnOnce() -> LoopExit + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(kind.thread_name().to_string())
            .spawn(move || {
                let mut notice = ExitNotice {
                    kind,
                    exit: None,
                    tx,
                };
                let exit = body();
                notice.exit = Some(exit);
                exit
            })
            .with_context(|| format!("Failed to spawn {} thread", kind))?;

        self.handles.push((kind, handle));
        self.running += 1;
        Ok(())
    }

    /// Number of loops that haven't exited yet
    pub fn running(&self) -> usize {
        self.running
    }

    /// Wait for the next loop to exit
    ///
    /// Returns `None` once every loop has exited. Cancel safe.
    pub async fn next_exit(&mut self) -> Option<(LoopKind, LoopExit)> {
        if self.running == 0 {
            return None;
        }

        let (kind, exit) = self.exits_rx.recv().await?;
        self.running -= 1;

        match exit {
            LoopExit::Cancelled => info!("{} loop exited", kind),
            LoopExit::DeviceDisconnected => {
                warn!("{} loop stopped: {}, {} loop(s) still running", kind, exit, self.running)
            }
            LoopExit::Panicked => {
                error!("{} loop faulted, {} loop(s) still running", kind, self.running)
            }
        }

        Some((kind, exit))
    }

    /// Wait until both loops have exited on their own
    pub async fn wait_for_exit(&mut self) {
        while self.next_exit().await.is_some() {}
    }

    /// Signal shutdown and wait for both loops to finish
    ///
    /// Blocks for at most one loop period plus any in-flight read or apply.
    pub fn stop(mut self) -> Vec<(LoopKind, LoopExit)> {
        info!("Stopping dial and session monitoring...");
        self.trigger.trigger();
        let exits = self.join_all();
        info!("Monitoring stopped gracefully");
        exits
    }

    fn join_all(&mut self) -> Vec<(LoopKind, LoopExit)> {
        self.handles
            .drain(..)
            .map(|(kind, handle)| match handle.join() {
                Ok(exit) => (kind, exit),
                Err(_) => {
                    error!("{} thread terminated by a panic", kind);
                    (kind, LoopExit::Panicked)
                }
            })
            .collect()
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        if !self.trigger.is_triggered() {
            debug!("Controller dropped with loops running, stopping them");
            self.trigger.trigger();
        }
        self.join_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioSession, ProviderError};
    use crate::sync::AppNameSets;
    use crate::testing::{session, DialStep, MockAudioProvider, ScriptedDial};
    use std::sync::atomic::Ordering;
    use std::time::{Duration, Instant};

    fn settings() -> SyncSettings {
        SyncSettings {
            names: AppNameSets::new(["Discord.exe"], Vec::<String>::new()),
            session_poll: Duration::from_secs(1),
            settle_delay: Duration::from_millis(1),
            read_timeout: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_launch_fails_without_device() {
        let provider = Arc::new(MockAudioProvider::new(vec![session("a.exe", 1)]));

        let result = LifecycleController::launch(
            || -> Result<ScriptedDial, DeviceError> {
                Err(DeviceError::NotFound {
                    vendor_id: 0x1038,
                    product_id: 0x2202,
                })
            },
            provider.clone(),
            settings(),
        );

        let err = result.err().expect("launch should fail");
        assert!(format!("{:#}", err).contains("not found"));
        assert_eq!(provider.listings(), 0);
    }

    #[tokio::test]
    async fn test_stop_returns_within_one_period() {
        let provider = Arc::new(MockAudioProvider::new(Vec::new()));
        let dial = ScriptedDial::new(Vec::new());
        let released = dial.released_flag();
        let controller = LifecycleController::start(dial, provider, settings()).unwrap();
        assert_eq!(controller.running(), 2);

        tokio::time::sleep(Duration::from_millis(50)).await;

        let start = Instant::now();
        let exits = tokio::task::spawn_blocking(move || controller.stop())
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(
            exits,
            vec![
                (LoopKind::Dial, LoopExit::Cancelled),
                (LoopKind::Session, LoopExit::Cancelled),
            ]
        );
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_disconnect_stops_only_dial_loop() {
        let provider = Arc::new(MockAudioProvider::new(Vec::new()));
        let dial = ScriptedDial::new([DialStep::Disconnect]);
        let released = dial.released_flag();
        let mut controller = LifecycleController::start(dial, provider, settings()).unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(2), controller.next_exit())
            .await
            .unwrap();

        assert_eq!(exit, Some((LoopKind::Dial, LoopExit::DeviceDisconnected)));
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(controller.running(), 1);

        // Session loop is still alive until asked to stop
        let pending = tokio::time::timeout(Duration::from_millis(100), controller.next_exit()).await;
        assert!(pending.is_err());

        tokio::task::spawn_blocking(move || controller.stop())
            .await
            .unwrap();
    }

    #[test]
    fn test_drop_without_stop_joins_loops() {
        let provider = Arc::new(MockAudioProvider::new(Vec::new()));
        let dial = ScriptedDial::new(Vec::new());
        let released = dial.released_flag();
        let reads = dial.read_counter();
        let controller = LifecycleController::start(dial, provider, settings()).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        let start = Instant::now();
        drop(controller);

        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(released.load(Ordering::SeqCst));
        let after = reads.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(reads.load(Ordering::SeqCst), after);
    }

    struct PanickingProvider;

    impl AudioSessionProvider for PanickingProvider {
        fn list_sessions(&self) -> Result<Vec<AudioSession>, ProviderError> {
            panic!("session backend fault");
        }

        fn set_volume(&self, _: &AudioSession, _: f32) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fault_in_one_loop_leaves_other_running() {
        let dial = ScriptedDial::new(Vec::new());
        let reads = dial.read_counter();
        let mut controller =
            LifecycleController::start(dial, Arc::new(PanickingProvider), settings()).unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(2), controller.next_exit())
            .await
            .unwrap();
        assert_eq!(exit, Some((LoopKind::Session, LoopExit::Panicked)));

        let before = reads.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(reads.load(Ordering::SeqCst) > before);

        let exits = tokio::task::spawn_blocking(move || controller.stop())
            .await
            .unwrap();
        assert!(exits.contains(&(LoopKind::Dial, LoopExit::Cancelled)));
        assert!(exits.contains(&(LoopKind::Session, LoopExit::Panicked)));
    }

    #[tokio::test]
    async fn test_wait_for_exit_after_both_loops_end() {
        let provider = Arc::new(MockAudioProvider::new(Vec::new()));
        let dial = ScriptedDial::new([DialStep::Disconnect]);
        let mut controller = LifecycleController::start(dial, provider, settings()).unwrap();

        controller.trigger.trigger();
        tokio::time::timeout(Duration::from_secs(2), controller.wait_for_exit())
            .await
            .unwrap();

        assert_eq!(controller.running(), 0);
        assert_eq!(controller.next_exit().await, None);
    }
}
