//! Audio session access
//!
//! An audio session is one controllable output stream owned by a process.
//! The provider lists the live sessions and sets the volume of one of them;
//! everything platform specific (COM, process lookup) stays behind it.

#[cfg(windows)]
pub mod wasapi;

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Stable identifier of a running process instance (its process id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u32);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

/// One running process that owns at least one audio session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppInstance {
    /// Executable name (e.g., "Discord.exe")
    pub name: String,
    pub instance_id: InstanceId,
}

impl AppInstance {
    pub fn new(name: impl Into<String>, pid: u32) -> Self {
        Self {
            name: name.into(),
            instance_id: InstanceId(pid),
        }
    }
}

impl fmt::Display for AppInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.instance_id)
    }
}

/// A live audio session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSession {
    /// Owning process
    pub app: AppInstance,
    /// Provider-specific handle used to address the session's volume control
    pub control: String,
}

impl AudioSession {
    pub fn new(app: AppInstance, control: impl Into<String>) -> Self {
        Self {
            app,
            control: control.into(),
        }
    }
}

/// Errors raised by an audio session provider
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The owning process exited between enumeration and inspection
    #[error("process {0} vanished")]
    ProcessVanished(u32),

    /// The session closed between enumeration and the volume call
    #[error("audio session {0} not found")]
    SessionNotFound(String),

    #[error("audio backend error: {0}")]
    Backend(String),

    #[error("no audio session backend on this platform")]
    Unsupported,
}

/// Lists audio sessions and sets their volume
///
/// Shared by both poll loops; implementations must tolerate calls from
/// different threads.
pub trait AudioSessionProvider: Send + Sync {
    /// Snapshot of the sessions owned by a process (system sounds excluded)
    fn list_sessions(&self) -> Result<Vec<AudioSession>, ProviderError>;

    /// Set one session's master volume (0.0 - 1.0)
    fn set_volume(&self, session: &AudioSession, fraction: f32) -> Result<(), ProviderError>;
}

/// Create the provider for the current platform
pub fn platform_provider() -> Result<Arc<dyn AudioSessionProvider>, ProviderError> {
    #[cfg(windows)]
    {
        Ok(Arc::new(wasapi::WasapiProvider::new()?))
    }

    #[cfg(not(windows))]
    {
        Err(ProviderError::Unsupported)
    }
}

/// Distinct app instances in a session snapshot, in first-seen order
pub fn instances(sessions: &[AudioSession]) -> Vec<AppInstance> {
    let mut seen = std::collections::HashSet::new();
    sessions
        .iter()
        .filter(|s| seen.insert(s.app.instance_id))
        .map(|s| s.app.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_deduplicates_by_pid() {
        let sessions = vec![
            AudioSession::new(AppInstance::new("chrome.exe", 10), "a"),
            AudioSession::new(AppInstance::new("chrome.exe", 10), "b"),
            AudioSession::new(AppInstance::new("chrome.exe", 11), "c"),
            AudioSession::new(AppInstance::new("Discord.exe", 12), "d"),
        ];

        let apps = instances(&sessions);
        assert_eq!(apps.len(), 3);
        assert_eq!(apps[0], AppInstance::new("chrome.exe", 10));
        assert_eq!(apps[1], AppInstance::new("chrome.exe", 11));
        assert_eq!(apps[2].name, "Discord.exe");
    }

    #[cfg(not(windows))]
    #[test]
    fn test_platform_provider_unsupported() {
        assert!(matches!(
            platform_provider(),
            Err(ProviderError::Unsupported)
        ));
    }
}
