//! WASAPI audio session provider
//!
//! Sessions are looked up on the default render endpoint on every call, so no
//! COM object outlives the thread that created it. COM is initialised
//! (multithreaded apartment) once per calling thread and released when that
//! thread exits.

use std::path::Path;
use tracing::{debug, trace};
use windows::core::{Interface, PWSTR};
use windows::Win32::Foundation::CloseHandle;
use windows::Win32::Media::Audio::{
    eMultimedia, eRender, IAudioSessionControl2, IAudioSessionManager2, IMMDeviceEnumerator,
    ISimpleAudioVolume, MMDeviceEnumerator,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoTaskMemFree, CoUninitialize, CLSCTX_ALL,
    COINIT_MULTITHREADED,
};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
    PROCESS_QUERY_LIMITED_INFORMATION,
};

use super::{AppInstance, AudioSession, AudioSessionProvider, ProviderError};

impl From<windows::core::Error> for ProviderError {
    fn from(err: windows::core::Error) -> Self {
        ProviderError::Backend(err.to_string())
    }
}

/// COM apartment of the current thread, uninitialised on thread exit
struct ComApartment {
    initialized: bool,
}

impl ComApartment {
    fn enter() -> Self {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        let thread = std::thread::current();
        if hr.is_ok() {
            trace!("COM initialised on thread {:?} ({:?})", thread.name(), hr);
        } else {
            // RPC_E_CHANGED_MODE: another model is already active, COM stays usable
            debug!("COM not initialised on thread {:?}: {:?}", thread.name(), hr);
        }
        Self {
            initialized: hr.is_ok(),
        }
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        if self.initialized {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

thread_local! {
    static APARTMENT: ComApartment = ComApartment::enter();
}

/// Initialise COM on the calling thread if needed
///
/// Returns whether this thread holds its own initialisation.
fn ensure_com() -> bool {
    APARTMENT.with(|apartment| apartment.initialized)
}

/// Audio sessions of the default playback device
pub struct WasapiProvider;

impl WasapiProvider {
    /// Check that the default render endpoint is reachable
    pub fn new() -> Result<Self, ProviderError> {
        let provider = Self;
        unsafe {
            provider.session_manager()?;
        }
        Ok(provider)
    }

    unsafe fn session_manager(&self) -> Result<IAudioSessionManager2, ProviderError> {
        ensure_com();

        let enumerator: IMMDeviceEnumerator =
            CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)?;
        let device = enumerator.GetDefaultAudioEndpoint(eRender, eMultimedia)?;
        Ok(device.Activate(CLSCTX_ALL, None)?)
    }

    /// Visit every session control with an owning process
    unsafe fn for_each_session<F>(&self, mut visit: F) -> Result<(), ProviderError>
    where
        F: FnMut(u32, String, &IAudioSessionControl2) -> Result<bool, ProviderError>,
    {
        let manager = self.session_manager()?;
        let sessions = manager.GetSessionEnumerator()?;
        let count = sessions.GetCount()?;

        for index in 0..count {
            let Ok(control) = sessions.GetSession(index) else {
                continue;
            };
            let Ok(control) = control.cast::<IAudioSessionControl2>() else {
                continue;
            };
            let pid = match control.GetProcessId() {
                Ok(0) | Err(_) => continue,
                Ok(pid) => pid,
            };
            let Some(id) = session_identifier(&control) else {
                continue;
            };

            if !visit(pid, id, &control)? {
                break;
            }
        }

        Ok(())
    }
}

impl AudioSessionProvider for WasapiProvider {
    fn list_sessions(&self) -> Result<Vec<AudioSession>, ProviderError> {
        let mut found = Vec::new();

        unsafe {
            self.for_each_session(|pid, id, _| {
                match process_name(pid) {
                    Ok(name) => found.push(AudioSession::new(AppInstance::new(name, pid), id)),
                    Err(e) => trace!("Skipping session of pid {}: {}", pid, e),
                }
                Ok(true)
            })?;
        }

        Ok(found)
    }

    fn set_volume(&self, session: &AudioSession, fraction: f32) -> Result<(), ProviderError> {
        let mut applied = false;

        unsafe {
            self.for_each_session(|_, id, control| {
                if id != session.control {
                    return Ok(true);
                }
                let volume = control.cast::<ISimpleAudioVolume>()?;
                volume.SetMasterVolume(fraction.clamp(0.0, 1.0), std::ptr::null())?;
                applied = true;
                Ok(false)
            })?;
        }

        if applied {
            debug!("Set {} to {:.2}", session.app, fraction);
            Ok(())
        } else {
            Err(ProviderError::SessionNotFound(session.control.clone()))
        }
    }
}

unsafe fn session_identifier(control: &IAudioSessionControl2) -> Option<String> {
    let raw: PWSTR = control.GetSessionInstanceIdentifier().ok()?;
    let id = raw.to_string().ok();
    CoTaskMemFree(Some(raw.0 as *const _));
    id
}

/// Executable file name of a process (e.g., "Discord.exe")
fn process_name(pid: u32) -> Result<String, ProviderError> {
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid)
            .map_err(|_| ProviderError::ProcessVanished(pid))?;

        let mut buffer = [0u16; 1024];
        let mut len = buffer.len() as u32;
        let result = QueryFullProcessImageNameW(
            handle,
            PROCESS_NAME_WIN32,
            PWSTR(buffer.as_mut_ptr()),
            &mut len,
        );
        let _ = CloseHandle(handle);
        result.map_err(|_| ProviderError::ProcessVanished(pid))?;

        let path = String::from_utf16_lossy(&buffer[..len as usize]);
        Path::new(&path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or(ProviderError::ProcessVanished(pid))
    }
}
