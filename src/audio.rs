use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::bindings::ChannelBindings;

/// How long a session lookup may ride on the previous enumeration. Session
/// enumeration walks COM objects and opens process handles, so it is too
/// expensive to run per volume change.
pub const SESSION_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Volume handle for one live audio session.
pub struct SessionVolume {
    #[cfg(windows)]
    control: windows::Win32::Media::Audio::ISimpleAudioVolume,
}

impl SessionVolume {
    /// Applies a 0.0 to 1.0 level to the session.
    pub fn set(&self, level: f32) -> Result<()> {
        let level = level.clamp(0.0, 1.0);
        #[cfg(windows)]
        unsafe {
            self.control.SetMasterVolume(level, std::ptr::null())?;
        }
        #[cfg(not(windows))]
        let _ = level;
        Ok(())
    }
}

/// Knob-indexed cache of session volume handles. Entries are rebuilt from a
/// fresh enumeration, either on demand or once the refresh interval elapses;
/// a process restarting under the same name is picked up on the next rebuild.
pub struct SessionCache {
    handles: HashMap<usize, SessionVolume>,
    last_refresh: Option<Instant>,
    interval: Duration,
}

impl SessionCache {
    pub fn new(interval: Duration) -> Self {
        Self {
            handles: HashMap::new(),
            last_refresh: None,
            interval,
        }
    }

    /// Re-enumerates sessions unless the cache is still fresh. Returns whether
    /// an enumeration actually ran.
    pub fn refresh(&mut self, bindings: &ChannelBindings, force: bool) -> bool {
        if !force {
            if let Some(at) = self.last_refresh {
                if at.elapsed() < self.interval {
                    return false;
                }
            }
        }
        self.handles = collect_session_handles(bindings);
        self.last_refresh = Some(Instant::now());
        true
    }

    pub fn lookup(&self, channel: usize) -> Option<&SessionVolume> {
        self.handles.get(&channel)
    }
}

/// Active session process names for the UI dropdown, deduplicated and sorted,
/// without the trailing `.exe`. Always a fresh enumeration; this path is for
/// discovery, not volume changes.
pub fn active_app_names() -> Vec<String> {
    let mut names = BTreeSet::new();
    for name in active_process_names() {
        names.insert(strip_exe(&name));
    }
    names.into_iter().collect()
}

fn strip_exe(name: &str) -> String {
    let cut = name.len().wrapping_sub(4);
    if name.len() > 4
        && name.is_char_boundary(cut)
        && name[cut..].eq_ignore_ascii_case(".exe")
    {
        name[..cut].to_string()
    } else {
        name.to_string()
    }
}

#[cfg(windows)]
pub fn init_com() {
    use windows::Win32::System::Com::{CoInitializeEx, COINIT_MULTITHREADED};
    unsafe {
        let _ = CoInitializeEx(None, COINIT_MULTITHREADED);
    }
}

#[cfg(not(windows))]
pub fn init_com() {}

#[cfg(windows)]
mod backend {
    use std::collections::HashMap;

    use log::debug;
    use windows::core::Interface;
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::Media::Audio::*;
    use windows::Win32::System::Com::*;
    use windows::Win32::System::ProcessStatus::GetModuleBaseNameW;
    use windows::Win32::System::Threading::{
        OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
    };

    use super::SessionVolume;
    use crate::bindings::ChannelBindings;

    unsafe fn session_manager() -> windows::core::Result<IAudioSessionManager2> {
        let enumerator: IMMDeviceEnumerator =
            CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)?;
        let device: IMMDevice = enumerator.GetDefaultAudioEndpoint(eRender, eMultimedia)?;
        device.Activate(CLSCTX_ALL, None)
    }

    fn process_name(pid: u32) -> String {
        unsafe {
            if let Ok(handle) = OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, false, pid)
            {
                let mut buffer = [0u16; 1024];
                let len = GetModuleBaseNameW(handle, None, &mut buffer);
                let _ = CloseHandle(handle);
                if len > 0 {
                    return String::from_utf16_lossy(&buffer[..len as usize]);
                }
            }
        }
        String::new()
    }

    /// Walks active sessions on the default render endpoint and binds each to
    /// the first knob whose matcher hits the owning process name. Enumeration
    /// order decides which session a knob ends up with when several match.
    pub fn collect_session_handles(bindings: &ChannelBindings) -> HashMap<usize, SessionVolume> {
        super::init_com();
        let mut handles = HashMap::new();
        unsafe {
            let manager = match session_manager() {
                Ok(m) => m,
                Err(e) => {
                    debug!("session manager unavailable: {e}");
                    return handles;
                }
            };
            let Ok(list) = manager.GetSessionEnumerator() else {
                return handles;
            };
            let count = list.GetCount().unwrap_or(0);
            for i in 0..count {
                let Ok(session) = list.GetSession(i) else {
                    continue;
                };
                match session.GetState() {
                    Ok(state) if state == AudioSessionStateActive => {}
                    _ => continue,
                }
                let Ok(session2) = Interface::cast::<IAudioSessionControl2>(&session) else {
                    continue;
                };
                let Ok(pid) = session2.GetProcessId() else {
                    continue;
                };
                if pid == 0 {
                    continue;
                }
                let name = process_name(pid);
                if name.is_empty() {
                    continue;
                }
                if let Some(channel) = bindings.match_channel(&name) {
                    if let Ok(control) = Interface::cast::<ISimpleAudioVolume>(&session) {
                        handles.insert(channel, SessionVolume { control });
                    }
                }
            }
        }
        handles
    }

    pub fn active_process_names() -> Vec<String> {
        super::init_com();
        let mut names = Vec::new();
        unsafe {
            let Ok(manager) = session_manager() else {
                return names;
            };
            let Ok(list) = manager.GetSessionEnumerator() else {
                return names;
            };
            let count = list.GetCount().unwrap_or(0);
            for i in 0..count {
                let Ok(session) = list.GetSession(i) else {
                    continue;
                };
                match session.GetState() {
                    Ok(state) if state == AudioSessionStateActive => {}
                    _ => continue,
                }
                let Ok(session2) = Interface::cast::<IAudioSessionControl2>(&session) else {
                    continue;
                };
                let Ok(pid) = session2.GetProcessId() else {
                    continue;
                };
                if pid == 0 {
                    continue;
                }
                let name = process_name(pid);
                if !name.is_empty() {
                    names.push(name);
                }
            }
        }
        names
    }
}

#[cfg(windows)]
use backend::{active_process_names, collect_session_handles};

#[cfg(not(windows))]
fn collect_session_handles(_bindings: &ChannelBindings) -> HashMap<usize, SessionVolume> {
    HashMap::new()
}

#[cfg(not(windows))]
fn active_process_names() -> Vec<String> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings() -> ChannelBindings {
        // Matchers no real process should hit, so these tests see an empty
        // cache on every platform.
        ChannelBindings::new(["zz-knob-a", "zz-knob-b", "zz-knob-c"])
    }

    #[test]
    fn refresh_is_skipped_inside_the_interval() {
        let mut cache = SessionCache::new(Duration::from_secs(60));
        assert!(cache.refresh(&bindings(), false));
        assert!(!cache.refresh(&bindings(), false));
    }

    #[test]
    fn forced_refresh_always_runs() {
        let mut cache = SessionCache::new(Duration::from_secs(60));
        assert!(cache.refresh(&bindings(), true));
        assert!(cache.refresh(&bindings(), true));
    }

    #[test]
    fn refresh_runs_again_after_the_interval() {
        let mut cache = SessionCache::new(Duration::from_millis(10));
        assert!(cache.refresh(&bindings(), false));
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.refresh(&bindings(), false));
    }

    #[test]
    fn lookup_misses_when_nothing_matches() {
        let mut cache = SessionCache::new(SESSION_REFRESH_INTERVAL);
        cache.refresh(&bindings(), true);
        assert!(cache.lookup(0).is_none());
        assert!(cache.lookup(2).is_none());
    }

    #[test]
    fn exe_suffix_is_stripped_for_display() {
        assert_eq!(strip_exe("Spotify.exe"), "Spotify");
        assert_eq!(strip_exe("brave.EXE"), "brave");
        assert_eq!(strip_exe("mpv"), "mpv");
        assert_eq!(strip_exe(".exe"), ".exe");
    }
}
