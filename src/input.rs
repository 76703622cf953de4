/// Taps the scroll-lock key once, down then up. Failures are logged and
/// dropped.
#[cfg(windows)]
pub fn press_scroll_lock() {
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYBD_EVENT_FLAGS, KEYEVENTF_KEYUP,
        VK_SCROLL,
    };

    let tap = |flags: KEYBD_EVENT_FLAGS| INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VK_SCROLL,
                wScan: 0,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    };

    let inputs = [tap(KEYBD_EVENT_FLAGS(0)), tap(KEYEVENTF_KEYUP)];
    let sent = unsafe { SendInput(&inputs, std::mem::size_of::<INPUT>() as i32) };
    if sent != inputs.len() as u32 {
        log::debug!("scroll-lock tap only sent {sent} of {} events", inputs.len());
    }
}

#[cfg(not(windows))]
pub fn press_scroll_lock() {
    log::debug!("scroll-lock tap ignored: no input backend on this platform");
}
