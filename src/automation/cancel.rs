//! Cooperative cancellation for the scan loop.
//!
//! The loop observes a `CancelToken` at the top of each cycle and while idle.
//! Sources that can request cancellation:
//! - the pointer resting on the display's top-left pixel (kill-switch)
//! - Ctrl+C, SIGTERM or console close (`ctrlc`)
//! - the global hotkey Ctrl+Shift+Q (Windows)

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::capture::Rect;

/// Shared stop request. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop and wakes any idle wait.
    pub fn cancel(&self) {
        let (lock, condvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks for up to `timeout`, returning early on cancellation.
    ///
    /// Returns `true` if cancellation was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, condvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = condvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Whether the pointer sits on the kill-switch pixel of `display`.
pub fn in_failsafe_corner(position: (i32, i32), display: Rect) -> bool {
    position == (display.left, display.top)
}

/// Hooks OS-level stop requests (interrupt signals, global hotkey) to `token`.
///
/// A hook that cannot be installed is logged and skipped; the kill-switch
/// still works without it.
pub fn install_stop_handlers(token: &CancelToken) {
    if let Err(e) = ctrlc::set_handler(interrupt_handler(token.clone())) {
        tracing::warn!("Ctrl+C handler unavailable: {}", e);
    }
    #[cfg(windows)]
    windows_hooks::start_hotkey_listener(token.clone());
}

/// Turns an interrupt into a cooperative stop so the current click finishes.
fn interrupt_handler(token: CancelToken) -> impl FnMut() + Send + 'static {
    move || {
        tracing::info!("Interrupt received, stopping");
        token.cancel();
    }
}

#[cfg(windows)]
mod windows_hooks {
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        RegisterHotKey, UnregisterHotKey, MOD_CONTROL, MOD_NOREPEAT, MOD_SHIFT,
    };
    use windows::Win32::UI::WindowsAndMessaging::{GetMessageW, MSG, WM_HOTKEY};

    use super::CancelToken;

    const HOTKEY_STOP: i32 = 1;
    const VK_Q: u32 = 0x51;

    /// Registers Ctrl+Shift+Q on a dedicated thread and cancels when it fires.
    pub fn start_hotkey_listener(token: CancelToken) {
        std::thread::spawn(move || {
            unsafe {
                // A null window posts WM_HOTKEY to this thread's queue
                if let Err(e) = RegisterHotKey(
                    HWND::default(),
                    HOTKEY_STOP,
                    MOD_CONTROL | MOD_SHIFT | MOD_NOREPEAT,
                    VK_Q,
                ) {
                    tracing::warn!("Failed to register Ctrl+Shift+Q: {}", e);
                    return;
                }
                tracing::debug!("Hotkey Ctrl+Shift+Q registered");

                let mut msg = MSG::default();
                while GetMessageW(&mut msg, HWND::default(), 0, 0).as_bool() {
                    if msg.message == WM_HOTKEY && msg.wParam.0 == HOTKEY_STOP as usize {
                        tracing::info!("Ctrl+Shift+Q pressed, stopping");
                        token.cancel();
                        break;
                    }
                }

                let _ = UnregisterHotKey(HWND::default(), HOTKEY_STOP);
            }
        });
    }
}
