//! Pointer injection through `SendInput`.
//!
//! Events carry absolute coordinates normalized to 0-65535 over the primary
//! display, which moves the real cursor the same way a hardware mouse would.

use anyhow::{anyhow, Context, Result};

use windows::Win32::Foundation::POINT;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_MOUSE, MOUSEEVENTF_ABSOLUTE, MOUSEEVENTF_LEFTDOWN,
    MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MOVE, MOUSE_EVENT_FLAGS, MOUSEINPUT,
};
use windows::Win32::UI::WindowsAndMessaging::{
    GetCursorPos, GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN,
};

use super::Pointer;
use crate::error::ActionError;

/// Pause between button down and up.
const CLICK_HOLD: std::time::Duration = std::time::Duration::from_millis(50);

pub struct SendInputPointer;

impl SendInputPointer {
    pub fn new() -> Result<Self> {
        cursor_position().context("pointer is not accessible")?;
        Ok(Self)
    }
}

impl Pointer for SendInputPointer {
    fn position(&mut self) -> Result<(i32, i32), ActionError> {
        cursor_position().map_err(ActionError::from_backend)
    }

    fn move_to(&mut self, x: i32, y: i32) -> Result<(), ActionError> {
        send_mouse(x, y, MOUSEEVENTF_MOVE)
            .with_context(|| format!("moving to ({}, {})", x, y))
            .map_err(ActionError::from_backend)
    }

    fn click(&mut self, x: i32, y: i32) -> Result<(), ActionError> {
        let result = send_mouse(x, y, MOUSEEVENTF_LEFTDOWN | MOUSEEVENTF_MOVE).and_then(|()| {
            std::thread::sleep(CLICK_HOLD);
            send_mouse(x, y, MOUSEEVENTF_LEFTUP | MOUSEEVENTF_MOVE)
        });
        result
            .with_context(|| format!("clicking at ({}, {})", x, y))
            .map_err(ActionError::from_backend)
    }
}

/// Gets the current cursor position in screen coordinates.
fn cursor_position() -> Result<(i32, i32)> {
    let mut pt = POINT::default();
    unsafe {
        GetCursorPos(&mut pt)?;
    }
    Ok((pt.x, pt.y))
}

/// Sends one mouse event at an absolute screen position.
fn send_mouse(x: i32, y: i32, flags: MOUSE_EVENT_FLAGS) -> Result<()> {
    let screen_width = unsafe { GetSystemMetrics(SM_CXSCREEN) };
    let screen_height = unsafe { GetSystemMetrics(SM_CYSCREEN) };
    if screen_width <= 1 || screen_height <= 1 {
        return Err(anyhow!("primary display is not accessible"));
    }

    // Normalize to 0-65535 range (required by MOUSEEVENTF_ABSOLUTE)
    let norm_x = ((x as i64 * 65535) / (screen_width as i64 - 1)) as i32;
    let norm_y = ((y as i64 * 65535) / (screen_height as i64 - 1)) as i32;

    let input = INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx: norm_x,
                dy: norm_y,
                dwFlags: flags | MOUSEEVENTF_ABSOLUTE,
                ..Default::default()
            },
        },
    };
    let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
    if sent != 1 {
        // Zero means the input was blocked (UIPI or a secure desktop)
        return Err(anyhow!(
            "SendInput rejected the event: {}",
            windows::core::Error::from_win32()
        ));
    }
    Ok(())
}
