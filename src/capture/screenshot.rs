//! Screen capture using GDI `BitBlt` on the primary display.

use anyhow::{anyhow, Context, Result};
use image::{ImageBuffer, Rgba};
use std::ffi::c_void;

use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC, GetDIBits,
    ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, CAPTUREBLT, DIB_RGB_COLORS,
    SRCCOPY,
};
use windows::Win32::UI::HiDpi::{
    SetProcessDpiAwarenessContext, DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2,
};
use windows::Win32::UI::WindowsAndMessaging::{GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN};

use super::{capture_area, CaptureProvider, Frame, Rect};
use crate::error::CaptureError;

/// Captures the primary display through the desktop device context.
pub struct GdiCapture;

impl GdiCapture {
    /// Opts the process into per-monitor DPI awareness so that capture and
    /// `SendInput` agree on physical pixel coordinates.
    pub fn new() -> Result<Self> {
        unsafe {
            // Fails harmlessly when awareness was already set (e.g. by a manifest)
            let _ = SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2);
        }
        let bounds = primary_display_bounds()?;
        tracing::debug!("GDI capture ready, primary display {}", bounds);
        Ok(Self)
    }
}

impl CaptureProvider for GdiCapture {
    fn display_bounds(&mut self) -> Result<Rect, CaptureError> {
        primary_display_bounds().map_err(CaptureError::from_backend)
    }

    fn capture(&mut self, region: Option<Rect>) -> Result<Frame, CaptureError> {
        let display = self.display_bounds()?;
        let area = capture_area(region, display)?;
        let img = grab_screen_area(area)
            .with_context(|| format!("capturing {}", area))
            .map_err(CaptureError::from_backend)?;
        Ok(Frame::from_rgba((area.left, area.top), img))
    }
}

/// Returns the primary display rectangle; its origin is always (0, 0).
fn primary_display_bounds() -> Result<Rect> {
    let width = unsafe { GetSystemMetrics(SM_CXSCREEN) };
    let height = unsafe { GetSystemMetrics(SM_CYSCREEN) };
    if width <= 0 || height <= 0 {
        return Err(anyhow!(
            "primary display is not accessible ({}x{})",
            width,
            height
        ));
    }
    Ok(Rect::new(0, 0, width as u32, height as u32))
}

/// Copies a screen area into an RGBA image.
///
/// The area must already be clipped to the display.
fn grab_screen_area(area: Rect) -> Result<ImageBuffer<Rgba<u8>, Vec<u8>>> {
    let width = area.width as i32;
    let height = area.height as i32;
    let mut buffer = vec![0u8; area.width as usize * area.height as usize * 4];

    unsafe {
        let screen_dc = GetDC(HWND::default());
        if screen_dc.is_invalid() {
            return Err(anyhow!("GetDC failed (is the session locked?)"));
        }

        let mem_dc = CreateCompatibleDC(screen_dc);
        let bitmap = CreateCompatibleBitmap(screen_dc, width, height);
        let previous = SelectObject(mem_dc, bitmap);

        let blit = BitBlt(
            mem_dc,
            0,
            0,
            width,
            height,
            screen_dc,
            area.left,
            area.top,
            SRCCOPY | CAPTUREBLT,
        );

        SelectObject(mem_dc, previous);

        // Negative height requests a top-down DIB
        let mut info = BITMAPINFO {
            bmiHeader: BITMAPINFOHEADER {
                biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: width,
                biHeight: -height,
                biPlanes: 1,
                biBitCount: 32,
                biCompression: BI_RGB.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let lines = GetDIBits(
            mem_dc,
            bitmap,
            0,
            height as u32,
            Some(buffer.as_mut_ptr() as *mut c_void),
            &mut info,
            DIB_RGB_COLORS,
        );

        let _ = DeleteObject(bitmap);
        let _ = DeleteDC(mem_dc);
        ReleaseDC(HWND::default(), screen_dc);

        blit.context("BitBlt failed")?;
        if lines != height {
            return Err(anyhow!(
                "GetDIBits copied {} of {} lines",
                lines,
                height
            ));
        }
    }

    let mut img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::new(area.width, area.height);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let offset = (y as usize * area.width as usize + x as usize) * 4;
        // BGRA -> RGBA
        let b = buffer[offset];
        let g = buffer[offset + 1];
        let r = buffer[offset + 2];
        *pixel = Rgba([r, g, b, 255]);
    }

    Ok(img)
}
