//! Screen capture for the scan loop.
//!
//! This module provides:
//! - Screen rectangles (`Rect`) and captured grayscale frames (`Frame`)
//! - The `CaptureProvider` trait the scheduler captures through
//! - Platform backends: GDI on Windows, xcap with the `portable` feature

#[cfg(windows)]
pub mod screenshot;

#[cfg(all(feature = "portable", not(windows)))]
pub mod portable;

use image::{DynamicImage, GrayImage, RgbaImage};
use serde::Deserialize;

use crate::error::CaptureError;
use crate::matching::to_gray;

/// A screen rectangle in physical pixels.
///
/// Deserializes from `[left, top, width, height]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "[i64; 4]")]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i64 {
        self.left as i64 + self.width as i64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        self.top as i64 + self.height as i64
    }

    /// Integer center point (top-left biased for even sizes).
    pub fn center(&self) -> (i32, i32) {
        (
            self.left + (self.width / 2) as i32,
            self.top + (self.height / 2) as i32,
        )
    }

    /// Overlapping part of two rectangles, `None` when they do not overlap.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let left = (self.left as i64).max(other.left as i64);
        let top = (self.top as i64).max(other.top as i64);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return None;
        }
        Some(Rect::new(
            left as i32,
            top as i32,
            (right - left) as u32,
            (bottom - top) as u32,
        ))
    }
}

impl TryFrom<[i64; 4]> for Rect {
    type Error = String;

    fn try_from([left, top, width, height]: [i64; 4]) -> Result<Self, Self::Error> {
        if left < 0 || top < 0 || width < 0 || height < 0 {
            return Err(format!(
                "region values must be non-negative, got [{}, {}, {}, {}]",
                left, top, width, height
            ));
        }
        if width == 0 || height == 0 {
            return Err(format!(
                "region must have a non-zero size, got {}x{}",
                width, height
            ));
        }
        let fits = |v: i64| i32::try_from(v).is_ok();
        if !(fits(left) && fits(top) && fits(width) && fits(height)) {
            return Err("region values are out of range".to_string());
        }
        Ok(Rect::new(left as i32, top as i32, width as u32, height as u32))
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {}x{})",
            self.left, self.top, self.width, self.height
        )
    }
}

/// A grayscale snapshot of a screen area.
///
/// `origin` is the screen position of the image's top-left pixel, so frame
/// coordinates map to screen coordinates by adding it.
#[derive(Clone, Debug)]
pub struct Frame {
    pub origin: (i32, i32),
    pub image: GrayImage,
}

impl Frame {
    pub fn new(origin: (i32, i32), image: GrayImage) -> Self {
        Self { origin, image }
    }

    /// Converts a color capture exactly as templates are converted on load.
    pub fn from_rgba(origin: (i32, i32), image: RgbaImage) -> Self {
        Self::new(origin, to_gray(DynamicImage::ImageRgba8(image)))
    }

    /// Maps a frame-local position to screen coordinates.
    pub fn to_screen(&self, x: u32, y: u32) -> (i32, i32) {
        (self.origin.0 + x as i32, self.origin.1 + y as i32)
    }
}

/// Source of screen frames.
///
/// Calls block until the frame is read. Implementations do not retry; a
/// failed capture is reported to the caller.
pub trait CaptureProvider {
    /// Bounds of the primary display in screen coordinates.
    fn display_bounds(&mut self) -> Result<Rect, CaptureError>;

    /// Captures the whole primary display, or `region` clipped to it.
    fn capture(&mut self, region: Option<Rect>) -> Result<Frame, CaptureError>;
}

/// Resolves the area a capture request covers on `display`.
pub fn capture_area(region: Option<Rect>, display: Rect) -> Result<Rect, CaptureError> {
    match region {
        None => Ok(display),
        Some(region) => region.intersect(&display).ok_or_else(|| {
            CaptureError(format!(
                "region {} lies outside the display {}",
                region, display
            ))
        }),
    }
}

/// Creates the capture backend for the current platform.
pub fn create_capture_provider() -> Result<Box<dyn CaptureProvider>, CaptureError> {
    #[cfg(windows)]
    let provider = screenshot::GdiCapture::new().map(|p| Box::new(p) as Box<dyn CaptureProvider>);
    #[cfg(all(feature = "portable", not(windows)))]
    let provider = portable::XcapCapture::new().map(|p| Box::new(p) as Box<dyn CaptureProvider>);
    #[cfg(not(any(windows, feature = "portable")))]
    let provider: anyhow::Result<Box<dyn CaptureProvider>> = Err(anyhow::anyhow!(
        "no capture backend for this platform (rebuild with --features portable)"
    ));

    provider.map_err(CaptureError::from_backend)
}
