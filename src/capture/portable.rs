//! Cross-platform screen capture using xcap.

use anyhow::{Context, Result};
use xcap::Monitor;

use super::{capture_area, CaptureProvider, Frame, Rect};
use crate::error::CaptureError;

/// Captures the primary monitor.
pub struct XcapCapture {
    monitor: Monitor,
}

impl XcapCapture {
    pub fn new() -> Result<Self> {
        let monitors = Monitor::all().context("failed to list monitors")?;
        let mut primary = None;
        let mut first = None;
        for monitor in monitors {
            if monitor.is_primary().unwrap_or(false) {
                primary = Some(monitor);
                break;
            }
            if first.is_none() {
                first = Some(monitor);
            }
        }
        let monitor = primary.or(first).context("no monitors found")?;
        Ok(Self { monitor })
    }

    fn bounds(&self) -> Result<Rect> {
        Ok(Rect::new(
            self.monitor.x()?,
            self.monitor.y()?,
            self.monitor.width()?,
            self.monitor.height()?,
        ))
    }
}

impl CaptureProvider for XcapCapture {
    fn display_bounds(&mut self) -> Result<Rect, CaptureError> {
        self.bounds().map_err(CaptureError::from_backend)
    }

    fn capture(&mut self, region: Option<Rect>) -> Result<Frame, CaptureError> {
        let display = self.display_bounds()?;
        let area = capture_area(region, display)?;
        let img = if area == display {
            self.monitor.capture_image()
        } else {
            // xcap regions are relative to the monitor origin
            self.monitor.capture_region(
                (area.left - display.left) as u32,
                (area.top - display.top) as u32,
                area.width,
                area.height,
            )
        }
        .with_context(|| format!("capturing {}", area))
        .map_err(CaptureError::from_backend)?;
        Ok(Frame::from_rgba((area.left, area.top), img))
    }
}
