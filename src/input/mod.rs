//! Pointer actions with randomized position and timing.
//!
//! A hit is acted on in five steps: pick a click point near the center of the
//! matched box, glide the pointer there, wait, click, wait again. Every random
//! choice comes from the caller's `Rng` so that tests can seed it.

#[cfg(windows)]
pub mod sendinput;

#[cfg(all(feature = "portable", not(windows)))]
pub mod portable;

use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::capture::Rect;
use crate::config::{DelayRange, Target};
use crate::error::ActionError;

/// Interval between intermediate positions while gliding.
const GLIDE_STEP: Duration = Duration::from_millis(10);

/// A mouse pointer that can be read, moved and clicked in screen coordinates.
pub trait Pointer {
    fn position(&mut self) -> Result<(i32, i32), ActionError>;

    fn move_to(&mut self, x: i32, y: i32) -> Result<(), ActionError>;

    /// Left-clicks at (x, y).
    fn click(&mut self, x: i32, y: i32) -> Result<(), ActionError>;
}

/// What an action did, for logging and tests.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActionReport {
    pub click_point: (i32, i32),
    pub move_duration: Duration,
    pub pre_click_delay: Duration,
    pub post_click_delay: Duration,
}

/// Picks a click point uniformly from the box of half-width `margin` around
/// the center of `matched`, kept on `display`.
pub fn sample_click_point<R: Rng + ?Sized>(
    rng: &mut R,
    matched: Rect,
    margin: u32,
    display: Rect,
) -> (i32, i32) {
    let (cx, cy) = matched.center();
    let (x, y) = if margin == 0 {
        (cx as i64, cy as i64)
    } else {
        let m = margin as i64;
        (
            cx as i64 + rng.random_range(-m..=m),
            cy as i64 + rng.random_range(-m..=m),
        )
    };
    (
        x.clamp(display.left as i64, display.right() - 1) as i32,
        y.clamp(display.top as i64, display.bottom() - 1) as i32,
    )
}

/// Samples a duration uniformly from `range`, bounds included.
pub fn sample_duration<R: Rng + ?Sized>(rng: &mut R, range: DelayRange) -> Duration {
    let (min, max) = (range.min_secs(), range.max_secs());
    if min >= max {
        return range.min();
    }
    Duration::from_secs_f64(rng.random_range(min..=max)).clamp(range.min(), range.max())
}

/// Moves the pointer to (x, y) in a straight line over `duration`.
///
/// The final step lands exactly on the destination.
pub fn glide(
    pointer: &mut dyn Pointer,
    x: i32,
    y: i32,
    duration: Duration,
) -> Result<(), ActionError> {
    let steps = (duration.as_millis() / GLIDE_STEP.as_millis()) as u32;
    if steps <= 1 {
        thread::sleep(duration);
        return pointer.move_to(x, y);
    }

    let (sx, sy) = pointer.position()?;
    let pause = duration / steps;
    for i in 1..=steps {
        let t = i as f64 / steps as f64;
        let px = sx as f64 + (x - sx) as f64 * t;
        let py = sy as f64 + (y - sy) as f64 * t;
        pointer.move_to(px.round() as i32, py.round() as i32)?;
        thread::sleep(pause);
    }
    // Rounding can leave the last interpolated point one pixel off
    pointer.move_to(x, y)
}

/// Clicks a matched box with `target`'s jitter and timing.
///
/// `matched` is the screen rectangle the template was found at.
pub fn act<R: Rng + ?Sized>(
    pointer: &mut dyn Pointer,
    rng: &mut R,
    matched: Rect,
    target: &Target,
    display: Rect,
) -> Result<ActionReport, ActionError> {
    let click_point = sample_click_point(rng, matched, target.click_margin, display);
    let report = ActionReport {
        click_point,
        move_duration: sample_duration(rng, target.move_duration),
        pre_click_delay: sample_duration(rng, target.pre_click_delay),
        post_click_delay: sample_duration(rng, target.post_click_delay),
    };
    tracing::debug!(
        "Clicking '{}' at {:?} (move {:?}, pre {:?}, post {:?})",
        target.name,
        report.click_point,
        report.move_duration,
        report.pre_click_delay,
        report.post_click_delay
    );

    let (x, y) = click_point;
    glide(pointer, x, y, report.move_duration)?;
    thread::sleep(report.pre_click_delay);
    pointer.click(x, y)?;
    thread::sleep(report.post_click_delay);

    Ok(report)
}

/// Creates the pointer backend for the current platform.
pub fn create_pointer() -> Result<Box<dyn Pointer>, ActionError> {
    #[cfg(windows)]
    let pointer = sendinput::SendInputPointer::new().map(|p| Box::new(p) as Box<dyn Pointer>);
    #[cfg(all(feature = "portable", not(windows)))]
    let pointer = portable::EnigoPointer::new().map(|p| Box::new(p) as Box<dyn Pointer>);
    #[cfg(not(any(windows, feature = "portable")))]
    let pointer: anyhow::Result<Box<dyn Pointer>> = Err(anyhow::anyhow!(
        "no input backend for this platform (rebuild with --features portable)"
    ));

    pointer.map_err(ActionError::from_backend)
}
