//! Targets: template images bound to thresholds, click jitter and timing.

use std::path::PathBuf;
use std::time::Duration;

use image::GrayImage;
use serde::Deserialize;

use crate::capture::{capture_area, Rect};
use crate::error::{ConfigError, InvalidTemplateError};
use crate::matching::check_fits;

/// Default per-target confidence threshold.
pub const DEFAULT_CONFIDENCE: f64 = 0.85;

/// Default click jitter in pixels.
pub const DEFAULT_CLICK_MARGIN: u32 = 6;

pub const DEFAULT_MOVE_DURATION: DelayRange = DelayRange::new_unchecked(0.3, 0.7);
pub const DEFAULT_PRE_CLICK_DELAY: DelayRange = DelayRange::new_unchecked(0.1, 0.4);
pub const DEFAULT_POST_CLICK_DELAY: DelayRange = DelayRange::new_unchecked(0.6, 1.2);

/// Default idle wait between scans when nothing matched.
pub const DEFAULT_SCAN_INTERVAL: DelayRange = DelayRange::new_unchecked(0.3, 0.6);

/// An inclusive `[min, max]` range of seconds.
///
/// Deserializes from a two-element array.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(try_from = "[f64; 2]")]
pub struct DelayRange {
    min: f64,
    max: f64,
}

impl DelayRange {
    const fn new_unchecked(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Builds a range, rejecting negative, non-finite and reversed bounds.
    pub fn new(min: f64, max: f64) -> Result<Self, String> {
        if !min.is_finite() || !max.is_finite() {
            return Err(format!("range bounds must be finite, got [{}, {}]", min, max));
        }
        if min < 0.0 || max < 0.0 {
            return Err(format!("range bounds must be non-negative, got [{}, {}]", min, max));
        }
        if min > max {
            return Err(format!("invalid range: min {} is greater than max {}", min, max));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> Duration {
        Duration::from_secs_f64(self.min)
    }

    pub fn max(&self) -> Duration {
        Duration::from_secs_f64(self.max)
    }

    pub fn min_secs(&self) -> f64 {
        self.min
    }

    pub fn max_secs(&self) -> f64 {
        self.max
    }

    /// Whether `d` lies within the range, bounds included.
    pub fn contains(&self, d: Duration) -> bool {
        d >= self.min() && d <= self.max()
    }
}

impl TryFrom<[f64; 2]> for DelayRange {
    type Error = String;

    fn try_from([min, max]: [f64; 2]) -> Result<Self, Self::Error> {
        DelayRange::new(min, max)
    }
}

impl std::fmt::Display for DelayRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}-{:.2}s", self.min, self.max)
    }
}

/// A UI element to look for and click.
#[derive(Clone, Debug)]
pub struct Target {
    pub name: String,
    /// Where the template was loaded from (empty for in-memory targets).
    pub image_path: PathBuf,
    /// Grayscale template.
    pub template: GrayImage,
    /// Minimum score that counts as a hit, in (0, 1].
    pub confidence: f64,
    /// Screen area to search; the whole primary display when `None`.
    pub region: Option<Rect>,
    /// Maximum click offset from the match center, per axis.
    pub click_margin: u32,
    pub move_duration: DelayRange,
    pub pre_click_delay: DelayRange,
    pub post_click_delay: DelayRange,
}

impl Target {
    /// Creates a target with default threshold, jitter and timing.
    pub fn new(name: impl Into<String>, template: GrayImage) -> Self {
        Self {
            name: name.into(),
            image_path: PathBuf::new(),
            template,
            confidence: DEFAULT_CONFIDENCE,
            region: None,
            click_margin: DEFAULT_CLICK_MARGIN,
            move_duration: DEFAULT_MOVE_DURATION,
            pre_click_delay: DEFAULT_PRE_CLICK_DELAY,
            post_click_delay: DEFAULT_POST_CLICK_DELAY,
        }
    }

    pub fn template_size(&self) -> (u32, u32) {
        self.template.dimensions()
    }

    /// Checks that the template fits the area this target searches on `display`.
    pub fn validate_against(&self, display: Rect) -> Result<(), InvalidTemplateError> {
        let area = capture_area(self.region, display).map_err(|e| InvalidTemplateError {
            target: self.name.clone(),
            reason: e.0,
        })?;
        check_fits(self.template_size(), (area.width, area.height)).map_err(|e| {
            InvalidTemplateError {
                target: self.name.clone(),
                reason: e.to_string(),
            }
        })
    }
}

/// Targets in match priority order: the first acceptable match in a cycle wins.
#[derive(Clone, Debug)]
pub struct TargetCatalog {
    targets: Vec<Target>,
}

impl TargetCatalog {
    pub fn new(targets: Vec<Target>) -> Result<Self, ConfigError> {
        if targets.is_empty() {
            return Err(ConfigError::Invalid("no targets configured".to_string()));
        }
        Ok(Self { targets })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Target> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// The search region every target shares, if they all use the same one.
    ///
    /// `Some(None)` means all targets search the full display.
    pub fn shared_region(&self) -> Option<Option<Rect>> {
        let first = self.targets.first()?.region;
        self.targets
            .iter()
            .all(|t| t.region == first)
            .then_some(first)
    }

    /// Checks every template against the display before scanning starts.
    pub fn validate_against(&self, display: Rect) -> Result<(), InvalidTemplateError> {
        self.targets
            .iter()
            .try_for_each(|t| t.validate_against(display))
    }
}

impl<'a> IntoIterator for &'a TargetCatalog {
    type Item = &'a Target;
    type IntoIter = std::slice::Iter<'a, Target>;

    fn into_iter(self) -> Self::IntoIter {
        self.targets.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn target(name: &str, size: u32) -> Target {
        Target::new(name, GrayImage::from_pixel(size, size, Luma([128])))
    }

    #[test]
    fn test_delay_range_validation() {
        assert!(DelayRange::new(0.3, 0.6).is_ok());
        assert!(DelayRange::new(0.0, 0.0).is_ok());
        assert_eq!(
            DelayRange::new(0.7, 0.3).unwrap_err(),
            "invalid range: min 0.7 is greater than max 0.3"
        );
        assert!(DelayRange::new(-0.1, 0.3).is_err());
        assert!(DelayRange::new(0.1, f64::INFINITY).is_err());
        assert!(DelayRange::new(f64::NAN, 0.3).is_err());
    }

    #[test]
    fn test_delay_range_from_json() {
        let range: DelayRange = serde_json::from_str("[0.25, 1.5]").unwrap();
        assert_eq!(range.min(), Duration::from_millis(250));
        assert_eq!(range.max(), Duration::from_millis(1500));
        assert!(serde_json::from_str::<DelayRange>("[2.0, 1.0]").is_err());
        assert!(serde_json::from_str::<DelayRange>("[1.0]").is_err());
    }

    #[test]
    fn test_delay_range_contains_bounds() {
        let range = DelayRange::new(0.1, 0.4).unwrap();
        assert!(range.contains(Duration::from_millis(100)));
        assert!(range.contains(Duration::from_millis(400)));
        assert!(!range.contains(Duration::from_millis(401)));
        assert!(!range.contains(Duration::from_millis(99)));
    }

    #[test]
    fn test_target_defaults() {
        let t = target("ok", 10);
        assert_eq!(t.confidence, 0.85);
        assert_eq!(t.click_margin, 6);
        assert_eq!(t.move_duration, DelayRange::new(0.3, 0.7).unwrap());
        assert_eq!(t.pre_click_delay, DelayRange::new(0.1, 0.4).unwrap());
        assert_eq!(t.post_click_delay, DelayRange::new(0.6, 1.2).unwrap());
        assert_eq!(t.region, None);
    }

    #[test]
    fn test_empty_catalog_is_rejected() {
        assert!(TargetCatalog::new(Vec::new()).is_err());
    }

    #[test]
    fn test_shared_region() {
        let region = Some(Rect::new(0, 0, 100, 100));
        let all_full = TargetCatalog::new(vec![target("a", 5), target("b", 5)]).unwrap();
        assert_eq!(all_full.shared_region(), Some(None));

        let same = TargetCatalog::new(vec![
            Target { region, ..target("a", 5) },
            Target { region, ..target("b", 5) },
        ])
        .unwrap();
        assert_eq!(same.shared_region(), Some(region));

        let mixed = TargetCatalog::new(vec![Target { region, ..target("a", 5) }, target("b", 5)])
            .unwrap();
        assert_eq!(mixed.shared_region(), None);
    }

    #[test]
    fn test_validate_template_against_region() {
        let display = Rect::new(0, 0, 800, 600);

        let exact = Target {
            region: Some(Rect::new(10, 10, 20, 20)),
            ..target("exact", 20)
        };
        assert!(exact.validate_against(display).is_ok());

        let too_large = Target {
            region: Some(Rect::new(10, 10, 20, 20)),
            ..target("too_large", 21)
        };
        let err = too_large.validate_against(display).unwrap_err();
        assert_eq!(err.target, "too_large");
        assert_eq!(err.reason, "template 21x21 is larger than search area 20x20");
    }

    #[test]
    fn test_validate_uses_region_clipped_to_display() {
        let display = Rect::new(0, 0, 800, 600);
        let clipped = Target {
            region: Some(Rect::new(790, 0, 100, 100)),
            ..target("edge", 20)
        };
        assert!(clipped.validate_against(display).is_err());

        let off_screen = Target {
            region: Some(Rect::new(900, 0, 100, 100)),
            ..target("gone", 20)
        };
        assert!(off_screen.validate_against(display).is_err());
    }

    #[test]
    fn test_catalog_validation_names_first_failing_target() {
        let display = Rect::new(0, 0, 100, 100);
        let catalog = TargetCatalog::new(vec![target("fits", 50), target("huge", 150)]).unwrap();
        let err = catalog.validate_against(display).unwrap_err();
        assert_eq!(err.target, "huge");
    }
}
