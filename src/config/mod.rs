//! Target configuration.
//!
//! Loads the targets file (a JSON array of targets, or an object carrying
//! process-wide defaults plus a `targets` array), decodes the template images
//! and layers command-line overrides on top to produce the `RunState` the
//! scan loop reads.

mod target;

pub use target::{
    DelayRange, Target, TargetCatalog, DEFAULT_CLICK_MARGIN, DEFAULT_CONFIDENCE,
    DEFAULT_MOVE_DURATION, DEFAULT_POST_CLICK_DELAY, DEFAULT_PRE_CLICK_DELAY,
    DEFAULT_SCAN_INTERVAL,
};

use std::fs;
use std::path::{Path, PathBuf};

use image::GrayImage;
use serde::Deserialize;

use crate::automation::CancelToken;
use crate::capture::Rect;
use crate::error::{ConfigError, InvalidTemplateError, RunError};
use crate::matching::to_gray;

/// One entry of the targets file, before its template is loaded.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetConfig {
    name: String,
    /// Template path, relative to the targets file.
    image: PathBuf,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    region: Option<Rect>,
    #[serde(default = "default_click_margin")]
    click_margin: u32,
    #[serde(default = "default_move_duration")]
    move_duration_range: DelayRange,
    #[serde(default = "default_pre_click_delay")]
    pre_click_delay_range: DelayRange,
    #[serde(default = "default_post_click_delay")]
    post_click_delay_range: DelayRange,
}

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

fn default_click_margin() -> u32 {
    DEFAULT_CLICK_MARGIN
}

fn default_move_duration() -> DelayRange {
    DEFAULT_MOVE_DURATION
}

fn default_pre_click_delay() -> DelayRange {
    DEFAULT_PRE_CLICK_DELAY
}

fn default_post_click_delay() -> DelayRange {
    DEFAULT_POST_CLICK_DELAY
}

/// Object form of the targets file.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetsDocument {
    #[serde(default)]
    scan_interval: Option<DelayRange>,
    #[serde(default)]
    confidence: Option<f64>,
    targets: Vec<TargetConfig>,
}

/// Accepts either a bare array of targets or the object form.
fn parse_document(contents: &str) -> Result<TargetsDocument, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(contents)?;
    if value.is_array() {
        Ok(TargetsDocument {
            scan_interval: None,
            confidence: None,
            targets: serde_json::from_value(value)?,
        })
    } else {
        serde_json::from_value(value)
    }
}

/// A loaded targets file.
#[derive(Clone, Debug)]
pub struct ClickerConfig {
    pub source: PathBuf,
    pub catalog: TargetCatalog,
    /// File-level scan interval, if the file sets one.
    pub scan_interval: Option<DelayRange>,
    /// File-level confidence override, if the file sets one.
    pub confidence: Option<f64>,
}

/// Values from the command line, layered over the file.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Overrides {
    pub scan_interval: Option<DelayRange>,
    pub confidence: Option<f64>,
    /// Disables the pointer-corner kill-switch.
    pub no_failsafe: bool,
}

/// Settings the scan loop reads for the whole run.
#[derive(Clone, Debug)]
pub struct RunState {
    pub cancel: CancelToken,
    pub scan_interval: DelayRange,
    pub confidence_override: Option<f64>,
    pub failsafe: bool,
}

impl RunState {
    /// Resolves overrides: command line, then targets file, then built-in defaults.
    pub fn new(
        config: &ClickerConfig,
        overrides: &Overrides,
        cancel: CancelToken,
    ) -> Result<Self, ConfigError> {
        let confidence_override = overrides.confidence.or(config.confidence);
        if let Some(value) = confidence_override {
            validate_confidence("confidence override", value)?;
        }
        Ok(Self {
            cancel,
            scan_interval: overrides
                .scan_interval
                .or(config.scan_interval)
                .unwrap_or(DEFAULT_SCAN_INTERVAL),
            confidence_override,
            failsafe: !overrides.no_failsafe,
        })
    }

    /// Threshold a match for `target` must reach to count as a hit.
    pub fn effective_threshold(&self, target: &Target) -> f64 {
        self.confidence_override.unwrap_or(target.confidence)
    }
}

fn validate_confidence(what: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{} must be in (0, 1], got {}",
            what, value
        )))
    }
}

/// Loads the targets file at `path` and every template it names.
pub fn load_config(path: &Path) -> Result<ClickerConfig, RunError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()).into());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let document = parse_document(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if document.targets.is_empty() {
        return Err(ConfigError::NoTargets(path.to_path_buf()).into());
    }
    if let Some(value) = document.confidence {
        validate_confidence("confidence", value)?;
    }

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut targets = Vec::with_capacity(document.targets.len());
    for raw in document.targets {
        targets.push(build_target(base_dir, raw)?);
    }

    tracing::debug!("Loaded {} targets from {}", targets.len(), path.display());

    Ok(ClickerConfig {
        source: path.to_path_buf(),
        catalog: TargetCatalog::new(targets)?,
        scan_interval: document.scan_interval,
        confidence: document.confidence,
    })
}

fn build_target(base_dir: &Path, raw: TargetConfig) -> Result<Target, RunError> {
    validate_confidence(&format!("target '{}': confidence", raw.name), raw.confidence)?;

    let image_path = base_dir.join(&raw.image);
    let template = load_template(&raw.name, &image_path)?;

    Ok(Target {
        name: raw.name,
        image_path,
        template,
        confidence: raw.confidence,
        region: raw.region,
        click_margin: raw.click_margin,
        move_duration: raw.move_duration_range,
        pre_click_delay: raw.pre_click_delay_range,
        post_click_delay: raw.post_click_delay_range,
    })
}

/// Decodes a template image as 8-bit grayscale.
pub fn load_template(name: &str, path: &Path) -> Result<GrayImage, InvalidTemplateError> {
    let invalid = |reason: String| InvalidTemplateError {
        target: name.to_string(),
        reason,
    };

    if !path.exists() {
        return Err(invalid(format!("image file not found: {}", path.display())));
    }
    let template = image::open(path)
        .map(to_gray)
        .map_err(|e| invalid(format!("failed to read image file {}: {}", path.display(), e)))?;
    if template.width() == 0 || template.height() == 0 {
        return Err(invalid(format!("template image is empty: {}", path.display())));
    }
    Ok(template)
}
