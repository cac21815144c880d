//! Runner: the entry point that wires configuration, backends and the scan loop.
//!
//! Startup order matters for exit codes: configuration problems are reported
//! before any backend is opened, and templates are checked against the display
//! before the first capture.

use rand::Rng;

use crate::automation::cancel::install_stop_handlers;
use crate::automation::state::{ScanSummary, Scanner};
use crate::automation::CancelToken;
use crate::capture::{capture_area, create_capture_provider, CaptureProvider, Rect};
use crate::config::{ClickerConfig, Overrides, RunState, TargetCatalog};
use crate::error::RunError;
use crate::input::{create_pointer, Pointer};

/// Process outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus(u8);

impl ExitStatus {
    /// Stopped by cancellation.
    pub const SUCCESS: ExitStatus = ExitStatus(0);

    pub fn code(&self) -> u8 {
        self.0
    }
}

impl From<&RunError> for ExitStatus {
    fn from(err: &RunError) -> Self {
        ExitStatus(err.exit_code())
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(status.code())
    }
}

/// Runs the clicker until it is cancelled or fails.
///
/// Returns success on a clean stop and a non-zero status on startup or
/// capture failure.
pub fn run(config: &ClickerConfig, overrides: &Overrides) -> ExitStatus {
    match start(config, overrides, CancelToken::new()) {
        Ok(summary) => {
            tracing::info!(
                "Stopped by user after {} scans, {} clicks ({} skipped)",
                summary.cycles,
                summary.clicks,
                summary.action_failures
            );
            ExitStatus::SUCCESS
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitStatus::from(&e)
        }
    }
}

fn start(
    config: &ClickerConfig,
    overrides: &Overrides,
    cancel: CancelToken,
) -> Result<ScanSummary, RunError> {
    let run_state = RunState::new(config, overrides, cancel)?;

    let mut capture = create_capture_provider()?;
    let mut pointer = create_pointer()?;
    install_stop_handlers(&run_state.cancel);

    scan(
        &config.catalog,
        &run_state,
        capture.as_mut(),
        pointer.as_mut(),
        rand::rng(),
    )
}

/// Validates the catalog against the display, then runs the scan loop.
pub fn scan<R: Rng>(
    catalog: &TargetCatalog,
    run_state: &RunState,
    capture: &mut dyn CaptureProvider,
    pointer: &mut dyn Pointer,
    rng: R,
) -> Result<ScanSummary, RunError> {
    let display = capture.display_bounds()?;
    catalog.validate_against(display)?;

    log_banner(catalog, run_state, display);

    let mut scanner = Scanner::new(catalog, run_state, capture, pointer, rng, display);
    scanner.run()
}

fn log_banner(catalog: &TargetCatalog, run_state: &RunState, screen: Rect) {
    tracing::info!(
        "Starting automation: {} targets, display {}",
        catalog.len(),
        screen
    );
    for target in catalog {
        let (w, h) = target.template_size();
        let area = capture_area(target.region, screen)
            .map(|r| r.to_string())
            .unwrap_or_else(|_| "-".to_string());
        tracing::info!(
            "  '{}': {}x{} template, threshold {:.2}, search {}",
            target.name,
            w,
            h,
            run_state.effective_threshold(target),
            area
        );
    }
    if let Some(region) = catalog.shared_region() {
        // One capture per scan serves every target
        let area = capture_area(region, screen).map(|r| r.to_string());
        tracing::debug!("All targets share search area {}", area.unwrap_or_default());
    }
    tracing::info!("Scan interval {}", run_state.scan_interval);
    if let Some(confidence) = run_state.confidence_override {
        tracing::info!("Confidence override {:.2} applies to all targets", confidence);
    }
    if run_state.failsafe {
        tracing::info!("Move the mouse to the top-left corner to stop");
    }
    #[cfg(windows)]
    tracing::info!("Press Ctrl+C or Ctrl+Shift+Q to stop");
    #[cfg(not(windows))]
    tracing::info!("Press Ctrl+C to stop");
}
