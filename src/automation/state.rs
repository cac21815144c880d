//! Scan loop state machine.
//!
//! The scanner alternates between Scanning (capture, match every target in
//! catalog order, click the first hit) and IdleWait (nothing matched, sleep a
//! random interval). Stopped is entered only on cancellation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::automation::cancel::in_failsafe_corner;
use crate::capture::{CaptureProvider, Frame, Rect};
use crate::config::{RunState, Target, TargetCatalog};
use crate::error::{InvalidTemplateError, RunError};
use crate::input::{act, sample_duration, Pointer};
use crate::matching::match_template;

/// Longest uninterrupted slice of an idle wait between kill-switch checks.
const IDLE_SLICE: Duration = Duration::from_millis(100);

/// Scan loop states.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScanState {
    /// Capturing and matching
    Scanning,
    /// Nothing matched; sleeping before the next scan
    IdleWait(Duration),
    /// Cancellation observed
    Stopped,
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanState::Scanning => write!(f, "Scanning"),
            ScanState::IdleWait(d) => write!(f, "Idle for {:.2}s", d.as_secs_f64()),
            ScanState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// A confident match chosen for action.
#[derive(Debug, Clone, Copy)]
pub struct Hit<'t> {
    pub target: &'t Target,
    /// Screen rectangle covered by the matched template.
    pub bounds: Rect,
    pub confidence: f64,
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub cycles: u64,
    pub clicks: u64,
    pub action_failures: u64,
}

/// Scan loop context: collaborators plus the current state.
pub struct Scanner<'a, R: Rng> {
    pub state: ScanState,
    catalog: &'a TargetCatalog,
    run_state: &'a RunState,
    capture: &'a mut dyn CaptureProvider,
    pointer: &'a mut dyn Pointer,
    rng: R,
    display: Rect,
    summary: ScanSummary,
}

impl<'a, R: Rng> Scanner<'a, R> {
    pub fn new(
        catalog: &'a TargetCatalog,
        run_state: &'a RunState,
        capture: &'a mut dyn CaptureProvider,
        pointer: &'a mut dyn Pointer,
        rng: R,
        display: Rect,
    ) -> Self {
        Self {
            state: ScanState::Scanning,
            catalog,
            run_state,
            capture,
            pointer,
            rng,
            display,
            summary: ScanSummary::default(),
        }
    }

    pub fn summary(&self) -> ScanSummary {
        self.summary
    }

    /// Advances the state machine by one step.
    ///
    /// Returns `Ok(true)` while scanning should continue, `Ok(false)` once stopped.
    /// Capture failures and templates that no longer fit are fatal.
    pub fn step(&mut self) -> Result<bool, RunError> {
        match self.state {
            ScanState::Scanning => {
                if self.stop_requested() {
                    self.transition(ScanState::Stopped);
                    return Ok(false);
                }

                self.summary.cycles += 1;
                let catalog = self.catalog;
                let hit = find_hit(catalog, self.run_state, &mut *self.capture)?;

                match hit {
                    Some(hit) => {
                        tracing::info!(
                            "Detected '{}' at {} (score {:.3} >= {:.2}), clicking",
                            hit.target.name,
                            hit.bounds,
                            hit.confidence,
                            self.run_state.effective_threshold(hit.target)
                        );
                        match act(
                            &mut *self.pointer,
                            &mut self.rng,
                            hit.bounds,
                            hit.target,
                            self.display,
                        ) {
                            Ok(_) => self.summary.clicks += 1,
                            Err(e) => {
                                // Skip this hit; detection retries after the idle wait
                                tracing::warn!("Skipping '{}': {}", hit.target.name, e);
                                self.summary.action_failures += 1;
                                self.enter_idle();
                            }
                        }
                    }
                    None => self.enter_idle(),
                }
                Ok(true)
            }

            ScanState::IdleWait(delay) => {
                if self.idle(delay) {
                    self.transition(ScanState::Stopped);
                    return Ok(false);
                }
                self.transition(ScanState::Scanning);
                Ok(true)
            }

            ScanState::Stopped => Ok(false),
        }
    }

    /// Steps until cancellation or a fatal error.
    pub fn run(&mut self) -> Result<ScanSummary, RunError> {
        while self.step()? {}
        Ok(self.summary)
    }

    fn enter_idle(&mut self) {
        let delay = sample_duration(&mut self.rng, self.run_state.scan_interval);
        self.transition(ScanState::IdleWait(delay));
    }

    fn transition(&mut self, next: ScanState) {
        tracing::trace!("{} -> {}", self.state, next);
        self.state = next;
    }

    /// Checks the cancel token and the kill-switch.
    fn stop_requested(&mut self) -> bool {
        if self.run_state.cancel.is_cancelled() {
            return true;
        }
        if self.run_state.failsafe {
            match self.pointer.position() {
                Ok(position) if in_failsafe_corner(position, self.display) => {
                    tracing::info!("Pointer moved to the top-left corner, stopping");
                    self.run_state.cancel.cancel();
                    return true;
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("Kill-switch check skipped: {}", e),
            }
        }
        false
    }

    /// Sleeps for `delay`, returning `true` as soon as a stop is requested.
    fn idle(&mut self, delay: Duration) -> bool {
        if !self.run_state.failsafe {
            return self.run_state.cancel.wait_timeout(delay);
        }
        let deadline = Instant::now() + delay;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if self.run_state.cancel.wait_timeout(remaining.min(IDLE_SLICE)) {
                return true;
            }
            if self.stop_requested() {
                return true;
            }
            if remaining <= IDLE_SLICE {
                return false;
            }
        }
    }
}

/// Runs one scan: matches every target in order and returns the first hit.
///
/// Each distinct search region is captured at most once per scan, and only
/// when a target needs it.
pub fn find_hit<'t>(
    catalog: &'t TargetCatalog,
    run_state: &RunState,
    capture: &mut dyn CaptureProvider,
) -> Result<Option<Hit<'t>>, RunError> {
    let mut frames: HashMap<Option<Rect>, Frame> = HashMap::new();

    for target in catalog {
        let frame = match frames.entry(target.region) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(capture.capture(target.region)?)
            }
        };

        let found = match_template(&frame.image, &target.template).map_err(|e| {
            InvalidTemplateError {
                target: target.name.clone(),
                reason: e.to_string(),
            }
        })?;

        if clears_threshold(run_state, target, found.confidence) {
            let (left, top) = frame.to_screen(found.location.0, found.location.1);
            let (width, height) = target.template_size();
            return Ok(Some(Hit {
                target,
                bounds: Rect::new(left, top, width, height),
                confidence: found.confidence,
            }));
        }
        tracing::debug!(
            "'{}' best score {:.3} < {:.2}",
            target.name,
            found.confidence,
            run_state.effective_threshold(target)
        );
    }

    Ok(None)
}

/// A score equal to the threshold counts as a hit.
fn clears_threshold(run_state: &RunState, target: &Target, score: f64) -> bool {
    score >= run_state.effective_threshold(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::CancelToken;
    use crate::capture::testing::FakeCapture;
    use crate::config::DelayRange;
    use crate::input::testing::FakePointer;
    use crate::matching::testing::{noise, paste};
    use image::GrayImage;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::thread;

    const SCREEN: (u32, u32) = (320, 240);

    fn instant(target: Target) -> Target {
        let zero = DelayRange::new(0.0, 0.0).unwrap();
        Target {
            click_margin: 0,
            move_duration: zero,
            pre_click_delay: zero,
            post_click_delay: zero,
            ..target
        }
    }

    fn run_state(confidence_override: Option<f64>, scan_interval: DelayRange) -> RunState {
        RunState {
            cancel: CancelToken::new(),
            scan_interval,
            confidence_override,
            failsafe: true,
        }
    }

    fn short_interval() -> DelayRange {
        DelayRange::new(0.01, 0.02).unwrap()
    }

    /// Screen with `template` pasted at (x, y).
    fn screen_with(template: &GrayImage, x: u32, y: u32) -> GrayImage {
        let mut screen = noise(SCREEN.0, SCREEN.1, 100);
        paste(&mut screen, template, x, y);
        screen
    }

    /// A screen holding a damaged copy of `template`, and the score it gets.
    fn partial_match(template: &GrayImage) -> (GrayImage, f64) {
        let mut damaged = template.clone();
        let scratch = noise(template.width(), template.height() / 2, 77);
        paste(&mut damaged, &scratch, 0, 0);
        let screen = screen_with(&damaged, 40, 30);
        let score = match_template(&screen, template).unwrap().confidence;
        assert!(score > 0.2 && score < 0.95, "score {}", score);
        (screen, score)
    }

    #[test]
    fn test_hit_is_clicked_at_match_center() {
        let template = noise(20, 20, 1);
        let mut capture = FakeCapture::new(screen_with(&template, 100, 50));
        let mut pointer = FakePointer::new((300, 200));
        let catalog = TargetCatalog::new(vec![instant(Target::new("ok", template))]).unwrap();
        let state = run_state(None, short_interval());
        let display = capture.display_bounds().unwrap();

        let mut scanner = Scanner::new(
            &catalog,
            &state,
            &mut capture,
            &mut pointer,
            StdRng::seed_from_u64(1),
            display,
        );
        assert!(scanner.step().unwrap());

        assert_eq!(scanner.state, ScanState::Scanning);
        assert_eq!(scanner.summary().clicks, 1);
        drop(scanner);
        assert_eq!(pointer.clicks(), vec![(110, 60)]);
    }

    #[test]
    fn test_below_threshold_goes_idle() {
        let template = noise(20, 20, 2);
        let (screen, score) = partial_match(&template);
        let target = Target {
            confidence: (score + 0.05).min(1.0),
            ..instant(Target::new("ok", template))
        };
        let mut capture = FakeCapture::new(screen);
        let mut pointer = FakePointer::new((300, 200));
        let catalog = TargetCatalog::new(vec![target]).unwrap();
        let interval = DelayRange::new(0.2, 0.4).unwrap();
        let state = run_state(None, interval);
        let display = capture.display_bounds().unwrap();

        let mut scanner = Scanner::new(
            &catalog,
            &state,
            &mut capture,
            &mut pointer,
            StdRng::seed_from_u64(2),
            display,
        );
        assert!(scanner.step().unwrap());

        match scanner.state {
            ScanState::IdleWait(delay) => assert!(interval.contains(delay)),
            other => panic!("expected idle wait, got {}", other),
        }
        drop(scanner);
        assert!(pointer.events.is_empty());
    }

    #[test]
    fn test_acts_exactly_at_threshold() {
        let template = noise(20, 20, 3);
        let (screen, score) = partial_match(&template);
        let target = Target {
            confidence: score,
            ..instant(Target::new("ok", template))
        };
        let mut capture = FakeCapture::new(screen);
        let catalog = TargetCatalog::new(vec![target]).unwrap();
        let state = run_state(None, short_interval());

        let hit = find_hit(&catalog, &state, &mut capture).unwrap();

        let hit = hit.expect("score equal to threshold should count");
        assert_eq!(hit.bounds, Rect::new(40, 30, 20, 20));
    }

    #[test]
    fn test_override_takes_precedence_over_target_threshold() {
        let template = noise(20, 20, 4);
        let (screen, score) = partial_match(&template);
        let target = Target {
            confidence: 0.99,
            ..instant(Target::new("ok", template))
        };
        let mut capture = FakeCapture::new(screen);
        let catalog = TargetCatalog::new(vec![target]).unwrap();

        let strict = run_state(None, short_interval());
        assert!(find_hit(&catalog, &strict, &mut capture).unwrap().is_none());

        let lenient = run_state(Some(score - 0.1), short_interval());
        assert!(find_hit(&catalog, &lenient, &mut capture).unwrap().is_some());
    }

    #[test]
    fn test_override_can_also_raise_the_bar() {
        let template = noise(20, 20, 5);
        let (screen, score) = partial_match(&template);
        let target = Target {
            confidence: 0.1,
            ..instant(Target::new("ok", template))
        };
        let mut capture = FakeCapture::new(screen);
        let catalog = TargetCatalog::new(vec![target]).unwrap();

        let state = run_state(Some((score + 0.05).min(1.0)), short_interval());
        assert!(find_hit(&catalog, &state, &mut capture).unwrap().is_none());
    }

    #[test]
    fn test_threshold_decisions_with_fixed_scores() {
        let target = Target {
            confidence: 0.9,
            ..Target::new("ok", GrayImage::new(4, 4))
        };

        let own = run_state(None, short_interval());
        assert!(!clears_threshold(&own, &target, 0.85));
        assert!(clears_threshold(&own, &target, 0.9));

        let lowered = run_state(Some(0.5), short_interval());
        assert!(clears_threshold(&lowered, &target, 0.6));
        assert!(!clears_threshold(&lowered, &target, 0.45));
    }

    #[test]
    fn test_first_target_in_catalog_order_wins() {
        let first = noise(16, 16, 6);
        let second = noise(16, 16, 7);
        let mut screen = screen_with(&first, 10, 10);
        paste(&mut screen, &second, 200, 150);
        let mut capture = FakeCapture::new(screen);
        let catalog = TargetCatalog::new(vec![
            instant(Target::new("second", second)),
            instant(Target::new("first", first)),
        ])
        .unwrap();
        let state = run_state(None, short_interval());

        let hit = find_hit(&catalog, &state, &mut capture).unwrap().unwrap();

        assert_eq!(hit.target.name, "second");
        assert_eq!(hit.bounds, Rect::new(200, 150, 16, 16));
    }

    #[test]
    fn test_shared_region_is_captured_once_per_scan() {
        let absent = noise(16, 16, 8);
        let present = noise(16, 16, 9);
        let mut capture = FakeCapture::new(screen_with(&present, 50, 60));
        let catalog = TargetCatalog::new(vec![
            instant(Target::new("absent", absent.clone())),
            instant(Target::new("also_absent", absent)),
            instant(Target::new("present", present)),
        ])
        .unwrap();
        let state = run_state(None, short_interval());

        let hit = find_hit(&catalog, &state, &mut capture).unwrap().unwrap();

        assert_eq!(hit.target.name, "present");
        assert_eq!(capture.captures, 1);
        assert_eq!(capture.regions, vec![None]);
    }

    #[test]
    fn test_regions_are_captured_lazily() {
        let template = noise(16, 16, 10);
        let region = Some(Rect::new(0, 0, 100, 100));
        let mut capture = FakeCapture::new(screen_with(&template, 20, 20));
        let catalog = TargetCatalog::new(vec![
            Target {
                region,
                ..instant(Target::new("in_region", template.clone()))
            },
            instant(Target::new("full_screen", template)),
        ])
        .unwrap();
        let state = run_state(None, short_interval());

        let hit = find_hit(&catalog, &state, &mut capture).unwrap().unwrap();

        // The first target hits, so the full screen is never captured
        assert_eq!(hit.target.name, "in_region");
        assert_eq!(hit.bounds, Rect::new(20, 20, 16, 16));
        assert_eq!(capture.regions, vec![region]);
    }

    #[test]
    fn test_region_match_maps_to_screen_coordinates() {
        let template = noise(10, 10, 11);
        let region = Some(Rect::new(150, 100, 80, 60));
        let mut capture = FakeCapture::new(screen_with(&template, 170, 120));
        let catalog = TargetCatalog::new(vec![Target {
            region,
            ..instant(Target::new("ok", template))
        }])
        .unwrap();
        let state = run_state(None, short_interval());

        let hit = find_hit(&catalog, &state, &mut capture).unwrap().unwrap();

        assert_eq!(hit.bounds, Rect::new(170, 120, 10, 10));
    }

    #[test]
    fn test_capture_failure_is_fatal() {
        let template = noise(10, 10, 12);
        let mut capture = FakeCapture::failing(noise(SCREEN.0, SCREEN.1, 13));
        let mut pointer = FakePointer::new((300, 200));
        let catalog = TargetCatalog::new(vec![Target::new("ok", template)]).unwrap();
        let state = run_state(None, short_interval());
        let display = capture.display_bounds().unwrap();

        let mut scanner = Scanner::new(
            &catalog,
            &state,
            &mut capture,
            &mut pointer,
            StdRng::seed_from_u64(3),
            display,
        );
        let err = scanner.run().unwrap_err();

        assert!(matches!(err, RunError::Capture(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_template_too_large_for_frame_is_fatal() {
        let catalog = TargetCatalog::new(vec![Target {
            region: Some(Rect::new(0, 0, 8, 8)),
            ..Target::new("big", noise(10, 10, 14))
        }])
        .unwrap();
        let mut capture = FakeCapture::new(noise(SCREEN.0, SCREEN.1, 15));
        let state = run_state(None, short_interval());

        let err = find_hit(&catalog, &state, &mut capture).unwrap_err();

        match err {
            RunError::InvalidTemplate(e) => assert_eq!(e.target, "big"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_action_failure_does_not_stop_the_loop() {
        let template = noise(20, 20, 16);
        let mut capture = FakeCapture::new(screen_with(&template, 100, 50));
        let mut pointer = FakePointer::rejecting();
        let catalog = TargetCatalog::new(vec![instant(Target::new("ok", template))]).unwrap();
        let state = run_state(None, short_interval());
        let display = capture.display_bounds().unwrap();

        let mut scanner = Scanner::new(
            &catalog,
            &state,
            &mut capture,
            &mut pointer,
            StdRng::seed_from_u64(4),
            display,
        );
        for _ in 0..6 {
            assert!(scanner.step().unwrap());
        }

        let summary = scanner.summary();
        assert_eq!(summary.clicks, 0);
        assert_eq!(summary.action_failures, 3);
        assert_eq!(summary.cycles, 3);
    }

    #[test]
    fn test_cancel_before_scan_stops_without_capture() {
        let template = noise(10, 10, 17);
        let mut capture = FakeCapture::new(screen_with(&template, 5, 5));
        let mut pointer = FakePointer::new((300, 200));
        let catalog = TargetCatalog::new(vec![instant(Target::new("ok", template))]).unwrap();
        let state = run_state(None, short_interval());
        state.cancel.cancel();
        let display = capture.display_bounds().unwrap();

        let mut scanner = Scanner::new(
            &catalog,
            &state,
            &mut capture,
            &mut pointer,
            StdRng::seed_from_u64(5),
            display,
        );
        let summary = scanner.run().unwrap();

        assert_eq!(scanner.state, ScanState::Stopped);
        assert_eq!(summary.cycles, 0);
        drop(scanner);
        assert_eq!(capture.captures, 0);
        assert!(pointer.events.is_empty());
    }

    #[test]
    fn test_cancel_during_idle_wait_exits_without_new_capture() {
        let template = noise(10, 10, 18);
        let mut capture = FakeCapture::new(noise(SCREEN.0, SCREEN.1, 19));
        let mut pointer = FakePointer::new((300, 200));
        let catalog = TargetCatalog::new(vec![Target {
            confidence: 1.0,
            ..Target::new("ok", template)
        }])
        .unwrap();
        let state = run_state(None, DelayRange::new(30.0, 30.0).unwrap());
        let display = capture.display_bounds().unwrap();

        let canceller = state.cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });

        let start = Instant::now();
        let mut scanner = Scanner::new(
            &catalog,
            &state,
            &mut capture,
            &mut pointer,
            StdRng::seed_from_u64(6),
            display,
        );
        let summary = scanner.run().unwrap();
        handle.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(summary.cycles, 1);
        drop(scanner);
        assert_eq!(capture.captures, 1);
    }

    #[test]
    fn test_pointer_in_corner_stops_the_loop() {
        let template = noise(10, 10, 20);
        let mut capture = FakeCapture::new(screen_with(&template, 5, 5));
        let mut pointer = FakePointer::new((0, 0));
        let catalog = TargetCatalog::new(vec![instant(Target::new("ok", template))]).unwrap();
        let state = run_state(None, short_interval());
        let display = capture.display_bounds().unwrap();

        let mut scanner = Scanner::new(
            &catalog,
            &state,
            &mut capture,
            &mut pointer,
            StdRng::seed_from_u64(7),
            display,
        );
        let summary = scanner.run().unwrap();

        assert_eq!(summary.cycles, 0);
        assert!(state.cancel.is_cancelled());
    }

    #[test]
    fn test_corner_is_ignored_without_failsafe() {
        let template = noise(10, 10, 21);
        let mut capture = FakeCapture::new(screen_with(&template, 5, 5));
        let mut pointer = FakePointer::new((0, 0));
        let catalog = TargetCatalog::new(vec![instant(Target::new("ok", template))]).unwrap();
        let state = RunState {
            failsafe: false,
            ..run_state(None, short_interval())
        };
        let display = capture.display_bounds().unwrap();

        let mut scanner = Scanner::new(
            &catalog,
            &state,
            &mut capture,
            &mut pointer,
            StdRng::seed_from_u64(8),
            display,
        );
        assert!(scanner.step().unwrap());

        assert_eq!(scanner.summary().clicks, 1);
    }

    #[test]
    fn test_steps_alternate_between_scanning_and_idle() {
        let template = noise(16, 16, 30);
        let catalog = TargetCatalog::new(vec![Target::new("absent", template)]).unwrap();
        let state = run_state(None, short_interval());
        let mut capture = FakeCapture::new(noise(SCREEN.0, SCREEN.1, 31));
        let mut pointer = FakePointer::new((100, 100));
        let display = capture.display_bounds().unwrap();
        let mut scanner = Scanner::new(
            &catalog,
            &state,
            &mut capture,
            &mut pointer,
            StdRng::seed_from_u64(3),
            display,
        );

        assert!(scanner.step().unwrap());
        assert!(matches!(scanner.state, ScanState::IdleWait(_)));
        assert!(scanner.step().unwrap());
        assert_eq!(scanner.state, ScanState::Scanning);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ScanState::Scanning.to_string(), "Scanning");
        assert_eq!(
            ScanState::IdleWait(Duration::from_millis(450)).to_string(),
            "Idle for 0.45s"
        );
        assert_eq!(ScanState::Stopped.to_string(), "Stopped");
    }
}
