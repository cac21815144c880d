//! Template matching by zero-mean normalized cross-correlation.
//!
//! Each offset of the template over the frame is scored with the correlation
//! coefficient between the template and the frame window, clamped to [0, 1]
//! so that 1.0 means the window equals the template up to a brightness or
//! contrast change and anti-correlated windows score 0.
//!
//! The raw cross-correlation map comes from `imageproc` (computed in
//! parallel); window means and variances come from integral images. The best
//! offset is then rescored exactly in integer arithmetic, so a pixel-exact
//! match reports a confidence of exactly 1.0.

use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use imageproc::definitions::Image;
use imageproc::integral_image::{integral_image, integral_squared_image};
use imageproc::template_matching::{
    find_extremes, match_template_parallel, Extremes, MatchTemplateMethod,
};
use thiserror::Error;

/// Best-aligned template position in frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Match {
    /// Top-left corner of the matched window.
    pub location: (u32, u32),
    /// Similarity in [0, 1].
    pub confidence: f64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatchError {
    #[error(
        "template {}x{} is larger than search area {}x{}",
        .template.0, .template.1, .area.0, .area.1
    )]
    TemplateTooLarge { template: (u32, u32), area: (u32, u32) },

    #[error("template is empty")]
    EmptyTemplate,
}

/// Grayscale conversion shared by templates and captured frames.
///
/// Both sides of a match must use the same rounding, otherwise a pixel-exact
/// element on screen no longer scores 1.0.
pub fn to_gray(image: DynamicImage) -> GrayImage {
    image.to_luma8()
}

/// Checks that `template` can be searched inside an area of `area` pixels.
pub fn check_fits(template: (u32, u32), area: (u32, u32)) -> Result<(), MatchError> {
    if template.0 == 0 || template.1 == 0 {
        return Err(MatchError::EmptyTemplate);
    }
    if template.0 > area.0 || template.1 > area.1 {
        return Err(MatchError::TemplateTooLarge { template, area });
    }
    Ok(())
}

/// Finds the offset where `template` best matches `frame`.
///
/// Deterministic: ties keep the first offset in row-major order.
pub fn match_template(frame: &GrayImage, template: &GrayImage) -> Result<Match, MatchError> {
    check_fits(template.dimensions(), frame.dimensions())?;

    let stats = PatchSums::of(template);
    let windows = FrameIntegrals::new(frame, template.dimensions());
    let cross = match_template_parallel(frame, template, MatchTemplateMethod::CrossCorrelation);

    let scores: Image<Luma<f32>> = ImageBuffer::from_fn(cross.width(), cross.height(), |x, y| {
        let window = windows.window(x, y);
        Luma([correlation(cross.get_pixel(x, y)[0] as f64, &window, &stats) as f32])
    });
    let Extremes {
        max_value_location, ..
    } = find_extremes(&scores);

    let (x, y) = max_value_location;
    let confidence = exact_correlation(frame, template, (x, y), &windows.window(x, y), &stats);
    Ok(Match {
        location: (x, y),
        confidence,
    })
}

/// Pixel count, sum and sum of squares of a patch.
#[derive(Clone, Copy, Debug)]
struct PatchSums {
    n: i128,
    sum: i128,
    sum_sq: i128,
}

impl PatchSums {
    fn of(image: &GrayImage) -> Self {
        let (sum, sum_sq) = image
            .as_raw()
            .iter()
            .fold((0i128, 0i128), |(s, sq), &p| (s + p as i128, sq + (p as i128).pow(2)));
        Self {
            n: image.as_raw().len() as i128,
            sum,
            sum_sq,
        }
    }

    /// `n` times the summed squared deviation; zero for a flat patch.
    fn spread(&self) -> i128 {
        self.n * self.sum_sq - self.sum * self.sum
    }

    fn mean(&self) -> f64 {
        self.sum as f64 / self.n as f64
    }
}

/// Summed-area tables of a frame, queried for template-sized windows.
struct FrameIntegrals {
    sum: Image<Luma<u64>>,
    sum_sq: Image<Luma<u64>>,
    window: (u32, u32),
}

impl FrameIntegrals {
    fn new(frame: &GrayImage, window: (u32, u32)) -> Self {
        Self {
            sum: integral_image::<_, u64>(frame),
            sum_sq: integral_squared_image::<_, u64>(frame),
            window,
        }
    }

    fn window(&self, x: u32, y: u32) -> PatchSums {
        let (w, h) = self.window;
        let area = |t: &Image<Luma<u64>>| {
            let corner = |cx, cy| t.get_pixel(cx, cy)[0];
            (corner(x + w, y + h) + corner(x, y) - corner(x + w, y) - corner(x, y + h)) as i128
        };
        PatchSums {
            n: w as i128 * h as i128,
            sum: area(&self.sum),
            sum_sq: area(&self.sum_sq),
        }
    }
}

/// Correlation coefficient of a window given its raw cross term with the template.
///
/// A flat template only matches flat windows, scored by mean brightness.
fn correlation(cross: f64, window: &PatchSums, template: &PatchSums) -> f64 {
    let (a, b) = (window.spread(), template.spread());
    let score = if b == 0 {
        if a == 0 {
            1.0 - (window.mean() - template.mean()).abs() / 255.0
        } else {
            0.0
        }
    } else if a == 0 {
        0.0
    } else {
        let numerator = template.n as f64 * cross - (window.sum * template.sum) as f64;
        numerator / ((a as f64) * (b as f64)).sqrt()
    };
    score.clamp(0.0, 1.0)
}

/// Rescores one offset with an integer cross term.
fn exact_correlation(
    frame: &GrayImage,
    template: &GrayImage,
    (x, y): (u32, u32),
    window: &PatchSums,
    stats: &PatchSums,
) -> f64 {
    let cross: i128 = template
        .enumerate_pixels()
        .map(|(tx, ty, p)| frame.get_pixel(x + tx, y + ty)[0] as i128 * p[0] as i128)
        .sum();

    // Cauchy-Schwarz equality: the window is a linear copy of the template
    let numerator = stats.n * cross - window.sum * stats.sum;
    if numerator > 0 {
        let bound = window.spread().checked_mul(stats.spread());
        if bound.is_some() && numerator.checked_mul(numerator) == bound {
            return 1.0;
        }
    }
    correlation(cross as f64, window, stats)
}
