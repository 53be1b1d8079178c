//! Initial-parameter heuristics for peak-shaped models.

use crate::error::{AppResult, LabError};

/// How the baseline under a peak is estimated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Baseline {
    /// Smallest (smoothed) sample.
    Minimum,
    /// Split the samples into `bins` contiguous bins, drop the bin holding the
    /// peak and take the lowest bin mean.
    BinnedLowest {
        /// Number of bins (at least 2 to have a bin without the peak).
        bins: usize,
    },
}

/// Tuning of [`guess_peak`].
#[derive(Debug, Clone, PartialEq)]
pub struct PeakGuessOptions {
    /// Moving-average window in samples; 0 or 1 disables smoothing.
    pub smoothing: usize,
    /// Baseline estimate.
    pub baseline: Baseline,
    /// Fraction of the peak height at which the width is measured.
    pub threshold: f64,
    /// A crossing at most this far from the peak counts as missing and the other
    /// side is mirrored.
    pub edge_tolerance: f64,
    /// Use the narrower side instead of the mean of both (for closely spaced peaks).
    pub closest_side: bool,
}

impl Default for PeakGuessOptions {
    fn default() -> Self {
        Self {
            smoothing: 0,
            baseline: Baseline::Minimum,
            threshold: 0.5,
            edge_tolerance: 0.0,
            closest_side: false,
        }
    }
}

/// Model-independent description of the highest peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakEstimate {
    /// Peak position.
    pub center: f64,
    /// Height above the baseline.
    pub height: f64,
    /// Baseline level.
    pub offset: f64,
    /// Distance from the center to where the peak falls to `threshold * height`.
    pub width_at_threshold: f64,
    /// Threshold the width was measured at.
    pub threshold: f64,
}

impl PeakEstimate {
    /// Half width at half maximum, given the normalized profile of the model
    /// (`profile(0) == 1`, `profile(1) == 0.5`, decreasing).
    pub fn half_width(&self, profile: impl Fn(f64) -> f64) -> f64 {
        self.width_at_threshold / profile_crossing(profile, self.threshold)
    }
}

/// Where a normalized profile falls to `threshold`, in units of its half width.
pub fn profile_crossing(profile: impl Fn(f64) -> f64, threshold: f64) -> f64 {
    if (threshold - 0.5).abs() < f64::EPSILON {
        return 1.0;
    }
    let mut lo = 0.0;
    let mut hi = 1.0;
    let mut guard = 0;
    while profile(hi) > threshold && guard < 64 {
        lo = hi;
        hi *= 2.0;
        guard += 1;
    }
    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        if profile(mid) > threshold {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

fn smooth(y: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 {
        return y.to_vec();
    }
    let half = window / 2;
    (0..y.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(y.len());
            y[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
        })
        .collect()
}

fn argmax(y: &[f64]) -> usize {
    y.iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| {
            if v > bv {
                (i, v)
            } else {
                (bi, bv)
            }
        })
        .0
}

fn baseline(y: &[f64], peak: usize, method: Baseline) -> f64 {
    let minimum = || y.iter().copied().fold(f64::INFINITY, f64::min);
    match method {
        Baseline::Minimum => minimum(),
        Baseline::BinnedLowest { bins } => {
            let bins = bins.clamp(1, y.len());
            let size = y.len().div_ceil(bins);
            y.chunks(size)
                .enumerate()
                .filter(|(b, _)| peak / size != *b)
                .map(|(_, chunk)| chunk.iter().sum::<f64>() / chunk.len() as f64)
                .fold(None, |best: Option<f64>, m| Some(best.map_or(m, |b| b.min(m))))
                .unwrap_or_else(minimum)
        }
    }
}

fn interpolate(x0: f64, y0: f64, x1: f64, y1: f64, level: f64) -> f64 {
    if y1 == y0 {
        return x0;
    }
    x0 + (level - y0) * (x1 - x0) / (y1 - y0)
}

/// Vertex of the parabola through the maximum and its neighbours.
fn refine_center(x: &[f64], y: &[f64], i: usize) -> f64 {
    if i == 0 || i + 1 >= x.len() {
        return x[i];
    }
    let (x0, x1, x2) = (x[i - 1], x[i], x[i + 1]);
    let (y0, y1, y2) = (y[i - 1], y[i], y[i + 1]);
    let denom = (x0 - x1) * (x0 - x2) * (x1 - x2);
    if denom == 0.0 {
        return x1;
    }
    let a = (x2 * (y1 - y0) + x1 * (y0 - y2) + x0 * (y2 - y1)) / denom;
    let b = (x2 * x2 * (y0 - y1) + x1 * x1 * (y2 - y0) + x0 * x0 * (y1 - y2)) / denom;
    if a >= 0.0 {
        return x1;
    }
    let vertex = -b / (2.0 * a);
    vertex.clamp(x0.min(x2), x0.max(x2))
}

/// Locate the highest peak of `y(x)` and measure its width.
///
/// ```
/// use labframe::fit::{guess_peak, PeakGuessOptions};
///
/// let x: Vec<f64> = (0..201).map(|i| i as f64 * 0.05).collect();
/// let y: Vec<f64> = x.iter().map(|&x| 1.0 / (1.0 + ((x - 5.0) / 0.5).powi(2))).collect();
/// let peak = guess_peak(&x, &y, &PeakGuessOptions::default()).unwrap();
/// assert!((peak.center - 5.0).abs() < 0.05);
/// assert!((peak.width_at_threshold - 0.5).abs() < 0.025);
/// ```
pub fn guess_peak(x: &[f64], y: &[f64], options: &PeakGuessOptions) -> AppResult<PeakEstimate> {
    if x.len() != y.len() {
        return Err(LabError::Fit(format!(
            "x and y differ in length ({} != {})",
            x.len(),
            y.len()
        )));
    }
    if y.len() < 3 {
        return Err(LabError::Fit("need at least 3 samples to locate a peak".into()));
    }
    if !(options.threshold > 0.0 && options.threshold < 1.0) {
        return Err(LabError::Fit(format!(
            "threshold must lie strictly between 0 and 1, got {}",
            options.threshold
        )));
    }

    let s = smooth(y, options.smoothing);
    let peak = argmax(&s);
    let offset = baseline(&s, peak, options.baseline);
    let height = s[peak] - offset;
    if !(height > 0.0) {
        return Err(LabError::Fit("data has no peak above its baseline".into()));
    }
    let level = offset + options.threshold * height;

    let left = (1..=peak)
        .rev()
        .find(|&i| s[i - 1] < level && s[i] >= level)
        .map(|i| interpolate(x[i - 1], s[i - 1], x[i], s[i], level));
    let right = (peak..s.len() - 1)
        .find(|&i| s[i + 1] < level && s[i] >= level)
        .map(|i| interpolate(x[i], s[i], x[i + 1], s[i + 1], level));

    let apex = x[peak];
    let usable = |d: f64| (d > options.edge_tolerance).then_some(d);
    let dl = left.map(|xl| (apex - xl).abs()).and_then(usable);
    let dr = right.map(|xr| (xr - apex).abs()).and_then(usable);
    let width = match (dl, dr) {
        (Some(l), Some(r)) if options.closest_side => l.min(r),
        (Some(l), Some(r)) => 0.5 * (l + r),
        (Some(w), None) | (None, Some(w)) => w,
        (None, None) => {
            return Err(LabError::Fit(
                "peak does not fall to the threshold on either side".into(),
            ))
        }
    };

    Ok(PeakEstimate {
        center: refine_center(x, &s, peak),
        height,
        offset,
        width_at_threshold: width,
        threshold: options.threshold,
    })
}
