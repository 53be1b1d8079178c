//! Fit model definitions.

use super::guess::{guess_peak, PeakEstimate, PeakGuessOptions};
use crate::error::AppResult;
use std::f64::consts::{LN_2, PI};
use std::fmt;

/// A model function with named parameters and a way to guess them.
pub trait FitModel: fmt::Debug + Send + Sync {
    /// Short model name.
    fn name(&self) -> &'static str;

    /// Parameter names, in the order `eval` expects them.
    fn param_names(&self) -> &'static [&'static str];

    /// Model value at `x`.
    fn eval(&self, x: f64, params: &[f64]) -> f64;

    /// Initial parameters from raw samples.
    fn guess(&self, x: &[f64], y: &[f64], options: &PeakGuessOptions) -> AppResult<Vec<f64>>;
}

/// Peak-shaped model whose parameters follow from center, height, half width and baseline.
pub trait PeakModel: FitModel {
    /// Peak shape normalized to 1 at the center and 0.5 at one half width.
    fn profile(&self, u: f64) -> f64;

    /// Model parameters for a peak with the given half width at half maximum.
    fn params_from_peak(&self, peak: &PeakEstimate, hwhm: f64) -> Vec<f64>;

    /// Guess through [`guess_peak`], correcting the width for the threshold used.
    fn guess_from_peak(&self, x: &[f64], y: &[f64], options: &PeakGuessOptions) -> AppResult<Vec<f64>> {
        let peak = guess_peak(x, y, options)?;
        let hwhm = peak.half_width(|u| self.profile(u));
        Ok(self.params_from_peak(&peak, hwhm))
    }
}

/// Lorentzian line: `offset + (2/π)·area·linewidth / (4(x − center)² + linewidth²)`.
///
/// `linewidth` is the full width at half maximum.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lorentzian;

impl FitModel for Lorentzian {
    fn name(&self) -> &'static str {
        "lorentzian"
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["area", "linewidth", "center", "offset"]
    }

    fn eval(&self, x: f64, p: &[f64]) -> f64 {
        let (area, linewidth, center, offset) = (p[0], p[1], p[2], p[3]);
        offset + (2.0 / PI) * area * linewidth / (4.0 * (x - center).powi(2) + linewidth.powi(2))
    }

    fn guess(&self, x: &[f64], y: &[f64], options: &PeakGuessOptions) -> AppResult<Vec<f64>> {
        self.guess_from_peak(x, y, options)
    }
}

impl PeakModel for Lorentzian {
    fn profile(&self, u: f64) -> f64 {
        1.0 / (1.0 + u * u)
    }

    fn params_from_peak(&self, peak: &PeakEstimate, hwhm: f64) -> Vec<f64> {
        let linewidth = 2.0 * hwhm;
        let area = peak.height * PI * linewidth / 2.0;
        vec![area, linewidth, peak.center, peak.offset]
    }
}

/// Gaussian line: `offset + amplitude·exp(−(x − center)² / (2σ²))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gaussian;

impl FitModel for Gaussian {
    fn name(&self) -> &'static str {
        "gaussian"
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["amplitude", "center", "sigma", "offset"]
    }

    fn eval(&self, x: f64, p: &[f64]) -> f64 {
        let (amplitude, center, sigma, offset) = (p[0], p[1], p[2], p[3]);
        offset + amplitude * (-(x - center).powi(2) / (2.0 * sigma * sigma)).exp()
    }

    fn guess(&self, x: &[f64], y: &[f64], options: &PeakGuessOptions) -> AppResult<Vec<f64>> {
        self.guess_from_peak(x, y, options)
    }
}

impl PeakModel for Gaussian {
    fn profile(&self, u: f64) -> f64 {
        (-LN_2 * u * u).exp()
    }

    fn params_from_peak(&self, peak: &PeakEstimate, hwhm: f64) -> Vec<f64> {
        let sigma = hwhm / (2.0 * LN_2).sqrt();
        vec![peak.height, peak.center, sigma, peak.offset]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lorentzian_peak_height_and_width() {
        let p = [PI, 2.0, 1.0, 0.5];
        // height = 2·area/(π·linewidth) = 1
        assert!((Lorentzian.eval(1.0, &p) - 1.5).abs() < 1e-12);
        assert!((Lorentzian.eval(2.0, &p) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn profiles_are_half_at_one() {
        assert!((Lorentzian.profile(1.0) - 0.5).abs() < 1e-12);
        assert!((Gaussian.profile(1.0) - 0.5).abs() < 1e-12);
    }

    fn within(estimate: f64, truth: f64, fraction: f64) -> bool {
        (estimate - truth).abs() <= fraction * truth.abs()
    }

    #[test]
    fn lorentzian_guess_of_an_interior_peak() {
        let truth = [3.0, 1.3, 2.7, 0.5];
        let x: Vec<f64> = (0..6501).map(|i| -30.0 + i as f64 * 0.01).collect();
        let y: Vec<f64> = x.iter().map(|&x| Lorentzian.eval(x, &truth)).collect();
        let p = Lorentzian.guess(&x, &y, &PeakGuessOptions::default()).unwrap();
        assert!(within(p[2], 2.7, 0.05), "center {}", p[2]);
        assert!(within(p[1] / 2.0, 0.65, 0.05), "half width {}", p[1] / 2.0);
        assert!(within(p[0], 3.0, 0.05), "area {}", p[0]);
    }

    #[test]
    fn gaussian_guess_of_an_interior_peak() {
        let truth = [2.0, 0.3, 0.7, -0.2];
        let x: Vec<f64> = (0..1001).map(|i| -5.0 + i as f64 * 0.01).collect();
        let y: Vec<f64> = x.iter().map(|&x| Gaussian.eval(x, &truth)).collect();
        let p = Gaussian.guess(&x, &y, &PeakGuessOptions::default()).unwrap();
        let hwhm = 0.7 * (2.0 * LN_2).sqrt();
        assert!(within(p[1], 0.3, 0.05), "center {}", p[1]);
        assert!(within(p[2] * (2.0 * LN_2).sqrt(), hwhm, 0.05), "half width");
        assert!(within(p[0], 2.0, 0.05), "height {}", p[0]);
    }

    #[test]
    fn gaussian_parameters_from_peak() {
        let peak = PeakEstimate {
            center: 3.0,
            height: 2.0,
            offset: 0.1,
            width_at_threshold: 1.0,
            threshold: 0.5,
        };
        let p = Gaussian.params_from_peak(&peak, 1.0);
        assert!((Gaussian.eval(4.0, &p) - (0.1 + 1.0)).abs() < 1e-12);
    }
}
