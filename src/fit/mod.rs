//! Curve fitting of one-dimensional containers.
//!
//! A [`FitModel`] supplies parameter names, the model function and an initial
//! guess; an [`Optimizer`] does the least-squares minimization. The independent
//! variable is the container's x axis (positions if it has none), the dependent
//! variable its samples.
//!
//! ```
//! use labframe::data::NumericalData;
//! use labframe::fit::{FitModel, Lorentzian};
//!
//! let x: Vec<f64> = (0..301).map(|i| i as f64 * 0.02).collect();
//! let y: Vec<f64> = x.iter().map(|&x| Lorentzian.eval(x, &[1.0, 0.4, 3.0, 0.1])).collect();
//! let data = NumericalData::from_vec(y).with_x_axis(x).unwrap();
//!
//! let result = data.fit(Lorentzian).unwrap();
//! assert!((result.param("center").unwrap() - 3.0).abs() < 1e-6);
//! assert!((result.param("linewidth").unwrap() - 0.4).abs() < 1e-6);
//! ```

mod guess;
mod models;
mod optimizer;

pub use guess::{guess_peak, profile_crossing, Baseline, PeakEstimate, PeakGuessOptions};
pub use models::{FitModel, Gaussian, Lorentzian, PeakModel};
pub use optimizer::{FitDiagnostics, LevenbergMarquardt, Optimizer, OptimizerOutput};

use crate::data::NumericalData;
use crate::error::{AppResult, LabError};
use indexmap::IndexMap;
use ndarray::Array2;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Starting point and guess tuning for a fit.
#[derive(Debug, Clone, Default)]
pub struct FitOptions {
    /// Initial parameters in model order; guessed when absent.
    pub initial: Option<Vec<f64>>,
    /// Tuning of the automatic guess.
    pub guess: PeakGuessOptions,
}

impl FitOptions {
    /// Start from explicit parameters.
    pub fn starting_at(initial: Vec<f64>) -> Self {
        Self {
            initial: Some(initial),
            ..Self::default()
        }
    }
}

/// Fitted parameters with their covariance, the model and optimizer diagnostics.
#[derive(Debug, Clone)]
pub struct FitResult {
    params: IndexMap<String, f64>,
    covariance: Array2<f64>,
    model: Arc<dyn FitModel>,
    diagnostics: FitDiagnostics,
}

impl FitResult {
    /// Parameters by name, in model order.
    pub fn params(&self) -> &IndexMap<String, f64> {
        &self.params
    }

    /// One parameter.
    pub fn param(&self, name: &str) -> Option<f64> {
        self.params.get(name).copied()
    }

    /// Parameter values in model order.
    pub fn values(&self) -> Vec<f64> {
        self.params.values().copied().collect()
    }

    /// Parameter covariance matrix.
    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    /// One-sigma uncertainties (square roots of the covariance diagonal).
    pub fn std_errors(&self) -> IndexMap<String, f64> {
        self.params
            .keys()
            .zip(self.covariance.diag())
            .map(|(k, v)| (k.clone(), v.sqrt()))
            .collect()
    }

    /// The fitted model.
    pub fn model(&self) -> &dyn FitModel {
        self.model.as_ref()
    }

    /// Optimizer diagnostics.
    pub fn diagnostics(&self) -> &FitDiagnostics {
        &self.diagnostics
    }

    /// Fitted model at `x`.
    pub fn eval(&self, x: f64) -> f64 {
        self.model.eval(x, &self.values())
    }

    /// Fitted model over `xs`.
    pub fn curve(&self, xs: &[f64]) -> Vec<f64> {
        let p = self.values();
        xs.iter().map(|&x| self.model.eval(x, &p)).collect()
    }

    /// Container of the fitted curve on the x axis of `data`.
    pub fn curve_data(&self, data: &NumericalData) -> AppResult<NumericalData> {
        let (x, _) = fit_inputs(data)?;
        let mut curve = NumericalData::from_vec(self.curve(&x)).with_x_axis(x)?;
        curve.metadata = data.metadata.clone();
        curve.insert_metadata("fit_model", self.model.name());
        Ok(curve)
    }
}

impl fmt::Display for FitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} fit ({}, cost {:.4e}, {} evaluations)",
            self.model.name(),
            if self.diagnostics.converged { "converged" } else { "not converged" },
            self.diagnostics.cost,
            self.diagnostics.evaluations
        )?;
        for (name, err) in self.std_errors() {
            writeln!(f, "  {name:>10} = {:.6e} ± {err:.2e}", self.params[&name])?;
        }
        Ok(())
    }
}

fn fit_inputs(data: &NumericalData) -> AppResult<(Vec<f64>, Vec<f64>)> {
    if data.rank() != 1 {
        return Err(LabError::Fit(format!(
            "can only fit 1-dimensional data, got rank {}",
            data.rank()
        )));
    }
    let x = match data.x_axis() {
        Some(axis) => axis
            .to_numeric()
            .ok_or_else(|| LabError::Fit("x axis is not numeric".into()))?
            .to_vec(),
        None => (0..data.len()).map(|i| i as f64).collect(),
    };
    Ok((x, data.samples().iter().copied().collect()))
}

impl NumericalData {
    /// Fit `model` with a guessed start and [`LevenbergMarquardt`].
    pub fn fit<M: FitModel + 'static>(&self, model: M) -> AppResult<FitResult> {
        self.fit_with(model, &FitOptions::default(), &LevenbergMarquardt::default())
    }

    /// Fit `model` with explicit options and optimizer.
    pub fn fit_with<M: FitModel + 'static>(
        &self,
        model: M,
        options: &FitOptions,
        optimizer: &dyn Optimizer,
    ) -> AppResult<FitResult> {
        let (x, y) = fit_inputs(self)?;
        let names = model.param_names();
        let p0 = match &options.initial {
            Some(p) => p.clone(),
            None => model.guess(&x, &y, &options.guess)?,
        };
        if p0.len() != names.len() {
            return Err(LabError::Fit(format!(
                "{} expects {} parameters, got {}",
                model.name(),
                names.len(),
                p0.len()
            )));
        }
        debug!(model = model.name(), initial = ?p0, "starting fit");

        let out = optimizer.minimize(&model, &x, &y, &p0)?;
        if !out.diagnostics.converged {
            warn!(model = model.name(), message = %out.diagnostics.message, "fit did not converge");
        }
        debug!(
            model = model.name(),
            cost = out.diagnostics.cost,
            evaluations = out.diagnostics.evaluations,
            "fit finished"
        );

        Ok(FitResult {
            params: names.iter().map(|n| n.to_string()).zip(out.params).collect(),
            covariance: out.covariance,
            model: Arc::new(model),
            diagnostics: out.diagnostics,
        })
    }

    /// Initial parameters `model` would start from.
    pub fn guess_params<M: FitModel>(&self, model: &M, options: &PeakGuessOptions) -> AppResult<Vec<f64>> {
        let (x, y) = fit_inputs(self)?;
        model.guess(&x, &y, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian_data() -> NumericalData {
        let x: Vec<f64> = (0..200).map(|i| -5.0 + i as f64 * 0.05).collect();
        let y: Vec<f64> = x.iter().map(|&x| Gaussian.eval(x, &[2.0, 0.3, 0.7, -0.2])).collect();
        NumericalData::from_vec(y).with_x_axis(x).unwrap()
    }

    #[test]
    fn gaussian_fit_recovers_parameters() {
        let result = gaussian_data().fit(Gaussian).unwrap();
        assert!(result.diagnostics().converged);
        assert!((result.param("amplitude").unwrap() - 2.0).abs() < 1e-6);
        assert!((result.param("sigma").unwrap().abs() - 0.7).abs() < 1e-6);
        assert!((result.eval(0.3) - 1.8).abs() < 1e-6);
        assert_eq!(result.params().keys().collect::<Vec<_>>(), ["amplitude", "center", "sigma", "offset"]);
    }

    #[test]
    fn explicit_start_must_match_the_model() {
        let err = gaussian_data()
            .fit_with(Gaussian, &FitOptions::starting_at(vec![1.0]), &LevenbergMarquardt::default())
            .unwrap_err();
        assert!(matches!(err, LabError::Fit(_)));
    }

    #[test]
    fn only_one_dimensional_data() {
        let data = NumericalData::from_shape_vec(&[2, 2], vec![0.0; 4]).unwrap();
        assert!(matches!(data.fit(Lorentzian), Err(LabError::Fit(_))));
    }

    #[test]
    fn curve_follows_the_data_axis() {
        let data = gaussian_data();
        let result = data.fit(Gaussian).unwrap();
        let curve = result.curve_data(&data).unwrap();
        assert_eq!(curve.shape(), data.shape());
        assert_eq!(curve.x_axis(), data.x_axis());
        assert!(result.to_string().contains("gaussian fit"));
    }
}
