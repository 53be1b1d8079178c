//! Nonlinear least squares.
//!
//! [`LevenbergMarquardt`] adapts a [`FitModel`] to the `levenberg-marquardt`
//! crate (a MINPACK port on `nalgebra`); the covariance comes from a Cholesky
//! inverse of `JᵀJ` at the optimum.

use super::models::FitModel;
use crate::error::{AppResult, LabError};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt as Minpack};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use ndarray::Array2;
use serde::Serialize;

/// What an optimizer reports besides the parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitDiagnostics {
    /// Residual evaluations made by the solver.
    pub evaluations: usize,
    /// Final sum of squared residuals.
    pub cost: f64,
    /// Whether the convergence criterion was met.
    pub converged: bool,
    /// Human-readable termination reason.
    pub message: String,
}

/// Output of an [`Optimizer`].
#[derive(Debug, Clone)]
pub struct OptimizerOutput {
    /// Best parameters found.
    pub params: Vec<f64>,
    /// Parameter covariance; all entries infinite if it cannot be estimated.
    pub covariance: Array2<f64>,
    /// Termination details.
    pub diagnostics: FitDiagnostics,
}

/// Least-squares solver used by [`NumericalData::fit`](crate::data::NumericalData::fit).
pub trait Optimizer {
    /// Minimize `Σ (y − model(x, p))²` starting from `p0`.
    fn minimize(&self, model: &dyn FitModel, x: &[f64], y: &[f64], p0: &[f64]) -> AppResult<OptimizerOutput>;
}

/// Levenberg–Marquardt with a forward-difference Jacobian.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    /// Relative tolerance on cost decrease and step size.
    pub tolerance: f64,
    /// Evaluation budget, in multiples of `parameters + 1`.
    pub patience: usize,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            tolerance: f64::EPSILON.sqrt(),
            patience: 100,
        }
    }
}

/// Residuals `model(x, p) − y` over the whole data set.
struct ModelProblem<'a> {
    model: &'a dyn FitModel,
    x: &'a [f64],
    y: &'a [f64],
    params: DVector<f64>,
}

impl ModelProblem<'_> {
    fn residuals_at(&self, p: &[f64]) -> DVector<f64> {
        DVector::from_iterator(
            self.x.len(),
            self.x.iter().zip(self.y).map(|(&x, &y)| self.model.eval(x, p) - y),
        )
    }

    fn jacobian_at(&self, p: &[f64]) -> DMatrix<f64> {
        let base = self.residuals_at(p);
        let mut jac = DMatrix::zeros(self.x.len(), p.len());
        let mut shifted = p.to_vec();
        for j in 0..p.len() {
            let h = f64::EPSILON.sqrt() * p[j].abs().max(1.0);
            shifted[j] = p[j] + h;
            let column = (self.residuals_at(&shifted) - &base) / h;
            jac.set_column(j, &column);
            shifted[j] = p[j];
        }
        jac
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for ModelProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, p: &DVector<f64>) {
        self.params.copy_from(p);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.residuals_at(self.params.as_slice()))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        Some(self.jacobian_at(self.params.as_slice()))
    }
}

/// `σ² (JᵀJ)⁻¹`, or `None` when `JᵀJ` is singular.
fn covariance_matrix(jac: &DMatrix<f64>, variance: f64) -> Option<DMatrix<f64>> {
    let jtj = jac.transpose() * jac;
    let inverse = match jtj.clone().cholesky() {
        Some(c) => c.inverse(),
        None => jtj.try_inverse()?,
    };
    inverse.iter().all(|v| v.is_finite()).then(|| inverse * variance)
}

impl Optimizer for LevenbergMarquardt {
    fn minimize(&self, model: &dyn FitModel, x: &[f64], y: &[f64], p0: &[f64]) -> AppResult<OptimizerOutput> {
        let n = x.len();
        let m = p0.len();
        if y.len() != n {
            return Err(LabError::Fit(format!("x and y differ in length ({n} != {})", y.len())));
        }
        if n < m {
            return Err(LabError::Fit(format!(
                "{n} data points cannot determine {m} parameters"
            )));
        }

        let problem = ModelProblem {
            model,
            x,
            y,
            params: DVector::from_column_slice(p0),
        };
        if !problem.residuals_at(p0).iter().all(|r| r.is_finite()) {
            return Err(LabError::Fit("model is not finite at the initial parameters".into()));
        }

        let (problem, report) = Minpack::new()
            .with_ftol(self.tolerance)
            .with_xtol(self.tolerance)
            .with_patience(self.patience)
            .minimize(problem);
        if report.termination.was_usage_issue() {
            return Err(LabError::Fit(format!("optimizer rejected the problem: {:?}", report.termination)));
        }

        let p = problem.params.as_slice().to_vec();
        let cost = problem.residuals_at(&p).norm_squared();
        let covariance = (n > m)
            .then(|| covariance_matrix(&problem.jacobian_at(&p), cost / (n - m) as f64))
            .flatten()
            .map(|c| Array2::from_shape_fn((m, m), |(i, j)| c[(i, j)]))
            .unwrap_or_else(|| Array2::from_elem((m, m), f64::INFINITY));

        Ok(OptimizerOutput {
            params: p,
            covariance,
            diagnostics: FitDiagnostics {
                evaluations: report.number_of_evaluations,
                cost,
                converged: report.termination.was_successful(),
                message: format!("{:?}", report.termination),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::{Lorentzian, PeakGuessOptions};

    #[derive(Debug)]
    struct Line;

    impl FitModel for Line {
        fn name(&self) -> &'static str {
            "line"
        }

        fn param_names(&self) -> &'static [&'static str] {
            &["slope", "intercept"]
        }

        fn eval(&self, x: f64, p: &[f64]) -> f64 {
            p[0] * x + p[1]
        }

        fn guess(&self, _x: &[f64], _y: &[f64], _options: &PeakGuessOptions) -> AppResult<Vec<f64>> {
            Ok(vec![0.0, 0.0])
        }
    }

    #[test]
    fn fits_a_line_exactly() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [1.0, 3.0, 5.0, 7.0];
        let out = LevenbergMarquardt::default()
            .minimize(&Line, &x, &y, &[0.0, 0.0])
            .unwrap();
        assert!((out.params[0] - 2.0).abs() < 1e-6);
        assert!((out.params[1] - 1.0).abs() < 1e-6);
        assert!(out.diagnostics.converged);
        assert!(out.diagnostics.cost < 1e-10);
    }

    #[test]
    fn lorentzian_from_an_offset_start() {
        let truth = [3.0, 1.3, 2.7, 0.5];
        let x: Vec<f64> = (0..200).map(|i| i as f64 * 0.03).collect();
        let y: Vec<f64> = x.iter().map(|&x| Lorentzian.eval(x, &truth)).collect();
        let out = LevenbergMarquardt::default()
            .minimize(&Lorentzian, &x, &y, &[2.5, 1.0, 2.9, 0.4])
            .unwrap();
        for (fitted, expected) in out.params.iter().zip(truth) {
            assert!((fitted - expected).abs() < 1e-5, "{fitted} vs {expected}");
        }
    }

    #[test]
    fn covariance_scales_with_noise() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.0];
        let y = [1.1, 2.9, 5.1, 6.9, 9.1];
        let out = LevenbergMarquardt::default()
            .minimize(&Line, &x, &y, &[0.0, 0.0])
            .unwrap();
        assert!(out.covariance.iter().all(|v| v.is_finite()));
        assert!(out.covariance[[0, 0]] > 0.0);
        assert!((out.covariance[[0, 1]] - out.covariance[[1, 0]]).abs() < 1e-12);
    }

    #[test]
    fn covariance_is_infinite_without_spare_points() {
        let out = LevenbergMarquardt::default()
            .minimize(&Line, &[0.0, 1.0], &[1.0, 2.0], &[0.0, 0.0])
            .unwrap();
        assert!(out.covariance.iter().all(|v| v.is_infinite()));
    }

    #[test]
    fn too_few_points() {
        assert!(LevenbergMarquardt::default()
            .minimize(&Line, &[0.0], &[1.0], &[0.0, 0.0])
            .is_err());
    }
}
