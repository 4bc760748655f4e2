//! Poisson regression with a log link, fitted by iteratively reweighted
//! least squares.
//!
//! The design always gets an intercept column. Each iteration solves the
//! weighted normal equations `X'WX b = X'Wz` with a Cholesky factorization.
//! Rank is checked once up front with an SVD so collinear covariates fail
//! loudly instead of producing arbitrary coefficients.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Default IRLS iteration cap.
pub const DEFAULT_MAX_ITERATIONS: usize = 25;

/// Default relative deviance change that counts as converged.
pub const DEFAULT_TOLERANCE: f64 = 1e-8;

/// Errors raised while fitting or applying a Poisson model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GlmError {
    /// The design has no rows.
    #[error("Design matrix has no rows")]
    EmptyDesign,

    /// Row or column counts disagree.
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected length.
        expected: usize,
        /// Actual length.
        found: usize,
    },

    /// A response is negative.
    #[error("Response {value} at row {row} is negative")]
    NegativeResponse {
        /// Row index.
        row: usize,
        /// Offending value.
        value: f64,
    },

    /// A design or response value is NaN or infinite.
    #[error("Non-finite input at row {row}")]
    NonFiniteInput {
        /// Row index.
        row: usize,
    },

    /// The design (with intercept) does not have full column rank.
    #[error("Design matrix is rank deficient: rank {rank} of {columns} columns")]
    RankDeficient {
        /// Numerical rank.
        rank: usize,
        /// Columns including the intercept.
        columns: usize,
    },

    /// The weighted normal equations could not be factorized.
    #[error("Weighted normal equations are singular at iteration {0}")]
    Singular(usize),

    /// Coefficients became non-finite.
    #[error("IRLS diverged at iteration {0}")]
    Diverged(usize),
}

/// IRLS settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoissonRegression {
    /// Iteration cap.
    pub max_iterations: usize,
    /// Relative deviance change threshold.
    pub tolerance: f64,
}

impl Default for PoissonRegression {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// A fitted Poisson model.
#[derive(Debug, Clone, PartialEq)]
pub struct PoissonFit {
    /// Intercept on the log scale.
    pub intercept: f64,
    /// One coefficient per design column, log scale.
    pub coefficients: Vec<f64>,
    /// Residual deviance at the final iterate.
    pub deviance: f64,
    /// Iterations performed.
    pub iterations: usize,
    /// Whether the deviance converged before the iteration cap.
    pub converged: bool,
}

impl PoissonRegression {
    /// Fits `log E[y] = b0 + x b` to the rows of `x`.
    ///
    /// Hitting the iteration cap is not an error: the last iterate is
    /// returned with `converged == false` and a warning is logged.
    ///
    /// # Errors
    ///
    /// Returns a [`GlmError`] for empty, mismatched, non-finite, negative,
    /// or rank-deficient input, and if IRLS breaks down numerically.
    pub fn fit(&self, x: &DMatrix<f64>, y: &[f64]) -> Result<PoissonFit, GlmError> {
        let n = x.nrows();
        if n == 0 {
            return Err(GlmError::EmptyDesign);
        }
        if y.len() != n {
            return Err(GlmError::DimensionMismatch {
                expected: n,
                found: y.len(),
            });
        }
        validate_inputs(x, y)?;

        let columns = x.ncols() + 1;
        let design = DMatrix::from_fn(n, columns, |i, j| if j == 0 { 1.0 } else { x[(i, j - 1)] });

        let rank = numerical_rank(&design);
        if rank < columns {
            return Err(GlmError::RankDeficient { rank, columns });
        }

        let y = DVector::from_column_slice(y);
        let mut mu = y.map(|v| v + 0.1);
        let mut eta = mu.map(f64::ln);
        let mut deviance = poisson_deviance(&y, &mu);
        let mut beta = DVector::zeros(columns);
        let mut converged = false;
        let mut iterations = 0;

        while iterations < self.max_iterations {
            iterations += 1;

            let mut xtwx = DMatrix::<f64>::zeros(columns, columns);
            let mut xtwz = DVector::<f64>::zeros(columns);
            for i in 0..n {
                let w = mu[i];
                let z = eta[i] + (y[i] - mu[i]) / mu[i];
                for a in 0..columns {
                    let wa = w * design[(i, a)];
                    xtwz[a] += wa * z;
                    for b in 0..=a {
                        xtwx[(a, b)] += wa * design[(i, b)];
                    }
                }
            }
            xtwx.fill_upper_triangle_with_lower_triangle();

            let Some(cholesky) = xtwx.cholesky() else {
                return Err(GlmError::Singular(iterations));
            };
            beta = cholesky.solve(&xtwz);
            if beta.iter().any(|b| !b.is_finite()) {
                return Err(GlmError::Diverged(iterations));
            }

            eta = &design * &beta;
            mu = eta.map(|e| e.exp().max(f64::EPSILON));

            let next = poisson_deviance(&y, &mu);
            let change = (next - deviance).abs() / (next.abs() + 0.1);
            deviance = next;
            if change < self.tolerance {
                converged = true;
                break;
            }
        }

        if !converged {
            log::warn!(
                "Poisson IRLS did not converge after {iterations} iterations (deviance {deviance:.4})"
            );
        }

        Ok(PoissonFit {
            intercept: beta[0],
            coefficients: beta.iter().skip(1).copied().collect(),
            deviance,
            iterations,
            converged,
        })
    }
}

impl PoissonFit {
    /// Expected counts `exp(b0 + x b)` for each row of `x`.
    ///
    /// # Errors
    ///
    /// Returns [`GlmError::DimensionMismatch`] if `x` has the wrong number of
    /// columns, or [`GlmError::NonFiniteInput`] for NaN or infinite rows.
    pub fn predict(&self, x: &DMatrix<f64>) -> Result<Vec<f64>, GlmError> {
        if x.ncols() != self.coefficients.len() {
            return Err(GlmError::DimensionMismatch {
                expected: self.coefficients.len(),
                found: x.ncols(),
            });
        }

        x.row_iter()
            .enumerate()
            .map(|(row, values)| {
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(GlmError::NonFiniteInput { row });
                }
                let eta = values
                    .iter()
                    .zip(&self.coefficients)
                    .fold(self.intercept, |acc, (v, b)| v.mul_add(*b, acc));
                Ok(eta.exp())
            })
            .collect()
    }
}

fn validate_inputs(x: &DMatrix<f64>, y: &[f64]) -> Result<(), GlmError> {
    for (row, &value) in y.iter().enumerate() {
        if !value.is_finite() || x.row(row).iter().any(|v| !v.is_finite()) {
            return Err(GlmError::NonFiniteInput { row });
        }
        if value < 0.0 {
            return Err(GlmError::NegativeResponse { row, value });
        }
    }
    Ok(())
}

/// Counts singular values above `max(s) * max(rows, cols) * eps`.
#[allow(clippy::cast_precision_loss)]
fn numerical_rank(design: &DMatrix<f64>) -> usize {
    let singular_values = design.clone().svd(false, false).singular_values;
    let largest = singular_values.max();
    let tolerance = largest * design.nrows().max(design.ncols()) as f64 * f64::EPSILON;
    singular_values.iter().filter(|&&s| s > tolerance).count()
}

fn poisson_deviance(y: &DVector<f64>, mu: &DVector<f64>) -> f64 {
    2.0 * y
        .iter()
        .zip(mu.iter())
        .map(|(&obs, &fit)| {
            let log_term = if obs > 0.0 { obs * (obs / fit).ln() } else { 0.0 };
            log_term - (obs - fit)
        })
        .sum::<f64>()
}
