//! The "ESTIMATION" Engine - Additive Unscented Kalman Filter and Smoother
//!
//! Sigma points replace the first-order linearisation of an EKF: the
//! transition and observation functions are evaluated at `2n+1` points around
//! the current mean and the results are recombined into moments.
//!
//! The engine is model-agnostic. It sees the motion and observation models
//! only as `Fn(&DVector<f64>) -> DVector<f64>` and gets its square roots and
//! solves from an [`SpdDecomposition`].
//!
//! Pipeline per track:
//! 1. **Forward pass**: predict through the transition function, correct with
//!    each measurement.
//! 2. **Backward pass**: revisit filtered moments in reverse and fold in the
//!    following step's smoothed estimate (unscented RTS smoother).

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{LinalgError, SmoothingError, SmoothingPhase};
use crate::travia_linalg::{is_finite, symmetrize, CholeskyDecomposition, SpdDecomposition};

// ============================================================================
// SIGMA POINT SCALING
// ============================================================================

/// Scaling of the symmetric sigma-point set.
///
/// `λ = α²(n + κ) − n`, points at `μ ± √(n + λ)·Sᵢ`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SigmaParams {
    /// Spread of the points around the mean
    pub alpha: f64,

    /// Prior knowledge of the distribution (2 is optimal for Gaussians)
    pub beta: f64,

    /// Secondary scaling parameter
    pub kappa: f64,
}

impl Default for SigmaParams {
    /// `α = 0.5, β = 2, κ = 0`. The tight spread keeps the points close to
    /// the mean where `cos(θ+δ)` is nearly linear.
    fn default() -> Self {
        Self {
            alpha: 0.5,
            beta: 2.0,
            kappa: 0.0,
        }
    }
}

impl SigmaParams {
    /// Composite scaling λ for an `n`-dimensional state.
    pub fn lambda(&self, n: usize) -> f64 {
        self.alpha * self.alpha * (n as f64 + self.kappa) - n as f64
    }

    /// Mean and covariance weights for the `2n+1` points.
    pub fn weights(&self, n: usize) -> (DVector<f64>, DVector<f64>) {
        let lambda = self.lambda(n);
        let c = n as f64 + lambda;

        let mut weights_mean = DVector::from_element(2 * n + 1, 0.5 / c);
        weights_mean[0] = lambda / c;

        let mut weights_covariance = weights_mean.clone();
        weights_covariance[0] = lambda / c + (1.0 - self.alpha * self.alpha + self.beta);

        (weights_mean, weights_covariance)
    }
}

// ============================================================================
// MOMENTS & SIGMA POINTS
// ============================================================================

/// Mean and covariance of a multivariate normal.
#[derive(Debug, Clone, PartialEq)]
pub struct Moments {
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
}

impl Moments {
    pub fn new(mean: DVector<f64>, covariance: DMatrix<f64>) -> Self {
        Self { mean, covariance }
    }

    fn is_finite(&self) -> bool {
        self.mean.iter().all(|v| v.is_finite()) && is_finite(&self.covariance)
    }
}

/// A weighted sigma-point set, one point per row.
#[derive(Debug, Clone)]
pub struct SigmaPoints {
    pub points: DMatrix<f64>,
    pub weights_mean: DVector<f64>,
    pub weights_covariance: DVector<f64>,
}

impl SigmaPoints {
    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.nrows()
    }

    /// True if the set holds no points.
    pub fn is_empty(&self) -> bool {
        self.points.nrows() == 0
    }

    /// The `i`-th point as a column vector.
    pub fn point(&self, i: usize) -> DVector<f64> {
        self.points.row(i).transpose()
    }
}

/// Generates the symmetric `2n+1` sigma-point set of `moments`.
pub fn moments_to_points<D: SpdDecomposition + ?Sized>(
    moments: &Moments,
    params: &SigmaParams,
    decomposition: &D,
) -> Result<SigmaPoints, LinalgError> {
    let n = moments.mean.len();
    let root = decomposition.sqrt(&moments.covariance)?;
    let scale = (n as f64 + params.lambda(n)).sqrt();
    if !scale.is_finite() {
        return Err(LinalgError::NonFinite);
    }

    let mut points = DMatrix::zeros(2 * n + 1, n);
    points.row_mut(0).copy_from(&moments.mean.transpose());
    for i in 0..n {
        let offset = root.column(i) * scale;
        points.row_mut(i + 1).copy_from(&(&moments.mean + &offset).transpose());
        points.row_mut(n + i + 1).copy_from(&(&moments.mean - &offset).transpose());
    }

    let (weights_mean, weights_covariance) = params.weights(n);
    Ok(SigmaPoints {
        points,
        weights_mean,
        weights_covariance,
    })
}

/// Recombines sigma points into moments, optionally adding noise covariance.
pub fn points_to_moments(points: &SigmaPoints, noise: Option<&DMatrix<f64>>) -> Moments {
    let dim = points.points.ncols();

    let mut mean = DVector::zeros(dim);
    for i in 0..points.len() {
        mean += points.point(i) * points.weights_mean[i];
    }

    let mut covariance = DMatrix::zeros(dim, dim);
    for i in 0..points.len() {
        let diff = points.point(i) - &mean;
        covariance += &diff * diff.transpose() * points.weights_covariance[i];
    }

    if let Some(noise) = noise {
        covariance += noise;
    }

    Moments { mean, covariance }
}

/// Pushes every point through `f` and recombines the images.
pub fn unscented_transform<F>(
    points: &SigmaPoints,
    f: F,
    noise: Option<&DMatrix<f64>>,
) -> (SigmaPoints, Moments)
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    let images: Vec<DVector<f64>> = (0..points.len()).map(|i| f(&points.point(i))).collect();
    let dim = images.first().map_or(0, |p| p.len());

    let mut transformed = DMatrix::zeros(points.len(), dim);
    for (i, image) in images.iter().enumerate() {
        transformed.row_mut(i).copy_from(&image.transpose());
    }

    let transformed = SigmaPoints {
        points: transformed,
        weights_mean: points.weights_mean.clone(),
        weights_covariance: points.weights_covariance.clone(),
    };
    let moments = points_to_moments(&transformed, noise);

    (transformed, moments)
}

/// Weighted cross-covariance `Σ wᵢ (aᵢ − ā)(bᵢ − b̄)ᵀ`.
fn cross_covariance(
    a: &SigmaPoints,
    a_mean: &DVector<f64>,
    b: &SigmaPoints,
    b_mean: &DVector<f64>,
    weights: &DVector<f64>,
) -> DMatrix<f64> {
    let mut cross = DMatrix::zeros(a_mean.len(), b_mean.len());
    for i in 0..a.len() {
        let da = a.point(i) - a_mean;
        let db = b.point(i) - b_mean;
        cross += da * db.transpose() * weights[i];
    }
    cross
}

// ============================================================================
// SMOOTHER
// ============================================================================

/// Additive-noise unscented Kalman filter with an unscented RTS smoothing pass.
///
/// Noise covariances are fixed for the whole run; the models are supplied per
/// call so one configured smoother serves every track.
#[derive(Debug, Clone)]
pub struct UnscentedSmoother<D = CholeskyDecomposition> {
    /// Covariance of the initial state mean
    pub initial_covariance: DMatrix<f64>,

    /// Additive transition noise Q
    pub process_noise: DMatrix<f64>,

    /// Additive observation noise R
    pub observation_noise: DMatrix<f64>,

    /// Sigma-point scaling
    pub params: SigmaParams,

    decomposition: D,
}

impl UnscentedSmoother<CholeskyDecomposition> {
    /// Creates a smoother with Cholesky square roots and default scaling.
    pub fn new(
        initial_covariance: DMatrix<f64>,
        process_noise: DMatrix<f64>,
        observation_noise: DMatrix<f64>,
    ) -> Self {
        Self {
            initial_covariance,
            process_noise,
            observation_noise,
            params: SigmaParams::default(),
            decomposition: CholeskyDecomposition,
        }
    }
}

impl<D: SpdDecomposition> UnscentedSmoother<D> {
    /// Replaces the sigma-point scaling.
    pub fn with_sigma_params(mut self, params: SigmaParams) -> Self {
        self.params = params;
        self
    }

    /// Replaces the decomposition strategy.
    pub fn with_decomposition<E: SpdDecomposition>(self, decomposition: E) -> UnscentedSmoother<E> {
        UnscentedSmoother {
            initial_covariance: self.initial_covariance,
            process_noise: self.process_noise,
            observation_noise: self.observation_noise,
            params: self.params,
            decomposition,
        }
    }

    /// Forward pass: filtered moments for every measurement.
    ///
    /// The first measurement corrects the initial moments directly; every later
    /// one is preceded by a prediction through `transition`.
    pub fn filter<F, G>(
        &self,
        transition: F,
        observation: G,
        initial_mean: &DVector<f64>,
        measurements: &[DVector<f64>],
    ) -> Result<Vec<Moments>, SmoothingError>
    where
        F: Fn(&DVector<f64>) -> DVector<f64>,
        G: Fn(&DVector<f64>) -> DVector<f64>,
    {
        self.check_dimensions(initial_mean, measurements)?;
        let unstable = |step: usize, reason: LinalgError| {
            SmoothingError::unstable(SmoothingPhase::Filter, step, reason)
        };

        let mut filtered: Vec<Moments> = Vec::with_capacity(measurements.len());
        for (t, z) in measurements.iter().enumerate() {
            let predicted = match filtered.last() {
                None => Moments::new(initial_mean.clone(), self.initial_covariance.clone()),
                Some(previous) => {
                    let points = moments_to_points(previous, &self.params, &self.decomposition)
                        .map_err(|e| unstable(t, e))?;
                    unscented_transform(&points, &transition, Some(&self.process_noise)).1
                }
            };

            let corrected = self
                .correct(&observation, &predicted, z)
                .map_err(|e| unstable(t, e))?;
            if !corrected.is_finite() {
                return Err(unstable(t, LinalgError::NonFinite));
            }
            filtered.push(corrected);
        }

        Ok(filtered)
    }

    /// Forward pass followed by the backward smoothing pass.
    ///
    /// Returns exactly one smoothed estimate per measurement, in order.
    pub fn smooth<F, G>(
        &self,
        transition: F,
        observation: G,
        initial_mean: &DVector<f64>,
        measurements: &[DVector<f64>],
    ) -> Result<Vec<Moments>, SmoothingError>
    where
        F: Fn(&DVector<f64>) -> DVector<f64>,
        G: Fn(&DVector<f64>) -> DVector<f64>,
    {
        let filtered = self.filter(&transition, observation, initial_mean, measurements)?;
        self.backward(&transition, filtered)
    }

    /// Measurement update of predicted moments.
    fn correct<G>(
        &self,
        observation: &G,
        predicted: &Moments,
        z: &DVector<f64>,
    ) -> Result<Moments, LinalgError>
    where
        G: Fn(&DVector<f64>) -> DVector<f64>,
    {
        let points = moments_to_points(predicted, &self.params, &self.decomposition)?;
        let (obs_points, obs_moments) =
            unscented_transform(&points, observation, Some(&self.observation_noise));

        // Cov(x, z | past measurements)
        let cross = cross_covariance(
            &points,
            &predicted.mean,
            &obs_points,
            &obs_moments.mean,
            &points.weights_mean,
        );

        // K = Pxz · S⁻¹, computed as (S⁻¹ · Pxzᵀ)ᵀ since S is symmetric
        let gain = self
            .decomposition
            .solve(&obs_moments.covariance, &cross.transpose())?
            .transpose();

        let innovation = z - &obs_moments.mean;
        let mean = &predicted.mean + &gain * innovation;
        let covariance = symmetrize(&(&predicted.covariance - &gain * cross.transpose()));

        Ok(Moments { mean, covariance })
    }

    /// Unscented RTS pass over filtered moments.
    fn backward<F>(&self, transition: &F, filtered: Vec<Moments>) -> Result<Vec<Moments>, SmoothingError>
    where
        F: Fn(&DVector<f64>) -> DVector<f64>,
    {
        let n = filtered.len();
        if n == 0 {
            return Ok(filtered);
        }
        let unstable = |step: usize, reason: LinalgError| {
            SmoothingError::unstable(SmoothingPhase::Smoother, step, reason)
        };

        let mut smoothed = filtered.clone();
        for t in (0..n - 1).rev() {
            let current = &filtered[t];
            let points = moments_to_points(current, &self.params, &self.decomposition)
                .map_err(|e| unstable(t, e))?;
            let (next_points, next_moments) =
                unscented_transform(&points, transition, Some(&self.process_noise));

            // Cov(x_t, x_{t+1} | measurements up to t)
            let cross = cross_covariance(
                &points,
                &current.mean,
                &next_points,
                &next_moments.mean,
                &points.weights_covariance,
            );

            // G = C · P⁻¹
            let gain = self
                .decomposition
                .solve(&next_moments.covariance, &cross.transpose())
                .map_err(|e| unstable(t, e))?
                .transpose();

            let following = &smoothed[t + 1];
            let mean = &current.mean + &gain * (&following.mean - &next_moments.mean);
            let covariance = symmetrize(
                &(&current.covariance
                    + &gain * (&following.covariance - &next_moments.covariance) * gain.transpose()),
            );

            let estimate = Moments { mean, covariance };
            if !estimate.is_finite() {
                return Err(unstable(t, LinalgError::NonFinite));
            }
            smoothed[t] = estimate;
        }

        Ok(smoothed)
    }

    fn check_dimensions(
        &self,
        initial_mean: &DVector<f64>,
        measurements: &[DVector<f64>],
    ) -> Result<(), SmoothingError> {
        let n = initial_mean.len();
        let m = self.observation_noise.nrows();

        let shapes_ok = self.initial_covariance.shape() == (n, n)
            && self.process_noise.shape() == (n, n)
            && self.observation_noise.shape() == (m, m);
        if !shapes_ok {
            return Err(SmoothingError::malformed(format!(
                "noise covariances do not match a {}-dimensional state",
                n
            )));
        }

        if let Some((t, z)) = measurements.iter().enumerate().find(|(_, z)| z.len() != m) {
            return Err(SmoothingError::malformed(format!(
                "measurement {} has {} values, expected {}",
                t,
                z.len(),
                m
            )));
        }

        Ok(())
    }
}
