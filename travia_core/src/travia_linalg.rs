//! Symmetric positive-definite decompositions.
//!
//! The unscented engine needs exactly two things from linear algebra: a matrix
//! square root of a covariance (for sigma points) and a solve against a
//! covariance (for Kalman and smoother gains). Both go through
//! [`SpdDecomposition`] so the numerical method can be swapped and tested on
//! its own.

use nalgebra::{linalg::SymmetricEigen, DMatrix};

use crate::error::LinalgError;

/// A factorisation strategy for symmetric positive-definite matrices.
pub trait SpdDecomposition: Send + Sync {
    /// Returns `S` with `S·Sᵀ = a`.
    fn sqrt(&self, a: &DMatrix<f64>) -> Result<DMatrix<f64>, LinalgError>;

    /// Solves `a·X = b`.
    fn solve(&self, a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>, LinalgError>;
}

/// Cholesky factorisation. `sqrt` returns the lower-triangular factor.
#[derive(Debug, Clone, Copy, Default)]
pub struct CholeskyDecomposition;

impl SpdDecomposition for CholeskyDecomposition {
    fn sqrt(&self, a: &DMatrix<f64>) -> Result<DMatrix<f64>, LinalgError> {
        check_square_finite(a)?;
        a.clone()
            .cholesky()
            .map(|chol| chol.l())
            .ok_or(LinalgError::NotPositiveDefinite)
    }

    fn solve(&self, a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>, LinalgError> {
        check_square_finite(a)?;
        check_rows(a, b)?;
        let chol = a.clone().cholesky().ok_or(LinalgError::Singular)?;
        let x = chol.solve(b);
        if !is_finite(&x) {
            return Err(LinalgError::NonFinite);
        }
        Ok(x)
    }
}

/// Eigen-decomposition `a = V·Λ·Vᵀ`. `sqrt` returns `V·Λ^½`.
///
/// Slower than Cholesky but tolerates nearly singular matrices down to
/// `min_eigenvalue`.
#[derive(Debug, Clone, Copy)]
pub struct SymmetricEigenDecomposition {
    /// Eigenvalues at or below this are treated as singular
    pub min_eigenvalue: f64,
}

impl Default for SymmetricEigenDecomposition {
    fn default() -> Self {
        Self {
            min_eigenvalue: 1e-12,
        }
    }
}

impl SymmetricEigenDecomposition {
    fn decompose(&self, a: &DMatrix<f64>) -> Result<SymmetricEigen<f64, nalgebra::Dyn>, LinalgError> {
        check_square_finite(a)?;
        let eigen = SymmetricEigen::try_new(a.clone(), f64::EPSILON, 0)
            .ok_or(LinalgError::NotPositiveDefinite)?;
        if eigen.eigenvalues.iter().any(|&l| l <= self.min_eigenvalue) {
            return Err(LinalgError::NotPositiveDefinite);
        }
        Ok(eigen)
    }
}

impl SpdDecomposition for SymmetricEigenDecomposition {
    fn sqrt(&self, a: &DMatrix<f64>) -> Result<DMatrix<f64>, LinalgError> {
        let eigen = self.decompose(a)?;
        let mut root = eigen.eigenvectors.clone();
        for (j, mut column) in root.column_iter_mut().enumerate() {
            column *= eigen.eigenvalues[j].sqrt();
        }
        Ok(root)
    }

    fn solve(&self, a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>, LinalgError> {
        check_rows(a, b)?;
        let eigen = self.decompose(a).map_err(|_| LinalgError::Singular)?;
        let inverse_diag = eigen.eigenvalues.map(|l| 1.0 / l);
        let v = &eigen.eigenvectors;
        let x = v * DMatrix::from_diagonal(&inverse_diag) * v.transpose() * b;
        if !is_finite(&x) {
            return Err(LinalgError::NonFinite);
        }
        Ok(x)
    }
}

/// Returns `(m + mᵀ) / 2`.
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

/// True if every entry is finite.
pub fn is_finite(m: &DMatrix<f64>) -> bool {
    m.iter().all(|v| v.is_finite())
}

fn check_square_finite(a: &DMatrix<f64>) -> Result<(), LinalgError> {
    if a.nrows() != a.ncols() {
        return Err(LinalgError::DimensionMismatch {
            expected: a.nrows(),
            actual: a.ncols(),
        });
    }
    if !is_finite(a) {
        return Err(LinalgError::NonFinite);
    }
    Ok(())
}

fn check_rows(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<(), LinalgError> {
    if a.nrows() != b.nrows() {
        return Err(LinalgError::DimensionMismatch {
            expected: a.nrows(),
            actual: b.nrows(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn spd() -> DMatrix<f64> {
        DMatrix::from_row_slice(3, 3, &[
            4.0, 1.0, 0.5,
            1.0, 3.0, 0.2,
            0.5, 0.2, 2.0,
        ])
    }

    fn check_sqrt<D: SpdDecomposition>(decomposition: D) {
        let a = spd();
        let s = decomposition.sqrt(&a).unwrap();
        let recovered = &s * s.transpose();
        for (x, y) in recovered.iter().zip(a.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-10);
        }
    }

    fn check_solve<D: SpdDecomposition>(decomposition: D) {
        let a = spd();
        let b = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 2.0, 1.0, 3.0, -1.0]);
        let x = decomposition.solve(&a, &b).unwrap();
        let back = &a * x;
        for (x, y) in back.iter().zip(b.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_cholesky_sqrt_and_solve() {
        check_sqrt(CholeskyDecomposition);
        check_solve(CholeskyDecomposition);

        // Lower triangular
        let l = CholeskyDecomposition.sqrt(&spd()).unwrap();
        assert_eq!(l[(0, 1)], 0.0);
        assert_eq!(l[(0, 2)], 0.0);
        assert_eq!(l[(1, 2)], 0.0);
    }

    #[test]
    fn test_eigen_sqrt_and_solve() {
        check_sqrt(SymmetricEigenDecomposition::default());
        check_solve(SymmetricEigenDecomposition::default());
    }

    #[test]
    fn test_singular_matrix_is_rejected() {
        let singular = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let b = DMatrix::identity(2, 2);

        assert_eq!(
            CholeskyDecomposition.sqrt(&DMatrix::zeros(2, 2)),
            Err(LinalgError::NotPositiveDefinite)
        );
        assert!(CholeskyDecomposition.solve(&DMatrix::zeros(2, 2), &b).is_err());
        assert!(SymmetricEigenDecomposition::default().sqrt(&singular).is_err());
        assert!(SymmetricEigenDecomposition::default().solve(&singular, &b).is_err());
    }

    #[test]
    fn test_non_finite_and_shape_errors() {
        let mut a = spd();
        a[(1, 1)] = f64::NAN;
        assert_eq!(CholeskyDecomposition.sqrt(&a), Err(LinalgError::NonFinite));

        let rect = DMatrix::zeros(2, 3);
        assert!(matches!(
            CholeskyDecomposition.sqrt(&rect),
            Err(LinalgError::DimensionMismatch { .. })
        ));

        let b = DMatrix::zeros(2, 1);
        assert!(matches!(
            CholeskyDecomposition.solve(&spd(), &b),
            Err(LinalgError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_symmetrize() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 4.0, 3.0]);
        let s = symmetrize(&m);
        assert_eq!(s[(0, 1)], 3.0);
        assert_eq!(s[(1, 0)], 3.0);
        assert_eq!(s[(0, 0)], 1.0);
    }
}
