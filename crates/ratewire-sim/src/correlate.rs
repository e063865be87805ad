//! Correlated standard-normal draws across instruments.

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use tracing::warn;

/// Lower-triangular Cholesky-like factor of a correlation matrix.
///
/// One independent standard normal is drawn per instrument per cycle and
/// transformed through the factor so instruments move jointly. A matrix
/// that is not positive definite gets its offending pivots clamped to a
/// small positive value rather than failing the cycle.
#[derive(Debug, Clone)]
pub struct CorrelatedNormals {
    factor: Vec<Vec<f64>>,
    n: usize,
}

impl CorrelatedNormals {
    /// Identity factor: independent draws.
    pub fn identity(n: usize) -> Self {
        let mut factor = vec![vec![0.0; n]; n];
        for (i, row) in factor.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self { factor, n }
    }

    /// Factor a validated (square, symmetric, unit-diagonal) correlation
    /// matrix.
    pub fn from_matrix(matrix: &[Vec<f64>]) -> Self {
        let n = matrix.len();
        if n == 0 {
            return Self::identity(0);
        }

        let mut factor = vec![vec![0.0; n]; n];
        let mut clamped = false;

        for i in 0..n {
            for j in 0..=i {
                let mut sum = matrix[i][j];
                for k in 0..j {
                    sum -= factor[i][k] * factor[j][k];
                }
                if i == j {
                    if sum <= 0.0 {
                        sum = 1e-10;
                        clamped = true;
                    }
                    factor[i][j] = sum.sqrt();
                } else {
                    factor[i][j] = sum / factor[j][j];
                }
            }
        }

        if clamped {
            warn!("correlation matrix is not positive definite, pivots clamped");
        }

        Self { factor, n }
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// One correlated draw per instrument.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        let iid: Vec<f64> = (0..self.n)
            .map(|_| StandardNormal.sample(rng))
            .collect();

        let mut out = vec![0.0; self.n];
        for i in 0..self.n {
            let mut sum = 0.0;
            for (j, z) in iid.iter().enumerate().take(i + 1) {
                sum += self.factor[i][j] * z;
            }
            out[i] = sum;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn sample_correlation(rho: f64, draws: usize) -> f64 {
        let matrix = vec![vec![1.0, rho], vec![rho, 1.0]];
        let correlated = CorrelatedNormals::from_matrix(&matrix);
        let mut rng = StdRng::seed_from_u64(7);

        let mut sum_xy = 0.0;
        let mut sum_xx = 0.0;
        let mut sum_yy = 0.0;
        for _ in 0..draws {
            let z = correlated.sample(&mut rng);
            sum_xy += z[0] * z[1];
            sum_xx += z[0] * z[0];
            sum_yy += z[1] * z[1];
        }
        sum_xy / (sum_xx.sqrt() * sum_yy.sqrt())
    }

    #[test]
    fn positive_correlation_is_reproduced() {
        let observed = sample_correlation(0.8, 20_000);
        assert!((observed - 0.8).abs() < 0.05, "observed={observed}");
    }

    #[test]
    fn negative_correlation_is_reproduced() {
        let observed = sample_correlation(-0.6, 20_000);
        assert!((observed + 0.6).abs() < 0.05, "observed={observed}");
    }

    #[test]
    fn identity_draws_are_uncorrelated() {
        let correlated = CorrelatedNormals::identity(2);
        let mut rng = StdRng::seed_from_u64(11);
        let mut sum_xy = 0.0;
        let draws = 20_000;
        for _ in 0..draws {
            let z = correlated.sample(&mut rng);
            sum_xy += z[0] * z[1];
        }
        let mean = sum_xy / draws as f64;
        assert!(mean.abs() < 0.05, "mean={mean}");
    }

    #[test]
    fn degenerate_matrix_is_clamped_not_panicked() {
        // rho = 1 with three assets is singular.
        let matrix = vec![
            vec![1.0, 1.0, 1.0],
            vec![1.0, 1.0, 1.0],
            vec![1.0, 1.0, 1.0],
        ];
        let correlated = CorrelatedNormals::from_matrix(&matrix);
        let mut rng = StdRng::seed_from_u64(3);
        let z = correlated.sample(&mut rng);
        assert_eq!(z.len(), 3);
        assert!(z.iter().all(|value| value.is_finite()));
    }
}
