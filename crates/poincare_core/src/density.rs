use nalgebra::Matrix2;
use rayon::prelude::*;
use thiserror::Error;

/// Why a density estimate could not be formed.
#[derive(Debug, Clone, Copy, Error)]
pub enum DensityError {
    #[error("kernel density estimation needs at least 2 points, got {len}")]
    TooFewPoints { len: usize },
    #[error("point-cloud covariance is singular; the cloud is degenerate")]
    SingularCovariance,
}

/// Gaussian kernel density estimator over a 2D point cloud.
///
/// The kernel covariance is the sample covariance of the data scaled by
/// the squared bandwidth factor; the default factor is Scott's rule,
/// n^(−1/6) in two dimensions. Evaluation is the exact O(N·M) sum.
#[derive(Debug, Clone)]
pub struct GaussianKde {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Upper triangle of the inverted kernel covariance.
    inv_xx: f64,
    inv_xy: f64,
    inv_yy: f64,
    /// 1 / (n · 2π · |Σ|^(1/2)).
    norm: f64,
}

impl GaussianKde {
    /// Fits the estimator to the cloud `(x, y)`. `bandwidth` overrides the
    /// Scott's-rule factor when given.
    pub fn fit(x: &[f64], y: &[f64], bandwidth: Option<f64>) -> Result<Self, DensityError> {
        assert_eq!(x.len(), y.len(), "coordinate sequences must be parallel");
        let n = x.len();
        if n < 2 {
            return Err(DensityError::TooFewPoints { len: n });
        }

        let factor = bandwidth.unwrap_or_else(|| (n as f64).powf(-1.0 / 6.0));
        if !(factor > 0.0) {
            return Err(DensityError::SingularCovariance);
        }

        let mean_x = x.iter().sum::<f64>() / n as f64;
        let mean_y = y.iter().sum::<f64>() / n as f64;
        let mut cov_xx = 0.0;
        let mut cov_xy = 0.0;
        let mut cov_yy = 0.0;
        for i in 0..n {
            let dx = x[i] - mean_x;
            let dy = y[i] - mean_y;
            cov_xx += dx * dx;
            cov_xy += dx * dy;
            cov_yy += dy * dy;
        }
        let ddof = (n - 1) as f64;
        let scale = factor * factor / ddof;
        let sigma = Matrix2::new(
            cov_xx * scale,
            cov_xy * scale,
            cov_xy * scale,
            cov_yy * scale,
        );

        let det = sigma.determinant();
        let cholesky = sigma.cholesky().ok_or(DensityError::SingularCovariance)?;
        let inverse = cholesky.inverse();

        Ok(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            inv_xx: inverse[(0, 0)],
            inv_xy: inverse[(0, 1)],
            inv_yy: inverse[(1, 1)],
            norm: 1.0 / (n as f64 * std::f64::consts::TAU * det.sqrt()),
        })
    }

    /// Number of data points the estimator was fitted on.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Evaluates the density at each query point. Queries are independent
    /// and processed in parallel.
    pub fn evaluate(&self, qx: &[f64], qy: &[f64]) -> Vec<f64> {
        assert_eq!(qx.len(), qy.len(), "coordinate sequences must be parallel");
        qx.par_iter()
            .zip(qy.par_iter())
            .map(|(&px, &py)| self.point_density(px, py))
            .collect()
    }

    /// Density of the cloud at each of its own points, in cloud order.
    pub fn self_density(&self) -> Vec<f64> {
        self.evaluate(&self.x, &self.y)
    }

    fn point_density(&self, px: f64, py: f64) -> f64 {
        let mut sum = 0.0;
        for i in 0..self.x.len() {
            let dx = self.x[i] - px;
            let dy = self.y[i] - py;
            let energy =
                self.inv_xx * dx * dx + 2.0 * self.inv_xy * dx * dy + self.inv_yy * dy * dy;
            sum += (-0.5 * energy).exp();
        }
        self.norm * sum
    }
}
