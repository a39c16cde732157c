//! Probabilistic recalibration of predictive draws.
//!
//! Each held-out observation is scored by the empirical CDF of its own
//! predictive draws. A monotone GP learns how those nominal
//! probabilities map onto observed coverage, and the learned curve
//! warps the predictive quantiles. An isotonic fit by pooling adjacent
//! violators gives a quicker, sampler-free alternative.

use log::info;
use mcmc_util::GibbsSampler;
use nalgebra::{DMatrix, DVector};
use rand::Rng;

use crate::config::MonotoneGpConfig;
use crate::error::{EnsembleError, Result};
use crate::gp::MonotoneGp;

/// Pairs of (nominal probability, observed coverage)
#[derive(Debug, Clone)]
pub struct CalibrationData {
    /// ECDF of each observation under its predictive draws
    pub feature: DVector<f64>,
    /// fraction of observations whose ECDF value is at most this one
    pub label: DVector<f64>,
}

/// * `y_obs` - (N,) observations
/// * `y_sample` - (N, S) predictive draws, one row per observation
pub fn build_calibration_dataset(
    y_obs: &DVector<f64>,
    y_sample: &DMatrix<f64>,
) -> Result<CalibrationData> {
    let n = y_obs.len();
    if y_sample.nrows() != n || y_sample.ncols() == 0 {
        return Err(EnsembleError::config(format!(
            "{} observations but draws are {} x {}",
            n,
            y_sample.nrows(),
            y_sample.ncols()
        )));
    }

    let s = y_sample.ncols() as f64;
    let feature = DVector::from_fn(n, |i, _| {
        y_sample.row(i).iter().filter(|&&v| v <= y_obs[i]).count() as f64 / s
    });
    let label = DVector::from_fn(n, |i, _| {
        feature.iter().filter(|&&p| p <= feature[i]).count() as f64 / n as f64
    });

    Ok(CalibrationData { feature, label })
}

/// Draw `n_sample` values from the distribution whose quantile function
/// interpolates (`quantile[k]`, sorted `base_sample[k]`).
///
/// `quantile` must be non-decreasing with one entry per base draw; it
/// gives the calibrated probability attached to each order statistic.
pub fn sample_ecdf<R: Rng>(
    n_sample: usize,
    base_sample: &[f64],
    quantile: &[f64],
    rng: &mut R,
) -> Result<Vec<f64>> {
    if base_sample.len() != quantile.len() || base_sample.is_empty() {
        return Err(EnsembleError::config(format!(
            "{} base draws for {} quantile levels",
            base_sample.len(),
            quantile.len()
        )));
    }
    if quantile.windows(2).any(|w| w[1] < w[0]) {
        return Err(EnsembleError::config("quantile levels must be non-decreasing"));
    }

    let mut sorted = base_sample.to_vec();
    sorted.sort_by(f64::total_cmp);

    Ok((0..n_sample)
        .map(|_| interpolate(quantile, &sorted, rng.random::<f64>()))
        .collect())
}

/// Piecewise-linear interpolation of (xs, ys) at `x`, flat beyond the ends
fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let k = xs.partition_point(|&v| v < x);
    if k == 0 {
        return ys[0];
    }
    if k >= xs.len() {
        return ys[ys.len() - 1];
    }
    let (x0, x1) = (xs[k - 1], xs[k]);
    let (y0, y1) = (ys[k - 1], ys[k]);
    if x1 <= x0 {
        y1
    } else {
        y0 + (y1 - y0) * (x - x0) / (x1 - x0)
    }
}

/// Learned map from nominal to calibrated probabilities on a grid
#[derive(Debug, Clone)]
pub struct CalibrationCurve {
    grid: Vec<f64>,
    prob: Vec<f64>,
}

impl CalibrationCurve {
    /// Fit a monotone GP to the calibration data and keep its posterior
    /// mean on `n_grid` evenly spaced points of the unit interval
    pub fn fit(
        data: &CalibrationData,
        config: &MonotoneGpConfig,
        sampler: &GibbsSampler,
        n_grid: usize,
    ) -> Result<Self> {
        if n_grid < 2 {
            return Err(EnsembleError::config("calibration grid needs two points"));
        }
        let gp = MonotoneGp::new(data.feature.as_slice(), data.label.as_slice(), config)?;
        let fit = gp.fit(sampler)?;

        let grid: Vec<f64> = (0..n_grid).map(|i| i as f64 / (n_grid - 1) as f64).collect();
        let x_grid = DMatrix::from_column_slice(n_grid, 1, &grid);
        let mean = gp.predict_mean(&fit, &x_grid)?;
        info!("calibration curve fitted on {} points", data.feature.len());
        Ok(Self::from_values(grid, mean.iter().copied().collect()))
    }

    /// Isotonic least-squares fit of the calibration labels on the
    /// features by pooling adjacent violators.
    ///
    /// Tied features are averaged first; the knots are the distinct
    /// features with their pooled values clipped to [0, 1], and
    /// evaluation interpolates linearly between them.
    pub fn isotonic(data: &CalibrationData) -> Result<Self> {
        let n = data.feature.len();
        if n == 0 || data.label.len() != n {
            return Err(EnsembleError::config(format!(
                "{} features for {} labels",
                n,
                data.label.len()
            )));
        }

        let mut pairs: Vec<(f64, f64)> = data
            .feature
            .iter()
            .copied()
            .zip(data.label.iter().copied())
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        // (x, sum of labels, count) per distinct feature
        let mut knots: Vec<(f64, f64, f64)> = Vec::with_capacity(n);
        for (x, y) in pairs {
            match knots.last_mut() {
                Some(last) if last.0 == x => {
                    last.1 += y;
                    last.2 += 1.0;
                }
                _ => knots.push((x, y, 1.0)),
            }
        }

        // each block is (sum, weight, number of knots it covers)
        let mut blocks: Vec<(f64, f64, usize)> = Vec::with_capacity(knots.len());
        for &(_, sum, weight) in &knots {
            blocks.push((sum, weight, 1));
            while blocks.len() > 1 {
                let (s1, w1, k1) = blocks[blocks.len() - 1];
                let (s0, w0, k0) = blocks[blocks.len() - 2];
                if s0 / w0 <= s1 / w1 {
                    break;
                }
                blocks.pop();
                if let Some(prev) = blocks.last_mut() {
                    *prev = (s0 + s1, w0 + w1, k0 + k1);
                }
            }
        }

        let values: Vec<f64> = blocks
            .iter()
            .flat_map(|&(sum, weight, k)| std::iter::repeat(sum / weight).take(k))
            .collect();
        let grid: Vec<f64> = knots.iter().map(|k| k.0).collect();

        info!(
            "isotonic calibration: {} points pooled into {} blocks",
            n,
            blocks.len()
        );
        Ok(Self::from_values(grid, values))
    }

    /// Clip to the unit interval and enforce monotonicity by a running
    /// maximum
    pub fn from_values(grid: Vec<f64>, values: Vec<f64>) -> Self {
        let mut prob = Vec::with_capacity(values.len());
        let mut running = 0.0_f64;
        for v in values {
            running = running.max(v.clamp(0.0, 1.0));
            prob.push(running);
        }
        Self { grid, prob }
    }

    pub fn identity(n_grid: usize) -> Self {
        let grid: Vec<f64> = (0..n_grid).map(|i| i as f64 / (n_grid - 1).max(1) as f64).collect();
        Self::from_values(grid.clone(), grid)
    }

    /// (n_grid, 2) with nominal probabilities in the first column
    pub fn to_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.grid.len(), 2, |i, j| match j {
            0 => self.grid[i],
            _ => self.prob[i],
        })
    }

    /// Calibrated probability of a nominal probability `p`
    pub fn eval(&self, p: f64) -> f64 {
        interpolate(&self.grid, &self.prob, p)
    }

    /// Recalibrate predictive draws (S, N) column by column, returning
    /// (n_sample, N)
    pub fn recalibrate<R: Rng>(
        &self,
        draws: &DMatrix<f64>,
        n_sample: usize,
        rng: &mut R,
    ) -> Result<DMatrix<f64>> {
        let s = draws.nrows();
        let levels: Vec<f64> = (0..s)
            .map(|k| self.eval((k + 1) as f64 / s as f64))
            .collect();

        let mut ret = DMatrix::zeros(n_sample, draws.ncols());
        for (j, col) in draws.column_iter().enumerate() {
            let base: Vec<f64> = col.iter().copied().collect();
            let new = sample_ecdf(n_sample, &base, &levels, rng)?;
            ret.set_column(j, &DVector::from_vec(new));
        }
        Ok(ret)
    }
}
