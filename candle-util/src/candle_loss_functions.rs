use candle_core::{Result, Tensor, D};

/// Gaussian log-likelihood with a per-sample noise scale
///
/// llik(s) = Σ_i log N( y(i) ; mean(s,i), exp(2 ln_sigma(s)) )
///
/// * `y_n` - observed data, shape (N,)
/// * `mean_sn` - predicted mean, shape (S, N)
/// * `ln_sigma_s` - log noise standard deviation, shape (S,)
///
pub fn gaussian_likelihood(y_n: &Tensor, mean_sn: &Tensor, ln_sigma_s: &Tensor) -> Result<Tensor> {
    let n = y_n.dim(0)? as f64;
    let ln_2pi = (2.0 * std::f64::consts::PI).ln();

    let sigma_s1 = ln_sigma_s.exp()?.unsqueeze(1)?;
    let sq_sum = mean_sn
        .broadcast_sub(&y_n.unsqueeze(0)?)?
        .broadcast_div(&sigma_s1)?
        .sqr()?
        .sum(D::Minus1)?;

    let log_norm = ((ln_sigma_s * n)? + 0.5 * n * ln_2pi)?;
    (sq_sum * -0.5)? - log_norm
}

/// Kernel (energy) score with the absolute-difference kernel, i.e.,
/// the sample CRPS averaged over observations
///
/// score = mean_i [ E|X(i) - y(i)| - 0.5 E|X(i) - X'(i)| ]
///
/// * `x_sn` - predictive draws, shape (S, N)
/// * `x_alt_sn` - an independent set of predictive draws, shape (S, N)
/// * `y_n` - observed data, shape (N,)
///
pub fn kernel_score_loss(x_sn: &Tensor, x_alt_sn: &Tensor, y_n: &Tensor) -> Result<Tensor> {
    let y_1n = y_n.unsqueeze(0)?;
    let fit = x_sn.broadcast_sub(&y_1n)?.abs()?.mean_all()?;
    let spread = (x_sn - x_alt_sn)?.abs()?.mean_all()?;
    fit - (spread * 0.5)?
}

/// Smoothed calibration error of the predictive distribution
///
/// Each observation gets a soft probability integral transform
/// `u(i) = mean_s sigmoid((y(i) - X(s,i)) / h)`. For a grid of levels
/// `p`, the soft coverage `c(p) = mean_i sigmoid((p - u(i)) / h)` should
/// match `p`; the loss is `mean_p (c(p) - p)²`.
///
/// * `x_sn` - predictive draws, shape (S, N)
/// * `y_n` - observed data, shape (N,)
/// * `n_levels` - number of interior levels on the unit interval
/// * `bandwidth` - smoothing bandwidth `h`
///
pub fn calibration_loss(
    x_sn: &Tensor,
    y_n: &Tensor,
    n_levels: usize,
    bandwidth: f64,
) -> Result<Tensor> {
    let n_levels = n_levels.max(1);
    let levels: Vec<f64> = (1..=n_levels)
        .map(|l| l as f64 / (n_levels + 1) as f64)
        .collect();
    let levels_p = Tensor::from_vec(levels, n_levels, y_n.device())?.to_dtype(y_n.dtype())?;

    let pit_n = sigmoid(&(y_n.unsqueeze(0)?.broadcast_sub(x_sn)? / bandwidth)?)?.mean(0)?;

    // (P, N)
    let diff_pn = levels_p
        .unsqueeze(1)?
        .broadcast_sub(&pit_n.unsqueeze(0)?)?;
    let coverage_p = sigmoid(&(diff_pn / bandwidth)?)?.mean(1)?;

    (coverage_p - levels_p)?.sqr()?.mean_all()
}

/// 1 / (1 + exp(-x)), built from primitive ops so it can be differentiated
pub fn sigmoid(x: &Tensor) -> Result<Tensor> {
    (x.neg()?.exp()? + 1.0)?.recip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_gaussian_likelihood_matches_closed_form() -> Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::new(&[1.0f64, -1.0], &dev)?;
        let mean = Tensor::new(&[[1.0f64, -1.0], [0.0, 0.0]], &dev)?;
        let ln_sigma = Tensor::new(&[0.0f64, (2.0f64).ln()], &dev)?;

        let llik: Vec<f64> = gaussian_likelihood(&y, &mean, &ln_sigma)?.to_vec1()?;
        let ln_2pi = (2.0 * std::f64::consts::PI).ln();

        approx::assert_abs_diff_eq!(llik[0], -ln_2pi, epsilon = 1e-12);
        let expected = -0.5 * (0.25 + 0.25) - 2.0 * (2.0f64).ln() - ln_2pi;
        approx::assert_abs_diff_eq!(llik[1], expected, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_kernel_score_of_point_mass() -> Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::new(&[0.0f64, 2.0], &dev)?;
        // deterministic forecasts reduce to the mean absolute error
        let x = Tensor::new(&[[1.0f64, 2.0], [1.0, 2.0]], &dev)?;
        let score: f64 = kernel_score_loss(&x, &x, &y)?.to_scalar()?;
        approx::assert_abs_diff_eq!(score, 0.5, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_calibration_prefers_calibrated_draws() -> Result<()> {
        let dev = Device::Cpu;
        let n = 200;
        let s = 100;

        // y(i) sits at a spread of quantiles of the draws in column i
        let y: Vec<f64> = (0..n).map(|i| (i as f64 + 0.5) / n as f64).collect();
        let draws: Vec<f64> = (0..s)
            .flat_map(|j| std::iter::repeat_n((j as f64 + 0.5) / s as f64, n))
            .collect();
        let y = Tensor::from_vec(y, n, &dev)?;
        let x = Tensor::from_vec(draws, (s, n), &dev)?;

        let good: f64 = calibration_loss(&x, &y, 9, 0.01)?.to_scalar()?;

        // overconfident draws all sitting at 0.5
        let x_bad = Tensor::full(0.5f64, (s, n), &dev)?;
        let bad: f64 = calibration_loss(&x_bad, &y, 9, 0.01)?.to_scalar()?;

        assert!(good < 0.01, "calibrated loss: {}", good);
        assert!(bad > good);
        Ok(())
    }
}
