use candle_util::candle_core::{DType, Tensor};
use candle_util::candle_nn::{Init, VarBuilder};
use matrix_util::traits::ConvertMatOps;
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;

use crate::ensemble::assemble::randn_tensor;
use crate::error::{EnsembleError, Result};
use crate::gp::{CholeskyFactor, Kernel};
use crate::variational::{ConditionalScale, GpSnapshot, GpVariational};

const KMEANS_ITERS: usize = 25;

/// Inducing-point variational GP
///
/// u = f(Z) ~ q(u) = N(m, L Lᵀ) with L lower triangular and a positive
/// diagonal; f(X) | u follows the exact GP conditional, so
///
/// f = K_xz K_zz⁻¹ u + chol(K_xx - K_xz K_zz⁻¹ K_zx) ε
///
/// and KL(q(f) || p(f)) = KL(q(u) || p(u)).
///
/// The conditional is exact by default, which factorizes an (N, N)
/// matrix once and makes q(f) full rank. With `diagonal_conditional`
/// only its diagonal is kept (FITC), so setup is O(N M²) and f | u has
/// independent coordinates.
pub struct SparseGp {
    inducing_mean: Tensor,
    scale_offdiag: Tensor,
    ln_scale_diag: Tensor,
    /// (K_xz K_zz⁻¹)ᵀ, (M, N)
    proj_t: Tensor,
    /// transposed conditional Cholesky factor (N, N), or the
    /// conditional standard deviations as a (1, N) row
    cond_t: Tensor,
    kzz_inv: Tensor,
    kzz_log_det: f64,
    strict_lower: Tensor,
    eye: Tensor,
    proj: DMatrix<f64>,
    cond: ConditionalScale,
    n: usize,
    m: usize,
}

impl SparseGp {
    /// * `x` - (N, D) training inputs
    /// * `z` - (M, D) inducing inputs
    /// * `diagonal_conditional` - keep only the diagonal of cov(f | u)
    pub fn new(
        vb: VarBuilder,
        kernel: &impl Kernel,
        x: &DMatrix<f64>,
        z: &DMatrix<f64>,
        ridge: f64,
        init_ln_std: f64,
        diagonal_conditional: bool,
    ) -> Result<Self> {
        if x.ncols() != z.ncols() {
            return Err(EnsembleError::config(format!(
                "inducing points have {} columns, inputs have {}",
                z.ncols(),
                x.ncols()
            )));
        }
        let (n, m) = (x.nrows(), z.nrows());

        let chol_zz = CholeskyFactor::new(&kernel.gram(z), ridge)?;
        let k_zx = kernel.covariance(z, x);
        let proj = chol_zz.solve(&k_zx).transpose();

        let a = chol_zz.solve_lower(&k_zx)?;
        let dev = vb.device().clone();
        let (cond, cond_t) = if diagonal_conditional {
            let prior_var = kernel.diagonal(x);
            let sd = DVector::from_fn(n, |i, _| {
                ((prior_var[i] - a.column(i).norm_squared()).max(0.0) + ridge).sqrt()
            });
            let row = DMatrix::from_row_slice(1, n, sd.as_slice()).to_tensor(&dev)?;
            (ConditionalScale::Diagonal(sd), row)
        } else {
            let cov = kernel.gram(x) - a.transpose() * &a;
            let cov = (&cov + cov.transpose()) * 0.5;
            let l = CholeskyFactor::new(&cov, ridge)?.l().clone();
            let l_t = l.transpose().to_tensor(&dev)?;
            (ConditionalScale::Full(l), l_t)
        };

        let inducing_mean = vb.get_with_hints(
            m,
            "inducing_mean",
            Init::Randn {
                mean: 0.0,
                stdev: 0.01,
            },
        )?;
        let scale_offdiag = vb.get_with_hints((m, m), "scale_offdiag", Init::Const(0.0))?;
        let ln_scale_diag = vb.get_with_hints(m, "ln_scale_diag", Init::Const(init_ln_std))?;

        let strict_lower = DMatrix::from_fn(m, m, |i, j| if i > j { 1.0 } else { 0.0 });

        Ok(Self {
            inducing_mean,
            scale_offdiag,
            ln_scale_diag,
            proj_t: proj.transpose().to_tensor(&dev)?,
            cond_t,
            kzz_inv: chol_zz.inverse().to_tensor(&dev)?,
            kzz_log_det: chol_zz.log_det(),
            strict_lower: strict_lower.to_tensor(&dev)?,
            eye: Tensor::eye(m, DType::F64, &dev)?,
            proj,
            cond,
            n,
            m,
        })
    }

    pub fn num_inducing(&self) -> usize {
        self.m
    }

    /// L = strict_lower(offdiag) + diag(exp(ln_diag))
    fn scale(&self) -> Result<Tensor> {
        let diag = self
            .eye
            .broadcast_mul(&self.ln_scale_diag.exp()?.unsqueeze(0)?)?;
        Ok(((&self.scale_offdiag * &self.strict_lower)? + diag)?)
    }
}

impl GpVariational for SparseGp {
    fn dim(&self) -> usize {
        self.n
    }

    fn rsample(&self, n_draws: usize, rng: &mut SmallRng) -> Result<Tensor> {
        let dev = self.inducing_mean.device();
        let z_u = randn_tensor(rng, n_draws, self.m, dev)?;
        let z_f = randn_tensor(rng, n_draws, self.n, dev)?;

        let u = z_u
            .matmul(&self.scale()?.t()?)?
            .broadcast_add(&self.inducing_mean)?;
        let noise = match self.cond {
            ConditionalScale::Full(_) => z_f.matmul(&self.cond_t)?,
            ConditionalScale::Diagonal(_) => z_f.broadcast_mul(&self.cond_t)?,
        };
        let f = (u.matmul(&self.proj_t)? + noise)?;
        Ok(f)
    }

    /// 0.5 [ tr(K_zz⁻¹ L Lᵀ) + mᵀ K_zz⁻¹ m - M + log|K_zz| - 2 Σ ln L_ii ]
    fn kl_divergence(&self) -> Result<Tensor> {
        let l = self.scale()?;
        let trace = (self.kzz_inv.matmul(&l)? * &l)?.sum_all()?;
        let m = &self.inducing_mean;
        let quad = m
            .unsqueeze(0)?
            .matmul(&self.kzz_inv)?
            .matmul(&m.unsqueeze(1)?)?
            .sum_all()?;
        let log_det_q = (self.ln_scale_diag.sum_all()? * 2.0)?;

        let kl = ((trace + quad)? - log_det_q)?;
        Ok(((kl + (self.kzz_log_det - self.m as f64))? * 0.5)?)
    }

    fn snapshot(&self) -> Result<GpSnapshot> {
        Ok(GpSnapshot::Sparse {
            inducing_mean: DVector::<f64>::from_tensor(&self.inducing_mean)?,
            inducing_scale: DMatrix::<f64>::from_tensor(&self.scale()?)?,
            proj: self.proj.clone(),
            cond: self.cond.clone(),
        })
    }
}

/// Choose `m` inducing inputs among the rows of `x`
///
/// One-dimensional inputs get an even grid over their range; otherwise
/// the centroids of a Lloyd k-means started from evenly spaced rows.
/// All rows are returned when `m` is at least the number of rows.
pub fn select_inducing_points(x: &DMatrix<f64>, m: usize) -> Result<DMatrix<f64>> {
    let n = x.nrows();
    if m == 0 || n == 0 {
        return Err(EnsembleError::config("need at least one input and one inducing point"));
    }
    if m >= n {
        return Ok(x.clone());
    }

    if x.ncols() == 1 {
        let (lo, hi) = (x.min(), x.max());
        let step = if m > 1 { (hi - lo) / (m - 1) as f64 } else { 0.0 };
        return Ok(DMatrix::from_fn(m, 1, |i, _| {
            if m > 1 {
                lo + step * i as f64
            } else {
                0.5 * (lo + hi)
            }
        }));
    }

    let mut centers = DMatrix::from_fn(m, x.ncols(), |k, j| x[(k * n / m, j)]);
    let mut membership = vec![usize::MAX; n];

    for _ in 0..KMEANS_ITERS {
        let mut changed = false;
        for i in 0..n {
            let best = (0..m)
                .map(|k| (k, (x.row(i) - centers.row(k)).norm_squared()))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(k, _)| k)
                .unwrap_or(0);
            if membership[i] != best {
                membership[i] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        for k in 0..m {
            let members: Vec<usize> = (0..n).filter(|&i| membership[i] == k).collect();
            // an empty cluster keeps its previous center
            if members.is_empty() {
                continue;
            }
            for j in 0..x.ncols() {
                centers[(k, j)] =
                    members.iter().map(|&i| x[(i, j)]).sum::<f64>() / members.len() as f64;
            }
        }
    }
    Ok(centers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::{GpPrior, Rbf};
    use crate::variational::MeanFieldGp;
    use candle_util::candle_core::Device;
    use candle_util::candle_nn::VarMap;
    use rand::SeedableRng;

    fn grid(n: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n, 1, |i, _| i as f64 / (n - 1) as f64)
    }

    #[test]
    fn inducing_points_cover_the_inputs() -> Result<()> {
        let z = select_inducing_points(&grid(50), 5)?;
        assert_eq!(z.shape(), (5, 1));
        approx::assert_abs_diff_eq!(z[(0, 0)], 0.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(z[(4, 0)], 1.0, epsilon = 1e-12);

        // two well separated blobs in 2-d
        let x = DMatrix::from_fn(40, 2, |i, j| {
            let base = if i < 20 { 0.0 } else { 10.0 };
            base + 0.01 * (i % 20) as f64 + 0.001 * j as f64
        });
        let z = select_inducing_points(&x, 2)?;
        let mut firsts: Vec<f64> = z.column(0).iter().copied().collect();
        firsts.sort_by(f64::total_cmp);
        assert!(firsts[0] < 1.0 && firsts[1] > 9.0, "{:?}", firsts);

        assert_eq!(select_inducing_points(&grid(3), 10)?.shape(), (3, 1));
        Ok(())
    }

    #[test]
    fn kl_vanishes_when_q_matches_the_prior() -> Result<()> {
        // with every input an inducing point and L = chol(K_zz), q(u) = p(u)
        let x = grid(4);
        let kernel = Rbf::new(0.5);
        let ridge = 1e-2;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &Device::Cpu);
        let q = SparseGp::new(vb, &kernel, &x, &x, ridge, 0.0, false)?;

        let chol = CholeskyFactor::new(&kernel.gram(&x), ridge)?;
        let l = chol.l();
        let offdiag = DMatrix::from_fn(4, 4, |i, j| if i > j { l[(i, j)] } else { 0.0 });
        let ln_diag = DVector::from_fn(4, |i, _| l[(i, i)].ln());
        let zeros = DVector::<f64>::zeros(4);

        let data = varmap.data().lock().map_err(|_| EnsembleError::numerical("lock"))?;
        data["scale_offdiag"].set(&offdiag.to_tensor(&Device::Cpu)?)?;
        data["ln_scale_diag"].set(&ln_diag.to_tensor(&Device::Cpu)?)?;
        data["inducing_mean"].set(&zeros.to_tensor(&Device::Cpu)?)?;
        drop(data);

        let kl: f64 = q.kl_divergence()?.to_scalar()?;
        approx::assert_abs_diff_eq!(kl, 0.0, epsilon = 1e-8);
        Ok(())
    }

    #[test]
    fn sparse_and_mean_field_draws_share_a_shape() -> Result<()> {
        let x = grid(12);
        let kernel = Rbf::new(0.3);
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &Device::Cpu);
        let z = select_inducing_points(&x, 4)?;
        let sparse = SparseGp::new(vb.pp("s"), &kernel, &x, &z, 1e-3, -2.0, false)?;
        let dense = MeanFieldGp::new(vb.pp("d"), &GpPrior::new(&kernel, &x, 1e-3)?, -2.0)?;

        assert_eq!(sparse.num_inducing(), 4);

        let mut rng = SmallRng::seed_from_u64(9);
        assert_eq!(sparse.rsample(3, &mut rng)?.dims(), dense.rsample(3, &mut rng)?.dims());
        assert_eq!(sparse.snapshot()?.sample(3, &mut rng).shape(), (3, 12));
        assert!(sparse.kl_divergence()?.to_scalar::<f64>()?.is_finite());
        Ok(())
    }

    #[test]
    fn diagonal_conditional_keeps_the_exact_marginal_variances() -> Result<()> {
        let x = grid(10);
        let kernel = Rbf::new(0.4);
        let ridge = 1e-3;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &Device::Cpu);
        let z = select_inducing_points(&x, 3)?;
        let exact = SparseGp::new(vb.pp("e"), &kernel, &x, &z, ridge, -2.0, false)?;
        let diag = SparseGp::new(vb.pp("d"), &kernel, &x, &z, ridge, -2.0, true)?;

        // Var(f_i | u) is the squared norm of row i of the Cholesky factor
        let (ConditionalScale::Full(l), ConditionalScale::Diagonal(sd)) = (&exact.cond, &diag.cond)
        else {
            panic!("unexpected conditional scales");
        };
        assert_eq!(sd.len(), 10);
        for i in 0..10 {
            approx::assert_abs_diff_eq!(l.row(i).norm_squared(), sd[i] * sd[i], epsilon = 1e-6);
        }

        let mut rng = SmallRng::seed_from_u64(4);
        assert_eq!(diag.rsample(5, &mut rng)?.dims(), &[5, 10]);
        assert_eq!(diag.snapshot()?.sample(5, &mut rng).shape(), (5, 10));
        Ok(())
    }
}
