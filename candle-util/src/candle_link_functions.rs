use candle_core::{DType, Result, Tensor, D};

/// Maps a stack of logits onto the probability simplex along the last
/// dimension.
///
/// Every variant returns rows that are non-negative and sum to one.
/// `Sparsemax` and `Entmax15` can put exact zeros on weak entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimplexLink {
    Softmax,
    Sparsemax,
    /// α-entmax with α = 1.5 (Peters, Niculae & Martins, 2019)
    #[default]
    Entmax15,
}

impl SimplexLink {
    /// Apply the link to `logits / temperature`
    ///
    /// * `logits` - shape `(..., K)`
    /// * `temperature` - positive, broadcastable to `logits`
    pub fn apply(&self, logits: &Tensor, temperature: &Tensor) -> Result<Tensor> {
        let z = logits.broadcast_div(temperature)?;
        self.apply_unscaled(&z)
    }

    /// Apply the link with unit temperature
    pub fn apply_unscaled(&self, z: &Tensor) -> Result<Tensor> {
        match self {
            SimplexLink::Softmax => candle_nn::ops::softmax(z, D::Minus1),
            SimplexLink::Sparsemax => sparsemax(z),
            SimplexLink::Entmax15 => entmax15(z),
        }
    }
}

/// `1, 2, ..., K` broadcastable against `(..., K)`
fn support_index(z: &Tensor) -> Result<Tensor> {
    let k = z.dim(D::Minus1)? as u32;
    Tensor::arange(1u32, k + 1, z.device())?.to_dtype(z.dtype())
}

/// Euclidean projection onto the simplex (Martins & Astudillo, 2016)
///
/// p = max(z - τ, 0) where τ makes the row sum to one
pub fn sparsemax(z: &Tensor) -> Result<Tensor> {
    let z = z.broadcast_sub(&z.max_keepdim(D::Minus1)?)?;
    let (z_sorted, _) = z.sort_last_dim(false)?;
    let rho = support_index(&z)?;
    let cumsum = z_sorted.cumsum(D::Minus1)?;

    // k is in the support iff 1 + k z_(k) > Σ_{j<=k} z_(j)
    let in_support = (z_sorted.broadcast_mul(&rho)? + 1.0)?
        .gt(&cumsum)?
        .to_dtype(z.dtype())?;

    let k_z = in_support.sum_keepdim(D::Minus1)?;
    let tau = ((z_sorted * &in_support)?.sum_keepdim(D::Minus1)? - 1.0)?.broadcast_div(&k_z)?;

    z.broadcast_sub(&tau)?.relu()
}

/// Exact sort-based 1.5-entmax
///
/// p = max(z/2 - τ, 0)² where τ makes the row sum to one
pub fn entmax15(z: &Tensor) -> Result<Tensor> {
    let x = (z / 2.0)?;
    let x = x.broadcast_sub(&x.max_keepdim(D::Minus1)?)?;
    let (x_sorted, _) = x.sort_last_dim(false)?;
    let rho = support_index(&x)?;

    let mean = x_sorted.cumsum(D::Minus1)?.broadcast_div(&rho)?;
    let mean_sq = x_sorted.sqr()?.cumsum(D::Minus1)?.broadcast_div(&rho)?;
    let ss = (mean_sq - mean.sqr()?)?.broadcast_mul(&rho)?;
    let delta = (ss.neg()? + 1.0)?.broadcast_div(&rho)?;

    // floor keeps sqrt and its gradient finite off the support
    let tau = (mean - delta.maximum(1e-12)?.sqrt()?)?;

    let support_size = tau
        .le(&x_sorted)?
        .to_dtype(x.dtype())?
        .sum_keepdim(D::Minus1)?;
    let last = (support_size - 1.0)?.to_dtype(DType::U32)?;
    let tau_star = tau.contiguous()?.gather(&last, D::Minus1)?;

    x.broadcast_sub(&tau_star)?.relu()?.sqr()
}
