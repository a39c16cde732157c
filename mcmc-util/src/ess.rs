use rand::Rng;
use std::f64::consts::PI;

use crate::traits::EssParam;

/// Once the bracket is this narrow the proposal equals the current
/// state up to rounding.
const MIN_BRACKET: f64 = 1e-12;

/// One ESS transition. Returns `(new_params, new_lnpdf)`.
///
/// - `current`: current parameter value f
/// - `prior_sample`: a draw ν from the zero-mean prior
/// - `lnpdf`: log-likelihood function (just likelihood, not prior)
/// - `cur_lnpdf`: cached log-likelihood at `current`
/// - `rng`: random number generator
///
/// Proposals whose log-likelihood is not finite never pass the slice.
pub fn elliptical_slice_step<P: EssParam>(
    current: &P,
    prior_sample: &P,
    lnpdf: &impl Fn(&P) -> f64,
    cur_lnpdf: f64,
    rng: &mut impl Rng,
) -> (P, f64) {
    let u: f64 = rng.random();
    let hh = u.ln() + cur_lnpdf;

    let phi: f64 = rng.random_range(0.0..2.0 * PI);
    let mut phi_min = phi - 2.0 * PI;
    let mut phi_max = phi;

    let mut angle = phi;
    loop {
        let proposal = current.linear_combine(angle.cos(), prior_sample, angle.sin());
        let new_lnpdf = lnpdf(&proposal);

        if new_lnpdf.is_finite() && new_lnpdf > hh {
            return (proposal, new_lnpdf);
        }

        if angle < 0.0 {
            phi_min = angle;
        } else {
            phi_max = angle;
        }

        if phi_max - phi_min < MIN_BRACKET {
            return (current.clone(), cur_lnpdf);
        }
        angle = rng.random_range(phi_min..phi_max);
    }
}
