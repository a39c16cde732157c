use rand::Rng;
use rand_distr::StandardNormal;

/// One random-walk Metropolis transition on a scalar.
/// Returns `(new_value, new_log_target, accepted)`.
///
/// - `current`: current value
/// - `log_target`: unnormalized log density
/// - `cur_log_target`: cached value of `log_target(current)`
/// - `scale`: standard deviation of the Gaussian proposal
///
/// A proposal with a non-finite log density is always rejected.
pub fn random_walk_step(
    current: f64,
    log_target: &impl Fn(f64) -> f64,
    cur_log_target: f64,
    scale: f64,
    rng: &mut impl Rng,
) -> (f64, f64, bool) {
    let eps: f64 = rng.sample(StandardNormal);
    let proposal = current + scale * eps;
    let new_log_target = log_target(proposal);

    if !new_log_target.is_finite() {
        return (current, cur_log_target, false);
    }

    let log_u: f64 = rng.random::<f64>().ln();
    if log_u < new_log_target - cur_log_target {
        (proposal, new_log_target, true)
    } else {
        (current, cur_log_target, false)
    }
}
