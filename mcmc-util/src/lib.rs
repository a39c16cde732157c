pub mod ess;
pub mod gibbs;
pub mod metropolis;
pub mod traits;

pub use ess::elliptical_slice_step;
pub use gibbs::{GibbsChain, GibbsSampler, GibbsState};
pub use metropolis::random_walk_step;
pub use traits::{EssParam, GibbsTarget};
