//! Ensemble assembly, the generative model, and posterior prediction.

pub mod assemble;
pub mod draws;
pub mod model;
pub mod posterior;

pub use assemble::{
    assemble, base_matrix, base_predictions_from_columns, weighted_mean, BasePredictions,
    GaussianObservation,
};
pub use draws::PosteriorDraws;
pub use model::{EnsembleModel, ForwardOut};
pub use posterior::{predict_posterior, PosteriorPrediction};
