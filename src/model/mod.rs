//! Popularity model: artifact loading and scoring.
//!
//! The trained model is opaque to the rest of the crate. It is loaded once at
//! startup and only exposed through the [`Regressor`] trait.

mod artifact;
mod regressor;
mod scorer;

pub use artifact::{ModelArtifact, ModelError, RegressorSpec, TreeNodeSpec, TreeSpec};
pub use regressor::{LinearRegressor, Regressor, TreeEnsembleRegressor};
pub use scorer::{PopularityScorer, ScoreError};
