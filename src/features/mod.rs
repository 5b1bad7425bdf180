//! Feature vectors consumed by the popularity model.
//!
//! The schema is fixed when the model artifact is loaded. Records are built
//! fresh per request from a partial user mapping and an optional genre label.

mod profile;
mod schema;
mod vectorizer;

pub use profile::{AudioProfile, MusicalKey, BASE_PROFILE};
pub use schema::{FeatureSchema, SchemaError, EXPLICIT_FEATURE, GENRE_FEATURE_PREFIX};
pub use vectorizer::{FeatureRecord, FeatureVectorizer};
