use super::regressor::Regressor;
use crate::features::{FeatureRecord, FeatureSchema, FeatureVectorizer};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ScoreError {
    #[error("Feature record was built for a different schema ({found} features, model expects {expected})")]
    SchemaMismatch { expected: usize, found: usize },
}

/// Scores complete feature records with the loaded model.
///
/// Read-only after construction, shared across requests behind an `Arc`.
pub struct PopularityScorer {
    schema: Arc<FeatureSchema>,
    regressor: Box<dyn Regressor>,
}

impl PopularityScorer {
    pub fn new(schema: Arc<FeatureSchema>, regressor: Box<dyn Regressor>) -> Self {
        Self { schema, regressor }
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    pub fn regressor_kind(&self) -> &'static str {
        self.regressor.kind()
    }

    /// A vectorizer producing records this scorer accepts.
    pub fn vectorizer(&self) -> FeatureVectorizer {
        FeatureVectorizer::new(Arc::clone(&self.schema))
    }

    /// Raw model output. No clamping into a display range.
    pub fn score(&self, record: &FeatureRecord) -> Result<f64, ScoreError> {
        let same_schema = Arc::ptr_eq(record.schema(), &self.schema)
            || record.schema().names() == self.schema.names();
        if !same_schema {
            return Err(ScoreError::SchemaMismatch {
                expected: self.schema.len(),
                found: record.schema().len(),
            });
        }
        Ok(self.regressor.predict(record.values()))
    }
}

impl std::fmt::Debug for PopularityScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PopularityScorer")
            .field("features", &self.schema.len())
            .field("regressor", &self.regressor.kind())
            .finish()
    }
}
