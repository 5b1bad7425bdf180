use super::schema::{FeatureSchema, EXPLICIT_FEATURE, GENRE_FEATURE_PREFIX};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// A complete feature vector, one value per schema entry, in schema order.
///
/// Records are only produced by [`FeatureVectorizer::build`] and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    schema: Arc<FeatureSchema>,
    values: Vec<f64>,
}

impl FeatureRecord {
    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    /// Values in schema order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.schema.position(name).map(|p| self.values[p])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.schema
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    /// The genre whose indicator is set, if any.
    pub fn active_genre(&self) -> Option<&str> {
        self.schema
            .genre_positions()
            .iter()
            .find(|&&p| self.values[p] != 0.0)
            .map(|&p| &self.schema.names()[p][GENRE_FEATURE_PREFIX.len()..])
    }
}

/// Builds [`FeatureRecord`]s for one schema.
///
/// Total function: any partial mapping and any genre string produce a
/// well-formed record. Unknown keys are ignored and an unknown genre leaves
/// every indicator at 0.
#[derive(Debug, Clone)]
pub struct FeatureVectorizer {
    schema: Arc<FeatureSchema>,
}

impl FeatureVectorizer {
    pub fn new(schema: Arc<FeatureSchema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    pub fn build<I, K>(&self, partial: I, genre: Option<&str>) -> FeatureRecord
    where
        I: IntoIterator<Item = (K, f64)>,
        K: AsRef<str>,
    {
        let mut values = vec![0.0; self.schema.len()];

        for (key, value) in partial {
            let key = key.as_ref();
            // Indicators come from `genre` only, so one-hot always holds.
            if self.schema.is_genre_feature(key) {
                trace!(feature = key, "Ignoring genre indicator in partial features");
                continue;
            }
            match self.schema.position(key) {
                Some(position) => values[position] = value,
                None => trace!(feature = key, "Ignoring feature unknown to the model"),
            }
        }

        if let Some(position) = self.schema.position(EXPLICIT_FEATURE) {
            values[position] = 0.0;
        }

        if let Some(genre) = genre {
            match self.schema.genre_position(genre) {
                Some(position) => values[position] = 1.0,
                None => debug!(genre, "Genre unknown to the model, no indicator set"),
            }
        }

        FeatureRecord {
            schema: Arc::clone(&self.schema),
            values,
        }
    }
}
