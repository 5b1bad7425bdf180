use std::collections::HashMap;
use thiserror::Error;

/// Prefix of the one-hot genre indicator columns.
pub const GENRE_FEATURE_PREFIX: &str = "genre_clean_";

/// Explicit-content flag. Not user configurable, always fed to the model as 0.
pub const EXPLICIT_FEATURE: &str = "explicit";

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("Feature schema is empty")]
    Empty,

    #[error("Duplicate feature name in schema: {0}")]
    DuplicateFeature(String),

    #[error("Blank feature name at position {0}")]
    BlankFeature(usize),
}

/// The ordered feature names a trained model expects.
///
/// Order matters: values are presented to the regressor positionally.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    names: Vec<String>,
    index: HashMap<String, usize>,
    /// Positions of the genre indicator columns, in schema order.
    genre_positions: Vec<usize>,
}

impl FeatureSchema {
    pub fn new(names: Vec<String>) -> Result<Self, SchemaError> {
        if names.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut index = HashMap::with_capacity(names.len());
        let mut genre_positions = Vec::new();
        for (position, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(SchemaError::BlankFeature(position));
            }
            if index.insert(name.clone(), position).is_some() {
                return Err(SchemaError::DuplicateFeature(name.clone()));
            }
            if name.starts_with(GENRE_FEATURE_PREFIX) {
                genre_positions.push(position);
            }
        }

        Ok(Self {
            names,
            index,
            genre_positions,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn is_genre_feature(&self, name: &str) -> bool {
        name.starts_with(GENRE_FEATURE_PREFIX) && self.contains(name)
    }

    pub(crate) fn genre_positions(&self) -> &[usize] {
        &self.genre_positions
    }

    /// Genre labels the model knows about, in schema order.
    pub fn known_genres(&self) -> Vec<&str> {
        self.genre_positions
            .iter()
            .map(|&p| &self.names[p][GENRE_FEATURE_PREFIX.len()..])
            .collect()
    }

    /// Position of the indicator for `genre`.
    ///
    /// Exact label match first, then a trimmed ASCII case-insensitive match.
    pub fn genre_position(&self, genre: &str) -> Option<usize> {
        if let Some(position) = self.position(&format!("{GENRE_FEATURE_PREFIX}{genre}")) {
            return Some(position);
        }

        let wanted = genre.trim();
        if wanted.is_empty() {
            return None;
        }
        self.genre_positions.iter().copied().find(|&p| {
            self.names[p][GENRE_FEATURE_PREFIX.len()..].eq_ignore_ascii_case(wanted)
        })
    }

    /// Number of numeric (non genre indicator) features.
    pub fn numeric_len(&self) -> usize {
        self.names.len() - self.genre_positions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_partitions_genre_features() {
        let schema = FeatureSchema::new(names(&[
            "danceability",
            "genre_clean_pop",
            "tempo",
            "genre_clean_k-pop",
        ]))
        .unwrap();

        assert_eq!(schema.len(), 4);
        assert_eq!(schema.numeric_len(), 2);
        assert_eq!(schema.known_genres(), vec!["pop", "k-pop"]);
        assert!(schema.is_genre_feature("genre_clean_pop"));
        assert!(!schema.is_genre_feature("genre_clean_rock"));
        assert!(!schema.is_genre_feature("tempo"));
    }

    #[test]
    fn test_rejects_invalid_schemas() {
        assert_eq!(FeatureSchema::new(vec![]), Err(SchemaError::Empty));
        assert_eq!(
            FeatureSchema::new(names(&["tempo", "tempo"])),
            Err(SchemaError::DuplicateFeature("tempo".to_string()))
        );
        assert_eq!(
            FeatureSchema::new(names(&["tempo", "  "])),
            Err(SchemaError::BlankFeature(1))
        );
    }

    #[test]
    fn test_genre_position_lookup() {
        let schema =
            FeatureSchema::new(names(&["energy", "genre_clean_hip-hop", "genre_clean_Latin"]))
                .unwrap();

        assert_eq!(schema.genre_position("hip-hop"), Some(1));
        assert_eq!(schema.genre_position(" HIP-HOP "), Some(1));
        assert_eq!(schema.genre_position("latin"), Some(2));
        assert_eq!(schema.genre_position("Latin"), Some(2));
        assert_eq!(schema.genre_position("polka"), None);
        assert_eq!(schema.genre_position(""), None);
    }
}
