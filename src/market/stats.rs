use super::corpus::{MarketCorpus, MarketTrack};
use crate::features::AudioProfile;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum MarketStatsError {
    #[error("Market corpus is empty")]
    EmptyCorpus,

    #[error("No track reaches the popularity threshold {threshold}")]
    EmptyTopQuantile { threshold: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationSettings {
    /// Popularity quantile defining the "hit" subset.
    pub top_quantile: f64,
    /// A genre slice must be strictly larger than this to be used.
    pub genre_min_tracks: usize,
    /// Max distance in BPM for the tempo slice.
    pub tempo_window: f64,
    /// A tempo slice needs at least this many tracks to be used.
    pub tempo_min_tracks: usize,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            top_quantile: 0.8,
            genre_min_tracks: 10,
            tempo_window: 10.0,
            tempo_min_tracks: 5,
        }
    }
}

/// Median targets of the successful tracks matching a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketProfile {
    pub danceability: f64,
    pub energy: f64,
    pub key: f64,
    pub mode: f64,
    pub valence: f64,
    pub tempo: f64,
    pub duration_ms: f64,
    /// Size of the working set the medians were taken over.
    pub track_count: usize,
    pub popularity_threshold: f64,
    pub genre_applied: bool,
    pub tempo_applied: bool,
}

impl MarketProfile {
    /// Overrides the market-driven fields of `base`.
    pub fn apply_to(&self, base: &AudioProfile) -> AudioProfile {
        AudioProfile {
            danceability: self.danceability,
            energy: self.energy,
            key: self.key,
            mode: self.mode,
            valence: self.valence,
            tempo: self.tempo,
            duration_ms: self.duration_ms,
            ..*base
        }
    }
}

/// Quantile with linear interpolation between closest ranks.
///
/// NaN values are skipped. Returns NaN for an empty input.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(f64::total_cmp);

    let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Median ignoring NaN values. Even counts average the two middle values.
pub fn median(values: &[f64]) -> f64 {
    percentile(values, 0.5)
}

#[derive(Debug, Clone, Default)]
pub struct MarketStatsAggregator {
    settings: AggregationSettings,
}

impl MarketStatsAggregator {
    pub fn new(settings: AggregationSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AggregationSettings {
        &self.settings
    }

    /// Computes target medians from the top-popularity tracks, narrowed by
    /// genre and tempo when the narrower slices are large enough.
    ///
    /// When `tempo` is given the returned tempo is exactly `tempo`, whatever
    /// slice was used.
    pub fn aggregate(
        &self,
        corpus: &MarketCorpus,
        genre: Option<&str>,
        tempo: Option<f64>,
    ) -> Result<MarketProfile, MarketStatsError> {
        if corpus.is_empty() {
            return Err(MarketStatsError::EmptyCorpus);
        }

        let popularity: Vec<f64> = corpus.tracks().iter().map(|t| t.popularity).collect();
        let threshold = percentile(&popularity, self.settings.top_quantile);
        let top: Vec<&MarketTrack> = corpus
            .tracks()
            .iter()
            .filter(|t| t.popularity >= threshold)
            .collect();
        if top.is_empty() {
            return Err(MarketStatsError::EmptyTopQuantile { threshold });
        }

        let mut working = top;
        let mut genre_applied = false;
        if let Some(genre) = genre {
            let slice: Vec<&MarketTrack> =
                working.iter().copied().filter(|t| t.has_genre(genre)).collect();
            if slice.len() > self.settings.genre_min_tracks {
                working = slice;
                genre_applied = true;
            } else {
                debug!(genre, matches = slice.len(), "Genre slice too small, keeping top set");
            }
        }

        let mut tempo_applied = false;
        if let Some(tempo) = tempo {
            let window = self.settings.tempo_window;
            let slice: Vec<&MarketTrack> = working
                .iter()
                .copied()
                .filter(|t| (t.tempo - tempo).abs() <= window)
                .collect();
            if slice.len() >= self.settings.tempo_min_tracks {
                working = slice;
                tempo_applied = true;
            } else {
                debug!(tempo, matches = slice.len(), "Tempo slice too small, keeping working set");
            }
        }

        let column = |f: fn(&MarketTrack) -> f64| -> f64 {
            let values: Vec<f64> = working.iter().map(|t| f(t)).collect();
            median(&values)
        };

        let profile = MarketProfile {
            danceability: column(|t| t.danceability),
            energy: column(|t| t.energy),
            key: column(|t| t.key),
            mode: column(|t| t.mode),
            valence: column(|t| t.valence),
            tempo: tempo.unwrap_or_else(|| column(|t| t.tempo)),
            duration_ms: column(|t| t.duration_ms),
            track_count: working.len(),
            popularity_threshold: threshold,
            genre_applied,
            tempo_applied,
        };
        debug!(
            track_count = profile.track_count,
            threshold,
            genre_applied,
            tempo_applied,
            "Aggregated market profile"
        );
        Ok(profile)
    }
}
