//! Exploratory profile generation.
//!
//! Perturbs a base [`AudioProfile`] with bounded Gaussian noise. The random
//! source is always passed in so tests can use a seeded generator.

use crate::features::AudioProfile;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GeneratorError {
    #[error("Invalid noise sigma for {field}: {sigma}")]
    InvalidSigma { field: &'static str, sigma: f64 },

    #[error("Invalid tempo bounds: [{min}, {max}]")]
    InvalidTempoBounds { min: f64, max: f64 },
}

/// Noise levels and clamping bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorSettings {
    pub danceability_sigma: f64,
    pub energy_sigma: f64,
    pub tempo_sigma: f64,
    pub tempo_min: f64,
    pub tempo_max: f64,
    /// Fixed seed for reproducible generation. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            danceability_sigma: 0.05,
            energy_sigma: 0.05,
            tempo_sigma: 5.0,
            tempo_min: 60.0,
            tempo_max: 180.0,
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfileGenerator {
    danceability_noise: Normal<f64>,
    energy_noise: Normal<f64>,
    tempo_noise: Normal<f64>,
    tempo_min: f64,
    tempo_max: f64,
}

fn noise(field: &'static str, sigma: f64) -> Result<Normal<f64>, GeneratorError> {
    if !sigma.is_finite() || sigma < 0.0 {
        return Err(GeneratorError::InvalidSigma { field, sigma });
    }
    Normal::new(0.0, sigma).map_err(|_| GeneratorError::InvalidSigma { field, sigma })
}

/// Clamp that maps NaN to the lower bound.
fn clamp_or_min(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

impl ProfileGenerator {
    pub fn new(settings: &GeneratorSettings) -> Result<Self, GeneratorError> {
        let (tempo_min, tempo_max) = (settings.tempo_min, settings.tempo_max);
        if !(tempo_min.is_finite() && tempo_max.is_finite() && tempo_min <= tempo_max) {
            return Err(GeneratorError::InvalidTempoBounds {
                min: tempo_min,
                max: tempo_max,
            });
        }
        Ok(Self {
            danceability_noise: noise("danceability", settings.danceability_sigma)?,
            energy_noise: noise("energy", settings.energy_sigma)?,
            tempo_noise: noise("tempo", settings.tempo_sigma)?,
            tempo_min,
            tempo_max,
        })
    }

    /// Returns a noisy copy of `base`.
    ///
    /// danceability and energy stay in [0, 1], tempo stays within the tempo
    /// bounds, every other field is copied unchanged.
    pub fn perturb<R: Rng + ?Sized>(&self, base: &AudioProfile, rng: &mut R) -> AudioProfile {
        let mut profile = *base;
        profile.danceability = clamp_or_min(
            base.danceability + self.danceability_noise.sample(rng),
            0.0,
            1.0,
        );
        profile.energy = clamp_or_min(base.energy + self.energy_noise.sample(rng), 0.0, 1.0);
        profile.tempo = clamp_or_min(
            base.tempo + self.tempo_noise.sample(rng),
            self.tempo_min,
            self.tempo_max,
        );
        profile
    }
}

impl Default for ProfileGenerator {
    fn default() -> Self {
        Self::new(&GeneratorSettings::default()).expect("default generator settings are valid")
    }
}
