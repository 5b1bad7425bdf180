use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Numeric description of a track's audio characteristics.
///
/// Narrower than a [`super::FeatureRecord`]: no genre indicators and no
/// model-specific padding. Field names follow the model's column names.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioProfile {
    pub danceability: f64,
    pub energy: f64,
    pub loudness: f64,
    pub speechiness: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
    pub liveness: f64,
    pub valence: f64,
    pub tempo: f64,
    pub duration_ms: f64,
    /// Pitch class, 0 = C ... 11 = B.
    pub key: f64,
    /// 1 = major, 0 = minor.
    pub mode: f64,
}

/// Reference profile used as the starting point of generated profiles.
pub const BASE_PROFILE: AudioProfile = AudioProfile {
    danceability: 0.6,
    energy: 0.65,
    loudness: -6.0,
    speechiness: 0.05,
    acousticness: 0.3,
    instrumentalness: 0.01,
    liveness: 0.15,
    valence: 0.45,
    tempo: 110.0,
    duration_ms: 225_000.0,
    key: 0.0,
    mode: 1.0,
};

impl Default for AudioProfile {
    fn default() -> Self {
        BASE_PROFILE
    }
}

impl AudioProfile {
    /// Feature mapping keyed by model column name.
    pub fn to_features(&self) -> [(&'static str, f64); 12] {
        [
            ("danceability", self.danceability),
            ("energy", self.energy),
            ("loudness", self.loudness),
            ("speechiness", self.speechiness),
            ("acousticness", self.acousticness),
            ("instrumentalness", self.instrumentalness),
            ("liveness", self.liveness),
            ("valence", self.valence),
            ("tempo", self.tempo),
            ("duration_ms", self.duration_ms),
            ("key", self.key),
            ("mode", self.mode),
        ]
    }

    /// Copy of `self` with every field found by `lookup` (keyed by model
    /// column name) replaced.
    pub fn with_overrides(&self, lookup: impl Fn(&str) -> Option<f64>) -> AudioProfile {
        let value = |name: &str, current: f64| lookup(name).unwrap_or(current);
        AudioProfile {
            danceability: value("danceability", self.danceability),
            energy: value("energy", self.energy),
            loudness: value("loudness", self.loudness),
            speechiness: value("speechiness", self.speechiness),
            acousticness: value("acousticness", self.acousticness),
            instrumentalness: value("instrumentalness", self.instrumentalness),
            liveness: value("liveness", self.liveness),
            valence: value("valence", self.valence),
            tempo: value("tempo", self.tempo),
            duration_ms: value("duration_ms", self.duration_ms),
            key: value("key", self.key),
            mode: value("mode", self.mode),
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_ms / 1000.0
    }
}

/// A key signature as named by a person, e.g. "F# minor" or "Bb".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MusicalKey {
    pub pitch_class: u8,
    pub major: bool,
}

const PITCH_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

fn key_regex() -> &'static Regex {
    static KEY_RE: OnceLock<Regex> = OnceLock::new();
    KEY_RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*([a-g])\s*([#♯b♭]?)\s*(major|minor|maj|min|m)?\s*$")
            .expect("key pattern is valid")
    })
}

impl MusicalKey {
    /// Parses "C", "c# minor", "Bb major", "Am", "F#min".
    pub fn parse(text: &str) -> Option<Self> {
        let captures = key_regex().captures(text)?;

        let letter = captures.get(1)?.as_str().to_ascii_uppercase();
        let natural = match letter.as_str() {
            "C" => 0,
            "D" => 2,
            "E" => 4,
            "F" => 5,
            "G" => 7,
            "A" => 9,
            "B" => 11,
            _ => return None,
        };
        let accidental = captures
            .get(2)
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_default();
        let shift: i32 = match accidental.as_str() {
            "#" | "♯" => 1,
            "b" | "♭" => -1,
            _ => 0,
        };
        let pitch_class = (natural + shift).rem_euclid(12) as u8;

        // A lone "m" is minor. Anything starting with "maj" is major.
        let major = match captures.get(3).map(|m| m.as_str()) {
            None => true,
            Some(quality) => quality.to_ascii_lowercase().starts_with("maj"),
        };

        Some(Self { pitch_class, major })
    }

    pub fn name(&self) -> String {
        let quality = if self.major { "major" } else { "minor" };
        format!("{} {}", PITCH_NAMES[self.pitch_class as usize % 12], quality)
    }

    /// Applies this key to a profile, in the model's encoding.
    pub fn apply_to(&self, profile: &mut AudioProfile) {
        profile.key = f64::from(self.pitch_class);
        profile.mode = if self.major { 1.0 } else { 0.0 };
    }
}
