//! Threshold-based commentary on a popularity score.

use crate::features::AudioProfile;
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PotentialTier {
    Strong,
    Good,
    Limited,
}

impl PotentialTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 70.0 {
            PotentialTier::Strong
        } else if score >= 50.0 {
            PotentialTier::Good
        } else {
            PotentialTier::Limited
        }
    }

    pub fn headline(&self) -> &'static str {
        match self {
            PotentialTier::Strong => "Very strong commercial potential",
            PotentialTier::Good => "Good potential",
            PotentialTier::Limited => "Limited potential",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    pub score: f64,
    pub tier: PotentialTier,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub summary: String,
}

impl Explanation {
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "**Estimated popularity: {:.1} / 100**", self.score);
        let _ = writeln!(out);
        let _ = writeln!(out, "**{}**", self.tier.headline());
        if !self.strengths.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Strengths:");
            for line in &self.strengths {
                let _ = writeln!(out, "- {line}");
            }
        }
        if !self.weaknesses.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Weak points:");
            for line in &self.weaknesses {
                let _ = writeln!(out, "- {line}");
            }
        }
        let _ = writeln!(out);
        out.push_str(&self.summary);
        out
    }
}

/// Stateless. Same profile and score always give the same explanation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Explainer;

impl Explainer {
    pub fn explain(&self, features: &AudioProfile, score: f64) -> Explanation {
        self.explain_where(features, score, |_| true)
    }

    /// Like `explain`, but only judges fields for which `known` returns true
    /// (model column names such as `duration_ms`).
    pub fn explain_where(
        &self,
        features: &AudioProfile,
        score: f64,
        known: impl Fn(&str) -> bool,
    ) -> Explanation {
        let mut strengths = Vec::new();
        let mut weaknesses = Vec::new();
        let mut strength = |s: &str| strengths.push(s.to_string());
        let mut weakness = |s: &str| weaknesses.push(s.to_string());

        if known("danceability") {
            if features.danceability >= 0.7 {
                strength("Highly danceable groove, well suited to playlists.");
            } else if features.danceability < 0.4 {
                weakness("Low danceability limits playlist placement.");
            }
        }

        if known("energy") {
            if features.energy >= 0.7 {
                strength("High energy keeps listeners engaged.");
            } else if features.energy < 0.4 {
                weakness("Low energy may lose listeners early.");
            }
        }

        if known("valence") {
            if features.valence >= 0.6 {
                strength("Positive mood, which tends to travel well.");
            } else if features.valence < 0.3 {
                weakness("Dark mood narrows the mainstream audience.");
            }
        }

        if known("tempo") {
            if (95.0..=130.0).contains(&features.tempo) {
                strength("Tempo sits in the mainstream range.");
            } else if features.tempo < 80.0 || features.tempo > 160.0 {
                weakness("Unusual tempo for chart-oriented tracks.");
            }
        }

        if known("duration_ms") {
            let seconds = features.duration_secs();
            if (150.0..=240.0).contains(&seconds) {
                strength("Radio-friendly duration.");
            } else if seconds > 300.0 {
                weakness("Long duration hurts replays and radio play.");
            } else if seconds < 120.0 {
                weakness("Very short duration.");
            }
        }

        if known("acousticness") && features.acousticness >= 0.7 {
            weakness("Strongly acoustic production is a niche in current charts.");
        }

        if known("speechiness") && features.speechiness >= 0.33 {
            weakness("Very speech-heavy, closer to spoken word than a song.");
        }

        if known("instrumentalness") && features.instrumentalness >= 0.5 {
            weakness("Mostly instrumental, lacking a vocal hook.");
        }

        if known("loudness") {
            if features.loudness >= -8.0 {
                strength("Loud, modern mastering.");
            } else if features.loudness < -14.0 {
                weakness("Quiet master compared to current releases.");
            }
        }

        let tier = PotentialTier::from_score(score);
        let summary = match tier {
            PotentialTier::Strong => {
                "The profile matches what currently performs well.".to_string()
            }
            PotentialTier::Good => {
                "Solid profile with room to tighten a few parameters.".to_string()
            }
            PotentialTier::Limited => {
                "The profile is far from current commercial trends.".to_string()
            }
        };

        Explanation {
            score,
            tier,
            strengths,
            weaknesses,
            summary,
        }
    }
}
