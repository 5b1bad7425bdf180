use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Optional TOML configuration. Every value present here overrides the
/// matching CLI argument.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub model_path: Option<String>,
    pub corpus_path: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub frontend_dir_path: Option<String>,

    pub corpus: Option<CorpusConfig>,
    pub aggregation: Option<AggregationConfig>,
    pub generator: Option<GeneratorConfig>,
    pub llm: Option<LlmConfig>,
    pub synthesis: Option<SynthesisConfig>,
    pub external_calls: Option<ExternalCallsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CorpusConfig {
    /// Load the corpus once at startup instead of on every request.
    pub cache: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AggregationConfig {
    pub top_quantile: Option<f64>,
    pub genre_min_tracks: Option<usize>,
    pub tempo_window: Option<f64>,
    pub tempo_min_tracks: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct GeneratorConfig {
    pub seed: Option<u64>,
    pub danceability_sigma: Option<f64>,
    pub energy_sigma: Option<f64>,
    pub tempo_sigma: Option<f64>,
    pub tempo_min: Option<f64>,
    pub tempo_max: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: Option<bool>,
    /// "ollama" or "openai"
    pub provider: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub api_key_command: Option<String>,
    pub temperature: Option<f32>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SynthesisConfig {
    pub enabled: Option<bool>,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub preview_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ExternalCallsConfig {
    pub max_retries: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
