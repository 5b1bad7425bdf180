mod file_config;

pub use file_config::{
    AggregationConfig, CorpusConfig, ExternalCallsConfig, FileConfig, GeneratorConfig, LlmConfig,
    SynthesisConfig,
};

use crate::generator::GeneratorSettings;
use crate::market::AggregationSettings;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub model_path: Option<PathBuf>,
    pub corpus_path: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model_path: PathBuf,
    pub corpus_path: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,

    pub corpus: CorpusSettings,
    pub aggregation: AggregationSettings,
    pub generator: GeneratorSettings,
    pub llm: LlmSettings,
    pub synthesis: SynthesisSettings,
    pub external_calls: ExternalCallSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let model_path = file
            .model_path
            .map(PathBuf::from)
            .or_else(|| cli.model_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("model_path must be specified via --model-path or in config file")
            })?;
        if !model_path.is_file() {
            bail!("Model artifact does not exist: {:?}", model_path);
        }

        let corpus_path = file
            .corpus_path
            .map(PathBuf::from)
            .or_else(|| cli.corpus_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("corpus_path must be specified via --corpus-path or in config file")
            })?;

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = match file.logging_level {
            Some(s) => match parse_logging_level(&s) {
                Some(level) => level,
                None => bail!("Invalid logging_level in config file: {}", s),
            },
            None => cli.logging_level.clone(),
        };

        let frontend_dir_path = file
            .frontend_dir_path
            .or_else(|| cli.frontend_dir_path.clone());

        let corpus_file = file.corpus.unwrap_or_default();
        let corpus = CorpusSettings {
            cache: corpus_file.cache.unwrap_or(true),
        };
        if corpus.cache && !corpus_path.is_file() {
            bail!("Market corpus does not exist: {:?}", corpus_path);
        }

        let agg_file = file.aggregation.unwrap_or_default();
        let agg_defaults = AggregationSettings::default();
        let aggregation = AggregationSettings {
            top_quantile: agg_file.top_quantile.unwrap_or(agg_defaults.top_quantile),
            genre_min_tracks: agg_file
                .genre_min_tracks
                .unwrap_or(agg_defaults.genre_min_tracks),
            tempo_window: agg_file.tempo_window.unwrap_or(agg_defaults.tempo_window),
            tempo_min_tracks: agg_file
                .tempo_min_tracks
                .unwrap_or(agg_defaults.tempo_min_tracks),
        };
        if !(0.0..=1.0).contains(&aggregation.top_quantile) {
            bail!(
                "aggregation.top_quantile must be within [0, 1], got {}",
                aggregation.top_quantile
            );
        }
        if !(aggregation.tempo_window >= 0.0) {
            bail!(
                "aggregation.tempo_window must be non-negative, got {}",
                aggregation.tempo_window
            );
        }

        let gen_file = file.generator.unwrap_or_default();
        let gen_defaults = GeneratorSettings::default();
        let generator = GeneratorSettings {
            danceability_sigma: gen_file
                .danceability_sigma
                .unwrap_or(gen_defaults.danceability_sigma),
            energy_sigma: gen_file.energy_sigma.unwrap_or(gen_defaults.energy_sigma),
            tempo_sigma: gen_file.tempo_sigma.unwrap_or(gen_defaults.tempo_sigma),
            tempo_min: gen_file.tempo_min.unwrap_or(gen_defaults.tempo_min),
            tempo_max: gen_file.tempo_max.unwrap_or(gen_defaults.tempo_max),
            seed: gen_file.seed,
        };

        let llm_file = file.llm.unwrap_or_default();
        let llm_defaults = LlmSettings::default();
        let llm = LlmSettings {
            enabled: llm_file.enabled.unwrap_or(llm_defaults.enabled),
            provider: llm_file.provider.unwrap_or(llm_defaults.provider),
            base_url: llm_file.base_url.unwrap_or(llm_defaults.base_url),
            model: llm_file.model.unwrap_or(llm_defaults.model),
            api_key: llm_file.api_key,
            api_key_command: llm_file.api_key_command,
            temperature: llm_file.temperature.unwrap_or(llm_defaults.temperature),
            timeout_secs: llm_file.timeout_secs.unwrap_or(llm_defaults.timeout_secs),
        };
        if llm.enabled && !matches!(llm.provider.as_str(), "ollama" | "openai") {
            bail!("Unsupported llm.provider: {}", llm.provider);
        }

        let synth_file = file.synthesis.unwrap_or_default();
        let synth_defaults = SynthesisSettings::default();
        let synthesis = SynthesisSettings {
            enabled: synth_file.enabled.unwrap_or(synth_defaults.enabled),
            base_url: synth_file.base_url.unwrap_or(synth_defaults.base_url),
            timeout_secs: synth_file
                .timeout_secs
                .unwrap_or(synth_defaults.timeout_secs),
            preview_secs: synth_file
                .preview_secs
                .unwrap_or(synth_defaults.preview_secs),
        };
        if !(synthesis.preview_secs > 0.0) {
            bail!(
                "synthesis.preview_secs must be positive, got {}",
                synthesis.preview_secs
            );
        }

        let calls_file = file.external_calls.unwrap_or_default();
        let calls_defaults = ExternalCallSettings::default();
        let external_calls = ExternalCallSettings {
            max_retries: calls_file.max_retries.unwrap_or(calls_defaults.max_retries),
            initial_backoff_ms: calls_file
                .initial_backoff_ms
                .unwrap_or(calls_defaults.initial_backoff_ms),
            backoff_multiplier: calls_file
                .backoff_multiplier
                .unwrap_or(calls_defaults.backoff_multiplier),
        };

        Ok(AppConfig {
            model_path,
            corpus_path,
            port,
            metrics_port,
            logging_level,
            frontend_dir_path,
            corpus,
            aggregation,
            generator,
            llm,
            synthesis,
            external_calls,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CorpusSettings {
    pub cache: bool,
}

/// Settings for the LLM provider backing parameter extraction and advice.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub enabled: bool,
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub api_key_command: Option<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl LlmSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            api_key: None,
            api_key_command: None,
            temperature: 0.3,
            timeout_secs: 30,
        }
    }
}

/// Settings for the remote audio synthesis service.
#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Length of the generated preview.
    pub preview_secs: f64,
}

impl SynthesisSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://localhost:8050".to_string(),
            timeout_secs: 120,
            preview_secs: 8.0,
        }
    }
}

/// Retry behaviour shared by every outbound call.
#[derive(Debug, Clone)]
pub struct ExternalCallSettings {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for ExternalCallSettings {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_backoff_ms: 250,
            backoff_multiplier: 2.0,
        }
    }
}

fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    struct Fixtures {
        model: NamedTempFile,
        corpus: NamedTempFile,
    }

    fn make_fixtures() -> Fixtures {
        let mut model = NamedTempFile::new().unwrap();
        write!(model, "{{}}").unwrap();
        let mut corpus = NamedTempFile::new().unwrap();
        writeln!(corpus, "genre,popularity").unwrap();
        Fixtures { model, corpus }
    }

    fn make_cli(fixtures: &Fixtures) -> CliConfig {
        CliConfig {
            model_path: Some(fixtures.model.path().to_path_buf()),
            corpus_path: Some(fixtures.corpus.path().to_path_buf()),
            port: 3001,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Headers,
            frontend_dir_path: Some("/frontend".to_string()),
        }
    }

    #[test]
    fn test_parse_logging_level() {
        assert!(matches!(
            parse_logging_level("none"),
            Some(RequestsLoggingLevel::None)
        ));
        assert!(matches!(
            parse_logging_level("PATH"),
            Some(RequestsLoggingLevel::Path)
        ));
        assert!(matches!(
            parse_logging_level("body"),
            Some(RequestsLoggingLevel::Body)
        ));
        assert!(parse_logging_level("invalid").is_none());
    }

    #[test]
    fn test_resolve_cli_only() {
        let fixtures = make_fixtures();
        let cli = make_cli(&fixtures);

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.model_path, fixtures.model.path());
        assert_eq!(config.corpus_path, fixtures.corpus.path());
        assert_eq!(config.port, 3001);
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Headers);
        assert_eq!(config.frontend_dir_path.as_deref(), Some("/frontend"));

        assert!(config.corpus.cache);
        assert_eq!(config.aggregation, AggregationSettings::default());
        assert_eq!(config.generator, GeneratorSettings::default());
        assert!(!config.llm.enabled);
        assert!(!config.synthesis.enabled);
        assert_eq!(config.external_calls.max_retries, 1);
    }

    #[test]
    fn test_toml_overrides_cli() {
        let fixtures = make_fixtures();
        let cli = make_cli(&fixtures);
        let file: FileConfig = toml::from_str(
            r#"
            port = 8080
            logging_level = "none"

            [aggregation]
            tempo_window = 5.0

            [generator]
            seed = 7
            tempo_sigma = 2.0

            [llm]
            enabled = true
            model = "mistral"

            [external_calls]
            max_retries = 0
            "#,
        )
        .unwrap();

        let config = AppConfig::resolve(&cli, Some(file)).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.logging_level, RequestsLoggingLevel::None);
        assert_eq!(config.aggregation.tempo_window, 5.0);
        assert_eq!(config.aggregation.tempo_min_tracks, 5);
        assert_eq!(config.generator.seed, Some(7));
        assert_eq!(config.generator.tempo_sigma, 2.0);
        assert_eq!(config.generator.energy_sigma, 0.05);
        assert!(config.llm.enabled);
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.model, "mistral");
        assert_eq!(config.external_calls.max_retries, 0);
    }

    #[test]
    fn test_missing_model_path_fails() {
        let fixtures = make_fixtures();
        let cli = CliConfig {
            model_path: None,
            ..make_cli(&fixtures)
        };
        assert!(AppConfig::resolve(&cli, None).is_err());

        let cli = CliConfig {
            model_path: Some(PathBuf::from("/nonexistent/model.json")),
            ..make_cli(&fixtures)
        };
        assert!(AppConfig::resolve(&cli, None).is_err());
    }

    #[test]
    fn test_on_demand_corpus_may_be_missing_at_startup() {
        let fixtures = make_fixtures();
        let cli = CliConfig {
            corpus_path: Some(PathBuf::from("/data/later.csv")),
            ..make_cli(&fixtures)
        };
        assert!(AppConfig::resolve(&cli, None).is_err());

        let file: FileConfig = toml::from_str("[corpus]\ncache = false").unwrap();
        let config = AppConfig::resolve(&cli, Some(file)).unwrap();
        assert!(!config.corpus.cache);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let fixtures = make_fixtures();
        let cli = make_cli(&fixtures);

        for toml in [
            "logging_level = \"loud\"",
            "[aggregation]\ntop_quantile = 1.5",
            "[aggregation]\ntempo_window = -1.0",
            "[llm]\nenabled = true\nprovider = \"pigeon\"",
            "[synthesis]\npreview_secs = 0.0",
        ] {
            let file: FileConfig = toml::from_str(toml).unwrap();
            assert!(AppConfig::resolve(&cli, Some(file)).is_err(), "{toml}");
        }
    }
}
