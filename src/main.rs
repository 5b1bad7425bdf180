use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hitlab_server::agent::llm::{create_provider, CompletionOptions};
use hitlab_server::assistant::{
    ExternalCallPolicy, HttpAudioSynthesizer, LlmCompositionAdvisor, LlmParameterExtractor,
};
use hitlab_server::config::{self, AppConfig};
use hitlab_server::generator::ProfileGenerator;
use hitlab_server::market::{CorpusSource, MarketCorpus, MarketStatsAggregator};
use hitlab_server::model::ModelArtifact;
use hitlab_server::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig};
use hitlab_server::studio::Studio;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the JSON model artifact.
    #[clap(long, value_parser = parse_path)]
    pub model_path: Option<PathBuf>,

    /// Path to the market corpus CSV.
    #[clap(long, value_parser = parse_path)]
    pub corpus_path: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Path to the frontend directory to be statically served.
    #[clap(long)]
    pub frontend_dir_path: Option<String>,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            model_path: args.model_path.clone(),
            corpus_path: args.corpus_path.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            frontend_dir_path: args.frontend_dir_path.clone(),
        }
    }
}

async fn build_studio(app_config: &AppConfig) -> Result<Studio> {
    info!("Loading model artifact from {:?}", app_config.model_path);
    let scorer = ModelArtifact::load(&app_config.model_path)
        .and_then(|artifact| artifact.into_scorer())
        .with_context(|| format!("Failed to load model from {:?}", app_config.model_path))?;
    info!(
        features = scorer.schema().len(),
        genres = scorer.schema().known_genres().len(),
        regressor = scorer.regressor_kind(),
        "Model loaded"
    );

    let corpus = if app_config.corpus.cache {
        info!("Loading market corpus from {:?}", app_config.corpus_path);
        let corpus = MarketCorpus::load_csv(&app_config.corpus_path).with_context(|| {
            format!("Failed to load corpus from {:?}", app_config.corpus_path)
        })?;
        info!(tracks = corpus.len(), "Market corpus loaded");
        if corpus.is_empty() {
            warn!("Market corpus is empty, generation requests will fail");
        }
        CorpusSource::Cached(Arc::new(corpus))
    } else {
        info!(
            "Market corpus will be read from {:?} on every request",
            app_config.corpus_path
        );
        CorpusSource::OnDemand(app_config.corpus_path.clone())
    };

    let generator =
        ProfileGenerator::new(&app_config.generator).context("Invalid generator settings")?;

    let mut studio = Studio::new(
        scorer,
        corpus,
        MarketStatsAggregator::new(app_config.aggregation.clone()),
        generator,
        app_config.generator.seed,
    );

    let llm = &app_config.llm;
    if llm.enabled {
        let provider = create_provider(llm).context("Failed to create LLM provider")?;
        info!(
            "LLM assistance enabled: {} ({}) at {}",
            provider.name(),
            provider.model(),
            llm.base_url
        );
        if let Err(e) = provider.health_check().await {
            warn!("LLM provider is not reachable yet, requests will degrade: {}", e);
        }
        let options = CompletionOptions {
            temperature: llm.temperature,
            timeout: llm.timeout(),
            ..Default::default()
        };
        studio = studio
            .with_extractor(Arc::new(LlmParameterExtractor::new(
                provider.clone(),
                options.clone(),
            )))
            .with_advisor(Arc::new(LlmCompositionAdvisor::new(provider, options)))
            .with_llm_policy(ExternalCallPolicy::new(
                &app_config.external_calls,
                llm.timeout(),
            ));
    } else {
        info!("LLM assistance disabled");
    }

    let synthesis = &app_config.synthesis;
    if synthesis.enabled {
        info!("Audio synthesis enabled at {}", synthesis.base_url);
        studio = studio
            .with_synthesizer(
                Arc::new(HttpAudioSynthesizer::new(synthesis.base_url.clone())),
                synthesis.preview_secs,
            )
            .with_synthesis_policy(ExternalCallPolicy::new(
                &app_config.external_calls,
                synthesis.timeout(),
            ));
    } else {
        info!("Audio synthesis disabled");
    }

    Ok(studio)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  model_path: {:?}", app_config.model_path);
    info!("  corpus_path: {:?}", app_config.corpus_path);
    info!("  port: {}", app_config.port);

    info!("Initializing metrics...");
    metrics::init_metrics();

    let studio = Arc::new(build_studio(&app_config).await?);

    run_server(
        studio,
        ServerConfig {
            requests_logging_level: app_config.logging_level.clone(),
            port: app_config.port,
            metrics_port: app_config.metrics_port,
            frontend_dir_path: app_config.frontend_dir_path.clone(),
        },
    )
    .await
}
