use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use hitlab_server::explain::Explainer;
use hitlab_server::features::BASE_PROFILE;
use hitlab_server::market::{AggregationSettings, MarketCorpus, MarketStatsAggregator};
use hitlab_server::model::{ModelArtifact, PopularityScorer};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

/// `name=value` pair.
fn parse_feature(s: &str) -> Result<(String, f64)> {
    let Some((name, value)) = s.split_once('=') else {
        bail!("Expected name=value, got '{}'", s);
    };
    let value: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("Invalid number for feature '{}'", name))?;
    Ok((name.trim().to_string(), value))
}

#[derive(Parser, Debug)]
#[command(about = "Offline scoring and market inspection")]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scores a feature set. Missing features are 0 for the model.
    Score {
        #[clap(long, value_parser = parse_path)]
        model: PathBuf,

        /// Feature value, repeatable: --feature energy=0.8
        #[clap(long = "feature", value_parser = parse_feature)]
        features: Vec<(String, f64)>,

        #[clap(long)]
        genre: Option<String>,
    },

    /// Lists the genres the model knows about.
    Genres {
        #[clap(long, value_parser = parse_path)]
        model: PathBuf,
    },

    /// Prints the market targets for a genre and tempo.
    Market {
        #[clap(long, value_parser = parse_path)]
        corpus: PathBuf,

        #[clap(long)]
        genre: Option<String>,

        #[clap(long)]
        tempo: Option<f64>,
    },
}

fn load_scorer(path: &Path) -> Result<PopularityScorer> {
    ModelArtifact::load(path)
        .and_then(|artifact| artifact.into_scorer())
        .with_context(|| format!("Failed to load model from {:?}", path))
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    match cli_args.command {
        Command::Score {
            model,
            features,
            genre,
        } => {
            let scorer = load_scorer(&model)?;
            let features: BTreeMap<String, f64> = features.into_iter().collect();
            let record = scorer
                .vectorizer()
                .build(features.iter().map(|(k, v)| (k.as_str(), *v)), genre.as_deref());
            let score = scorer.score(&record)?;

            let scored = |name: &str| features.get(name).copied().or_else(|| record.get(name));
            let profile = BASE_PROFILE.with_overrides(scored);
            let explanation =
                Explainer.explain_where(&profile, score, |name| scored(name).is_some());
            println!("{}", explanation.to_markdown());
        }
        Command::Genres { model } => {
            let scorer = load_scorer(&model)?;
            for genre in scorer.schema().known_genres() {
                println!("{}", genre);
            }
        }
        Command::Market {
            corpus,
            genre,
            tempo,
        } => {
            let corpus = MarketCorpus::load_csv(&corpus)
                .with_context(|| format!("Failed to load corpus from {:?}", corpus))?;
            let profile = MarketStatsAggregator::new(AggregationSettings::default()).aggregate(
                &corpus,
                genre.as_deref(),
                tempo,
            )?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
    }

    Ok(())
}
