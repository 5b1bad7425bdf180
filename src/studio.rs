//! The two user flows, prediction and generation, over an explicitly
//! constructed context.
//!
//! A [`Studio`] is built once at startup and then shared read-only between
//! requests. The only interior mutability is the generator's random source.

use crate::assistant::{
    AdviceContext, AudioClip, AudioSynthesizer, CompositionAdvisor, ExternalCallPolicy,
    ExtractedParameters, ExtractionStatus, ParameterExtractor, ServiceOutcome, SynthesisRequest,
};
use crate::explain::{Explainer, Explanation};
use crate::features::{AudioProfile, FeatureVectorizer, BASE_PROFILE};
use crate::generator::ProfileGenerator;
use crate::market::{
    CorpusError, CorpusSource, MarketProfile, MarketStatsAggregator, MarketStatsError,
};
use crate::model::{PopularityScorer, ScoreError};
use crate::server::metrics::{record_generation, record_prediction};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("Market corpus unavailable: {0}")]
    Corpus(#[from] CorpusError),

    #[error("Cannot derive market targets: {0}")]
    Market(#[from] MarketStatsError),

    #[error("Scoring failed: {0}")]
    Score(#[from] ScoreError),
}

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub score: f64,
    /// Genre indicator actually set, `None` when the genre is unknown.
    pub genre: Option<String>,
    pub explanation: Explanation,
    /// Profile fields absent from the input. The model saw 0 for those it
    /// uses; the rest are left out of the explanation.
    pub defaulted: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub description: Option<String>,
    pub genre: Option<String>,
    pub tempo: Option<f64>,
    pub explore: bool,
    pub advice: bool,
    pub audio: bool,
}

#[derive(Debug, Clone)]
pub struct Generation {
    pub id: Uuid,
    pub extraction: ExtractionStatus,
    /// Effective parameters: explicit request values over extracted ones.
    pub parameters: ExtractedParameters,
    pub market: MarketProfile,
    pub profile: AudioProfile,
    pub score: f64,
    pub explanation: Explanation,
    pub advice: ServiceOutcome<String>,
    pub audio: ServiceOutcome<AudioClip>,
}

pub struct Studio {
    scorer: PopularityScorer,
    vectorizer: FeatureVectorizer,
    explainer: Explainer,
    corpus: CorpusSource,
    aggregator: MarketStatsAggregator,
    generator: ProfileGenerator,
    rng: Mutex<StdRng>,
    extractor: Option<Arc<dyn ParameterExtractor>>,
    advisor: Option<Arc<dyn CompositionAdvisor>>,
    synthesizer: Option<Arc<dyn AudioSynthesizer>>,
    llm_policy: ExternalCallPolicy,
    synthesis_policy: ExternalCallPolicy,
    preview_secs: f64,
}

impl Studio {
    /// `seed` makes exploratory generation reproducible. `None` seeds from
    /// the OS.
    pub fn new(
        scorer: PopularityScorer,
        corpus: CorpusSource,
        aggregator: MarketStatsAggregator,
        generator: ProfileGenerator,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            vectorizer: scorer.vectorizer(),
            scorer,
            explainer: Explainer,
            corpus,
            aggregator,
            generator,
            rng: Mutex::new(rng),
            extractor: None,
            advisor: None,
            synthesizer: None,
            llm_policy: ExternalCallPolicy::default(),
            synthesis_policy: ExternalCallPolicy::default(),
            preview_secs: 8.0,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ParameterExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn CompositionAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn with_synthesizer(
        mut self,
        synthesizer: Arc<dyn AudioSynthesizer>,
        preview_secs: f64,
    ) -> Self {
        self.synthesizer = Some(synthesizer);
        self.preview_secs = preview_secs;
        self
    }

    /// Policy for extractor and advisor calls.
    pub fn with_llm_policy(mut self, policy: ExternalCallPolicy) -> Self {
        self.llm_policy = policy;
        self
    }

    pub fn with_synthesis_policy(mut self, policy: ExternalCallPolicy) -> Self {
        self.synthesis_policy = policy;
        self
    }

    pub fn scorer(&self) -> &PopularityScorer {
        &self.scorer
    }

    pub fn genres(&self) -> Vec<&str> {
        self.scorer.schema().known_genres()
    }

    /// Scores a partial feature mapping. Missing features are 0 for the
    /// model and the explanation judges exactly the values that were scored.
    pub fn predict(
        &self,
        features: &BTreeMap<String, f64>,
        genre: Option<&str>,
    ) -> Result<Prediction, StudioError> {
        let record = self
            .vectorizer
            .build(features.iter().map(|(k, v)| (k.as_str(), *v)), genre);
        let score = self.scorer.score(&record)?;

        let supplied = |name: &str| features.get(name).copied().or_else(|| record.get(name));
        let profile = BASE_PROFILE.with_overrides(supplied);
        let explanation = self
            .explainer
            .explain_where(&profile, score, |name| supplied(name).is_some());
        let defaulted = profile
            .to_features()
            .iter()
            .map(|(name, _)| *name)
            .filter(|name| !features.contains_key(*name))
            .map(str::to_string)
            .collect();
        record_prediction();

        Ok(Prediction {
            score,
            genre: record.active_genre().map(str::to_string),
            explanation,
            defaulted,
        })
    }

    pub async fn generate(&self, request: &GenerateRequest) -> Result<Generation, StudioError> {
        let id = Uuid::new_v4();
        let (extracted, extraction) = self.extract(request.description.as_deref()).await;

        let parameters = ExtractedParameters {
            genre: request
                .genre
                .clone()
                .filter(|g| !g.trim().is_empty())
                .or(extracted.genre),
            tempo: request.tempo.or(extracted.tempo),
            key: extracted.key,
            duration_secs: extracted.duration_secs,
        };

        let corpus = self.corpus.get().await?;
        let market =
            self.aggregator
                .aggregate(&corpus, parameters.genre.as_deref(), parameters.tempo)?;

        let mut profile = market.apply_to(&BASE_PROFILE);
        if let Some(key) = parameters.musical_key() {
            key.apply_to(&mut profile);
        }
        if let Some(secs) = parameters.duration_secs {
            profile.duration_ms = secs * 1000.0;
        }
        if request.explore {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            profile = self.generator.perturb(&profile, &mut *rng);
        }

        let record = self
            .vectorizer
            .build(profile.to_features(), parameters.genre.as_deref());
        let score = self.scorer.score(&record)?;
        let explanation = self.explainer.explain(&profile, score);

        let (advice, audio) = tokio::join!(
            self.advise(request, &parameters, &profile, score),
            self.synthesize(request, &parameters, &profile),
        );

        info!(
            generation_id = %id,
            genre = parameters.genre.as_deref().unwrap_or("-"),
            track_count = market.track_count,
            score,
            explore = request.explore,
            "Generated profile"
        );
        record_generation(request.explore);

        Ok(Generation {
            id,
            extraction,
            parameters,
            market,
            profile,
            score,
            explanation,
            advice,
            audio,
        })
    }

    async fn extract(&self, description: Option<&str>) -> (ExtractedParameters, ExtractionStatus) {
        let text = match description.map(str::trim) {
            Some(text) if !text.is_empty() => text,
            _ => return (ExtractedParameters::default(), ExtractionStatus::Skipped),
        };
        let Some(extractor) = &self.extractor else {
            debug!("No parameter extractor configured, skipping extraction");
            return (ExtractedParameters::default(), ExtractionStatus::Skipped);
        };

        match self
            .llm_policy
            .run("extractor", || extractor.extract(text))
            .await
        {
            Ok(parameters) => (parameters, ExtractionStatus::Extracted),
            Err(e) => (
                ExtractedParameters::default(),
                ExtractionStatus::Degraded {
                    reason: e.to_string(),
                },
            ),
        }
    }

    async fn advise(
        &self,
        request: &GenerateRequest,
        parameters: &ExtractedParameters,
        profile: &AudioProfile,
        score: f64,
    ) -> ServiceOutcome<String> {
        let advisor = match (&self.advisor, request.advice) {
            (Some(advisor), true) => advisor,
            _ => return ServiceOutcome::Disabled,
        };
        let context = AdviceContext {
            description: request.description.clone(),
            genre: parameters.genre.clone(),
            profile: *profile,
            score,
        };
        ServiceOutcome::from_result(
            self.llm_policy
                .run("advisor", || advisor.advise(&context))
                .await,
        )
    }

    async fn synthesize(
        &self,
        request: &GenerateRequest,
        parameters: &ExtractedParameters,
        profile: &AudioProfile,
    ) -> ServiceOutcome<AudioClip> {
        let synthesizer = match (&self.synthesizer, request.audio) {
            (Some(synthesizer), true) => synthesizer,
            _ => return ServiceOutcome::Disabled,
        };
        let synthesis_request = SynthesisRequest {
            genre: parameters.genre.clone(),
            description: describe(request.description.as_deref(), parameters, profile),
            duration_secs: self.preview_secs,
        };
        ServiceOutcome::from_result(
            self.synthesis_policy
                .run("synthesizer", || synthesizer.synthesize(&synthesis_request))
                .await,
        )
    }
}

impl std::fmt::Debug for Studio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Studio")
            .field("scorer", &self.scorer)
            .field("corpus", &self.corpus)
            .field("extractor", &self.extractor.is_some())
            .field("advisor", &self.advisor.is_some())
            .field("synthesizer", &self.synthesizer.is_some())
            .finish()
    }
}

/// Text prompt for the synthesis model.
fn describe(
    description: Option<&str>,
    parameters: &ExtractedParameters,
    profile: &AudioProfile,
) -> String {
    let mut parts = Vec::new();
    if let Some(genre) = &parameters.genre {
        parts.push(format!("{genre} track"));
    }
    parts.push(format!("{:.0} BPM", profile.tempo));
    if let Some(key) = parameters.musical_key() {
        parts.push(format!("in {}", key.name()));
    }
    parts.push(if profile.energy >= 0.7 {
        "energetic".to_string()
    } else if profile.energy < 0.4 {
        "calm".to_string()
    } else {
        "steady groove".to_string()
    });
    if let Some(description) = description.map(str::trim).filter(|d| !d.is_empty()) {
        parts.push(description.to_string());
    }
    parts.join(", ")
}
