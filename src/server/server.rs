use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{error, info, warn};
use tower_http::services::ServeDir;

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

#[cfg(feature = "slowdown")]
use super::slowdown_request;
use super::{log_requests, metrics::metrics_handler, state::*, ServerConfig};
use crate::assistant::{AudioClip, ExtractedParameters, ExtractionStatus, ServiceOutcome};
use crate::explain::Explanation;
use crate::features::AudioProfile;
use crate::market::MarketProfile;
use crate::studio::{GenerateRequest, Generation, Studio, StudioError};
use std::sync::Arc;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub started_at: String,
    pub version: &'static str,
    pub regressor: &'static str,
    pub feature_count: usize,
    pub genre_count: usize,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

fn studio_error_response(err: StudioError) -> Response {
    let status = match &err {
        StudioError::Market(_) => StatusCode::UNPROCESSABLE_ENTITY,
        StudioError::Corpus(_) | StudioError::Score(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        warn!("Request rejected: {}", err);
    }
    error_response(status, err.to_string())
}

#[derive(Deserialize, Debug)]
struct PredictBody {
    #[serde(default)]
    pub features: BTreeMap<String, f64>,
    pub genre: Option<String>,
}

#[derive(Serialize)]
struct PredictResponse {
    score: f64,
    genre: Option<String>,
    explanation: Explanation,
    commentary: String,
    defaulted: Vec<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct GenerateBody {
    pub description: Option<String>,
    pub genre: Option<String>,
    pub tempo: Option<f64>,
    pub explore: bool,
    pub advice: bool,
    pub audio: bool,
}

impl From<GenerateBody> for GenerateRequest {
    fn from(body: GenerateBody) -> Self {
        GenerateRequest {
            description: body.description,
            genre: body.genre,
            tempo: body.tempo,
            explore: body.explore,
            advice: body.advice,
            audio: body.audio,
        }
    }
}

/// Audio as it goes over the wire.
#[derive(Serialize, Debug, PartialEq)]
struct AudioPreview {
    sample_rate: u32,
    duration_secs: f64,
    wav_base64: String,
}

fn audio_preview(audio: ServiceOutcome<AudioClip>) -> ServiceOutcome<AudioPreview> {
    match audio {
        ServiceOutcome::Ok(clip) => match clip.to_wav_base64() {
            Ok(wav_base64) => ServiceOutcome::Ok(AudioPreview {
                sample_rate: clip.sample_rate,
                duration_secs: clip.duration_secs(),
                wav_base64,
            }),
            Err(e) => {
                error!("Failed to encode audio preview: {}", e);
                ServiceOutcome::Unavailable {
                    reason: format!("Failed to encode audio: {}", e),
                }
            }
        },
        ServiceOutcome::Unavailable { reason } => ServiceOutcome::Unavailable { reason },
        ServiceOutcome::Disabled => ServiceOutcome::Disabled,
    }
}

#[derive(Serialize)]
struct GenerateResponse {
    generation_id: String,
    extraction: ExtractionStatus,
    parameters: ExtractedParameters,
    market: MarketProfile,
    profile: AudioProfile,
    score: f64,
    explanation: Explanation,
    commentary: String,
    advice: ServiceOutcome<String>,
    audio: ServiceOutcome<AudioPreview>,
}

impl From<Generation> for GenerateResponse {
    fn from(generation: Generation) -> Self {
        GenerateResponse {
            generation_id: generation.id.to_string(),
            extraction: generation.extraction,
            parameters: generation.parameters,
            market: generation.market,
            profile: generation.profile,
            score: generation.score,
            commentary: generation.explanation.to_markdown(),
            explanation: generation.explanation,
            advice: generation.advice,
            audio: audio_preview(generation.audio),
        }
    }
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let scorer = state.studio.scorer();
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        started_at: state.started_at.to_rfc3339(),
        version: env!("CARGO_PKG_VERSION"),
        regressor: scorer.regressor_kind(),
        feature_count: scorer.schema().len(),
        genre_count: state.studio.genres().len(),
    };
    Json(stats)
}

async fn get_genres(State(studio): State<SharedStudio>) -> impl IntoResponse {
    let genres: Vec<String> = studio.genres().into_iter().map(str::to_string).collect();
    Json(genres)
}

async fn predict(State(studio): State<SharedStudio>, Json(body): Json<PredictBody>) -> Response {
    match studio.predict(&body.features, body.genre.as_deref()) {
        Ok(prediction) => Json(PredictResponse {
            score: prediction.score,
            genre: prediction.genre,
            commentary: prediction.explanation.to_markdown(),
            explanation: prediction.explanation,
            defaulted: prediction.defaulted,
        })
        .into_response(),
        Err(err) => studio_error_response(err),
    }
}

async fn generate(State(studio): State<SharedStudio>, Json(body): Json<GenerateBody>) -> Response {
    match studio.generate(&body.into()).await {
        Ok(generation) => Json(GenerateResponse::from(generation)).into_response(),
        Err(err) => studio_error_response(err),
    }
}

pub fn make_app(config: ServerConfig, studio: Arc<Studio>) -> Result<Router> {
    let state = ServerState::new(config.clone(), studio);

    let api_routes: Router = Router::new()
        .route("/genres", get(get_genres))
        .route("/predict", post(predict))
        .route("/generate", post(generate))
        .with_state(state.clone());

    let home_router: Router = match config.frontend_dir_path {
        Some(frontend_path) => {
            let static_files_service =
                ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files_service)
        }
        None => Router::new()
            .route("/", get(home))
            .with_state(state.clone()),
    };

    let mut app: Router = home_router.nest("/v1", api_routes);

    #[cfg(feature = "slowdown")]
    {
        app = app.layer(middleware::from_fn(slowdown_request));
    }
    app = app.layer(middleware::from_fn_with_state(state.clone(), log_requests));

    Ok(app)
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

pub async fn run_server(studio: Arc<Studio>, config: ServerConfig) -> Result<()> {
    let port = config.port;
    let metrics_port = config.metrics_port;
    let app = make_app(config, studio)?;

    let metrics_listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, make_metrics_app()).await {
            error!("Metrics server stopped: {}", e);
        }
    });
    info!("Metrics available at port {}!", metrics_port);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Ready to serve at port {}!", port);

    Ok(axum::serve(listener, app).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureSchema;
    use crate::generator::ProfileGenerator;
    use crate::market::{
        AggregationSettings, CorpusSource, MarketCorpus, MarketStatsAggregator, MarketTrack,
    };
    use crate::model::{LinearRegressor, PopularityScorer};
    use axum::{body::Body, http::Request};
    use tower::ServiceExt; // for `oneshot`

    fn make_studio(tracks: Vec<MarketTrack>) -> Arc<Studio> {
        let names = ["danceability", "energy", "tempo", "genre_clean_pop", "genre_clean_rock"];
        let schema =
            Arc::new(FeatureSchema::new(names.iter().map(|s| s.to_string()).collect()).unwrap());
        let scorer = PopularityScorer::new(
            schema,
            Box::new(LinearRegressor {
                intercept: 20.0,
                coefficients: vec![30.0, 20.0, 0.0, 10.0, -5.0],
            }),
        );
        Arc::new(Studio::new(
            scorer,
            CorpusSource::Cached(Arc::new(MarketCorpus::new(tracks))),
            MarketStatsAggregator::new(AggregationSettings::default()),
            ProfileGenerator::default(),
            Some(7),
        ))
    }

    fn pop_tracks() -> Vec<MarketTrack> {
        (0..30)
            .map(|i| MarketTrack {
                genre: "pop".to_string(),
                popularity: i as f64,
                danceability: 0.7,
                energy: 0.6,
                key: 5.0,
                mode: 1.0,
                valence: 0.5,
                tempo: 120.0,
                duration_ms: 200_000.0,
            })
            .collect()
    }

    fn make_test_app(tracks: Vec<MarketTrack>) -> Router {
        let config = ServerConfig {
            requests_logging_level: super::super::RequestsLoggingLevel::None,
            ..Default::default()
        };
        make_app(config, make_studio(tracks)).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0d 00:00:00");
        assert_eq!(format_uptime(Duration::from_secs(90_061)), "1d 01:01:01");
    }

    #[tokio::test]
    async fn responds_home_stats() {
        let app = make_test_app(pop_tracks());
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["feature_count"], 5);
        assert_eq!(json["genre_count"], 2);
        assert_eq!(json["regressor"], "linear");
    }

    #[tokio::test]
    async fn lists_genres() {
        let app = make_test_app(pop_tracks());
        let request = Request::builder()
            .uri("/v1/genres")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, serde_json::json!(["pop", "rock"]));
    }

    #[tokio::test]
    async fn predicts_score() {
        let app = make_test_app(pop_tracks());
        let response = app
            .oneshot(post_json(
                "/v1/predict",
                serde_json::json!({
                    "features": {"danceability": 1.0, "energy": 0.5},
                    "genre": "rock"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["score"], 55.0);
        assert_eq!(json["genre"], "rock");
        assert_eq!(json["explanation"]["tier"], "good");
        assert!(json["commentary"].as_str().unwrap().contains("55.0"));
        assert!(json["defaulted"]
            .as_array()
            .unwrap()
            .contains(&serde_json::json!("duration_ms")));
    }

    #[tokio::test]
    async fn rejects_malformed_predict_body() {
        let app = make_test_app(pop_tracks());
        let response = app
            .oneshot(post_json(
                "/v1/predict",
                serde_json::json!({"features": {"energy": "loud"}}),
            ))
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn generates_profile() {
        let app = make_test_app(pop_tracks());
        let response = app
            .oneshot(post_json(
                "/v1/generate",
                serde_json::json!({"genre": "pop", "tempo": 118, "advice": true}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert!(json["generation_id"].as_str().unwrap().len() >= 32);
        assert_eq!(json["extraction"]["status"], "skipped");
        assert_eq!(json["profile"]["tempo"], 118.0);
        assert_eq!(json["profile"]["danceability"], 0.7);
        assert_eq!(json["market"]["tempo_applied"], true);
        assert_eq!(json["advice"]["status"], "disabled");
        assert_eq!(json["audio"]["status"], "disabled");
        assert!(json["score"].is_number());
    }

    #[tokio::test]
    async fn empty_corpus_is_unprocessable() {
        let app = make_test_app(Vec::new());
        let response = app
            .oneshot(post_json("/v1/generate", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let json = json_body(response).await;
        assert_eq!(json["error"], "Cannot derive market targets: Market corpus is empty");
    }

    #[tokio::test]
    async fn serves_metrics() {
        crate::server::metrics::init_metrics();
        let request = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = make_metrics_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_audio_preview() {
        let preview = audio_preview(ServiceOutcome::Ok(AudioClip {
            sample_rate: 100,
            samples: vec![0.0; 50],
        }));
        match preview {
            ServiceOutcome::Ok(preview) => {
                assert_eq!(preview.sample_rate, 100);
                assert_eq!(preview.duration_secs, 0.5);
                assert!(!preview.wav_base64.is_empty());
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        assert_eq!(
            audio_preview(ServiceOutcome::Unavailable {
                reason: "down".to_string()
            }),
            ServiceOutcome::Unavailable {
                reason: "down".to_string()
            }
        );
    }
}
