//! HTTP surface.
//!
//! Handlers only parse input, delegate to the services held by [`AppContext`]
//! and render HTML, PDF or plain-text error responses.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Form, Router,
};
use futures::future::try_join_all;
use minijinja::context;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::charts::Chart;
use crate::config::Settings;
use crate::dataset::DatasetSplit;
use crate::error::{FeatureError, ModelError, NarrationError};
use crate::features::{derive_indicators, FeatureVector};
use crate::model::Classifier;
use crate::narration::{self, Narrator};
use crate::pages::Pages;
use crate::precompute::{precompute_charts, PrecomputeOptions};
use crate::report::{build_report, HEALTH_TIPS, REPORT_FILENAME};

/// Everything a request may read. Built once before serving, never mutated.
pub struct AppContext {
    pub classifier: Classifier,
    pub charts: Vec<Chart>,
    pub narrator: Box<dyn Narrator>,
    pub pages: Pages,
}

impl AppContext {
    /// Loads the artifacts and runs the explainability pass. Any failure is
    /// fatal: the server never starts in a degraded mode.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let started = Instant::now();
        let classifier = Classifier::load(&settings.model_path).with_context(|| {
            format!("Failed to load model from '{}'", settings.model_path.display())
        })?;
        let data = DatasetSplit::load(&settings.data_path).with_context(|| {
            format!("Failed to load dataset from '{}'", settings.data_path.display())
        })?;
        let charts = precompute_charts(&classifier, &data, &PrecomputeOptions::from(settings))
            .context("Explainability precomputation failed")?;
        let narrator = narration::from_settings(&settings.narration)
            .context("Failed to create narration client")?;
        if settings.narration.api_key.is_none()
            && settings.narration.provider == crate::config::NarrationProvider::Gemini
        {
            warn!("No narration API key set; chart narration requests will fail");
        }
        let pages = Pages::new().context("Failed to compile page templates")?;

        info!(
            charts = charts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Startup complete"
        );
        Ok(Self {
            classifier,
            charts,
            narrator,
            pages,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] FeatureError),
    #[error(transparent)]
    Inference(#[from] ModelError),
    #[error("chart {requested} does not exist (available: 0..={last})")]
    ChartNotFound { requested: usize, last: usize },
    #[error(transparent)]
    Narration(#[from] NarrationError),
    #[error("report generation failed: {0}")]
    Report(String),
    #[error("failed to render page: {0}")]
    Template(#[from] minijinja::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::ChartNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Narration(_) => StatusCode::BAD_GATEWAY,
            Self::Inference(_) | Self::Report(_) | Self::Template(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
        }
        (status, format!("An error occurred: {self}")).into_response()
    }
}

pub fn create_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/predict", get(form_handler).post(predict_handler))
        .route("/xai_intro", get(xai_intro_handler))
        .route("/xai", get(xai_handler))
        .route("/generate_report", get(report_handler))
        .route("/report_done", get(report_done_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Binds `addr` and serves until Ctrl-C.
pub async fn serve(ctx: Arc<AppContext>, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("heartify listening on http://{addr}");
    axum::serve(listener, create_router(ctx))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("Server error")
}

/// Previous and next chart indices, both kept inside `[0, count - 1]`.
pub fn nav_links(chart_id: usize, count: usize) -> (usize, usize) {
    let last = count.saturating_sub(1);
    (
        chart_id.saturating_sub(1).min(last),
        chart_id.saturating_add(1).min(last),
    )
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn index_handler(State(ctx): State<Arc<AppContext>>) -> Result<Html<String>, AppError> {
    Ok(Html(ctx.pages.index()?))
}

async fn form_handler(State(ctx): State<Arc<AppContext>>) -> Result<Html<String>, AppError> {
    Ok(Html(ctx.pages.form()?))
}

async fn predict_handler(
    State(ctx): State<Arc<AppContext>>,
    Form(mut form): Form<HashMap<String, String>>,
) -> Result<Html<String>, AppError> {
    derive_indicators(&mut form);
    let features = FeatureVector::from_form(&form)?;
    let prediction = ctx.classifier.predict(&features)?;
    info!(
        probability = prediction.probability,
        diagnosis = %prediction.diagnosis,
        "Prediction served"
    );
    Ok(Html(ctx.pages.result(
        &prediction.diagnosis.to_string(),
        prediction.probability,
    )?))
}

async fn xai_intro_handler(State(ctx): State<Arc<AppContext>>) -> Result<Html<String>, AppError> {
    Ok(Html(ctx.pages.xai_intro()?))
}

#[derive(Debug, Deserialize)]
struct XaiQuery {
    chart_id: Option<usize>,
}

async fn xai_handler(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<XaiQuery>,
) -> Result<Html<String>, AppError> {
    let chart_id = query.chart_id.unwrap_or(0);
    let chart = ctx
        .charts
        .get(chart_id)
        .ok_or(AppError::ChartNotFound {
            requested: chart_id,
            last: ctx.charts.len().saturating_sub(1),
        })?;
    let narration = ctx.narrator.narrate(&chart.caption).await?;
    let (prev_chart, next_chart) = nav_links(chart_id, ctx.charts.len());

    let html = ctx.pages.render(
        "xai.html",
        context! {
            chart => chart.artifact.to_html(&chart.caption),
            caption => chart.caption,
            ai_explanation => narration,
            prev_chart,
            next_chart,
            chart_id,
            chart_count => ctx.charts.len(),
        },
    )?;
    Ok(Html(html))
}

async fn report_handler(State(ctx): State<Arc<AppContext>>) -> Result<Response, AppError> {
    let narrations = try_join_all(
        ctx.charts
            .iter()
            .map(|chart| ctx.narrator.narrate(&chart.caption)),
    )
    .await
    .map_err(|e| AppError::Report(e.to_string()))?;

    let shared = Arc::clone(&ctx);
    let pdf = tokio::task::spawn_blocking(move || {
        build_report(&shared.charts, &narrations, &HEALTH_TIPS)
    })
    .await
    .map_err(|e| AppError::Report(e.to_string()))?
    .map_err(|e| AppError::Report(e.to_string()))?;

    info!(bytes = pdf.len(), "Report generated");
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{REPORT_FILENAME}\""),
            ),
        ],
        pdf,
    )
        .into_response())
}

async fn report_done_handler(State(ctx): State<Arc<AppContext>>) -> Result<Html<String>, AppError> {
    Ok(Html(ctx.pages.report_done()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charts::ChartKind;
    use crate::config::{NarrationProvider, NarrationSettings};
    use crate::demo;
    use crate::features::sample_form;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use futures::future::BoxFuture;
    use std::sync::OnceLock;
    use std::time::Duration;
    use tower::util::ServiceExt;

    struct FailingNarrator;

    impl Narrator for FailingNarrator {
        fn narrate<'a>(
            &'a self,
            _chart_type: &'a str,
        ) -> BoxFuture<'a, Result<String, NarrationError>> {
            Box::pin(async { Err(NarrationError::MissingApiKey) })
        }
    }

    fn fixtures() -> &'static (Classifier, Vec<Chart>) {
        static FIXTURES: OnceLock<(Classifier, Vec<Chart>)> = OnceLock::new();
        FIXTURES.get_or_init(|| {
            let (classifier, data) = demo::generate(42, 60, 15);
            let options = PrecomputeOptions {
                background_size: 12,
                seed: 42,
                attribution_passes: 1,
                dependence_feature: "Cholesterol".into(),
            };
            let charts = precompute_charts(&classifier, &data, &options).expect("precompute");
            (classifier, charts)
        })
    }

    fn app_with(narrator: Box<dyn Narrator>) -> Router {
        let (classifier, charts) = fixtures();
        create_router(Arc::new(AppContext {
            classifier: classifier.clone(),
            charts: charts.clone(),
            narrator,
            pages: Pages::new().expect("templates"),
        }))
    }

    fn app() -> Router {
        app_with(Box::new(narration::StaticNarrator))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("test"))
            .await
            .expect("test");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, body.to_vec())
    }

    async fn post_form(app: Router, form: &HashMap<String, String>) -> (StatusCode, String) {
        let body: Vec<String> = form.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/predict")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from(body.join("&")))
                    .expect("test"),
            )
            .await
            .expect("test");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    fn text(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    #[tokio::test]
    async fn static_pages_render() {
        for uri in ["/", "/predict", "/xai_intro", "/report_done"] {
            let (status, body) = get(app(), uri).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert!(text(&body).contains("<html"), "{uri}");
        }
        let (status, body) = get(app(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn same_form_gives_same_label() {
        let form = sample_form();
        let (status, first) = post_form(app(), &form).await;
        assert_eq!(status, StatusCode::OK);
        assert!(first.contains("heart disease"));
        for _ in 0..3 {
            let (_, again) = post_form(app(), &form).await;
            assert_eq!(again, first);
        }
    }

    #[tokio::test]
    async fn missing_field_is_a_text_error() {
        let mut form = sample_form();
        form.remove("chol");
        let (status, body) = post_form(app(), &form).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.starts_with("An error occurred:"));
        assert!(body.contains("chol"));
    }

    #[tokio::test]
    async fn malformed_field_is_a_text_error() {
        let mut form = sample_form();
        form.insert("oldpeak".into(), "high".into());
        let (status, body) = post_form(app(), &form).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("oldpeak"));
    }

    #[tokio::test]
    async fn every_chart_renders() {
        let count = fixtures().1.len();
        assert_eq!(count, ChartKind::ALL.len());
        for id in 0..count {
            let (status, body) = get(app(), &format!("/xai?chart_id={id}")).await;
            assert_eq!(status, StatusCode::OK);
            let html = text(&body);
            assert!(html.contains("class=\"chart\"><img") || html.contains("force-plot"));
            assert!(html.contains("decision-making process"));
        }
        let (_, body) = get(app(), "/xai").await;
        assert!(text(&body).contains("Class 0"));
    }

    #[tokio::test]
    async fn navigation_stays_in_bounds() {
        let count = fixtures().1.len();
        let (_, first) = get(app(), "/xai?chart_id=0").await;
        assert!(text(&first).contains("/xai?chart_id=0\">Previous"));
        let last = count - 1;
        let (_, end) = get(app(), &format!("/xai?chart_id={last}")).await;
        assert!(text(&end).contains(&format!("/xai?chart_id={last}\">Next")));
    }

    #[test]
    fn nav_links_clamp() {
        assert_eq!(nav_links(0, 6), (0, 1));
        assert_eq!(nav_links(3, 6), (2, 4));
        assert_eq!(nav_links(5, 6), (4, 5));
        assert_eq!(nav_links(40, 6), (5, 5));
        assert_eq!(nav_links(usize::MAX, 6), (5, 5));
        assert_eq!(nav_links(0, 0), (0, 0));
    }

    #[tokio::test]
    async fn out_of_range_chart_is_rejected() {
        let (status, body) = get(app(), "/xai?chart_id=99").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(text(&body).starts_with("An error occurred:"));
        let (status, _) = get(app(), "/xai?chart_id=-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn narration_failure_on_chart_view_is_bad_gateway() {
        let (status, body) = get(app_with(Box::new(FailingNarrator)), "/xai?chart_id=1").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(text(&body).contains("API key"));
    }

    #[tokio::test]
    async fn report_is_a_pdf_with_a_page_per_chart_plus_tips() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/generate_report")
                    .body(Body::empty())
                    .expect("test"),
            )
            .await
            .expect("test");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/pdf"
        );
        assert!(response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("heartify_report.pdf"));
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.starts_with(b"%PDF"));
        let pages = lopdf::Document::load_mem(&body).unwrap().get_pages().len();
        assert_eq!(pages, fixtures().1.len() + 1);
    }

    #[tokio::test]
    async fn report_narration_failure_is_plain_text() {
        let (status, body) = get(app_with(Box::new(FailingNarrator)), "/generate_report").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(text(&body).starts_with("An error occurred: report generation failed"));
    }

    fn unreachable_gemini(api_key: &str) -> Box<dyn Narrator> {
        narration::from_settings(&NarrationSettings {
            provider: NarrationProvider::Gemini,
            model: "gemini-2.0-flash".into(),
            endpoint: "http://127.0.0.1:9/v1beta".into(),
            max_output_tokens: 100,
            temperature: 0.1,
            timeout: Duration::from_secs(2),
            api_key: Some(api_key.into()),
        })
        .expect("client")
    }

    #[tokio::test]
    async fn narration_errors_never_echo_the_api_key() {
        for uri in ["/xai?chart_id=0", "/generate_report"] {
            let (status, body) = get(app_with(unreachable_gemini("SECRET-KEY-123")), uri).await;
            assert!(status.is_server_error(), "{uri}: {status}");
            let body = text(&body);
            assert!(body.starts_with("An error occurred:"), "{body}");
            assert!(!body.contains("SECRET-KEY-123"), "{body}");
        }
    }

    #[tokio::test]
    async fn indicators_are_derived_from_categorical_fields() {
        let mut contradictory = sample_form();
        contradictory.insert("Sex_F".into(), "1".into());
        contradictory.insert("ChestPainType_TA".into(), "1".into());
        contradictory.insert("ExerciseAngina_Y".into(), "0".into());
        let (_, consistent) = post_form(app(), &sample_form()).await;
        let (status, derived) = post_form(app(), &contradictory).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(derived, consistent);
    }

    #[tokio::test]
    async fn report_is_reached_through_the_confirmation_page() {
        let (_, chart) = get(app(), "/xai?chart_id=2").await;
        assert!(text(&chart).contains("href=\"/report_done\""));
        let (status, done) = get(app(), "/report_done").await;
        assert_eq!(status, StatusCode::OK);
        assert!(text(&done).contains("/generate_report"));
    }

    #[tokio::test]
    async fn context_builds_from_written_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let (model_path, data_path) = demo::write_artifacts(dir.path(), 7).unwrap();
        let model_path = model_path.to_string_lossy().into_owned();
        let data_path = data_path.to_string_lossy().into_owned();
        let mut builder = ::config::Config::builder();
        for (key, value) in [
            ("model_path", model_path.as_str()),
            ("data_path", data_path.as_str()),
            ("background_size", "20"),
            ("narration_provider", "static"),
        ] {
            builder = builder.set_override(key, value).unwrap();
        }
        let settings = Settings::from_config(&builder.build().unwrap(), None).unwrap();

        let ctx = tokio::task::spawn_blocking(move || AppContext::from_settings(&settings))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.charts.len(), ChartKind::ALL.len());
        assert!(ctx.charts[..5].iter().all(|c| c.artifact.png().is_some()));

        let app = create_router(Arc::new(ctx));
        for id in 0..ChartKind::ALL.len() {
            let (status, _) = get(app.clone(), &format!("/xai?chart_id={id}")).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, pdf) = get(app.clone(), "/generate_report").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            lopdf::Document::load_mem(&pdf).unwrap().get_pages().len(),
            ChartKind::ALL.len() + 1
        );
        let (status, _) = post_form(app, &sample_form()).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_artifacts_fail_startup() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("model.json");
        let config = ::config::Config::builder()
            .set_override("model_path", missing.to_string_lossy().into_owned())
            .unwrap()
            .build()
            .unwrap();
        let settings = Settings::from_config(&config, None).unwrap();
        let err = AppContext::from_settings(&settings).err().unwrap();
        assert!(format!("{err:#}").contains("Failed to load model"));
    }
}
