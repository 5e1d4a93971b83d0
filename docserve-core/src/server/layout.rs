use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
    http::HeaderMap,
    response::Response,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing::*;

use crate::{
    error::DocServeError,
    ingest::{check_content_type, decode_image, multipart_error, read_field},
    metrics::{Outcome, ServiceMetrics},
    predictor::{LayoutPredictor, PredictorCell},
    schema::{HealthResponse, LayoutPredictResponse},
    server::{ApiError, RequestContext, ServerConfig, health, render_metrics},
    service::{predict_layout, round_to},
};

/// `file`.
const LAYOUT_FORM_FIELDS: usize = 1;

pub struct LayoutState<P> {
    pub predictor: Arc<PredictorCell<P>>,
    pub metrics: ServiceMetrics,
    pub config: ServerConfig,
}

impl<P> Clone for LayoutState<P> {
    fn clone(&self) -> Self {
        Self {
            predictor: Arc::clone(&self.predictor),
            metrics: self.metrics.clone(),
            config: self.config,
        }
    }
}

impl<P: LayoutPredictor> LayoutState<P> {
    pub fn new(predictor: PredictorCell<P>, config: ServerConfig) -> Result<Self, DocServeError> {
        Ok(Self {
            predictor: Arc::new(predictor),
            metrics: ServiceMetrics::layout()?,
            config,
        })
    }
}

pub fn layout_router<P: LayoutPredictor>(state: LayoutState<P>) -> Router {
    let body_limit = state.config.body_limit(LAYOUT_FORM_FIELDS);

    Router::new()
        .route("/healthz", get(healthz::<P>))
        .route("/predict", post(predict::<P>))
        .route("/metrics", get(metrics::<P>))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz<P: LayoutPredictor>(
    State(state): State<LayoutState<P>>,
) -> Result<Json<HealthResponse>, ApiError> {
    health(&state.predictor).await
}

async fn metrics<P: LayoutPredictor>(State(state): State<LayoutState<P>>) -> Response {
    render_metrics(&state.metrics)
}

async fn predict<P: LayoutPredictor>(
    State(state): State<LayoutState<P>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<LayoutPredictResponse>, ApiError> {
    let ctx = RequestContext::new(&headers);

    async {
        match run_predict(&state, &ctx, multipart).await {
            Ok((response, payload_size)) => {
                state.metrics.record_outcome(Outcome::Success);
                info!(
                    status_code = 200,
                    latency_ms = round_to(ctx.elapsed_ms(), 2),
                    payload_size,
                    regions = response.boxes.len(),
                    "Predict request completed"
                );
                Ok(Json(response))
            }
            Err(err) => Err(ctx.fail(err, &state.metrics, &state.config)),
        }
    }
    .instrument(ctx.span())
    .await
}

async fn run_predict<P: LayoutPredictor>(
    state: &LayoutState<P>,
    ctx: &RequestContext,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(LayoutPredictResponse, usize), DocServeError> {
    let limit_mb = state.config.max_upload_mb;
    let mut multipart = multipart.map_err(|err| DocServeError::MalformedInput {
        field: "body".to_string(),
        message: err.body_text(),
    })?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, "body", limit_mb))?
    {
        if field.name() == Some("file") {
            check_content_type(field.content_type())?;
            upload = Some(read_field(field, limit_mb).await?);
        }
    }

    let bytes = upload.ok_or_else(|| DocServeError::MalformedInput {
        field: "file".to_string(),
        message: "field required".to_string(),
    })?;
    let image = decode_image(&bytes)?;

    let predictor = state.predictor.get().await?;
    let response = predict_layout(predictor, image, ctx.request_id.clone(), &state.metrics).await?;

    Ok((response, bytes.len()))
}
