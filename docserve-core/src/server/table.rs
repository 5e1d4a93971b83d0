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
    ingest::{decode_image, multipart_error, parse_iocr_json, parse_table_bboxes, read_field, read_text},
    metrics::{Outcome, ServiceMetrics},
    predictor::{PredictorCell, TablePredictor},
    schema::{HealthResponse, TablePredictResponse},
    server::{ApiError, RequestContext, ServerConfig, health, render_metrics},
    service::{predict_tables, round_to},
};

/// `file`, `table_bboxes` and `iocr_json`.
const TABLE_FORM_FIELDS: usize = 3;

pub struct TableState<P> {
    pub predictor: Arc<PredictorCell<P>>,
    pub metrics: ServiceMetrics,
    pub config: ServerConfig,
}

impl<P> Clone for TableState<P> {
    fn clone(&self) -> Self {
        Self {
            predictor: Arc::clone(&self.predictor),
            metrics: self.metrics.clone(),
            config: self.config,
        }
    }
}

impl<P: TablePredictor> TableState<P> {
    pub fn new(predictor: PredictorCell<P>, config: ServerConfig) -> Result<Self, DocServeError> {
        Ok(Self {
            predictor: Arc::new(predictor),
            metrics: ServiceMetrics::table()?,
            config,
        })
    }
}

pub fn table_router<P: TablePredictor>(state: TableState<P>) -> Router {
    let body_limit = state.config.body_limit(TABLE_FORM_FIELDS);

    Router::new()
        .route("/healthz", get(healthz::<P>))
        .route("/predict", post(predict::<P>))
        .route("/metrics", get(metrics::<P>))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz<P: TablePredictor>(
    State(state): State<TableState<P>>,
) -> Result<Json<HealthResponse>, ApiError> {
    health(&state.predictor).await
}

async fn metrics<P: TablePredictor>(State(state): State<TableState<P>>) -> Response {
    render_metrics(&state.metrics)
}

async fn predict<P: TablePredictor>(
    State(state): State<TableState<P>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<TablePredictResponse>, ApiError> {
    let ctx = RequestContext::new(&headers);

    async {
        match run_predict(&state, &ctx, multipart).await {
            Ok((response, payload_size)) => {
                state.metrics.record_outcome(Outcome::Success);
                info!(
                    status_code = 200,
                    latency_ms = round_to(ctx.elapsed_ms(), 2),
                    payload_size,
                    tables = response.tables.len(),
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

/// Raw form fields, before validation.
#[derive(Debug, Default)]
struct TableForm {
    file: Option<Vec<u8>>,
    table_bboxes: Option<String>,
    iocr_json: Option<String>,
}

async fn read_form(multipart: &mut Multipart, limit_mb: usize) -> Result<TableForm, DocServeError> {
    let mut form = TableForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, "body", limit_mb))?
    {
        match field.name() {
            Some("file") => form.file = Some(read_field(field, limit_mb).await?),
            Some("table_bboxes") => form.table_bboxes = Some(read_text(field, limit_mb).await?),
            Some("iocr_json") => form.iocr_json = Some(read_text(field, limit_mb).await?),
            _ => {}
        }
    }

    Ok(form)
}

fn missing(field: &str) -> DocServeError {
    DocServeError::MalformedInput {
        field: field.to_string(),
        message: "field required".to_string(),
    }
}

async fn run_predict<P: TablePredictor>(
    state: &TableState<P>,
    ctx: &RequestContext,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(TablePredictResponse, usize), DocServeError> {
    let mut multipart = multipart.map_err(|err| DocServeError::MalformedInput {
        field: "body".to_string(),
        message: err.body_text(),
    })?;
    let form = read_form(&mut multipart, state.config.max_upload_mb).await?;

    let raw_regions = form.table_bboxes.ok_or_else(|| missing("table_bboxes"))?;
    let regions = parse_table_bboxes(&raw_regions)?;
    let iocr = parse_iocr_json(form.iocr_json.as_deref())?;

    let bytes = form.file.ok_or_else(|| missing("file"))?;
    let image = decode_image(&bytes)?;

    let predictor = state.predictor.get().await?;
    let response = predict_tables(
        predictor,
        image,
        &regions,
        iocr.as_ref(),
        ctx.request_id.clone(),
        &state.metrics,
    )
    .await?;

    Ok((response, bytes.len()))
}
