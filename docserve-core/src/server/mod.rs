//! HTTP surface shared by both services.

pub mod layout;
pub mod table;

use std::time::Instant;

use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::*;
use uuid::Uuid;

use crate::{
    consts::{FORM_OVERHEAD_BYTES, MAX_IMAGE_SIZE_MB},
    error::{DocServeError, ErrorKind},
    metrics::{Outcome, ServiceMetrics},
    predictor::PredictorCell,
    schema::{ErrorBody, HealthResponse},
    service::round_to,
};

pub use layout::{LayoutState, layout_router};
pub use table::{TableState, table_router};

pub const TENANT_HEADER: &str = "X-Tenant-ID";

/// Detail returned for unhandled failures unless errors are exposed.
pub const GENERIC_FAILURE_DETAIL: &str = "Internal server error";

/// Options of the HTTP layer, independent of the model.
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub max_upload_mb: usize,
    /// Return raw internal error messages to callers.
    pub expose_errors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_upload_mb: MAX_IMAGE_SIZE_MB,
            expose_errors: false,
        }
    }
}

impl ServerConfig {
    /// Whole-body cap for a form of `fields` bounded fields: each field's
    /// limit plus room for multipart framing, so any field set that passes
    /// its own checks also fits the body.
    pub fn body_limit(&self, fields: usize) -> usize {
        fields * self.max_upload_mb * 1024 * 1024 + FORM_OVERHEAD_BYTES
    }
}

/// An error on its way out as `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub error: DocServeError,
    pub expose: bool,
}

impl ApiError {
    pub fn new(error: DocServeError, expose: bool) -> Self {
        Self { error, expose }
    }

    pub fn detail(&self) -> String {
        if self.error.kind() == ErrorKind::UnhandledFailure && !self.expose {
            GENERIC_FAILURE_DETAIL.to_string()
        } else {
            self.error.to_string()
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            detail: self.detail(),
        };
        (self.error.status_code(), Json(body)).into_response()
    }
}

/// Per-request correlation data.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub tenant_id: String,
    pub started: Instant,
}

impl RequestContext {
    pub fn new(headers: &HeaderMap) -> Self {
        let tenant_id = headers
            .get(TENANT_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Self {
            request_id: Uuid::new_v4().to_string(),
            tenant_id,
            started: Instant::now(),
        }
    }

    pub fn span(&self) -> Span {
        info_span!(
            "predict",
            request_id = %self.request_id,
            tenant_id = %self.tenant_id
        )
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    /// Counts and logs a failed request, then turns it into a response.
    pub fn fail(
        &self,
        error: DocServeError,
        metrics: &ServiceMetrics,
        config: &ServerConfig,
    ) -> ApiError {
        metrics.record_outcome(Outcome::Error);

        let status_code = error.status_code().as_u16();
        let latency_ms = round_to(self.elapsed_ms(), 2);
        if error.kind().is_validation() {
            warn!(status_code, latency_ms, error = %error, "Predict request rejected");
        } else {
            error!(status_code, latency_ms, error = %error, "Predict request failed");
        }

        ApiError::new(error, config.expose_errors)
    }
}

/// `200 {"status":"ok","ready":...}` once the predictor exists, `503` otherwise.
pub async fn health<P: Send + 'static>(
    predictor: &PredictorCell<P>,
) -> Result<Json<HealthResponse>, ApiError> {
    match predictor.get().await {
        Ok(_) => Ok(Json(HealthResponse {
            status: "ok".to_string(),
            ready: predictor.is_ready(),
        })),
        Err(err) => {
            error!("Health check failed: {}", err);
            Err(ApiError::new(err, true))
        }
    }
}

pub fn render_metrics(metrics: &ServiceMetrics) -> Response {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, metrics.content_type())],
            body,
        )
            .into_response(),
        Err(err) => {
            error!("Encoding metrics failed: {}", err);
            ApiError::new(err, false).into_response()
        }
    }
}

/// Serves `router` on `addr` until Ctrl-C.
pub async fn start_server(name: &str, addr: &str, router: Router) -> Result<(), std::io::Error> {
    info!("Starting {} service on {}", name, addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down {} service", name);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_unhandled_detail_hidden_by_default() {
        let err = || DocServeError::Predictor {
            stage: "decode".into(),
            message: "secret path /opt/weights".into(),
        };

        assert_eq!(ApiError::new(err(), false).detail(), GENERIC_FAILURE_DETAIL);
        assert!(ApiError::new(err(), true).detail().contains("/opt/weights"));

        let response = ApiError::new(err(), false).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_validation_detail_always_shown() {
        let api = ApiError::new(DocServeError::EmptyInput, false);
        assert_eq!(api.detail(), "Empty file");
        assert_eq!(api.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_request_context_reads_tenant() {
        let mut headers = HeaderMap::new();
        assert_eq!(RequestContext::new(&headers).tenant_id, "");

        headers.insert("x-tenant-id", HeaderValue::from_static("acme"));
        let ctx = RequestContext::new(&headers);
        assert_eq!(ctx.tenant_id, "acme");
        assert_eq!(ctx.request_id.len(), 36);
        assert_ne!(ctx.request_id, RequestContext::new(&headers).request_id);
    }

    #[test]
    fn test_fail_counts_once() {
        let metrics = ServiceMetrics::layout().unwrap();
        let ctx = RequestContext::new(&HeaderMap::new());
        let api = ctx.fail(DocServeError::EmptyInput, &metrics, &ServerConfig::default());

        assert_eq!(api.error.kind(), ErrorKind::EmptyInput);
        assert_eq!(metrics.outcome_count(Outcome::Error), 1);
    }

    #[test]
    fn test_body_limit_has_form_overhead() {
        let config = ServerConfig {
            max_upload_mb: 2,
            expose_errors: false,
        };
        assert_eq!(config.body_limit(1), 3 * 1024 * 1024);
        assert_eq!(config.body_limit(3), 7 * 1024 * 1024);
    }
}
