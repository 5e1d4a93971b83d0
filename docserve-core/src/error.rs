use axum::http::StatusCode;
use snafu::prelude::*;

/// Coarse classification of every failure a request can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnsupportedMediaType,
    PayloadTooLarge,
    EmptyInput,
    MalformedImage,
    MalformedInput,
    MalformedRegionList,
    MalformedOcrDocument,
    ModelUnavailable,
    UnhandledFailure,
}

impl ErrorKind {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::UnsupportedMediaType
            | ErrorKind::EmptyInput
            | ErrorKind::MalformedImage
            | ErrorKind::MalformedInput
            | ErrorKind::MalformedRegionList
            | ErrorKind::MalformedOcrDocument => StatusCode::BAD_REQUEST,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::UnhandledFailure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Validation failures are rejected before the model is touched.
    pub const fn is_validation(&self) -> bool {
        !matches!(
            self,
            ErrorKind::ModelUnavailable | ErrorKind::UnhandledFailure
        )
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DocServeError {
    #[snafu(display("Invalid content type `{}`. Allowed: {}", content_type, allowed))]
    UnsupportedMediaType {
        content_type: String,
        allowed: String,
    },
    #[snafu(display("Image too large. Max size: {}MB", limit_mb))]
    PayloadTooLarge { limit_mb: usize },
    #[snafu(display("Empty file"))]
    EmptyInput,
    #[snafu(display("Invalid image: {}", source))]
    MalformedImage { source: image::ImageError },
    #[snafu(display("Invalid form field `{}`: {}", field, message))]
    MalformedInput { field: String, message: String },
    #[snafu(display("Invalid table_bboxes JSON: {}", source))]
    RegionListJson { source: serde_json::Error },
    #[snafu(display("table_bboxes must be a non-empty array of [x1,y1,x2,y2]"))]
    RegionListEmpty,
    #[snafu(display("table_bboxes[{}] must be [x1,y1,x2,y2]", index))]
    RegionShape { index: usize },
    #[snafu(display("Invalid iocr_json: {}", source))]
    MalformedOcrDocument { source: serde_json::Error },
    #[snafu(display("Model unavailable: {}", message))]
    ModelUnavailable { message: String },
    #[snafu(display("Model artifact `{}` is not available (HTTP {}); {}", url, status, hint))]
    ArtifactMissing {
        url: String,
        status: u16,
        hint: &'static str,
    },
    #[snafu(display("Ort Session init stage `{}` error: {}", stage, source))]
    OrtInit {
        source: ort::error::Error,
        stage: String,
    },
    #[snafu(display("Build Tensor for `{}` error: {}", stage, source))]
    Tensor {
        source: ort::error::Error,
        stage: String,
    },
    #[snafu(display("Onnx Inference error: {}", source))]
    Inference { source: ort::error::Error },
    #[snafu(display("Onnx Output can not found {}", output_name))]
    NotFoundOutput { output_name: String },
    #[snafu(display("Ndarray Shape error at stage `{}`: {}", stage, source))]
    Shape {
        source: ndarray::ShapeError,
        stage: String,
    },
    #[snafu(display("Io on `{}` error: {}", path, source))]
    Io {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Download `{}` error: {}", url, source))]
    Download { source: reqwest::Error, url: String },
    #[snafu(display("Download `{}` failed with HTTP status {}", url, status))]
    DownloadStatus { url: String, status: u16 },
    #[snafu(display("Parse config `{}` error: {}", path, source))]
    ConfigParse {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Environment `{}`=`{}` is invalid: {}", name, value, message))]
    EnvParse {
        name: String,
        value: String,
        message: String,
    },
    #[snafu(display("Metrics error: {}", source))]
    Metrics { source: prometheus::Error },
    #[snafu(display("Blocking task failed: {}", source))]
    Join { source: tokio::task::JoinError },
    #[snafu(display("Predictor `{}` error: {}", stage, message))]
    Predictor { stage: String, message: String },
}

impl DocServeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocServeError::UnsupportedMediaType { .. } => ErrorKind::UnsupportedMediaType,
            DocServeError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            DocServeError::EmptyInput => ErrorKind::EmptyInput,
            DocServeError::MalformedImage { .. } => ErrorKind::MalformedImage,
            DocServeError::MalformedInput { .. } => ErrorKind::MalformedInput,
            DocServeError::RegionListJson { .. }
            | DocServeError::RegionListEmpty
            | DocServeError::RegionShape { .. } => ErrorKind::MalformedRegionList,
            DocServeError::MalformedOcrDocument { .. } => ErrorKind::MalformedOcrDocument,
            DocServeError::ModelUnavailable { .. } | DocServeError::ArtifactMissing { .. } => {
                ErrorKind::ModelUnavailable
            }
            _ => ErrorKind::UnhandledFailure,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.kind().status_code()
    }
}
