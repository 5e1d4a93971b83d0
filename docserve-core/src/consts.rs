use crate::analysis::labels::Label;

/// The number of values representing bounding box coordinates in YOLO format.
///
/// YOLO format uses 4 values: [center_x, center_y, width, height]
/// This constant defines the offset where class probability data begins
/// in the model output tensor.
pub const CXYWH_OFFSET: usize = 4;

/// The number of document element classes the layout model can detect.
pub const LABEL_SIZE: usize = Label::label_size();

/// Default minimum confidence for accepting a layout detection.
///
/// Overridden per process by `LAYOUT_THRESHOLD`.
pub const PROBA_THRESHOLD: f32 = 0.3;

/// IoU threshold for merging overlapping layout detections.
pub const NMS_IOU_THRESHOLD: f32 = 0.45;

/// Required input width for the layout model.
pub const REQUIRED_WIDTH: usize = 1024;

/// Required input height for the layout model.
pub const REQUIRED_HEIGHT: usize = 1024;

/// Number of color channels in the model input.
pub const INPUT_CHANNELS: usize = 3;

/// Batch size for model inference.
pub const BATCH_SIZE: usize = 1;

/// Normalized gray used to pad letterboxed inputs.
pub const BACKGROUND_FILL_VALUE: f32 = 144.0 / 255.0;

/// Default upload limit in MiB.
pub const MAX_IMAGE_SIZE_MB: usize = 50;

/// Content types accepted by the layout `/predict` endpoint.
pub const ALLOWED_CONTENT_TYPES: [&str; 4] = ["image/png", "image/jpeg", "image/jpg", "image/webp"];

/// Slack on top of the per-field upload limits for multipart framing.
pub const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

pub const LAYOUT_LATENCY_BUCKETS: [f64; 9] = [0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];
pub const LAYOUT_REGIONS_BUCKETS: [f64; 7] = [1.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0];
pub const TABLE_LATENCY_BUCKETS: [f64; 7] = [0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
pub const TABLE_TABLES_BUCKETS: [f64; 5] = [1.0, 2.0, 5.0, 10.0, 20.0];

pub const LAYOUT_ARTIFACT_PATH_ENV_NAME: &str = "LAYOUT_ARTIFACT_PATH";
pub const LAYOUT_HF_REPO_ENV_NAME: &str = "LAYOUT_HF_REPO";
pub const LAYOUT_HF_FILE_ENV_NAME: &str = "LAYOUT_HF_FILE";
pub const LAYOUT_DEVICE_ENV_NAME: &str = "LAYOUT_DEVICE";
pub const LAYOUT_NUM_THREADS_ENV_NAME: &str = "LAYOUT_NUM_THREADS";
pub const LAYOUT_THRESHOLD_ENV_NAME: &str = "LAYOUT_THRESHOLD";

pub const TABLE_WEIGHTS_DIR_ENV_NAME: &str = "TABLE_WEIGHTS_DIR";
pub const TABLE_HF_REPO_ENV_NAME: &str = "TABLE_HF_REPO";
pub const TABLE_HF_SUBDIR_ENV_NAME: &str = "TABLE_HF_SUBDIR";
pub const TABLE_DEVICE_ENV_NAME: &str = "TABLE_DEVICE";
pub const TABLE_NUM_THREADS_ENV_NAME: &str = "TABLE_NUM_THREADS";

pub const MODEL_CACHE_DIR_ENV_NAME: &str = "MODEL_CACHE_DIR";
pub const HF_ENDPOINT_ENV_NAME: &str = "HF_ENDPOINT";
pub const HF_TOKEN_ENV_NAME: &str = "HF_TOKEN";

pub const DEFAULT_LAYOUT_HF_REPO: &str = "ds4sd/docling-layout-heron";
pub const DEFAULT_LAYOUT_HF_FILE: &str = "model.onnx";
pub const DEFAULT_TABLE_HF_REPO: &str = "ds4sd/docling-models";
pub const DEFAULT_TABLE_HF_SUBDIR: &str = "model_artifacts/tableformer/accurate";
pub const DEFAULT_HF_ENDPOINT: &str = "https://huggingface.co";
pub const DEFAULT_MODEL_CACHE_DIR: &str = "models";
pub const DEFAULT_NUM_THREADS: usize = 4;

/// TableFormer configuration file expected inside the weights directory.
pub const TM_CONFIG_FILE: &str = "tm_config.json";
/// ONNX export used when `model.onnx_file` is absent from `tm_config.json`.
pub const DEFAULT_TABLE_ONNX_FILE: &str = "tableformer.onnx";
