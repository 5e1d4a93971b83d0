//! Response bodies of both services.

use serde::{Deserialize, Serialize};

/// One detected layout region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Box {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    /// Region label, e.g. `Table`, `Text`, `Picture`.
    pub text: String,
    pub conf: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutPredictResponse {
    pub request_id: String,
    /// Region labels joined by `", "`.
    pub text: String,
    /// Mean region confidence, 4 decimal places.
    pub confidence: f64,
    /// 2 decimal places.
    pub latency_ms: f64,
    pub boxes: Vec<Box>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub l: f64,
    pub t: f64,
    pub r: f64,
    pub b: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCell {
    pub bbox: Bbox,
    pub start_row_offset_idx: i64,
    pub end_row_offset_idx: i64,
    pub start_col_offset_idx: i64,
    pub end_col_offset_idx: i64,
    pub row_span: i64,
    pub col_span: i64,
    pub column_header: bool,
    pub row_header: bool,
    pub row_section: bool,
    /// Matched token text, empty when nothing was matched.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableResult {
    pub table_index: usize,
    pub num_rows: i64,
    pub num_cols: i64,
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePredictResponse {
    pub request_id: String,
    pub latency_ms: f64,
    pub tables: Vec<TableResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}
