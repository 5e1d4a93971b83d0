use std::time::Duration;

use image::RgbImage;
use serde_json::Value;
use tracing::*;

use crate::{
    error::DocServeError,
    metrics::ServiceMetrics,
    page::IocrPage,
    predictor::{
        PredictOptions, RawCell, RawTableOutput, SharedPredictor, TablePredictor, TableRegion,
        invoke,
    },
    schema::{Bbox, TableCell, TablePredictResponse, TableResult},
    service::round_to,
};

/// Flags every table request runs with.
pub const TABLE_PREDICT_OPTIONS: PredictOptions = PredictOptions {
    do_matching: true,
    correct_overlapping_cells: false,
    sort_row_col_indexes: true,
};

/// Builds the IOCR page, runs table recognition over `regions` and records
/// latency and table count.
pub async fn predict_tables<P: TablePredictor>(
    predictor: SharedPredictor<P>,
    image: RgbImage,
    regions: &[TableRegion],
    iocr: Option<&Value>,
    request_id: String,
    metrics: &ServiceMetrics,
) -> Result<TablePredictResponse, DocServeError> {
    let page = IocrPage::build(&image, regions, iocr);
    drop(image);

    // The backend may rewrite its region list, so it gets its own copy.
    let call_regions = regions.to_vec();
    let (outputs, latency) = invoke(predictor, move |p: &mut P| {
        p.multi_table_predict(&page, call_regions, TABLE_PREDICT_OPTIONS)
    })
    .await?;

    metrics.record_inference(latency, outputs.len());
    debug!(
        "Table predictor returned {} tables for {} regions in {:?}",
        outputs.len(),
        regions.len(),
        latency
    );

    Ok(map_tables(request_id, outputs, latency))
}

/// `table_index` is the position in the backend output, which follows the
/// order of the submitted regions.
pub fn map_tables(
    request_id: String,
    outputs: Vec<RawTableOutput>,
    latency: Duration,
) -> TablePredictResponse {
    let tables = outputs
        .into_iter()
        .enumerate()
        .map(|(table_index, output)| TableResult {
            table_index,
            num_rows: output.predict_details.num_rows.unwrap_or(0),
            num_cols: output.predict_details.num_cols.unwrap_or(0),
            cells: output.tf_responses.into_iter().map(map_cell).collect(),
        })
        .collect();

    TablePredictResponse {
        request_id,
        latency_ms: round_to(latency.as_secs_f64() * 1000.0, 2),
        tables,
    }
}

/// Applies the per-field defaults: zero box, offsets 0, spans 1, flags false.
pub fn map_cell(cell: RawCell) -> TableCell {
    let bbox = cell
        .bbox
        .map(|b| Bbox {
            l: b.l,
            t: b.t,
            r: b.r,
            b: b.b,
        })
        .unwrap_or_default();

    let text = cell
        .text_cell_bboxes
        .iter()
        .map(|token| token.token.as_str())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string();

    TableCell {
        bbox,
        start_row_offset_idx: cell.start_row_offset_idx.unwrap_or(0),
        end_row_offset_idx: cell.end_row_offset_idx.unwrap_or(0),
        start_col_offset_idx: cell.start_col_offset_idx.unwrap_or(0),
        end_col_offset_idx: cell.end_col_offset_idx.unwrap_or(0),
        row_span: cell.row_span.unwrap_or(1),
        col_span: cell.col_span.unwrap_or(1),
        column_header: cell.column_header.unwrap_or(false),
        row_header: cell.row_header.unwrap_or(false),
        row_section: cell.row_section.unwrap_or(false),
        text,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio::sync::Mutex;

    use super::*;

    /// Replays a fixed JSON output, scribbles over the regions it is handed
    /// and remembers what the page carried.
    struct Recording {
        output: Value,
        seen_page_regions: Vec<Vec<TableRegion>>,
        seen_options: Vec<PredictOptions>,
    }

    impl Recording {
        fn new(output: Value) -> Self {
            Self {
                output,
                seen_page_regions: Vec::new(),
                seen_options: Vec::new(),
            }
        }
    }

    impl TablePredictor for Recording {
        fn multi_table_predict(
            &mut self,
            page: &IocrPage,
            mut table_bboxes: Vec<TableRegion>,
            options: PredictOptions,
        ) -> Result<Vec<RawTableOutput>, DocServeError> {
            self.seen_page_regions.push(page.table_bboxes.clone());
            self.seen_options.push(options);
            for region in table_bboxes.iter_mut() {
                region[0] = -1;
            }
            serde_json::from_value(self.output.clone()).map_err(|err| DocServeError::Predictor {
                stage: "replay".into(),
                message: err.to_string(),
            })
        }
    }

    #[test]
    fn test_reference_cell() {
        let outputs: Vec<RawTableOutput> = serde_json::from_value(json!([{
            "tf_responses": [{
                "bbox": {"l": 1, "t": 2, "r": 3, "b": 4},
                "start_row_offset_idx": 0,
                "end_row_offset_idx": 0,
                "start_col_offset_idx": 0,
                "end_col_offset_idx": 1,
                "row_span": 1,
                "col_span": 2,
                "column_header": true
            }],
            "predict_details": {"num_rows": 1, "num_cols": 2}
        }]))
        .unwrap();

        let response = map_tables("r".into(), outputs, Duration::ZERO);
        let cell = &response.tables[0].cells[0];

        assert_eq!(
            serde_json::to_value(cell).unwrap(),
            json!({
                "bbox": {"l": 1.0, "t": 2.0, "r": 3.0, "b": 4.0},
                "start_row_offset_idx": 0,
                "end_row_offset_idx": 0,
                "start_col_offset_idx": 0,
                "end_col_offset_idx": 1,
                "row_span": 1,
                "col_span": 2,
                "column_header": true,
                "row_header": false,
                "row_section": false,
                "text": ""
            })
        );
    }

    #[test]
    fn test_defaults_apply_per_field() {
        let cell = map_cell(
            serde_json::from_value(json!({"bbox": "nope", "col_span": 3, "row_header": true}))
                .unwrap(),
        );

        assert_eq!(cell.bbox, Bbox::default());
        assert_eq!(cell.row_span, 1);
        assert_eq!(cell.col_span, 3);
        assert_eq!(cell.start_row_offset_idx, 0);
        assert_eq!(cell.end_col_offset_idx, 0);
        assert!(cell.row_header);
        assert!(!cell.column_header);
        assert!(!cell.row_section);
    }

    #[test]
    fn test_text_from_matched_tokens() {
        let cell = map_cell(
            serde_json::from_value(json!({
                "text_cell_bboxes": [{"token": " Net"}, {"token": "income "}, "junk"]
            }))
            .unwrap(),
        );
        assert_eq!(cell.text, "Net income");
    }

    #[test]
    fn test_missing_details_default_to_zero() {
        let outputs = vec![RawTableOutput::default(), RawTableOutput::default()];
        let response = map_tables("r".into(), outputs, Duration::from_millis(250));

        assert_eq!(response.latency_ms, 250.0);
        assert_eq!(response.tables.len(), 2);
        assert_eq!(response.tables[1].table_index, 1);
        assert_eq!(response.tables[1].num_rows, 0);
        assert_eq!(response.tables[1].num_cols, 0);
        assert!(response.tables[1].cells.is_empty());
    }

    #[tokio::test]
    async fn test_region_mutation_does_not_leak_into_page() {
        let metrics = ServiceMetrics::table().unwrap();
        let predictor = Arc::new(Mutex::new(Recording::new(json!([
            {"tf_responses": [], "predict_details": {"num_rows": 0, "num_cols": 0}}
        ]))));
        let regions = vec![[10, 20, 30, 40]];

        for _ in 0..2 {
            predict_tables(
                predictor.clone(),
                RgbImage::new(50, 50),
                &regions,
                None,
                "r".into(),
                &metrics,
            )
            .await
            .unwrap();
        }

        let recording = predictor.lock().await;
        assert_eq!(recording.seen_page_regions, vec![regions.clone(), regions.clone()]);
        assert_eq!(recording.seen_options, vec![TABLE_PREDICT_OPTIONS; 2]);
        assert_eq!(regions, vec![[10, 20, 30, 40]]);
    }

    #[tokio::test]
    async fn test_predict_tables_uses_ocr_document() {
        struct TokenCount;

        impl TablePredictor for TokenCount {
            fn multi_table_predict(
                &mut self,
                page: &IocrPage,
                table_bboxes: Vec<TableRegion>,
                _options: PredictOptions,
            ) -> Result<Vec<RawTableOutput>, DocServeError> {
                let tokens = page.tokens();
                Ok(table_bboxes
                    .iter()
                    .map(|_| RawTableOutput {
                        tf_responses: vec![RawCell {
                            text_cell_bboxes: tokens
                                .iter()
                                .map(|t| crate::predictor::MatchedToken {
                                    token: t.text.clone(),
                                    ..Default::default()
                                })
                                .collect(),
                            ..Default::default()
                        }],
                        ..Default::default()
                    })
                    .collect())
            }
        }

        let metrics = ServiceMetrics::table().unwrap();
        let doc = json!({"pages": [{"tokens": [
            {"text": "Total", "bbox": [0, 0, 5, 5]},
            {"text": "42", "bbox": [6, 0, 9, 5]}
        ]}]});

        let response = predict_tables(
            Arc::new(Mutex::new(TokenCount)),
            RgbImage::new(10, 10),
            &[[0, 0, 10, 10], [0, 0, 5, 5]],
            Some(&doc),
            "req".into(),
            &metrics,
        )
        .await
        .unwrap();

        assert_eq!(response.request_id, "req");
        assert_eq!(response.tables.len(), 2);
        assert_eq!(response.tables[0].cells[0].text, "Total 42");
        assert!(
            metrics
                .encode()
                .unwrap()
                .contains("table_tables_per_request_sum 2")
        );
    }
}
