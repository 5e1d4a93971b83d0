use std::time::Duration;

use image::RgbImage;
use tracing::*;

use crate::{
    error::DocServeError,
    metrics::ServiceMetrics,
    predictor::{LayoutPredictor, RawDetection, SharedPredictor, invoke},
    schema::{Box, LayoutPredictResponse},
    service::round_to,
};

/// Runs layout detection on `image` and records latency and region count.
pub async fn predict_layout<P: LayoutPredictor>(
    predictor: SharedPredictor<P>,
    image: RgbImage,
    request_id: String,
    metrics: &ServiceMetrics,
) -> Result<LayoutPredictResponse, DocServeError> {
    let (detections, latency) = invoke(predictor, move |p: &mut P| p.predict(&image)).await?;

    metrics.record_inference(latency, detections.len());
    debug!(
        "Layout predictor returned {} regions in {:?}",
        detections.len(),
        latency
    );

    Ok(map_layout(request_id, detections, latency))
}

/// Boxes keep model order; `confidence` is the rounded mean, `text` the
/// labels joined by `", "`.
pub fn map_layout(
    request_id: String,
    detections: Vec<RawDetection>,
    latency: Duration,
) -> LayoutPredictResponse {
    let confidence = if detections.is_empty() {
        0.0
    } else {
        detections.iter().map(|d| d.confidence).sum::<f64>() / detections.len() as f64
    };
    let text = detections
        .iter()
        .map(|d| d.label.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let boxes = detections
        .into_iter()
        .map(|d| Box {
            x1: d.l,
            y1: d.t,
            x2: d.r,
            y2: d.b,
            text: d.label,
            conf: d.confidence,
        })
        .collect();

    LayoutPredictResponse {
        request_id,
        text,
        confidence: round_to(confidence, 4),
        latency_ms: round_to(latency.as_secs_f64() * 1000.0, 2),
        boxes,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use super::*;
    use crate::metrics::Outcome;

    fn detection(label: &str, confidence: f64) -> RawDetection {
        RawDetection {
            l: 1.0,
            t: 2.0,
            r: 3.0,
            b: 4.0,
            label: label.to_string(),
            confidence,
        }
    }

    struct FixedLayout(Vec<RawDetection>);

    impl LayoutPredictor for FixedLayout {
        fn predict(&mut self, _image: &RgbImage) -> Result<Vec<RawDetection>, DocServeError> {
            Ok(self.0.clone())
        }

        fn info(&self) -> String {
            "fixed".to_string()
        }
    }

    #[test]
    fn test_zero_detections() {
        let response = map_layout("r".into(), Vec::new(), Duration::from_micros(1500));
        assert_eq!(response.confidence, 0.0);
        assert_eq!(response.text, "");
        assert!(response.boxes.is_empty());
        assert_eq!(response.latency_ms, 1.5);
    }

    #[test]
    fn test_mean_confidence_and_label_join() {
        let response = map_layout(
            "r".into(),
            vec![
                detection("Table", 0.91234),
                detection("Text", 0.8),
                detection("Picture", 0.5),
            ],
            Duration::from_nanos(12_345_678),
        );

        assert_eq!(response.text, "Table, Text, Picture");
        assert_eq!(response.confidence, 0.7374);
        assert_eq!(response.latency_ms, 12.35);
        assert_eq!(response.boxes.len(), 3);
        assert_eq!(
            response.boxes[0],
            Box {
                x1: 1.0,
                y1: 2.0,
                x2: 3.0,
                y2: 4.0,
                text: "Table".into(),
                conf: 0.91234
            }
        );
    }

    #[tokio::test]
    async fn test_predict_layout_records_volume() {
        let metrics = ServiceMetrics::layout().unwrap();
        let predictor = Arc::new(Mutex::new(FixedLayout(vec![
            detection("Title", 0.9),
            detection("Text", 0.7),
        ])));

        let response = predict_layout(predictor, RgbImage::new(2, 2), "req".into(), &metrics)
            .await
            .unwrap();

        assert_eq!(response.request_id, "req");
        assert_eq!(response.confidence, 0.8);
        assert!(
            metrics
                .encode()
                .unwrap()
                .contains("layout_regions_per_request_sum 2")
        );
        // outcome is recorded by the HTTP layer, not here
        assert_eq!(metrics.outcome_count(Outcome::Success), 0);
    }
}
