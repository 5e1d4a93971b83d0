use glam::Vec2;
use image::{RgbImage, imageops::FilterType};
use ndarray::prelude::*;
use ort::{
    session::{Session, builder::SessionBuilder},
    value::TensorRef,
};
use snafu::{OptionExt, ResultExt};
use tracing::*;

use crate::{
    analysis::{bbox::Bbox, labels::Label},
    artifact::resolve_layout_artifact,
    config::LayoutModelConfig,
    error::*,
    inference::{
        layout::model::{LayoutConfig, LayoutModel},
        model::{Model, OnnxSession, session_builder},
    },
    predictor::{LayoutPredictor, RawDetection},
};

pub struct LayoutSession<M: Model> {
    session: Session,
    model: M,
    input_name: String,
    output_name: String,
    summary: String,
}

/// The layout backend served by `layout-serve`.
pub type OnnxLayoutPredictor = LayoutSession<LayoutModel>;

/// Geometry of the source image relative to the letterboxed model input.
#[derive(Debug, Clone, Copy)]
pub struct ImageMeta {
    pub image_size: Vec2,
    pub scale: f32,
}

/// A decoded detection in source image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: Bbox,
    pub label: Label,
    pub proba: f32,
}

impl LayoutSession<LayoutModel> {
    pub fn new(session: SessionBuilder, model: LayoutModel) -> Result<Self, DocServeError> {
        let session = session
            .commit_from_file(model.path())
            .context(OrtInitSnafu { stage: "commit" })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| LayoutModel::INPUT_NAME.to_string());
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .unwrap_or_else(|| LayoutModel::OUTPUT_NAME.to_string());

        Ok(Self {
            session,
            model,
            input_name,
            output_name,
            summary: String::new(),
        })
    }

    /// Resolves the artifact and builds the session from process configuration.
    pub fn load(config: &LayoutModelConfig) -> Result<Self, DocServeError> {
        let artifact_path = resolve_layout_artifact(config)?;

        info!(
            "Loading layout model with device={}, num_threads={}, threshold={}",
            config.device, config.num_threads, config.threshold
        );

        let model = LayoutModel::new(
            artifact_path.clone(),
            LayoutConfig {
                proba_threshold: config.threshold,
                ..LayoutConfig::default()
            },
        );
        let mut session = Self::new(session_builder(config.device, config.num_threads)?, model)?;
        session.summary = format!(
            "{} artifact={} device={} num_threads={} threshold={}",
            LayoutModel::MODEL_NAME,
            artifact_path.display(),
            config.device,
            config.num_threads,
            config.threshold
        );

        info!("Layout model loaded: {}", session.summary);
        Ok(session)
    }
}

impl OnnxSession<LayoutModel> for LayoutSession<LayoutModel> {
    type Source = RgbImage;
    type Output = Vec<Detection>;
    type Extra = ImageMeta;

    fn preprocess(&self, image: &RgbImage) -> Result<<LayoutModel as Model>::Input, DocServeError> {
        Ok(letterbox(image, self.model.config()))
    }

    fn postprocess(
        &self,
        output: <LayoutModel as Model>::Output,
        extra: Self::Extra,
    ) -> Result<Self::Output, DocServeError> {
        check_output_layout(output.shape(), self.model.config())?;
        let mut detections = extract_detections(output.view(), self.model.config(), &extra);

        nms(&mut detections, self.model.config().iou_threshold);

        Ok(detections)
    }

    fn infer(
        &mut self,
        input: <LayoutModel as Model>::Input,
    ) -> Result<<LayoutModel as Model>::Output, DocServeError> {
        let output = self
            .session
            .run(ort::inputs![
                self.input_name.as_str() => TensorRef::from_array_view(&input).context(TensorSnafu{stage: "input"})?
            ])
            .context(InferenceSnafu {})?;

        let tensor = output
            .get(self.output_name.as_str())
            .context(NotFoundOutputSnafu {
                output_name: self.output_name.clone(),
            })?
            .try_extract_array::<f32>()
            .context(TensorSnafu { stage: "extract" })?;

        let output = tensor
            .to_owned()
            .into_dimensionality::<Ix3>()
            .context(ShapeSnafu { stage: "output" })?;

        Ok(output)
    }
}

impl LayoutPredictor for LayoutSession<LayoutModel> {
    fn predict(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>, DocServeError> {
        let config = self.model.config();
        let (w0, h0) = image.dimensions();
        let scale = letterbox_scale(w0, h0, config);
        let meta = ImageMeta {
            image_size: Vec2::new(w0 as f32, h0 as f32),
            scale,
        };

        let detections = self.run(image, meta)?;

        Ok(detections
            .into_iter()
            .map(|detection| RawDetection {
                l: detection.bbox.min.x as f64,
                t: detection.bbox.min.y as f64,
                r: detection.bbox.max.x as f64,
                b: detection.bbox.max.y as f64,
                label: detection.label.name().to_string(),
                confidence: detection.proba as f64,
            })
            .collect())
    }

    fn info(&self) -> String {
        self.summary.clone()
    }
}

fn letterbox_scale(w0: u32, h0: u32, config: &LayoutConfig) -> f32 {
    f32::min(
        config.required_width as f32 / w0.max(1) as f32,
        config.required_height as f32 / h0.max(1) as f32,
    )
}

/// Resizes into the top-left of a gray canvas, keeping aspect ratio.
pub fn letterbox(image: &RgbImage, config: &LayoutConfig) -> Array4<f32> {
    let (w0, h0) = image.dimensions();
    let scale = letterbox_scale(w0, h0, config);
    let w_new = ((w0 as f32 * scale).round() as u32).clamp(1, config.required_width as u32);
    let h_new = ((h0 as f32 * scale).round() as u32).clamp(1, config.required_height as u32);

    let resized = image::imageops::resize(image, w_new, h_new, FilterType::Triangle);

    let mut input_tensor = Array4::from_elem(
        [
            config.batch_size,
            config.input_channels,
            config.required_height,
            config.required_width,
        ],
        config.background_fill_value,
    );

    for (x, y, pixel) in resized.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        input_tensor[[0, 0, y, x]] = r as f32 / 255.0;
        input_tensor[[0, 1, y, x]] = g as f32 / 255.0;
        input_tensor[[0, 2, y, x]] = b as f32 / 255.0;
    }

    input_tensor
}

/// Rejects outputs that are not a `[1, 4 + labels, N]` detection tensor,
/// such as the logits and boxes pair of an RT-DETR export.
pub fn check_output_layout(shape: &[usize], config: &LayoutConfig) -> Result<(), DocServeError> {
    let rows = config.cxywh_size + config.label_size;
    match shape {
        [1, r, _] if *r == rows => Ok(()),
        _ => Err(DocServeError::Predictor {
            stage: "postprocess".to_string(),
            message: format!(
                "layout output has shape {shape:?}, expected [1, {rows}, N] (YOLO-style cx, cy, w, h then one score per label)"
            ),
        }),
    }
}

/// Decodes a `[1, 4 + labels, N]` tensor into detections above threshold,
/// mapped back to source image pixels.
pub fn extract_detections(
    output: ArrayView3<f32>,
    config: &LayoutConfig,
    meta: &ImageMeta,
) -> Vec<Detection> {
    let mut detections = Vec::new();

    // Get the first batch slice (assuming batch size = 1)
    let output = output.slice(s![0, .., ..]);
    let label_end = (config.cxywh_size + config.label_size).min(output.shape()[0]);
    if label_end <= config.cxywh_size {
        warn!("Layout output has no class rows, shape {:?}", output.shape());
        return detections;
    }

    for prediction in output.axis_iter(Axis(1)) {
        let bbox = prediction.slice(s![0..config.cxywh_size]);
        let labels = prediction.slice(s![config.cxywh_size..label_end]);

        let Some((max_prob_idx, &proba)) = labels
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        else {
            continue;
        };

        if proba < config.proba_threshold {
            continue;
        }
        let Some(label) = Label::from_index(max_prob_idx) else {
            continue;
        };

        // YOLO center-size in model pixels, clamped to the resized image, then back to source pixels
        let resized_size = meta.image_size * meta.scale;
        let bbox = Bbox::from_center_size(
            Vec2::new(bbox[0_usize], bbox[1_usize]),
            Vec2::new(bbox[2_usize], bbox[3_usize]),
        )
            .clamp(Vec2::ZERO, resized_size)
            .scale(1. / meta.scale);

        detections.push(Detection {
            bbox,
            label,
            proba: proba.clamp(0.0, 1.0),
        });
    }

    detections
}

/// Merge-style NMS: a detection overlapping a stronger kept one is folded
/// into it. Leaves detections sorted by confidence, highest first.
pub fn nms(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| {
        b.proba
            .partial_cmp(&a.proba)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if detections.len() <= 1 {
        return;
    }

    let mut keep_flags = vec![true; detections.len()];

    for current_index in 0..detections.len() {
        if !keep_flags[current_index] {
            continue;
        }

        let current_bbox = detections[current_index].bbox;

        for kept_index in 0..current_index {
            if !keep_flags[kept_index] {
                continue;
            }

            let overlap_ratio = current_bbox.overlap_ratio(&detections[kept_index].bbox);

            if overlap_ratio > iou_threshold
                && detections[kept_index].label == detections[current_index].label
            {
                detections[kept_index].bbox = detections[kept_index].bbox.union(&current_bbox);
                keep_flags[current_index] = false;
                break;
            }
        }
    }

    let mut flags = keep_flags.into_iter();
    detections.retain(|_| flags.next().unwrap_or(false));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(l: f32, t: f32, r: f32, b: f32, proba: f32, label: Label) -> Detection {
        Detection {
            bbox: Bbox::from_ltrb(l, t, r, b),
            label,
            proba,
        }
    }

    fn small_config() -> LayoutConfig {
        LayoutConfig {
            required_width: 8,
            required_height: 8,
            ..LayoutConfig::default()
        }
    }

    #[test]
    fn test_nms_empty_input() {
        let mut detections = Vec::new();
        nms(&mut detections, 0.5);
        assert!(detections.is_empty());
    }

    #[test]
    fn test_nms_keeps_disjoint_sorted_by_confidence() {
        let mut detections = vec![
            detection(0.0, 0.0, 10.0, 10.0, 0.6, Label::Text),
            detection(50.0, 50.0, 60.0, 60.0, 0.9, Label::Title),
        ];
        nms(&mut detections, 0.5);
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].label, Label::Title);
        assert_eq!(detections[1].label, Label::Text);
    }

    #[test]
    fn test_nms_merges_overlapping_same_label() {
        let mut detections = vec![
            detection(0.0, 0.0, 100.0, 100.0, 0.9, Label::Table),
            detection(10.0, 10.0, 110.0, 90.0, 0.7, Label::Table),
        ];
        nms(&mut detections, 0.45);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].proba, 0.9);
        assert_eq!(detections[0].bbox, Bbox::from_ltrb(0.0, 0.0, 110.0, 100.0));
    }

    #[test]
    fn test_nms_keeps_overlapping_different_labels() {
        let mut detections = vec![
            detection(0.0, 0.0, 100.0, 100.0, 0.9, Label::Table),
            detection(10.0, 10.0, 50.0, 20.0, 0.7, Label::Caption),
        ];
        nms(&mut detections, 0.45);
        assert_eq!(detections.len(), 2);
    }

    #[test]
    fn test_letterbox_pads_with_background() {
        let config = small_config();
        let image = RgbImage::from_pixel(4, 2, image::Rgb([255, 0, 0]));
        let tensor = letterbox(&image, &config);

        assert_eq!(tensor.shape(), &[1, 3, 8, 8]);
        // scale 2 → 8x4 image at the top, gray padding below
        assert_eq!(tensor[[0, 0, 0, 0]], 1.0);
        assert_eq!(tensor[[0, 1, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 0, 7, 7]], config.background_fill_value);
    }

    #[test]
    fn test_check_output_layout() {
        let config = LayoutConfig::default();
        assert!(check_output_layout(&[1, 4 + config.label_size, 300], &config).is_ok());

        for shape in [[1, 300, 4], [1, 300, config.label_size], [2, 4 + config.label_size, 300]] {
            let err = check_output_layout(&shape, &config).unwrap_err();
            assert!(err.to_string().contains("expected [1, 15, N]"), "{err}");
        }
    }

    #[test]
    fn test_extract_detections_threshold_and_scaling() {
        let config = LayoutConfig {
            label_size: 2,
            proba_threshold: 0.5,
            ..small_config()
        };
        // two candidates: [cx, cy, w, h, p(Caption), p(Footnote)]
        let mut output = Array3::<f32>::zeros((1, 6, 2));
        let strong = [4.0, 2.0, 4.0, 2.0, 0.1, 0.8];
        let weak = [1.0, 1.0, 1.0, 1.0, 0.2, 0.3];
        for (row, (a, b)) in strong.iter().zip(weak.iter()).enumerate() {
            output[[0, row, 0]] = *a;
            output[[0, row, 1]] = *b;
        }

        let meta = ImageMeta {
            image_size: Vec2::new(4.0, 2.0),
            scale: 2.0,
        };
        let detections = extract_detections(output.view(), &config, &meta);

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, Label::Footnote);
        assert_eq!(detections[0].proba, 0.8);
        // model box (2,1)-(6,3) halves back to source pixels
        assert_eq!(detections[0].bbox, Bbox::from_ltrb(1.0, 0.5, 3.0, 1.5));
    }
}
