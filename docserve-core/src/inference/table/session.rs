use std::collections::HashMap;

use image::{RgbImage, imageops::FilterType};
use ndarray::prelude::*;
use ort::{
    session::{Session, builder::SessionBuilder},
    value::TensorRef,
};
use snafu::{OptionExt, ResultExt};
use tracing::*;

use crate::{
    analysis::bbox::Bbox,
    artifact::resolve_table_weights,
    config::TableModelConfig,
    error::*,
    inference::{
        model::{Model, OnnxSession, session_builder},
        table::{
            matching::{correct_overlapping_cells, match_tokens, sort_row_col},
            model::{TableFormerConfig, TableModel, TableOutput},
            otsl::{GridCell, TableGrid, build_grid, decode_steps},
        },
    },
    page::IocrPage,
    predictor::{PredictDetails, PredictOptions, RawTableOutput, TablePredictor, TableRegion},
};

pub struct TableSession<M: Model> {
    session: Session,
    model: M,
    input_name: String,
    tag_output_name: String,
    bbox_output_name: String,
    tag_names: HashMap<usize, String>,
    summary: String,
}

/// The table backend served by `table-serve`.
pub type OnnxTablePredictor = TableSession<TableModel>;

/// Where the crop sits on the page, in page pixels.
#[derive(Debug, Clone, Copy)]
pub struct CropMeta {
    pub region: Bbox,
}

impl TableSession<TableModel> {
    pub fn new(session: SessionBuilder, model: TableModel) -> Result<Self, DocServeError> {
        let session = session
            .commit_from_file(model.path())
            .context(OrtInitSnafu { stage: "commit" })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| TableModel::INPUT_NAME.to_string());
        let output_name = |index: usize, fallback: &str| {
            session
                .outputs
                .get(index)
                .map(|output| output.name.clone())
                .unwrap_or_else(|| fallback.to_string())
        };
        let tag_output_name = output_name(0, TableModel::OUTPUT_NAME);
        let bbox_output_name = output_name(1, TableModel::BBOX_OUTPUT_NAME);
        let tag_names = model.config().tag_names();

        Ok(Self {
            session,
            model,
            input_name,
            tag_output_name,
            bbox_output_name,
            tag_names,
            summary: String::new(),
        })
    }

    /// Resolves the weights directory and builds the session from process configuration.
    pub fn load(config: &TableModelConfig) -> Result<Self, DocServeError> {
        let weights_dir = resolve_table_weights(config)?;
        let tm_config = TableFormerConfig::load(&weights_dir)?;

        info!(
            "Loading TableFormer with device={}, num_threads={}, save_dir={}",
            config.device, config.num_threads, tm_config.model.save_dir
        );

        let model = TableModel::new(tm_config);
        let mut session = Self::new(session_builder(config.device, config.num_threads)?, model)?;
        session.summary = format!(
            "{} weights={} device={} num_threads={}",
            TableModel::MODEL_NAME,
            weights_dir.display(),
            config.device,
            config.num_threads
        );

        info!("Table model loaded: {}", session.summary);
        Ok(session)
    }

    pub fn info(&self) -> &str {
        &self.summary
    }
}

impl OnnxSession<TableModel> for TableSession<TableModel> {
    /// BGR crop, `height x width x 3`.
    type Source = Array3<u8>;
    type Output = TableGrid;
    type Extra = CropMeta;

    fn preprocess(&self, crop: &Array3<u8>) -> Result<<TableModel as Model>::Input, DocServeError> {
        normalize_crop(crop, self.model.config())
    }

    fn postprocess(
        &self,
        output: <TableModel as Model>::Output,
        extra: Self::Extra,
    ) -> Result<Self::Output, DocServeError> {
        let steps = decode_steps(
            output.tag_logits.slice(s![0, .., ..]),
            output.cell_bboxes.slice(s![0, .., ..]),
            &self.tag_names,
            self.model.config().predict.max_steps,
        );

        Ok(build_grid(&steps, extra.region))
    }

    fn infer(
        &mut self,
        input: <TableModel as Model>::Input,
    ) -> Result<<TableModel as Model>::Output, DocServeError> {
        let output = self
            .session
            .run(ort::inputs![
                self.input_name.as_str() => TensorRef::from_array_view(&input).context(TensorSnafu{stage: "input"})?
            ])
            .context(InferenceSnafu {})?;

        let extract = |name: &str| -> Result<Array3<f32>, DocServeError> {
            output
                .get(name)
                .context(NotFoundOutputSnafu { output_name: name })?
                .try_extract_array::<f32>()
                .context(TensorSnafu { stage: "extract" })?
                .to_owned()
                .into_dimensionality::<Ix3>()
                .context(ShapeSnafu { stage: name })
        };

        let tag_logits = extract(&self.tag_output_name)?;
        let cell_bboxes = extract(&self.bbox_output_name)?;

        Ok(TableOutput {
            tag_logits,
            cell_bboxes,
        })
    }
}

impl TablePredictor for TableSession<TableModel> {
    fn multi_table_predict(
        &mut self,
        page: &IocrPage,
        mut table_bboxes: Vec<TableRegion>,
        options: PredictOptions,
    ) -> Result<Vec<RawTableOutput>, DocServeError> {
        let tokens = if options.do_matching {
            page.tokens()
        } else {
            Vec::new()
        };
        debug!(
            "Predicting {} tables with {} page tokens",
            table_bboxes.len(),
            tokens.len()
        );

        let mut outputs = Vec::with_capacity(table_bboxes.len());
        for region in table_bboxes.iter_mut() {
            clamp_region(region, page.width, page.height);
            let [x1, y1, x2, y2] = *region;

            if x2 <= x1 || y2 <= y1 {
                warn!("Table region {:?} is empty after clamping to the page", region);
                outputs.push(RawTableOutput {
                    tf_responses: Vec::new(),
                    predict_details: PredictDetails {
                        num_rows: Some(0),
                        num_cols: Some(0),
                    },
                });
                continue;
            }

            let crop = page
                .image
                .slice(s![y1 as usize..y2 as usize, x1 as usize..x2 as usize, ..])
                .to_owned();
            let meta = CropMeta {
                region: Bbox::from_ltrb(x1 as f32, y1 as f32, x2 as f32, y2 as f32),
            };

            let mut grid = self.run(&crop, meta)?;

            if options.correct_overlapping_cells {
                correct_overlapping_cells(&mut grid.cells);
            }
            if options.sort_row_col_indexes {
                sort_row_col(&mut grid.cells);
            }
            if options.do_matching {
                match_tokens(&mut grid.cells, &tokens);
            }

            outputs.push(RawTableOutput {
                predict_details: PredictDetails {
                    num_rows: Some(grid.num_rows as i64),
                    num_cols: Some(grid.num_cols as i64),
                },
                tf_responses: grid.cells.into_iter().map(GridCell::into_raw).collect(),
            });
        }

        Ok(outputs)
    }
}

/// Orders the corners and clamps the region to the page, in place.
pub fn clamp_region(region: &mut TableRegion, width: u32, height: u32) {
    let [x1, y1, x2, y2] = *region;
    let (w, h) = (width as i64, height as i64);
    *region = [
        x1.min(x2).clamp(0, w),
        y1.min(y2).clamp(0, h),
        x1.max(x2).clamp(0, w),
        y1.max(y2).clamp(0, h),
    ];
}

/// Resizes the crop to `resized_image` squared and normalizes it with the
/// configured mean and std.
///
/// The tensor is laid out `[1, C, W, H]`, the axis order TableFormer was
/// trained on.
pub fn normalize_crop(
    crop: &Array3<u8>,
    config: &TableFormerConfig,
) -> Result<Array4<f32>, DocServeError> {
    let (height, width, _) = crop.dim();
    let size = config.dataset.resized_image;

    let buffer = RgbImage::from_raw(width as u32, height as u32, crop.iter().copied().collect())
        .context(PredictorSnafu {
            stage: "crop",
            message: format!("crop buffer does not match {width}x{height}"),
        })?;
    let resized = image::imageops::resize(&buffer, size as u32, size as u32, FilterType::Triangle);

    let norm = &config.dataset.image_normalization;
    let mut tensor = Array4::<f32>::zeros([1, 3, size, size]);
    for (x, y, pixel) in resized.enumerate_pixels() {
        for (c, value) in pixel.0.iter().enumerate() {
            let value = *value as f32 / 255.0;
            tensor[[0, c, x as usize, y as usize]] = if norm.state {
                (value - norm.mean[c]) / norm.std[c]
            } else {
                value
            };
        }
    }

    Ok(tensor)
}
