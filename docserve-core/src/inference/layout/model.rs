use std::path::{Path, PathBuf};

use ndarray::{ArrayBase, Dim, OwnedRepr};

use crate::{consts::*, inference::model::Model};

pub struct LayoutModel {
    path: PathBuf,
    config: LayoutConfig,
}

pub type LayoutInput = ArrayBase<OwnedRepr<f32>, Dim<[usize; 4]>>;
pub type LayoutOutput = ArrayBase<OwnedRepr<f32>, Dim<[usize; 3]>>;

#[derive(Debug, Clone)]
pub struct LayoutConfig {
    pub required_width: usize,
    pub required_height: usize,
    pub batch_size: usize,
    pub input_channels: usize,
    pub background_fill_value: f32,
    pub cxywh_size: usize,
    pub label_size: usize,
    pub proba_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            required_width: REQUIRED_WIDTH,
            required_height: REQUIRED_HEIGHT,
            batch_size: BATCH_SIZE,
            input_channels: INPUT_CHANNELS,
            background_fill_value: BACKGROUND_FILL_VALUE,
            cxywh_size: CXYWH_OFFSET,
            label_size: LABEL_SIZE,
            proba_threshold: PROBA_THRESHOLD,
            iou_threshold: NMS_IOU_THRESHOLD,
        }
    }
}

impl LayoutModel {
    pub fn new(path: PathBuf, config: LayoutConfig) -> Self {
        Self { path, config }
    }
}

impl Model for LayoutModel {
    type Input = LayoutInput;

    type Output = LayoutOutput;
    type Config = LayoutConfig;

    const INPUT_NAME: &'static str = "images";

    const OUTPUT_NAME: &'static str = "output0";

    const MODEL_NAME: &'static str = "doclaynet-layout";

    fn path(&self) -> &Path {
        &self.path
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }
}
