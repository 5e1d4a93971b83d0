use std::{
    collections::HashMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use ndarray::{Array3, Array4};
use serde::Deserialize;
use snafu::ResultExt;

use crate::{
    consts::{DEFAULT_TABLE_ONNX_FILE, TM_CONFIG_FILE},
    error::{ConfigParseSnafu, DocServeError, IoSnafu},
    inference::model::Model,
};

/// The subset of `tm_config.json` the ONNX backend reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TableFormerConfig {
    pub dataset: DatasetSection,
    pub model: ModelSection,
    pub predict: PredictSection,
    pub dataset_wordmap: WordMapSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatasetSection {
    pub resized_image: usize,
    pub image_normalization: Normalization,
}

impl Default for DatasetSection {
    fn default() -> Self {
        Self {
            resized_image: 448,
            image_normalization: Normalization::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Normalization {
    pub state: bool,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            state: true,
            mean: [0.942_478_5, 0.942_546_75, 0.942_926_1],
            std: [0.179_109_56, 0.179_404_03, 0.179_316_63],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    pub save_dir: String,
    pub onnx_file: String,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            save_dir: String::new(),
            onnx_file: DEFAULT_TABLE_ONNX_FILE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PredictSection {
    pub max_steps: usize,
}

impl Default for PredictSection {
    fn default() -> Self {
        Self { max_steps: 1024 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WordMapSection {
    pub word_map_tag: HashMap<String, usize>,
}

impl Default for WordMapSection {
    fn default() -> Self {
        let tags = [
            "<pad>", "<unk>", "<start>", "<end>", "ecel", "fcel", "lcel", "ucel", "xcel", "nl",
            "ched", "rhed", "srow",
        ];
        Self {
            word_map_tag: tags
                .iter()
                .enumerate()
                .map(|(index, tag)| (tag.to_string(), index))
                .collect(),
        }
    }
}

impl TableFormerConfig {
    /// Reads `tm_config.json` from `dir` and points `model.save_dir` at it.
    pub fn load(dir: &Path) -> Result<Self, DocServeError> {
        let path = dir.join(TM_CONFIG_FILE);
        let file = File::open(&path).context(IoSnafu {
            path: path.to_string_lossy(),
        })?;

        let mut config: Self =
            serde_json::from_reader(BufReader::new(file)).context(ConfigParseSnafu {
                path: path.to_string_lossy(),
            })?;
        config.model.save_dir = dir.to_string_lossy().into_owned();

        Ok(config)
    }

    /// Tag id to tag name.
    pub fn tag_names(&self) -> HashMap<usize, String> {
        self.dataset_wordmap
            .word_map_tag
            .iter()
            .map(|(name, id)| (*id, name.clone()))
            .collect()
    }

    pub fn onnx_path(&self) -> PathBuf {
        Path::new(&self.model.save_dir).join(&self.model.onnx_file)
    }
}

pub struct TableModel {
    path: PathBuf,
    config: TableFormerConfig,
}

/// `[1, 3, S, S]` normalized crop.
pub type TableInput = Array4<f32>;

/// Tag logits `[1, L, V]` and cell boxes `[1, L, 4]`.
pub struct TableOutput {
    pub tag_logits: Array3<f32>,
    pub cell_bboxes: Array3<f32>,
}

impl TableModel {
    pub const BBOX_OUTPUT_NAME: &'static str = "cell_bboxes";

    pub fn new(config: TableFormerConfig) -> Self {
        Self {
            path: config.onnx_path(),
            config,
        }
    }
}

impl Model for TableModel {
    type Input = TableInput;
    type Output = TableOutput;
    type Config = TableFormerConfig;

    const INPUT_NAME: &'static str = "images";
    const OUTPUT_NAME: &'static str = "tag_logits";
    const MODEL_NAME: &'static str = "tableformer";

    fn path(&self) -> &Path {
        &self.path
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_load_rewrites_save_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(TM_CONFIG_FILE),
            r#"{
                "dataset": {"resized_image": 224},
                "model": {"save_dir": "/somewhere/else"},
                "predict": {"max_steps": 64, "beam_size": 5},
                "dataset_wordmap": {"word_map_tag": {"<end>": 3, "fcel": 5}}
            }"#,
        )
        .unwrap();

        let config = TableFormerConfig::load(dir.path()).unwrap();

        assert_eq!(config.model.save_dir, dir.path().to_string_lossy());
        assert_eq!(config.model.onnx_file, DEFAULT_TABLE_ONNX_FILE);
        assert_eq!(config.dataset.resized_image, 224);
        assert_eq!(config.predict.max_steps, 64);
        assert_eq!(config.tag_names()[&5], "fcel");
        assert_eq!(config.onnx_path(), dir.path().join(DEFAULT_TABLE_ONNX_FILE));
    }

    #[test]
    fn test_load_missing_or_broken_config() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            TableFormerConfig::load(dir.path()),
            Err(DocServeError::Io { .. })
        ));

        fs::write(dir.path().join(TM_CONFIG_FILE), b"{not json").unwrap();
        assert!(matches!(
            TableFormerConfig::load(dir.path()),
            Err(DocServeError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_default_word_map_has_otsl_tags() {
        let names = TableFormerConfig::default().tag_names();
        for tag in ["fcel", "ecel", "lcel", "ucel", "xcel", "nl", "ched", "rhed", "srow"] {
            assert!(names.values().any(|name| name == tag), "missing {tag}");
        }
    }
}
