//! Model artifact resolution: a configured local path wins, otherwise the
//! files are fetched from the model hub into the local cache.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use snafu::ResultExt;
use tracing::*;

use crate::{
    config::{HubConfig, LayoutModelConfig, TableModelConfig},
    consts::TM_CONFIG_FILE,
    error::{DocServeError, DownloadSnafu, IoSnafu},
    inference::table::model::TableFormerConfig,
};

/// Blocking client for the hub `resolve` endpoint.
pub struct HubClient {
    client: reqwest::blocking::Client,
    hub: HubConfig,
}

impl HubClient {
    pub fn new(hub: &HubConfig) -> Result<Self, DocServeError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .context(DownloadSnafu {
                url: hub.endpoint.clone(),
            })?;

        Ok(Self {
            client,
            hub: hub.clone(),
        })
    }

    pub fn file_url(&self, repo: &str, file: &str) -> String {
        format!(
            "{}/{}/resolve/main/{}",
            self.hub.endpoint.trim_end_matches('/'),
            repo,
            file
        )
    }

    pub fn cache_path(&self, repo: &str, file: &str) -> PathBuf {
        self.hub.cache_dir.join(repo).join(file)
    }

    /// Returns the cached copy of `repo/file`, downloading it first if missing.
    pub fn fetch(&self, repo: &str, file: &str) -> Result<PathBuf, DocServeError> {
        let target = self.cache_path(repo, file);
        if target.is_file() {
            debug!("Using cached artifact {}", target.display());
            return Ok(target);
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).context(IoSnafu {
                path: parent.to_string_lossy(),
            })?;
        }

        let url = self.file_url(repo, file);
        info!("Downloading {} from {}", file, url);

        let mut request = self.client.get(&url);
        if let Some(token) = &self.hub.token {
            request = request.bearer_auth(token);
        }
        let mut response = request.send().context(DownloadSnafu { url: url.clone() })?;

        if !response.status().is_success() {
            return Err(DocServeError::DownloadStatus {
                url,
                status: response.status().as_u16(),
            });
        }

        // Write next to the target and rename so a partial file is never cached.
        let partial = target.with_extension("part");
        let mut writer = File::create(&partial).context(IoSnafu {
            path: partial.to_string_lossy(),
        })?;
        if let Err(source) = response.copy_to(&mut writer) {
            drop(writer);
            discard_partial(&partial);
            return Err(DocServeError::Download { source, url });
        }
        fs::rename(&partial, &target).context(IoSnafu {
            path: target.to_string_lossy(),
        })?;

        info!("Downloaded {} to {}", file, target.display());
        Ok(target)
    }
}

fn discard_partial(partial: &Path) {
    if let Err(err) = fs::remove_file(partial) {
        warn!("Failed to remove partial download {}: {}", partial.display(), err);
    }
}

const LAYOUT_ARTIFACT_HINT: &str = "set LAYOUT_ARTIFACT_PATH to a YOLO-style ONNX export with a \
     [1, 4 + 11, N] output, or LAYOUT_HF_REPO and LAYOUT_HF_FILE to a hub file that hosts one";

const TABLE_ARTIFACT_HINT: &str = "set TABLE_WEIGHTS_DIR to a directory holding tm_config.json \
     and the TableFormer ONNX export, or TABLE_HF_REPO and TABLE_HF_SUBDIR to a hub folder \
     that hosts both";

/// Turns a hub miss into an error that says which variables to set.
fn explain_missing(err: DocServeError, hint: &'static str) -> DocServeError {
    match err {
        DocServeError::DownloadStatus { url, status } => {
            DocServeError::ArtifactMissing { url, status, hint }
        }
        other => other,
    }
}

/// Resolves the layout ONNX file.
///
/// `artifact_path` may point at the file itself or at a directory holding
/// `hf_file`; it is ignored when it does not exist.
pub fn resolve_layout_artifact(config: &LayoutModelConfig) -> Result<PathBuf, DocServeError> {
    if let Some(path) = config.artifact_path.as_deref() {
        if path.is_file() {
            info!("Using layout model from LAYOUT_ARTIFACT_PATH: {}", path.display());
            return Ok(path.to_path_buf());
        }
        let nested = path.join(&config.hf_file);
        if nested.is_file() {
            info!("Using layout model from LAYOUT_ARTIFACT_PATH: {}", nested.display());
            return Ok(nested);
        }
        warn!(
            "LAYOUT_ARTIFACT_PATH {} does not exist, falling back to the hub",
            path.display()
        );
    }

    info!("Downloading layout model from hub: {}", config.hf_repo);
    HubClient::new(&config.hub)?
        .fetch(&config.hf_repo, &config.hf_file)
        .map_err(|err| explain_missing(err, LAYOUT_ARTIFACT_HINT))
}

/// Resolves the TableFormer weights directory.
///
/// A configured directory is used only when it contains `tm_config.json`;
/// otherwise the config and the ONNX file it names are fetched from the hub.
pub fn resolve_table_weights(config: &TableModelConfig) -> Result<PathBuf, DocServeError> {
    if let Some(dir) = config.weights_dir.as_deref() {
        if has_tm_config(dir) {
            info!("Using table weights from TABLE_WEIGHTS_DIR: {}", dir.display());
            return Ok(dir.to_path_buf());
        }
        warn!(
            "TABLE_WEIGHTS_DIR {} has no {}, falling back to the hub",
            dir.display(),
            TM_CONFIG_FILE
        );
    }

    info!("Downloading TableFormer weights from hub: {}", config.hf_repo);
    let hub = HubClient::new(&config.hub)?;
    let subdir = config.hf_subdir.trim_matches('/');

    let fetch = |file: String| {
        hub.fetch(&config.hf_repo, &file)
            .map_err(|err| explain_missing(err, TABLE_ARTIFACT_HINT))
    };

    let config_path = fetch(format!("{subdir}/{TM_CONFIG_FILE}"))?;
    let weights_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| hub.cache_path(&config.hf_repo, subdir));

    let tm_config = TableFormerConfig::load(&weights_dir)?;
    fetch(format!("{subdir}/{}", tm_config.model.onnx_file))?;

    Ok(weights_dir)
}

fn has_tm_config(dir: &Path) -> bool {
    dir.join(TM_CONFIG_FILE).is_file()
}
