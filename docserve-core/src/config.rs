//! Predictor configuration, read once from the environment when a
//! predictor is first constructed.

use std::{fmt, path::PathBuf, str::FromStr};

use crate::{consts::*, error::DocServeError};

/// Execution device for an ONNX Runtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda,
    CoreMl,
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            "coreml" | "mps" => Ok(Device::CoreMl),
            other => Err(format!("unknown device `{other}`, expected cpu, cuda or coreml")),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda => write!(f, "cuda"),
            Device::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Where and how to reach the remote model registry.
#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    pub endpoint: String,
    pub token: Option<String>,
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutModelConfig {
    /// Local `.onnx` file or a directory holding `hf_file`.
    pub artifact_path: Option<PathBuf>,
    pub hf_repo: String,
    pub hf_file: String,
    pub device: Device,
    pub num_threads: usize,
    pub threshold: f32,
    pub hub: HubConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableModelConfig {
    pub weights_dir: Option<PathBuf>,
    pub hf_repo: String,
    pub hf_subdir: String,
    pub device: Device,
    pub num_threads: usize,
    pub hub: HubConfig,
}

impl HubConfig {
    pub fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            endpoint: non_empty(lookup, HF_ENDPOINT_ENV_NAME)
                .unwrap_or_else(|| DEFAULT_HF_ENDPOINT.to_string()),
            token: non_empty(lookup, HF_TOKEN_ENV_NAME),
            cache_dir: non_empty(lookup, MODEL_CACHE_DIR_ENV_NAME)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_CACHE_DIR)),
        }
    }
}

impl LayoutModelConfig {
    pub fn from_env() -> Result<Self, DocServeError> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup<F>(lookup: &F) -> Result<Self, DocServeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            artifact_path: non_empty(lookup, LAYOUT_ARTIFACT_PATH_ENV_NAME).map(PathBuf::from),
            hf_repo: non_empty(lookup, LAYOUT_HF_REPO_ENV_NAME)
                .unwrap_or_else(|| DEFAULT_LAYOUT_HF_REPO.to_string()),
            hf_file: non_empty(lookup, LAYOUT_HF_FILE_ENV_NAME)
                .unwrap_or_else(|| DEFAULT_LAYOUT_HF_FILE.to_string()),
            device: parse_or(lookup, LAYOUT_DEVICE_ENV_NAME, Device::Cpu)?,
            num_threads: parse_or(lookup, LAYOUT_NUM_THREADS_ENV_NAME, DEFAULT_NUM_THREADS)?,
            threshold: parse_or(lookup, LAYOUT_THRESHOLD_ENV_NAME, PROBA_THRESHOLD)?,
            hub: HubConfig::from_lookup(lookup),
        })
    }
}

impl TableModelConfig {
    pub fn from_env() -> Result<Self, DocServeError> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup<F>(lookup: &F) -> Result<Self, DocServeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            weights_dir: non_empty(lookup, TABLE_WEIGHTS_DIR_ENV_NAME).map(PathBuf::from),
            hf_repo: non_empty(lookup, TABLE_HF_REPO_ENV_NAME)
                .unwrap_or_else(|| DEFAULT_TABLE_HF_REPO.to_string()),
            hf_subdir: non_empty(lookup, TABLE_HF_SUBDIR_ENV_NAME)
                .unwrap_or_else(|| DEFAULT_TABLE_HF_SUBDIR.to_string()),
            device: parse_or(lookup, TABLE_DEVICE_ENV_NAME, Device::Cpu)?,
            num_threads: parse_or(lookup, TABLE_NUM_THREADS_ENV_NAME, DEFAULT_NUM_THREADS)?,
            hub: HubConfig::from_lookup(lookup),
        })
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn non_empty<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, DocServeError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match non_empty(lookup, name) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|err: T::Err| DocServeError::EnvParse {
            name: name.to_string(),
            value: value.clone(),
            message: err.to_string(),
        }),
    }
}
