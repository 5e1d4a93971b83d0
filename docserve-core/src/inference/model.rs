use std::path::Path;

use ort::{
    execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch},
    session::{
        Session,
        builder::{GraphOptimizationLevel, SessionBuilder},
    },
};
use snafu::ResultExt;
use tracing::*;

use crate::{
    config::Device,
    error::{DocServeError, OrtInitSnafu},
};

pub trait Model {
    type Input;
    type Output;
    type Config;

    const INPUT_NAME: &'static str;
    const OUTPUT_NAME: &'static str;
    const MODEL_NAME: &'static str;

    /// Location of the `.onnx` file on disk.
    fn path(&self) -> &Path;
    fn config(&self) -> &Self::Config;
}

pub trait OnnxSession<M: Model> {
    type Source;
    type Output;
    type Extra;

    fn preprocess(&self, source: &Self::Source) -> Result<M::Input, DocServeError>;

    fn postprocess(
        &self,
        output: M::Output,
        extra: Self::Extra,
    ) -> Result<Self::Output, DocServeError>;

    fn infer(&mut self, input: M::Input) -> Result<M::Output, DocServeError>;

    fn run(
        &mut self,
        source: &Self::Source,
        extra: Self::Extra,
    ) -> Result<Self::Output, DocServeError> {
        let input = self.preprocess(source)?;

        let output = self.infer(input)?;

        self.postprocess(output, extra)
    }
}

/// common session builder
pub fn session_builder(device: Device, num_threads: usize) -> Result<SessionBuilder, DocServeError> {
    let session_builder = Session::builder()
        .context(OrtInitSnafu { stage: "builder" })?
        .with_execution_providers(execution_providers(device))
        .context(OrtInitSnafu { stage: "provider" })?
        .with_optimization_level(GraphOptimizationLevel::Level1)
        .context(OrtInitSnafu {
            stage: "optimization",
        })?
        .with_intra_threads(num_threads.max(1))
        .context(OrtInitSnafu {
            stage: "intra-threads",
        })?;

    Ok(session_builder)
}

/// Requested accelerator first, CPU always last as fallback.
fn execution_providers(device: Device) -> Vec<ExecutionProviderDispatch> {
    let mut providers = Vec::new();

    match device {
        Device::Cpu => {}
        Device::Cuda => {
            #[cfg(feature = "cuda")]
            {
                use ort::execution_providers::CUDAExecutionProvider;
                providers.push(CUDAExecutionProvider::default().build());
            }
            #[cfg(not(feature = "cuda"))]
            warn!("Device `cuda` requested but the `cuda` feature is disabled, using cpu");
        }
        Device::CoreMl => {
            #[cfg(all(feature = "coreml", target_os = "macos"))]
            {
                use ort::execution_providers::CoreMLExecutionProvider;
                use ort::execution_providers::coreml::*;
                providers.push(
                    CoreMLExecutionProvider::default()
                        .with_model_format(CoreMLModelFormat::MLProgram)
                        .build(),
                );
            }
            #[cfg(not(all(feature = "coreml", target_os = "macos")))]
            warn!("Device `coreml` requested but unavailable in this build, using cpu");
        }
    }

    providers.push(CPUExecutionProvider::default().build());
    providers
}
