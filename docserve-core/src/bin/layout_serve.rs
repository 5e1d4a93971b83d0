use std::error::Error;

use clap::Parser;
use tracing::*;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use docserve_core::{
    LayoutPredictor, LayoutState, PredictorCell, ServerConfig,
    config::LayoutModelConfig,
    consts::MAX_IMAGE_SIZE_MB,
    inference::layout::OnnxLayoutPredictor,
    layout_router, start_server,
};

#[derive(Parser)]
#[command(name = "layout-serve")]
#[command(about = "Document layout detection service")]
struct Args {
    #[arg(long, env = "LAYOUT_ADDR", default_value = "0.0.0.0:8000")]
    addr: String,

    #[arg(long, env = "MAX_IMAGE_SIZE_MB", default_value_t = MAX_IMAGE_SIZE_MB)]
    max_upload_mb: usize,

    #[arg(long, help = "Return internal error messages to callers")]
    expose_errors: bool,

    #[arg(long, help = "Load the model before accepting requests")]
    eager_load: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let args = Args::parse();

    let predictor = PredictorCell::new("layout", || {
        let config = LayoutModelConfig::from_env()?;
        OnnxLayoutPredictor::load(&config)
    });
    let state = LayoutState::new(
        predictor,
        ServerConfig {
            max_upload_mb: args.max_upload_mb,
            expose_errors: args.expose_errors,
        },
    )?;

    if args.eager_load {
        match state.predictor.get().await {
            Ok(predictor) => info!("Layout predictor ready: {}", predictor.lock().await.info()),
            Err(err) => warn!("Layout predictor unavailable at startup: {}", err),
        }
    }

    start_server("Layout", &args.addr, layout_router(state)).await?;

    Ok(())
}
