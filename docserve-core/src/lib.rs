pub mod analysis;
pub mod artifact;
pub mod config;
pub mod consts;
pub mod error;
pub mod inference;
pub mod ingest;
pub mod metrics;
pub mod page;
pub mod predictor;
pub mod schema;
pub mod server;
pub mod service;

// Re-export commonly used types
pub use error::DocServeError;
pub use predictor::{LayoutPredictor, PredictorCell, TablePredictor};
pub use server::{LayoutState, ServerConfig, TableState, layout_router, start_server, table_router};
