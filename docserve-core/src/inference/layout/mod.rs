pub mod model;
pub mod session;

pub use model::{LayoutConfig, LayoutModel};
pub use session::{ImageMeta, LayoutSession, OnnxLayoutPredictor};
