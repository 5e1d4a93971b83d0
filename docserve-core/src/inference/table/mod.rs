pub mod matching;
pub mod model;
pub mod otsl;
pub mod session;

pub use model::{TableFormerConfig, TableModel};
pub use session::{CropMeta, OnnxTablePredictor, TableSession};
