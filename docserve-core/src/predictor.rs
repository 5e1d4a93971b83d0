//! Predictor contracts and the process-wide, construct-once predictor handle.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use image::RgbImage;
use serde::{Deserialize, Deserializer};
use snafu::ResultExt;
use tokio::sync::{Mutex, OnceCell};
use tracing::*;

use crate::{
    error::{DocServeError, JoinSnafu},
    page::IocrPage,
};

/// Caller-supplied table rectangle `[x1, y1, x2, y2]` in image pixels.
pub type TableRegion = [i64; 4];

/// One raw layout detection as produced by a layout backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawDetection {
    pub l: f64,
    pub t: f64,
    pub r: f64,
    pub b: f64,
    pub label: String,
    pub confidence: f64,
}

/// Flags forwarded to the table backend on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictOptions {
    pub do_matching: bool,
    pub correct_overlapping_cells: bool,
    pub sort_row_col_indexes: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct RawBbox {
    pub l: f64,
    pub t: f64,
    pub r: f64,
    pub b: f64,
}

/// A page token the backend matched into a cell.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatchedToken {
    pub token: String,
    pub l: f64,
    pub t: f64,
    pub r: f64,
    pub b: f64,
}

/// One raw cell record. Every field is optional; defaults are applied by
/// the table result mapper, not here.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawCell {
    #[serde(deserialize_with = "lenient_object")]
    pub bbox: Option<RawBbox>,
    pub start_row_offset_idx: Option<i64>,
    pub end_row_offset_idx: Option<i64>,
    pub start_col_offset_idx: Option<i64>,
    pub end_col_offset_idx: Option<i64>,
    pub row_span: Option<i64>,
    pub col_span: Option<i64>,
    pub column_header: Option<bool>,
    pub row_header: Option<bool>,
    pub row_section: Option<bool>,
    #[serde(deserialize_with = "lenient_objects")]
    pub text_cell_bboxes: Vec<MatchedToken>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PredictDetails {
    pub num_rows: Option<i64>,
    pub num_cols: Option<i64>,
}

/// Output for one table region.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawTableOutput {
    pub tf_responses: Vec<RawCell>,
    pub predict_details: PredictDetails,
}

/// Anything that can detect layout regions on an RGB image.
pub trait LayoutPredictor: Send + 'static {
    fn predict(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>, DocServeError>;

    fn info(&self) -> String;
}

/// Anything that can recognise table structure on an IOCR page.
///
/// `table_bboxes` is owned by the call; backends may reorder or rewrite it.
pub trait TablePredictor: Send + 'static {
    fn multi_table_predict(
        &mut self,
        page: &IocrPage,
        table_bboxes: Vec<TableRegion>,
        options: PredictOptions,
    ) -> Result<Vec<RawTableOutput>, DocServeError>;
}

pub type SharedPredictor<P> = Arc<Mutex<P>>;

type Loader<P> = Arc<dyn Fn() -> Result<P, DocServeError> + Send + Sync>;

/// Lazily constructed predictor shared by every request of the process.
///
/// The loader runs at most once, on the blocking pool; concurrent first
/// callers wait for the same construction. Construction runs in a detached
/// task, so a caller dropped mid-load leaves it running for the next one.
/// A failed construction is kept and reported as `ModelUnavailable` until
/// restart.
pub struct PredictorCell<P> {
    name: &'static str,
    cell: Arc<OnceCell<LoadState<P>>>,
    loader: Loader<P>,
}

type LoadState<P> = Result<SharedPredictor<P>, String>;

impl<P: Send + 'static> PredictorCell<P> {
    pub fn new<F>(name: &'static str, loader: F) -> Self
    where
        F: Fn() -> Result<P, DocServeError> + Send + Sync + 'static,
    {
        Self {
            name,
            cell: Arc::new(OnceCell::new()),
            loader: Arc::new(loader),
        }
    }

    /// Returns the shared handle, constructing it on first use.
    pub async fn get(&self) -> Result<SharedPredictor<P>, DocServeError> {
        let state = match self.cell.get() {
            Some(state) => state.clone(),
            None => {
                let cell = Arc::clone(&self.cell);
                let loader = Arc::clone(&self.loader);
                let name = self.name;
                tokio::spawn(async move {
                    cell.get_or_init(|| construct(name, loader))
                        .await
                        .clone()
                })
                .await
                .unwrap_or_else(|err| Err(err.to_string()))
            }
        };

        state.map_err(|message| DocServeError::ModelUnavailable { message })
    }

    /// True once construction has succeeded in this process.
    pub fn is_ready(&self) -> bool {
        matches!(self.cell.get(), Some(Ok(_)))
    }
}

async fn construct<P: Send + 'static>(name: &'static str, loader: Loader<P>) -> LoadState<P> {
    info!("Loading {} predictor", name);
    match tokio::task::spawn_blocking(move || loader()).await {
        Ok(Ok(predictor)) => {
            info!("{} predictor loaded", name);
            Ok(Arc::new(Mutex::new(predictor)))
        }
        Ok(Err(err)) => {
            error!("{} predictor failed to load: {}", name, err);
            Err(err.to_string())
        }
        Err(err) => {
            error!("{} predictor loader panicked: {}", name, err);
            Err(err.to_string())
        }
    }
}

/// Runs `call` against the locked predictor on the blocking pool.
///
/// One call at a time per handle. The returned duration covers `call` only,
/// not the wait for the lock.
pub async fn invoke<P, T, F>(
    predictor: SharedPredictor<P>,
    call: F,
) -> Result<(T, Duration), DocServeError>
where
    P: Send + 'static,
    T: Send + 'static,
    F: FnOnce(&mut P) -> Result<T, DocServeError> + Send + 'static,
{
    let mut guard = predictor.lock_owned().await;
    tokio::task::spawn_blocking(move || {
        let t0 = Instant::now();
        let output = call(&mut guard)?;
        Ok((output, t0.elapsed()))
    })
    .await
    .context(JoinSnafu)?
}

fn lenient_object<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    if !value.is_object() {
        return Ok(None);
    }
    Ok(serde_json::from_value(value).ok())
}

fn lenient_objects<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let serde_json::Value::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter(serde_json::Value::is_object)
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    #[derive(Debug)]
    struct Counting(usize);

    #[tokio::test]
    async fn test_is_ready_false_until_first_get() {
        let cell = PredictorCell::new("test", || Ok(Counting(1)));
        assert!(!cell.is_ready());

        let predictor = cell.get().await.unwrap();
        assert_eq!(predictor.lock().await.0, 1);
        assert!(cell.is_ready());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_calls_construct_once() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&constructed);
        let cell = Arc::new(PredictorCell::new("test", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            Ok(Counting(7))
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cell = Arc::clone(&cell);
                tokio::spawn(async move { cell.get().await.map(|p| Arc::as_ptr(&p) as usize) })
            })
            .collect();

        let mut ptrs = Vec::new();
        for handle in handles {
            ptrs.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        assert!(ptrs.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_cancelled_first_caller_does_not_restart_load() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&constructed);
        let cell = Arc::new(PredictorCell::new("test", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            Ok(Counting(3))
        }));

        let first = {
            let cell = Arc::clone(&cell);
            tokio::spawn(async move { cell.get().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());

        let predictor = cell.get().await.unwrap();
        assert_eq!(predictor.lock().await.0, 3);
        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        assert!(cell.is_ready());
    }

    #[tokio::test]
    async fn test_failed_construction_is_sticky() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let cell: PredictorCell<Counting> = PredictorCell::new("test", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(DocServeError::Predictor {
                stage: "load".into(),
                message: "no weights".into(),
            })
        });

        for _ in 0..3 {
            let err = cell.get().await.unwrap_err();
            assert!(matches!(err, DocServeError::ModelUnavailable { .. }));
            assert!(err.to_string().contains("no weights"));
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(!cell.is_ready());
    }

    #[tokio::test]
    async fn test_invoke_runs_call_and_measures() {
        let predictor = Arc::new(Mutex::new(Counting(2)));
        let (out, elapsed) = invoke(predictor.clone(), |p: &mut Counting| {
            p.0 += 1;
            Ok(p.0 * 10)
        })
        .await
        .unwrap();

        assert_eq!(out, 30);
        assert!(elapsed < Duration::from_secs(5));
        assert_eq!(predictor.lock().await.0, 3);
    }

    #[test]
    fn test_raw_cell_defaults_to_none() {
        let cell: RawCell = serde_json::from_value(json!({})).unwrap();
        assert_eq!(cell, RawCell::default());
    }

    #[test]
    fn test_raw_cell_tolerates_non_object_bbox_and_tokens() {
        let cell: RawCell = serde_json::from_value(json!({
            "bbox": [1, 2, 3, 4],
            "row_span": 2,
            "text_cell_bboxes": [{"token": "a"}, "junk", 3, {"token": "b", "l": 1.0}]
        }))
        .unwrap();

        assert_eq!(cell.bbox, None);
        assert_eq!(cell.row_span, Some(2));
        let tokens: Vec<_> = cell.text_cell_bboxes.iter().map(|t| t.token.as_str()).collect();
        assert_eq!(tokens, vec!["a", "b"]);
    }

    #[test]
    fn test_raw_table_output_from_json() {
        let output: RawTableOutput = serde_json::from_value(json!({
            "tf_responses": [{"bbox": {"l": 1, "t": 2, "r": 3, "b": 4}, "column_header": true}],
            "predict_details": {"num_rows": 3, "num_cols": 2}
        }))
        .unwrap();

        assert_eq!(output.tf_responses.len(), 1);
        assert_eq!(
            output.tf_responses[0].bbox,
            Some(RawBbox { l: 1.0, t: 2.0, r: 3.0, b: 4.0 })
        );
        assert_eq!(output.predict_details.num_rows, Some(3));
    }
}
