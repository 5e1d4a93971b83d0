//! Bounded, validated ingestion of multipart uploads.
//!
//! Every check here runs before the predictor is touched.

use axum::{
    extract::multipart::{Field, MultipartError},
    http::StatusCode,
};
use image::RgbImage;
use serde_json::Value;
use snafu::ResultExt;

use crate::{
    consts::ALLOWED_CONTENT_TYPES,
    error::{DocServeError, MalformedImageSnafu, MalformedOcrDocumentSnafu, RegionListJsonSnafu},
    predictor::TableRegion,
};

/// Rejects uploads whose declared type is not an allowed image type.
///
/// Only the media type essence is compared; parameters such as `charset`
/// are ignored.
pub fn check_content_type(content_type: Option<&str>) -> Result<(), DocServeError> {
    let declared = content_type.unwrap_or_default();
    let essence = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if ALLOWED_CONTENT_TYPES.contains(&essence.as_str()) {
        Ok(())
    } else {
        Err(DocServeError::UnsupportedMediaType {
            content_type: declared.to_string(),
            allowed: ALLOWED_CONTENT_TYPES.join(", "),
        })
    }
}

/// Byte accumulator that refuses to grow past its limit.
#[derive(Debug)]
pub struct BoundedBuffer {
    buf: Vec<u8>,
    limit_mb: usize,
}

impl BoundedBuffer {
    pub fn new(limit_mb: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit_mb,
        }
    }

    pub fn limit_bytes(&self) -> usize {
        self.limit_mb * 1024 * 1024
    }

    /// Appends `chunk`, or fails without copying it if the limit would be exceeded.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), DocServeError> {
        if self.buf.len() + chunk.len() > self.limit_bytes() {
            return Err(DocServeError::PayloadTooLarge {
                limit_mb: self.limit_mb,
            });
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Streams one multipart field into memory, chunk by chunk, up to `limit_mb`.
pub async fn read_field(mut field: Field<'_>, limit_mb: usize) -> Result<Vec<u8>, DocServeError> {
    let name = field.name().unwrap_or_default().to_string();
    let mut buffer = BoundedBuffer::new(limit_mb);

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|err| multipart_error(err, &name, limit_mb))?
    {
        buffer.push(&chunk)?;
    }

    Ok(buffer.into_inner())
}

/// Reads a text form field.
pub async fn read_text(field: Field<'_>, limit_mb: usize) -> Result<String, DocServeError> {
    let name = field.name().unwrap_or_default().to_string();
    let bytes = read_field(field, limit_mb).await?;
    String::from_utf8(bytes).map_err(|err| DocServeError::MalformedInput {
        field: name,
        message: err.to_string(),
    })
}

/// Maps multipart framing errors; a body rejected by the size limit layer is
/// still a `PayloadTooLarge`.
pub fn multipart_error(err: MultipartError, field: &str, limit_mb: usize) -> DocServeError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        DocServeError::PayloadTooLarge { limit_mb }
    } else {
        DocServeError::MalformedInput {
            field: field.to_string(),
            message: err.body_text(),
        }
    }
}

/// Decodes image bytes into 8-bit RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, DocServeError> {
    if bytes.is_empty() {
        return Err(DocServeError::EmptyInput);
    }
    let image = image::load_from_memory(bytes).context(MalformedImageSnafu)?;
    Ok(image.to_rgb8())
}

/// Parses `table_bboxes`: a non-empty JSON array of `[x1, y1, x2, y2]`.
///
/// Coordinates are truncated to integers.
pub fn parse_table_bboxes(raw: &str) -> Result<Vec<TableRegion>, DocServeError> {
    let value: Value = serde_json::from_str(raw).context(RegionListJsonSnafu)?;

    let items = match value {
        Value::Array(items) if !items.is_empty() => items,
        _ => return Err(DocServeError::RegionListEmpty),
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| region(item).ok_or(DocServeError::RegionShape { index }))
        .collect()
}

fn region(item: &Value) -> Option<TableRegion> {
    let coords = item.as_array()?;
    if coords.len() != 4 {
        return None;
    }

    let mut region = [0_i64; 4];
    for (slot, coord) in region.iter_mut().zip(coords) {
        *slot = match coord.as_i64() {
            Some(value) => value,
            None => coord.as_f64().filter(|value| value.is_finite())?.trunc() as i64,
        };
    }
    Some(region)
}

/// Parses the optional `iocr_json` field. Absent or empty means no document.
pub fn parse_iocr_json(raw: Option<&str>) -> Result<Option<Value>, DocServeError> {
    match raw {
        Some(raw) if !raw.is_empty() => serde_json::from_str(raw)
            .map(Some)
            .context(MalformedOcrDocumentSnafu),
        _ => Ok(None),
    }
}
