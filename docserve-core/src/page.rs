//! The composite IOCR page handed to the table predictor.

use image::RgbImage;
use ndarray::Array3;
use serde_json::{Map, Value, json};
use tracing::*;

use crate::{analysis::bbox::Bbox, predictor::TableRegion};

/// Pixels, geometry, region list and optional OCR tokens for one image.
#[derive(Debug, Clone)]
pub struct IocrPage {
    /// First page of the caller's OCR document (deep copy) or an empty skeleton.
    pub base: Map<String, Value>,
    /// `height x width x 3`, BGR byte order.
    pub image: Array3<u8>,
    pub width: u32,
    pub height: u32,
    /// Independent copy of the validated table regions.
    pub table_bboxes: Vec<TableRegion>,
}

/// A text token carried by the OCR document.
#[derive(Debug, Clone, PartialEq)]
pub struct PageToken {
    pub text: String,
    pub bbox: Bbox,
}

impl IocrPage {
    /// Builds the page from the decoded image, the validated regions and the
    /// optional OCR-extraction document.
    ///
    /// The caller's document and region slice are only read; everything the
    /// page holds is an owned copy.
    pub fn build(image: &RgbImage, table_bboxes: &[TableRegion], iocr: Option<&Value>) -> Self {
        let (width, height) = image.dimensions();

        let base = match iocr.and_then(first_page) {
            Some(page) => page.clone(),
            None => {
                debug!("No OCR page supplied, using empty page skeleton");
                empty_page(width, height)
            }
        };

        Self {
            base,
            image: rgb_to_bgr(image),
            width,
            height,
            table_bboxes: table_bboxes.to_vec(),
        }
    }

    /// Tokens of the page. Entries without text or a usable box are skipped.
    pub fn tokens(&self) -> Vec<PageToken> {
        let Some(Value::Array(tokens)) = self.base.get("tokens") else {
            return Vec::new();
        };

        tokens
            .iter()
            .filter_map(|token| {
                let text = token.get("text")?.as_str()?.to_string();
                let bbox = parse_bbox(token.get("bbox")?)?;
                Some(PageToken { text, bbox })
            })
            .collect()
    }
}

fn first_page(document: &Value) -> Option<&Map<String, Value>> {
    document.get("pages")?.as_array()?.first()?.as_object()
}

fn empty_page(width: u32, height: u32) -> Map<String, Value> {
    let page = json!({
        "blocks": [],
        "cells": [],
        "height": height,
        "width": width,
        "dimensions": {
            "bbox": [0, 0, width, height],
            "height": height,
            "origin": "TopLeft",
            "width": width,
        },
        "fonts": [],
        "links": [],
        "rotation": 0.0,
        "rectangles": [],
        "textPositions": [],
        "text_lines": [],
        "tokens": [],
        "localized_image_locations": [],
        "scanned_elements": [],
        "paths": [],
        "pageNumber": 1,
        "page_image": {},
        "lang": [""],
    });

    match page {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Accepts `{"l","t","r","b"}` objects and `[l, t, r, b]` arrays.
fn parse_bbox(value: &Value) -> Option<Bbox> {
    let coords = match value {
        Value::Object(map) => [
            map.get("l")?.as_f64()?,
            map.get("t")?.as_f64()?,
            map.get("r")?.as_f64()?,
            map.get("b")?.as_f64()?,
        ],
        Value::Array(items) if items.len() == 4 => [
            items[0].as_f64()?,
            items[1].as_f64()?,
            items[2].as_f64()?,
            items[3].as_f64()?,
        ],
        _ => return None,
    };
    Some(Bbox::from_ltrb(
        coords[0] as f32,
        coords[1] as f32,
        coords[2] as f32,
        coords[3] as f32,
    ))
}

fn rgb_to_bgr(image: &RgbImage) -> Array3<u8> {
    let (width, height) = image.dimensions();
    Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
        image.get_pixel(x as u32, y as u32).0[2 - c]
    })
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    fn image() -> RgbImage {
        let mut image = RgbImage::new(4, 3);
        image.put_pixel(1, 2, Rgb([10, 20, 30]));
        image
    }

    #[test]
    fn test_skeleton_when_no_document() {
        let page = IocrPage::build(&image(), &[[0, 0, 4, 3]], None);

        assert_eq!(page.width, 4);
        assert_eq!(page.height, 3);
        assert_eq!(page.base["width"], json!(4));
        assert_eq!(page.base["height"], json!(3));
        assert_eq!(page.base["dimensions"]["bbox"], json!([0, 0, 4, 3]));
        assert_eq!(page.base["dimensions"]["origin"], json!("TopLeft"));
        assert_eq!(page.base["rotation"], json!(0.0));
        assert_eq!(page.base["lang"], json!([""]));
        assert_eq!(page.base["tokens"], json!([]));
        assert!(page.tokens().is_empty());
    }

    #[test]
    fn test_skeleton_when_document_has_no_pages() {
        let doc = json!({"pages": []});
        let page = IocrPage::build(&image(), &[[0, 0, 1, 1]], Some(&doc));
        assert_eq!(page.base["pageNumber"], json!(1));

        let doc = json!({"something": "else"});
        let page = IocrPage::build(&image(), &[[0, 0, 1, 1]], Some(&doc));
        assert_eq!(page.base["pageNumber"], json!(1));
    }

    #[test]
    fn test_first_page_is_deep_copied() {
        let doc = json!({
            "pages": [
                {"width": 100, "tokens": [{"text": "Total", "bbox": {"l": 1, "t": 2, "r": 3, "b": 4}}]},
                {"width": 200}
            ]
        });
        let original = doc.clone();

        let mut page = IocrPage::build(&image(), &[[0, 0, 1, 1]], Some(&doc));
        assert_eq!(page.base["width"], json!(100));

        page.base.insert("width".to_string(), json!(1));
        assert_eq!(doc, original);
    }

    #[test]
    fn test_pixels_are_bgr() {
        let page = IocrPage::build(&image(), &[[0, 0, 1, 1]], None);
        assert_eq!(page.image.shape(), &[3, 4, 3]);
        assert_eq!(page.image[[2, 1, 0]], 30);
        assert_eq!(page.image[[2, 1, 1]], 20);
        assert_eq!(page.image[[2, 1, 2]], 10);
    }

    #[test]
    fn test_regions_are_independent_copy() {
        let regions = vec![[10, 20, 30, 40]];
        let mut page = IocrPage::build(&image(), &regions, None);
        page.table_bboxes[0][0] = 99;
        assert_eq!(regions, vec![[10, 20, 30, 40]]);
    }

    #[test]
    fn test_tokens_accept_both_bbox_shapes() {
        let doc = json!({
            "pages": [{
                "tokens": [
                    {"text": "a", "bbox": {"l": 1, "t": 2, "r": 3, "b": 4}},
                    {"text": "b", "bbox": [5, 6, 7, 8]},
                    {"text": "c"},
                    {"bbox": [5, 6, 7, 8]},
                    {"text": "d", "bbox": [1, 2]}
                ]
            }]
        });
        let page = IocrPage::build(&image(), &[[0, 0, 1, 1]], Some(&doc));
        let tokens = page.tokens();

        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].text, "a");
        assert_eq!(tokens[0].bbox, Bbox::from_ltrb(1.0, 2.0, 3.0, 4.0));
        assert_eq!(tokens[1].bbox, Bbox::from_ltrb(5.0, 6.0, 7.0, 8.0));
    }
}
