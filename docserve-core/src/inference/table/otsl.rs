//! OTSL tag decoding: tag sequence in, cell grid out.
//!
//! Each row of the table is a run of tags terminated by `nl`. A cell starts
//! on `fcel`, `ecel`, `ched`, `rhed` or `srow`; `lcel` extends the cell on
//! its left, `ucel` the cell above and `xcel` both.

use std::collections::HashMap;

use ndarray::ArrayView2;

use crate::{
    analysis::bbox::Bbox,
    predictor::{MatchedToken, RawBbox, RawCell},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtslTag {
    Fcel,
    Ecel,
    Lcel,
    Ucel,
    Xcel,
    Nl,
    Ched,
    Rhed,
    Srow,
}

impl OtslTag {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "fcel" => Some(OtslTag::Fcel),
            "ecel" => Some(OtslTag::Ecel),
            "lcel" => Some(OtslTag::Lcel),
            "ucel" => Some(OtslTag::Ucel),
            "xcel" => Some(OtslTag::Xcel),
            "nl" => Some(OtslTag::Nl),
            "ched" => Some(OtslTag::Ched),
            "rhed" => Some(OtslTag::Rhed),
            "srow" => Some(OtslTag::Srow),
            _ => None,
        }
    }

    pub fn starts_cell(&self) -> bool {
        matches!(
            self,
            OtslTag::Fcel | OtslTag::Ecel | OtslTag::Ched | OtslTag::Rhed | OtslTag::Srow
        )
    }

    fn extends_left(&self) -> bool {
        matches!(self, OtslTag::Lcel | OtslTag::Xcel)
    }

    fn extends_up(&self) -> bool {
        matches!(self, OtslTag::Ucel | OtslTag::Xcel)
    }
}

/// One decoding step: the tag and the box predicted with it, normalized
/// `cx, cy, w, h` relative to the table crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TagStep {
    pub tag: OtslTag,
    pub cxcywh: [f32; 4],
}

/// A structural cell with zero-based, end-exclusive grid offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    pub bbox: Bbox,
    pub start_row: usize,
    pub start_col: usize,
    pub row_span: usize,
    pub col_span: usize,
    pub column_header: bool,
    pub row_header: bool,
    pub row_section: bool,
    pub tokens: Vec<MatchedToken>,
}

impl GridCell {
    pub fn end_row(&self) -> usize {
        self.start_row + self.row_span
    }

    pub fn end_col(&self) -> usize {
        self.start_col + self.col_span
    }

    pub fn into_raw(self) -> RawCell {
        RawCell {
            bbox: Some(RawBbox {
                l: self.bbox.min.x as f64,
                t: self.bbox.min.y as f64,
                r: self.bbox.max.x as f64,
                b: self.bbox.max.y as f64,
            }),
            start_row_offset_idx: Some(self.start_row as i64),
            end_row_offset_idx: Some(self.end_row() as i64),
            start_col_offset_idx: Some(self.start_col as i64),
            end_col_offset_idx: Some(self.end_col() as i64),
            row_span: Some(self.row_span as i64),
            col_span: Some(self.col_span as i64),
            column_header: Some(self.column_header),
            row_header: Some(self.row_header),
            row_section: Some(self.row_section),
            text_cell_bboxes: self.tokens,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableGrid {
    pub num_rows: usize,
    pub num_cols: usize,
    pub cells: Vec<GridCell>,
}

/// Greedy decoding of `[L, V]` tag logits with their `[L, 4]` boxes.
///
/// Stops at `<end>` or after `max_steps`; control tokens are skipped.
pub fn decode_steps(
    tag_logits: ArrayView2<f32>,
    cell_bboxes: ArrayView2<f32>,
    tag_names: &HashMap<usize, String>,
    max_steps: usize,
) -> Vec<TagStep> {
    let mut steps = Vec::new();

    for (step, logits) in tag_logits.outer_iter().enumerate().take(max_steps) {
        let Some((tag_id, _)) = logits
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        else {
            break;
        };

        let Some(name) = tag_names.get(&tag_id) else {
            continue;
        };
        if name == "<end>" {
            break;
        }
        let Some(tag) = OtslTag::from_name(name) else {
            continue;
        };

        let mut cxcywh = [0.0; 4];
        if step < cell_bboxes.nrows() {
            for (slot, value) in cxcywh.iter_mut().zip(cell_bboxes.row(step).iter()) {
                *slot = *value;
            }
        }
        steps.push(TagStep { tag, cxcywh });
    }

    steps
}

/// Builds the cell grid. Boxes are mapped from crop-normalized
/// coordinates into `region`.
pub fn build_grid(steps: &[TagStep], region: Bbox) -> TableGrid {
    let rows = split_rows(steps);
    let num_rows = rows.len();
    let num_cols = rows.iter().map(Vec::len).max().unwrap_or(0);

    let tag_at = |row: usize, col: usize| rows.get(row).and_then(|r| r.get(col)).map(|s| s.tag);

    let mut cells = Vec::new();
    for (row, steps) in rows.iter().enumerate() {
        for (col, step) in steps.iter().enumerate() {
            if !step.tag.starts_cell() {
                continue;
            }

            let col_span = 1 + (col + 1..num_cols)
                .take_while(|&c| tag_at(row, c).is_some_and(|t| t.extends_left()))
                .count();
            let row_span = 1 + (row + 1..num_rows)
                .take_while(|&r| tag_at(r, col).is_some_and(|t| t.extends_up()))
                .count();

            cells.push(GridCell {
                bbox: to_region(step.cxcywh, region),
                start_row: row,
                start_col: col,
                row_span,
                col_span,
                column_header: step.tag == OtslTag::Ched,
                row_header: step.tag == OtslTag::Rhed,
                row_section: step.tag == OtslTag::Srow,
                tokens: Vec::new(),
            });
        }
    }

    TableGrid {
        num_rows,
        num_cols,
        cells,
    }
}

fn split_rows(steps: &[TagStep]) -> Vec<Vec<TagStep>> {
    let mut rows = Vec::new();
    let mut current = Vec::new();

    for step in steps {
        if step.tag == OtslTag::Nl {
            rows.push(std::mem::take(&mut current));
        } else {
            current.push(*step);
        }
    }
    // unterminated last row
    if !current.is_empty() {
        rows.push(current);
    }

    rows.retain(|row| !row.is_empty());
    rows
}

fn to_region(cxcywh: [f32; 4], region: Bbox) -> Bbox {
    let [cx, cy, w, h] = cxcywh.map(|v| v.clamp(0.0, 1.0));
    let size = region.max - region.min;
    Bbox::from_ltrb(
        region.min.x + (cx - w / 2.0).max(0.0) * size.x,
        region.min.y + (cy - h / 2.0).max(0.0) * size.y,
        region.min.x + (cx + w / 2.0).min(1.0) * size.x,
        region.min.y + (cy + h / 2.0).min(1.0) * size.y,
    )
}
