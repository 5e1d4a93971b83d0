//! Post-processing of decoded cells: overlap correction, ordering and
//! token-to-cell matching.

use crate::{inference::table::otsl::GridCell, page::PageToken, predictor::MatchedToken};

/// Cells ordered by `(start_row, start_col)`.
pub fn sort_row_col(cells: &mut [GridCell]) {
    cells.sort_by_key(|cell| (cell.start_row, cell.start_col));
}

/// Pulls apart neighbouring cells whose boxes overlap.
///
/// Horizontal neighbours in the same row meet at the midpoint of their
/// overlap, vertical neighbours in the same column likewise.
pub fn correct_overlapping_cells(cells: &mut [GridCell]) {
    for i in 0..cells.len() {
        for j in 0..cells.len() {
            if i == j {
                continue;
            }

            let (a, b) = (&cells[i], &cells[j]);
            let same_row = a.start_row == b.start_row;
            let same_col = a.start_col == b.start_col;

            if same_row && a.end_col() <= b.start_col && a.bbox.max.x > b.bbox.min.x {
                let mid = (a.bbox.max.x + b.bbox.min.x) / 2.0;
                cells[i].bbox.max.x = mid;
                cells[j].bbox.min.x = mid;
            } else if same_col && a.end_row() <= b.start_row && a.bbox.max.y > b.bbox.min.y {
                let mid = (a.bbox.max.y + b.bbox.min.y) / 2.0;
                cells[i].bbox.max.y = mid;
                cells[j].bbox.min.y = mid;
            }
        }
    }
}

/// Attaches every token whose centre lies inside a cell to that cell.
///
/// A token is assigned at most once, to the first containing cell.
/// Tokens inside a cell keep top-to-bottom, left-to-right order.
pub fn match_tokens(cells: &mut [GridCell], tokens: &[PageToken]) {
    for token in tokens {
        let center = token.bbox.center();
        let Some(cell) = cells
            .iter_mut()
            .find(|cell| cell.bbox.contains_point(center))
        else {
            continue;
        };

        cell.tokens.push(MatchedToken {
            token: token.text.clone(),
            l: token.bbox.min.x as f64,
            t: token.bbox.min.y as f64,
            r: token.bbox.max.x as f64,
            b: token.bbox.max.y as f64,
        });
    }

    for cell in cells.iter_mut() {
        cell.tokens.sort_by(|a, b| {
            a.t.partial_cmp(&b.t)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.l.partial_cmp(&b.l).unwrap_or(std::cmp::Ordering::Equal))
        });
    }
}
