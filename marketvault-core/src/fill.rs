//! Dense time × identifier matrices and the missing-value fills applied to them.
//!
//! Missing cells are `NaN`. Rows are dates (ascending), columns are
//! identifiers. Both fills are total: any shape, any content.

use serde::{Deserialize, Serialize};

/// Row-major `rows × cols` matrix of `f64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// A matrix with every cell missing.
    pub fn nan(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![f64::NAN; rows * cols],
        }
    }

    /// Build from row vectors. Returns `None` if the rows are ragged.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Option<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != cols) {
            return None;
        }
        let n = rows.len();
        Some(Self {
            rows: n,
            cols,
            data: rows.into_iter().flatten().collect(),
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    /// Panics on out-of-range indices, like slice indexing.
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        assert!(row < self.rows && col < self.cols, "matrix index out of range");
        self.data[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> Option<&[f64]> {
        (row < self.rows).then(|| &self.data[row * self.cols..(row + 1) * self.cols])
    }

    pub fn column(&self, col: usize) -> Option<Vec<f64>> {
        (col < self.cols).then(|| (0..self.rows).map(|r| self.data[r * self.cols + col]).collect())
    }

    /// Raw row-major cells.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn count_missing(&self) -> usize {
        self.data.iter().filter(|v| v.is_nan()).count()
    }

    /// Cell-wise equality that treats two `NaN`s as equal.
    pub fn same_cells(&self, other: &Matrix) -> bool {
        self.shape() == other.shape()
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| a == b || (a.is_nan() && b.is_nan()))
    }
}

/// Forward-fill each column down the date axis.
///
/// Cell `(i, j)` takes the value at the greatest row `k <= i` whose cell
/// `(k, j)` is present. Leading gaps stay `NaN`.
pub fn forward_fill(matrix: &Matrix) -> Matrix {
    let mut out = matrix.clone();
    forward_fill_in_place(&mut out);
    out
}

pub fn forward_fill_in_place(matrix: &mut Matrix) {
    let cols = matrix.cols;
    let mut last = vec![f64::NAN; cols];
    for row in matrix.data.chunks_mut(cols.max(1)) {
        for (cell, carried) in row.iter_mut().zip(last.iter_mut()) {
            if cell.is_nan() {
                *cell = *carried;
            } else {
                *carried = *cell;
            }
        }
    }
}

/// Replace every missing cell with `0.0`.
pub fn zero_fill(matrix: &Matrix) -> Matrix {
    let mut out = matrix.clone();
    zero_fill_in_place(&mut out);
    out
}

pub fn zero_fill_in_place(matrix: &mut Matrix) {
    for cell in matrix.data.iter_mut().filter(|v| v.is_nan()) {
        *cell = 0.0;
    }
}
