//! Stride-aware matrix views over flat row-major buffers.
//!
//! Every table in the engine (alpha, beta, gamma, xi, the model parameters)
//! lives in a flat `f64` buffer. The shape is carried out-of-band by a view:
//! `rows`, `cols` and a row `stride`, validated against the buffer length
//! when the view is built. A scratch buffer sized for the longest sequence
//! of a batch can therefore be viewed with fewer rows (or narrower rows) for
//! each shorter unit without copying.

use cyanea_core::{CyaneaError, Result};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Number of elements a `rows × cols` view with the given stride touches.
fn required_len(rows: usize, cols: usize, stride: usize) -> Result<usize> {
    if rows == 0 || cols == 0 {
        return Ok(0);
    }
    (rows - 1)
        .checked_mul(stride)
        .and_then(|n| n.checked_add(cols))
        .ok_or_else(|| {
            CyaneaError::InvalidInput(format!(
                "matrix shape {rows}x{cols} (stride {stride}) overflows usize"
            ))
        })
}

fn check_shape(len: usize, rows: usize, cols: usize, stride: usize) -> Result<usize> {
    if stride < cols {
        return Err(CyaneaError::InvalidInput(format!(
            "stride {stride} is smaller than column count {cols}"
        )));
    }
    let needed = required_len(rows, cols, stride)?;
    if len < needed {
        return Err(CyaneaError::InvalidInput(format!(
            "buffer of {len} elements cannot hold a {rows}x{cols} matrix with stride {stride} \
             ({needed} needed)"
        )));
    }
    Ok(needed)
}

/// Check that a table named `name` has exactly `rows × cols` elements.
pub(crate) fn expect_shape(
    name: &str,
    (rows, cols): (usize, usize),
    (want_rows, want_cols): (usize, usize),
) -> Result<()> {
    if rows != want_rows || cols != want_cols {
        return Err(CyaneaError::InvalidInput(format!(
            "{name} is {rows}x{cols}, expected {want_rows}x{want_cols}"
        )));
    }
    Ok(())
}

/// Check that a per-step vector named `name` covers at least `len` steps.
pub(crate) fn expect_len(name: &str, actual: usize, len: usize) -> Result<()> {
    if actual < len {
        return Err(CyaneaError::InvalidInput(format!(
            "{name} has {actual} entries, at least {len} needed"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Read-only view
// ---------------------------------------------------------------------------

/// A borrowed, read-only `rows × cols` window into a flat buffer.
#[derive(Debug, Clone, Copy)]
pub struct MatrixView<'a> {
    data: &'a [f64],
    rows: usize,
    cols: usize,
    stride: usize,
}

impl<'a> MatrixView<'a> {
    /// Contiguous view (`stride == cols`).
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is too short for the requested shape.
    pub fn new(data: &'a [f64], rows: usize, cols: usize) -> Result<Self> {
        Self::with_stride(data, rows, cols, cols)
    }

    /// View whose consecutive rows start `stride` elements apart.
    ///
    /// # Errors
    ///
    /// Returns an error if `stride < cols` or `data` is too short.
    pub fn with_stride(data: &'a [f64], rows: usize, cols: usize, stride: usize) -> Result<Self> {
        let needed = check_shape(data.len(), rows, cols, stride)?;
        Ok(Self {
            data: &data[..needed],
            rows,
            cols,
            stride,
        })
    }

    /// Contiguous view with `cols` columns and as many whole rows as fit.
    pub(crate) fn rows_of(data: &'a [f64], cols: usize) -> Self {
        let rows = if cols == 0 { 0 } else { data.len() / cols };
        Self {
            data: &data[..rows * cols],
            rows,
            cols,
            stride: cols,
        }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub(crate) fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Row `i` as a slice of length `cols`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= rows`.
    #[inline]
    pub fn row(&self, i: usize) -> &'a [f64] {
        assert!(i < self.rows, "row {i} out of bounds ({} rows)", self.rows);
        let start = i * self.stride;
        &self.data[start..start + self.cols]
    }

    /// Element at row `i`, column `j`.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        debug_assert!(j < self.cols);
        self.row(i)[j]
    }

    /// Iterate over rows in order.
    pub fn iter_rows(&self) -> impl Iterator<Item = &'a [f64]> {
        let view = *self;
        (0..view.rows).map(move |i| view.row(i))
    }

    /// Copy the viewed elements into a contiguous [`Matrix`].
    pub fn to_matrix(&self) -> Matrix {
        let mut data = Vec::with_capacity(self.rows * self.cols);
        for row in self.iter_rows() {
            data.extend_from_slice(row);
        }
        Matrix {
            data,
            rows: self.rows,
            cols: self.cols,
        }
    }
}

// ---------------------------------------------------------------------------
// Mutable view
// ---------------------------------------------------------------------------

/// A borrowed, mutable `rows × cols` window into a flat buffer.
#[derive(Debug)]
pub struct MatrixViewMut<'a> {
    data: &'a mut [f64],
    rows: usize,
    cols: usize,
    stride: usize,
}

impl<'a> MatrixViewMut<'a> {
    /// Contiguous mutable view (`stride == cols`).
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is too short for the requested shape.
    pub fn new(data: &'a mut [f64], rows: usize, cols: usize) -> Result<Self> {
        Self::with_stride(data, rows, cols, cols)
    }

    /// Mutable view whose consecutive rows start `stride` elements apart.
    ///
    /// # Errors
    ///
    /// Returns an error if `stride < cols` or `data` is too short.
    pub fn with_stride(
        data: &'a mut [f64],
        rows: usize,
        cols: usize,
        stride: usize,
    ) -> Result<Self> {
        let needed = check_shape(data.len(), rows, cols, stride)?;
        Ok(Self {
            data: &mut data[..needed],
            rows,
            cols,
            stride,
        })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub(crate) fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Row `i` as a slice of length `cols`.
    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        assert!(i < self.rows, "row {i} out of bounds ({} rows)", self.rows);
        let start = i * self.stride;
        &self.data[start..start + self.cols]
    }

    /// Row `i` as a mutable slice of length `cols`.
    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        assert!(i < self.rows, "row {i} out of bounds ({} rows)", self.rows);
        let start = i * self.stride;
        &mut self.data[start..start + self.cols]
    }

    /// Two distinct rows at once, `lo < hi`.
    ///
    /// # Panics
    ///
    /// Panics unless `lo < hi < rows`.
    pub fn row_pair_mut(&mut self, lo: usize, hi: usize) -> (&mut [f64], &mut [f64]) {
        assert!(lo < hi && hi < self.rows, "invalid row pair ({lo}, {hi})");
        let cols = self.cols;
        let (head, tail) = self.data.split_at_mut(hi * self.stride);
        let lo_start = lo * self.stride;
        (&mut head[lo_start..lo_start + cols], &mut tail[..cols])
    }

    /// Element at row `i`, column `j`.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        debug_assert!(j < self.cols);
        self.row(i)[j]
    }

    /// Overwrite element at row `i`, column `j`.
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        debug_assert!(j < self.cols);
        self.row_mut(i)[j] = value;
    }

    /// Set every viewed element to `value`.
    pub fn fill(&mut self, value: f64) {
        for i in 0..self.rows {
            self.row_mut(i).fill(value);
        }
    }

    /// Mutable rows in order.
    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut [f64]> + '_ {
        let cols = self.cols;
        let rows = self.rows;
        self.data
            .chunks_mut(self.stride.max(1))
            .take(rows)
            .map(move |chunk| &mut chunk[..cols])
    }

    /// Run `f(i, row)` on every row; rows go to rayon tasks with the
    /// `parallel` feature and are visited in order without it.
    pub(crate) fn for_each_row<F>(&mut self, f: F)
    where
        F: Fn(usize, &mut [f64]) + Send + Sync,
    {
        #[cfg(feature = "parallel")]
        {
            self.par_rows_mut().enumerate().for_each(|(i, row)| f(i, row));
        }
        #[cfg(not(feature = "parallel"))]
        {
            for (i, row) in self.rows_mut().enumerate() {
                f(i, row);
            }
        }
    }

    /// Mutable rows as an indexed parallel iterator.
    ///
    /// Rows are disjoint, so each rayon task owns its row exclusively. Views
    /// with zero columns yield no rows.
    #[cfg(feature = "parallel")]
    pub fn par_rows_mut(&mut self) -> impl IndexedParallelIterator<Item = &mut [f64]> + '_ {
        let cols = self.cols;
        let rows = if cols == 0 { 0 } else { self.rows };
        self.data
            .par_chunks_mut(self.stride.max(1))
            .take(rows)
            .map(move |chunk| &mut chunk[..cols])
    }
}

// ---------------------------------------------------------------------------
// Owned matrix
// ---------------------------------------------------------------------------

/// An owned, contiguous row-major matrix.
///
/// Used for model parameters, scratch buffers handed out by a
/// [`BufferService`](crate::buffer::BufferService), and results returned by
/// the wrapping layer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "MatrixRecord")
)]
pub struct Matrix {
    data: Vec<f64>,
    rows: usize,
    cols: usize,
}

impl Matrix {
    /// Zero-filled `rows × cols` matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        }
    }

    /// Wrap an existing row-major buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if `data.len() != rows * cols`.
    pub fn from_vec(data: Vec<f64>, rows: usize, cols: usize) -> Result<Self> {
        let expected = rows.checked_mul(cols).ok_or_else(|| {
            CyaneaError::InvalidInput(format!("matrix shape {rows}x{cols} overflows usize"))
        })?;
        if data.len() != expected {
            return Err(CyaneaError::InvalidInput(format!(
                "buffer length {} != {rows}x{cols}",
                data.len()
            )));
        }
        Ok(Self { data, rows, cols })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// The flat row-major buffer.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// The flat row-major buffer, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Row `i`.
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Element at row `i`, column `j`.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.cols + j]
    }

    /// Full-size read-only view.
    pub fn view(&self) -> MatrixView<'_> {
        MatrixView {
            data: &self.data,
            rows: self.rows,
            cols: self.cols,
            stride: self.cols,
        }
    }

    /// Full-size mutable view.
    pub fn view_mut(&mut self) -> MatrixViewMut<'_> {
        MatrixViewMut {
            data: &mut self.data,
            rows: self.rows,
            cols: self.cols,
            stride: self.cols,
        }
    }

    /// Contiguous read-only view of a smaller shape over the same buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if `rows * cols` exceeds the buffer.
    pub fn shaped(&self, rows: usize, cols: usize) -> Result<MatrixView<'_>> {
        MatrixView::new(&self.data, rows, cols)
    }

    /// Contiguous mutable view of a smaller shape over the same buffer.
    ///
    /// Lets one scratch buffer serve work units of different sizes.
    ///
    /// # Errors
    ///
    /// Returns an error if `rows * cols` exceeds the buffer.
    pub fn shaped_mut(&mut self, rows: usize, cols: usize) -> Result<MatrixViewMut<'_>> {
        MatrixViewMut::new(&mut self.data, rows, cols)
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct MatrixRecord {
    data: Vec<f64>,
    rows: usize,
    cols: usize,
}

#[cfg(feature = "serde")]
impl TryFrom<MatrixRecord> for Matrix {
    type Error = CyaneaError;

    fn try_from(record: MatrixRecord) -> Result<Self> {
        Matrix::from_vec(record.data, record.rows, record.cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_rejects_short_buffer() {
        let data = vec![0.0; 5];
        assert!(MatrixView::new(&data, 2, 3).is_err());
        assert!(MatrixView::new(&data, 1, 5).is_ok());
    }

    #[test]
    fn view_rejects_stride_smaller_than_cols() {
        let data = vec![0.0; 12];
        assert!(MatrixView::with_stride(&data, 2, 4, 3).is_err());
    }

    #[test]
    fn strided_view_reads_rows() {
        // 3 rows of stride 4, viewing only 2 columns
        let data: Vec<f64> = (0..12).map(|x| x as f64).collect();
        let view = MatrixView::with_stride(&data, 3, 2, 4).unwrap();
        assert_eq!(view.row(0), &[0.0, 1.0]);
        assert_eq!(view.row(2), &[8.0, 9.0]);
        assert_eq!(view.get(1, 1), 5.0);
    }

    #[test]
    fn strided_view_needs_only_last_row_prefix() {
        // (rows-1)*stride + cols = 1*4 + 2 = 6
        let data = vec![1.0; 6];
        assert!(MatrixView::with_stride(&data, 2, 2, 4).is_ok());
    }

    #[test]
    fn empty_shapes_are_allowed() {
        let data: Vec<f64> = Vec::new();
        let view = MatrixView::new(&data, 4, 0).unwrap();
        assert_eq!(view.rows(), 4);
        assert_eq!(view.cols(), 0);
    }

    #[test]
    fn row_pair_mut_is_disjoint() {
        let mut m = Matrix::zeros(3, 2);
        let mut view = m.view_mut();
        let (a, b) = view.row_pair_mut(0, 2);
        a[0] = 1.0;
        b[1] = 2.0;
        assert_eq!(m.as_slice(), &[1.0, 0.0, 0.0, 0.0, 0.0, 2.0]);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn par_rows_mut_covers_every_row() {
        let mut data = vec![0.0; 10];
        let mut view = MatrixViewMut::with_stride(&mut data, 3, 2, 4).unwrap();
        view.par_rows_mut()
            .enumerate()
            .for_each(|(i, row)| row.fill(i as f64 + 1.0));
        assert_eq!(&data[..], &[1.0, 1.0, 0.0, 0.0, 2.0, 2.0, 0.0, 0.0, 3.0, 3.0]);
    }

    #[test]
    fn for_each_row_respects_stride() {
        let mut data = vec![0.0; 10];
        let mut view = MatrixViewMut::with_stride(&mut data, 3, 2, 4).unwrap();
        view.for_each_row(|i, row| row.fill(i as f64 * 10.0 + 1.0));
        assert_eq!(&data[..], &[1.0, 1.0, 0.0, 0.0, 11.0, 11.0, 0.0, 0.0, 21.0, 21.0]);
    }

    #[test]
    fn shaped_mut_reuses_prefix() {
        let mut m = Matrix::zeros(4, 4);
        {
            let mut v = m.shaped_mut(2, 3).unwrap();
            v.fill(7.0);
        }
        assert_eq!(&m.as_slice()[..6], &[7.0; 6]);
        assert_eq!(m.as_slice()[6], 0.0);
        assert!(m.shaped_mut(5, 4).is_err());
    }

    #[test]
    fn from_vec_checks_length() {
        assert!(Matrix::from_vec(vec![1.0; 6], 2, 3).is_ok());
        assert!(Matrix::from_vec(vec![1.0; 5], 2, 3).is_err());
    }

    #[test]
    fn to_matrix_compacts_strided_view() {
        let data: Vec<f64> = (0..8).map(|x| x as f64).collect();
        let view = MatrixView::with_stride(&data, 2, 3, 4).unwrap();
        let m = view.to_matrix();
        assert_eq!(m.as_slice(), &[0.0, 1.0, 2.0, 4.0, 5.0, 6.0]);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn decoded_matrix_checks_its_shape() {
        let m = Matrix::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3).unwrap();
        let back: Matrix = serde_json::from_str(&serde_json::to_string(&m).unwrap()).unwrap();
        assert_eq!(back, m);

        let short = serde_json::json!({ "data": [1.0, 2.0, 3.0], "rows": 2, "cols": 3 });
        assert!(serde_json::from_value::<Matrix>(short).is_err());
    }
}
