use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;
use std::error::Error;
use std::fmt;

/// A linear map `y = A x` on vectors of equal length.
pub trait LinearOperator {
    fn apply(&self, y: &mut DVector<f64>, x: &DVector<f64>) -> Result<(), Box<dyn Error>>;
}

impl<'a, A> LinearOperator for &'a A
where
    A: ?Sized + LinearOperator,
{
    fn apply(&self, y: &mut DVector<f64>, x: &DVector<f64>) -> Result<(), Box<dyn Error>> {
        <A as LinearOperator>::apply(self, y, x)
    }
}

impl LinearOperator for DMatrix<f64> {
    fn apply(&self, y: &mut DVector<f64>, x: &DVector<f64>) -> Result<(), Box<dyn Error>> {
        check_dimensions(self.nrows(), self.ncols(), y.len(), x.len())?;
        y.gemv(1.0, self, x, 0.0);
        Ok(())
    }
}

/// Row-parallel product. Every row is summed in column order, so results do not depend on the
/// number of threads.
impl LinearOperator for CsrMatrix<f64> {
    fn apply(&self, y: &mut DVector<f64>, x: &DVector<f64>) -> Result<(), Box<dyn Error>> {
        check_dimensions(self.nrows(), self.ncols(), y.len(), x.len())?;
        let offsets = self.row_offsets();
        let cols = self.col_indices();
        let values = self.values();
        y.as_mut_slice()
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, y_i)| {
                let range = offsets[i]..offsets[i + 1];
                *y_i = cols[range.clone()]
                    .iter()
                    .zip(&values[range])
                    .map(|(&j, &a_ij)| a_ij * x[j])
                    .sum();
            });
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionMismatch {
    pub operator: (usize, usize),
    pub y_len: usize,
    pub x_len: usize,
}

impl fmt::Display for DimensionMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot apply {}x{} operator to vector of length {} with output of length {}",
            self.operator.0, self.operator.1, self.x_len, self.y_len
        )
    }
}

impl Error for DimensionMismatch {}

fn check_dimensions(nrows: usize, ncols: usize, y_len: usize, x_len: usize) -> Result<(), Box<dyn Error>> {
    if nrows != y_len || ncols != x_len {
        Err(Box::new(DimensionMismatch {
            operator: (nrows, ncols),
            y_len,
            x_len,
        }))
    } else {
        Ok(())
    }
}

pub struct IdentityOperator;

impl LinearOperator for IdentityOperator {
    fn apply(&self, y: &mut DVector<f64>, x: &DVector<f64>) -> Result<(), Box<dyn Error>> {
        y.copy_from(x);
        Ok(())
    }
}

/// Diagonal scaling by the inverse of a matrix diagonal.
///
/// Zero diagonal entries are left unscaled.
#[derive(Debug, Clone)]
pub struct JacobiPreconditioner {
    inverse_diagonal: DVector<f64>,
}

impl JacobiPreconditioner {
    pub fn from_csr(matrix: &CsrMatrix<f64>) -> Self {
        let mut inverse_diagonal = DVector::repeat(matrix.nrows(), 1.0);
        for (i, row) in matrix.row_iter().enumerate() {
            let diagonal = row
                .col_indices()
                .iter()
                .zip(row.values())
                .find(|(&j, _)| j == i)
                .map(|(_, &v)| v);
            if let Some(d) = diagonal.filter(|d| *d != 0.0) {
                inverse_diagonal[i] = 1.0 / d;
            }
        }
        Self { inverse_diagonal }
    }

    pub fn inverse_diagonal(&self) -> &DVector<f64> {
        &self.inverse_diagonal
    }
}

impl LinearOperator for JacobiPreconditioner {
    fn apply(&self, y: &mut DVector<f64>, x: &DVector<f64>) -> Result<(), Box<dyn Error>> {
        check_dimensions(self.inverse_diagonal.len(), self.inverse_diagonal.len(), y.len(), x.len())?;
        y.copy_from(&x.component_mul(&self.inverse_diagonal));
        Ok(())
    }
}
