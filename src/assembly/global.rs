use crate::dof::DofMap;
use crate::error::{check_len, GeoFemError, Result};
use crate::partition::PartitionContext;
use log::debug;
use nalgebra::DVector;
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Contributions to rows owned by another rank, shipped to the owner at assembly time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct OffRankContributions {
    pattern: Vec<(i64, i64)>,
    matrix: Vec<(i64, i64, f64)>,
    residual: Vec<(i64, f64)>,
}

/// The locally owned rows of a distributed sparse system `J dx = -r`.
///
/// Rows are the global DOF indices owned by this rank; columns are global. Contributions with a
/// negative row or column index (ghost sentinel) are skipped. Contributions to rows owned by
/// other ranks are buffered and merged into the owner's rows by [`finalize_pattern`] and
/// [`global_assemble`], in source rank order.
///
/// [`finalize_pattern`]: Self::finalize_pattern
/// [`global_assemble`]: Self::global_assemble
#[derive(Debug, Clone)]
pub struct GlobalSystem {
    first_row: i64,
    num_local_rows: usize,
    num_cols: usize,
    /// `(first_row, num_rows)` of every rank.
    rank_rows: Vec<(i64, usize)>,
    local_pattern: Vec<BTreeSet<usize>>,
    off_rank: Vec<OffRankContributions>,
    matrix: CsrMatrix<f64>,
    residual: DVector<f64>,
    solution: DVector<f64>,
}

impl GlobalSystem {
    /// Creates an empty system over the rows owned according to `dofs`.
    ///
    /// Collective: every rank of the context must call this.
    pub fn new(dofs: &DofMap, ctx: &PartitionContext) -> Result<Self> {
        let num_local_rows = dofs.num_owned();
        let counts = ctx.communicator.all_gather_u64(num_local_rows as u64)?;
        let firsts = ctx.communicator.all_gather_u64(dofs.first_row() as u64)?;
        let rank_rows: Vec<(i64, usize)> = firsts
            .iter()
            .zip(&counts)
            .map(|(&first, &count)| (first as i64, count as usize))
            .collect();
        let num_cols = rank_rows
            .iter()
            .map(|&(first, count)| first as usize + count)
            .max()
            .unwrap_or(0);
        Ok(Self {
            first_row: dofs.first_row(),
            num_local_rows,
            num_cols,
            off_rank: vec![OffRankContributions::default(); rank_rows.len()],
            rank_rows,
            local_pattern: vec![BTreeSet::new(); num_local_rows],
            matrix: CsrMatrix::zeros(num_local_rows, num_cols),
            residual: DVector::zeros(num_local_rows),
            solution: DVector::zeros(num_local_rows),
        })
    }

    pub fn first_row(&self) -> i64 {
        self.first_row
    }

    pub fn num_local_rows(&self) -> usize {
        self.num_local_rows
    }

    pub fn num_global_cols(&self) -> usize {
        self.num_cols
    }

    /// Local row of a global row index, if it is owned here.
    pub fn local_row(&self, row: i64) -> Option<usize> {
        let local = row - self.first_row;
        (local >= 0 && (local as usize) < self.num_local_rows).then_some(local as usize)
    }

    fn owner(&self, row: i64) -> Result<usize> {
        self.rank_rows
            .iter()
            .position(|&(first, count)| row >= first && row < first + count as i64)
            .ok_or(GeoFemError::IndexOutOfBounds {
                context: "GlobalSystem (row owner)",
                index: row.max(0) as usize,
                len: self.num_cols,
            })
    }

    /// Registers the dense block `rows x cols` in the sparsity pattern.
    pub fn insert_global_indices(&mut self, rows: &[i64], cols: &[i64]) -> Result<()> {
        for &row in rows.iter().filter(|&&row| row >= 0) {
            match self.local_row(row) {
                Some(local) => self.local_pattern[local].extend(
                    cols.iter()
                        .filter(|&&col| col >= 0)
                        .map(|&col| col as usize),
                ),
                None => {
                    let owner = self.owner(row)?;
                    self.off_rank[owner]
                        .pattern
                        .extend(cols.iter().filter(|&&col| col >= 0).map(|&col| (row, col)));
                }
            }
        }
        Ok(())
    }

    /// Ships off-rank pattern entries to their owners and builds the CSR structure.
    ///
    /// Collective: every rank of the context must call this.
    pub fn finalize_pattern(&mut self, ctx: &PartitionContext) -> Result<()> {
        for contributions in self.exchange(ctx)? {
            for (row, col) in contributions.pattern {
                let local = self.local_row(row).ok_or(GeoFemError::MissingEntry { row, col })?;
                self.local_pattern[local].insert(col as usize);
            }
        }

        let mut offsets = Vec::with_capacity(self.num_local_rows + 1);
        let mut indices = Vec::new();
        offsets.push(0);
        for row in &self.local_pattern {
            if let Some(&last) = row.iter().next_back() {
                if last >= self.num_cols {
                    return Err(GeoFemError::IndexOutOfBounds {
                        context: "finalize_pattern (column)",
                        index: last,
                        len: self.num_cols,
                    });
                }
            }
            indices.extend(row.iter().copied());
            offsets.push(indices.len());
        }
        let pattern =
            SparsityPattern::try_from_offsets_and_indices(self.num_local_rows, self.num_cols, offsets, indices)
                .map_err(|err| GeoFemError::LinearSolve(format!("invalid sparsity pattern: {err}")))?;
        let nnz = pattern.nnz();
        self.matrix = CsrMatrix::try_from_pattern_and_values(pattern, vec![0.0; nnz])
            .map_err(|err| GeoFemError::LinearSolve(format!("invalid sparsity pattern: {err}")))?;
        debug!(
            "rank {}: sparsity pattern with {} rows and {} nonzeros",
            ctx.rank, self.num_local_rows, nnz
        );
        Ok(())
    }

    /// Zeroes the matrix values, the residual and all buffered off-rank contributions.
    pub fn zero(&mut self) {
        self.matrix.values_mut().iter_mut().for_each(|v| *v = 0.0);
        self.residual.fill(0.0);
        for contributions in &mut self.off_rank {
            contributions.matrix.clear();
            contributions.residual.clear();
        }
    }

    fn add_local(&mut self, local: usize, row: i64, col: i64, value: f64) -> Result<()> {
        let mut csr_row = self.matrix.row_mut(local);
        let (col_indices, values) = csr_row.cols_and_values_mut();
        let position = col_indices
            .binary_search(&(col as usize))
            .map_err(|_| GeoFemError::MissingEntry { row, col })?;
        values[position] += value;
        Ok(())
    }

    /// Adds the row-major dense block `values` at `rows x cols`. The entries must be part of the
    /// finalized pattern.
    pub fn sum_into_global_values(&mut self, rows: &[i64], cols: &[i64], values: &[f64]) -> Result<()> {
        check_len("sum_into_global_values", rows.len() * cols.len(), values.len())?;
        for (i, &row) in rows.iter().enumerate() {
            if row < 0 {
                continue;
            }
            let block_row = &values[i * cols.len()..(i + 1) * cols.len()];
            match self.local_row(row) {
                Some(local) => {
                    for (&col, &value) in cols.iter().zip(block_row) {
                        if col >= 0 {
                            self.add_local(local, row, col, value)?;
                        }
                    }
                }
                None => {
                    let owner = self.owner(row)?;
                    self.off_rank[owner].matrix.extend(
                        cols.iter()
                            .zip(block_row)
                            .filter(|(&col, _)| col >= 0)
                            .map(|(&col, &value)| (row, col, value)),
                    );
                }
            }
        }
        Ok(())
    }

    pub fn sum_into_residual(&mut self, rows: &[i64], values: &[f64]) -> Result<()> {
        check_len("sum_into_residual", rows.len(), values.len())?;
        for (&row, &value) in rows.iter().zip(values) {
            if row < 0 {
                continue;
            }
            match self.local_row(row) {
                Some(local) => self.residual[local] += value,
                None => {
                    let owner = self.owner(row)?;
                    self.off_rank[owner].residual.push((row, value));
                }
            }
        }
        Ok(())
    }

    /// Merges buffered off-rank contributions into their owners' rows.
    ///
    /// Collective: every rank of the context must call this.
    pub fn global_assemble(&mut self, ctx: &PartitionContext) -> Result<()> {
        for contributions in self.exchange(ctx)? {
            for (row, col, value) in contributions.matrix {
                let local = self.local_row(row).ok_or(GeoFemError::MissingEntry { row, col })?;
                self.add_local(local, row, col, value)?;
            }
            for (row, value) in contributions.residual {
                let local = self.local_row(row).ok_or(GeoFemError::MissingEntry { row, col: row })?;
                self.residual[local] += value;
            }
        }
        Ok(())
    }

    /// Sends the buffered contributions to their owners and returns what every rank sent here,
    /// in rank order.
    fn exchange(&mut self, ctx: &PartitionContext) -> Result<Vec<OffRankContributions>> {
        if ctx.size() == 1 {
            return Ok(vec![std::mem::take(&mut self.off_rank[0])]);
        }
        let outgoing = self
            .off_rank
            .iter_mut()
            .map(|contributions| serde_json::to_vec(&std::mem::take(contributions)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        ctx.communicator
            .all_to_all(outgoing)?
            .iter()
            .map(|bytes| Ok(serde_json::from_slice(bytes)?))
            .collect()
    }

    /// Replaces a locally owned row with the identity row.
    pub fn set_identity_row(&mut self, row: i64) -> Result<()> {
        let local = self.local_row(row).ok_or(GeoFemError::MissingEntry { row, col: row })?;
        let mut csr_row = self.matrix.row_mut(local);
        let (col_indices, values) = csr_row.cols_and_values_mut();
        let mut found = false;
        for (&col, value) in col_indices.iter().zip(values.iter_mut()) {
            *value = if col as i64 == row {
                found = true;
                1.0
            } else {
                0.0
            };
        }
        if found {
            Ok(())
        } else {
            Err(GeoFemError::MissingEntry { row, col: row })
        }
    }

    /// The value at a global `(row, col)`, if the row is owned here and the entry is part of
    /// the pattern.
    pub fn entry(&self, row: i64, col: i64) -> Option<f64> {
        let local = self.local_row(row)?;
        let csr_row = self.matrix.row(local);
        let position = csr_row.col_indices().binary_search(&(col as usize)).ok()?;
        Some(csr_row.values()[position])
    }

    pub fn matrix(&self) -> &CsrMatrix<f64> {
        &self.matrix
    }

    pub fn residual(&self) -> &DVector<f64> {
        &self.residual
    }

    pub fn residual_mut(&mut self) -> &mut DVector<f64> {
        &mut self.residual
    }

    pub fn solution(&self) -> &DVector<f64> {
        &self.solution
    }

    pub fn solution_mut(&mut self) -> &mut DVector<f64> {
        &mut self.solution
    }
}
