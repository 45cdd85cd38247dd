//! Global numbering of cell degrees of freedom.
use crate::error::{check_len, GeoFemError, Result};
use crate::partition::PartitionContext;
use log::info;

/// Global index of a cell that is not owned by this rank.
pub const GHOST_DOF: i64 = -1;

/// Global row index per local cell, [`GHOST_DOF`] for ghost cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DofMap {
    indices: Vec<i64>,
    /// Like `indices`, but with the owners' indices of ghost cells once synchronized.
    columns: Vec<i64>,
    first_row: i64,
    num_owned: usize,
    num_global: usize,
}

impl DofMap {
    /// Numbers owned cells (negative ghost rank) consecutively in traversal order, starting at
    /// `offset` plus the number of owned cells on all lower ranks.
    ///
    /// Collective: every rank of the context must call this.
    pub fn number(ghost_ranks: &[i64], ctx: &PartitionContext, offset: i64) -> Result<Self> {
        let num_owned = ghost_ranks.iter().filter(|&&rank| rank < 0).count();
        let counts = ctx.communicator.all_gather_u64(num_owned as u64)?;
        let lower: u64 = counts.iter().take(ctx.rank).sum();
        let num_global = counts.iter().sum::<u64>() as usize;
        let first_row = offset + lower as i64;

        let mut next = first_row;
        let indices: Vec<i64> = ghost_ranks
            .iter()
            .map(|&rank| {
                if rank < 0 {
                    let index = next;
                    next += 1;
                    index
                } else {
                    GHOST_DOF
                }
            })
            .collect();
        info!(
            "rank {}: numbered {} owned cells starting at row {} ({} global)",
            ctx.rank, num_owned, first_row, num_global
        );
        Ok(Self {
            columns: indices.clone(),
            indices,
            first_row,
            num_owned,
            num_global,
        })
    }

    /// Fills in the global indices of ghost cells from their owners, for use as matrix
    /// columns. Row indices of ghost cells stay [`GHOST_DOF`].
    ///
    /// Collective: every rank of the context must call this. The neighbor `send`/`receive`
    /// lists index the cells of this map.
    pub fn synchronize_ghost_columns(&mut self, ctx: &PartitionContext) -> Result<()> {
        let ranks: Vec<usize> = ctx.neighbors.iter().map(|neighbor| neighbor.rank).collect();
        let mut outgoing = Vec::with_capacity(ctx.neighbors.len());
        for neighbor in &ctx.neighbors {
            let mut values = Vec::with_capacity(neighbor.send.len());
            for &cell in &neighbor.send {
                values.push(*self.indices.get(cell).ok_or(GeoFemError::IndexOutOfBounds {
                    context: "synchronize_ghost_columns (send)",
                    index: cell,
                    len: self.indices.len(),
                })?);
            }
            outgoing.push(serde_json::to_vec(&values)?);
        }
        let incoming = ctx.communicator.exchange(&ranks, outgoing)?;
        for (neighbor, bytes) in ctx.neighbors.iter().zip(incoming) {
            let values: Vec<i64> = serde_json::from_slice(&bytes)?;
            check_len("synchronize_ghost_columns", neighbor.receive.len(), values.len())?;
            for (&cell, value) in neighbor.receive.iter().zip(values) {
                let len = self.columns.len();
                let slot = self.columns.get_mut(cell).ok_or(GeoFemError::IndexOutOfBounds {
                    context: "synchronize_ghost_columns (receive)",
                    index: cell,
                    len,
                })?;
                *slot = value;
            }
        }
        Ok(())
    }

    pub fn indices(&self) -> &[i64] {
        &self.indices
    }

    pub fn index(&self, cell: usize) -> i64 {
        self.indices[cell]
    }

    /// Column index of a cell: its own row, or the owner's row of a synchronized ghost.
    pub fn column(&self, cell: usize) -> i64 {
        self.columns[cell]
    }

    pub fn first_row(&self) -> i64 {
        self.first_row
    }

    pub fn num_owned(&self) -> usize {
        self.num_owned
    }

    pub fn num_global(&self) -> usize {
        self.num_global
    }

    pub fn is_owned(&self, cell: usize) -> bool {
        self.indices[cell] != GHOST_DOF
    }
}
