//! Implicit single-phase flow on cell-centered finite volumes.
//!
//! One Newton iteration assembles the accumulation term of every owned cell and the upwinded
//! two-point flux of every stencil connector into a [`GlobalSystem`], applies Dirichlet
//! conditions, solves for the pressure update and re-evaluates the constitutive models.
mod boundary;
mod kernel;
mod state;

pub use boundary::{DirichletCondition, DirichletTarget};
pub use kernel::{accumulation, two_point_flux, FluxPoint, LocalFlux};
pub use state::{CellBlockFlowState, FaceFlowState};

use crate::assembly::GlobalSystem;
use crate::constitutive::{FluidModel, PorosityModel};
use crate::dof::{DofMap, GHOST_DOF};
use crate::error::{check_len, GeoFemError, Result};
use crate::partition::PartitionContext;
use crate::settings::FlowSettings;
use crate::stencil::{
    CellDescriptor, PointDescriptor, PointTag, StencilEntry, TwoPointFluxApproximation, MAX_STENCIL_SIZE,
};
use eyre::WrapErr;
use geofem_sparse::{BiCGStab, JacobiPreconditioner, SolveOutput};
use log::{debug, error, info, warn};
use nalgebra::DVector;
use rayon::prelude::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct CellBlock {
    /// Position of the first cell of the block in the rank-local cell numbering.
    offset: usize,
    state: CellBlockFlowState,
}

/// Outcome of [`SinglePhaseFlow::nonlinear_implicit_step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewtonReport {
    pub converged: bool,
    /// Number of linear solves performed.
    pub iterations: usize,
    pub residual_norm: f64,
}

/// Contributions of one connector, ready to be scattered.
struct ConnectorContribution {
    rows: [i64; 2],
    cols: [i64; MAX_STENCIL_SIZE],
    flux: LocalFlux,
}

#[derive(Debug)]
pub struct SinglePhaseFlow {
    settings: FlowSettings,
    fluid: Box<dyn FluidModel>,
    porosity: Box<dyn PorosityModel>,
    stencils: TwoPointFluxApproximation,
    blocks: Vec<CellBlock>,
    block_lookup: BTreeMap<(usize, usize), usize>,
    faces: FaceFlowState,
    dofs: Option<DofMap>,
}

impl SinglePhaseFlow {
    pub fn new(
        settings: FlowSettings,
        fluid: Box<dyn FluidModel>,
        porosity: Box<dyn PorosityModel>,
        stencils: TwoPointFluxApproximation,
        faces: FaceFlowState,
    ) -> Self {
        Self {
            settings,
            fluid,
            porosity,
            stencils,
            blocks: Vec::new(),
            block_lookup: BTreeMap::new(),
            faces,
            dofs: None,
        }
    }

    /// Registers the cells of a (region, sub-region) block. Cells are numbered locally in
    /// registration order, which is also the order of the neighbor exchange lists.
    pub fn add_cell_block(&mut self, region: usize, sub_region: usize, state: CellBlockFlowState) {
        let offset = self.num_cells();
        match self.block_lookup.get(&(region, sub_region)) {
            Some(&b) => self.blocks[b].state = state,
            None => {
                self.block_lookup.insert((region, sub_region), self.blocks.len());
                self.blocks.push(CellBlock { offset, state });
            }
        }
        self.update_offsets();
    }

    fn update_offsets(&mut self) {
        let mut offset = 0;
        for block in &mut self.blocks {
            block.offset = offset;
            offset += block.state.num_cells();
        }
    }

    /// Number of cells of all blocks on this rank, owned and ghost.
    pub fn num_cells(&self) -> usize {
        self.blocks.iter().map(|block| block.state.num_cells()).sum()
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    pub fn stencils(&self) -> &TwoPointFluxApproximation {
        &self.stencils
    }

    pub fn cell_block(&self, region: usize, sub_region: usize) -> Option<&CellBlockFlowState> {
        let &b = self.block_lookup.get(&(region, sub_region))?;
        Some(&self.blocks[b].state)
    }

    pub fn cell_block_mut(&mut self, region: usize, sub_region: usize) -> Option<&mut CellBlockFlowState> {
        let &b = self.block_lookup.get(&(region, sub_region))?;
        Some(&mut self.blocks[b].state)
    }

    pub fn face_state(&self) -> &FaceFlowState {
        &self.faces
    }

    pub fn face_state_mut(&mut self) -> &mut FaceFlowState {
        &mut self.faces
    }

    /// The DOF numbering of the current implicit step.
    pub fn dof_map(&self) -> Option<&DofMap> {
        self.dofs.as_ref()
    }

    fn current_dofs(&self) -> Result<&DofMap> {
        self.dofs.as_ref().ok_or(GeoFemError::MissingField {
            name: String::from("dofNumber"),
        })
    }

    /// Block index and rank-local cell number of a cell.
    fn locate(&self, cell: &CellDescriptor) -> Result<(usize, usize)> {
        let &b = self
            .block_lookup
            .get(&(cell.region, cell.sub_region))
            .ok_or(GeoFemError::IndexOutOfBounds {
                context: "flow stencil (cell block)",
                index: cell.region,
                len: self.blocks.len(),
            })?;
        let block = &self.blocks[b];
        if cell.index >= block.state.num_cells() {
            return Err(GeoFemError::IndexOutOfBounds {
                context: "flow stencil (cell)",
                index: cell.index,
                len: block.state.num_cells(),
            });
        }
        Ok((b, block.offset + cell.index))
    }

    fn cell_flux_point(&self, block: usize, cell: usize) -> FluxPoint {
        let state = &self.blocks[block].state;
        FluxPoint {
            pressure: state.current_pressure(cell),
            density: state.current_density(cell),
            d_density_dp: state.d_density_dp[cell],
            viscosity: state.current_viscosity(cell),
            d_viscosity_dp: state.d_viscosity_dp[cell],
            gravity_depth: state.gravity_depth[cell],
        }
    }

    fn face_flux_point(&self, face: usize) -> Result<FluxPoint> {
        if face >= self.faces.num_faces() {
            return Err(GeoFemError::IndexOutOfBounds {
                context: "flow boundary stencil (face)",
                index: face,
                len: self.faces.num_faces(),
            });
        }
        Ok(FluxPoint {
            pressure: self.faces.pressure[face],
            density: self.faces.density[face],
            d_density_dp: 0.0,
            viscosity: self.faces.viscosity[face],
            d_viscosity_dp: 0.0,
            gravity_depth: self.faces.gravity_depth[face],
        })
    }

    /// Gravity depth `x . g` of every cell and face center.
    pub fn precompute_data(&mut self) {
        let gravity = self.settings.effective_gravity();
        for block in &mut self.blocks {
            let state = &mut block.state;
            for (depth, center) in state.gravity_depth.iter_mut().zip(&state.center) {
                *depth = center.dot(&gravity);
            }
        }
        for (depth, center) in self.faces.gravity_depth.iter_mut().zip(&self.faces.center) {
            *depth = center.dot(&gravity);
        }
    }

    /// Evaluates density, viscosity and porosity at the current pressure of every cell.
    pub fn initialize_state(&mut self) {
        for block in &mut self.blocks {
            block
                .state
                .initialize_constitutive(self.fluid.as_ref(), self.porosity.as_ref());
        }
    }

    /// Zeroes the pressure updates, numbers the DOFs and builds the sparsity pattern of the
    /// step's system.
    ///
    /// Collective: every rank of the context must call this.
    pub fn implicit_step_setup(&mut self, ctx: &PartitionContext) -> Result<GlobalSystem> {
        for block in &mut self.blocks {
            block.state.delta_pressure.fill(0.0);
            block
                .state
                .update_constitutive(self.fluid.as_ref(), self.porosity.as_ref());
        }

        let ghost_ranks: Vec<i64> = self
            .blocks
            .iter()
            .flat_map(|block| block.state.ghost_rank.iter().copied())
            .collect();
        let mut dofs = DofMap::number(&ghost_ranks, ctx, 0)?;
        dofs.synchronize_ghost_columns(ctx)?;

        let mut system = GlobalSystem::new(&dofs, ctx)?;
        for cell in 0..dofs.indices().len() {
            let row = dofs.index(cell);
            system.insert_global_indices(&[row], &[row])?;
        }
        for entry in self.stencils.cell_stencil().iter() {
            let (rows, cols) = self.connector_dofs(&entry, &dofs)?;
            system.insert_global_indices(&rows, &cols[..entry.len()])?;
        }
        for name in self.stencils.boundary_stencil_names() {
            let Some(stencil) = self.stencils.boundary_stencil(name) else {
                continue;
            };
            for entry in stencil.iter() {
                let mut cols = Vec::with_capacity(entry.len());
                for point in entry.points {
                    match point.tag {
                        PointTag::Cell => {
                            let descriptor = CellDescriptor::new(point.region, point.sub_region, point.index);
                            let (_, cell) = self.locate(&descriptor)?;
                            cols.push(dofs.column(cell));
                        }
                        PointTag::Face => {}
                        PointTag::Node => {
                            return Err(GeoFemError::UnsupportedPointType {
                                tag: point.tag.to_string(),
                            })
                        }
                    }
                }
                let rows: Vec<i64> = entry
                    .connected()
                    .iter()
                    .filter_map(PointDescriptor::as_cell)
                    .map(|cell| Ok(dofs.index(self.locate(&cell)?.1)))
                    .collect::<Result<_>>()?;
                system.insert_global_indices(&rows, &cols)?;
            }
        }
        system.finalize_pattern(ctx)?;
        info!(
            "rank {}: single-phase flow system with {} local rows, {} nonzeros",
            ctx.rank,
            system.num_local_rows(),
            system.matrix().nnz()
        );
        self.dofs = Some(dofs);
        Ok(system)
    }

    fn connector_dofs(
        &self,
        entry: &StencilEntry<'_, CellDescriptor>,
        dofs: &DofMap,
    ) -> Result<([i64; 2], [i64; MAX_STENCIL_SIZE])> {
        let mut rows = [GHOST_DOF; 2];
        let mut cols = [GHOST_DOF; MAX_STENCIL_SIZE];
        for (i, point) in entry.points.iter().enumerate() {
            let (_, cell) = self.locate(point)?;
            cols[i] = dofs.column(cell);
            if i < 2 {
                rows[i] = dofs.index(cell);
            }
        }
        Ok((rows, cols))
    }

    /// Assembles accumulation and flux terms of the current iterate into `system`.
    ///
    /// Collective: every rank of the context must call this.
    pub fn assemble_system(&self, dt: f64, system: &mut GlobalSystem, ctx: &PartitionContext) -> Result<()> {
        let dofs = self.current_dofs()?;
        system.zero();

        for block in &self.blocks {
            for cell in 0..block.state.num_cells() {
                if !block.state.is_owned(cell) {
                    continue;
                }
                let row = dofs.index(block.offset + cell);
                let (residual, derivative) = accumulation(&block.state, cell);
                system.sum_into_global_values(&[row], &[row], &[derivative])?;
                system.sum_into_residual(&[row], &[residual])?;
            }
        }

        let stencil = self.stencils.cell_stencil();
        let gravity = self.settings.gravity_enabled;
        let contributions = (0..stencil.len())
            .into_par_iter()
            .map(|i| {
                let entry = stencil.get(i).ok_or(GeoFemError::IndexOutOfBounds {
                    context: "assemble_system (connector)",
                    index: i,
                    len: stencil.len(),
                })?;
                let mut points = [FluxPoint::default(); MAX_STENCIL_SIZE];
                for (point, cell) in points.iter_mut().zip(entry.points) {
                    let (b, _) = self.locate(cell)?;
                    *point = self.cell_flux_point(b, cell.index);
                }
                let (rows, cols) = self.connector_dofs(&entry, dofs)?;
                let flux = two_point_flux(&points[..entry.len()], entry.weights, gravity, dt)?;
                Ok(ConnectorContribution { rows, cols, flux })
            })
            .collect::<Result<Vec<_>>>()?;

        for contribution in &contributions {
            let n = contribution.flux.num_points;
            system.sum_into_residual(&contribution.rows, &contribution.flux.residual)?;
            for r in 0..2 {
                system.sum_into_global_values(
                    &contribution.rows[r..r + 1],
                    &contribution.cols[..n],
                    contribution.flux.jacobian_row(r),
                )?;
            }
        }
        system.global_assemble(ctx)
    }

    /// Applies face and cell Dirichlet pressure conditions evaluated at `time + dt`.
    ///
    /// Face conditions add the flux between every boundary cell and its face, with the face
    /// values held fixed. Cell conditions replace the cell's row by `dp = p_bc - p`.
    pub fn apply_boundary_conditions(
        &mut self,
        time: f64,
        dt: f64,
        system: &mut GlobalSystem,
        conditions: &[DirichletCondition],
    ) -> Result<()> {
        let time_np1 = time + dt;
        for condition in conditions {
            if let DirichletTarget::Faces { set } = &condition.target {
                self.apply_face_condition(set, condition.value(time_np1), dt, system)?;
            }
        }
        for condition in conditions {
            if let DirichletTarget::Cells {
                region,
                sub_region,
                cells,
            } = &condition.target
            {
                let value = condition.value(time_np1);
                let dofs = self.current_dofs()?;
                for &index in cells {
                    let (b, cell) = self.locate(&CellDescriptor::new(*region, *sub_region, index))?;
                    let row = dofs.index(cell);
                    let Some(local) = system.local_row(row) else {
                        continue;
                    };
                    system.set_identity_row(row)?;
                    system.residual_mut()[local] = self.blocks[b].state.current_pressure(index) - value;
                }
            }
        }
        Ok(())
    }

    fn apply_face_condition(&mut self, set: &str, pressure: f64, dt: f64, system: &mut GlobalSystem) -> Result<()> {
        let stencil = self
            .stencils
            .boundary_stencil(set)
            .ok_or_else(|| GeoFemError::MissingField {
                name: format!("boundary stencil {set}"),
            })?;
        let (density, _) = self.fluid.density(pressure);
        let (viscosity, _) = self.fluid.viscosity(pressure);
        for entry in stencil.iter() {
            for point in entry.points.iter().filter(|point| point.tag == PointTag::Face) {
                let face = point.index;
                if face >= self.faces.num_faces() {
                    return Err(GeoFemError::IndexOutOfBounds {
                        context: "apply_boundary_conditions (face)",
                        index: face,
                        len: self.faces.num_faces(),
                    });
                }
                self.faces.pressure[face] = pressure;
                self.faces.density[face] = density;
                self.faces.viscosity[face] = viscosity;
            }
        }

        let dofs = self.current_dofs()?;
        let gravity = self.settings.gravity_enabled;
        for entry in stencil.iter() {
            let mut points = [FluxPoint::default(); MAX_STENCIL_SIZE];
            let mut cells = [None; MAX_STENCIL_SIZE];
            for (i, point) in entry.points.iter().enumerate() {
                points[i] = match point.tag {
                    PointTag::Cell => {
                        let descriptor = CellDescriptor::new(point.region, point.sub_region, point.index);
                        let (b, cell) = self.locate(&descriptor)?;
                        cells[i] = Some(cell);
                        self.cell_flux_point(b, point.index)
                    }
                    PointTag::Face => self.face_flux_point(point.index)?,
                    PointTag::Node => {
                        return Err(GeoFemError::UnsupportedPointType {
                            tag: point.tag.to_string(),
                        })
                    }
                };
            }
            let n = entry.len();
            let flux = two_point_flux(&points[..n], entry.weights, gravity, dt)?;

            // Face columns are dropped: face pressures are fixed
            let (cols, col_positions): (Vec<i64>, Vec<usize>) = cells[..n]
                .iter()
                .enumerate()
                .filter_map(|(i, cell)| cell.map(|cell| (dofs.column(cell), i)))
                .unzip();
            for cell_order in 0..2 {
                let Some(cell) = cells[cell_order] else {
                    continue;
                };
                let row = dofs.index(cell);
                let jacobian = flux.jacobian_row(cell_order);
                let values: Vec<f64> = col_positions.iter().map(|&i| jacobian[i]).collect();
                system.sum_into_global_values(&[row], &cols, &values)?;
                system.sum_into_residual(&[row], &[flux.residual[cell_order]])?;
            }
        }
        Ok(())
    }

    /// `sqrt(sum (r / (phi_ref V))^2)` over the owned cells of all ranks.
    ///
    /// Collective: every rank of the context must call this.
    pub fn calculate_residual_norm(&self, system: &GlobalSystem, ctx: &PartitionContext) -> Result<f64> {
        let dofs = self.current_dofs()?;
        let mut local_sum = 0.0;
        for block in &self.blocks {
            let state = &block.state;
            for cell in 0..state.num_cells() {
                let Some(local) = system.local_row(dofs.index(block.offset + cell)) else {
                    continue;
                };
                let normalized = system.residual()[local] / (state.reference_porosity[cell] * state.volume[cell]);
                local_sum += normalized * normalized;
            }
        }
        Ok(ctx.communicator.all_reduce_sum_f64(local_sum)?.sqrt())
    }

    /// Solves `J dx = -r` with Jacobi-preconditioned BiCGSTAB and stores `dx` as the system's
    /// solution.
    pub fn solve_system(&self, system: &mut GlobalSystem, ctx: &PartitionContext) -> Result<SolveOutput> {
        if ctx.size() > 1 {
            return Err(GeoFemError::LinearSolve(String::from(
                "the reference BiCGSTAB solver only handles single-rank systems; \
                 distributed systems need an external solver backend",
            )));
        }
        check_len("solve_system (square matrix)", system.matrix().nrows(), system.matrix().ncols())?;
        let rhs = -system.residual();
        let mut x = DVector::zeros(rhs.len());
        let output = BiCGStab::new()
            .with_operator(system.matrix())
            .with_preconditioner(JacobiPreconditioner::from_csr(system.matrix()))
            .with_parameters(self.settings.linear_solver.into())
            .solve_with_guess(&rhs, &mut x)?;
        debug!(
            "BiCGSTAB: {} iterations, {} restarts, residual reduction {:e}",
            output.num_iterations,
            output.num_restarts,
            output.residual_reduction()
        );
        *system.solution_mut() = x;
        Ok(output)
    }

    /// `dp += scale * dx` on owned cells, ghost updates received from their owners, and the
    /// constitutive models re-evaluated at the new iterate.
    ///
    /// Collective: every rank of the context must call this.
    pub fn apply_system_solution(&mut self, system: &GlobalSystem, scale: f64, ctx: &PartitionContext) -> Result<()> {
        let dofs = self.current_dofs()?.clone();
        for block in &mut self.blocks {
            for cell in 0..block.state.num_cells() {
                if let Some(local) = system.local_row(dofs.index(block.offset + cell)) {
                    block.state.delta_pressure[cell] += scale * system.solution()[local];
                }
            }
        }
        self.synchronize_delta_pressure(ctx)?;
        for block in &mut self.blocks {
            block
                .state
                .update_constitutive(self.fluid.as_ref(), self.porosity.as_ref());
        }
        Ok(())
    }

    fn block_of(&self, cell: usize) -> Result<(usize, usize)> {
        let b = self
            .blocks
            .partition_point(|block| block.offset + block.state.num_cells() <= cell);
        let block = self.blocks.get(b).ok_or(GeoFemError::IndexOutOfBounds {
            context: "flow exchange list",
            index: cell,
            len: self.num_cells(),
        })?;
        Ok((b, cell - block.offset))
    }

    fn synchronize_delta_pressure(&mut self, ctx: &PartitionContext) -> Result<()> {
        if ctx.size() == 1 {
            return Ok(());
        }
        let ranks: Vec<usize> = ctx.neighbors.iter().map(|neighbor| neighbor.rank).collect();
        let outgoing = ctx
            .neighbors
            .iter()
            .map(|neighbor| {
                let values = neighbor
                    .send
                    .iter()
                    .map(|&cell| {
                        let (b, k) = self.block_of(cell)?;
                        Ok(self.blocks[b].state.delta_pressure[k])
                    })
                    .collect::<Result<Vec<f64>>>()?;
                Ok(serde_json::to_vec(&values)?)
            })
            .collect::<Result<Vec<_>>>()?;
        let incoming = ctx.communicator.exchange(&ranks, outgoing)?;
        for (neighbor, bytes) in ctx.neighbors.iter().zip(incoming) {
            let values: Vec<f64> = serde_json::from_slice(&bytes)?;
            check_len("synchronize delta pressure", neighbor.receive.len(), values.len())?;
            for (&cell, value) in neighbor.receive.iter().zip(values) {
                let (b, k) = self.block_of(cell)?;
                self.blocks[b].state.delta_pressure[k] = value;
            }
        }
        Ok(())
    }

    /// Accepts the current iterate as the state at the end of the step.
    pub fn implicit_step_complete(&mut self) {
        for block in &mut self.blocks {
            block.state.commit();
        }
    }

    /// Discards the current iterate.
    pub fn reset_state_to_beginning_of_step(&mut self) {
        for block in &mut self.blocks {
            block.state.delta_pressure.fill(0.0);
            block
                .state
                .update_constitutive(self.fluid.as_ref(), self.porosity.as_ref());
        }
    }

    /// Newton iteration for the step `time -> time + dt`.
    ///
    /// On convergence the step is completed. Otherwise the state is reset to the beginning of
    /// the step and the report says so; the caller may retry with a smaller `dt`.
    pub fn nonlinear_implicit_step(
        &mut self,
        time: f64,
        dt: f64,
        ctx: &PartitionContext,
        conditions: &[DirichletCondition],
    ) -> eyre::Result<NewtonReport> {
        let result = self.newton_loop(time, dt, ctx, conditions);
        let report = match result {
            Ok(report) => report,
            Err(err) => {
                error!("rank {}: implicit step at time {time:e} failed: {err:#}", ctx.rank);
                return Err(err);
            }
        };
        if report.converged {
            info!(
                "rank {}: implicit step at time {:e} converged in {} iterations (residual {:e})",
                ctx.rank, time, report.iterations, report.residual_norm
            );
            self.implicit_step_complete();
        } else {
            warn!(
                "rank {}: implicit step at time {:e} did not converge in {} iterations (residual {:e})",
                ctx.rank, time, report.iterations, report.residual_norm
            );
            self.reset_state_to_beginning_of_step();
        }
        Ok(report)
    }

    fn newton_loop(
        &mut self,
        time: f64,
        dt: f64,
        ctx: &PartitionContext,
        conditions: &[DirichletCondition],
    ) -> eyre::Result<NewtonReport> {
        let newton = self.settings.newton;
        let mut system = self
            .implicit_step_setup(ctx)
            .wrap_err("implicit step setup failed")?;
        let mut report = NewtonReport {
            converged: false,
            iterations: 0,
            residual_norm: f64::INFINITY,
        };
        loop {
            self.assemble_system(dt, &mut system, ctx)
                .wrap_err_with(|| format!("assembly failed in Newton iteration {}", report.iterations))?;
            self.apply_boundary_conditions(time, dt, &mut system, conditions)
                .wrap_err("applying boundary conditions failed")?;
            report.residual_norm = self
                .calculate_residual_norm(&system, ctx)
                .wrap_err("residual norm failed")?;
            debug!(
                "rank {}: Newton iteration {}, residual norm {:e}",
                ctx.rank, report.iterations, report.residual_norm
            );
            if report.residual_norm < newton.tolerance {
                report.converged = true;
                return Ok(report);
            }
            if report.iterations == newton.max_iterations {
                return Ok(report);
            }
            self.solve_system(&mut system, ctx)
                .wrap_err_with(|| format!("linear solve failed in Newton iteration {}", report.iterations))?;
            self.apply_system_solution(&system, newton.solution_scaling, ctx)
                .wrap_err("applying the Newton update failed")?;
            report.iterations += 1;
        }
    }
}
