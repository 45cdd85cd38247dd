//! Nodal force, hourglass and lumped mass assembly of element regions.
//!
//! Element contributions are computed in parallel and then added to the node arrays
//! sequentially in element order, so that repeated runs produce identical sums.
use crate::constitutive::SolidConstitutive;
use crate::element::{FiniteElement, Formulation, HourglassParameters};
use crate::error::{GeoFemError, Result};
use crate::region::kinematics::add_element_residual;
use crate::region::{gather_nodal, ElementRegion};
use crate::settings::HourglassSettings;
use log::debug;
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Node data owned by the caller (the mesh), read and accumulated into by region kernels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeFields {
    pub reference_position: Vec<Vector3<f64>>,
    pub displacement: Vec<Vector3<f64>>,
    pub incremental_displacement: Vec<Vector3<f64>>,
    pub velocity: Vec<Vector3<f64>>,
    pub force: Vec<Vector3<f64>>,
    pub hourglass_force: Vec<Vector3<f64>>,
    pub mass: Vec<f64>,
    /// Lumped node volumes, accumulated only when present.
    pub volume: Option<Vec<f64>>,
}

impl NodeFields {
    /// Node fields at rest at the given reference positions.
    pub fn from_reference_positions(reference_position: Vec<Vector3<f64>>) -> Self {
        let n = reference_position.len();
        Self {
            reference_position,
            displacement: vec![Vector3::zeros(); n],
            incremental_displacement: vec![Vector3::zeros(); n],
            velocity: vec![Vector3::zeros(); n],
            force: vec![Vector3::zeros(); n],
            hourglass_force: vec![Vector3::zeros(); n],
            mass: vec![0.0; n],
            volume: None,
        }
    }

    pub fn with_volume(mut self) -> Self {
        self.volume = Some(vec![0.0; self.num_nodes()]);
        self
    }

    pub fn num_nodes(&self) -> usize {
        self.reference_position.len()
    }

    pub fn current_position(&self, node: usize) -> Vector3<f64> {
        self.reference_position[node] + self.displacement[node]
    }

    /// Zeroes forces and hourglass forces.
    pub fn zero_forces(&mut self) {
        self.force.iter_mut().for_each(|f| *f = Vector3::zeros());
        self.hourglass_force.iter_mut().for_each(|f| *f = Vector3::zeros());
    }
}

/// Running minimum of the stable explicit timestep over all visited elements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StableTimestep {
    pub dt: f64,
    /// Element that attains the minimum.
    pub element: Option<usize>,
}

impl Default for StableTimestep {
    fn default() -> Self {
        Self {
            dt: f64::INFINITY,
            element: None,
        }
    }
}

impl StableTimestep {
    pub fn update(&mut self, dt: f64, element: usize) {
        if dt < self.dt {
            self.dt = dt;
            self.element = Some(element);
        }
    }
}

#[derive(Debug, Default)]
struct ElementForces {
    force: Vec<Vector3<f64>>,
    hourglass_force: Vec<Vector3<f64>>,
    dt: f64,
}

struct ForceKernel<'a> {
    finite_element: &'a FiniteElement,
    constitutive: &'a dyn SolidConstitutive,
    element_nodes: &'a [usize],
    dndx: &'a [Vector3<f64>],
    det_j: &'a [f64],
    dudx: &'a [Matrix3<f64>],
    finv: &'a [Matrix3<f64>],
    num_points: usize,
    nodes_per_element: usize,
    dimension: usize,
    hourglass: HourglassSettings,
    nodes: &'a NodeFields,
    dt: f64,
}

impl ForceKernel<'_> {
    fn element_forces(&self, k: usize, mode_state: Option<&mut [Vector3<f64>]>) -> Result<ElementForces> {
        let m = self.nodes_per_element;
        let p = self.num_points;
        let element_nodes = &self.element_nodes[k * m..(k + 1) * m];
        let mut out = ElementForces {
            force: vec![Vector3::zeros(); m],
            hourglass_force: Vec::new(),
            dt: f64::INFINITY,
        };
        let reference_density = self.constitutive.initial_density(k);
        let p_wave_modulus = self.constitutive.p_wave_modulus(k);
        let mut spatial_gradients = vec![Vector3::zeros(); m];

        let mut mode_state = mode_state;
        for a in 0..p {
            let idx = k * p + a;
            let dndx = &self.dndx[idx * m..(idx + 1) * m];
            let f = Matrix3::identity() + self.dudx[idx];
            let det_f = f.determinant();
            let finv = &self.finv[idx];
            add_element_residual(
                &self.constitutive.stress(k, a),
                dndx,
                self.det_j[idx],
                det_f,
                finv,
                &mut out.force,
            );

            let finv_t = finv.transpose();
            let mut bb = 0.0;
            for (g_spatial, g) in spatial_gradients.iter_mut().zip(dndx) {
                *g_spatial = finv_t * g;
                bb += g_spatial.norm_squared();
            }
            let density = reference_density / det_f.abs();
            let mut dt = (density / (p_wave_modulus * bb)).sqrt();
            if self.dimension == 3 {
                dt /= 2.0_f64.sqrt();
            }
            out.dt = out.dt.min(dt);

            if let Some(state) = mode_state.as_deref_mut() {
                let mut x = Vec::with_capacity(m);
                let mut v = Vec::with_capacity(m);
                let mut u = Vec::with_capacity(m);
                gather_nodal(element_nodes, &self.nodes.reference_position, &mut x)?;
                gather_nodal(element_nodes, &self.nodes.displacement, &mut u)?;
                for (x_a, u_a) in x.iter_mut().zip(&u) {
                    *x_a += u_a;
                }
                gather_nodal(element_nodes, &self.nodes.velocity, &mut v)?;

                let parameters = HourglassParameters {
                    damping: self.hourglass.damping,
                    stiffness: self.hourglass.stiffness,
                    density: reference_density,
                    p_wave_modulus,
                    dt: self.dt,
                };
                let mut hourglass_force = vec![Vector3::zeros(); m];
                self.finite_element.zero_energy_mode_control(
                    &spatial_gradients,
                    self.det_j[idx],
                    &x,
                    &v,
                    &parameters,
                    state,
                    &mut hourglass_force,
                )?;
                if out.hourglass_force.is_empty() {
                    out.hourglass_force = hourglass_force;
                } else {
                    for (acc, f_a) in out.hourglass_force.iter_mut().zip(&hourglass_force) {
                        *acc += f_a;
                    }
                }
            }
        }
        Ok(out)
    }
}

fn scatter_add<T>(target: &mut [T], indices: &[usize], values: &[T]) -> Result<()>
where
    T: Copy + std::ops::AddAssign,
{
    for (&node, value) in indices.iter().zip(values) {
        let len = target.len();
        let entry = target.get_mut(node).ok_or(GeoFemError::IndexOutOfBounds {
            context: "scatter node data",
            index: node,
            len,
        })?;
        *entry += *value;
    }
    Ok(())
}

impl ElementRegion {
    /// Adds the internal forces of every element to the node forces and tracks the stable
    /// explicit timestep.
    ///
    /// With zero-energy modes, hourglass forces are added to both `force` and
    /// `hourglass_force`, and the region's hourglass state is advanced.
    pub fn calculate_nodal_forces(
        &mut self,
        nodes: &mut NodeFields,
        stable_dt: &mut StableTimestep,
        dt: f64,
    ) -> Result<()> {
        let finite_element = match self.finite_element.as_deref() {
            Some(finite_element) if finite_element.formulation() != Formulation::FlowOnly => {
                finite_element
            }
            // Flow-only shells carry no stress
            _ => return Ok(()),
        };
        let modes = finite_element.zero_energy_modes();
        let kernel = ForceKernel {
            finite_element,
            constitutive: self.constitutive.as_ref(),
            element_nodes: &self.element_nodes,
            dndx: &self.dndx,
            det_j: &self.det_j,
            dudx: &self.dudx,
            finv: &self.finv,
            num_points: self.num_points,
            nodes_per_element: self.nodes_per_element,
            dimension: self.dimension,
            hourglass: self.hourglass,
            nodes,
            dt,
        };

        let element_forces: Vec<ElementForces> = if modes > 0 {
            self.hourglass_state
                .par_chunks_mut(modes)
                .enumerate()
                .map(|(k, state)| kernel.element_forces(k, Some(state)))
                .collect::<Result<_>>()?
        } else {
            (0..self.num_elements)
                .into_par_iter()
                .map(|k| kernel.element_forces(k, None))
                .collect::<Result<_>>()?
        };

        let m = self.nodes_per_element;
        for (k, forces) in element_forces.iter().enumerate() {
            let element_nodes = &self.element_nodes[k * m..(k + 1) * m];
            scatter_add(&mut nodes.force, element_nodes, &forces.force)?;
            if !forces.hourglass_force.is_empty() {
                scatter_add(&mut nodes.force, element_nodes, &forces.hourglass_force)?;
                scatter_add(&mut nodes.hourglass_force, element_nodes, &forces.hourglass_force)?;
            }
            stable_dt.update(forces.dt, k);
        }
        debug!(
            "Region {}: nodal forces assembled, stable timestep {:e} (element {:?})",
            self.name, stable_dt.dt, stable_dt.element
        );
        Ok(())
    }

    /// Computes element masses from the reference density and lumps mass (and volume, when
    /// the node fields carry it) equally onto the element nodes.
    pub fn calculate_nodal_masses(&mut self, nodes: &mut NodeFields) -> Result<()> {
        let p = self.num_points;
        let m = self.nodes_per_element;
        if m == 0 {
            return Ok(());
        }
        let det_j = &self.det_j;
        let constitutive = self.constitutive.as_ref();
        let element_sums: Vec<(f64, f64, f64)> = (0..self.num_elements)
            .into_par_iter()
            .map(|k| {
                let density = constitutive.initial_density(k);
                let volume: f64 = det_j[k * p..(k + 1) * p].iter().sum();
                (density, density * volume, volume)
            })
            .collect();

        for (k, &(density, mass, volume)) in element_sums.iter().enumerate() {
            self.density[k] = density;
            self.mass[k] = mass;
            let element_nodes = &self.element_nodes[k * m..(k + 1) * m];
            let nodal_mass = vec![mass / m as f64; m];
            scatter_add(&mut nodes.mass, element_nodes, &nodal_mass)?;
            if let Some(node_volume) = nodes.volume.as_mut() {
                let nodal_volume = vec![volume / m as f64; m];
                scatter_add(node_volume, element_nodes, &nodal_volume)?;
            }
        }
        Ok(())
    }
}
