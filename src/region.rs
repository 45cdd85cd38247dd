//! Element regions: per-element and per-integration-point state of a set of elements of one
//! topology, and the kernels that derive geometric and kinematic quantities from node data.
//!
//! Per-point arrays are stored flat with `num_points` entries per element (and
//! `num_points * nodes_per_element` entries per element for shape-function gradients). All
//! arrays are resized in lockstep.
use crate::assembly::NodeFields;
use crate::connectivity::{ElementRef, FaceManager};
use crate::constitutive::SolidConstitutive;
use crate::dof::GHOST_DOF;
use crate::element::{FiniteElement, Formulation};
use crate::error::{check_len, GeoFemError, Result};
use crate::settings::{HourglassSettings, RegionSettings};
use crate::topology::ElementTopology;
use log::{debug, info};
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use std::cell::RefCell;
use std::collections::BTreeSet;
use thread_local::ThreadLocal;

mod fields;
pub mod kinematics;

pub use fields::RegionFields;

/// Field names of the per-element stress components `xx, yy, zz, xy, yz, xz`.
pub const STRESS_COMPONENTS: [&str; 6] = ["sigma_x", "sigma_y", "sigma_z", "sigma_xy", "sigma_yz", "sigma_xz"];

#[derive(Debug)]
pub struct ElementRegion {
    pub(crate) name: String,
    pub(crate) element_type: String,
    pub(crate) topology: ElementTopology,
    pub(crate) formulation: Formulation,
    pub(crate) hourglass: HourglassSettings,
    pub(crate) dimension: usize,
    pub(crate) nodes_per_element: usize,
    pub(crate) faces_per_element: usize,
    pub(crate) nodes_per_face: usize,
    pub(crate) num_points: usize,
    pub(crate) num_elements: usize,
    pub(crate) next_global_index: i64,

    pub(crate) finite_element: Option<Box<FiniteElement>>,
    pub(crate) constitutive: Box<dyn SolidConstitutive>,

    pub(crate) element_nodes: Vec<usize>,
    pub(crate) element_faces: Vec<usize>,
    pub(crate) volume: Vec<f64>,
    pub(crate) volume_n: Vec<f64>,
    pub(crate) mass: Vec<f64>,
    pub(crate) density: Vec<f64>,
    pub(crate) pressure: Vec<f64>,
    pub(crate) deviator_stress: Vec<Matrix3<f64>>,
    pub(crate) stress_components: [Vec<f64>; 6],
    pub(crate) ghost_rank: Vec<i64>,
    pub(crate) global_index: Vec<i64>,
    pub(crate) domain_boundary: Vec<bool>,
    /// `zero_energy_modes` vectors per element.
    pub(crate) hourglass_state: Vec<Vector3<f64>>,

    pub(crate) dndx: Vec<Vector3<f64>>,
    pub(crate) det_j: Vec<f64>,
    pub(crate) det_j_n: Vec<f64>,
    pub(crate) det_j_np1: Vec<f64>,
    pub(crate) dudx: Vec<Matrix3<f64>>,
    pub(crate) finv: Vec<Matrix3<f64>>,
    pub(crate) rot: Vec<Matrix3<f64>>,
    pub(crate) dadt: Vec<Matrix3<f64>>,
}

/// Copies the entries of `source` at `indices` into `out`.
pub(crate) fn gather_nodal<T: Copy>(indices: &[usize], source: &[T], out: &mut Vec<T>) -> Result<()> {
    out.clear();
    for &node in indices {
        let value = source.get(node).ok_or(GeoFemError::IndexOutOfBounds {
            context: "gather node data",
            index: node,
            len: source.len(),
        })?;
        out.push(*value);
    }
    Ok(())
}

impl ElementRegion {
    /// Creates an empty region and derives its geometric attributes from the element type tag.
    pub fn new(settings: &RegionSettings, constitutive: Box<dyn SolidConstitutive>) -> Result<Self> {
        let topology = ElementTopology::from_tag(&settings.element_type)?;
        let mut region = Self {
            name: settings.name.clone(),
            element_type: settings.element_type.clone(),
            topology,
            formulation: settings.formulation,
            hourglass: settings.hourglass,
            dimension: 0,
            nodes_per_element: 0,
            faces_per_element: 0,
            nodes_per_face: 0,
            num_points: 0,
            num_elements: 0,
            next_global_index: 0,
            finite_element: None,
            constitutive,
            element_nodes: Vec::new(),
            element_faces: Vec::new(),
            volume: Vec::new(),
            volume_n: Vec::new(),
            mass: Vec::new(),
            density: Vec::new(),
            pressure: Vec::new(),
            deviator_stress: Vec::new(),
            stress_components: Default::default(),
            ghost_rank: Vec::new(),
            global_index: Vec::new(),
            domain_boundary: Vec::new(),
            hourglass_state: Vec::new(),
            dndx: Vec::new(),
            det_j: Vec::new(),
            det_j_n: Vec::new(),
            det_j_np1: Vec::new(),
            dudx: Vec::new(),
            finv: Vec::new(),
            rot: Vec::new(),
            dadt: Vec::new(),
        };
        region.set_geometry_based_variables()?;
        Ok(region)
    }

    /// Derives dimension, nodes per element, faces per element and nodes per face from the
    /// element type tag.
    pub fn set_geometry_based_variables(&mut self) -> Result<()> {
        let topology = ElementTopology::from_tag(&self.element_type)?;
        self.topology = topology;
        self.dimension = topology.dimension();
        self.nodes_per_element = topology.num_nodes();
        self.faces_per_element = topology.num_faces();
        self.nodes_per_face = topology.num_nodes_per_face();
        Ok(())
    }

    /// Builds the shape-function evaluator for the region's topology and formulation, registers
    /// one hourglass state vector per zero-energy mode and sizes the per-point state.
    pub fn allocate_element_library(&mut self, basis_order: usize, quadrature_order: usize) -> Result<()> {
        let finite_element = FiniteElement::new(self.topology, self.formulation, basis_order, quadrature_order)?;
        self.num_points = finite_element.num_quadrature_points();
        info!(
            "Region {}: allocated {} element library ({} points per element, {} zero-energy modes)",
            self.name,
            self.topology,
            self.num_points,
            finite_element.zero_energy_modes()
        );
        self.finite_element = Some(Box::new(finite_element));

        // Per-point arrays change their stride, so they are rebuilt from scratch.
        let n = self.num_elements;
        let p = self.num_points;
        self.dndx = vec![Vector3::zeros(); n * p * self.nodes_per_element];
        self.det_j = vec![0.0; n * p];
        self.det_j_n = vec![0.0; n * p];
        self.det_j_np1 = vec![0.0; n * p];
        self.dudx = vec![Matrix3::zeros(); n * p];
        self.finv = vec![Matrix3::identity(); n * p];
        self.rot = vec![Matrix3::zeros(); n * p];
        self.dadt = vec![Matrix3::zeros(); n * p];
        self.hourglass_state = vec![Vector3::zeros(); n * self.zero_energy_modes()];
        self.constitutive.resize(n, p);
        Ok(())
    }

    /// Resizes every array to `new_count` elements.
    ///
    /// Existing entries are kept, new inverse deformation gradients are the identity and all
    /// other new entries are zero. Returns the global index of the first new element; new
    /// elements receive consecutive global indices when `assign_global_ids` is set, and the
    /// ghost sentinel otherwise.
    pub fn resize(&mut self, new_count: usize, assign_global_ids: bool) -> i64 {
        let first_new_global_index = self.next_global_index;
        let old_count = self.num_elements;
        let n = new_count;
        let p = self.num_points;
        let modes = self.zero_energy_modes();

        self.element_nodes.resize(n * self.nodes_per_element, 0);
        self.element_faces.resize(n * self.faces_per_element, 0);
        self.volume.resize(n, 0.0);
        self.volume_n.resize(n, 0.0);
        self.mass.resize(n, 0.0);
        self.density.resize(n, 0.0);
        self.pressure.resize(n, 0.0);
        self.deviator_stress.resize(n, Matrix3::zeros());
        for component in &mut self.stress_components {
            component.resize(n, 0.0);
        }
        self.ghost_rank.resize(n, -1);
        self.domain_boundary.resize(n, false);
        self.hourglass_state.resize(n * modes, Vector3::zeros());

        if new_count > old_count && assign_global_ids {
            let start = self.next_global_index;
            self.global_index
                .extend((0..(new_count - old_count) as i64).map(|i| start + i));
            self.next_global_index += (new_count - old_count) as i64;
        } else {
            self.global_index.resize(n, GHOST_DOF);
        }

        self.dndx.resize(n * p * self.nodes_per_element, Vector3::zeros());
        self.det_j.resize(n * p, 0.0);
        self.det_j_n.resize(n * p, 0.0);
        self.det_j_np1.resize(n * p, 0.0);
        self.dudx.resize(n * p, Matrix3::zeros());
        self.finv.resize(n * p, Matrix3::identity());
        self.rot.resize(n * p, Matrix3::zeros());
        self.dadt.resize(n * p, Matrix3::zeros());

        self.num_elements = n;
        self.constitutive.resize(n, p);
        first_new_global_index
    }

    /// Sets the global index the next assigned element receives.
    pub fn set_next_global_index(&mut self, next: i64) {
        self.next_global_index = next;
    }

    /// Sets the node list of element `k`.
    pub fn set_element_nodes(&mut self, k: usize, nodes: &[usize]) -> Result<()> {
        check_len("set_element_nodes", self.nodes_per_element, nodes.len())?;
        self.check_element(k, "set_element_nodes")?;
        let m = self.nodes_per_element;
        self.element_nodes[k * m..(k + 1) * m].copy_from_slice(nodes);
        Ok(())
    }

    /// Copies the element to face map of this region out of a face manager.
    pub fn set_element_faces(&mut self, faces: &[usize]) -> Result<()> {
        check_len("set_element_faces", self.num_elements * self.faces_per_element, faces.len())?;
        self.element_faces.copy_from_slice(faces);
        Ok(())
    }

    pub fn set_ghost_rank(&mut self, k: usize, rank: i64) -> Result<()> {
        self.check_element(k, "set_ghost_rank")?;
        self.ghost_rank[k] = rank;
        Ok(())
    }

    fn check_element(&self, k: usize, context: &'static str) -> Result<()> {
        if k < self.num_elements {
            Ok(())
        } else {
            Err(GeoFemError::IndexOutOfBounds {
                context,
                index: k,
                len: self.num_elements,
            })
        }
    }

    fn library(&self, context: &'static str) -> Result<&FiniteElement> {
        self.finite_element
            .as_deref()
            .ok_or_else(|| GeoFemError::UnsupportedElementConfiguration {
                topology: self.topology.to_string(),
                formulation: self.formulation.to_string(),
                reason: format!("{context}: element library has not been allocated"),
            })
    }

    /// Computes reference `detJ` and shape-function gradients of every element, and resets
    /// `detJ_n` and `detJ_np1` to the reference values.
    pub fn calculate_shape_function_derivatives(&mut self, nodes: &NodeFields) -> Result<()> {
        if let Some(finite_element) = self.finite_element.as_deref() {
            let p = self.num_points;
            let m = self.nodes_per_element;
            if p > 0 && m > 0 {
                let scratch: ThreadLocal<RefCell<Vec<Vector3<f64>>>> = ThreadLocal::new();
                let element_nodes = &self.element_nodes;
                self.det_j
                    .par_chunks_mut(p)
                    .zip(self.dndx.par_chunks_mut(p * m))
                    .enumerate()
                    .try_for_each(|(k, (det_j, dndx))| {
                        let mut x = scratch.get_or_default().borrow_mut();
                        gather_nodal(&element_nodes[k * m..(k + 1) * m], &nodes.reference_position, &mut x)?;
                        finite_element.reinit(k, &x, det_j, dndx)
                    })?;
            }
        }
        self.det_j_n.copy_from_slice(&self.det_j);
        self.det_j_np1.copy_from_slice(&self.det_j);
        debug!("Region {}: computed shape function derivatives of {} elements", self.name, self.num_elements);
        Ok(())
    }

    /// Advances the deformation state of every integration point with the incremental node
    /// displacements: `dUdX`, `Finv`, `detJ_np1`, the incremental rate of deformation and
    /// rotation, and the element volumes.
    pub fn calculate_velocity_gradients(&mut self, nodes: &NodeFields) -> Result<()> {
        let p = self.num_points;
        let m = self.nodes_per_element;
        self.volume_n.copy_from_slice(&self.volume);
        self.det_j_n.copy_from_slice(&self.det_j_np1);
        if p == 0 || m == 0 {
            return Ok(());
        }

        let scratch: ThreadLocal<RefCell<Vec<Vector3<f64>>>> = ThreadLocal::new();
        let element_nodes = &self.element_nodes;
        let dndx = &self.dndx;
        let det_j = &self.det_j;
        (
            self.dudx.par_chunks_mut(p),
            self.finv.par_chunks_mut(p),
            self.det_j_np1.par_chunks_mut(p),
            self.dadt.par_chunks_mut(p),
            self.rot.par_chunks_mut(p),
            self.volume.par_iter_mut(),
        )
            .into_par_iter()
            .enumerate()
            .try_for_each(|(k, (dudx, finv, det_j_np1, dadt, rot, volume))| {
                let mut uhat = scratch.get_or_default().borrow_mut();
                gather_nodal(&element_nodes[k * m..(k + 1) * m], &nodes.incremental_displacement, &mut uhat)?;
                *volume = 0.0;
                for a in 0..p {
                    let point = k * p + a;
                    let dudx_hat = kinematics::gradient(&uhat, &dndx[point * m..(point + 1) * m]);
                    dudx[a] += dudx_hat;
                    let f = Matrix3::identity() + dudx[a];
                    det_j_np1[a] = det_j[point] * f.determinant();
                    *volume += det_j_np1[a];
                    finv[a] = f.try_inverse().ok_or(GeoFemError::InvertedElement {
                        element: k,
                        point: a,
                        det_j: det_j_np1[a],
                    })?;
                    let (d, r) = kinematics::incremental_kinematics(&(dudx_hat * finv[a]))?;
                    dadt[a] = d;
                    rot[a] = r;
                }
                Ok(())
            })
    }

    /// Advances the constitutive state of every point with the current incremental kinematics.
    pub fn update_material_state(&mut self) {
        let p = self.num_points;
        for k in 0..self.num_elements {
            for a in 0..p {
                let idx = k * p + a;
                self.constitutive
                    .update_state(k, a, &self.dadt[idx], &self.rot[idx]);
            }
        }
    }

    /// Sets unit density, the reference volume `sum detJ` and the mass of every element.
    pub fn initialize(&mut self) {
        let p = self.num_points;
        for k in 0..self.num_elements {
            self.density[k] = 1.0;
            self.volume[k] = self.det_j[k * p..(k + 1) * p].iter().sum();
            self.mass[k] = self.density[k] * self.volume[k];
        }
    }

    /// Flags every element with at least one face on the domain boundary.
    pub fn set_domain_boundary_objects(&mut self, face_manager: &FaceManager) -> Result<()> {
        let nf = self.faces_per_element;
        for k in 0..self.num_elements {
            let mut on_boundary = false;
            for &face in &self.element_faces[k * nf..(k + 1) * nf] {
                if face >= face_manager.num_faces() {
                    return Err(GeoFemError::IndexOutOfBounds {
                        context: "set_domain_boundary_objects",
                        index: face,
                        len: face_manager.num_faces(),
                    });
                }
                on_boundary |= face_manager.is_domain_boundary(face);
            }
            self.domain_boundary[k] = on_boundary;
        }
        Ok(())
    }

    /// Mean node position of element `k`, in the reference or the displaced configuration.
    pub fn element_center(&self, k: usize, nodes: &NodeFields, use_reference: bool) -> Result<Vector3<f64>> {
        self.check_element(k, "element_center")?;
        let mut center = Vector3::zeros();
        for &node in self.nodes_of(k) {
            let x = nodes
                .reference_position
                .get(node)
                .ok_or(GeoFemError::IndexOutOfBounds {
                    context: "element_center",
                    index: node,
                    len: nodes.num_nodes(),
                })?;
            center += x;
            if !use_reference {
                center += nodes.displacement[node];
            }
        }
        Ok(center / self.nodes_per_element as f64)
    }

    /// Elements of this region sharing a face with element `k`.
    pub fn element_neighbors(
        &self,
        region_index: usize,
        k: usize,
        face_manager: &FaceManager,
    ) -> Result<BTreeSet<usize>> {
        self.check_element(k, "element_neighbors")?;
        let this = ElementRef {
            region: region_index,
            element: k,
        };
        let nf = self.faces_per_element;
        Ok(self.element_faces[k * nf..(k + 1) * nf]
            .iter()
            .flat_map(|&face| face_manager.face_elements(face))
            .filter(|other| other.region == region_index && *other != this)
            .map(|other| other.element)
            .collect())
    }

    /// Global node indices of local face `local_face` of element `k`.
    pub fn face_nodes(&self, k: usize, local_face: usize) -> Result<Vec<usize>> {
        self.check_element(k, "face_nodes")?;
        let element_nodes = self.nodes_of(k);
        Ok(self
            .topology
            .local_face_nodes(local_face)?
            .iter()
            .map(|&local| element_nodes[local])
            .collect())
    }

    /// Averages pressure, deviatoric stress and density over the integration points of every
    /// element and derives the stress components `sigma_x .. sigma_xz`.
    pub fn update_element_fields_with_gauss_point_data(&mut self) {
        let p = self.num_points;
        if p == 0 {
            return;
        }
        for k in 0..self.num_elements {
            let mut pressure = 0.0;
            let mut deviator = Matrix3::zeros();
            let mut density = 0.0;
            for a in 0..p {
                let sigma = self.constitutive.stress(k, a);
                let mean = sigma.trace() / 3.0;
                pressure += mean;
                deviator += sigma - Matrix3::identity() * mean;
                density += self.constitutive.density(k, a);
            }
            let pressure = pressure / p as f64;
            let deviator = deviator / p as f64;
            self.pressure[k] = pressure;
            self.deviator_stress[k] = deviator;
            self.density[k] = density / p as f64;

            let components = [
                deviator[(0, 0)] + pressure,
                deviator[(1, 1)] + pressure,
                deviator[(2, 2)] + pressure,
                deviator[(0, 1)],
                deviator[(1, 2)],
                deviator[(0, 2)],
            ];
            for (field, value) in self.stress_components.iter_mut().zip(components) {
                field[k] = value;
            }
        }
    }

    /// Node forces of element `k` for a uniform stress, summed over its integration points.
    pub fn calculate_nodal_force_from_stress(&self, k: usize, stress: &Matrix3<f64>) -> Result<Vec<Vector3<f64>>> {
        self.check_element(k, "calculate_nodal_force_from_stress")?;
        self.library("calculate_nodal_force_from_stress")?;
        let p = self.num_points;
        let m = self.nodes_per_element;
        let mut forces = vec![Vector3::zeros(); m];
        for a in 0..p {
            let idx = k * p + a;
            let f = Matrix3::identity() + self.dudx[idx];
            kinematics::add_element_residual(
                stress,
                &self.dndx[idx * m..(idx + 1) * m],
                self.det_j[idx],
                f.determinant(),
                &self.finv[idx],
                &mut forces,
            );
        }
        Ok(forces)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element_type(&self) -> &str {
        &self.element_type
    }

    pub fn topology(&self) -> ElementTopology {
        self.topology
    }

    pub fn formulation(&self) -> Formulation {
        self.formulation
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    pub fn nodes_per_element(&self) -> usize {
        self.nodes_per_element
    }

    pub fn faces_per_element(&self) -> usize {
        self.faces_per_element
    }

    pub fn nodes_per_face(&self) -> usize {
        self.nodes_per_face
    }

    pub fn num_points(&self) -> usize {
        self.num_points
    }

    pub fn zero_energy_modes(&self) -> usize {
        self.finite_element
            .as_deref()
            .map(FiniteElement::zero_energy_modes)
            .unwrap_or(0)
    }

    pub fn finite_element(&self) -> Option<&FiniteElement> {
        self.finite_element.as_deref()
    }

    pub fn constitutive(&self) -> &dyn SolidConstitutive {
        self.constitutive.as_ref()
    }

    pub fn constitutive_mut(&mut self) -> &mut dyn SolidConstitutive {
        self.constitutive.as_mut()
    }

    pub fn nodes_of(&self, k: usize) -> &[usize] {
        let m = self.nodes_per_element;
        &self.element_nodes[k * m..(k + 1) * m]
    }

    pub fn element_nodes(&self) -> &[usize] {
        &self.element_nodes
    }

    pub fn element_faces(&self) -> &[usize] {
        &self.element_faces
    }

    pub fn volume(&self) -> &[f64] {
        &self.volume
    }

    pub fn mass(&self) -> &[f64] {
        &self.mass
    }

    pub fn density(&self) -> &[f64] {
        &self.density
    }

    pub fn pressure(&self) -> &[f64] {
        &self.pressure
    }

    pub fn ghost_rank(&self) -> &[i64] {
        &self.ghost_rank
    }

    pub fn global_index(&self) -> &[i64] {
        &self.global_index
    }

    pub fn is_domain_boundary(&self, k: usize) -> Result<bool> {
        self.check_element(k, "is_domain_boundary")?;
        self.domain_boundary
            .get(k)
            .copied()
            .ok_or(GeoFemError::IndexOutOfBounds {
                context: "is_domain_boundary",
                index: k,
                len: self.domain_boundary.len(),
            })
    }

    /// Hourglass state vectors of element `k`, one per zero-energy mode.
    pub fn hourglass_state(&self, k: usize) -> Result<&[Vector3<f64>]> {
        self.check_element(k, "hourglass_state")?;
        let modes = self.zero_energy_modes();
        self.hourglass_state
            .get(k * modes..(k + 1) * modes)
            .ok_or(GeoFemError::IndexOutOfBounds {
                context: "hourglass_state",
                index: k,
                len: self.hourglass_state.len() / modes.max(1),
            })
    }

    /// Weighted reference Jacobian determinants of element `k`.
    pub fn det_j(&self, k: usize) -> &[f64] {
        &self.det_j[k * self.num_points..(k + 1) * self.num_points]
    }

    pub fn det_j_n(&self, k: usize) -> &[f64] {
        &self.det_j_n[k * self.num_points..(k + 1) * self.num_points]
    }

    pub fn det_j_np1(&self, k: usize) -> &[f64] {
        &self.det_j_np1[k * self.num_points..(k + 1) * self.num_points]
    }

    /// Reference shape-function gradients of all nodes at point `a` of element `k`.
    pub fn shape_gradients(&self, k: usize, a: usize) -> &[Vector3<f64>] {
        let m = self.nodes_per_element;
        let idx = k * self.num_points + a;
        &self.dndx[idx * m..(idx + 1) * m]
    }

    pub fn displacement_gradient(&self, k: usize, a: usize) -> &Matrix3<f64> {
        &self.dudx[k * self.num_points + a]
    }

    pub fn inverse_deformation_gradient(&self, k: usize, a: usize) -> &Matrix3<f64> {
        &self.finv[k * self.num_points + a]
    }

    pub fn rotation_increment(&self, k: usize, a: usize) -> &Matrix3<f64> {
        &self.rot[k * self.num_points + a]
    }

    pub fn deformation_rate_increment(&self, k: usize, a: usize) -> &Matrix3<f64> {
        &self.dadt[k * self.num_points + a]
    }

    /// Number of entries of every per-point array.
    pub fn num_point_entries(&self) -> usize {
        self.det_j.len()
    }
}
