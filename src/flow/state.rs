use crate::assembly::NodeFields;
use crate::connectivity::FaceManager;
use crate::constitutive::{FluidModel, PorosityModel};
use crate::error::{check_len, Result};
use crate::region::ElementRegion;
use log::warn;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Flow state of the cells of one (region, sub-region) block.
///
/// Values without a `delta_` prefix are the values at the beginning of the time step; the
/// current Newton iterate is `value + delta_value`. Derivatives are evaluated at the iterate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellBlockFlowState {
    pub pressure: Vec<f64>,
    pub delta_pressure: Vec<f64>,
    pub density: Vec<f64>,
    pub delta_density: Vec<f64>,
    pub d_density_dp: Vec<f64>,
    pub viscosity: Vec<f64>,
    pub delta_viscosity: Vec<f64>,
    pub d_viscosity_dp: Vec<f64>,
    pub porosity: Vec<f64>,
    pub delta_porosity: Vec<f64>,
    pub d_porosity_dp: Vec<f64>,
    pub reference_porosity: Vec<f64>,
    pub volume: Vec<f64>,
    pub gravity_depth: Vec<f64>,
    pub center: Vec<Vector3<f64>>,
    pub ghost_rank: Vec<i64>,
}

impl CellBlockFlowState {
    /// Locally owned cells with the given volumes and centers, zero pressure and unit reference
    /// porosity.
    pub fn new(volume: Vec<f64>, center: Vec<Vector3<f64>>) -> Result<Self> {
        check_len("CellBlockFlowState::new (centers)", volume.len(), center.len())?;
        let n = volume.len();
        Ok(Self {
            pressure: vec![0.0; n],
            delta_pressure: vec![0.0; n],
            density: vec![0.0; n],
            delta_density: vec![0.0; n],
            d_density_dp: vec![0.0; n],
            viscosity: vec![0.0; n],
            delta_viscosity: vec![0.0; n],
            d_viscosity_dp: vec![0.0; n],
            porosity: vec![0.0; n],
            delta_porosity: vec![0.0; n],
            d_porosity_dp: vec![0.0; n],
            reference_porosity: vec![1.0; n],
            volume,
            gravity_depth: vec![0.0; n],
            center,
            ghost_rank: vec![-1; n],
        })
    }

    /// Cells of an element region: volumes, reference centers and ghost ranks are taken from
    /// the region.
    pub fn from_region(region: &ElementRegion, nodes: &NodeFields) -> Result<Self> {
        let center = (0..region.num_elements())
            .map(|k| region.element_center(k, nodes, true))
            .collect::<Result<Vec<_>>>()?;
        let mut state = Self::new(region.volume().to_vec(), center)?;
        state.ghost_rank = region.ghost_rank().to_vec();
        Ok(state)
    }

    pub fn num_cells(&self) -> usize {
        self.volume.len()
    }

    pub fn is_owned(&self, cell: usize) -> bool {
        self.ghost_rank[cell] < 0
    }

    pub fn current_pressure(&self, cell: usize) -> f64 {
        self.pressure[cell] + self.delta_pressure[cell]
    }

    pub fn current_density(&self, cell: usize) -> f64 {
        self.density[cell] + self.delta_density[cell]
    }

    pub fn current_viscosity(&self, cell: usize) -> f64 {
        self.viscosity[cell] + self.delta_viscosity[cell]
    }

    pub fn current_porosity(&self, cell: usize) -> f64 {
        self.porosity[cell] + self.delta_porosity[cell]
    }

    /// Evaluates the fluid and porosity models at the beginning-of-step pressure and zeroes
    /// all deltas.
    pub fn initialize_constitutive(&mut self, fluid: &dyn FluidModel, porosity: &dyn PorosityModel) {
        for k in 0..self.num_cells() {
            let p = self.pressure[k];
            let (rho, drho) = fluid.density(p);
            let (mu, dmu) = fluid.viscosity(p);
            let (phi, dphi) = porosity.porosity(p, self.reference_porosity[k]);
            self.density[k] = rho;
            self.d_density_dp[k] = drho;
            self.viscosity[k] = mu;
            self.d_viscosity_dp[k] = dmu;
            self.porosity[k] = phi;
            self.d_porosity_dp[k] = dphi;
            self.delta_pressure[k] = 0.0;
            self.delta_density[k] = 0.0;
            self.delta_viscosity[k] = 0.0;
            self.delta_porosity[k] = 0.0;
        }
    }

    /// Re-evaluates the models at the current iterate `p + dp` and updates the deltas.
    pub fn update_constitutive(&mut self, fluid: &dyn FluidModel, porosity: &dyn PorosityModel) {
        for k in 0..self.num_cells() {
            let p = self.current_pressure(k);
            let (rho, drho) = fluid.density(p);
            let (mu, dmu) = fluid.viscosity(p);
            let (phi, dphi) = porosity.porosity(p, self.reference_porosity[k]);
            if phi <= 0.0 {
                warn!("cell {k}: non-positive porosity {phi:e} at pressure {p:e}");
            }
            self.delta_density[k] = rho - self.density[k];
            self.d_density_dp[k] = drho;
            self.delta_viscosity[k] = mu - self.viscosity[k];
            self.d_viscosity_dp[k] = dmu;
            self.delta_porosity[k] = phi - self.porosity[k];
            self.d_porosity_dp[k] = dphi;
        }
    }

    /// Moves the current iterate into the beginning-of-step values.
    pub fn commit(&mut self) {
        for k in 0..self.num_cells() {
            self.pressure[k] += self.delta_pressure[k];
            self.density[k] += self.delta_density[k];
            self.viscosity[k] += self.delta_viscosity[k];
            self.porosity[k] += self.delta_porosity[k];
            self.delta_pressure[k] = 0.0;
            self.delta_density[k] = 0.0;
            self.delta_viscosity[k] = 0.0;
            self.delta_porosity[k] = 0.0;
        }
    }
}

/// Flow state of faces, indexed like the faces of a [`FaceManager`]. Only faces that carry a
/// boundary condition hold meaningful pressure, density and viscosity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceFlowState {
    pub pressure: Vec<f64>,
    pub density: Vec<f64>,
    pub viscosity: Vec<f64>,
    pub gravity_depth: Vec<f64>,
    pub center: Vec<Vector3<f64>>,
    pub ghost_rank: Vec<i64>,
}

impl FaceFlowState {
    pub fn new(center: Vec<Vector3<f64>>) -> Self {
        let n = center.len();
        Self {
            pressure: vec![0.0; n],
            density: vec![0.0; n],
            viscosity: vec![0.0; n],
            gravity_depth: vec![0.0; n],
            center,
            ghost_rank: vec![-1; n],
        }
    }

    /// Face state with the centers of all faces of `faces`.
    pub fn from_faces(faces: &FaceManager, positions: &[Vector3<f64>]) -> Result<Self> {
        let center = (0..faces.num_faces())
            .map(|face| Ok(faces.face_geometry(face, positions)?.center))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(center))
    }

    pub fn num_faces(&self) -> usize {
        self.center.len()
    }
}
