//! Two-point flux and accumulation kernels of single-phase flow.
use crate::error::{check_len, GeoFemError, Result};
use crate::flow::CellBlockFlowState;
use crate::stencil::MAX_STENCIL_SIZE;

/// Values of one stencil point at the current iterate.
///
/// Face points carry zero derivatives.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FluxPoint {
    pub pressure: f64,
    pub density: f64,
    pub d_density_dp: f64,
    pub viscosity: f64,
    pub d_viscosity_dp: f64,
    pub gravity_depth: f64,
}

/// Residual and Jacobian contributions of one connector to its two connected points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFlux {
    /// Index of the upstream point among the two connected points.
    pub upwind: usize,
    pub potential_difference: f64,
    pub residual: [f64; 2],
    /// `jacobian[r][i]`: derivative of `residual[r]` with respect to the pressure of point `i`.
    pub jacobian: [[f64; MAX_STENCIL_SIZE]; 2],
    pub num_points: usize,
}

impl LocalFlux {
    pub fn jacobian_row(&self, r: usize) -> &[f64] {
        &self.jacobian[r][..self.num_points]
    }
}

/// Mobility `rho / mu` and its pressure derivative.
fn mobility(point: &FluxPoint) -> (f64, f64) {
    let mob = point.density / point.viscosity;
    let dmob = point.d_density_dp / point.viscosity
        - point.density * point.d_viscosity_dp / (point.viscosity * point.viscosity);
    (mob, dmob)
}

/// Upwinded flux of a connector, scaled by `dt`.
///
/// The potential difference is `sum_i w_i (p_i + rho_mean g_i)`, where the mean density of the
/// two connected points only enters the gravity term. The pressure derivative of the potential
/// difference is `w_i (1 + 0.5 drho_i/dp g_i)`, without cross terms between the two connected
/// points. The first connected point is upstream
/// when the potential difference is non-negative. The residual of the second connected point
/// is the negated residual of the first.
pub fn two_point_flux(points: &[FluxPoint], weights: &[f64], gravity: bool, dt: f64) -> Result<LocalFlux> {
    let n = points.len();
    if n > MAX_STENCIL_SIZE {
        return Err(GeoFemError::StencilOverflow {
            count: n,
            max: MAX_STENCIL_SIZE,
        });
    }
    if n < 2 {
        return Err(GeoFemError::SizeMismatch {
            context: "two_point_flux (at least two points)",
            expected: 2,
            actual: n,
        });
    }
    check_len("two_point_flux (weights)", n, weights.len())?;

    let mobilities = [mobility(&points[0]), mobility(&points[1])];
    let density_mean = 0.5 * points[0].density + 0.5 * points[1].density;
    let d_density_mean = [0.5 * points[0].d_density_dp, 0.5 * points[1].d_density_dp];

    let mut potential_difference = 0.0;
    let mut d_potential = [0.0; MAX_STENCIL_SIZE];
    for (i, (point, &w)) in points.iter().zip(weights).enumerate() {
        let gravity_term = if gravity { density_mean * point.gravity_depth } else { 0.0 };
        potential_difference += w * (point.pressure + gravity_term);
        // Only the point's own share of the mean density enters its gravity derivative
        let d_gravity = if gravity && i < 2 {
            d_density_mean[i] * point.gravity_depth
        } else {
            0.0
        };
        d_potential[i] += w * (1.0 + d_gravity);
    }

    let upwind = if potential_difference >= 0.0 { 0 } else { 1 };
    let (mob, dmob) = mobilities[upwind];
    let flux = mob * potential_difference;

    let mut jacobian = [[0.0; MAX_STENCIL_SIZE]; 2];
    for i in 0..n {
        let mut d_flux = d_potential[i] * mob;
        if i == upwind {
            d_flux += dmob * potential_difference;
        }
        jacobian[0][i] = dt * d_flux;
        jacobian[1][i] = -dt * d_flux;
    }

    Ok(LocalFlux {
        upwind,
        potential_difference,
        residual: [dt * flux, -dt * flux],
        jacobian,
        num_points: n,
    })
}

/// Mass change of a cell over the step, `(phi rho)_new V - (phi rho)_old V`, and its pressure
/// derivative.
pub fn accumulation(state: &CellBlockFlowState, cell: usize) -> (f64, f64) {
    let porosity_new = state.current_porosity(cell);
    let density_new = state.current_density(cell);
    let volume = state.volume[cell];
    let residual = (porosity_new * density_new - state.porosity[cell] * state.density[cell]) * volume;
    let derivative = (state.d_porosity_dp[cell] * density_new + state.d_density_dp[cell] * porosity_new) * volume;
    (residual, derivative)
}
