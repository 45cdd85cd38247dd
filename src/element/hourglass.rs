use super::basis::{tensor_node_sign, ReferenceBasis};
use super::FiniteElement;
use nalgebra::Vector3;

/// Material and step data entering the hourglass forces of one element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HourglassParameters {
    pub damping: f64,
    pub stiffness: f64,
    /// Current density.
    pub density: f64,
    /// P-wave modulus `lambda + 2G`.
    pub p_wave_modulus: f64,
    pub dt: f64,
}

/// Base vectors `h^m_a` of the zero-energy modes, `num_nodes` entries per mode.
pub(super) fn base_vectors(basis: &ReferenceBasis, modes: usize) -> Vec<f64> {
    let n = basis.num_nodes();
    let mut base = vec![0.0; modes * n];
    if modes == 0 {
        return base;
    }
    // Products of reference sign patterns: xy in 2D; xy, yz, xz, xyz in 3D.
    const PATTERNS_3D: [&[usize]; 4] = [&[0, 1], &[1, 2], &[0, 2], &[0, 1, 2]];
    match basis {
        ReferenceBasis::Quad4 => {
            for a in 0..4 {
                base[a] = tensor_node_sign(a, 0) * tensor_node_sign(a, 1);
            }
        }
        ReferenceBasis::Hexahedron8 { node_map } => {
            for (m, axes) in PATTERNS_3D.iter().take(modes).enumerate() {
                for (slot, &node) in node_map.iter().enumerate() {
                    base[m * n + node] += axes.iter().map(|&d| tensor_node_sign(slot, d)).product::<f64>();
                }
            }
        }
        _ => {}
    }
    base
}

#[allow(clippy::too_many_arguments)]
pub(super) fn apply(
    element: &FiniteElement,
    dim: usize,
    dndx: &[Vector3<f64>],
    volume: f64,
    x: &[Vector3<f64>],
    v: &[Vector3<f64>],
    parameters: &HourglassParameters,
    mode_state: &mut [Vector3<f64>],
    forces: &mut [Vector3<f64>],
) {
    let n = x.len();
    let bb: f64 = dndx.iter().map(|g| g.norm_squared()).sum();
    let sound_speed = (parameters.p_wave_modulus / parameters.density).sqrt();
    let area = volume.powf((dim as f64 - 1.0) / dim as f64);
    let stiffness = parameters.p_wave_modulus * volume * bb / n as f64;
    let viscous_coefficient = parameters.damping * parameters.density * sound_speed * area;

    let mut gamma = vec![0.0; n];
    for (m, state) in mode_state.iter_mut().enumerate() {
        let h = element.hourglass_base(m);
        let hx: Vector3<f64> = h.iter().zip(x).map(|(h_a, x_a)| *h_a * x_a).sum();
        for a in 0..n {
            gamma[a] = h[a] - hx.dot(&dndx[a]);
        }
        let q: Vector3<f64> = gamma.iter().zip(v).map(|(g_a, v_a)| *g_a * v_a).sum();

        *state += q * (parameters.stiffness * stiffness * parameters.dt);
        let total = *state + q * viscous_coefficient;
        for (f_a, g_a) in forces.iter_mut().zip(&gamma) {
            *f_a -= total * *g_a;
        }
    }
}
