//! Pointwise kinematic relations shared by the region kernels.
use crate::error::{GeoFemError, Result};
use nalgebra::{Matrix3, Vector3};

/// `sum_a u_a (dN_a/dX)^T`.
pub fn gradient(values: &[Vector3<f64>], dndx: &[Vector3<f64>]) -> Matrix3<f64> {
    values
        .iter()
        .zip(dndx)
        .fold(Matrix3::zeros(), |acc, (u_a, g_a)| acc + u_a * g_a.transpose())
}

/// Incremental rate of deformation and rotation from the incremental velocity gradient `a`
/// (Hughes–Winget): `D = sym(A)`, `R = (I - W/2)^-1 (I + W/2)` with `W = skew(A)`.
pub fn incremental_kinematics(a: &Matrix3<f64>) -> Result<(Matrix3<f64>, Matrix3<f64>)> {
    let dadt = a.symmetric_part();
    let w = (a - a.transpose()) * 0.5;
    let identity = Matrix3::identity();
    let lhs = identity - w * 0.5;
    let rot = lhs
        .try_inverse()
        .map(|inverse| inverse * (identity + w * 0.5))
        .ok_or(GeoFemError::SingularMatrix {
            context: "incremental_kinematics",
        })?;
    Ok((dadt, rot))
}

/// Adds the internal forces of one integration point: with `P = sigma F^-T detJ detF`,
/// `f_a -= P dN_a/dX`.
pub fn add_element_residual(
    stress: &Matrix3<f64>,
    dndx: &[Vector3<f64>],
    det_j: f64,
    det_f: f64,
    finv: &Matrix3<f64>,
    forces: &mut [Vector3<f64>],
) {
    let p = stress * finv.transpose() * (det_j * det_f);
    for (f_a, g_a) in forces.iter_mut().zip(dndx) {
        *f_a -= p * g_a;
    }
}
