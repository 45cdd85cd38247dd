use crate::element::basis::tensor_node_sign;
use ::proptest::prelude::*;
use nalgebra::{Matrix3, Vector3};

pub fn point3() -> impl Strategy<Value = Vector3<f64>> {
    // Small coordinates, so that derived volumes stay well-conditioned
    let range = -10.0..10.0;
    [range.clone(), range.clone(), range].prop_map(|[x, y, z]| Vector3::new(x, y, z))
}

/// A matrix `s (I + E)` with `|E_ij| < 0.3` and `s` in `[0.1, 5]`.
///
/// Every row of `I + E` is strictly diagonally dominant, so the determinant is positive.
pub fn orientation_preserving_matrix() -> impl Strategy<Value = Matrix3<f64>> {
    let entry = -0.3..0.3;
    (proptest::array::uniform9(entry), 0.1..5.0).prop_map(|(entries, scale)| {
        scale * (Matrix3::identity() + Matrix3::from_row_slice(&entries))
    })
}

/// Node positions of a non-inverted, affinely mapped hexahedron in tensor node order.
pub fn affine_hexahedron() -> impl Strategy<Value = [Vector3<f64>; 8]> {
    (orientation_preserving_matrix(), point3()).prop_map(|(a, translation)| {
        let mut nodes = [Vector3::zeros(); 8];
        for (node, x) in nodes.iter_mut().enumerate() {
            let xi = Vector3::new(
                tensor_node_sign(node, 0),
                tensor_node_sign(node, 1),
                tensor_node_sign(node, 2),
            );
            *x = translation + a * xi;
        }
        nodes
    })
}

/// Vertices of a positively oriented tetrahedron.
pub fn tetrahedron() -> impl Strategy<Value = [Vector3<f64>; 4]> {
    (orientation_preserving_matrix(), point3()).prop_map(|(a, origin)| {
        [
            origin,
            origin + a.column(0),
            origin + a.column(1),
            origin + a.column(2),
        ]
    })
}

pub fn pressure() -> impl Strategy<Value = f64> {
    -1.0e7..1.0e7
}
