//! Tensor-product Gauss rules for `[-1, 1]^D`.

use crate::univariate::gauss;
use crate::{Error, Point, Rule};

/// Gauss rule for `[-1, 1]^D` with `num_points_per_dim` points along each axis.
///
/// Points are ordered lexicographically with the first coordinate varying slowest.
pub fn tensor_gauss<const D: usize>(num_points_per_dim: usize) -> Result<Rule<D>, Error> {
    let (weights_1d, points_1d) = gauss(num_points_per_dim)?;
    let n = num_points_per_dim;
    let total = n.pow(D as u32);

    let mut weights = Vec::with_capacity(total);
    let mut points = Vec::with_capacity(total);
    let mut multi_index = [0usize; D];
    for _ in 0..total {
        let mut w = 1.0;
        let mut x: Point<D> = [0.0; D];
        for (d, &i) in multi_index.iter().enumerate() {
            w *= weights_1d[i];
            x[d] = points_1d[i][0];
        }
        weights.push(w);
        points.push(x);

        // Advance the multi-index, last axis fastest
        for d in (0..D).rev() {
            multi_index[d] += 1;
            if multi_index[d] < n {
                break;
            }
            multi_index[d] = 0;
        }
    }

    Ok((weights, points))
}

pub fn quadrilateral_gauss(num_points_per_dim: usize) -> Result<Rule<2>, Error> {
    tensor_gauss::<2>(num_points_per_dim)
}

pub fn hexahedron_gauss(num_points_per_dim: usize) -> Result<Rule<3>, Error> {
    tensor_gauss::<3>(num_points_per_dim)
}
