//! Shape-function and quadrature evaluation for the supported element formulations.
//!
//! A [`FiniteElement`] is built once per region from `(topology, formulation, basis order,
//! quadrature order)`. It caches basis values and reference gradients at every quadrature point,
//! so that [`FiniteElement::reinit`] only has to form the Jacobian of each point.
use crate::error::{GeoFemError, Result};
use crate::topology::ElementTopology;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod basis;
mod hourglass;

pub use basis::ReferenceBasis;
pub use hourglass::HourglassParameters;

/// Integration scheme of an element region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Formulation {
    /// Full Gauss tensor-product quadrature.
    #[serde(rename = "poly")]
    Poly,
    /// One-point reduced integration with hourglass control.
    #[serde(rename = "uniformstrain")]
    UniformStrain,
    /// Simplex and line elements.
    #[serde(rename = "linear")]
    Linear,
    /// Shell elements that only carry flow, integrated at a single point.
    #[serde(rename = "flow_only")]
    FlowOnly,
}

impl fmt::Display for Formulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Poly => "poly",
            Self::UniformStrain => "uniformstrain",
            Self::Linear => "linear",
            Self::FlowOnly => "flow_only",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone)]
pub struct FiniteElement {
    topology: ElementTopology,
    formulation: Formulation,
    basis: ReferenceBasis,
    weights: Vec<f64>,
    points: Vec<Vector3<f64>>,
    /// Basis values, `num_nodes` per quadrature point.
    values: Vec<f64>,
    /// Reference basis gradients, `num_nodes` per quadrature point.
    reference_gradients: Vec<Vector3<f64>>,
    /// Hourglass base vectors, `num_nodes` per zero-energy mode.
    hourglass_base: Vec<f64>,
    zero_energy_modes: usize,
}

fn unsupported(
    topology: ElementTopology,
    formulation: Formulation,
    reason: impl Into<String>,
) -> GeoFemError {
    GeoFemError::UnsupportedElementConfiguration {
        topology: topology.to_string(),
        formulation: formulation.to_string(),
        reason: reason.into(),
    }
}

fn pad<const D: usize>(point: &[f64; D]) -> Vector3<f64> {
    let mut padded = Vector3::zeros();
    for (i, x) in point.iter().enumerate() {
        padded[i] = *x;
    }
    padded
}

fn padded_rule<const D: usize>(rule: geofem_quadrature::Rule<D>) -> (Vec<f64>, Vec<Vector3<f64>>) {
    let (weights, points) = rule;
    (weights, points.iter().map(pad).collect())
}

impl FiniteElement {
    pub fn new(
        topology: ElementTopology,
        formulation: Formulation,
        basis_order: usize,
        quadrature_order: usize,
    ) -> Result<Self> {
        use ElementTopology::*;
        use Formulation::*;

        if basis_order != 1 {
            return Err(unsupported(
                topology,
                formulation,
                format!("basis order {basis_order} is not supported, only order 1 is"),
            ));
        }
        let basis = ReferenceBasis::for_topology(topology).ok_or_else(|| {
            unsupported(topology, formulation, "no shape functions for this topology")
        })?;

        let quadrature_error = |err: geofem_quadrature::Error| {
            unsupported(topology, formulation, format!("quadrature: {err}"))
        };
        let require_order = || {
            if quadrature_order >= 1 {
                Ok(quadrature_order)
            } else {
                Err(unsupported(topology, formulation, "quadrature order must be at least 1"))
            }
        };

        let (weights, points, zero_energy_modes) = match (topology, formulation) {
            (Quadrilateral, Poly) => {
                let rule = geofem_quadrature::tensor::quadrilateral_gauss(require_order()?)
                    .map_err(quadrature_error)?;
                let (w, p) = padded_rule(rule);
                (w, p, 0)
            }
            (Hexahedron | Wedge | Pyramid, Poly) => {
                let rule = geofem_quadrature::tensor::hexahedron_gauss(require_order()?)
                    .map_err(quadrature_error)?;
                let (w, p) = padded_rule(rule);
                (w, p, 0)
            }
            (Quadrilateral, UniformStrain) => (vec![4.0], vec![Vector3::zeros()], 1),
            (Hexahedron | Wedge, UniformStrain) => (vec![8.0], vec![Vector3::zeros()], 4),
            (Triangle, Linear) => {
                let rule = geofem_quadrature::simplex::triangle(1).map_err(quadrature_error)?;
                let (w, p) = padded_rule(rule);
                (w, p, 0)
            }
            (Tetrahedron, Linear) => {
                let rule = geofem_quadrature::simplex::tetrahedron(1).map_err(quadrature_error)?;
                let (w, p) = padded_rule(rule);
                (w, p, 0)
            }
            (Line, Linear) => {
                let rule = geofem_quadrature::univariate::gauss(require_order()?)
                    .map_err(quadrature_error)?;
                let (w, p) = padded_rule(rule);
                (w, p, 0)
            }
            (ShellQuad, FlowOnly) => (vec![4.0], vec![Vector3::zeros()], 0),
            (ShellTriangle, FlowOnly) => {
                (vec![0.5], vec![Vector3::new(1.0 / 3.0, 1.0 / 3.0, 0.0)], 0)
            }
            _ => {
                return Err(unsupported(
                    topology,
                    formulation,
                    "no implementation for this combination",
                ))
            }
        };

        let num_nodes = topology.num_nodes();
        debug_assert_eq!(num_nodes, basis.num_nodes());
        let mut values = vec![0.0; points.len() * num_nodes];
        let mut reference_gradients = vec![Vector3::zeros(); points.len() * num_nodes];
        for (q, xi) in points.iter().enumerate() {
            let range = q * num_nodes..(q + 1) * num_nodes;
            basis.populate(xi, &mut values[range.clone()], &mut reference_gradients[range]);
        }

        let hourglass_base = hourglass::base_vectors(&basis, zero_energy_modes);

        Ok(Self {
            topology,
            formulation,
            basis,
            weights,
            points,
            values,
            reference_gradients,
            hourglass_base,
            zero_energy_modes,
        })
    }

    pub fn topology(&self) -> ElementTopology {
        self.topology
    }

    pub fn formulation(&self) -> Formulation {
        self.formulation
    }

    pub fn basis(&self) -> &ReferenceBasis {
        &self.basis
    }

    pub fn num_nodes(&self) -> usize {
        self.topology.num_nodes()
    }

    pub fn num_quadrature_points(&self) -> usize {
        self.weights.len()
    }

    pub fn zero_energy_modes(&self) -> usize {
        self.zero_energy_modes
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn quadrature_points(&self) -> &[Vector3<f64>] {
        &self.points
    }

    /// Basis values of all nodes at quadrature point `q`.
    pub fn shape_values(&self, q: usize) -> &[f64] {
        let n = self.num_nodes();
        &self.values[q * n..(q + 1) * n]
    }

    /// Reference basis gradients of all nodes at quadrature point `q`.
    pub fn reference_gradients(&self, q: usize) -> &[Vector3<f64>] {
        let n = self.num_nodes();
        &self.reference_gradients[q * n..(q + 1) * n]
    }

    /// Computes the weighted Jacobian determinant and the spatial shape-function gradients at
    /// every quadrature point of an element with node positions `x`.
    ///
    /// `det_j` has one entry per quadrature point and `dndx` has `num_nodes` entries per
    /// quadrature point. When the reference dimension matches the spatial dimension the signed
    /// determinant is used and a non-positive value is reported as
    /// [`GeoFemError::InvertedElement`]. Lower dimensional elements (lines in 2D, shells) use the
    /// metric `sqrt(det(J^T J))` and the pseudo-inverse of the Jacobian.
    pub fn reinit(
        &self,
        element: usize,
        x: &[Vector3<f64>],
        det_j: &mut [f64],
        dndx: &mut [Vector3<f64>],
    ) -> Result<()> {
        let n = self.num_nodes();
        let nq = self.num_quadrature_points();
        crate::error::check_len("reinit (node positions)", n, x.len())?;
        crate::error::check_len("reinit (detJ)", nq, det_j.len())?;
        crate::error::check_len("reinit (dNdX)", nq * n, dndx.len())?;

        let ref_dim = self.topology.reference_dimension();
        let spatial_dim = self.topology.dimension();

        for q in 0..nq {
            let gradients = self.reference_gradients(q);
            let mut jacobian = Matrix3::zeros();
            for (x_a, g_a) in x.iter().zip(gradients) {
                jacobian += x_a * g_a.transpose();
            }
            // Unused reference directions are completed with the identity so that all
            // dimensions share the 3x3 code path.
            if ref_dim == spatial_dim {
                for k in ref_dim..3 {
                    jacobian[(k, k)] = 1.0;
                }
            }

            let out = &mut dndx[q * n..(q + 1) * n];
            let (det, gradient_map) = if ref_dim == spatial_dim {
                let det = jacobian.determinant();
                let inverse = if det > 0.0 { jacobian.try_inverse() } else { None };
                match inverse {
                    Some(inverse) => (det, inverse.transpose()),
                    None => {
                        return Err(GeoFemError::InvertedElement {
                            element,
                            point: q,
                            det_j: det,
                        })
                    }
                }
            } else {
                let mut metric = jacobian.transpose() * jacobian;
                for k in ref_dim..3 {
                    metric[(k, k)] = 1.0;
                }
                let metric_det = metric.determinant();
                let inverse = if metric_det > 0.0 { metric.try_inverse() } else { None };
                match inverse {
                    Some(inverse) => (metric_det.sqrt(), jacobian * inverse),
                    None => {
                        return Err(GeoFemError::InvertedElement {
                            element,
                            point: q,
                            det_j: metric_det.max(0.0).sqrt(),
                        })
                    }
                }
            };

            det_j[q] = det * self.weights[q];
            for (dndx_a, g_a) in out.iter_mut().zip(gradients) {
                *dndx_a = gradient_map * g_a;
            }
        }
        Ok(())
    }

    /// Hourglass base vector of mode `mode`, one entry per node.
    pub fn hourglass_base(&self, mode: usize) -> &[f64] {
        let n = self.num_nodes();
        &self.hourglass_base[mode * n..(mode + 1) * n]
    }

    /// Flanagan–Belytschko hourglass control of a uniform-strain element.
    ///
    /// `dndx` are the current spatial gradients at the single integration point, `x` the current
    /// node positions and `v` the node velocities. The stiffness part is accumulated into
    /// `mode_state` (one vector per zero-energy mode); the resulting forces are added to `forces`.
    pub fn zero_energy_mode_control(
        &self,
        dndx: &[Vector3<f64>],
        volume: f64,
        x: &[Vector3<f64>],
        v: &[Vector3<f64>],
        parameters: &HourglassParameters,
        mode_state: &mut [Vector3<f64>],
        forces: &mut [Vector3<f64>],
    ) -> Result<()> {
        let n = self.num_nodes();
        crate::error::check_len("zero_energy_mode_control (dNdx)", n, dndx.len())?;
        crate::error::check_len("zero_energy_mode_control (positions)", n, x.len())?;
        crate::error::check_len("zero_energy_mode_control (velocities)", n, v.len())?;
        crate::error::check_len("zero_energy_mode_control (forces)", n, forces.len())?;
        crate::error::check_len(
            "zero_energy_mode_control (mode state)",
            self.zero_energy_modes,
            mode_state.len(),
        )?;
        hourglass::apply(
            self,
            self.topology.reference_dimension(),
            dndx,
            volume,
            x,
            v,
            parameters,
            mode_state,
            forces,
        );
        Ok(())
    }
}
