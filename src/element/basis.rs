//! Reference Lagrange bases of polynomial degree one.
use crate::topology::ElementTopology;
use nalgebra::Vector3;

/// A reference basis, evaluated at reference coordinates `xi` (only the first
/// `reference_dimension` components are used).
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceBasis {
    /// Two nodes on `[-1, 1]`.
    Segment2,
    /// Unit right triangle, vertices `(0, 0), (1, 0), (0, 1)`.
    Triangle3,
    /// Bilinear on `[-1, 1]^2`, tensor node ordering.
    Quad4,
    /// Bilinear on `[-1, 1]^2`, counter-clockwise node ordering.
    Quad4CounterClockwise,
    /// Unit right tetrahedron, vertex 0 at the origin.
    Tetrahedron4,
    /// Trilinear on `[-1, 1]^3`, tensor node ordering. `node_map[slot]` is the element node
    /// that the hexahedron corner `slot` maps to, so collapsed shapes reuse the same basis.
    Hexahedron8 { node_map: [usize; 8] },
}

/// Sign of the reference coordinate of tensor-ordered node `a` along axis `d`.
pub fn tensor_node_sign(a: usize, d: usize) -> f64 {
    if (a >> d) & 1 == 1 {
        1.0
    } else {
        -1.0
    }
}

const QUAD_CCW_CORNERS: [[f64; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]];

impl ReferenceBasis {
    pub fn for_topology(topology: ElementTopology) -> Option<Self> {
        use ElementTopology::*;
        match topology {
            Line => Some(Self::Segment2),
            Triangle | ShellTriangle => Some(Self::Triangle3),
            Quadrilateral => Some(Self::Quad4),
            ShellQuad => Some(Self::Quad4CounterClockwise),
            Tetrahedron => Some(Self::Tetrahedron4),
            Hexahedron | Wedge => Some(Self::Hexahedron8 {
                node_map: [0, 1, 2, 3, 4, 5, 6, 7],
            }),
            Pyramid => Some(Self::Hexahedron8 {
                node_map: [0, 1, 2, 3, 4, 4, 4, 4],
            }),
            PlaneStrainTriangle => None,
        }
    }

    pub fn reference_dimension(&self) -> usize {
        match self {
            Self::Segment2 => 1,
            Self::Triangle3 | Self::Quad4 | Self::Quad4CounterClockwise => 2,
            Self::Tetrahedron4 | Self::Hexahedron8 { .. } => 3,
        }
    }

    /// Number of element nodes the basis is defined over.
    pub fn num_nodes(&self) -> usize {
        match self {
            Self::Segment2 => 2,
            Self::Triangle3 => 3,
            Self::Quad4 | Self::Quad4CounterClockwise | Self::Tetrahedron4 => 4,
            Self::Hexahedron8 { node_map } => node_map.iter().max().map(|n| n + 1).unwrap_or(0),
        }
    }

    /// Populates basis values and reference gradients at `xi`.
    ///
    /// Both output slices must have length `num_nodes()`. Gradient components beyond the
    /// reference dimension are zero.
    pub fn populate(&self, xi: &Vector3<f64>, values: &mut [f64], gradients: &mut [Vector3<f64>]) {
        debug_assert_eq!(values.len(), self.num_nodes());
        debug_assert_eq!(gradients.len(), self.num_nodes());
        let (x, y, z) = (xi.x, xi.y, xi.z);
        match self {
            Self::Segment2 => {
                values[0] = 0.5 * (1.0 - x);
                values[1] = 0.5 * (1.0 + x);
                gradients[0] = Vector3::new(-0.5, 0.0, 0.0);
                gradients[1] = Vector3::new(0.5, 0.0, 0.0);
            }
            Self::Triangle3 => {
                values[0] = 1.0 - x - y;
                values[1] = x;
                values[2] = y;
                gradients[0] = Vector3::new(-1.0, -1.0, 0.0);
                gradients[1] = Vector3::new(1.0, 0.0, 0.0);
                gradients[2] = Vector3::new(0.0, 1.0, 0.0);
            }
            Self::Quad4 => {
                for a in 0..4 {
                    let (sx, sy) = (tensor_node_sign(a, 0), tensor_node_sign(a, 1));
                    values[a] = 0.25 * (1.0 + sx * x) * (1.0 + sy * y);
                    gradients[a] = Vector3::new(0.25 * sx * (1.0 + sy * y), 0.25 * sy * (1.0 + sx * x), 0.0);
                }
            }
            Self::Quad4CounterClockwise => {
                for (a, [sx, sy]) in QUAD_CCW_CORNERS.iter().enumerate() {
                    values[a] = 0.25 * (1.0 + sx * x) * (1.0 + sy * y);
                    gradients[a] = Vector3::new(0.25 * sx * (1.0 + sy * y), 0.25 * sy * (1.0 + sx * x), 0.0);
                }
            }
            Self::Tetrahedron4 => {
                values[0] = 1.0 - x - y - z;
                values[1] = x;
                values[2] = y;
                values[3] = z;
                gradients[0] = Vector3::new(-1.0, -1.0, -1.0);
                gradients[1] = Vector3::new(1.0, 0.0, 0.0);
                gradients[2] = Vector3::new(0.0, 1.0, 0.0);
                gradients[3] = Vector3::new(0.0, 0.0, 1.0);
            }
            Self::Hexahedron8 { node_map } => {
                values.iter_mut().for_each(|v| *v = 0.0);
                gradients.iter_mut().for_each(|g| *g = Vector3::zeros());
                for (slot, &node) in node_map.iter().enumerate() {
                    let s = Vector3::new(
                        tensor_node_sign(slot, 0),
                        tensor_node_sign(slot, 1),
                        tensor_node_sign(slot, 2),
                    );
                    let fx = 1.0 + s.x * x;
                    let fy = 1.0 + s.y * y;
                    let fz = 1.0 + s.z * z;
                    values[node] += 0.125 * fx * fy * fz;
                    gradients[node] += Vector3::new(
                        0.125 * s.x * fy * fz,
                        0.125 * s.y * fx * fz,
                        0.125 * s.z * fx * fy,
                    );
                }
            }
        }
    }
}
