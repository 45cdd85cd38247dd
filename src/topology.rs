//! Element topologies and their fixed lookup tables.
//!
//! The element type tag of a region (e.g. `"C3D8R"`) is parsed exactly once into an
//! [`ElementTopology`]. All per-topology quantities (node counts, face tables, dimension) are
//! then resolved through the enum, never through the tag.
//!
//! Quadrilaterals and hexahedra use tensor (lexicographic) node ordering: node `a` sits at
//! reference coordinate `-1 + 2 * bit_d(a)` along axis `d`. Shell quadrilaterals use
//! counter-clockwise ordering.
use crate::error::{GeoFemError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementTopology {
    /// Two-node line in the plane (`CPE2`).
    Line,
    /// Plane strain triangle (`CPE3`). Has no shape-function implementation.
    PlaneStrainTriangle,
    /// Linear triangle (`STRI`).
    Triangle,
    /// Bilinear quadrilateral (`CPE4`).
    Quadrilateral,
    /// Linear tetrahedron (`C3D4`).
    Tetrahedron,
    /// Five-node pyramid (`C3D5`), treated as a hexahedron with its top face collapsed.
    Pyramid,
    /// Wedge stored as a degenerate eight-node hexahedron (`C3D6`).
    Wedge,
    /// Trilinear hexahedron (`C3D8`).
    Hexahedron,
    /// Four-node shell (`S4R`).
    ShellQuad,
    /// Three-node shell (`TRSH`).
    ShellTriangle,
}

/// Tag prefixes in match order. Longer prefixes sharing a start must come first.
const TAG_TABLE: [(&str, ElementTopology); 10] = [
    ("CPE2", ElementTopology::Line),
    ("CPE3", ElementTopology::PlaneStrainTriangle),
    ("CPE4", ElementTopology::Quadrilateral),
    ("STRI", ElementTopology::Triangle),
    ("C3D4", ElementTopology::Tetrahedron),
    ("C3D5", ElementTopology::Pyramid),
    ("C3D6", ElementTopology::Wedge),
    ("C3D8", ElementTopology::Hexahedron),
    ("S4R", ElementTopology::ShellQuad),
    ("TRSH", ElementTopology::ShellTriangle),
];

const LINE_FACES: &[&[usize]] = &[&[0, 1]];
const TRIANGLE_FACES: &[&[usize]] = &[&[0, 1], &[1, 2], &[2, 0]];
const QUADRILATERAL_FACES: &[&[usize]] = &[&[0, 1], &[1, 3], &[3, 2], &[2, 0]];
const TETRAHEDRON_FACES: &[&[usize]] = &[&[0, 2, 1], &[0, 1, 3], &[0, 3, 2], &[1, 2, 3]];
const PYRAMID_FACES: &[&[usize]] = &[&[0, 2, 3, 1], &[0, 1, 4], &[1, 3, 4], &[3, 2, 4], &[2, 0, 4]];
const WEDGE_FACES: &[&[usize]] = &[&[0, 1, 5, 4], &[0, 2, 3, 1], &[0, 2, 4], &[1, 3, 5], &[2, 3, 5, 4]];
const HEXAHEDRON_FACES: &[&[usize]] = &[
    &[0, 1, 5, 4],
    &[0, 2, 3, 1],
    &[0, 4, 6, 2],
    &[1, 3, 7, 5],
    &[3, 2, 6, 7],
    &[4, 5, 7, 6],
];
const SHELL_QUAD_FACES: &[&[usize]] = &[&[0, 1, 2, 3]];
const SHELL_TRIANGLE_FACES: &[&[usize]] = &[&[0, 1, 2]];

impl ElementTopology {
    /// Parses an element type tag by prefix, e.g. `"C3D8R"` is a hexahedron.
    pub fn from_tag(tag: &str) -> Result<Self> {
        TAG_TABLE
            .iter()
            .find(|(prefix, _)| tag.starts_with(prefix))
            .map(|(_, topology)| *topology)
            .ok_or_else(|| GeoFemError::UnknownTopologyTag { tag: tag.to_string() })
    }

    /// The canonical tag prefix of this topology.
    pub fn tag(&self) -> &'static str {
        TAG_TABLE
            .iter()
            .find(|(_, topology)| topology == self)
            .map(|(prefix, _)| *prefix)
            .unwrap_or("")
    }

    /// Spatial dimension of the region containing this topology.
    pub fn dimension(&self) -> usize {
        use ElementTopology::*;
        match self {
            Line | PlaneStrainTriangle | Triangle | Quadrilateral => 2,
            Tetrahedron | Pyramid | Wedge | Hexahedron | ShellQuad | ShellTriangle => 3,
        }
    }

    /// Dimension of the reference domain.
    pub fn reference_dimension(&self) -> usize {
        use ElementTopology::*;
        match self {
            Line => 1,
            PlaneStrainTriangle | Triangle | Quadrilateral | ShellQuad | ShellTriangle => 2,
            Tetrahedron | Pyramid | Wedge | Hexahedron => 3,
        }
    }

    pub fn num_nodes(&self) -> usize {
        use ElementTopology::*;
        match self {
            Line => 2,
            PlaneStrainTriangle | Triangle | ShellTriangle => 3,
            Quadrilateral | Tetrahedron | ShellQuad => 4,
            Pyramid => 5,
            Wedge | Hexahedron => 8,
        }
    }

    pub fn num_faces(&self) -> usize {
        self.face_table().len()
    }

    /// Nodes of the largest face. Triangular faces of wedges and pyramids have fewer.
    pub fn num_nodes_per_face(&self) -> usize {
        self.face_table()
            .iter()
            .map(|face| face.len())
            .max()
            .unwrap_or(0)
    }

    /// Local node indices of the given local face.
    pub fn local_face_nodes(&self, local_face: usize) -> Result<&'static [usize]> {
        let table = self.face_table();
        table
            .get(local_face)
            .copied()
            .ok_or(GeoFemError::IndexOutOfBounds {
                context: "local_face_nodes",
                index: local_face,
                len: table.len(),
            })
    }

    fn face_table(&self) -> &'static [&'static [usize]] {
        use ElementTopology::*;
        match self {
            Line => LINE_FACES,
            PlaneStrainTriangle | Triangle => TRIANGLE_FACES,
            Quadrilateral => QUADRILATERAL_FACES,
            Tetrahedron => TETRAHEDRON_FACES,
            Pyramid => PYRAMID_FACES,
            Wedge => WEDGE_FACES,
            Hexahedron => HEXAHEDRON_FACES,
            ShellQuad => SHELL_QUAD_FACES,
            ShellTriangle => SHELL_TRIANGLE_FACES,
        }
    }
}

impl fmt::Display for ElementTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.tag())
    }
}
