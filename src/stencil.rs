//! Flux stencils: variable-arity connectors between cells (and boundary faces), and their
//! construction by a two-point flux approximation.
use crate::connectivity::{ElementRef, FaceGeometry, FaceManager};
use crate::error::{GeoFemError, Result};
use log::info;
use nalgebra::{Matrix3, Vector3};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::{Display, Formatter};

/// Maximum number of points of a single connector.
pub const MAX_STENCIL_SIZE: usize = 9;

/// A cell, addressed by region, sub-region and index within the sub-region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellDescriptor {
    pub region: usize,
    pub sub_region: usize,
    pub index: usize,
}

impl CellDescriptor {
    pub fn new(region: usize, sub_region: usize, index: usize) -> Self {
        Self {
            region,
            sub_region,
            index,
        }
    }
}

impl From<ElementRef> for CellDescriptor {
    fn from(element: ElementRef) -> Self {
        Self::new(element.region, 0, element.element)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointTag {
    Cell,
    Face,
    Node,
}

impl Display for PointTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cell => write!(f, "cell"),
            Self::Face => write!(f, "face"),
            Self::Node => write!(f, "node"),
        }
    }
}

/// A point of a boundary stencil. For faces and nodes only `index` is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PointDescriptor {
    pub tag: PointTag,
    pub region: usize,
    pub sub_region: usize,
    pub index: usize,
}

impl PointDescriptor {
    pub fn face(index: usize) -> Self {
        Self {
            tag: PointTag::Face,
            region: 0,
            sub_region: 0,
            index,
        }
    }

    pub fn node(index: usize) -> Self {
        Self {
            tag: PointTag::Node,
            region: 0,
            sub_region: 0,
            index,
        }
    }

    pub fn as_cell(&self) -> Option<CellDescriptor> {
        (self.tag == PointTag::Cell).then(|| CellDescriptor::new(self.region, self.sub_region, self.index))
    }
}

impl From<CellDescriptor> for PointDescriptor {
    fn from(cell: CellDescriptor) -> Self {
        Self {
            tag: PointTag::Cell,
            region: cell.region,
            sub_region: cell.sub_region,
            index: cell.index,
        }
    }
}

/// One connector of a stencil.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StencilEntry<'a, P> {
    pub connector_index: usize,
    pub points: &'a [P],
    pub weights: &'a [f64],
}

impl<'a, P> StencilEntry<'a, P> {
    /// The two points whose potential difference drives the flux.
    pub fn connected(&self) -> &'a [P] {
        &self.points[..2]
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Connectors stored contiguously: points and weights of connector `i` occupy
/// `offsets[i]..offsets[i + 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stencil<P> {
    points: Vec<P>,
    weights: Vec<f64>,
    offsets: Vec<usize>,
    connector_indices: Vec<usize>,
    #[serde(skip)]
    connector_map: FxHashMap<usize, usize>,
}

pub type CellStencil = Stencil<CellDescriptor>;
pub type BoundaryStencil = Stencil<PointDescriptor>;

impl<P> Default for Stencil<P> {
    fn default() -> Self {
        Self {
            points: Vec::new(),
            weights: Vec::new(),
            offsets: vec![0],
            connector_indices: Vec::new(),
            connector_map: FxHashMap::default(),
        }
    }
}

impl<P: Copy> Stencil<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves storage for `size` connectors of maximum arity.
    pub fn reserve(&mut self, size: usize) {
        self.points.reserve(size * MAX_STENCIL_SIZE);
        self.weights.reserve(size * MAX_STENCIL_SIZE);
        self.offsets.reserve(size);
        self.connector_indices.reserve(size);
    }

    /// Appends a connector. Adding the same connector index twice makes the later entry the one
    /// returned by [`connector`](Self::connector).
    pub fn add(&mut self, points: &[P], weights: &[f64], connector_index: usize) -> Result<()> {
        let count = points.len();
        if count > MAX_STENCIL_SIZE {
            return Err(GeoFemError::StencilOverflow {
                count,
                max: MAX_STENCIL_SIZE,
            });
        }
        if weights.len() != count {
            return Err(GeoFemError::SizeMismatch {
                context: "stencil add (weights)",
                expected: count,
                actual: weights.len(),
            });
        }
        if count < 2 {
            return Err(GeoFemError::SizeMismatch {
                context: "stencil add (at least two points)",
                expected: 2,
                actual: count,
            });
        }
        self.points.extend_from_slice(points);
        self.weights.extend_from_slice(weights);
        self.offsets.push(self.points.len());
        self.connector_map
            .insert(connector_index, self.connector_indices.len());
        self.connector_indices.push(connector_index);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.connector_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connector_indices.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<StencilEntry<'_, P>> {
        let connector_index = *self.connector_indices.get(i)?;
        let range = self.offsets[i]..self.offsets[i + 1];
        Some(StencilEntry {
            connector_index,
            points: &self.points[range.clone()],
            weights: &self.weights[range],
        })
    }

    /// Looks up the entry of a connector by its connector index.
    pub fn connector(&self, connector_index: usize) -> Option<StencilEntry<'_, P>> {
        let i = match self.connector_map.get(&connector_index) {
            Some(&i) => i,
            // Deserialized stencils carry no lookup table
            None => self
                .connector_indices
                .iter()
                .rposition(|&c| c == connector_index)?,
        };
        self.get(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = StencilEntry<'_, P>> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }
}

/// Cell data needed to compute transmissibilities for one region.
#[derive(Debug, Clone, Copy)]
pub struct CellGeometry<'a> {
    pub centers: &'a [Vector3<f64>],
    pub permeability: &'a [Matrix3<f64>],
}

/// `A |(K n) . d| / |d|^2`, with `d` the vector from the cell center to the face center.
fn half_transmissibility(face: &FaceGeometry, center: &Vector3<f64>, permeability: &Matrix3<f64>) -> f64 {
    let d = face.center - center;
    let d2 = d.norm_squared();
    if d2 == 0.0 {
        return 0.0;
    }
    face.area * (permeability * face.normal).dot(&d).abs() / d2
}

/// Two-point flux approximation: one connector per interior face, and one per boundary face in
/// each named face set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwoPointFluxApproximation {
    cell_stencil: CellStencil,
    boundary_stencils: BTreeMap<String, BoundaryStencil>,
}

impl TwoPointFluxApproximation {
    /// Builds the interior cell stencil. Connector indices are face indices.
    pub fn build(faces: &FaceManager, positions: &[Vector3<f64>], cells: &[CellGeometry]) -> Result<Self> {
        let mut cell_stencil = CellStencil::new();
        cell_stencil.reserve(faces.num_faces());
        for face in 0..faces.num_faces() {
            let elements: Vec<ElementRef> = faces.face_elements(face).collect();
            if elements.len() != 2 {
                continue;
            }
            let geometry = faces.face_geometry(face, positions)?;
            let t0 = Self::element_half_transmissibility(&geometry, elements[0], cells)?;
            let t1 = Self::element_half_transmissibility(&geometry, elements[1], cells)?;
            let t = if t0 + t1 > 0.0 { t0 * t1 / (t0 + t1) } else { 0.0 };
            cell_stencil.add(
                &[CellDescriptor::from(elements[0]), CellDescriptor::from(elements[1])],
                &[t, -t],
                face,
            )?;
        }
        info!("Two-point flux approximation: {} interior connectors", cell_stencil.len());
        Ok(Self {
            cell_stencil,
            boundary_stencils: BTreeMap::new(),
        })
    }

    fn element_half_transmissibility(
        geometry: &FaceGeometry,
        element: ElementRef,
        cells: &[CellGeometry],
    ) -> Result<f64> {
        let region = cells.get(element.region).ok_or(GeoFemError::IndexOutOfBounds {
            context: "two-point flux (region)",
            index: element.region,
            len: cells.len(),
        })?;
        let center = region
            .centers
            .get(element.element)
            .ok_or(GeoFemError::IndexOutOfBounds {
                context: "two-point flux (cell center)",
                index: element.element,
                len: region.centers.len(),
            })?;
        let permeability = region
            .permeability
            .get(element.element)
            .ok_or(GeoFemError::IndexOutOfBounds {
                context: "two-point flux (permeability)",
                index: element.element,
                len: region.permeability.len(),
            })?;
        Ok(half_transmissibility(geometry, center, permeability))
    }

    /// Builds the boundary stencil of a named face set: one `[cell, face]` connector per face
    /// with a single adjacent element, weighted by the cell's half transmissibility.
    pub fn add_boundary_stencil(
        &mut self,
        name: &str,
        face_set: &[usize],
        faces: &FaceManager,
        positions: &[Vector3<f64>],
        cells: &[CellGeometry],
    ) -> Result<()> {
        let mut stencil = BoundaryStencil::new();
        stencil.reserve(face_set.len());
        for &face in face_set {
            if face >= faces.num_faces() {
                return Err(GeoFemError::IndexOutOfBounds {
                    context: "add_boundary_stencil (face set)",
                    index: face,
                    len: faces.num_faces(),
                });
            }
            let elements: Vec<ElementRef> = faces.face_elements(face).collect();
            let &[element] = elements.as_slice() else {
                continue;
            };
            let geometry = faces.face_geometry(face, positions)?;
            let t = Self::element_half_transmissibility(&geometry, element, cells)?;
            stencil.add(
                &[CellDescriptor::from(element).into(), PointDescriptor::face(face)],
                &[t, -t],
                face,
            )?;
        }
        self.boundary_stencils.insert(name.to_string(), stencil);
        Ok(())
    }

    pub fn cell_stencil(&self) -> &CellStencil {
        &self.cell_stencil
    }

    pub fn cell_stencil_mut(&mut self) -> &mut CellStencil {
        &mut self.cell_stencil
    }

    pub fn boundary_stencil(&self, name: &str) -> Option<&BoundaryStencil> {
        self.boundary_stencils.get(name)
    }

    /// Inserts (or replaces) a boundary stencil under the given name.
    pub fn insert_boundary_stencil(&mut self, name: impl Into<String>, stencil: BoundaryStencil) {
        self.boundary_stencils.insert(name.into(), stencil);
    }

    pub fn boundary_stencil_names(&self) -> impl Iterator<Item = &str> {
        self.boundary_stencils.keys().map(String::as_str)
    }
}
