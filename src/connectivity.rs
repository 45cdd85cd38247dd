//! Face connectivity shared between element regions.
use crate::error::{GeoFemError, Result};
use crate::topology::ElementTopology;
use nalgebra::Vector3;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// An element of a given region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementRef {
    pub region: usize,
    pub element: usize,
}

/// Element to node connectivity of one region, `topology.num_nodes()` entries per element.
#[derive(Debug, Clone, Copy)]
pub struct RegionConnectivity<'a> {
    pub topology: ElementTopology,
    pub element_nodes: &'a [usize],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceGeometry {
    pub center: Vector3<f64>,
    pub area: f64,
    /// Unit normal, oriented away from the first element of the face.
    pub normal: Vector3<f64>,
}

/// Faces of all regions, deduplicated by their node sets.
///
/// A face is shared by at most two elements. The element order is the order in which the
/// regions and their elements were visited, so the first element is the one the face normal
/// points away from.
#[derive(Debug, Clone, Default)]
pub struct FaceManager {
    face_node_offsets: Vec<usize>,
    face_nodes: Vec<usize>,
    face_elements: Vec<[Option<ElementRef>; 2]>,
    boundary: Vec<bool>,
    /// Per region, `faces_per_element` face indices per element.
    element_faces: Vec<Vec<usize>>,
}

impl FaceManager {
    pub fn build(regions: &[RegionConnectivity]) -> Result<Self> {
        let mut manager = Self {
            face_node_offsets: vec![0],
            ..Default::default()
        };
        let mut lookup: FxHashMap<Vec<usize>, usize> = FxHashMap::default();

        for (region_idx, region) in regions.iter().enumerate() {
            let nodes_per_element = region.topology.num_nodes();
            if nodes_per_element == 0 || region.element_nodes.len() % nodes_per_element != 0 {
                return Err(GeoFemError::SizeMismatch {
                    context: "FaceManager::build (element nodes)",
                    expected: nodes_per_element,
                    actual: region.element_nodes.len(),
                });
            }
            let faces_per_element = region.topology.num_faces();
            let num_elements = region.element_nodes.len() / nodes_per_element;
            let mut element_faces = Vec::with_capacity(num_elements * faces_per_element);

            for (element_idx, nodes) in region.element_nodes.chunks_exact(nodes_per_element).enumerate() {
                let element = ElementRef {
                    region: region_idx,
                    element: element_idx,
                };
                for local_face in 0..faces_per_element {
                    let face_nodes: Vec<usize> = region
                        .topology
                        .local_face_nodes(local_face)?
                        .iter()
                        .map(|&local| nodes[local])
                        .collect();
                    let mut key = face_nodes.clone();
                    key.sort_unstable();
                    key.dedup();

                    let face = *lookup.entry(key).or_insert_with(|| {
                        manager.face_nodes.extend_from_slice(&face_nodes);
                        manager.face_node_offsets.push(manager.face_nodes.len());
                        manager.face_elements.push([None, None]);
                        manager.face_elements.len() - 1
                    });
                    let slots = &mut manager.face_elements[face];
                    let free_slot = slots
                        .iter_mut()
                        .find(|slot| slot.is_none())
                        .ok_or(GeoFemError::IndexOutOfBounds {
                            context: "FaceManager::build (elements per face)",
                            index: 2,
                            len: 2,
                        })?;
                    *free_slot = Some(element);
                    element_faces.push(face);
                }
            }
            manager.element_faces.push(element_faces);
        }

        manager.boundary = manager
            .face_elements
            .iter()
            .map(|slots| slots[1].is_none())
            .collect();
        Ok(manager)
    }

    pub fn num_faces(&self) -> usize {
        self.face_elements.len()
    }

    pub fn face_nodes(&self, face: usize) -> &[usize] {
        &self.face_nodes[self.face_node_offsets[face]..self.face_node_offsets[face + 1]]
    }

    /// The elements sharing `face`, first element first.
    pub fn face_elements(&self, face: usize) -> impl Iterator<Item = ElementRef> + '_ {
        self.face_elements[face].iter().flatten().copied()
    }

    pub fn is_domain_boundary(&self, face: usize) -> bool {
        self.boundary[face]
    }

    pub fn boundary_faces(&self) -> impl Iterator<Item = usize> + '_ {
        self.boundary
            .iter()
            .enumerate()
            .filter_map(|(face, &on_boundary)| on_boundary.then_some(face))
    }

    /// Face indices of every element of region `region`, `faces_per_element` entries each.
    pub fn element_faces(&self, region: usize) -> &[usize] {
        self.element_faces
            .get(region)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Center, area and unit normal of a face.
    ///
    /// Faces with two nodes are edges of planar elements: the area is their length and the
    /// normal lies in the xy-plane. Larger faces are fan-triangulated about their center.
    pub fn face_geometry(&self, face: usize, positions: &[Vector3<f64>]) -> Result<FaceGeometry> {
        let nodes = self.face_nodes(face);
        let mut x = Vec::with_capacity(nodes.len());
        for &node in nodes {
            let p = positions.get(node).ok_or(GeoFemError::IndexOutOfBounds {
                context: "face_geometry",
                index: node,
                len: positions.len(),
            })?;
            x.push(*p);
        }
        let center = x.iter().sum::<Vector3<f64>>() / x.len() as f64;

        let area_vector = if x.len() == 2 {
            let t = x[1] - x[0];
            Vector3::new(t.y, -t.x, 0.0)
        } else {
            let mut area_vector = Vector3::zeros();
            for i in 0..x.len() {
                let a = x[i] - center;
                let b = x[(i + 1) % x.len()] - center;
                area_vector += 0.5 * a.cross(&b);
            }
            area_vector
        };
        let area = area_vector.norm();
        let normal = if area > 0.0 {
            area_vector / area
        } else {
            Vector3::zeros()
        };
        Ok(FaceGeometry { center, area, normal })
    }
}
