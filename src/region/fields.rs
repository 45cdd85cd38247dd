//! Name to array mapping of element region state, used for ghost exchange and snapshots.
use super::{ElementRegion, STRESS_COMPONENTS};
use crate::error::{check_len, GeoFemError, Result};
use crate::ghost::{FieldData, GhostMessage, NamedField};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A snapshot of every named field of a region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionFields {
    pub fields: BTreeMap<String, FieldData>,
}

impl RegionFields {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

const ELEMENT_REAL_FIELDS: [&str; 5] = ["volume", "volume_n", "mass", "density", "pressure"];
const POINT_REAL_FIELDS: [&str; 3] = ["detJ", "detJ_n", "detJ_np1"];
const POINT_TENSOR_FIELDS: [&str; 4] = ["dUdX", "Finv", "Rot", "Dadt"];
const HOURGLASS_FIELDS: [&str; 4] = ["Qhg1", "Qhg2", "Qhg3", "Qhg4"];

fn to_integers(values: &[usize]) -> Vec<i64> {
    values.iter().map(|&v| v as i64).collect()
}

fn from_integers(name: &str, values: &[i64]) -> Result<Vec<usize>> {
    values
        .iter()
        .map(|&v| {
            usize::try_from(v).map_err(|_| GeoFemError::Communication {
                reason: format!("field {name} holds negative index {v}"),
            })
        })
        .collect()
}

fn expect_len(name: &str, expected: usize, data: &FieldData) -> Result<()> {
    if data.len() == expected {
        Ok(())
    } else {
        Err(GeoFemError::Communication {
            reason: format!("field {name} has {} entries, expected {expected}", data.len()),
        })
    }
}

fn kind_mismatch(name: &str, expected: &str, data: &FieldData) -> GeoFemError {
    GeoFemError::Communication {
        reason: format!("field {name} is a {expected} field, got {} data", data.kind()),
    }
}

impl ElementRegion {
    /// Names of every field of the region.
    pub fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = ELEMENT_REAL_FIELDS
            .iter()
            .chain(STRESS_COMPONENTS.iter())
            .chain(["ghostRank", "globalIndex", "isDomainBoundary", "toNodes", "toFaces", "deviatorStress"].iter())
            .chain(POINT_REAL_FIELDS.iter())
            .chain(POINT_TENSOR_FIELDS.iter())
            .chain(["dNdX"].iter())
            .map(|name| name.to_string())
            .collect();
        names.extend(HOURGLASS_FIELDS.iter().take(self.zero_energy_modes()).map(|name| name.to_string()));
        names
    }

    /// Number of consecutive entries a field holds per element.
    pub fn field_stride(&self, name: &str) -> Result<usize> {
        let p = self.num_points;
        Ok(match name {
            "toNodes" => self.nodes_per_element,
            "toFaces" => self.faces_per_element,
            "dNdX" => p * self.nodes_per_element,
            _ if POINT_REAL_FIELDS.contains(&name) || POINT_TENSOR_FIELDS.contains(&name) => p,
            _ if self.field_names().iter().any(|n| n == name) => 1,
            _ => return Err(GeoFemError::MissingField { name: name.to_string() }),
        })
    }

    /// A copy of the named field.
    pub fn field(&self, name: &str) -> Result<FieldData> {
        let modes = self.zero_energy_modes();
        Ok(match name {
            "volume" => FieldData::Real(self.volume.clone()),
            "volume_n" => FieldData::Real(self.volume_n.clone()),
            "mass" => FieldData::Real(self.mass.clone()),
            "density" => FieldData::Real(self.density.clone()),
            "pressure" => FieldData::Real(self.pressure.clone()),
            "ghostRank" => FieldData::Integer(self.ghost_rank.clone()),
            "globalIndex" => FieldData::Integer(self.global_index.clone()),
            "isDomainBoundary" => FieldData::Integer(self.domain_boundary.iter().map(|&b| b as i64).collect()),
            "toNodes" => FieldData::Integer(to_integers(&self.element_nodes)),
            "toFaces" => FieldData::Integer(to_integers(&self.element_faces)),
            "deviatorStress" => FieldData::Tensor(self.deviator_stress.clone()),
            "detJ" => FieldData::Real(self.det_j.clone()),
            "detJ_n" => FieldData::Real(self.det_j_n.clone()),
            "detJ_np1" => FieldData::Real(self.det_j_np1.clone()),
            "dUdX" => FieldData::Tensor(self.dudx.clone()),
            "Finv" => FieldData::Tensor(self.finv.clone()),
            "Rot" => FieldData::Tensor(self.rot.clone()),
            "Dadt" => FieldData::Tensor(self.dadt.clone()),
            "dNdX" => FieldData::Vector(self.dndx.clone()),
            _ => {
                if let Some(c) = STRESS_COMPONENTS.iter().position(|&n| n == name) {
                    FieldData::Real(self.stress_components[c].clone())
                } else if let Some(m) = HOURGLASS_FIELDS.iter().take(modes).position(|&n| n == name) {
                    FieldData::Vector(self.hourglass_state.iter().skip(m).step_by(modes).copied().collect())
                } else {
                    return Err(GeoFemError::MissingField { name: name.to_string() });
                }
            }
        })
    }

    /// Overwrites the named field. The data must have the field's kind and length.
    pub fn set_field(&mut self, name: &str, data: &FieldData) -> Result<()> {
        let expected = self.field_stride(name)? * self.num_elements;
        expect_len(name, expected, data)?;
        let modes = self.zero_energy_modes();

        fn assign<T: Clone>(target: &mut Vec<T>, source: &[T]) {
            target.clear();
            target.extend_from_slice(source);
        }

        match (name, data) {
            ("volume", FieldData::Real(v)) => assign(&mut self.volume, v),
            ("volume_n", FieldData::Real(v)) => assign(&mut self.volume_n, v),
            ("mass", FieldData::Real(v)) => assign(&mut self.mass, v),
            ("density", FieldData::Real(v)) => assign(&mut self.density, v),
            ("pressure", FieldData::Real(v)) => assign(&mut self.pressure, v),
            ("ghostRank", FieldData::Integer(v)) => assign(&mut self.ghost_rank, v),
            ("globalIndex", FieldData::Integer(v)) => assign(&mut self.global_index, v),
            ("isDomainBoundary", FieldData::Integer(v)) => {
                self.domain_boundary = v.iter().map(|&flag| flag != 0).collect()
            }
            ("toNodes", FieldData::Integer(v)) => self.element_nodes = from_integers(name, v)?,
            ("toFaces", FieldData::Integer(v)) => self.element_faces = from_integers(name, v)?,
            ("deviatorStress", FieldData::Tensor(v)) => assign(&mut self.deviator_stress, v),
            ("detJ", FieldData::Real(v)) => assign(&mut self.det_j, v),
            ("detJ_n", FieldData::Real(v)) => assign(&mut self.det_j_n, v),
            ("detJ_np1", FieldData::Real(v)) => assign(&mut self.det_j_np1, v),
            ("dUdX", FieldData::Tensor(v)) => assign(&mut self.dudx, v),
            ("Finv", FieldData::Tensor(v)) => assign(&mut self.finv, v),
            ("Rot", FieldData::Tensor(v)) => assign(&mut self.rot, v),
            ("Dadt", FieldData::Tensor(v)) => assign(&mut self.dadt, v),
            ("dNdX", FieldData::Vector(v)) => assign(&mut self.dndx, v),
            (_, FieldData::Real(v)) if STRESS_COMPONENTS.contains(&name) => {
                if let Some(c) = STRESS_COMPONENTS.iter().position(|&n| n == name) {
                    assign(&mut self.stress_components[c], v);
                }
            }
            (_, FieldData::Vector(v)) if HOURGLASS_FIELDS.iter().take(modes).any(|&n| n == name) => {
                if let Some(m) = HOURGLASS_FIELDS.iter().position(|&n| n == name) {
                    for (k, value) in v.iter().enumerate() {
                        self.hourglass_state[k * modes + m] = *value;
                    }
                }
            }
            (_, data) => {
                let current = self.field(name)?;
                return Err(kind_mismatch(name, current.kind(), data));
            }
        }
        Ok(())
    }

    /// A snapshot of every field.
    pub fn fields(&self) -> Result<RegionFields> {
        let mut fields = BTreeMap::new();
        for name in self.field_names() {
            let data = self.field(&name)?;
            fields.insert(name, data);
        }
        Ok(RegionFields { fields })
    }

    /// Restores every field of a snapshot. The snapshot must match the region's element count.
    pub fn set_fields(&mut self, fields: &RegionFields) -> Result<()> {
        for (name, data) in &fields.fields {
            self.set_field(name, data)?;
        }
        Ok(())
    }

    /// Packs the named fields of the given elements into a message.
    pub fn pack_ghost_fields(&self, names: &[&str], elements: &[usize]) -> Result<GhostMessage> {
        let mut message = GhostMessage::default();
        for &name in names {
            let stride = self.field_stride(name)?;
            let data = self.field(name)?.gather(elements, stride)?;
            message.fields.push(NamedField {
                name: name.to_string(),
                data,
            });
        }
        Ok(message)
    }

    /// Writes the fields of a message into the given elements, in the order they were packed.
    pub fn unpack_ghost_fields(&mut self, message: &GhostMessage, elements: &[usize]) -> Result<()> {
        for field in &message.fields {
            let stride = self.field_stride(&field.name)?;
            check_len("unpack_ghost_fields", elements.len() * stride, field.data.len())?;
            let mut data = self.field(&field.name)?;
            data.scatter(elements, stride, &field.data)?;
            self.set_field(&field.name, &data)?;
        }
        Ok(())
    }
}
