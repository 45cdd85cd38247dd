//! Typed field messages exchanged between partitions for ghost synchronization.
//!
//! A message is a list of named fields, each carrying the values of the requested elements
//! (with every per-point entry of an element kept together). Messages are encoded as JSON.
use crate::error::{GeoFemError, Result};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldData {
    Real(Vec<f64>),
    Integer(Vec<i64>),
    Vector(Vec<Vector3<f64>>),
    Tensor(Vec<Matrix3<f64>>),
}

impl FieldData {
    pub fn len(&self) -> usize {
        match self {
            Self::Real(v) => v.len(),
            Self::Integer(v) => v.len(),
            Self::Vector(v) => v.len(),
            Self::Tensor(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Real(_) => "real",
            Self::Integer(_) => "integer",
            Self::Vector(_) => "vector",
            Self::Tensor(_) => "tensor",
        }
    }

    /// Collects `stride` consecutive entries for every index.
    pub fn gather(&self, indices: &[usize], stride: usize) -> Result<Self> {
        fn gather_slice<T: Clone>(data: &[T], indices: &[usize], stride: usize) -> Result<Vec<T>> {
            let mut out = Vec::with_capacity(indices.len() * stride);
            for &i in indices {
                let block = data
                    .get(i * stride..(i + 1) * stride)
                    .ok_or(GeoFemError::IndexOutOfBounds {
                        context: "FieldData::gather",
                        index: i,
                        len: data.len() / stride.max(1),
                    })?;
                out.extend_from_slice(block);
            }
            Ok(out)
        }
        Ok(match self {
            Self::Real(v) => Self::Real(gather_slice(v, indices, stride)?),
            Self::Integer(v) => Self::Integer(gather_slice(v, indices, stride)?),
            Self::Vector(v) => Self::Vector(gather_slice(v, indices, stride)?),
            Self::Tensor(v) => Self::Tensor(gather_slice(v, indices, stride)?),
        })
    }

    /// Writes `stride` consecutive entries of `packed` per index, the inverse of [`gather`](Self::gather).
    pub fn scatter(&mut self, indices: &[usize], stride: usize, packed: &FieldData) -> Result<()> {
        fn scatter_slice<T: Clone>(data: &mut [T], indices: &[usize], stride: usize, packed: &[T]) -> Result<()> {
            crate::error::check_len("FieldData::scatter", indices.len() * stride, packed.len())?;
            let len = data.len() / stride.max(1);
            for (&i, block) in indices.iter().zip(packed.chunks(stride.max(1))) {
                let target = data
                    .get_mut(i * stride..(i + 1) * stride)
                    .ok_or(GeoFemError::IndexOutOfBounds {
                        context: "FieldData::scatter",
                        index: i,
                        len,
                    })?;
                target.clone_from_slice(block);
            }
            Ok(())
        }
        match (self, packed) {
            (Self::Real(v), Self::Real(p)) => scatter_slice(v, indices, stride, p),
            (Self::Integer(v), Self::Integer(p)) => scatter_slice(v, indices, stride, p),
            (Self::Vector(v), Self::Vector(p)) => scatter_slice(v, indices, stride, p),
            (Self::Tensor(v), Self::Tensor(p)) => scatter_slice(v, indices, stride, p),
            (target, packed) => Err(GeoFemError::Communication {
                reason: format!(
                    "cannot unpack {} field data into a {} field",
                    packed.kind(),
                    target.kind()
                ),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedField {
    pub name: String,
    pub data: FieldData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GhostMessage {
    pub fields: Vec<NamedField>,
}

impl GhostMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn field(&self, name: &str) -> Result<&FieldData> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| &field.data)
            .ok_or_else(|| GeoFemError::MissingField { name: name.to_string() })
    }
}
