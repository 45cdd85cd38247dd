//! Library-wide error type.
//!
//! Every error produced by this crate is fatal for the simulation that triggered it: the
//! configuration or geometry it describes cannot be recovered from by retrying.
use std::fmt;
use std::fmt::{Display, Formatter};

pub type Result<T> = std::result::Result<T, GeoFemError>;

#[derive(Debug)]
#[non_exhaustive]
pub enum GeoFemError {
    /// The (topology, formulation) pair has no shape-function implementation.
    UnsupportedElementConfiguration {
        topology: String,
        formulation: String,
        reason: String,
    },
    /// The element type tag matches none of the known topology prefixes.
    UnknownTopologyTag { tag: String },
    /// A stencil connector references more points than the fixed maximum arity.
    StencilOverflow { count: usize, max: usize },
    /// A stencil point carries a tag the flux kernel cannot handle.
    UnsupportedPointType { tag: String },
    /// The Jacobian determinant at an integration point is not positive.
    InvertedElement { element: usize, point: usize, det_j: f64 },
    SizeMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },
    IndexOutOfBounds {
        context: &'static str,
        index: usize,
        len: usize,
    },
    /// A matrix entry was accumulated outside of the assembled sparsity pattern.
    MissingEntry { row: i64, col: i64 },
    MissingField { name: String },
    SingularMatrix { context: &'static str },
    Communication { reason: String },
    Serialization(serde_json::Error),
    LinearSolve(String),
}

impl Display for GeoFemError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedElementConfiguration {
                topology,
                formulation,
                reason,
            } => write!(
                f,
                "allocate_element_library: unsupported element configuration \
                 (topology {topology}, formulation {formulation}): {reason}"
            ),
            Self::UnknownTopologyTag { tag } => write!(
                f,
                "set_geometry_based_variables: element type tag \"{tag}\" matches no known topology"
            ),
            Self::StencilOverflow { count, max } => write!(
                f,
                "stencil add: connector has {count} points, maximum stencil size is {max}"
            ),
            Self::UnsupportedPointType { tag } => {
                write!(f, "flux assembly: unsupported point type {tag} in stencil")
            }
            Self::InvertedElement { element, point, det_j } => write!(
                f,
                "reinit: element {element} is inverted at integration point {point} (detJ = {det_j:e})"
            ),
            Self::SizeMismatch {
                context,
                expected,
                actual,
            } => write!(f, "{context}: expected length {expected}, got {actual}"),
            Self::IndexOutOfBounds { context, index, len } => {
                write!(f, "{context}: index {index} out of bounds for length {len}")
            }
            Self::MissingEntry { row, col } => write!(
                f,
                "sum_into_global_values: entry ({row}, {col}) is not part of the sparsity pattern"
            ),
            Self::MissingField { name } => write!(f, "no field named \"{name}\""),
            Self::SingularMatrix { context } => write!(f, "{context}: singular matrix"),
            Self::Communication { reason } => write!(f, "communication failure: {reason}"),
            Self::Serialization(err) => write!(f, "serialization failure: {err}"),
            Self::LinearSolve(msg) => write!(f, "linear solve failed: {msg}"),
        }
    }
}

impl std::error::Error for GeoFemError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for GeoFemError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err)
    }
}

impl From<geofem_sparse::SolveError> for GeoFemError {
    fn from(err: geofem_sparse::SolveError) -> Self {
        Self::LinearSolve(err.to_string())
    }
}

pub(crate) fn check_len(context: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(GeoFemError::SizeMismatch {
            context,
            expected,
            actual,
        })
    }
}
