//! Serde-deserializable configuration of regions and solvers.
//!
//! Every settings struct has a `Default` impl, and missing JSON keys fall back to it.
use crate::element::Formulation;
use crate::error::Result;
use geofem_sparse::BiCGStabParameters;
use nalgebra::Vector3;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Parses any settings struct from a JSON document.
pub fn from_json_str<S: DeserializeOwned>(json: &str) -> Result<S> {
    Ok(serde_json::from_str(json)?)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HourglassSettings {
    pub damping: f64,
    pub stiffness: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionSettings {
    pub name: String,
    /// Element type tag, matched by prefix (e.g. `"C3D8R"`).
    pub element_type: String,
    pub formulation: Formulation,
    pub basis_order: usize,
    pub quadrature_order: usize,
    pub hourglass: HourglassSettings,
}

impl Default for RegionSettings {
    fn default() -> Self {
        Self {
            name: String::from("region"),
            element_type: String::from("C3D8"),
            formulation: Formulation::Poly,
            basis_order: 1,
            quadrature_order: 2,
            hourglass: HourglassSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonSettings {
    pub max_iterations: usize,
    /// Converged when the scaled residual norm drops below this value.
    pub tolerance: f64,
    /// Factor applied to every Newton update.
    pub solution_scaling: f64,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            tolerance: 1e-6,
            solution_scaling: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KrylovSettings {
    pub relative_tolerance: f64,
    pub max_iterations: usize,
    pub restart_interval: usize,
    pub restart_tolerance: f64,
}

impl Default for KrylovSettings {
    fn default() -> Self {
        let defaults = BiCGStabParameters::default();
        Self {
            relative_tolerance: defaults.relative_tolerance,
            max_iterations: defaults.max_iterations,
            restart_interval: defaults.restart_interval,
            restart_tolerance: defaults.restart_tolerance,
        }
    }
}

impl From<KrylovSettings> for BiCGStabParameters {
    fn from(settings: KrylovSettings) -> Self {
        Self {
            relative_tolerance: settings.relative_tolerance,
            max_iterations: settings.max_iterations,
            restart_interval: settings.restart_interval,
            restart_tolerance: settings.restart_tolerance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowSettings {
    pub gravity_enabled: bool,
    pub gravity_vector: Vector3<f64>,
    pub newton: NewtonSettings,
    pub linear_solver: KrylovSettings,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            gravity_enabled: true,
            gravity_vector: Vector3::new(0.0, 0.0, -9.81),
            newton: NewtonSettings::default(),
            linear_solver: KrylovSettings::default(),
        }
    }
}

impl FlowSettings {
    /// The gravity vector, or zero when gravity is disabled.
    pub fn effective_gravity(&self) -> Vector3<f64> {
        if self.gravity_enabled {
            self.gravity_vector
        } else {
            Vector3::zeros()
        }
    }
}
