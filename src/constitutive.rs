//! Constitutive interfaces consumed by the region kernels, with minimal reference models.
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LameParameters {
    pub mu: f64,
    pub lambda: f64,
}

impl Default for LameParameters {
    fn default() -> Self {
        Self { mu: 0.0, lambda: 0.0 }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct YoungPoisson {
    pub young: f64,
    pub poisson: f64,
}

impl From<YoungPoisson> for LameParameters {
    fn from(params: YoungPoisson) -> Self {
        let YoungPoisson { young, poisson } = params;
        let mu = 0.5 * young / (1.0 + poisson);
        let lambda = 2.0 * mu * poisson / (1.0 - 2.0 * poisson);
        Self { mu, lambda }
    }
}

impl LameParameters {
    /// The P-wave modulus `lambda + 2 mu`.
    pub fn p_wave_modulus(&self) -> f64 {
        self.lambda + 2.0 * self.mu
    }
}

/// Per integration point solid state owned by an element region.
///
/// Element and point indices are always within the `(num_elements, num_points)` extent set by
/// the last call to `resize`.
pub trait SolidConstitutive: Debug + Send + Sync {
    fn resize(&mut self, num_elements: usize, num_points: usize);

    fn num_elements(&self) -> usize;

    fn num_points(&self) -> usize;

    /// Cauchy stress at an integration point.
    fn stress(&self, element: usize, point: usize) -> Matrix3<f64>;

    /// Reference density of an element.
    fn initial_density(&self, element: usize) -> f64;

    /// Current density at an integration point.
    fn density(&self, element: usize, _point: usize) -> f64 {
        self.initial_density(element)
    }

    /// `lambda + 2G` of an element, used for the stable timestep and hourglass stiffness.
    fn p_wave_modulus(&self, element: usize) -> f64;

    /// Advances the stress of one point with the incremental rate of deformation `dadt` and
    /// rotation increment `rot`.
    fn update_state(&mut self, element: usize, point: usize, dadt: &Matrix3<f64>, rot: &Matrix3<f64>);
}

/// Hypoelastic material with an objective (rotated) stress update.
///
/// `sigma_new = R sigma R^T + 2 mu D + lambda tr(D) I`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypoelasticMaterial {
    parameters: LameParameters,
    reference_density: f64,
    num_points: usize,
    stress: Vec<Matrix3<f64>>,
}

impl HypoelasticMaterial {
    pub fn new(parameters: impl Into<LameParameters>, reference_density: f64) -> Self {
        Self {
            parameters: parameters.into(),
            reference_density,
            num_points: 0,
            stress: Vec::new(),
        }
    }

    pub fn parameters(&self) -> &LameParameters {
        &self.parameters
    }

    /// Overwrites the stress of every point.
    pub fn set_uniform_stress(&mut self, stress: Matrix3<f64>) {
        self.stress.iter_mut().for_each(|s| *s = stress);
    }
}

impl SolidConstitutive for HypoelasticMaterial {
    fn resize(&mut self, num_elements: usize, num_points: usize) {
        if num_points != self.num_points {
            self.stress.clear();
            self.num_points = num_points;
        }
        self.stress.resize(num_elements * num_points, Matrix3::zeros());
    }

    fn num_elements(&self) -> usize {
        if self.num_points == 0 {
            0
        } else {
            self.stress.len() / self.num_points
        }
    }

    fn num_points(&self) -> usize {
        self.num_points
    }

    fn stress(&self, element: usize, point: usize) -> Matrix3<f64> {
        self.stress[element * self.num_points + point]
    }

    fn initial_density(&self, _element: usize) -> f64 {
        self.reference_density
    }

    fn p_wave_modulus(&self, _element: usize) -> f64 {
        self.parameters.p_wave_modulus()
    }

    fn update_state(&mut self, element: usize, point: usize, dadt: &Matrix3<f64>, rot: &Matrix3<f64>) {
        let LameParameters { mu, lambda } = self.parameters;
        let sigma = &mut self.stress[element * self.num_points + point];
        let rotated = rot * *sigma * rot.transpose();
        *sigma = rotated + dadt * (2.0 * mu) + Matrix3::identity() * (lambda * dadt.trace());
    }
}

/// Fluid density and viscosity as functions of pressure. Each returns `(value, d value / dp)`.
pub trait FluidModel: Debug + Send + Sync {
    fn density(&self, pressure: f64) -> (f64, f64);

    fn viscosity(&self, pressure: f64) -> (f64, f64);
}

/// Slightly compressible fluid with exponential pressure dependence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressibleFluid {
    pub reference_pressure: f64,
    pub reference_density: f64,
    pub compressibility: f64,
    pub reference_viscosity: f64,
    pub viscosibility: f64,
}

impl Default for CompressibleFluid {
    fn default() -> Self {
        Self {
            reference_pressure: 0.0,
            reference_density: 1000.0,
            compressibility: 0.0,
            reference_viscosity: 0.001,
            viscosibility: 0.0,
        }
    }
}

impl FluidModel for CompressibleFluid {
    fn density(&self, pressure: f64) -> (f64, f64) {
        let rho = self.reference_density * (self.compressibility * (pressure - self.reference_pressure)).exp();
        (rho, self.compressibility * rho)
    }

    fn viscosity(&self, pressure: f64) -> (f64, f64) {
        let mu = self.reference_viscosity * (self.viscosibility * (pressure - self.reference_pressure)).exp();
        (mu, self.viscosibility * mu)
    }
}

/// Porosity as a function of pressure and the reference porosity. Returns `(value, d value / dp)`.
pub trait PorosityModel: Debug + Send + Sync {
    fn porosity(&self, pressure: f64, reference_porosity: f64) -> (f64, f64);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearPorosity {
    pub reference_pressure: f64,
    pub compressibility: f64,
}

impl PorosityModel for LinearPorosity {
    fn porosity(&self, pressure: f64, reference_porosity: f64) -> (f64, f64) {
        let dp = pressure - self.reference_pressure;
        (
            reference_porosity * (1.0 + self.compressibility * dp),
            reference_porosity * self.compressibility,
        )
    }
}
