//! Element-region kinematics and flux-stencil assembly for coupled finite element / finite
//! volume simulations.
pub mod assembly;
pub mod connectivity;
pub mod constitutive;
pub mod dof;
pub mod element;
pub mod error;
pub mod flow;
pub mod ghost;
pub mod partition;
pub mod region;
pub mod settings;
pub mod stencil;
pub mod topology;

pub mod quadrature {
    pub use geofem_quadrature::*;
}

pub mod sparse {
    pub use geofem_sparse::*;
}

#[cfg(feature = "proptest")]
pub mod proptest;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

pub use error::{GeoFemError, Result};
