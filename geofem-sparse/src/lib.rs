//! Linear operators and Krylov solvers used by the geofem flow solvers.
//!
//! Everything here operates on `f64` vectors owned by the calling rank. Distributed products are
//! the responsibility of the operator implementation.

pub mod bicgstab;
pub mod operator;

pub use bicgstab::{BiCGStab, BiCGStabParameters, SolveError, SolveErrorKind, SolveOutput};
pub use operator::{IdentityOperator, JacobiPreconditioner, LinearOperator};
