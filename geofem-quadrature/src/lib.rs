//! Quadrature rules for the reference domains used by geofem element formulations.
//!
//! Conventions:
//!
//! - The reference interval, quadrilateral and hexahedron are `[-1, 1]^d`.
//! - The reference triangle and tetrahedron are the unit right simplices with a vertex at the
//!   origin, i.e. `{ x >= 0, sum x_i <= 1 }`.
//!
//! A rule is a pair `(weights, points)` with one weight per point.

use std::fmt;
use std::fmt::{Display, Formatter};

pub mod simplex;
pub mod tensor;
pub mod univariate;

/// Library-wide error type.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// No rule with the requested number of points or strength is available.
    NoRuleAvailable { requested: usize },
    /// The Newton iteration for a Gauss root failed to converge.
    RootNotConverged { num_points: usize, root: usize },
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRuleAvailable { requested } => {
                write!(f, "no quadrature rule available for the requested order {requested}")
            }
            Self::RootNotConverged { num_points, root } => {
                write!(
                    f,
                    "Newton iteration did not converge for root {root} of the {num_points}-point Gauss rule"
                )
            }
        }
    }
}

impl std::error::Error for Error {}

/// A D-dimensional point.
pub type Point<const D: usize> = [f64; D];

/// A D-dimensional rule.
pub type Rule<const D: usize> = (Vec<f64>, Vec<Point<D>>);

/// Approximate the integral of `f` with the given rule.
pub fn integrate<const D: usize>(rule: &Rule<D>, f: impl Fn(&Point<D>) -> f64) -> f64 {
    let (weights, points) = rule;
    weights
        .iter()
        .zip(points)
        .map(|(w, x)| w * f(x))
        .sum()
}
