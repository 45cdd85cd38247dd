//! Preconditioned BiCGSTAB with a periodic residual-drift restart.
//!
//! The recurrence-updated residual of BiCGSTAB slowly drifts from the true residual
//! `b - A x` in finite precision. Every `restart_interval` iterations the true residual is
//! recomputed, and if the relative drift exceeds `restart_tolerance` the shadow residual,
//! residual and search direction are reset from the true residual.
use crate::operator::{IdentityOperator, LinearOperator};
use log::{debug, warn};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiCGStabParameters {
    /// Converged when `|r| <= relative_tolerance * |r_0|`.
    pub relative_tolerance: f64,
    pub max_iterations: usize,
    pub restart_interval: usize,
    /// Relative drift between the true and recurrence residual that triggers a restart.
    pub restart_tolerance: f64,
}

impl Default for BiCGStabParameters {
    fn default() -> Self {
        Self {
            relative_tolerance: 1e-10,
            max_iterations: 1000,
            restart_interval: 30,
            restart_tolerance: 0.1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolveOutput {
    pub num_iterations: usize,
    pub num_restarts: usize,
    /// Recurrence residual norm at the start of every iteration.
    pub residual_norms: Vec<f64>,
}

impl SolveOutput {
    pub fn residual_reduction(&self) -> f64 {
        match (self.residual_norms.first(), self.residual_norms.last()) {
            (Some(&first), Some(&last)) if first > 0.0 => last / first,
            _ => 0.0,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolveErrorKind {
    OperatorError(Box<dyn Error>),
    PreconditionerError(Box<dyn Error>),
    /// A denominator of the recurrence vanished.
    Breakdown { quantity: &'static str },
    MaxIterationsReached { max_iter: usize },
    DimensionMismatch { rhs: usize, solution: usize },
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorError(err) => write!(f, "Error applying operator: {err}"),
            Self::PreconditionerError(err) => write!(f, "Error applying preconditioner: {err}"),
            Self::Breakdown { quantity } => write!(f, "BiCGSTAB breakdown: {quantity} vanished"),
            Self::MaxIterationsReached { max_iter } => write!(f, "Max iterations ({max_iter}) reached."),
            Self::DimensionMismatch { rhs, solution } => write!(
                f,
                "right-hand side has length {rhs} but solution has length {solution}"
            ),
        }
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct SolveError {
    pub output: SolveOutput,
    pub kind: SolveErrorKind,
}

impl SolveError {
    fn new(output: SolveOutput, kind: SolveErrorKind) -> Self {
        Self { output, kind }
    }
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BiCGSTAB solve failed after {} iterations. Error: {}",
            self.output.num_iterations, self.kind
        )
    }
}

impl Error for SolveError {}

#[derive(Debug)]
pub struct BiCGStab<A, P> {
    operator: A,
    preconditioner: P,
    parameters: BiCGStabParameters,
}

impl BiCGStab<(), IdentityOperator> {
    pub fn new() -> Self {
        Self {
            operator: (),
            preconditioner: IdentityOperator,
            parameters: BiCGStabParameters::default(),
        }
    }
}

impl Default for BiCGStab<(), IdentityOperator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> BiCGStab<(), P> {
    pub fn with_operator<A>(self, operator: A) -> BiCGStab<A, P> {
        BiCGStab {
            operator,
            preconditioner: self.preconditioner,
            parameters: self.parameters,
        }
    }
}

impl<A, P> BiCGStab<A, P> {
    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> BiCGStab<A, P2> {
        BiCGStab {
            operator: self.operator,
            preconditioner,
            parameters: self.parameters,
        }
    }

    pub fn with_parameters(self, parameters: BiCGStabParameters) -> Self {
        Self { parameters, ..self }
    }

    pub fn parameters(&self) -> &BiCGStabParameters {
        &self.parameters
    }
}

impl<A, P> BiCGStab<A, P>
where
    A: LinearOperator,
    P: LinearOperator,
{
    fn apply_operator(&self, y: &mut DVector<f64>, x: &DVector<f64>) -> Result<(), SolveErrorKind> {
        self.operator
            .apply(y, x)
            .map_err(SolveErrorKind::OperatorError)
    }

    fn apply_preconditioner(&self, y: &mut DVector<f64>, x: &DVector<f64>) -> Result<(), SolveErrorKind> {
        self.preconditioner
            .apply(y, x)
            .map_err(SolveErrorKind::PreconditionerError)
    }

    /// r = b - A x
    fn true_residual(&self, r: &mut DVector<f64>, b: &DVector<f64>, x: &DVector<f64>) -> Result<(), SolveErrorKind> {
        self.apply_operator(r, x)?;
        r.axpy(1.0, b, -1.0);
        Ok(())
    }

    /// Solves `A x = b`, using the contents of `x` as the initial guess.
    pub fn solve_with_guess(&self, b: &DVector<f64>, x: &mut DVector<f64>) -> Result<SolveOutput, SolveError> {
        let mut output = SolveOutput::default();
        match self.solve_(b, x, &mut output) {
            Ok(()) => Ok(output),
            Err(kind) => Err(SolveError::new(output, kind)),
        }
    }

    #[allow(non_snake_case)]
    fn solve_(&self, b: &DVector<f64>, x: &mut DVector<f64>, output: &mut SolveOutput) -> Result<(), SolveErrorKind> {
        if b.len() != x.len() {
            return Err(SolveErrorKind::DimensionMismatch {
                rhs: b.len(),
                solution: x.len(),
            });
        }
        let n = b.len();
        let params = &self.parameters;

        let mut r = DVector::zeros(n);
        self.true_residual(&mut r, b, x)?;
        let r_norm0 = r.norm();
        let abs_tol = params.relative_tolerance * r_norm0;

        let mut r0 = r.clone();
        let mut p = r.clone();
        let mut Mp = DVector::zeros(n);
        let mut AMp = DVector::zeros(n);
        let mut s = DVector::zeros(n);
        let mut Ms = DVector::zeros(n);
        let mut AMs = DVector::zeros(n);
        let mut true_r = DVector::zeros(n);

        let mut rho = r0.dot(&r);
        let mut next_restart = params.restart_interval;

        loop {
            let r_norm = r.norm();
            output.residual_norms.push(r_norm);
            if r_norm <= abs_tol {
                debug!(
                    "BiCGSTAB converged in {} iterations (residual reduction {:e})",
                    output.num_iterations,
                    output.residual_reduction()
                );
                return Ok(());
            }
            if output.num_iterations >= params.max_iterations {
                return Err(SolveErrorKind::MaxIterationsReached {
                    max_iter: params.max_iterations,
                });
            }

            self.apply_preconditioner(&mut Mp, &p)?;
            self.apply_operator(&mut AMp, &Mp)?;
            let r0_AMp = r0.dot(&AMp);
            if r0_AMp == 0.0 || rho == 0.0 {
                return Err(SolveErrorKind::Breakdown { quantity: "<r0, A M p>" });
            }
            let alpha = rho / r0_AMp;

            // s = r - alpha A M p
            s.copy_from(&r);
            s.axpy(-alpha, &AMp, 1.0);

            self.apply_preconditioner(&mut Ms, &s)?;
            self.apply_operator(&mut AMs, &Ms)?;
            let AMs_norm_squared = AMs.norm_squared();
            let omega = if AMs_norm_squared > 0.0 {
                AMs.dot(&s) / AMs_norm_squared
            } else {
                0.0
            };

            // x = x + alpha M p + omega M s
            x.axpy(alpha, &Mp, 1.0);
            x.axpy(omega, &Ms, 1.0);
            // r = s - omega A M s
            r.copy_from(&s);
            r.axpy(-omega, &AMs, 1.0);
            output.num_iterations += 1;

            if omega == 0.0 {
                // s is already the exact residual of the updated iterate
                if r.norm() <= abs_tol {
                    output.residual_norms.push(r.norm());
                    return Ok(());
                }
                return Err(SolveErrorKind::Breakdown { quantity: "omega" });
            }

            let rho_next = r0.dot(&r);
            let beta = (rho_next / rho) * (alpha / omega);
            rho = rho_next;

            // p = r + beta (p - omega A M p)
            p.axpy(-omega, &AMp, 1.0);
            p.axpy(1.0, &r, beta);

            if params.restart_interval > 0 && output.num_iterations == next_restart {
                self.true_residual(&mut true_r, b, x)?;
                let true_norm = true_r.norm();
                let drift = (&true_r - &r).norm();
                if true_norm > 0.0 && drift / true_norm > params.restart_tolerance {
                    warn!(
                        "BiCGSTAB residual drift {:e} exceeds {:e} at iteration {}, restarting",
                        drift / true_norm,
                        params.restart_tolerance,
                        output.num_iterations
                    );
                    r0.copy_from(&true_r);
                    r.copy_from(&true_r);
                    p.copy_from(&true_r);
                    rho = r0.dot(&r);
                    output.num_restarts += 1;
                }
                next_restart += params.restart_interval;
            }
        }
    }
}
