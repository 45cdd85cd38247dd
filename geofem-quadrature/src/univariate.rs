//! Rules for the reference interval `[-1, 1]`.

use crate::{Error, Rule};
use std::f64::consts::PI;

const MAX_NEWTON_ITERATIONS: usize = 100;

/// Evaluates the Legendre polynomial `P_n` and its derivative at `x`.
///
/// The derivative formula is singular at `|x| == 1`, so `x` must lie in the open interval.
fn legendre_with_derivative(n: usize, x: f64) -> (f64, f64) {
    // Bonnet's recursion: m P_m = (2m - 1) x P_{m-1} - (m - 1) P_{m-2}
    let (mut p_prev, mut p) = (0.0, 1.0);
    for m in 1..=n {
        let m = m as f64;
        let p_next = ((2.0 * m - 1.0) * x * p - (m - 1.0) * p_prev) / m;
        p_prev = p;
        p = p_next;
    }
    let dp = n as f64 * (x * p - p_prev) / (x * x - 1.0);
    (p, dp)
}

/// Gauss-Legendre rule with `num_points` points on `[-1, 1]`.
///
/// Exact for polynomials of degree up to `2 * num_points - 1`.
pub fn gauss(num_points: usize) -> Result<Rule<1>, Error> {
    let n = num_points;
    if n == 0 {
        return Err(Error::NoRuleAvailable { requested: 0 });
    }

    let mut weights = vec![0.0; n];
    let mut points = vec![[0.0]; n];

    // Roots are symmetric about the origin, so only the positive half is computed.
    for i in 0..(n + 1) / 2 {
        let mut x = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut converged = false;
        let mut dp = 0.0;
        for _ in 0..MAX_NEWTON_ITERATIONS {
            let (p, dp_x) = legendre_with_derivative(n, x);
            let dx = p / dp_x;
            x -= dx;
            dp = dp_x;
            if dx.abs() <= 1e-15 {
                converged = true;
                dp = legendre_with_derivative(n, x).1;
                break;
            }
        }
        if !converged {
            return Err(Error::RootNotConverged { num_points: n, root: i });
        }

        let w = 2.0 / ((1.0 - x * x) * dp * dp);
        points[i] = [x];
        weights[i] = w;
        points[n - 1 - i] = [-x];
        weights[n - 1 - i] = w;
    }

    Ok((weights, points))
}
