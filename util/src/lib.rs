//! Assertion helpers shared by the test suites of the workspace.

/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = $x - $y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

/// Approximate equality of two `f64` slices (or anything that derefs to one).
#[macro_export]
macro_rules! assert_approx_slice_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let left: &[f64] = &$x;
        let right: &[f64] = &$y;
        assert_eq!(left.len(), right.len(), "slices differ in length");
        for (i, (a, b)) in left.iter().zip(right.iter()).enumerate() {
            if (a - b).abs() > $tol {
                panic!("slices differ at index {}: left = {:e}, right = {:e}, abstol = {:e}", i, a, b, $tol);
            }
        }
    }};
}
