use geofem_quadrature::integrate;
use geofem_quadrature::univariate::gauss;
use geofem_quadrature::Error;
use matrixcompare::assert_scalar_eq;

fn monomial_integral_1d(alpha: i32) -> f64 {
    (1.0 - (-1.0f64).powi(alpha + 1)) / (alpha as f64 + 1.0)
}

#[test]
fn gauss_rules_integrate_monomials_exactly() {
    for n in 1..=40 {
        let rule = gauss(n).unwrap();
        assert_eq!(rule.0.len(), n);
        assert!(rule.0.iter().all(|&w| w > 0.0));

        for alpha in 0..=(2 * n - 1) as i32 {
            let estimate = integrate(&rule, |x| x[0].powi(alpha));
            assert_scalar_eq!(estimate, monomial_integral_1d(alpha), comp = abs, tol = 1e-13);
        }
    }
}

#[test]
fn gauss_points_are_sorted_and_symmetric() {
    let (weights, points) = gauss(7).unwrap();
    for i in 0..7 {
        assert_scalar_eq!(points[i][0], -points[6 - i][0], comp = abs, tol = 1e-15);
        assert_scalar_eq!(weights[i], weights[6 - i], comp = abs, tol = 1e-15);
    }
    assert!(points.windows(2).all(|pair| pair[0][0] > pair[1][0]));
}

#[test]
fn gauss_with_zero_points_is_an_error() {
    assert_eq!(gauss(0), Err(Error::NoRuleAvailable { requested: 0 }));
}
