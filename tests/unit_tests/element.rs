use geofem::element::{FiniteElement, Formulation, HourglassParameters};
use geofem::proptest::{affine_hexahedron, orientation_preserving_matrix, point3, tetrahedron};
use geofem::topology::ElementTopology;
use geofem::GeoFemError;
use matrixcompare::assert_scalar_eq;
use nalgebra::{Matrix3, Vector3};
use proptest::prelude::*;
use util::assert_approx_matrix_eq;

fn unit_cube() -> [Vector3<f64>; 8] {
    let mut nodes = [Vector3::<f64>::zeros(); 8];
    for (a, x) in nodes.iter_mut().enumerate() {
        *x = Vector3::new((a & 1) as f64, ((a >> 1) & 1) as f64, ((a >> 2) & 1) as f64);
    }
    nodes
}

fn reinit(element: &FiniteElement, x: &[Vector3<f64>]) -> (Vec<f64>, Vec<Vector3<f64>>) {
    let nq = element.num_quadrature_points();
    let mut det_j = vec![0.0; nq];
    let mut dndx = vec![Vector3::<f64>::zeros(); nq * element.num_nodes()];
    element.reinit(0, x, &mut det_j, &mut dndx).unwrap();
    (det_j, dndx)
}

#[test]
fn unit_tetrahedron_volume_and_gradients() {
    let element = FiniteElement::new(ElementTopology::Tetrahedron, Formulation::Linear, 1, 1).unwrap();
    assert_eq!(element.num_quadrature_points(), 1);
    let x = [
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(1.0, 0.0, 0.0),
        Vector3::new(0.0, 1.0, 0.0),
        Vector3::new(0.0, 0.0, 1.0),
    ];
    let (det_j, dndx) = reinit(&element, &x);
    assert_scalar_eq!(det_j[0], 1.0 / 6.0, comp = abs, tol = 1e-15);

    let expected = [
        Vector3::new(-1.0, -1.0, -1.0),
        Vector3::new(1.0, 0.0, 0.0),
        Vector3::new(0.0, 1.0, 0.0),
        Vector3::new(0.0, 0.0, 1.0),
    ];
    for (g, g_expected) in dndx.iter().zip(&expected) {
        assert_approx_matrix_eq!(g, g_expected, abstol = 1e-14);
    }
    let sum: Vector3<f64> = dndx.iter().sum();
    assert_approx_matrix_eq!(sum, Vector3::<f64>::zeros(), abstol = 1e-14);
}

#[test]
fn unit_cube_with_full_quadrature() {
    let element = FiniteElement::new(ElementTopology::Hexahedron, Formulation::Poly, 1, 2).unwrap();
    assert_eq!(element.num_quadrature_points(), 8);
    assert_eq!(element.zero_energy_modes(), 0);

    let x = unit_cube();
    let (det_j, dndx) = reinit(&element, &x);
    assert_eq!(dndx.len(), 64);
    for &d in &det_j {
        assert_scalar_eq!(d, 0.125, comp = abs, tol = 1e-14);
    }

    // Nodal basis functions integrate their gradients to the face-averaged values
    let mut integrated = Vector3::<f64>::zeros();
    for q in 0..8 {
        integrated += dndx[q * 8 + 7] * det_j[q];
    }
    assert_approx_matrix_eq!(integrated, Vector3::new(0.25, 0.25, 0.25), abstol = 1e-14);
}

#[test]
fn shape_values_form_a_partition_of_unity() {
    let configurations = [
        (ElementTopology::Hexahedron, Formulation::Poly, 2),
        (ElementTopology::Hexahedron, Formulation::UniformStrain, 1),
        (ElementTopology::Quadrilateral, Formulation::Poly, 3),
        (ElementTopology::Tetrahedron, Formulation::Linear, 1),
        (ElementTopology::Triangle, Formulation::Linear, 1),
        (ElementTopology::Line, Formulation::Linear, 2),
        (ElementTopology::Pyramid, Formulation::Poly, 2),
        (ElementTopology::ShellQuad, Formulation::FlowOnly, 1),
        (ElementTopology::ShellTriangle, Formulation::FlowOnly, 1),
    ];
    for (topology, formulation, order) in configurations {
        let element = FiniteElement::new(topology, formulation, 1, order).unwrap();
        for q in 0..element.num_quadrature_points() {
            let sum: f64 = element.shape_values(q).iter().sum();
            assert_scalar_eq!(sum, 1.0, comp = abs, tol = 1e-14);
            let gradient_sum: Vector3<f64> = element.reference_gradients(q).iter().sum();
            assert_approx_matrix_eq!(gradient_sum, Vector3::<f64>::zeros(), abstol = 1e-14);
        }
    }
}

#[test]
fn zero_energy_mode_counts() {
    let modes = |topology, formulation| {
        FiniteElement::new(topology, formulation, 1, 1)
            .unwrap()
            .zero_energy_modes()
    };
    assert_eq!(modes(ElementTopology::Hexahedron, Formulation::UniformStrain), 4);
    assert_eq!(modes(ElementTopology::Wedge, Formulation::UniformStrain), 4);
    assert_eq!(modes(ElementTopology::Quadrilateral, Formulation::UniformStrain), 1);
    assert_eq!(modes(ElementTopology::Hexahedron, Formulation::Poly), 0);
    assert_eq!(modes(ElementTopology::Tetrahedron, Formulation::Linear), 0);
}

#[test]
fn hourglass_base_vectors_are_orthogonal_to_constants() {
    let element = FiniteElement::new(ElementTopology::Hexahedron, Formulation::UniformStrain, 1, 1).unwrap();
    for m in 0..4 {
        let h = element.hourglass_base(m);
        assert_eq!(h.len(), 8);
        assert_scalar_eq!(h.iter().sum::<f64>(), 0.0, comp = abs, tol = 1e-15);
        assert!(h.iter().all(|h_a| h_a.abs() == 1.0));
    }
}

#[test]
fn unsupported_configurations_are_rejected() {
    let rejected = [
        (ElementTopology::Tetrahedron, Formulation::Poly, 1, 1),
        (ElementTopology::Hexahedron, Formulation::Linear, 1, 1),
        (ElementTopology::PlaneStrainTriangle, Formulation::Linear, 1, 1),
        (ElementTopology::ShellQuad, Formulation::Poly, 1, 1),
        (ElementTopology::Hexahedron, Formulation::Poly, 2, 2),
        (ElementTopology::Hexahedron, Formulation::Poly, 1, 0),
    ];
    for (topology, formulation, basis_order, quadrature_order) in rejected {
        let result = FiniteElement::new(topology, formulation, basis_order, quadrature_order);
        assert!(
            matches!(result, Err(GeoFemError::UnsupportedElementConfiguration { .. })),
            "{topology} / {formulation} / {basis_order} / {quadrature_order} should be unsupported"
        );
    }
}

#[test]
fn inverted_hexahedron_is_reported() {
    let element = FiniteElement::new(ElementTopology::Hexahedron, Formulation::Poly, 1, 2).unwrap();
    let mut x = unit_cube();
    // Mirror the element through the plane z = 0
    for x_a in &mut x {
        x_a.z = -x_a.z;
    }
    let mut det_j = vec![0.0; 8];
    let mut dndx = vec![Vector3::<f64>::zeros(); 64];
    let err = element.reinit(3, &x, &mut det_j, &mut dndx).unwrap_err();
    match err {
        GeoFemError::InvertedElement { element, det_j, .. } => {
            assert_eq!(element, 3);
            assert!(det_j < 0.0);
        }
        other => panic!("expected an inverted element, got {other}"),
    }
}

#[test]
fn reinit_checks_buffer_sizes() {
    let element = FiniteElement::new(ElementTopology::Hexahedron, Formulation::Poly, 1, 2).unwrap();
    let x = unit_cube();
    let mut det_j = vec![0.0; 7];
    let mut dndx = vec![Vector3::<f64>::zeros(); 64];
    assert!(matches!(
        element.reinit(0, &x, &mut det_j, &mut dndx),
        Err(GeoFemError::SizeMismatch { .. })
    ));
}

#[test]
fn shell_quad_measures_its_area() {
    let element = FiniteElement::new(ElementTopology::ShellQuad, Formulation::FlowOnly, 1, 1).unwrap();
    // A 2 x 3 rectangle in a tilted plane, counter-clockwise
    let e1 = Vector3::new(1.0, 0.0, 1.0).normalize() * 2.0;
    let e2 = Vector3::new(0.0, 1.0, 0.0) * 3.0;
    let x = [Vector3::<f64>::zeros(), e1, e1 + e2, e2];
    let (det_j, dndx) = reinit(&element, &x);
    assert_scalar_eq!(det_j[0], 6.0, comp = abs, tol = 1e-12);
    // In-plane linear fields are reproduced by the surface gradient
    let field = Vector3::new(0.5, -1.0, 0.5);
    let gradient: Vector3<f64> = x.iter().zip(&dndx).map(|(x_a, g_a)| field.dot(x_a) * g_a).sum();
    let normal = e1.cross(&e2).normalize();
    let tangential = field - normal * normal.dot(&field);
    assert_approx_matrix_eq!(gradient, tangential, abstol = 1e-12);
}

#[test]
fn hourglass_control_ignores_linear_velocity_fields() {
    let element = FiniteElement::new(ElementTopology::Hexahedron, Formulation::UniformStrain, 1, 1).unwrap();
    let x = unit_cube();
    let (det_j, dndx) = reinit(&element, &x);
    let l = Matrix3::new(0.1, -0.3, 0.2, 0.4, 0.0, -0.1, 0.3, 0.2, -0.5);
    let translation = Vector3::new(1.0, -2.0, 0.5);
    let v: Vec<Vector3<f64>> = x.iter().map(|x_a| l * x_a + translation).collect();
    let parameters = HourglassParameters {
        damping: 0.1,
        stiffness: 0.05,
        density: 2000.0,
        p_wave_modulus: 1e9,
        dt: 1e-4,
    };
    let mut state = vec![Vector3::<f64>::zeros(); 4];
    let mut forces = vec![Vector3::<f64>::zeros(); 8];
    element
        .zero_energy_mode_control(&dndx, det_j[0], &x, &v, &parameters, &mut state, &mut forces)
        .unwrap();
    for f in &forces {
        assert_approx_matrix_eq!(f, Vector3::<f64>::zeros(), abstol = 1e-6);
    }
    for s in &state {
        assert_approx_matrix_eq!(s, Vector3::<f64>::zeros(), abstol = 1e-6);
    }
}

#[test]
fn hourglass_control_resists_hourglass_velocity() {
    let element = FiniteElement::new(ElementTopology::Hexahedron, Formulation::UniformStrain, 1, 1).unwrap();
    let x = unit_cube();
    let (det_j, dndx) = reinit(&element, &x);
    let h = element.hourglass_base(0).to_vec();
    let v: Vec<Vector3<f64>> = h.iter().map(|&h_a| Vector3::new(h_a, 0.0, 0.0)).collect();
    let parameters = HourglassParameters {
        damping: 0.1,
        stiffness: 0.05,
        density: 1.0,
        p_wave_modulus: 1.0,
        dt: 0.01,
    };
    let mut state = vec![Vector3::<f64>::zeros(); 4];
    let mut forces = vec![Vector3::<f64>::zeros(); 8];
    element
        .zero_energy_mode_control(&dndx, det_j[0], &x, &v, &parameters, &mut state, &mut forces)
        .unwrap();

    // Only the excited mode accumulates stiffness, and it opposes the velocity
    assert!(state[0].x > 0.0);
    for s in &state[1..] {
        assert_approx_matrix_eq!(s, Vector3::<f64>::zeros(), abstol = 1e-12);
    }
    let power: f64 = forces.iter().zip(&v).map(|(f, v)| f.dot(v)).sum();
    assert!(power < 0.0);
    let total: Vector3<f64> = forces.iter().sum();
    assert_approx_matrix_eq!(total, Vector3::<f64>::zeros(), abstol = 1e-12);
}

proptest! {
    #[test]
    fn affine_hexahedron_volume_and_linear_fields(
        x in affine_hexahedron(),
        formulation in prop_oneof![Just(Formulation::Poly), Just(Formulation::UniformStrain)],
        c in point3(),
    ) {
        let element = FiniteElement::new(ElementTopology::Hexahedron, formulation, 1, 2).unwrap();
        let (det_j, dndx) = reinit(&element, &x);

        // Edge vectors of the parallelepiped span the image of [-1, 1]^3
        let a = Matrix3::from_columns(&[(x[1] - x[0]) / 2.0, (x[2] - x[0]) / 2.0, (x[4] - x[0]) / 2.0]);
        let expected_volume = 8.0 * a.determinant();
        let volume: f64 = det_j.iter().sum();
        prop_assert!(det_j.iter().all(|&d| d > 0.0));
        prop_assert!((volume - expected_volume).abs() <= 1e-9 * expected_volume.max(1.0));

        let n = element.num_nodes();
        for q in 0..element.num_quadrature_points() {
            let gradient: Vector3<f64> = x
                .iter()
                .zip(&dndx[q * n..(q + 1) * n])
                .map(|(x_a, g_a)| c.dot(x_a) * g_a)
                .sum();
            assert_approx_matrix_eq!(gradient, c, abstol = 1e-8 * c.norm().max(1.0));
        }
    }

    #[test]
    fn tetrahedron_volume_is_a_sixth_of_the_edge_determinant(x in tetrahedron()) {
        let element = FiniteElement::new(ElementTopology::Tetrahedron, Formulation::Linear, 1, 1).unwrap();
        let (det_j, dndx) = reinit(&element, &x);
        let edges = Matrix3::from_columns(&[x[1] - x[0], x[2] - x[0], x[3] - x[0]]);
        let expected = edges.determinant() / 6.0;
        prop_assert!(det_j[0] > 0.0);
        prop_assert!((det_j[0] - expected).abs() <= 1e-10 * expected.max(1.0));
        let sum: Vector3<f64> = dndx.iter().sum();
        assert_approx_matrix_eq!(sum, Vector3::<f64>::zeros(), abstol = 1e-8);
    }

    #[test]
    fn orientation_reversing_maps_are_inverted(a in orientation_preserving_matrix()) {
        let element = FiniteElement::new(ElementTopology::Tetrahedron, Formulation::Linear, 1, 1).unwrap();
        // Swapping two vertices reverses the orientation
        let x = [Vector3::<f64>::zeros(), a.column(1).into_owned(), a.column(0).into_owned(), a.column(2).into_owned()];
        let mut det_j = [0.0];
        let mut dndx = [Vector3::<f64>::zeros(); 4];
        let result = element.reinit(0, &x, &mut det_j, &mut dndx);
        prop_assert!(matches!(result, Err(GeoFemError::InvertedElement { .. })), "expected an inverted element");
    }
}
