use crate::{hex_region, ConstantStress};
use geofem::assembly::NodeFields;
use geofem::connectivity::{FaceManager, RegionConnectivity};
use geofem::constitutive::{HypoelasticMaterial, LameParameters};
use geofem::element::Formulation;
use geofem::ghost::FieldData;
use geofem::region::{ElementRegion, RegionFields};
use geofem::settings::RegionSettings;
use geofem::GeoFemError;
use matrixcompare::assert_scalar_eq;
use nalgebra::{Matrix3, Vector3};
use util::{assert_approx_matrix_eq, assert_approx_slice_eq};

fn material() -> Box<HypoelasticMaterial> {
    Box::new(HypoelasticMaterial::new(LameParameters { mu: 1.0, lambda: 1.0 }, 1.0))
}

fn empty_region(element_type: &str, formulation: Formulation) -> ElementRegion {
    let settings = RegionSettings {
        element_type: element_type.to_string(),
        formulation,
        ..RegionSettings::default()
    };
    let mut region = ElementRegion::new(&settings, material()).unwrap();
    region
        .allocate_element_library(settings.basis_order, settings.quadrature_order)
        .unwrap();
    region
}

#[test]
fn geometry_based_variables_follow_the_element_type() {
    let region = empty_region("C3D8R", Formulation::UniformStrain);
    assert_eq!(region.dimension(), 3);
    assert_eq!(region.nodes_per_element(), 8);
    assert_eq!(region.faces_per_element(), 6);
    assert_eq!(region.nodes_per_face(), 4);
    assert_eq!(region.num_points(), 1);
    assert_eq!(region.zero_energy_modes(), 4);

    let settings = RegionSettings {
        element_type: String::from("XYZ"),
        ..RegionSettings::default()
    };
    assert!(matches!(
        ElementRegion::new(&settings, material()),
        Err(GeoFemError::UnknownTopologyTag { .. })
    ));
}

#[test]
fn unsupported_library_is_rejected() {
    let settings = RegionSettings {
        element_type: String::from("CPE3"),
        formulation: Formulation::Linear,
        ..RegionSettings::default()
    };
    let mut region = ElementRegion::new(&settings, material()).unwrap();
    assert!(matches!(
        region.allocate_element_library(1, 1),
        Err(GeoFemError::UnsupportedElementConfiguration { .. })
    ));
}

#[test]
fn resize_sizes_every_per_point_array() {
    let mut region = empty_region("C3D8", Formulation::Poly);
    assert_eq!(region.num_points(), 8);
    region.resize(100, true);
    assert_eq!(region.num_elements(), 100);
    assert_eq!(region.num_point_entries(), 800);
    assert_eq!(region.element_nodes().len(), 800);
    assert_eq!(region.volume().len(), 100);
    assert_eq!(region.constitutive().num_elements(), 100);
    assert_eq!(region.constitutive().num_points(), 8);
    match region.field("dNdX").unwrap() {
        FieldData::Vector(dndx) => assert_eq!(dndx.len(), 100 * 8 * 8),
        other => panic!("dNdX should be a vector field, got {}", other.kind()),
    }
    for k in [0, 57, 99] {
        for a in 0..8 {
            assert_eq!(region.inverse_deformation_gradient(k, a), &Matrix3::identity());
            assert_eq!(region.displacement_gradient(k, a), &Matrix3::zeros());
        }
    }
}

#[test]
fn resize_to_the_same_count_keeps_the_state() {
    let (mut region, _) = hex_region(Formulation::Poly, [3, 2, 1], 0.5, material());
    let before = region.fields().unwrap();
    region.resize(region.num_elements(), true);
    assert_eq!(region.fields().unwrap(), before);
}

#[test]
fn growing_keeps_existing_entries_and_assigns_global_ids() {
    let mut region = empty_region("C3D8", Formulation::Poly);
    assert_eq!(region.resize(3, true), 0);
    region
        .set_field("volume", &FieldData::Real(vec![1.0, 2.0, 3.0]))
        .unwrap();
    assert_eq!(region.resize(5, true), 3);
    assert_eq!(region.volume(), &[1.0, 2.0, 3.0, 0.0, 0.0]);
    assert_eq!(region.global_index(), &[0, 1, 2, 3, 4]);
    assert_eq!(region.ghost_rank(), &[-1; 5]);

    // Elements added without ids carry the ghost sentinel
    region.resize(6, false);
    assert_eq!(region.global_index(), &[0, 1, 2, 3, 4, -1]);
    for a in 0..8 {
        assert_eq!(region.inverse_deformation_gradient(5, a), &Matrix3::identity());
    }

    region.resize(2, true);
    assert_eq!(region.global_index(), &[0, 1]);
    assert_eq!(region.volume(), &[1.0, 2.0]);
}

#[test]
fn hourglass_fields_are_registered_per_zero_energy_mode() {
    let uniform_strain = empty_region("C3D8", Formulation::UniformStrain);
    let names = uniform_strain.field_names();
    for name in ["Qhg1", "Qhg2", "Qhg3", "Qhg4"] {
        assert!(names.iter().any(|n| n == name), "missing {name}");
    }

    let poly = empty_region("C3D8", Formulation::Poly);
    assert!(!poly.field_names().iter().any(|n| n.starts_with("Qhg")));
    assert!(matches!(poly.field("Qhg1"), Err(GeoFemError::MissingField { .. })));

    let quad = empty_region("CPE4", Formulation::UniformStrain);
    let quad_names = quad.field_names();
    assert!(quad_names.iter().any(|n| n == "Qhg1"));
    assert!(!quad_names.iter().any(|n| n == "Qhg2"));
}

#[test]
fn reference_volumes_of_a_block() {
    let (region, _) = hex_region(Formulation::Poly, [2, 2, 2], 0.5, material());
    assert_eq!(region.num_elements(), 8);
    for (k, &volume) in region.volume().iter().enumerate() {
        assert_scalar_eq!(volume, 0.125, comp = abs, tol = 1e-14);
        assert_scalar_eq!(region.mass()[k], 0.125, comp = abs, tol = 1e-14);
        assert_approx_slice_eq!(region.det_j_n(k), region.det_j(k), abstol = 0.0);
        assert_approx_slice_eq!(region.det_j_np1(k), region.det_j(k), abstol = 0.0);
    }
}

#[test]
fn uniform_stretch_kinematics() {
    let (mut region, mut nodes) = hex_region(Formulation::Poly, [2, 1, 1], 1.0, material());
    let strain = 0.01;
    for (u, x) in nodes.incremental_displacement.iter_mut().zip(&nodes.reference_position) {
        *u = Vector3::new(strain * x.x, 0.0, 0.0);
    }
    region.calculate_velocity_gradients(&nodes).unwrap();

    let dudx = Matrix3::from_diagonal(&Vector3::new(strain, 0.0, 0.0));
    let finv = Matrix3::from_diagonal(&Vector3::new(1.0 / (1.0 + strain), 1.0, 1.0));
    let rate = Matrix3::from_diagonal(&Vector3::new(strain / (1.0 + strain), 0.0, 0.0));
    for k in 0..region.num_elements() {
        for a in 0..region.num_points() {
            assert_approx_matrix_eq!(region.displacement_gradient(k, a), &dudx, abstol = 1e-14);
            assert_approx_matrix_eq!(region.inverse_deformation_gradient(k, a), &finv, abstol = 1e-14);
            assert_approx_matrix_eq!(region.deformation_rate_increment(k, a), &rate, abstol = 1e-14);
            assert_approx_matrix_eq!(region.rotation_increment(k, a), &Matrix3::<f64>::identity(), abstol = 1e-14);
            assert_scalar_eq!(region.det_j_np1(k)[a], region.det_j(k)[a] * (1.0 + strain), comp = abs, tol = 1e-14);
        }
        assert_scalar_eq!(region.volume()[k], 1.0 + strain, comp = abs, tol = 1e-13);
    }

    // The hypoelastic update responds to the rate of deformation
    region.update_material_state();
    region.update_element_fields_with_gauss_point_data();
    let d = strain / (1.0 + strain);
    let sigma_x = 2.0 * d + d;
    let pressure = (sigma_x + 2.0 * d) / 3.0;
    for k in 0..region.num_elements() {
        assert_scalar_eq!(region.pressure()[k], pressure, comp = abs, tol = 1e-14);
        let data = region.field("sigma_x").unwrap();
        let FieldData::Real(values) = data else {
            panic!("sigma_x should be a real field");
        };
        assert_scalar_eq!(values[k], sigma_x, comp = abs, tol = 1e-14);
    }
}

#[test]
fn rigid_rotation_has_no_rate_of_deformation() {
    let (mut region, mut nodes) = hex_region(Formulation::UniformStrain, [1, 1, 1], 1.0, material());
    let angle: f64 = 1e-3;
    let rotation = nalgebra::Rotation3::from_axis_angle(&Vector3::z_axis(), angle);
    for (u, x) in nodes.incremental_displacement.iter_mut().zip(&nodes.reference_position) {
        *u = rotation.transform_vector(x) - x;
    }
    region.calculate_velocity_gradients(&nodes).unwrap();
    assert_approx_matrix_eq!(region.deformation_rate_increment(0, 0), &Matrix3::<f64>::zeros(), abstol = 1e-6);
    let rot = region.rotation_increment(0, 0);
    assert_approx_matrix_eq!(rot, rotation.matrix(), abstol = 1e-8);
}

#[test]
fn gauss_point_averages_give_pressure_and_stress_components() {
    let stress = Matrix3::new(1.0, 4.0, 6.0, 4.0, 2.0, 5.0, 6.0, 5.0, 3.0);
    let (mut region, _) = hex_region(
        Formulation::Poly,
        [1, 1, 1],
        1.0,
        Box::new(ConstantStress::new(stress, 2.5, 1.0)),
    );
    region.update_element_fields_with_gauss_point_data();
    assert_scalar_eq!(region.pressure()[0], 2.0, comp = abs, tol = 1e-14);
    assert_scalar_eq!(region.density()[0], 2.5, comp = abs, tol = 1e-14);
    let expected = [
        ("sigma_x", 1.0),
        ("sigma_y", 2.0),
        ("sigma_z", 3.0),
        ("sigma_xy", 4.0),
        ("sigma_yz", 5.0),
        ("sigma_xz", 6.0),
    ];
    for (name, value) in expected {
        assert_eq!(region.field(name).unwrap(), FieldData::Real(vec![value]), "{name}");
    }
}

#[test]
fn hydrostatic_stress_pulls_the_far_corner_inward() {
    let (region, _) = hex_region(Formulation::Poly, [1, 1, 1], 1.0, material());
    let p = 3.0;
    let forces = region
        .calculate_nodal_force_from_stress(0, &(Matrix3::identity() * p))
        .unwrap();
    assert_eq!(forces.len(), 8);
    assert_approx_matrix_eq!(forces[7], Vector3::repeat(-0.25 * p), abstol = 1e-13);
    assert_approx_matrix_eq!(forces[0], Vector3::repeat(0.25 * p), abstol = 1e-13);
    let total: Vector3<f64> = forces.iter().sum();
    assert_approx_matrix_eq!(total, Vector3::<f64>::zeros(), abstol = 1e-13);

    assert!(matches!(
        region.calculate_nodal_force_from_stress(1, &Matrix3::identity()),
        Err(GeoFemError::IndexOutOfBounds { .. })
    ));
}

#[test]
fn face_neighbors_and_domain_boundary() {
    let (mut region, nodes) = hex_region(Formulation::Poly, [3, 1, 1], 1.0, material());
    let faces = FaceManager::build(&[RegionConnectivity {
        topology: region.topology(),
        element_nodes: region.element_nodes(),
    }])
    .unwrap();
    region.set_element_faces(faces.element_faces(0)).unwrap();
    region.set_domain_boundary_objects(&faces).unwrap();
    // Every element of a single row of cubes touches the boundary
    assert!((0..3).all(|k| region.is_domain_boundary(k).unwrap()));

    let neighbors: Vec<usize> = region.element_neighbors(0, 1, &faces).unwrap().into_iter().collect();
    assert_eq!(neighbors, vec![0, 2]);
    let neighbors: Vec<usize> = region.element_neighbors(0, 0, &faces).unwrap().into_iter().collect();
    assert_eq!(neighbors, vec![1]);

    // Local face 3 of a hexahedron is its +x face
    let shared: Vec<usize> = region.face_nodes(0, 3).unwrap();
    let mut shared_sorted = shared.clone();
    shared_sorted.sort_unstable();
    let mut of_next: Vec<usize> = region.face_nodes(1, 2).unwrap();
    of_next.sort_unstable();
    assert_eq!(shared_sorted, of_next);

    let center = region.element_center(2, &nodes, true).unwrap();
    assert_approx_matrix_eq!(center, Vector3::new(2.5, 0.5, 0.5), abstol = 1e-14);
}

#[test]
fn interior_elements_are_not_on_the_boundary() {
    let (mut region, _) = hex_region(Formulation::Poly, [3, 3, 3], 1.0, material());
    let faces = FaceManager::build(&[RegionConnectivity {
        topology: region.topology(),
        element_nodes: region.element_nodes(),
    }])
    .unwrap();
    region.set_element_faces(faces.element_faces(0)).unwrap();
    region.set_domain_boundary_objects(&faces).unwrap();
    let center = 1 + 3 * (1 + 3);
    for k in 0..27 {
        assert_eq!(region.is_domain_boundary(k).unwrap(), k != center, "element {k}");
    }
}

#[test]
fn displaced_element_center() {
    let (region, mut nodes) = hex_region(Formulation::Poly, [1, 1, 1], 1.0, material());
    for u in &mut nodes.displacement {
        *u = Vector3::new(0.0, 0.0, 2.0);
    }
    let reference = region.element_center(0, &nodes, true).unwrap();
    let current = region.element_center(0, &nodes, false).unwrap();
    assert_approx_matrix_eq!(current - reference, Vector3::new(0.0, 0.0, 2.0), abstol = 1e-14);
}

#[test]
fn field_snapshots_round_trip_through_json() {
    let (mut region, mut nodes) = hex_region(Formulation::UniformStrain, [2, 1, 1], 1.0, material());
    nodes.velocity[1] = Vector3::new(0.3, -0.1, 0.2);
    let mut stable_dt = Default::default();
    region.calculate_nodal_forces(&mut nodes, &mut stable_dt, 1e-3).unwrap();
    let snapshot = region.fields().unwrap();
    let json = snapshot.to_json().unwrap();
    let restored = RegionFields::from_json(&json).unwrap();
    assert_eq!(restored, snapshot);

    let (mut fresh, _) = hex_region(Formulation::UniformStrain, [2, 1, 1], 2.0, material());
    fresh.set_fields(&restored).unwrap();
    assert_eq!(fresh.fields().unwrap(), snapshot);
}

#[test]
fn set_field_rejects_wrong_kind_and_length() {
    let mut region = empty_region("C3D8", Formulation::Poly);
    region.resize(2, true);
    assert!(matches!(
        region.set_field("volume", &FieldData::Real(vec![1.0])),
        Err(GeoFemError::Communication { .. })
    ));
    assert!(matches!(
        region.set_field("volume", &FieldData::Integer(vec![1, 2])),
        Err(GeoFemError::Communication { .. })
    ));
    assert!(matches!(
        region.set_field("temperature", &FieldData::Real(vec![1.0, 2.0])),
        Err(GeoFemError::MissingField { .. })
    ));
}

#[test]
fn shape_function_derivatives_report_inverted_elements() {
    let (mut region, mut nodes) = hex_region(Formulation::Poly, [2, 1, 1], 1.0, material());
    // Push the +x nodes of the second element behind its -x nodes
    for x in &mut nodes.reference_position {
        if x.x > 1.5 {
            x.x = 0.5;
        }
    }
    let err = region.calculate_shape_function_derivatives(&nodes).unwrap_err();
    assert!(matches!(err, GeoFemError::InvertedElement { element: 1, .. }));

    let bare = ElementRegion::new(&RegionSettings::default(), material()).unwrap();
    let no_nodes = NodeFields::from_reference_positions(Vec::new());
    assert!(matches!(
        bare.element_center(0, &no_nodes, true),
        Err(GeoFemError::IndexOutOfBounds { .. })
    ));
}
