use crate::{hex_region, ConstantStress};
use geofem::assembly::{NodeFields, StableTimestep};
use geofem::element::basis::tensor_node_sign;
use geofem::element::Formulation;
use geofem::region::ElementRegion;
use geofem::settings::RegionSettings;
use matrixcompare::assert_scalar_eq;
use nalgebra::{Matrix3, Vector3};
use util::assert_approx_matrix_eq;

fn constant_stress(stress: Matrix3<f64>) -> Box<ConstantStress> {
    Box::new(ConstantStress::new(stress, 2.0, 3.0))
}

#[test]
fn stable_timestep_tracks_the_minimum() {
    let mut stable_dt = StableTimestep::default();
    assert_eq!(stable_dt.dt, f64::INFINITY);
    assert_eq!(stable_dt.element, None);
    stable_dt.update(2.0, 4);
    stable_dt.update(3.0, 1);
    stable_dt.update(0.5, 7);
    assert_eq!(stable_dt.dt, 0.5);
    assert_eq!(stable_dt.element, Some(7));
}

#[test]
fn stable_timestep_of_a_unit_cube() {
    // With density 1 and P-wave modulus 3, the one-point gradients of a unit cube give
    // sum |dN/dx|^2 = 3/2 and dt = sqrt(1 / (3 * 3/2)) / sqrt(2) = 1/3
    let material = Box::new(ConstantStress::new(Matrix3::zeros(), 1.0, 3.0));
    let (mut region, mut nodes) = hex_region(Formulation::UniformStrain, [1, 1, 1], 1.0, material);
    let mut stable_dt = StableTimestep::default();
    region.calculate_nodal_forces(&mut nodes, &mut stable_dt, 1e-3).unwrap();
    assert_scalar_eq!(stable_dt.dt, 1.0 / 3.0, comp = abs, tol = 1e-14);
    assert_eq!(stable_dt.element, Some(0));
}

#[test]
fn stable_timestep_shrinks_with_the_element_size() {
    let material = || Box::new(ConstantStress::new(Matrix3::zeros(), 1.0, 3.0));
    let (mut coarse, mut coarse_nodes) = hex_region(Formulation::Poly, [2, 2, 2], 1.0, material());
    let (mut fine, mut fine_nodes) = hex_region(Formulation::Poly, [2, 2, 2], 0.5, material());
    let mut coarse_dt = StableTimestep::default();
    let mut fine_dt = StableTimestep::default();
    coarse.calculate_nodal_forces(&mut coarse_nodes, &mut coarse_dt, 1e-3).unwrap();
    fine.calculate_nodal_forces(&mut fine_nodes, &mut fine_dt, 1e-3).unwrap();
    assert!(coarse_dt.dt.is_finite() && coarse_dt.dt > 0.0);
    assert_scalar_eq!(fine_dt.dt, 0.5 * coarse_dt.dt, comp = abs, tol = 1e-14);
}

#[test]
fn lumped_masses_and_volumes() {
    let (mut region, nodes) = hex_region(Formulation::Poly, [2, 2, 2], 1.0, constant_stress(Matrix3::zeros()));
    let mut nodes = nodes.with_volume();
    region.calculate_nodal_masses(&mut nodes).unwrap();

    assert!(region.mass().iter().all(|&m| (m - 2.0).abs() < 1e-14));
    assert!(region.density().iter().all(|&rho| rho == 2.0));
    let total: f64 = nodes.mass.iter().sum();
    assert_scalar_eq!(total, 16.0, comp = abs, tol = 1e-12);

    // Corner node 0 touches one element, the center node 13 touches all eight
    assert_scalar_eq!(nodes.mass[0], 0.25, comp = abs, tol = 1e-14);
    assert_scalar_eq!(nodes.mass[13], 2.0, comp = abs, tol = 1e-14);
    let volume = nodes.volume.as_ref().unwrap();
    assert_scalar_eq!(volume[13], 1.0, comp = abs, tol = 1e-14);
    assert_scalar_eq!(volume.iter().sum::<f64>(), 8.0, comp = abs, tol = 1e-12);
}

#[test]
fn uniform_stress_is_self_equilibrated() {
    let stress = Matrix3::new(2.0, 0.5, -1.0, 0.5, -3.0, 0.25, -1.0, 0.25, 1.0);
    let (mut region, mut nodes) = hex_region(Formulation::Poly, [2, 2, 2], 1.0, constant_stress(stress));
    let mut stable_dt = StableTimestep::default();
    region.calculate_nodal_forces(&mut nodes, &mut stable_dt, 1e-3).unwrap();

    let total: Vector3<f64> = nodes.force.iter().sum();
    assert_approx_matrix_eq!(total, Vector3::<f64>::zeros(), abstol = 1e-12);
    // Interior nodes see balanced contributions
    assert_approx_matrix_eq!(nodes.force[13], Vector3::<f64>::zeros(), abstol = 1e-12);

    // The assembled force at a corner matches the single-element computation
    let element_forces = region.calculate_nodal_force_from_stress(0, &stress).unwrap();
    assert_approx_matrix_eq!(nodes.force[0], element_forces[0], abstol = 1e-12);
    assert!(nodes.hourglass_force.iter().all(|f| f == &Vector3::<f64>::zeros()));
}

#[test]
fn repeated_assembly_is_bitwise_identical() {
    let stress = Matrix3::new(1.0, 0.1, 0.2, 0.1, 2.0, 0.3, 0.2, 0.3, 3.0);
    let (mut region, mut nodes) = hex_region(Formulation::UniformStrain, [4, 3, 2], 0.3, constant_stress(stress));
    for (v, x) in nodes.velocity.iter_mut().zip(&nodes.reference_position) {
        *v = Vector3::new((7.0 * x.y).sin(), (3.0 * x.z).cos(), x.x * x.y);
    }
    let initial_state = region.fields().unwrap();

    let mut run = || {
        region.set_fields(&initial_state).unwrap();
        nodes.zero_forces();
        let mut stable_dt = StableTimestep::default();
        region.calculate_nodal_forces(&mut nodes, &mut stable_dt, 1e-3).unwrap();
        (nodes.force.clone(), nodes.hourglass_force.clone(), stable_dt)
    };
    let first = run();
    let second = run();
    assert_eq!(first, second);
}

#[test]
fn hourglass_forces_resist_hourglass_motion() {
    let (mut region, mut nodes) =
        hex_region(Formulation::UniformStrain, [1, 1, 1], 1.0, constant_stress(Matrix3::zeros()));
    for (a, v) in nodes.velocity.iter_mut().enumerate() {
        *v = Vector3::new(0.0, 0.0, tensor_node_sign(a, 0) * tensor_node_sign(a, 1));
    }
    let mut stable_dt = StableTimestep::default();
    region.calculate_nodal_forces(&mut nodes, &mut stable_dt, 1e-2).unwrap();

    let power: f64 = nodes
        .hourglass_force
        .iter()
        .zip(&nodes.velocity)
        .map(|(f, v)| f.dot(v))
        .sum();
    assert!(power < 0.0);
    // Zero stress, so the total force is the hourglass force
    for (f, f_hg) in nodes.force.iter().zip(&nodes.hourglass_force) {
        assert_approx_matrix_eq!(f, f_hg, abstol = 1e-14);
    }
    assert!(region.hourglass_state(0).unwrap()[0].z > 0.0);
}

#[test]
fn hourglass_forces_vanish_for_rigid_motion() {
    let (mut region, mut nodes) =
        hex_region(Formulation::UniformStrain, [2, 2, 1], 1.0, constant_stress(Matrix3::zeros()));
    let omega = Vector3::new(0.2, -0.4, 1.0);
    for (v, x) in nodes.velocity.iter_mut().zip(&nodes.reference_position) {
        *v = Vector3::new(1.0, 2.0, 3.0) + omega.cross(x);
    }
    let mut stable_dt = StableTimestep::default();
    region.calculate_nodal_forces(&mut nodes, &mut stable_dt, 1e-2).unwrap();
    for f in &nodes.hourglass_force {
        assert_approx_matrix_eq!(f, Vector3::<f64>::zeros(), abstol = 1e-12);
    }
    for k in 0..region.num_elements() {
        for s in region.hourglass_state(k).unwrap() {
            assert_approx_matrix_eq!(s, Vector3::<f64>::zeros(), abstol = 1e-12);
        }
    }
}

#[test]
fn flow_only_shells_leave_nodal_forces_untouched() {
    let settings = RegionSettings {
        name: String::from("fracture"),
        element_type: String::from("S4R"),
        formulation: Formulation::FlowOnly,
        ..RegionSettings::default()
    };
    let stress = Matrix3::new(1.0, 2.0, 0.0, 2.0, 3.0, 0.0, 0.0, 0.0, 4.0);
    let mut region = ElementRegion::new(&settings, constant_stress(stress)).unwrap();
    region
        .allocate_element_library(settings.basis_order, settings.quadrature_order)
        .unwrap();
    region.resize(1, true);
    region.set_element_nodes(0, &[0, 1, 2, 3]).unwrap();
    let positions = vec![
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(2.0, 0.0, 0.0),
        Vector3::new(2.0, 1.0, 0.0),
        Vector3::new(0.0, 1.0, 0.0),
    ];
    let mut nodes = NodeFields::from_reference_positions(positions);
    region.calculate_shape_function_derivatives(&nodes).unwrap();
    region.initialize();
    for v in &mut nodes.velocity {
        *v = Vector3::new(0.0, 0.0, 1.0);
    }

    let mut stable_dt = StableTimestep::default();
    region.calculate_nodal_forces(&mut nodes, &mut stable_dt, 1e-3).unwrap();
    assert!(nodes.force.iter().all(|f| *f == Vector3::<f64>::zeros()));
    assert!(nodes.hourglass_force.iter().all(|f| *f == Vector3::<f64>::zeros()));
    assert_eq!(stable_dt.dt, f64::INFINITY);
    assert_eq!(stable_dt.element, None);
    // The shell still measures its area
    assert_scalar_eq!(region.volume()[0], 2.0, comp = abs, tol = 1e-12);
}

#[test]
fn per_element_accessors_reject_out_of_range_elements() {
    let (region, _) = hex_region(Formulation::UniformStrain, [2, 1, 1], 1.0, constant_stress(Matrix3::zeros()));
    assert_eq!(region.hourglass_state(1).unwrap().len(), region.zero_energy_modes());
    assert!(region.hourglass_state(2).is_err());
    assert!(region.is_domain_boundary(1).is_ok());
    assert!(region.is_domain_boundary(2).is_err());
}

#[test]
fn dangling_node_ids_are_reported_during_hourglass_control() {
    let (mut region, mut nodes) =
        hex_region(Formulation::UniformStrain, [1, 1, 1], 1.0, constant_stress(Matrix3::zeros()));
    nodes.displacement.truncate(4);
    let mut stable_dt = StableTimestep::default();
    assert!(region.calculate_nodal_forces(&mut nodes, &mut stable_dt, 1e-3).is_err());
}
