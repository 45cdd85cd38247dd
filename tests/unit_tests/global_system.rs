use crate::run_on_ranks;
use geofem::assembly::GlobalSystem;
use geofem::dof::DofMap;
use geofem::partition::PartitionContext;
use geofem::GeoFemError;

fn serial_system(num_cells: usize) -> GlobalSystem {
    let ctx = PartitionContext::serial();
    let dofs = DofMap::number(&vec![-1; num_cells], &ctx, 0).unwrap();
    GlobalSystem::new(&dofs, &ctx).unwrap()
}

#[test]
fn pattern_and_accumulation() {
    let ctx = PartitionContext::serial();
    let mut system = serial_system(3);
    system.insert_global_indices(&[0, 1], &[0, 1]).unwrap();
    system.insert_global_indices(&[2], &[2]).unwrap();
    system.insert_global_indices(&[2, -1], &[1, -1, 2]).unwrap();
    system.finalize_pattern(&ctx).unwrap();
    assert_eq!(system.matrix().nnz(), 6);
    assert_eq!(system.num_global_cols(), 3);
    assert_eq!(system.entry(0, 2), None);
    assert_eq!(system.entry(2, 1), Some(0.0));

    system.sum_into_global_values(&[0, 1], &[0, 1], &[1.0, 2.0, 3.0, 4.0]).unwrap();
    system.sum_into_global_values(&[0], &[0], &[1.0]).unwrap();
    assert_eq!(system.entry(0, 0), Some(2.0));
    assert_eq!(system.entry(0, 1), Some(2.0));
    assert_eq!(system.entry(1, 0), Some(3.0));

    // Negative rows and columns are skipped
    system.sum_into_global_values(&[-1, 2], &[2, -1], &[9.0, 9.0, 5.0, 9.0]).unwrap();
    assert_eq!(system.entry(2, 2), Some(5.0));
    system.sum_into_residual(&[-1, 1], &[3.0, 4.0]).unwrap();
    assert_eq!(system.residual().as_slice(), &[0.0, 4.0, 0.0]);

    system.global_assemble(&ctx).unwrap();
    assert_eq!(system.entry(2, 2), Some(5.0));

    system.zero();
    assert!(system.matrix().values().iter().all(|&v| v == 0.0));
    assert!(system.residual().iter().all(|&r| r == 0.0));
}

#[test]
fn entries_outside_the_pattern_are_rejected() {
    let ctx = PartitionContext::serial();
    let mut system = serial_system(3);
    system.insert_global_indices(&[0, 1, 2], &[0]).unwrap();
    system.finalize_pattern(&ctx).unwrap();
    let err = system.sum_into_global_values(&[0], &[2], &[1.0]).unwrap_err();
    assert!(matches!(err, GeoFemError::MissingEntry { row: 0, col: 2 }));
    assert!(matches!(
        system.sum_into_global_values(&[0, 1], &[0], &[1.0]),
        Err(GeoFemError::SizeMismatch { .. })
    ));
    // Row 1 has no diagonal entry
    assert!(matches!(system.set_identity_row(1), Err(GeoFemError::MissingEntry { .. })));
    assert!(matches!(system.set_identity_row(7), Err(GeoFemError::MissingEntry { .. })));
}

#[test]
fn pattern_columns_must_exist() {
    let ctx = PartitionContext::serial();
    let mut system = serial_system(2);
    system.insert_global_indices(&[0], &[5]).unwrap();
    assert!(matches!(
        system.finalize_pattern(&ctx),
        Err(GeoFemError::IndexOutOfBounds { .. })
    ));
}

#[test]
fn identity_rows() {
    let ctx = PartitionContext::serial();
    let mut system = serial_system(2);
    system.insert_global_indices(&[0, 1], &[0, 1]).unwrap();
    system.finalize_pattern(&ctx).unwrap();
    system.sum_into_global_values(&[0, 1], &[0, 1], &[4.0, -1.0, -1.0, 4.0]).unwrap();
    system.set_identity_row(1).unwrap();
    assert_eq!(system.entry(1, 0), Some(0.0));
    assert_eq!(system.entry(1, 1), Some(1.0));
    assert_eq!(system.entry(0, 1), Some(-1.0));
}

#[test]
fn contributions_to_other_ranks_reach_their_owner() {
    let results = run_on_ranks(2, |communicator| {
        let ctx = PartitionContext::new(communicator, Vec::new());
        let dofs = DofMap::number(&[-1], &ctx, 0).unwrap();
        let mut system = GlobalSystem::new(&dofs, &ctx).unwrap();
        assert_eq!(system.first_row(), ctx.rank as i64);
        system.insert_global_indices(&[0, 1], &[0, 1]).unwrap();
        system.finalize_pattern(&ctx).unwrap();

        // Both ranks add a two-point coupling, scaled by rank + 1
        let scale = (ctx.rank + 1) as f64;
        let block: Vec<f64> = [1.0, -1.0, -1.0, 1.0].iter().map(|v| v * scale).collect();
        system.sum_into_global_values(&[0, 1], &[0, 1], &block).unwrap();
        system.sum_into_residual(&[0, 1], &[scale, -scale]).unwrap();
        system.global_assemble(&ctx).unwrap();

        let row = ctx.rank as i64;
        (
            system.num_local_rows(),
            system.entry(row, 0).unwrap(),
            system.entry(row, 1).unwrap(),
            system.residual()[0],
        )
    });
    assert_eq!(results[0], (1, 3.0, -3.0, 3.0));
    assert_eq!(results[1], (1, -3.0, 3.0, -3.0));
}
