use fenris_matfree::nalgebra::DVector;
use fenris_matfree::restriction::ElementRestriction;
use fenris_matfree::OperatorError;
use matrixcompare::{assert_matrix_eq, prop_assert_scalar_eq};
use proptest::collection::vec;
use proptest::prelude::*;

#[test]
fn try_new_rejects_out_of_bounds_nodes() {
    let result = ElementRestriction::try_new(3, 2, 1, vec![0, 1, 1, 3]);
    assert!(matches!(
        result,
        Err(OperatorError::InconsistentMapping { index: 3, bound: 3 })
    ));
}

#[test]
fn try_new_rejects_incomplete_elements() {
    let result = ElementRestriction::try_new(3, 2, 1, vec![0, 1, 2]);
    assert!(matches!(result, Err(OperatorError::InvalidArgument(_))));
}

#[test]
fn from_element_connectivity_rejects_mixed_element_sizes() {
    let connectivity: Vec<Vec<usize>> = vec![vec![0, 1], vec![1, 2, 3]];
    let result = ElementRestriction::from_element_connectivity(4, 1, &connectivity);
    assert!(matches!(result, Err(OperatorError::InvalidArgument(_))));
}

#[test]
fn sizes_of_vector_valued_restriction() {
    let restriction = ElementRestriction::from_element_connectivity(4, 2, &[[0, 1, 2], [2, 3, 1]]).unwrap();
    assert_eq!(restriction.num_elements(), 2);
    assert_eq!(restriction.num_nodes(), 4);
    assert_eq!(restriction.element_size(), 3);
    assert_eq!(restriction.num_dofs(), 8);
    assert_eq!(restriction.element_dof_count(), 6);
    assert_eq!(restriction.e_size(), 12);
    assert_eq!(restriction.element_nodes(1), &[2, 3, 1]);

    let mut dofs = vec![0; 6];
    restriction.populate_element_dofs(&mut dofs, 1);
    assert_eq!(dofs, vec![4, 5, 6, 7, 2, 3]);
}

#[test]
fn gather_and_scatter_add_simple_example() {
    let restriction = ElementRestriction::from_element_connectivity(3, 2, &[[0, 1], [1, 2]]).unwrap();
    let global = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];

    let mut local = vec![0.0; 8];
    restriction.gather(&global, &mut local);
    assert_eq!(local, vec![1.0, 2.0, 3.0, 4.0, 3.0, 4.0, 5.0, 6.0]);

    let mut accumulated = vec![1.0; 6];
    restriction.scatter_add(&local, &mut accumulated);
    assert_eq!(accumulated, vec![2.0, 3.0, 7.0, 9.0, 6.0, 7.0]);
}

#[test]
fn dof_multiplicity_counts_shared_dofs() {
    let restriction = ElementRestriction::from_element_connectivity(4, 1, &[[0, 1], [1, 2], [2, 1]]).unwrap();
    let multiplicity = restriction.dof_multiplicity::<f64>();
    assert_matrix_eq!(multiplicity, DVector::from_column_slice(&[1.0, 3.0, 2.0, 0.0]));
}

fn restriction_strategy() -> impl Strategy<Value = ElementRestriction> {
    (1..8usize, 1..4usize, 1..3usize, 0..6usize).prop_flat_map(
        |(num_nodes, element_size, solution_dim, num_elements)| {
            vec(0..num_nodes, element_size * num_elements).prop_map(move |element_nodes| {
                ElementRestriction::try_new(num_nodes, element_size, solution_dim, element_nodes).unwrap()
            })
        },
    )
}

fn restriction_and_vectors_strategy() -> impl Strategy<Value = (ElementRestriction, Vec<f64>, Vec<f64>)> {
    restriction_strategy().prop_flat_map(|restriction| {
        let global = vec(-10.0..10.0, restriction.num_dofs());
        let local = vec(-10.0..10.0, restriction.e_size());
        (Just(restriction), global, local)
    })
}

proptest! {
    #[test]
    fn scatter_add_is_adjoint_of_gather((restriction, global, local) in restriction_and_vectors_strategy()) {
        let mut gathered = vec![0.0; restriction.e_size()];
        restriction.gather(&global, &mut gathered);
        let mut scattered = vec![0.0; restriction.num_dofs()];
        restriction.scatter_add(&local, &mut scattered);

        let lhs: f64 = gathered.iter().zip(&local).map(|(a, b)| a * b).sum();
        let rhs: f64 = global.iter().zip(&scattered).map(|(a, b)| a * b).sum();
        prop_assert_scalar_eq!(lhs, rhs, comp = abs, tol = 1e-9);
    }
}
