use super::{two_element_general_kernel, two_element_restriction, two_element_stiffness_kernel};
use fenris_matfree::assembly::{full_assemble, FullAssemblyOptions};
use fenris_matfree::kernel::DenseElementKernel;
use fenris_matfree::nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use fenris_matfree::nalgebra_sparse::CsrMatrix;
use fenris_matfree::restriction::ElementRestriction;
use fenris_matfree::{CompositeOperator, LinearOperator};
use matrixcompare::assert_matrix_eq;

fn sum() -> FullAssemblyOptions {
    FullAssemblyOptions::default()
}

fn set() -> FullAssemblyOptions {
    FullAssemblyOptions::default().with_set(true)
}

#[test]
fn full_assembly_sums_shared_entries() {
    let mut op = CompositeOperator::new(3, 3);
    op.add_kernel(Box::new(two_element_stiffness_kernel()), None)
        .unwrap();
    let matrix = full_assemble(&op, sum()).unwrap();

    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(3, 3, &[
        2.0, -1.0, 0.0,
        -1.0, 5.0, -1.0,
        0.0, -1.0, 3.0,
    ]);
    assert_eq!(matrix.nnz(), 7);
    assert_matrix_eq!(matrix, expected);
}

#[test]
fn full_assembly_scales_rows_by_multiplicity() {
    let mut op = CompositeOperator::new(3, 3);
    op.add_kernel(Box::new(two_element_general_kernel()), None)
        .unwrap();
    op.set_dof_multiplicity(two_element_restriction().dof_multiplicity())
        .unwrap();
    let matrix = full_assemble(&op, sum()).unwrap();

    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(3, 3, &[
        1.0, 2.0, 0.0,
        1.5, 4.5, 3.0,
        0.0, 7.0, 8.0,
    ]);
    assert_matrix_eq!(matrix, expected, comp = abs, tol = 1e-14);
}

#[test]
fn full_assembly_matches_operator_action() {
    let mut op = CompositeOperator::new(3, 3);
    op.add_kernel(Box::new(two_element_general_kernel()), None)
        .unwrap();
    op.add_kernel(Box::new(two_element_stiffness_kernel()), None)
        .unwrap();
    op.set_dof_multiplicity(DVector::from_column_slice(&[1.0, 4.0, 2.0]))
        .unwrap();
    let matrix = full_assemble(&op, sum()).unwrap();

    let x = DVector::from_column_slice(&[0.25, -1.0, 3.0]);
    let mut y = DVector::zeros(3);
    op.mult(DVectorView::from(&x), DVectorViewMut::from(&mut y))
        .unwrap();
    assert_matrix_eq!(&matrix * &x, y, comp = abs, tol = 1e-13);
}

#[test]
fn full_assembly_of_rectangular_operator() {
    let input = ElementRestriction::from_element_connectivity(4, 1, &[[0, 1, 2], [1, 2, 3]]).unwrap();
    let matrices = vec![
        DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
        DMatrix::from_row_slice(2, 3, &[1.0, 1.0, 1.0, 1.0, 1.0, 1.0]),
    ];
    let kernel = DenseElementKernel::try_new(input, two_element_restriction(), matrices).unwrap();
    let mut op = CompositeOperator::new(3, 4);
    op.add_kernel(Box::new(kernel), None).unwrap();
    let matrix = full_assemble(&op, sum()).unwrap();

    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(3, 4, &[
        1.0, 2.0, 3.0, 0.0,
        4.0, 6.0, 7.0, 1.0,
        0.0, 1.0, 1.0, 1.0,
    ]);
    assert_eq!((matrix.nrows(), matrix.ncols()), (3, 4));
    assert_matrix_eq!(matrix, expected);
}

#[test]
fn full_assembly_with_set_coincides_with_sum_on_disjoint_supports() {
    let restriction_a = ElementRestriction::from_element_connectivity(4, 1, &[[0, 1]]).unwrap();
    let restriction_b = ElementRestriction::from_element_connectivity(4, 1, &[[2, 3]]).unwrap();
    let kernel_a = DenseElementKernel::try_new_square(
        restriction_a,
        vec![DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0])],
    )
    .unwrap();
    let kernel_b = DenseElementKernel::try_new_square(
        restriction_b,
        vec![DMatrix::from_row_slice(2, 2, &[5.0, 0.0, 7.0, 8.0])],
    )
    .unwrap();

    let mut op = CompositeOperator::new(4, 4);
    op.add_kernel(Box::new(kernel_a), None).unwrap();
    op.add_kernel(Box::new(kernel_b), None).unwrap();

    let summed = full_assemble(&op, sum()).unwrap();
    let overwritten = full_assemble(&op, set()).unwrap();
    assert_eq!(summed, overwritten);

    let summed = full_assemble(&op, sum().with_skip_zeros(true)).unwrap();
    let overwritten = full_assemble(&op, set().with_skip_zeros(true)).unwrap();
    assert_eq!(summed, overwritten);
}

#[test]
fn full_assembly_with_set_keeps_last_contribution() {
    let mut op = CompositeOperator::new(3, 3);
    op.add_kernel(Box::new(two_element_stiffness_kernel()), None)
        .unwrap();
    let matrix = full_assemble(&op, set()).unwrap();

    // The shared diagonal entry is written by element 0, then overwritten by element 1
    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(3, 3, &[
        2.0, -1.0, 0.0,
        -1.0, 3.0, -1.0,
        0.0, -1.0, 3.0,
    ]);
    assert_matrix_eq!(matrix, expected);
}

#[test]
fn full_assembly_with_set_scales_rows_by_multiplicity() {
    let mut op = CompositeOperator::new(3, 3);
    op.add_kernel(Box::new(two_element_general_kernel()), None)
        .unwrap();
    op.set_dof_multiplicity(DVector::from_column_slice(&[1.0, 2.0, 1.0]))
        .unwrap();
    let matrix = full_assemble(&op, set()).unwrap();

    // Entry (1, 1) keeps the contribution 5 of element 1 before it is divided by 2
    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(3, 3, &[
        1.0, 2.0, 0.0,
        1.5, 2.5, 3.0,
        0.0, 7.0, 8.0,
    ]);
    assert_matrix_eq!(matrix, expected, comp = abs, tol = 1e-14);
}

#[test]
fn full_assembly_with_set_matches_sum_on_disjoint_supports_with_weighting() {
    let kernel_a = DenseElementKernel::try_new_square(
        ElementRestriction::from_element_connectivity(4, 1, &[[0, 1]]).unwrap(),
        vec![DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0])],
    )
    .unwrap();
    let kernel_b = DenseElementKernel::try_new_square(
        ElementRestriction::from_element_connectivity(4, 1, &[[2, 3]]).unwrap(),
        vec![DMatrix::from_row_slice(2, 2, &[5.0, 6.0, 7.0, 8.0])],
    )
    .unwrap();

    let mut op = CompositeOperator::new(4, 4);
    op.add_kernel(Box::new(kernel_a), None).unwrap();
    op.add_kernel(Box::new(kernel_b), None).unwrap();
    op.set_dof_multiplicity(DVector::from_column_slice(&[2.0, 2.0, 1.0, 1.0]))
        .unwrap();

    let summed = full_assemble(&op, sum()).unwrap();
    let overwritten = full_assemble(&op, set()).unwrap();
    assert_eq!(summed, overwritten);

    let dense = DMatrix::from(&overwritten);
    for j in 0..4 {
        let mut e_j = DVector::zeros(4);
        e_j[j] = 1.0;
        let mut column = DVector::zeros(4);
        op.mult(DVectorView::from(&e_j), DVectorViewMut::from(&mut column))
            .unwrap();
        assert_matrix_eq!(dense.column(j).into_owned(), column, comp = abs, tol = 1e-14);
    }
    assert_eq!(dense[(0, 0)], 0.5);
    assert_eq!(dense[(1, 0)], 1.5);
}

#[test]
fn skip_zeros_drops_zero_contributions() {
    let restriction = ElementRestriction::from_element_connectivity(2, 1, &[[0, 1]]).unwrap();
    let kernel =
        DenseElementKernel::try_new_square(restriction, vec![DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 2.0])])
            .unwrap();
    let mut op = CompositeOperator::new(2, 2);
    op.add_kernel(Box::new(kernel), None).unwrap();

    let with_zeros = full_assemble(&op, sum()).unwrap();
    assert_eq!(with_zeros.nnz(), 4);
    let without_zeros = full_assemble(&op, sum().with_skip_zeros(true)).unwrap();
    assert_eq!(without_zeros.nnz(), 2);
    assert_eq!(without_zeros.row(0).col_indices(), &[0]);
    assert_eq!(without_zeros.row(1).col_indices(), &[1]);
    assert_matrix_eq!(with_zeros, without_zeros);
}

#[test]
fn skip_zeros_keeps_cancelling_contributions() {
    // Entry (1, 1) receives 1 and -1, which sum to an explicit zero
    let restriction = two_element_restriction();
    let matrices = vec![
        DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]),
        DMatrix::from_row_slice(2, 2, &[-1.0, 0.0, 0.0, 1.0]),
    ];
    let kernel = DenseElementKernel::try_new_square(restriction, matrices).unwrap();
    let mut op = CompositeOperator::new(3, 3);
    op.add_kernel(Box::new(kernel), None).unwrap();

    let matrix = full_assemble(&op, sum().with_skip_zeros(true)).unwrap();
    assert_eq!(matrix.nnz(), 3);
    assert_eq!(matrix.get_entry(1, 1).unwrap().into_value(), 0.0);
}

#[test]
fn full_assembly_of_empty_operator() {
    let op = CompositeOperator::<f64>::new(3, 2);
    let matrix = full_assemble(&op, sum()).unwrap();
    assert_eq!(matrix, CsrMatrix::zeros(3, 2));
}

#[test]
fn full_assembly_options_serialization() {
    let options = FullAssemblyOptions {
        skip_zeros: true,
        set: false,
    };
    let json = serde_json::to_string(&options).unwrap();
    assert_eq!(json, r#"{"skip_zeros":true,"set":false}"#);
    let deserialized: FullAssemblyOptions = serde_json::from_str(&json).unwrap();
    assert_eq!(deserialized, options);

    let defaults = FullAssemblyOptions::default();
    assert!(!defaults.skip_zeros);
    assert!(!defaults.set);
}
