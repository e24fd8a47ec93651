use fenris_matfree::kernel::DenseElementKernel;
use fenris_matfree::nalgebra::DMatrix;
use fenris_matfree::restriction::ElementRestriction;

mod assembly;
mod basis;
mod restriction;

/// Two 1D elements `[0, 1]` and `[1, 2]` sharing node 1.
pub fn two_element_restriction() -> ElementRestriction {
    ElementRestriction::from_element_connectivity(3, 1, &[[0, 1], [1, 2]]).unwrap()
}

/// Symmetric 2x2 stiffness blocks on the two-element mesh.
pub fn two_element_stiffness_kernel() -> DenseElementKernel<f64> {
    #[rustfmt::skip]
    let matrices = vec![
        DMatrix::from_row_slice(2, 2, &[2.0, -1.0,
                                        -1.0, 2.0]),
        DMatrix::from_row_slice(2, 2, &[3.0, -1.0,
                                        -1.0, 3.0]),
    ];
    DenseElementKernel::try_new_square(two_element_restriction(), matrices).unwrap()
}

/// Non-symmetric 2x2 blocks on the two-element mesh.
pub fn two_element_general_kernel() -> DenseElementKernel<f64> {
    #[rustfmt::skip]
    let matrices = vec![
        DMatrix::from_row_slice(2, 2, &[1.0, 2.0,
                                        3.0, 4.0]),
        DMatrix::from_row_slice(2, 2, &[5.0, 6.0,
                                        7.0, 8.0]),
    ];
    DenseElementKernel::try_new_square(two_element_restriction(), matrices).unwrap()
}
