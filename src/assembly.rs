//! Conversion of composite operators into explicit sparse matrices.
use crate::error::OperatorError;
use crate::kernel::ElementKernel;
use crate::operator::{CompositeOperator, LinearOperator};
use crate::Real;
use log::{debug, warn};
use nalgebra::{DMatrix, DMatrixViewMut};
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Policy for [`full_assemble`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FullAssemblyOptions {
    /// Drop element contributions that are exactly zero instead of storing them as
    /// structural nonzeros.
    pub skip_zeros: bool,
    /// Let the last contribution to an entry overwrite earlier ones instead of summing them.
    pub set: bool,
}

impl FullAssemblyOptions {
    pub fn with_skip_zeros(self, skip_zeros: bool) -> Self {
        Self { skip_zeros, ..self }
    }

    pub fn with_set(self, set: bool) -> Self {
        Self { set, ..self }
    }
}

/// Computes the dense element matrix of every element of `kernel` in parallel and reduces
/// each with `reduce`.
///
/// `reduce` receives the element index, the global output (row) DOFs, the global input
/// (column) DOFs and the element matrix. Results are returned in element order.
pub(crate) fn compute_element_matrices<T, R, F>(kernel: &dyn ElementKernel<T>, reduce: F) -> Result<Vec<R>, OperatorError>
where
    T: Real,
    R: Send,
    F: Fn(usize, &[usize], &[usize], &DMatrix<T>) -> R + Sync,
{
    let row_restriction = kernel.output_restriction();
    let col_restriction = kernel.input_restriction();
    let num_rows = row_restriction.element_dof_count();
    let num_cols = col_restriction.element_dof_count();

    (0..kernel.num_elements())
        .into_par_iter()
        .with_min_len(16)
        .map_init(
            || (DMatrix::zeros(num_rows, num_cols), vec![0; num_rows], vec![0; num_cols]),
            |(matrix, row_dofs, col_dofs), element_index| {
                row_restriction.populate_element_dofs(row_dofs, element_index);
                col_restriction.populate_element_dofs(col_dofs, element_index);
                kernel.assemble_element_matrix_into(element_index, DMatrixViewMut::from(&mut *matrix))?;
                Ok(reduce(element_index, row_dofs, col_dofs, matrix))
            },
        )
        .collect()
}

/// Assembles the explicit sparse matrix of a composite operator.
///
/// Element matrices of all kernel pairs are collected as `(row, col, value)` triplets at
/// the global DOFs of their restrictions. Triplets with equal coordinates are summed, and
/// rows are divided by the DOF multiplicity of the operator, so that the result agrees with
/// [`LinearOperator::mult`]. With [`FullAssemblyOptions::set`], the contribution registered
/// last (in kernel pair, element and local order) is kept instead. The multiplicity scaling
/// is applied after duplicates are combined in either mode.
///
/// The operator is only read. Transpose kernels are not used.
///
/// # Errors
///
/// Returns [`OperatorError::Kernel`] if an element matrix cannot be computed.
pub fn full_assemble<T: Real>(
    operator: &CompositeOperator<T>,
    options: FullAssemblyOptions,
) -> Result<CsrMatrix<T>, OperatorError> {
    let num_rows = operator.height();
    let num_cols = operator.width();

    let mut triplets = Vec::new();
    for pair in operator.kernel_pairs() {
        let kernel = pair.forward();
        let element_triplets = compute_element_matrices(kernel, |_, row_dofs, col_dofs, matrix| {
            let mut entries = Vec::with_capacity(row_dofs.len() * col_dofs.len());
            for (i, &row) in row_dofs.iter().enumerate() {
                for (j, &col) in col_dofs.iter().enumerate() {
                    let value = matrix[(i, j)];
                    if !(options.skip_zeros && value == T::zero()) {
                        entries.push((row, col, value));
                    }
                }
            }
            entries
        })?;

        triplets.extend(element_triplets.into_iter().flatten());
    }
    let num_triplets = triplets.len();

    // The sort is stable, so equal coordinates keep their registration order
    triplets.par_sort_by_key(|&(row, col, _)| (row, col));

    let mut row_offsets = Vec::with_capacity(num_rows + 1);
    let mut column_indices = Vec::new();
    let mut values = Vec::new();
    row_offsets.push(0);

    let mut current_row = 0;
    let mut prev_col = None;
    let mut num_overwritten = 0;
    for (i, j, v) in triplets {
        while i > current_row {
            row_offsets.push(column_indices.len());
            current_row += 1;
            prev_col = None;
        }

        if Some(j) == prev_col {
            if let Some(last) = values.last_mut() {
                if options.set {
                    *last = v;
                    num_overwritten += 1;
                } else {
                    *last += v;
                }
            }
        } else {
            column_indices.push(j);
            values.push(v);
            prev_col = Some(j);
        }
    }

    // Fill out offsets for remaining empty rows
    while row_offsets.len() < num_rows + 1 {
        row_offsets.push(column_indices.len());
    }

    if let Some(multiplicity) = operator.dof_multiplicity() {
        for (row, window) in row_offsets.windows(2).enumerate() {
            for value in &mut values[window[0]..window[1]] {
                *value /= multiplicity[row];
            }
        }
    }
    if num_overwritten > 0 {
        warn!(
            "Full assembly overwrote {} entries with multiple contributions. \
             The result depends on registration order.",
            num_overwritten
        );
    }

    debug!(
        "Assembled {} x {} matrix with {} nonzeros from {} contributions of {} kernel pairs",
        num_rows,
        num_cols,
        values.len(),
        num_triplets,
        operator.num_kernels()
    );

    CsrMatrix::try_from_csr_data(num_rows, num_cols, row_offsets, column_indices, values)
        .map_err(|err| OperatorError::InvalidArgument(format!("assembled CSR data is invalid: {}", err)))
}
