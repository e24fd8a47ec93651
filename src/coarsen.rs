//! Construction of coarse multigrid operators that reuse fine-level quadrature data.
use crate::error::OperatorError;
use crate::operator::{CompositeOperator, LinearOperator};
use crate::space::FiniteElementSpace;
use crate::Real;
use log::debug;

/// Builds the operator of the same forms as `fine` on a coarse space.
///
/// Every kernel pair of `fine` is rebuilt through [`ElementKernel::coarsen`], which evaluates
/// the coarse basis at the fine quadrature points and shares the fine quadrature data. The
/// coarse operator has the symmetry of `fine` and size `coarse_space.num_dofs()`. The DOF
/// multiplicity of `fine` belongs to the fine space and is not carried over.
///
/// `fine` is only read.
///
/// # Errors
///
/// - [`OperatorError::NotSquare`] if `fine` is rectangular.
/// - [`OperatorError::NotSymmetric`] if a kernel pair has different trial and test spaces.
/// - [`OperatorError::CoarseningUnsupported`] if a kernel cannot be rebuilt on a coarse space.
///
/// [`ElementKernel::coarsen`]: crate::kernel::ElementKernel::coarsen
pub fn coarsen<T: Real>(
    fine: &CompositeOperator<T>,
    coarse_space: &dyn FiniteElementSpace<T>,
) -> Result<CompositeOperator<T>, OperatorError> {
    if fine.height() != fine.width() {
        return Err(OperatorError::NotSquare {
            height: fine.height(),
            width: fine.width(),
        });
    }
    if let Some(kernel_index) = fine
        .kernel_pairs()
        .iter()
        .position(|pair| pair.forward().input_restriction() != pair.forward().output_restriction())
    {
        return Err(OperatorError::NotSymmetric { kernel_index });
    }

    let size = coarse_space.num_dofs();
    let mut coarse = CompositeOperator::with_symmetry(size, size, fine.symmetry());
    for (kernel_index, pair) in fine.kernel_pairs().iter().enumerate() {
        let forward = pair.forward().coarsen(coarse_space)?;
        let transpose = pair
            .transpose()
            .map(|kernel| kernel.coarsen(coarse_space))
            .transpose()?;
        debug!(
            "Coarsened kernel pair {}: {} -> {} local DOFs per element",
            kernel_index,
            pair.forward().input_restriction().element_dof_count(),
            forward.input_restriction().element_dof_count()
        );
        coarse.add_kernel(forward, transpose)?;
    }

    debug!(
        "Coarsened {} x {} operator to {} x {}",
        fine.height(),
        fine.width(),
        size,
        size
    );
    Ok(coarse)
}
