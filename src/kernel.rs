//! Element kernels: the local action of a discretized bilinear form over a batch of elements.
use crate::basis::ElementBasis;
use crate::error::OperatorError;
use crate::qfunction::{QFunction, QuadratureData};
use crate::quadrature::QuadratureRule;
use crate::restriction::ElementRestriction;
use crate::space::FiniteElementSpace;
use crate::Real;
use log::debug;
use nalgebra::{DMatrix, DMatrixViewMut, DVector, DVectorView, DVectorViewMut};
use rayon::prelude::*;
use std::cell::RefCell;
use std::fmt::Debug;
use std::sync::Arc;
use thread_local::ThreadLocal;

/// The local action of a bilinear form over a batch of elements.
///
/// A kernel maps element-local input vectors, laid out according to its input restriction,
/// to element-local output vectors laid out according to its output restriction. It never
/// touches global vectors: gathering and scattering is the responsibility of the operator
/// the kernel is registered with.
pub trait ElementKernel<T: Real>: Debug + Send + Sync {
    /// The restriction of the trial space the kernel reads from.
    fn input_restriction(&self) -> &ElementRestriction;

    /// The restriction of the test space the kernel writes to.
    fn output_restriction(&self) -> &ElementRestriction;

    fn num_elements(&self) -> usize {
        self.output_restriction().num_elements()
    }

    /// Overwrites `output` with the local action of a single element on `input`.
    fn apply_element(
        &self,
        element_index: usize,
        input: DVectorView<T>,
        output: DVectorViewMut<T>,
    ) -> eyre::Result<()>;

    /// Applies the kernel to all elements of an E-vector.
    ///
    /// Elements are processed in parallel, each writing its own block of `output`.
    fn apply_elements(&self, input: &[T], output: &mut [T]) -> eyre::Result<()> {
        let input_size = self.input_restriction().element_dof_count();
        let output_size = self.output_restriction().element_dof_count();
        assert_eq!(input.len(), self.num_elements() * input_size);
        assert_eq!(output.len(), self.num_elements() * output_size);
        if output_size == 0 {
            return Ok(());
        }

        output
            .par_chunks_mut(output_size)
            .enumerate()
            .try_for_each(|(element_index, element_output)| {
                let element_input = &input[input_size * element_index..input_size * (element_index + 1)];
                self.apply_element(
                    element_index,
                    DVectorView::from_slice(element_input, input_size),
                    DVectorViewMut::from_slice(element_output, output_size),
                )
            })
    }

    /// Overwrites `output` with the dense element matrix of a single element.
    ///
    /// The default implementation probes [`apply_element`](Self::apply_element) with unit
    /// vectors, one column at a time.
    fn assemble_element_matrix_into(&self, element_index: usize, mut output: DMatrixViewMut<T>) -> eyre::Result<()> {
        let input_size = self.input_restriction().element_dof_count();
        let output_size = self.output_restriction().element_dof_count();
        assert_eq!(output.shape(), (output_size, input_size), "Incompatible element matrix shape");

        let mut unit = DVector::zeros(input_size);
        let mut column = DVector::zeros(output_size);
        for j in 0..input_size {
            unit[j] = T::one();
            self.apply_element(element_index, DVectorView::from(&unit), DVectorViewMut::from(&mut column))?;
            output.column_mut(j).copy_from(&column);
            unit[j] = T::zero();
        }
        Ok(())
    }

    /// Builds the kernel for the same form on a coarse space.
    ///
    /// Kernels that can only be built from scratch report
    /// [`OperatorError::CoarseningUnsupported`].
    fn coarsen(&self, _coarse_space: &dyn FiniteElementSpace<T>) -> Result<Box<dyn ElementKernel<T>>, OperatorError> {
        Err(OperatorError::CoarseningUnsupported)
    }
}

/// Scratch space for the evaluation of a single element at its quadrature points.
#[derive(Debug)]
struct PointBuffers<T: Real> {
    input: DVector<T>,
    output: DVector<T>,
    probe: DMatrix<T>,
}

impl<T: Real> Default for PointBuffers<T> {
    fn default() -> Self {
        Self {
            input: DVector::zeros(0),
            output: DVector::zeros(0),
            probe: DMatrix::zeros(0, 0),
        }
    }
}

/// A kernel evaluating a bilinear form by numerical quadrature.
///
/// The action on an element is `v = B_test^T D(q) B_trial u`, where `B_trial` and `B_test`
/// are the trial and test bases tabulated at the quadrature points and `D(q)` is the
/// [`QFunction`] applied pointwise with the precomputed [`QuadratureData`].
///
/// The quadrature rule, qfunction and quadrature data are reference counted. Kernels built
/// through [`transpose`](Self::transpose) or [`ElementKernel::coarsen`] share them with the
/// kernel they were built from.
#[derive(Debug)]
pub struct QuadratureKernel<T: Real> {
    trial_restriction: ElementRestriction,
    trial_basis: ElementBasis<T>,
    test_restriction: ElementRestriction,
    test_basis: ElementBasis<T>,
    rule: Arc<QuadratureRule<T>>,
    qfunction: Arc<dyn QFunction<T>>,
    qdata: Arc<QuadratureData<T>>,
    workspace: ThreadLocal<RefCell<PointBuffers<T>>>,
}

impl<T: Real> Clone for QuadratureKernel<T> {
    fn clone(&self) -> Self {
        Self {
            trial_restriction: self.trial_restriction.clone(),
            trial_basis: self.trial_basis.clone(),
            test_restriction: self.test_restriction.clone(),
            test_basis: self.test_basis.clone(),
            rule: Arc::clone(&self.rule),
            qfunction: Arc::clone(&self.qfunction),
            qdata: Arc::clone(&self.qdata),
            workspace: ThreadLocal::new(),
        }
    }
}

impl<T: Real> QuadratureKernel<T> {
    /// Wires restrictions, bases, quadrature and pointwise data into a kernel.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::InvalidArgument`] if the pieces disagree on the number of
    /// elements, nodes per element, quadrature points or quadrature data layout, or if a
    /// restriction has more than one component per node.
    pub fn new(
        trial_restriction: ElementRestriction,
        trial_basis: ElementBasis<T>,
        test_restriction: ElementRestriction,
        test_basis: ElementBasis<T>,
        rule: Arc<QuadratureRule<T>>,
        qfunction: Arc<dyn QFunction<T>>,
        qdata: Arc<QuadratureData<T>>,
    ) -> Result<Self, OperatorError> {
        let invalid = |msg: String| Err(OperatorError::InvalidArgument(msg));
        let dim = rule.dim();

        for (name, restriction, basis) in [
            ("trial", &trial_restriction, &trial_basis),
            ("test", &test_restriction, &test_basis),
        ] {
            if restriction.solution_dim() != 1 {
                return invalid(format!("{} restriction must have a single component per node", name));
            }
            if restriction.element_size() != basis.num_nodes() {
                return invalid(format!(
                    "{} restriction has {} nodes per element, but the basis has {} nodes",
                    name,
                    restriction.element_size(),
                    basis.num_nodes()
                ));
            }
            if basis.num_points() != rule.num_points() || basis.reference_dim() != dim {
                return invalid(format!("{} basis is not tabulated at the quadrature points", name));
            }
            if restriction.num_elements() != qdata.num_elements() {
                return invalid(format!(
                    "{} restriction has {} elements, but quadrature data is given for {} elements",
                    name,
                    restriction.num_elements(),
                    qdata.num_elements()
                ));
            }
        }

        if qdata.num_points() != rule.num_points() {
            return invalid("quadrature data does not match the quadrature rule".to_string());
        }
        if qdata.point_size() != qfunction.qdata_size(dim) {
            return invalid(format!(
                "qfunction expects {} values per point, quadrature data provides {}",
                qfunction.qdata_size(dim),
                qdata.point_size()
            ));
        }

        Ok(Self {
            trial_restriction,
            trial_basis,
            test_restriction,
            test_basis,
            rule,
            qfunction,
            qdata,
            workspace: ThreadLocal::new(),
        })
    }

    pub fn trial_basis(&self) -> &ElementBasis<T> {
        &self.trial_basis
    }

    pub fn test_basis(&self) -> &ElementBasis<T> {
        &self.test_basis
    }

    pub fn quadrature_rule(&self) -> &Arc<QuadratureRule<T>> {
        &self.rule
    }

    pub fn qfunction(&self) -> &Arc<dyn QFunction<T>> {
        &self.qfunction
    }

    pub fn quadrature_data(&self) -> &Arc<QuadratureData<T>> {
        &self.qdata
    }

    /// Whether both kernels reference the same quadrature data allocation.
    pub fn shares_quadrature_data_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.qdata, &other.qdata)
    }

    /// The kernel of the transposed local action.
    ///
    /// Returns `None` if the qfunction has no transpose.
    pub fn transpose(&self) -> Option<Self> {
        let qfunction_t = self.qfunction.transpose()?;
        Some(Self {
            trial_restriction: self.test_restriction.clone(),
            trial_basis: self.test_basis.clone(),
            test_restriction: self.trial_restriction.clone(),
            test_basis: self.trial_basis.clone(),
            rule: Arc::clone(&self.rule),
            qfunction: qfunction_t,
            qdata: Arc::clone(&self.qdata),
            workspace: ThreadLocal::new(),
        })
    }

    /// Evaluates the trial basis at the quadrature points, applies the qfunction and leaves
    /// the pointwise result in `buffers.output`.
    fn apply_at_points(&self, element_index: usize, u: DVectorView<T>, buffers: &mut PointBuffers<T>) {
        let dim = self.rule.dim();
        let in_mode = self.qfunction.input_mode();
        let out_mode = self.qfunction.output_mode();
        let in_components = self.trial_basis.num_components(in_mode);
        let out_components = self.test_basis.num_components(out_mode);
        let num_points = self.rule.num_points();

        buffers.input.resize_vertically_mut(in_components * num_points, T::zero());
        buffers.output.resize_vertically_mut(out_components * num_points, T::zero());
        self.trial_basis.apply(in_mode, u, &mut buffers.input);

        let input = buffers.input.as_slice();
        let output = buffers.output.as_mut_slice();
        for q in 0..num_points {
            self.qfunction.apply_point(
                dim,
                self.qdata.point(element_index, q),
                &input[in_components * q..in_components * (q + 1)],
                &mut output[out_components * q..out_components * (q + 1)],
            );
        }
    }
}

impl<T: Real> ElementKernel<T> for QuadratureKernel<T> {
    fn input_restriction(&self) -> &ElementRestriction {
        &self.trial_restriction
    }

    fn output_restriction(&self) -> &ElementRestriction {
        &self.test_restriction
    }

    fn apply_element(&self, element_index: usize, input: DVectorView<T>, output: DVectorViewMut<T>) -> eyre::Result<()> {
        let buffers = &mut *self.workspace.get_or_default().borrow_mut();
        self.apply_at_points(element_index, input, buffers);
        self.test_basis
            .apply_transpose(self.qfunction.output_mode(), &buffers.output, output);
        Ok(())
    }

    fn assemble_element_matrix_into(&self, element_index: usize, mut output: DMatrixViewMut<T>) -> eyre::Result<()> {
        let num_trial = self.trial_basis.num_nodes();
        let num_test = self.test_basis.num_nodes();
        assert_eq!(output.shape(), (num_test, num_trial), "Incompatible element matrix shape");

        // Columns of the probe hold D(q) B_trial e_j for every trial basis function j
        let buffers = &mut *self.workspace.get_or_default().borrow_mut();
        let out_mode = self.qfunction.output_mode();
        let probe_rows = self.test_basis.num_components(out_mode) * self.rule.num_points();
        let mut probe = std::mem::replace(&mut buffers.probe, DMatrix::zeros(0, 0));
        probe.resize_mut(probe_rows, num_trial, T::zero());

        let mut unit = DVector::zeros(num_trial);
        for j in 0..num_trial {
            unit[j] = T::one();
            self.apply_at_points(element_index, DVectorView::from(&unit), buffers);
            probe.column_mut(j).copy_from(&buffers.output);
            unit[j] = T::zero();
        }

        output.gemm_tr(T::one(), self.test_basis.matrix(out_mode), &probe, T::zero());
        buffers.probe = probe;
        Ok(())
    }

    /// Rebuilds restriction and bases from the coarse space, tabulated at the quadrature points
    /// of this kernel, and reuses the rule, qfunction and quadrature data.
    fn coarsen(&self, coarse_space: &dyn FiniteElementSpace<T>) -> Result<Box<dyn ElementKernel<T>>, OperatorError> {
        if coarse_space.num_elements() != self.qdata.num_elements() {
            return Err(OperatorError::DimensionMismatch {
                what: "number of coarse space elements",
                expected: self.qdata.num_elements(),
                actual: coarse_space.num_elements(),
            });
        }
        if coarse_space.reference_dim() != self.rule.dim() {
            return Err(OperatorError::DimensionMismatch {
                what: "coarse space reference dimension",
                expected: self.rule.dim(),
                actual: coarse_space.reference_dim(),
            });
        }

        let restriction = coarse_space.restriction().clone();
        let basis = coarse_space.basis_at(&self.rule);
        debug!(
            "Coarsening quadrature kernel: {} -> {} nodes per element, {} quadrature points reused",
            self.trial_basis.num_nodes(),
            basis.num_nodes(),
            self.rule.num_points()
        );

        let kernel = Self::new(
            restriction.clone(),
            basis.clone(),
            restriction,
            basis,
            Arc::clone(&self.rule),
            Arc::clone(&self.qfunction),
            Arc::clone(&self.qdata),
        )?;
        Ok(Box::new(kernel))
    }
}

/// A kernel storing a precomputed dense matrix for every element.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseElementKernel<T: Real> {
    input_restriction: ElementRestriction,
    output_restriction: ElementRestriction,
    element_matrices: Vec<DMatrix<T>>,
}

impl<T: Real> DenseElementKernel<T> {
    /// # Errors
    ///
    /// Returns [`OperatorError::InvalidArgument`] if the number of matrices or the shape of a
    /// matrix does not match the restrictions.
    pub fn try_new(
        input_restriction: ElementRestriction,
        output_restriction: ElementRestriction,
        element_matrices: Vec<DMatrix<T>>,
    ) -> Result<Self, OperatorError> {
        if input_restriction.num_elements() != output_restriction.num_elements()
            || element_matrices.len() != output_restriction.num_elements()
        {
            return Err(OperatorError::InvalidArgument(format!(
                "{} element matrices given for restrictions with {} and {} elements",
                element_matrices.len(),
                input_restriction.num_elements(),
                output_restriction.num_elements()
            )));
        }
        let shape = (
            output_restriction.element_dof_count(),
            input_restriction.element_dof_count(),
        );
        if let Some(element_index) = element_matrices.iter().position(|m| m.shape() != shape) {
            return Err(OperatorError::InvalidArgument(format!(
                "element matrix {} has shape {:?}, expected {:?}",
                element_index,
                element_matrices[element_index].shape(),
                shape
            )));
        }
        Ok(Self {
            input_restriction,
            output_restriction,
            element_matrices,
        })
    }

    /// A kernel acting on a single space, with square element matrices.
    pub fn try_new_square(
        restriction: ElementRestriction,
        element_matrices: Vec<DMatrix<T>>,
    ) -> Result<Self, OperatorError> {
        Self::try_new(restriction.clone(), restriction, element_matrices)
    }

    pub fn element_matrices(&self) -> &[DMatrix<T>] {
        &self.element_matrices
    }

    /// The kernel with transposed element matrices and swapped restrictions.
    pub fn transpose(&self) -> Self {
        Self {
            input_restriction: self.output_restriction.clone(),
            output_restriction: self.input_restriction.clone(),
            element_matrices: self.element_matrices.iter().map(|m| m.transpose()).collect(),
        }
    }
}

impl<T: Real> ElementKernel<T> for DenseElementKernel<T> {
    fn input_restriction(&self) -> &ElementRestriction {
        &self.input_restriction
    }

    fn output_restriction(&self) -> &ElementRestriction {
        &self.output_restriction
    }

    fn apply_element(
        &self,
        element_index: usize,
        input: DVectorView<T>,
        mut output: DVectorViewMut<T>,
    ) -> eyre::Result<()> {
        output.gemv(T::one(), &self.element_matrices[element_index], &input, T::zero());
        Ok(())
    }

    fn assemble_element_matrix_into(&self, element_index: usize, mut output: DMatrixViewMut<T>) -> eyre::Result<()> {
        output.copy_from(&self.element_matrices[element_index]);
        Ok(())
    }
}
