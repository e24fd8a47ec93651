//! Composite matrix-free operators assembled from element kernels.
use crate::assembly::compute_element_matrices;
use crate::error::OperatorError;
use crate::kernel::ElementKernel;
use crate::Real;
use log::debug;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::ops::Index;

/// The action of a linear operator `A: R^width -> R^height` on vectors.
///
/// Output vectors are exclusive borrows, so an output can never alias the input.
pub trait LinearOperator<T: Real> {
    fn height(&self) -> usize;

    fn width(&self) -> usize;

    /// Overwrites `y` with `A x`.
    fn mult(&self, x: DVectorView<T>, y: DVectorViewMut<T>) -> Result<(), OperatorError>;

    /// Computes `y += a A x`.
    fn add_mult(&self, x: DVectorView<T>, y: DVectorViewMut<T>, a: T) -> Result<(), OperatorError>;

    /// Overwrites `y` with `A^T x`.
    fn mult_transpose(&self, x: DVectorView<T>, y: DVectorViewMut<T>) -> Result<(), OperatorError>;

    /// Computes `y += a A^T x`.
    fn add_mult_transpose(&self, x: DVectorView<T>, y: DVectorViewMut<T>, a: T) -> Result<(), OperatorError>;

    /// Overwrites `diag` with the diagonal of `A`.
    fn assemble_diagonal(&self, diag: DVectorViewMut<T>) -> Result<(), OperatorError>;
}

/// Whether the transpose action of an operator is its forward action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Symmetry {
    /// Transpose action is evaluated with the transpose kernel of every kernel pair.
    #[default]
    General,
    /// The represented form is symmetric. Transpose action delegates to the forward action,
    /// and transpose kernels are never evaluated.
    Symmetric,
}

/// A forward element kernel and, optionally, the kernel of its transposed local action.
#[derive(Debug)]
pub struct KernelPair<T: Real> {
    forward: Box<dyn ElementKernel<T>>,
    transpose: Option<Box<dyn ElementKernel<T>>>,
}

impl<T: Real> KernelPair<T> {
    pub fn forward(&self) -> &dyn ElementKernel<T> {
        self.forward.as_ref()
    }

    pub fn transpose(&self) -> Option<&dyn ElementKernel<T>> {
        self.transpose.as_deref()
    }
}

/// Scratch vectors reused across applications of an operator.
///
/// The element buffers grow with every registered kernel to fit its E-vectors. The global
/// buffers are sized once for the L-vectors of the operator.
#[derive(Debug)]
struct OperatorWorkspace<T> {
    element_input: Vec<T>,
    element_output: Vec<T>,
    global_input: Vec<T>,
    accumulator: Vec<T>,
}

impl<T> Default for OperatorWorkspace<T> {
    fn default() -> Self {
        Self {
            element_input: Vec::new(),
            element_output: Vec::new(),
            global_input: Vec::new(),
            accumulator: Vec::new(),
        }
    }
}

/// Grows `buffer` to at least `len` entries without aborting on allocation failure.
fn grow_buffer<T: Real>(buffer: &mut Vec<T>, len: usize) -> Result<(), OperatorError> {
    if buffer.len() < len {
        buffer
            .try_reserve_exact(len - buffer.len())
            .map_err(|_| OperatorError::Allocation { requested: len })?;
        buffer.resize(len, T::zero());
    }
    Ok(())
}

/// A matrix-free operator summing the actions of a list of element kernels.
///
/// The operator represents
///
/// ```text
/// A = M^{-1} sum_k P_k^T K_k Q_k
/// ```
///
/// where `Q_k` gathers the input of kernel `k` from a global vector, `K_k` is its
/// element-local action, `P_k^T` scatters and sums its output into a global vector, and `M`
/// is the diagonal matrix of DOF multiplicities (the identity unless
/// [`set_dof_multiplicity`](Self::set_dof_multiplicity) was called).
///
/// Registration of kernels and the multiplicity must happen before the operator is used.
/// The operator owns scratch buffers for all of its applications, so it is not `Sync`.
///
/// Input and output of an application cannot alias:
///
/// ```compile_fail
/// use fenris_matfree::{CompositeOperator, LinearOperator};
/// use fenris_matfree::nalgebra::{DVector, DVectorView, DVectorViewMut};
///
/// let op = CompositeOperator::<f64>::new(3, 3);
/// let mut x = DVector::zeros(3);
/// op.mult(DVectorView::from(&x), DVectorViewMut::from(&mut x)).unwrap();
/// ```
#[derive(Debug)]
pub struct CompositeOperator<T: Real> {
    height: usize,
    width: usize,
    symmetry: Symmetry,
    kernels: Vec<KernelPair<T>>,
    dof_multiplicity: Option<DVector<T>>,
    workspace: RefCell<OperatorWorkspace<T>>,
    used: Cell<bool>,
}

impl<T: Real> CompositeOperator<T> {
    /// An empty operator mapping vectors of length `width` to vectors of length `height`.
    pub fn new(height: usize, width: usize) -> Self {
        Self::with_symmetry(height, width, Symmetry::General)
    }

    /// An empty square operator whose transpose action is its forward action.
    pub fn new_symmetric(size: usize) -> Self {
        Self::with_symmetry(size, size, Symmetry::Symmetric)
    }

    /// # Panics
    ///
    /// Panics if `symmetry` is [`Symmetry::Symmetric`] and the operator is not square.
    pub fn with_symmetry(height: usize, width: usize, symmetry: Symmetry) -> Self {
        assert!(
            symmetry == Symmetry::General || height == width,
            "Symmetric operators must be square"
        );
        Self {
            height,
            width,
            symmetry,
            kernels: Vec::new(),
            dof_multiplicity: None,
            workspace: RefCell::new(OperatorWorkspace {
                global_input: vec![T::zero(); height],
                accumulator: vec![T::zero(); height.max(width)],
                ..OperatorWorkspace::default()
            }),
            used: Cell::new(false),
        }
    }

    pub fn symmetry(&self) -> Symmetry {
        self.symmetry
    }

    pub fn is_symmetric(&self) -> bool {
        self.symmetry == Symmetry::Symmetric
    }

    /// Number of registered kernel pairs.
    pub fn num_kernels(&self) -> usize {
        self.kernels.len()
    }

    pub fn kernel_pairs(&self) -> &[KernelPair<T>] {
        &self.kernels
    }

    pub fn dof_multiplicity(&self) -> Option<&DVector<T>> {
        self.dof_multiplicity.as_ref()
    }

    /// Registers a kernel pair and grows the scratch buffers to fit it.
    ///
    /// The forward kernel must read from global vectors of length `width` and write to global
    /// vectors of length `height`, and the transpose kernel the other way around. Both must
    /// cover the same number of elements as their restrictions.
    ///
    /// Symmetric operators apply the forward kernel for transposes, so a transpose kernel
    /// passed to a symmetric operator is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::DimensionMismatch`] if a kernel does not fit the operator and
    /// [`OperatorError::Allocation`] if scratch memory cannot be reserved. The operator is
    /// left unchanged on error.
    pub fn add_kernel(
        &mut self,
        forward: Box<dyn ElementKernel<T>>,
        mut transpose: Option<Box<dyn ElementKernel<T>>>,
    ) -> Result<(), OperatorError> {
        if self.is_symmetric() && transpose.take().is_some() {
            debug!("Dropping transpose kernel of pair {} on symmetric operator", self.kernels.len());
        }

        let check = |what: &'static str, expected: usize, actual: usize| {
            if expected == actual {
                Ok(())
            } else {
                Err(OperatorError::DimensionMismatch { what, expected, actual })
            }
        };

        check(
            "forward kernel input space",
            self.width,
            forward.input_restriction().num_dofs(),
        )?;
        check(
            "forward kernel output space",
            self.height,
            forward.output_restriction().num_dofs(),
        )?;
        check(
            "forward kernel input elements",
            forward.num_elements(),
            forward.input_restriction().num_elements(),
        )?;
        check(
            "forward kernel output elements",
            forward.num_elements(),
            forward.output_restriction().num_elements(),
        )?;
        if let Some(transpose) = &transpose {
            check(
                "transpose kernel input space",
                self.height,
                transpose.input_restriction().num_dofs(),
            )?;
            check(
                "transpose kernel output space",
                self.width,
                transpose.output_restriction().num_dofs(),
            )?;
            check(
                "transpose kernel elements",
                forward.num_elements(),
                transpose.num_elements(),
            )?;
            check(
                "transpose kernel input elements",
                transpose.num_elements(),
                transpose.input_restriction().num_elements(),
            )?;
            check(
                "transpose kernel output elements",
                transpose.num_elements(),
                transpose.output_restriction().num_elements(),
            )?;
        }

        let mut element_input_len = forward.input_restriction().e_size();
        let mut element_output_len = forward.output_restriction().e_size();
        if let Some(transpose) = &transpose {
            element_input_len = element_input_len.max(transpose.input_restriction().e_size());
            element_output_len = element_output_len.max(transpose.output_restriction().e_size());
        }

        let workspace = self.workspace.get_mut();
        grow_buffer(&mut workspace.element_input, element_input_len)?;
        grow_buffer(&mut workspace.element_output, element_output_len)?;

        debug!(
            "Registered kernel pair {} on {} elements ({} x {} local, transpose: {})",
            self.kernels.len(),
            forward.num_elements(),
            forward.output_restriction().element_dof_count(),
            forward.input_restriction().element_dof_count(),
            transpose.is_some()
        );
        self.kernels.push(KernelPair { forward, transpose });
        Ok(())
    }

    /// Sets the multiplicity of every output DOF, by which the summed kernel actions are divided.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::MultiplicityAfterUse`] once the operator has been applied,
    /// [`OperatorError::DimensionMismatch`] if the length differs from the operator height and
    /// [`OperatorError::InvalidMultiplicity`] if an entry is not positive.
    pub fn set_dof_multiplicity(&mut self, multiplicity: DVector<T>) -> Result<(), OperatorError> {
        if self.used.get() {
            return Err(OperatorError::MultiplicityAfterUse);
        }
        if multiplicity.len() != self.height {
            return Err(OperatorError::DimensionMismatch {
                what: "DOF multiplicity",
                expected: self.height,
                actual: multiplicity.len(),
            });
        }
        if let Some(index) = multiplicity.iter().position(|&m| !(m > T::zero())) {
            return Err(OperatorError::InvalidMultiplicity { index });
        }
        self.dof_multiplicity = Some(multiplicity);
        Ok(())
    }

    fn check_vector(what: &'static str, expected: usize, actual: usize) -> Result<(), OperatorError> {
        if expected != actual {
            return Err(OperatorError::DimensionMismatch { what, expected, actual });
        }
        Ok(())
    }

    /// Fails with the index of the first kernel pair lacking a transpose kernel.
    fn check_transpose_available(&self) -> Result<(), OperatorError> {
        match self.kernels.iter().position(|pair| pair.transpose.is_none()) {
            Some(kernel_index) => Err(OperatorError::TransposeUnsupported { kernel_index }),
            None => Ok(()),
        }
    }

    /// Accumulates `P^T K Q x` of a single kernel into `accumulator`.
    fn apply_kernel(
        kernel: &dyn ElementKernel<T>,
        x: &[T],
        accumulator: &mut [T],
        element_input: &mut [T],
        element_output: &mut [T],
    ) -> Result<(), OperatorError> {
        let input_restriction = kernel.input_restriction();
        let output_restriction = kernel.output_restriction();
        let u = &mut element_input[..input_restriction.e_size()];
        let v = &mut element_output[..output_restriction.e_size()];
        input_restriction.gather(x, u);
        kernel.apply_elements(u, v)?;
        output_restriction.scatter_add(v, accumulator);
        Ok(())
    }

    /// Overwrites `y` with `A x`, or adds `a A x` to it if `overwrite` is false.
    ///
    /// Nothing is written to `y` if a kernel fails.
    fn apply_forward(&self, x: DVectorView<T>, mut y: DVectorViewMut<T>, a: T, overwrite: bool) -> Result<(), OperatorError> {
        Self::check_vector("input vector", self.width, x.len())?;
        Self::check_vector("output vector", self.height, y.len())?;
        self.used.set(true);

        let workspace = &mut *self.workspace.borrow_mut();
        let accumulator = &mut workspace.accumulator[..self.height];
        accumulator.fill(T::zero());
        for pair in &self.kernels {
            Self::apply_kernel(
                pair.forward(),
                x.as_slice(),
                accumulator,
                &mut workspace.element_input,
                &mut workspace.element_output,
            )?;
        }
        if let Some(multiplicity) = &self.dof_multiplicity {
            for (value, m) in accumulator.iter_mut().zip(multiplicity.iter()) {
                *value /= *m;
            }
        }

        let accumulated = DVectorView::from_slice(accumulator, self.height);
        if overwrite {
            y.copy_from(&accumulated);
        } else {
            y.axpy(a, &accumulated, T::one());
        }
        Ok(())
    }

    /// Like [`apply_forward`](Self::apply_forward), using the transpose kernels.
    fn apply_transpose(
        &self,
        x: DVectorView<T>,
        mut y: DVectorViewMut<T>,
        a: T,
        overwrite: bool,
    ) -> Result<(), OperatorError> {
        self.check_transpose_available()?;
        Self::check_vector("input vector", self.height, x.len())?;
        Self::check_vector("output vector", self.width, y.len())?;
        self.used.set(true);

        let workspace = &mut *self.workspace.borrow_mut();
        let scaled_input = &mut workspace.global_input[..self.height];
        scaled_input.copy_from_slice(x.as_slice());
        if let Some(multiplicity) = &self.dof_multiplicity {
            for (value, m) in scaled_input.iter_mut().zip(multiplicity.iter()) {
                *value /= *m;
            }
        }

        let accumulator = &mut workspace.accumulator[..self.width];
        accumulator.fill(T::zero());
        for pair in &self.kernels {
            if let Some(transpose) = pair.transpose() {
                Self::apply_kernel(
                    transpose,
                    scaled_input,
                    accumulator,
                    &mut workspace.element_input,
                    &mut workspace.element_output,
                )?;
            }
        }

        let accumulated = DVectorView::from_slice(accumulator, self.width);
        if overwrite {
            y.copy_from(&accumulated);
        } else {
            y.axpy(a, &accumulated, T::one());
        }
        Ok(())
    }
}

impl<T: Real> Index<usize> for CompositeOperator<T> {
    type Output = dyn ElementKernel<T>;

    /// The forward kernel of the kernel pair with the given index.
    fn index(&self, index: usize) -> &Self::Output {
        self.kernels[index].forward.as_ref()
    }
}

impl<T: Real> LinearOperator<T> for CompositeOperator<T> {
    fn height(&self) -> usize {
        self.height
    }

    fn width(&self) -> usize {
        self.width
    }

    fn mult(&self, x: DVectorView<T>, y: DVectorViewMut<T>) -> Result<(), OperatorError> {
        self.apply_forward(x, y, T::one(), true)
    }

    fn add_mult(&self, x: DVectorView<T>, y: DVectorViewMut<T>, a: T) -> Result<(), OperatorError> {
        Self::check_vector("input vector", self.width, x.len())?;
        Self::check_vector("output vector", self.height, y.len())?;
        if a == T::zero() {
            return Ok(());
        }
        self.apply_forward(x, y, a, false)
    }

    fn mult_transpose(&self, x: DVectorView<T>, y: DVectorViewMut<T>) -> Result<(), OperatorError> {
        match self.symmetry {
            Symmetry::Symmetric => self.mult(x, y),
            Symmetry::General => self.apply_transpose(x, y, T::one(), true),
        }
    }

    fn add_mult_transpose(&self, x: DVectorView<T>, y: DVectorViewMut<T>, a: T) -> Result<(), OperatorError> {
        match self.symmetry {
            Symmetry::Symmetric => self.add_mult(x, y, a),
            Symmetry::General => {
                self.check_transpose_available()?;
                Self::check_vector("input vector", self.height, x.len())?;
                Self::check_vector("output vector", self.width, y.len())?;
                if a == T::zero() {
                    return Ok(());
                }
                self.apply_transpose(x, y, a, false)
            }
        }
    }

    /// Sums the diagonal entries of all element matrices into the global diagonal and
    /// divides by the DOF multiplicity.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::NotSquare`] for rectangular operators.
    fn assemble_diagonal(&self, mut diag: DVectorViewMut<T>) -> Result<(), OperatorError> {
        if self.height != self.width {
            return Err(OperatorError::NotSquare {
                height: self.height,
                width: self.width,
            });
        }
        Self::check_vector("diagonal vector", self.height, diag.len())?;
        self.used.set(true);

        let workspace = &mut *self.workspace.borrow_mut();
        let accumulator = &mut workspace.accumulator[..self.height];
        accumulator.fill(T::zero());

        for pair in &self.kernels {
            // Entry i of each element holds the sum of its row i over columns with the same DOF
            let element_diagonals = compute_element_matrices(pair.forward(), |_, row_dofs, col_dofs, matrix| {
                row_dofs
                    .iter()
                    .enumerate()
                    .map(|(i, row_dof)| {
                        col_dofs
                            .iter()
                            .enumerate()
                            .filter(|(_, col_dof)| *col_dof == row_dof)
                            .fold(T::zero(), |sum, (j, _)| sum + matrix[(i, j)])
                    })
                    .collect::<Vec<_>>()
            })?;

            let restriction = pair.forward().output_restriction();
            let mut dofs = vec![0; restriction.element_dof_count()];
            for (element_index, element_diagonal) in element_diagonals.iter().enumerate() {
                restriction.populate_element_dofs(&mut dofs, element_index);
                for (dof, value) in dofs.iter().zip(element_diagonal) {
                    accumulator[*dof] += *value;
                }
            }
        }

        if let Some(multiplicity) = &self.dof_multiplicity {
            for (value, m) in accumulator.iter_mut().zip(multiplicity.iter()) {
                *value /= *m;
            }
        }
        diag.copy_from_slice(accumulator);
        Ok(())
    }
}
