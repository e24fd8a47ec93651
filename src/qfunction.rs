//! Pointwise operators evaluated at quadrature points, and the data they consume.
use crate::basis::EvalMode;
use crate::Real;
use nalgebra::Scalar;
use std::fmt::Debug;
use std::sync::Arc;

/// Per-element, per-quadrature-point coefficient data.
///
/// This holds the expensive part of a quadrature-based kernel: quadrature weights, geometric
/// factors and material coefficients, combined into `point_size` values per point. Kernels
/// hold it behind an [`Arc`] so that coarse kernels can share it with the fine kernel they
/// were built from.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureData<T: Scalar> {
    num_elements: usize,
    num_points: usize,
    point_size: usize,
    values: Vec<T>,
}

impl<T: Scalar> QuadratureData<T> {
    /// # Panics
    ///
    /// Panics if `values` does not hold exactly `point_size` values for every point of
    /// every element.
    pub fn from_values(num_elements: usize, num_points: usize, point_size: usize, values: Vec<T>) -> Self {
        assert_eq!(
            values.len(),
            num_elements * num_points * point_size,
            "Quadrature data length does not match its layout."
        );
        Self {
            num_elements,
            num_points,
            point_size,
            values,
        }
    }

    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    pub fn num_points(&self) -> usize {
        self.num_points
    }

    pub fn point_size(&self) -> usize {
        self.point_size
    }

    pub fn element(&self, element_index: usize) -> &[T] {
        let n = self.num_points * self.point_size;
        &self.values[n * element_index..n * (element_index + 1)]
    }

    pub fn point(&self, element_index: usize, point_index: usize) -> &[T] {
        let s = self.point_size;
        &self.element(element_index)[s * point_index..s * (point_index + 1)]
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }
}

/// An operator acting pointwise on basis evaluations at quadrature points.
///
/// The input holds the trial basis evaluation in [`input_mode`](Self::input_mode) at a single
/// point, the output receives the values that the test basis is applied to in
/// [`output_mode`](Self::output_mode). Both have one value per component of the mode.
pub trait QFunction<T: Real>: Debug + Send + Sync {
    fn input_mode(&self) -> EvalMode;

    fn output_mode(&self) -> EvalMode;

    /// Number of quadrature data values stored per point.
    fn qdata_size(&self, reference_dim: usize) -> usize;

    /// Overwrites `output` with the action of the operator at a single point.
    fn apply_point(&self, reference_dim: usize, qdata: &[T], input: &[T], output: &mut [T]);

    /// The pointwise transpose, acting on the same quadrature data, if available.
    fn transpose(&self) -> Option<Arc<dyn QFunction<T>>>;
}

fn mode_size(mode: EvalMode, reference_dim: usize) -> usize {
    match mode {
        EvalMode::Interp => 1,
        EvalMode::Grad => reference_dim,
    }
}

/// Checks the slice lengths passed to [`QFunction::apply_point`].
fn check_point_sizes<T: Real>(
    qfunction: &dyn QFunction<T>,
    reference_dim: usize,
    qdata: &[T],
    input: &[T],
    output: &[T],
) {
    debug_assert_eq!(qdata.len(), qfunction.qdata_size(reference_dim));
    debug_assert_eq!(input.len(), mode_size(qfunction.input_mode(), reference_dim));
    debug_assert_eq!(output.len(), mode_size(qfunction.output_mode(), reference_dim));
}

/// The mass operator `v = q u`, with `q = w |det J| rho`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MassQFunction;

impl<T: Real> QFunction<T> for MassQFunction {
    fn input_mode(&self) -> EvalMode {
        EvalMode::Interp
    }

    fn output_mode(&self) -> EvalMode {
        EvalMode::Interp
    }

    fn qdata_size(&self, _reference_dim: usize) -> usize {
        1
    }

    fn apply_point(&self, reference_dim: usize, qdata: &[T], input: &[T], output: &mut [T]) {
        check_point_sizes(self, reference_dim, qdata, input, output);
        output[0] = qdata[0] * input[0];
    }

    fn transpose(&self) -> Option<Arc<dyn QFunction<T>>> {
        Some(Arc::new(*self))
    }
}

/// The diffusion operator on reference gradients, `v = D grad u`.
///
/// The quadrature data holds the symmetric matrix `D = w |det J| k J^{-1} J^{-T}` in
/// column-major order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffusionQFunction;

impl<T: Real> QFunction<T> for DiffusionQFunction {
    fn input_mode(&self) -> EvalMode {
        EvalMode::Grad
    }

    fn output_mode(&self) -> EvalMode {
        EvalMode::Grad
    }

    fn qdata_size(&self, reference_dim: usize) -> usize {
        reference_dim * reference_dim
    }

    fn apply_point(&self, reference_dim: usize, qdata: &[T], input: &[T], output: &mut [T]) {
        check_point_sizes(self, reference_dim, qdata, input, output);
        let d = reference_dim;
        for i in 0..d {
            output[i] = T::zero();
            for j in 0..d {
                output[i] += qdata[d * j + i] * input[j];
            }
        }
    }

    fn transpose(&self) -> Option<Arc<dyn QFunction<T>>> {
        Some(Arc::new(*self))
    }
}

/// The convection operator `v = c . grad u`, with `c = w |det J| J^{-1} b` for a velocity `b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConvectionQFunction;

impl<T: Real> QFunction<T> for ConvectionQFunction {
    fn input_mode(&self) -> EvalMode {
        EvalMode::Grad
    }

    fn output_mode(&self) -> EvalMode {
        EvalMode::Interp
    }

    fn qdata_size(&self, reference_dim: usize) -> usize {
        reference_dim
    }

    fn apply_point(&self, reference_dim: usize, qdata: &[T], input: &[T], output: &mut [T]) {
        check_point_sizes(self, reference_dim, qdata, input, output);
        output[0] = T::zero();
        for (c, g) in qdata.iter().zip(input) {
            output[0] += *c * *g;
        }
    }

    fn transpose(&self) -> Option<Arc<dyn QFunction<T>>> {
        Some(Arc::new(ConvectionTransposeQFunction))
    }
}

/// The transpose of [`ConvectionQFunction`], `v = c u`, tested against reference gradients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConvectionTransposeQFunction;

impl<T: Real> QFunction<T> for ConvectionTransposeQFunction {
    fn input_mode(&self) -> EvalMode {
        EvalMode::Interp
    }

    fn output_mode(&self) -> EvalMode {
        EvalMode::Grad
    }

    fn qdata_size(&self, reference_dim: usize) -> usize {
        reference_dim
    }

    fn apply_point(&self, reference_dim: usize, qdata: &[T], input: &[T], output: &mut [T]) {
        check_point_sizes(self, reference_dim, qdata, input, output);
        for (v, c) in output.iter_mut().zip(qdata) {
            *v = *c * input[0];
        }
    }

    fn transpose(&self) -> Option<Arc<dyn QFunction<T>>> {
        Some(Arc::new(ConvectionQFunction))
    }
}
