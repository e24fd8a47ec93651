//! Builders for quadrature kernels of common bilinear forms.
//!
//! These compute the quadrature data of a form on a given space once, which is the expensive
//! part of setting up a kernel. Coarse kernels obtained through
//! [`ElementKernel::coarsen`](crate::kernel::ElementKernel::coarsen) reuse it.
use crate::error::OperatorError;
use crate::kernel::QuadratureKernel;
use crate::qfunction::{ConvectionQFunction, DiffusionQFunction, MassQFunction, QFunction, QuadratureData};
use crate::quadrature::QuadratureRule;
use crate::space::FiniteElementSpace;
use crate::Real;
use log::debug;
use nalgebra::{DMatrix, DMatrixViewMut};
use rayon::prelude::*;
use std::sync::Arc;

/// Geometric quantities at a single quadrature point.
struct PointGeometry<'a, T: Real> {
    /// Quadrature weight times the absolute Jacobian determinant.
    weighted_det: T,
    /// Inverse of the reference Jacobian.
    inverse_jacobian: &'a DMatrix<T>,
    physical_coords: &'a [T],
}

/// Computes quadrature data for every element and point of `space` in parallel.
///
/// `point_data` receives the geometry of a point and writes `point_size` values.
fn compute_quadrature_data<T, S, F>(
    space: &S,
    rule: &QuadratureRule<T>,
    point_size: usize,
    point_data: F,
) -> Result<QuadratureData<T>, OperatorError>
where
    T: Real,
    S: FiniteElementSpace<T> + ?Sized,
    F: Fn(&PointGeometry<T>, &mut [T]) + Sync,
{
    let dim = space.reference_dim();
    if rule.dim() != dim {
        return Err(OperatorError::DimensionMismatch {
            what: "quadrature rule dimension",
            expected: dim,
            actual: rule.dim(),
        });
    }

    let num_elements = space.num_elements();
    let num_points = rule.num_points();
    let element_size = num_points * point_size;
    let mut values = vec![T::zero(); num_elements * element_size];
    if element_size == 0 {
        return Ok(QuadratureData::from_values(num_elements, num_points, point_size, values));
    }

    values
        .par_chunks_mut(element_size)
        .enumerate()
        .try_for_each_init(
            || (DMatrix::zeros(dim, dim), vec![T::zero(); dim]),
            |(jacobian, physical_coords), (element_index, element_values)| {
                for (q, point_values) in element_values.chunks_exact_mut(point_size).enumerate() {
                    let xi = rule.point(q);
                    space.populate_element_jacobian(element_index, xi, DMatrixViewMut::from(&mut *jacobian));
                    space.map_element_reference_coords(element_index, xi, physical_coords);
                    let det = jacobian.determinant();
                    let inverse_jacobian = jacobian.clone().try_inverse().ok_or_else(|| {
                        OperatorError::InvalidArgument(format!(
                            "singular element Jacobian in element {}",
                            element_index
                        ))
                    })?;
                    let geometry = PointGeometry {
                        weighted_det: rule.weights()[q] * det.abs(),
                        inverse_jacobian: &inverse_jacobian,
                        physical_coords: physical_coords.as_slice(),
                    };
                    point_data(&geometry, point_values);
                }
                Ok::<(), OperatorError>(())
            },
        )?;

    Ok(QuadratureData::from_values(num_elements, num_points, point_size, values))
}

fn build_kernel_on_space<T: Real, S: FiniteElementSpace<T> + ?Sized>(
    space: &S,
    rule: QuadratureRule<T>,
    qfunction: Arc<dyn QFunction<T>>,
    qdata: QuadratureData<T>,
) -> Result<QuadratureKernel<T>, OperatorError> {
    let basis = space.basis_at(&rule);
    let restriction = space.restriction().clone();
    QuadratureKernel::new(
        restriction.clone(),
        basis.clone(),
        restriction,
        basis,
        Arc::new(rule),
        qfunction,
        Arc::new(qdata),
    )
}

/// Builds the kernel of the mass form `(rho u, v)`.
///
/// `density` is evaluated at the physical coordinates of every quadrature point.
pub fn mass_kernel<T, S, F>(
    space: &S,
    rule: QuadratureRule<T>,
    density: F,
) -> Result<QuadratureKernel<T>, OperatorError>
where
    T: Real,
    S: FiniteElementSpace<T> + ?Sized,
    F: Fn(&[T]) -> T + Sync,
{
    let qfunction: Arc<dyn QFunction<T>> = Arc::new(MassQFunction);
    let point_size = qfunction.qdata_size(space.reference_dim());
    let qdata = compute_quadrature_data(space, &rule, point_size, |geometry, data| {
        data[0] = geometry.weighted_det * density(geometry.physical_coords);
    })?;
    debug!("Built mass kernel on {} elements", qdata.num_elements());
    build_kernel_on_space(space, rule, qfunction, qdata)
}

/// Builds the kernel of the diffusion form `(k grad u, grad v)`.
///
/// `conductivity` is evaluated at the physical coordinates of every quadrature point.
pub fn diffusion_kernel<T, S, F>(
    space: &S,
    rule: QuadratureRule<T>,
    conductivity: F,
) -> Result<QuadratureKernel<T>, OperatorError>
where
    T: Real,
    S: FiniteElementSpace<T> + ?Sized,
    F: Fn(&[T]) -> T + Sync,
{
    let dim = space.reference_dim();
    let qfunction: Arc<dyn QFunction<T>> = Arc::new(DiffusionQFunction);
    let point_size = qfunction.qdata_size(dim);
    let qdata = compute_quadrature_data(space, &rule, point_size, |geometry, data| {
        let k = conductivity(geometry.physical_coords);
        let j_inv = geometry.inverse_jacobian;
        let d = j_inv * j_inv.transpose() * (geometry.weighted_det * k);
        data.copy_from_slice(d.as_slice());
    })?;
    debug!("Built diffusion kernel on {} elements", qdata.num_elements());
    build_kernel_on_space(space, rule, qfunction, qdata)
}

/// Builds the kernel of the convection form `(b . grad u, v)`.
///
/// `velocity` receives the physical coordinates of a quadrature point and writes the
/// velocity there. The form is not symmetric; its transpose kernel is obtained through
/// [`QuadratureKernel::transpose`].
pub fn convection_kernel<T, S, F>(
    space: &S,
    rule: QuadratureRule<T>,
    velocity: F,
) -> Result<QuadratureKernel<T>, OperatorError>
where
    T: Real,
    S: FiniteElementSpace<T> + ?Sized,
    F: Fn(&[T], &mut [T]) + Sync,
{
    let dim = space.reference_dim();
    let qfunction: Arc<dyn QFunction<T>> = Arc::new(ConvectionQFunction);
    let point_size = qfunction.qdata_size(dim);
    let qdata = compute_quadrature_data(space, &rule, point_size, |geometry, data| {
        let mut b = vec![T::zero(); dim];
        velocity(geometry.physical_coords, &mut b);
        for (i, c) in data.iter_mut().enumerate() {
            *c = T::zero();
            for (j, b_j) in b.iter().enumerate() {
                *c += geometry.inverse_jacobian[(i, j)] * *b_j;
            }
            *c *= geometry.weighted_det;
        }
    })?;
    debug!("Built convection kernel on {} elements", qdata.num_elements());
    build_kernel_on_space(space, rule, qfunction, qdata)
}
