//! Quadrature rules on the reference domain `[-1, 1]^d`.
use crate::error::OperatorError;
use crate::Real;
use fenris_quadrature::univariate;
use nalgebra::Scalar;

/// A quadrature rule in `dim` reference dimensions.
///
/// Points are stored point-major, i.e. coordinate `d` of point `q` is located at
/// index `dim * q + d`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureRule<T: Scalar> {
    dim: usize,
    weights: Vec<T>,
    points: Vec<T>,
}

impl<T: Scalar> QuadratureRule<T> {
    /// Construct a rule from weights and flattened points.
    ///
    /// # Panics
    ///
    /// Panics if the number of point coordinates does not match `dim` times the number
    /// of weights.
    pub fn from_weights_and_points(dim: usize, weights: Vec<T>, points: Vec<T>) -> Self {
        assert_eq!(
            dim * weights.len(),
            points.len(),
            "Quadrature points and weights must describe the same number of points."
        );
        Self { dim, weights, points }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_points(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[T] {
        &self.weights
    }

    pub fn point(&self, index: usize) -> &[T] {
        &self.points[self.dim * index..self.dim * (index + 1)]
    }

    pub fn points(&self) -> &[T] {
        &self.points
    }
}

/// A tensor-product Gauss rule for the reference domain `[-1, 1]^dim`.
///
/// The rule has `points_per_dim` points in every direction and integrates polynomials of
/// degree `2 * points_per_dim - 1` in each variable exactly. The first coordinate varies
/// fastest.
pub fn gauss<T: Real>(dim: usize, points_per_dim: usize) -> Result<QuadratureRule<T>, OperatorError> {
    if !(1..=3).contains(&dim) {
        return Err(OperatorError::InvalidArgument(format!(
            "Gauss rules are available in 1 to 3 dimensions, requested {}",
            dim
        )));
    }
    if points_per_dim == 0 {
        return Err(OperatorError::InvalidArgument(
            "Gauss rules need at least one point per dimension".to_string(),
        ));
    }

    let (weights1d, points1d) = univariate::gauss(points_per_dim);
    let n = points_per_dim;
    let num_points = n.pow(dim as u32);

    let mut weights: Vec<T> = Vec::with_capacity(num_points);
    let mut points: Vec<T> = Vec::with_capacity(dim * num_points);
    let mut multi_index = vec![0; dim];
    for _ in 0..num_points {
        let mut w = 1.0;
        for &i in &multi_index {
            w *= weights1d[i];
            points.push(nalgebra::convert(points1d[i][0]));
        }
        weights.push(nalgebra::convert(w));
        increment_multi_index(&mut multi_index, n);
    }

    Ok(QuadratureRule::from_weights_and_points(dim, weights, points))
}

/// Advances a lexicographic multi-index whose first entry varies fastest.
pub(crate) fn increment_multi_index(multi_index: &mut [usize], extent: usize) {
    for i in multi_index.iter_mut() {
        *i += 1;
        if *i < extent {
            return;
        }
        *i = 0;
    }
}
