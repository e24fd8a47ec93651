//! Element bases tabulated at quadrature points.
use crate::quadrature::{increment_multi_index, QuadratureRule};
use crate::Real;
use nalgebra::{DMatrix, DVectorView, DVectorViewMut, Scalar};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

/// What a basis evaluates at quadrature points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvalMode {
    /// Function values, one component per point.
    Interp,
    /// Reference gradients, `reference_dim` components per point.
    Grad,
}

/// A reference element basis evaluated at a fixed set of quadrature points.
///
/// With `P` basis functions and `Q` points, the interpolation matrix is `Q x P` and the
/// gradient matrix is `(Q * dim) x P`, where row `dim * q + d` holds the derivative with
/// respect to reference coordinate `d` at point `q`.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementBasis<T: Scalar> {
    reference_dim: usize,
    interp: DMatrix<T>,
    grad: DMatrix<T>,
}

impl<T: Real> ElementBasis<T> {
    /// # Panics
    ///
    /// Panics if the shapes of the interpolation and gradient matrices are inconsistent.
    pub fn from_matrices(reference_dim: usize, interp: DMatrix<T>, grad: DMatrix<T>) -> Self {
        assert_eq!(
            interp.ncols(),
            grad.ncols(),
            "Interpolation and gradient matrices must have the same number of basis functions."
        );
        assert_eq!(
            reference_dim * interp.nrows(),
            grad.nrows(),
            "Gradient matrix must have reference_dim rows per quadrature point."
        );
        Self {
            reference_dim,
            interp,
            grad,
        }
    }

    /// Tabulates the tensor-product Lagrange basis of the given order at the points of `rule`.
    ///
    /// The nodes are equispaced on `[-1, 1]` in each direction, with the first reference
    /// coordinate varying fastest in the local node numbering.
    ///
    /// # Panics
    ///
    /// Panics if `order` is zero.
    pub fn tensor_lagrange(order: usize, rule: &QuadratureRule<T>) -> Self {
        let dim = rule.dim();
        let polynomials = LagrangePolynomials1d::<T>::equispaced(order);
        let n1d = polynomials.num_nodes();
        let num_nodes = n1d.pow(dim as u32);
        let num_points = rule.num_points();

        let mut interp = DMatrix::zeros(num_points, num_nodes);
        let mut grad = DMatrix::zeros(dim * num_points, num_nodes);

        let mut values = vec![vec![T::zero(); n1d]; dim];
        let mut derivatives = vec![vec![T::zero(); n1d]; dim];
        let mut multi_index = vec![0; dim];

        for q in 0..num_points {
            let point = rule.point(q);
            for d in 0..dim {
                polynomials.populate_values(&mut values[d], point[d]);
                polynomials.populate_derivatives(&mut derivatives[d], point[d]);
            }

            multi_index.fill(0);
            for node in 0..num_nodes {
                let mut value = T::one();
                for d in 0..dim {
                    value *= values[d][multi_index[d]];
                }
                interp[(q, node)] = value;

                for d in 0..dim {
                    let mut derivative = T::one();
                    for k in 0..dim {
                        derivative *= if k == d {
                            derivatives[k][multi_index[k]]
                        } else {
                            values[k][multi_index[k]]
                        };
                    }
                    grad[(dim * q + d, node)] = derivative;
                }
                increment_multi_index(&mut multi_index, n1d);
            }
        }

        Self::from_matrices(dim, interp, grad)
    }

    pub fn reference_dim(&self) -> usize {
        self.reference_dim
    }

    pub fn num_nodes(&self) -> usize {
        self.interp.ncols()
    }

    pub fn num_points(&self) -> usize {
        self.interp.nrows()
    }

    /// Number of values per quadrature point produced in the given mode.
    pub fn num_components(&self, mode: EvalMode) -> usize {
        match mode {
            EvalMode::Interp => 1,
            EvalMode::Grad => self.reference_dim,
        }
    }

    pub fn interp(&self) -> &DMatrix<T> {
        &self.interp
    }

    pub fn grad(&self) -> &DMatrix<T> {
        &self.grad
    }

    pub fn matrix(&self, mode: EvalMode) -> &DMatrix<T> {
        match mode {
            EvalMode::Interp => &self.interp,
            EvalMode::Grad => &self.grad,
        }
    }

    /// Computes `output = B u` for the basis matrix `B` of the given mode.
    pub fn apply<'a>(
        &self,
        mode: EvalMode,
        u: impl Into<DVectorView<'a, T>>,
        output: impl Into<DVectorViewMut<'a, T>>,
    ) {
        let mut output = output.into();
        output.gemv(T::one(), self.matrix(mode), &u.into(), T::zero());
    }

    /// Computes `output = B^T v` for the basis matrix `B` of the given mode.
    pub fn apply_transpose<'a>(
        &self,
        mode: EvalMode,
        v: impl Into<DVectorView<'a, T>>,
        output: impl Into<DVectorViewMut<'a, T>>,
    ) {
        let mut output = output.into();
        output.gemv_tr(T::one(), self.matrix(mode), &v.into(), T::zero());
    }
}

/// Lagrange polynomials on `[-1, 1]` associated with a set of distinct nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct LagrangePolynomials1d<T> {
    nodes: Vec<T>,
}

impl<T: Real> LagrangePolynomials1d<T> {
    /// Polynomials of the given order on `order + 1` equispaced nodes, ordered from `-1` to `1`.
    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    pub fn equispaced(order: usize) -> Self {
        assert!(order > 0, "Lagrange polynomials must have positive order");
        let p = T::from_usize(order).expect("Order must fit in T");
        let nodes = (0..=order)
            .map(|i| -1.0 + 2.0 * T::from_usize(i).expect("Node index must fit in T") / p)
            .collect();
        Self { nodes }
    }

    pub fn nodes(&self) -> &[T] {
        &self.nodes
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn populate_values(&self, values: &mut [T], x: T) {
        assert_eq!(values.len(), self.nodes.len());
        for (i, value) in values.iter_mut().enumerate() {
            *value = self.product_without(i, None, x);
        }
    }

    pub fn populate_derivatives(&self, derivatives: &mut [T], x: T) {
        assert_eq!(derivatives.len(), self.nodes.len());
        for (i, derivative) in derivatives.iter_mut().enumerate() {
            let x_i = self.nodes[i];
            *derivative = T::zero();
            for (k, &x_k) in self.nodes.iter().enumerate() {
                if k != i {
                    *derivative += self.product_without(i, Some(k), x) / (x_i - x_k);
                }
            }
        }
    }

    /// Evaluates `prod_{j != i, j != skip} (x - x_j) / (x_i - x_j)`.
    fn product_without(&self, i: usize, skip: Option<usize>, x: T) -> T {
        let x_i = self.nodes[i];
        let mut result = T::one();
        for (j, &x_j) in self.nodes.iter().enumerate() {
            if j != i && Some(j) != skip {
                result *= (x - x_j) / (x_i - x_j);
            }
        }
        result
    }
}
