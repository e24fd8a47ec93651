//! Finite element spaces that kernels are built on and coarsened to.
use crate::basis::ElementBasis;
use crate::error::OperatorError;
use crate::quadrature::QuadratureRule;
use crate::restriction::ElementRestriction;
use crate::Real;
use nalgebra::DMatrixViewMut;
use numeric_literals::replace_float_literals;

/// A finite element space with a reference element basis shared by all elements.
///
/// Element kernels only read the DOF layout and the basis of a space, and the geometry
/// is used when quadrature data is computed.
pub trait FiniteElementSpace<T: Real>: Sync {
    fn reference_dim(&self) -> usize;

    fn num_elements(&self) -> usize;

    /// The size of the global DOF vectors of this space.
    fn num_dofs(&self) -> usize {
        self.restriction().num_dofs()
    }

    /// The restriction from global DOFs to element DOFs.
    fn restriction(&self) -> &ElementRestriction;

    /// Tabulates the reference basis at the points of the given rule.
    fn basis_at(&self, rule: &QuadratureRule<T>) -> ElementBasis<T>;

    /// Populates the Jacobian of the map from reference to physical coordinates.
    ///
    /// The Jacobian has dimensions `reference_dim x reference_dim`.
    fn populate_element_jacobian(
        &self,
        element_index: usize,
        reference_coords: &[T],
        jacobian: DMatrixViewMut<T>,
    );

    fn map_element_reference_coords(
        &self,
        element_index: usize,
        reference_coords: &[T],
        physical_coords: &mut [T],
    );
}

/// A continuous Lagrange space of arbitrary order on a structured box mesh.
///
/// The box `[origin, origin + extents]` is divided into a uniform grid of axis-aligned
/// elements in one to three dimensions. Elements and nodes are both numbered
/// lexicographically with the first coordinate varying fastest. Spaces of different
/// order built on the same grid have identical elements, so one can act as the coarse
/// space of the other.
#[derive(Debug, Clone, PartialEq)]
pub struct LagrangeSpace<T: Real> {
    order: usize,
    elements_per_dim: Vec<usize>,
    origin: Vec<T>,
    element_lengths: Vec<T>,
    restriction: ElementRestriction,
}

impl<T: Real> LagrangeSpace<T> {
    /// Construct a scalar Lagrange space of the given order on the box `[0, extents]`.
    pub fn new(order: usize, elements_per_dim: &[usize], extents: &[T]) -> Result<Self, OperatorError> {
        let origin = vec![T::zero(); extents.len()];
        Self::with_origin(order, elements_per_dim, &origin, extents)
    }

    pub fn with_origin(
        order: usize,
        elements_per_dim: &[usize],
        origin: &[T],
        extents: &[T],
    ) -> Result<Self, OperatorError> {
        let dim = elements_per_dim.len();
        if !(1..=3).contains(&dim) {
            return Err(OperatorError::InvalidArgument(format!(
                "Lagrange spaces are available in 1 to 3 dimensions, requested {}",
                dim
            )));
        }
        if origin.len() != dim || extents.len() != dim {
            return Err(OperatorError::InvalidArgument(
                "origin and extents must have one entry per dimension".to_string(),
            ));
        }
        if order == 0 {
            return Err(OperatorError::InvalidArgument("order must be positive".to_string()));
        }
        if elements_per_dim.iter().any(|&n| n == 0) {
            return Err(OperatorError::InvalidArgument(
                "every dimension needs at least one element".to_string(),
            ));
        }
        if extents.iter().any(|&l| l <= T::zero()) {
            return Err(OperatorError::InvalidArgument("extents must be positive".to_string()));
        }

        let element_lengths = extents
            .iter()
            .zip(elements_per_dim)
            .map(|(&l, &n)| l / T::from_usize(n).expect("Element count must fit in T"))
            .collect();

        let nodes_per_dim: Vec<usize> = elements_per_dim.iter().map(|&n| n * order + 1).collect();
        let num_nodes = nodes_per_dim.iter().product();
        let num_elements: usize = elements_per_dim.iter().product();
        let nodes_per_element_dim = order + 1;
        let element_size = nodes_per_element_dim.pow(dim as u32);

        let mut element_nodes = Vec::with_capacity(num_elements * element_size);
        for element_index in 0..num_elements {
            let element_multi_index = unravel(element_index, elements_per_dim);
            for local_node in 0..element_size {
                let local_multi_index = unravel(local_node, &vec![nodes_per_element_dim; dim]);
                let mut global = 0;
                let mut stride = 1;
                for d in 0..dim {
                    global += stride * (order * element_multi_index[d] + local_multi_index[d]);
                    stride *= nodes_per_dim[d];
                }
                element_nodes.push(global);
            }
        }

        let restriction = ElementRestriction::try_new(num_nodes, element_size, 1, element_nodes)?;

        Ok(Self {
            order,
            elements_per_dim: elements_per_dim.to_vec(),
            origin: origin.to_vec(),
            element_lengths,
            restriction,
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn elements_per_dim(&self) -> &[usize] {
        &self.elements_per_dim
    }
}

/// Lexicographic multi-index of `index` in a grid with the given extents.
fn unravel(mut index: usize, extents: &[usize]) -> Vec<usize> {
    extents
        .iter()
        .map(|&n| {
            let i = index % n;
            index /= n;
            i
        })
        .collect()
}

impl<T: Real> FiniteElementSpace<T> for LagrangeSpace<T> {
    fn reference_dim(&self) -> usize {
        self.elements_per_dim.len()
    }

    fn num_elements(&self) -> usize {
        self.restriction.num_elements()
    }

    fn restriction(&self) -> &ElementRestriction {
        &self.restriction
    }

    fn basis_at(&self, rule: &QuadratureRule<T>) -> ElementBasis<T> {
        assert_eq!(
            rule.dim(),
            self.reference_dim(),
            "Quadrature rule dimension must match the reference dimension of the space"
        );
        ElementBasis::tensor_lagrange(self.order, rule)
    }

    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    fn populate_element_jacobian(
        &self,
        _element_index: usize,
        _reference_coords: &[T],
        mut jacobian: DMatrixViewMut<T>,
    ) {
        let dim = self.reference_dim();
        assert_eq!(jacobian.shape(), (dim, dim), "Incompatible Jacobian shape");
        jacobian.fill(T::zero());
        for d in 0..dim {
            jacobian[(d, d)] = 0.5 * self.element_lengths[d];
        }
    }

    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    fn map_element_reference_coords(
        &self,
        element_index: usize,
        reference_coords: &[T],
        physical_coords: &mut [T],
    ) {
        let dim = self.reference_dim();
        assert_eq!(reference_coords.len(), dim);
        assert_eq!(physical_coords.len(), dim);
        let element_multi_index = unravel(element_index, &self.elements_per_dim);
        for d in 0..dim {
            let h = self.element_lengths[d];
            let offset = T::from_usize(element_multi_index[d]).expect("Element index must fit in T");
            physical_coords[d] = self.origin[d] + h * (offset + 0.5 * (reference_coords[d] + 1.0));
        }
    }
}
