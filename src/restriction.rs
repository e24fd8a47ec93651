//! Element restrictions: the local-to-global DOF maps of element kernels.
use crate::error::OperatorError;
use crate::Real;
use itertools::izip;
use nalgebra::{DVector, Scalar};
use serde::{Deserialize, Serialize};

/// Maps global DOF vectors (L-vectors) to element-local DOF vectors (E-vectors) and back.
///
/// Every element references the same number of nodes. Each node carries `solution_dim`
/// components, and the global DOF of component `c` of node `n` is `solution_dim * n + c`.
/// In the E-vector, the block of element `e` is contiguous and ordered node by node.
///
/// Two kernels act on the same space exactly when their restrictions compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRestriction {
    num_nodes: usize,
    element_size: usize,
    solution_dim: usize,
    element_nodes: Vec<usize>,
}

impl ElementRestriction {
    /// Construct a restriction from a flat table of element nodes.
    ///
    /// `element_nodes` holds `element_size` consecutive node indices per element.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::InconsistentMapping`] if a node index is not smaller than
    /// `num_nodes`, and [`OperatorError::InvalidArgument`] if the table length is not a
    /// multiple of a non-zero `element_size` or `solution_dim` is zero.
    pub fn try_new(
        num_nodes: usize,
        element_size: usize,
        solution_dim: usize,
        element_nodes: Vec<usize>,
    ) -> Result<Self, OperatorError> {
        if solution_dim == 0 {
            return Err(OperatorError::InvalidArgument(
                "solution dimension must be positive".to_string(),
            ));
        }
        if element_size == 0 {
            if !element_nodes.is_empty() {
                return Err(OperatorError::InvalidArgument(
                    "element size is zero, but element nodes were provided".to_string(),
                ));
            }
        } else if element_nodes.len() % element_size != 0 {
            return Err(OperatorError::InvalidArgument(format!(
                "{} element nodes do not form complete elements of size {}",
                element_nodes.len(),
                element_size
            )));
        }

        if let Some(&index) = element_nodes.iter().find(|&&node| node >= num_nodes) {
            return Err(OperatorError::InconsistentMapping {
                index,
                bound: num_nodes,
            });
        }

        Ok(Self {
            num_nodes,
            element_size,
            solution_dim,
            element_nodes,
        })
    }

    /// Construct a restriction from per-element connectivity.
    ///
    /// All elements must reference the same number of nodes.
    pub fn from_element_connectivity<C>(
        num_nodes: usize,
        solution_dim: usize,
        connectivity: &[C],
    ) -> Result<Self, OperatorError>
    where
        C: AsRef<[usize]>,
    {
        let element_size = connectivity.first().map(|c| c.as_ref().len()).unwrap_or(0);
        let mut element_nodes = Vec::with_capacity(element_size * connectivity.len());
        for (element_index, conn) in connectivity.iter().enumerate() {
            let conn = conn.as_ref();
            if conn.len() != element_size {
                return Err(OperatorError::InvalidArgument(format!(
                    "element {} has {} nodes, expected {}",
                    element_index,
                    conn.len(),
                    element_size
                )));
            }
            element_nodes.extend_from_slice(conn);
        }
        Self::try_new(num_nodes, element_size, solution_dim, element_nodes)
    }

    pub fn num_elements(&self) -> usize {
        if self.element_size == 0 {
            0
        } else {
            self.element_nodes.len() / self.element_size
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Number of nodes per element.
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn solution_dim(&self) -> usize {
        self.solution_dim
    }

    /// The size of the global (L-)vectors this restriction acts on.
    pub fn num_dofs(&self) -> usize {
        self.solution_dim * self.num_nodes
    }

    /// The number of local DOFs of a single element.
    pub fn element_dof_count(&self) -> usize {
        self.solution_dim * self.element_size
    }

    /// The size of the element-local (E-)vectors this restriction produces.
    pub fn e_size(&self) -> usize {
        self.num_elements() * self.element_dof_count()
    }

    pub fn element_nodes(&self, element_index: usize) -> &[usize] {
        let n = self.element_size;
        &self.element_nodes[n * element_index..n * (element_index + 1)]
    }

    /// Writes the global DOF indices of the given element to `output`.
    pub fn populate_element_dofs(&self, output: &mut [usize], element_index: usize) {
        let s = self.solution_dim;
        assert_eq!(
            output.len(),
            self.element_dof_count(),
            "Incompatible slice length for element DOF population"
        );
        for (node_idx, node) in self.element_nodes(element_index).iter().enumerate() {
            for c in 0..s {
                output[s * node_idx + c] = s * node + c;
            }
        }
    }

    /// Gathers the global vector into the element-local vector (L to E).
    pub fn gather<T: Scalar + Copy>(&self, global: &[T], local: &mut [T]) {
        assert_eq!(global.len(), self.num_dofs(), "Global vector has incompatible length");
        assert_eq!(local.len(), self.e_size(), "Local vector has incompatible length");
        let s = self.solution_dim;
        for (node, local_node) in izip!(&self.element_nodes, local.chunks_exact_mut(s)) {
            local_node.copy_from_slice(&global[s * node..s * node + s]);
        }
    }

    /// Adds the element-local vector into the global vector (E to L).
    ///
    /// This is the transpose of [`gather`](Self::gather). Contributions of elements sharing
    /// a DOF are summed.
    pub fn scatter_add<T: Real>(&self, local: &[T], global: &mut [T]) {
        assert_eq!(global.len(), self.num_dofs(), "Global vector has incompatible length");
        assert_eq!(local.len(), self.e_size(), "Local vector has incompatible length");
        let s = self.solution_dim;
        for (node, local_node) in izip!(&self.element_nodes, local.chunks_exact(s)) {
            for (global_value, local_value) in izip!(&mut global[s * node..s * node + s], local_node) {
                *global_value += *local_value;
            }
        }
    }

    /// Counts how many element-local entries reference each global DOF.
    pub fn dof_multiplicity<T: Real>(&self) -> DVector<T> {
        let mut multiplicity = DVector::zeros(self.num_dofs());
        let ones = vec![T::one(); self.e_size()];
        self.scatter_add(&ones, multiplicity.as_mut_slice());
        multiplicity
    }
}
