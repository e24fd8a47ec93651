//! Matrix-free finite element operators composed from element kernels.
//!
//! A [`CompositeOperator`] sums the local actions of any number of
//! [`ElementKernel`](kernel::ElementKernel)s into a global linear operator without storing its
//! matrix. On demand it can be assembled into a sparse matrix with
//! [`full_assemble`](assembly::full_assemble), or rebuilt on a coarser space for multigrid with
//! [`coarsen`](coarsen::coarsen), reusing the quadrature data of the fine kernels.
pub mod assembly;
pub mod basis;
pub mod coarsen;
pub mod error;
pub mod forms;
pub mod kernel;
pub mod operator;
pub mod qfunction;
pub mod quadrature;
pub mod restriction;
pub mod space;

pub use error::OperatorError;
pub use fenris_traits::Real;
pub use operator::{CompositeOperator, LinearOperator, Symmetry};

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
