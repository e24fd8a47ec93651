//! Error type shared by operators, kernels and their collaborators.
use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// Library-wide error type.
///
/// None of these errors are transient: they signal invalid configuration or usage, and
/// retrying the failed operation with the same input fails again.
#[derive(Debug)]
#[non_exhaustive]
pub enum OperatorError {
    /// A vector or kernel space has a size incompatible with the operator.
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A local-to-global index lies outside of the global space it maps into.
    InconsistentMapping { index: usize, bound: usize },
    /// Transpose action was requested, but the kernel pair has no transpose kernel
    /// and the operator is not symmetric.
    TransposeUnsupported { kernel_index: usize },
    /// The operation requires a square operator.
    NotSquare { height: usize, width: usize },
    /// The kernel pair does not act on identical trial and test spaces.
    NotSymmetric { kernel_index: usize },
    /// The DOF multiplicity can only be set before the operator is first applied.
    MultiplicityAfterUse,
    /// DOF multiplicity entries must be positive.
    InvalidMultiplicity { index: usize },
    /// The kernel does not know how to rebuild itself on a coarse space.
    CoarseningUnsupported,
    /// Malformed input to a constructor.
    InvalidArgument(String),
    /// Allocation of workspace memory failed.
    Allocation { requested: usize },
    /// An element kernel failed during evaluation.
    Kernel(eyre::Report),
}

impl Display for OperatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::DimensionMismatch { what, expected, actual } => {
                write!(f, "Dimension mismatch for {}: expected {}, got {}.", what, expected, actual)
            }
            Self::InconsistentMapping { index, bound } => {
                write!(
                    f,
                    "Local-to-global index {} is out of bounds for global dimension {}.",
                    index, bound
                )
            }
            Self::TransposeUnsupported { kernel_index } => {
                write!(
                    f,
                    "Transpose action is not supported: kernel pair {} has no transpose kernel.",
                    kernel_index
                )
            }
            Self::NotSquare { height, width } => {
                write!(f, "Operator must be square, but is {} x {}.", height, width)
            }
            Self::NotSymmetric { kernel_index } => {
                write!(
                    f,
                    "Kernel pair {} does not have identical trial and test spaces.",
                    kernel_index
                )
            }
            Self::MultiplicityAfterUse => {
                write!(f, "DOF multiplicity must be set before the operator is used.")
            }
            Self::InvalidMultiplicity { index } => {
                write!(f, "DOF multiplicity at index {} is not positive.", index)
            }
            Self::CoarseningUnsupported => {
                write!(f, "Element kernel does not support coarsening.")
            }
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Self::Allocation { requested } => {
                write!(f, "Failed to allocate workspace of {} entries.", requested)
            }
            Self::Kernel(err) => write!(f, "Element kernel failed. Error: {}", err),
        }
    }
}

impl Error for OperatorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Kernel(err) => Some(&**err),
            _ => None,
        }
    }
}

impl From<eyre::Report> for OperatorError {
    fn from(err: eyre::Report) -> Self {
        Self::Kernel(err)
    }
}
