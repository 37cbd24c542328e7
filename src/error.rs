//! src/error.rs
//! This module defines the error type shared by every fallible operation of the
//! Hamiltonian algebra. A hop that folds outside of the explicit cell list is
//! not an error and never shows up here; it is an ordinary `None`.

use crate::hopping::CellOffset;
use thiserror::Error;

/// Coarse classification of [`TbError`], mirroring how callers usually react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is inconsistent with the Hamiltonian or with itself.
    Configuration,
    /// Input data is missing or malformed.
    Data,
    /// The requested combination of solver features is not supported.
    Capability,
    /// A numerical routine failed or detected an invalid matrix.
    Numerical,
    /// Operating system or thread pool failures.
    Io,
    /// The operation was stopped through a cancellation token.
    Cancelled,
}

/// The primary error type for all fallible operations in this library.
#[derive(Error, Debug)]
pub enum TbError {
    // --- Configuration errors ---
    #[error("Hopping cell {0} is not present in the hopping table")]
    MissingHoppingCell(CellOffset),

    #[error("Unknown standard k-path '{0}'. Known paths: hexagonal, fcc, 1D, 1D-symmetric")]
    UnknownKPath(String),

    #[error("Mixin association map has no entry for orbital {0}")]
    MissingMixinAssociation(usize),

    #[error("Cell {0} appears more than once in the explicit cell list")]
    DuplicateCell(CellOffset),

    #[error("Orbital index {index} is out of range for '{context}' with {norb} orbitals")]
    OrbitalOutOfRange {
        context: &'static str,
        index: usize,
        norb: usize,
    },

    #[error("The supercell basis {0:?} is singular or too large for exact folding")]
    InvalidSupercellMatrix([[i64; 3]; 3]),

    #[error("Dimension mismatch for '{context}': expected {expected}, got {found}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("Requested {requested} eigenvalues from a matrix of dimension {dim}")]
    TooManyEigenvalues { requested: usize, dim: usize },

    #[error("The number of workers must be at least 1")]
    InvalidWorkerCount,

    // --- Data errors ---
    #[error("The Hamiltonian carries no Fermi energy")]
    MissingFermiEnergy,

    #[error("Failed to parse data from '{file}' at line {line}: {message}")]
    FileParse {
        file: String,
        line: usize,
        message: String,
    },

    // --- Capability errors ---
    #[error("The partial (shift-invert) solver cannot return eigenvectors")]
    PartialSolveWithEigenvectors,

    // --- Numerical errors ---
    #[error("Bloch matrix is not Hermitian: residue {residue:e} exceeds tolerance {tolerance:e}")]
    HermiticityViolation { residue: f64, tolerance: f64 },

    #[error("Linear algebra operation failed")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error("Lanczos iteration did not converge after {iterations} steps")]
    LanczosNotConverged { iterations: usize },

    // --- I/O ---
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("Failed to build the worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Operation was cancelled")]
    Cancelled,
}

impl TbError {
    /// Returns the coarse category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TbError::MissingHoppingCell(_)
            | TbError::UnknownKPath(_)
            | TbError::MissingMixinAssociation(_)
            | TbError::DuplicateCell(_)
            | TbError::OrbitalOutOfRange { .. }
            | TbError::InvalidSupercellMatrix(_)
            | TbError::DimensionMismatch { .. }
            | TbError::TooManyEigenvalues { .. }
            | TbError::InvalidWorkerCount => ErrorKind::Configuration,
            TbError::MissingFermiEnergy | TbError::FileParse { .. } => ErrorKind::Data,
            TbError::PartialSolveWithEigenvectors => ErrorKind::Capability,
            TbError::HermiticityViolation { .. }
            | TbError::Linalg(_)
            | TbError::LanczosNotConverged { .. } => ErrorKind::Numerical,
            TbError::Io(_) | TbError::ThreadPool(_) => ErrorKind::Io,
            TbError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// A specialized `Result` type for this library's operations.
pub type Result<T> = std::result::Result<T, TbError>;
