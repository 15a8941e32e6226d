//! # Neurogen Runtime
//!
//! Native Rust counterparts of the structures the generated simulators are
//! made of, with the same semantics.
//!
//! ## Components
//!
//! | Module | Generated counterpart |
//! |--------|----------------------|
//! | [`connectivity`] | LIL, CSR, ELL and ELL-R connectivity with their variable helpers |
//! | [`structural`] | `addSynapse` / `removeSynapse` on list-of-lists projections |
//! | [`transpose`] | Inverted index and weighted sum of transposed projections |
//! | [`device`] | Dirty flags, host/device mirrors and launch configurations |
//! | [`recorder`] | Period/offset sampling monitors |
//! | [`network`] | The step loop, `run` and `run_until` |
//!
//! ## Design Philosophy
//!
//! 1. Values cross every interface in list-of-lists shape, whatever the storage
//! 2. Inconsistent structures are errors, never silent truncation
//! 3. Phases run in the order of the generated step

use thiserror::Error;

pub mod connectivity;
pub mod device;
pub mod network;
pub mod recorder;
pub mod structural;
pub mod transpose;

pub use connectivity::{Connectivity, CsrMatrix, EllMatrix, EllRMatrix, LilMatrix};
pub use device::{DeviceMirror, DirtyFlag, LaunchConfig};
pub use network::{Network, RatePopulation, RateProjection, StopMode};
pub use recorder::Recorder;
pub use structural::DynamicProjection;
pub use transpose::{InvertedIndex, TransposeProjection, Weights};

/// Runtime errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Inconsistent structure: {0}")]
    Inconsistent(String),

    #[error("{operation}: not available for transposed projections")]
    NotAvailable { operation: &'static str },

    #[error("Unknown dendrite for post-synaptic rank {0}")]
    UnknownDendrite(usize),

    #[error("Unknown population: {0}")]
    UnknownPopulation(usize),

    #[error("Index out of range: {0}")]
    OutOfRange(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
