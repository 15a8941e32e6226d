//! # Neurogen Core
//!
//! Shared types for the neural network code generator.
//!
//! ## Layers
//!
//! | Module | Content |
//! |--------|---------|
//! | [`ir`] | Raw network description as delivered by the equation parser |
//! | [`model`] | Validated, typed view over populations and projections |
//! | [`config`] | Generator configuration (backend, threads, precision) |
//!
//! ## Design Philosophy
//!
//! 1. Every unsupported configuration is rejected before any code is emitted
//! 2. The typed model is read-only once built
//! 3. Errors name the offending object and field

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod config;
pub mod ir;
pub mod model;

pub use config::{Backend, GeneratorConfig, Precision};
pub use ir::NetworkDescription;
pub use model::{
    Attribute, AttrKind, Delay, Dependencies, GlobalOp, GlobalOpKind, Locality, Method, Network,
    NeuronKind, PopRef, Population, Projection, ProjectionKind, SpikeSpec, StorageFormat, Synapse,
};

/// Identity of a generated object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectId {
    Population(usize),
    Projection(usize),
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectId::Population(id) => write!(f, "pop{}", id),
            ObjectId::Projection(id) => write!(f, "proj{}", id),
        }
    }
}

/// Generation errors
#[derive(Debug, Error)]
pub enum NeurogenError {
    #[error("{object}: unknown locality '{locality}' for attribute '{attribute}'")]
    UnknownLocality {
        object: ObjectId,
        attribute: String,
        locality: String,
    },

    #[error("{object}: locality {locality} is not supported for attribute '{attribute}'")]
    UnsupportedLocality {
        object: ObjectId,
        attribute: String,
        locality: String,
    },

    #[error("{object}: unknown integration method '{method}' for attribute '{attribute}'")]
    UnknownIntegrationMethod {
        object: ObjectId,
        attribute: String,
        method: String,
    },

    #[error("{object}: unknown neuron type '{kind}'")]
    UnknownNeuronKind { object: ObjectId, kind: String },

    #[error("{object}: unknown storage format '{format}'")]
    UnknownStorageFormat { object: ObjectId, format: String },

    #[error("{object}: unsupported global operation '{function}' on '{variable}'")]
    UnsupportedGlobalOperation {
        object: ObjectId,
        function: String,
        variable: String,
    },

    #[error("{object}: invalid transpose projection: {reason}")]
    InvalidTranspose { object: ObjectId, reason: String },

    #[error("{object}: storage format {format} does not support structural plasticity")]
    StructuralPlasticityUnsupported { object: ObjectId, format: String },

    #[error("{object}: storage format {format} is not available on the {backend} backend")]
    UnsupportedStorageFormat {
        object: ObjectId,
        format: String,
        backend: String,
    },

    #[error("{object}: unsupported configuration: {reason}")]
    UnsupportedConfiguration { object: ObjectId, reason: String },

    #[error("{object}: unresolved symbol '${{{symbol}}}' in {context}")]
    UnresolvedSymbol {
        object: ObjectId,
        symbol: String,
        context: String,
    },

    #[error("Unknown population: {0}")]
    UnknownPopulation(usize),

    #[error("Unknown projection: {0}")]
    UnknownProjection(usize),

    #[error("Duplicate identifier: {0}")]
    DuplicateId(ObjectId),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IR error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NeurogenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_display() {
        assert_eq!(ObjectId::Population(3).to_string(), "pop3");
        assert_eq!(ObjectId::Projection(0).to_string(), "proj0");
    }

    #[test]
    fn test_error_names_object_and_field() {
        let err = NeurogenError::UnknownLocality {
            object: ObjectId::Projection(2),
            attribute: "w".into(),
            locality: "regional".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("proj2"));
        assert!(msg.contains("'w'"));
        assert!(msg.contains("regional"));
    }

    #[test]
    fn test_unresolved_symbol_message() {
        let err = NeurogenError::UnresolvedSymbol {
            object: ObjectId::Population(1),
            symbol: "pre.r".into(),
            context: "update of 'v'".into(),
        };
        assert_eq!(
            err.to_string(),
            "pop1: unresolved symbol '${pre.r}' in update of 'v'"
        );
    }
}
