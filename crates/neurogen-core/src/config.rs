//! Generator configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! backend = "cuda"
//! num_threads = 1
//! precision = "float"
//! structural_plasticity = false
//! threads_per_block = 64
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::debug;

use crate::{NeurogenError, Result};

/// Parallel target of the generated code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Shared-memory CPU (OpenMP)
    #[default]
    OpenMp,
    /// GPU (CUDA)
    Cuda,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::OpenMp => write!(f, "openmp"),
            Backend::Cuda => write!(f, "cuda"),
        }
    }
}

/// Default floating point type of the generated code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Double,
    Float,
}

impl Precision {
    pub fn ctype(&self) -> &'static str {
        match self {
            Precision::Double => "double",
            Precision::Float => "float",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub backend: Backend,
    pub num_threads: usize,
    pub precision: Precision,
    /// Global switch for pruning/creating code
    pub structural_plasticity: bool,
    /// Inject profiling hooks into the step function
    pub profiling: bool,
    /// CUDA threads per block for row-wise kernels
    pub threads_per_block: u32,
    /// CUDA grid size limit
    pub max_blocks: u32,
    pub verbose: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            backend: Backend::OpenMp,
            num_threads: 1,
            precision: Precision::Double,
            structural_plasticity: false,
            profiling: false,
            threads_per_block: 32,
            max_blocks: 65535,
            verbose: false,
        }
    }
}

impl GeneratorConfig {
    /// Parse and validate a TOML document. Missing keys take default values.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| NeurogenError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading generator configuration");
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| NeurogenError::Config(e.to_string()))
    }

    /// Check value ranges, reporting every problem at once
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.num_threads == 0 {
            errors.push("num_threads must be at least 1".to_string());
        }
        if !self.threads_per_block.is_power_of_two() {
            errors.push("threads_per_block must be a power of two".to_string());
        }
        if self.max_blocks == 0 {
            errors.push("max_blocks must be at least 1".to_string());
        }
        if self.backend == Backend::Cuda && self.num_threads > 1 {
            // Harmless, the CUDA thread setter is a no-op
            debug!(num_threads = self.num_threads, "num_threads ignored on cuda");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(NeurogenError::Config(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GeneratorConfig::default();
        assert_eq!(config.backend, Backend::OpenMp);
        assert_eq!(config.threads_per_block, 32);
        assert_eq!(config.max_blocks, 65535);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = GeneratorConfig::from_toml_str(
            r#"
            backend = "cuda"
            precision = "float"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, Backend::Cuda);
        assert_eq!(config.precision.ctype(), "float");
        assert_eq!(config.num_threads, 1);
    }

    #[test]
    fn test_invalid_values_reported_together() {
        let err = GeneratorConfig::from_toml_str("num_threads = 0\nmax_blocks = 0").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("num_threads"));
        assert!(msg.contains("max_blocks"));
    }

    #[test]
    fn test_unknown_precision() {
        assert!(GeneratorConfig::from_toml_str("precision = \"half\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "num_threads = 4\nprofiling = true").unwrap();
        let config = GeneratorConfig::load(file.path()).unwrap();
        assert_eq!(config.num_threads, 4);
        assert!(config.profiling);

        let text = config.to_toml_string().unwrap();
        assert_eq!(GeneratorConfig::from_toml_str(&text).unwrap(), config);
    }
}
