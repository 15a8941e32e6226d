//! Generated file set.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use neurogen_core::{ObjectId, Result};
use serde::Serialize;
use tracing::{debug, warn};

/// A feature skipped during generation, reported instead of failing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub object: ObjectId,
    pub message: String,
}

impl Diagnostic {
    /// Record the diagnostic and emit it as a warning
    pub fn new(object: ObjectId, message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(object = %object, "{}", message);
        Self { object, message }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.object, self.message)
    }
}

/// Every file of one generated network, keyed by file name
#[derive(Debug, Clone, Default, Serialize)]
pub struct Artifacts {
    pub files: BTreeMap<String, String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Artifacts {
    pub fn insert(&mut self, name: impl Into<String>, content: String) {
        self.files.insert(name.into(), content);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Write every file into `dir`, creating it when missing
    pub fn write_to<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        for (name, content) in &self.files {
            let path = dir.join(name);
            // Unchanged files keep their timestamp so incremental builds skip them
            if fs::read_to_string(&path).map(|old| old == *content).unwrap_or(false) {
                debug!(file = %path.display(), "unchanged");
                continue;
            }
            fs::write(&path, content)?;
            debug!(file = %path.display(), bytes = content.len(), "written");
        }
        Ok(())
    }
}
