//! Experiment configuration file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::train::FitConfig;
use crate::{Error, Result};

/// One training run: which variant, where the data lives and how to fit it.
///
/// Every field has a default, so a config file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// A name from [`crate::zoo::NAMES`].
    pub model: String,
    /// Directory holding the four MNIST IDX files.
    pub data_dir: PathBuf,
    /// Seeds weight init and dropout.
    pub seed: u64,
    pub fit: FitConfig,
    /// How many misclassified test images to report.
    pub misclassified_limit: usize,
    /// Where reports are written.
    pub output_dir: PathBuf,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            model: "dense_simple".to_owned(),
            data_dir: PathBuf::from("data"),
            seed: 0,
            fit: FitConfig::default(),
            misclassified_limit: 25,
            output_dir: PathBuf::from("runs"),
        }
    }
}

impl ExperimentConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let cfg: Self = serde_json::from_str(&s).map_err(|e| {
            Error::InvalidConfig(format!("failed to parse {}: {e}", path.display()))
        })?;
        cfg.fit.validate()?;
        Ok(cfg)
    }
}
