//! Runtime configuration

use serde::{Deserialize, Serialize};
use settle_incremental::{Cardinality, CardinalityTable, ReverseIndexSpec, StoreOptions};
use settle_types::Attribute;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Configuration for evaluations and the stores they own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Rounds a single fixpoint may run before it is declared divergent
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Register the view, editor and inspector databases
    #[serde(default = "default_true")]
    pub with_ide: bool,

    #[serde(default)]
    pub attributes: BTreeMap<Attribute, AttributeConfig>,

    #[serde(default = "ReverseIndexSpec::defaults")]
    pub reverse_indexes: Vec<ReverseIndexSpec>,

    /// Additional fact databases registered after the built-in ones
    #[serde(default)]
    pub extra_databases: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeConfig {
    #[serde(default)]
    pub cardinality: Cardinality,
}

fn default_max_rounds() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            with_ide: true,
            attributes: BTreeMap::new(),
            reverse_indexes: ReverseIndexSpec::defaults(),
            extra_databases: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn cardinality_table(&self) -> CardinalityTable {
        self.attributes
            .iter()
            .map(|(attribute, config)| (attribute.clone(), config.cardinality))
            .collect()
    }

    /// Options for every store an evaluation builds
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            cardinality: self.cardinality_table(),
            reverse_indexes: self.reverse_indexes.clone(),
        }
    }
}
