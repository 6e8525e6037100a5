use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::index::DownsamplePolicy;
use crate::markers::MarkerAssignment;
use crate::project::{GeneColumn, ScatterStyle};
use crate::registry::DataLayout;

/// Dashboard settings, read from a TOML file. Every field has a default, so
/// an empty file (or no file) is a valid configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root directory holding the per-sample JSON documents.
    pub data_dir: PathBuf,
    pub layout: DataLayout,
    pub downsample: DownsamplePolicy,
    pub scatter: ScatterStyle,
    /// Columns of the per-cluster gene table, in display order.
    pub cluster_gene_columns: Vec<GeneColumn>,
    /// Replaces the built-in marker seed table when present.
    pub markers: Option<IndexMap<String, Vec<String>>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            layout: DataLayout::default(),
            downsample: DownsamplePolicy::default(),
            scatter: ScatterStyle::default(),
            cluster_gene_columns: GeneColumn::DEFAULT.to_vec(),
            markers: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parse config: {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(text)?;
        Ok(cfg)
    }

    pub fn seed_markers(&self) -> MarkerAssignment {
        match &self.markers {
            Some(table) => MarkerAssignment::new(table.clone()),
            None => MarkerAssignment::seed(),
        }
    }
}
