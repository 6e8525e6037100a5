//! Data core of a single-cell UMAP dashboard: loads the per-sample JSON
//! documents, indexes them, and projects them into render-ready scatter
//! series and table rows.

pub mod app;
pub mod color;
pub mod config;
pub mod data;
pub mod error;
pub mod index;
pub mod markers;
pub mod mock;
pub mod project;
pub mod registry;

#[cfg(test)]
mod fixtures;
