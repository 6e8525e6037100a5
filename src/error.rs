use std::{io, path::PathBuf};

use thiserror::Error;

use crate::data::{DatasetKind, SampleKey};
use crate::markers::MarkerStage;

/// A dataset could not be fetched or parsed. Loads are all-or-nothing, so a
/// single one of these fails the whole sample.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read {kind} for sample {sample} from {}", path.display())]
    Io {
        sample: SampleKey,
        kind: DatasetKind,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parse {kind} for sample {sample}")]
    Parse {
        sample: SampleKey,
        kind: DatasetKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("no {kind} dataset for sample {sample}")]
    Missing { sample: SampleKey, kind: DatasetKind },
    #[error("background read for {kind} of sample {sample} did not finish")]
    Task {
        sample: SampleKey,
        kind: DatasetKind,
        #[source]
        source: tokio::task::JoinError,
    },
}

impl LoadError {
    pub fn kind(&self) -> DatasetKind {
        match self {
            LoadError::Io { kind, .. }
            | LoadError::Parse { kind, .. }
            | LoadError::Missing { kind, .. }
            | LoadError::Task { kind, .. } => *kind,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarkerError {
    #[error("cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: MarkerStage, to: MarkerStage },
    #[error("cannot go {direction} from {stage:?}")]
    NoTransition {
        stage: MarkerStage,
        direction: &'static str,
    },
    #[error("no sample loaded")]
    NoSample,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SampleKeyError {
    #[error("invalid sample key: expected a number, 'All' or 'Combined', got '{0}'")]
    Invalid(String),
}
