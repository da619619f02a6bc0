use std::{io, path::PathBuf};

use thiserror::Error;

/// Failures of a composer run, one variant per failure class.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("'{}' is not a usable MIDI file: {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    #[error("training failed: {0}")]
    Training(#[from] TrainingError),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TrainingError {
    #[error("no notes to train on")]
    EmptyDataset,

    #[error("invalid hyperparameter: {0}")]
    InvalidHyperparameters(String),

    #[error("loss became non-finite in epoch {epoch}")]
    Diverged { epoch: usize },
}

#[derive(Debug, Error, PartialEq)]
pub enum GenerationError {
    #[error("temperature must be a finite non-negative number, got {0}")]
    InvalidTemperature(f64),

    #[error("the trained model has an empty vocabulary")]
    EmptyVocabulary,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
