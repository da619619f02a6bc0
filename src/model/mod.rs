//! The generative model seam of the pipeline.
//!
//! The pipeline only knows [`SequenceModel`]: fit a state from training
//! examples, then sample sequences from that state. [`NoteTransitionModel`] is
//! the implementation the command line tool uses.

pub mod token;
pub mod transition;

use crate::{
    error::{GenerationError, TrainingError},
    segment::TrainingExample,
    sequence::NoteSequence,
};

pub use transition::{NoteTransitionModel, TransitionState};

pub trait SequenceModel {
    /// Everything learned from the examples. Only a successful `fit` creates one.
    type State;

    fn fit(
        &self,
        examples: &[TrainingExample],
        params: &TrainingParams,
    ) -> Result<Self::State, TrainingError>;

    /// Generates exactly `params.length` notes.
    fn sample(
        &self,
        state: &Self::State,
        params: &GenerationParams,
    ) -> Result<NoteSequence, GenerationError>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrainingParams {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Seeds the shuffling of training pairs; `None` draws from the OS
    pub seed: Option<u64>,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 64,
            learning_rate: 0.5,
            seed: None,
        }
    }
}

impl TrainingParams {
    pub fn validate(&self) -> Result<(), TrainingError> {
        if self.epochs == 0 {
            return Err(TrainingError::InvalidHyperparameters(
                "epochs must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidHyperparameters(
                "batch size must be at least 1".into(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrainingError::InvalidHyperparameters(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationParams {
    pub length: usize,
    /// 0 picks the most likely note every time, higher values flatten the distribution
    pub temperature: f64,
    pub seed: Option<u64>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            length: 64,
            temperature: 0.5,
            seed: None,
        }
    }
}

impl GenerationParams {
    pub fn validate(&self) -> Result<(), GenerationError> {
        if !(self.temperature.is_finite() && self.temperature >= 0.0) {
            return Err(GenerationError::InvalidTemperature(self.temperature));
        }
        Ok(())
    }
}
