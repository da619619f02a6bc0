//! The load → segment → train → generate → save run.
//!
//! Every stage owns its input and hands its output to the next. The first
//! failing stage ends the run: it is reported once, at that stage's boundary,
//! and no later stage executes.

use crate::{
    error::{Error, Result},
    midi_file::{load_midi_file, save_midi_file},
    model::{GenerationParams, SequenceModel, TrainingParams},
    segment::{split_on_time_changes, SplitOptions},
};
use std::{
    fmt,
    path::{Path, PathBuf},
};
use tracing::{error, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Load,
    Segment,
    Train,
    Generate,
    Save,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Segment => "segment",
            Stage::Train => "train",
            Stage::Generate => "generate",
            Stage::Save => "save",
        };
        f.write_str(name)
    }
}

/// Where a run stands. `Error` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Start,
    Loaded,
    Segmented,
    Trained,
    Generated,
    Saved,
    End,
    Error,
}

impl PipelineState {
    fn after(stage: Stage) -> Self {
        match stage {
            Stage::Load => PipelineState::Loaded,
            Stage::Segment => PipelineState::Segmented,
            Stage::Train => PipelineState::Trained,
            Stage::Generate => PipelineState::Generated,
            Stage::Save => PipelineState::Saved,
        }
    }
}

/// Receives the outcome of every stage of a run.
pub trait Reporter {
    fn stage_completed(&mut self, stage: Stage, summary: &str);
    fn stage_failed(&mut self, stage: Stage, error: &Error);
}

/// Reports stage outcomes through `tracing`
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn stage_completed(&mut self, stage: Stage, summary: &str) {
        info!(%stage, "{}", summary);
    }

    fn stage_failed(&mut self, stage: Stage, error: &Error) {
        error!(%stage, "{}", error);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PipelineConfig {
    pub split: SplitOptions,
    pub training: TrainingParams,
    pub generation: GenerationParams,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub input_notes: usize,
    pub examples: usize,
    pub generated_notes: usize,
    pub output: PathBuf,
}

pub struct Pipeline<M: SequenceModel, R: Reporter> {
    model: M,
    reporter: R,
    config: PipelineConfig,
    state: PipelineState,
}

impl<M: SequenceModel, R: Reporter> Pipeline<M, R> {
    pub fn new(model: M, reporter: R, config: PipelineConfig) -> Self {
        Self {
            model,
            reporter,
            config,
            state: PipelineState::Start,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Runs every stage in order, starting from an untrained model.
    pub fn run(&mut self, input: &Path, output: &Path) -> Result<RunSummary> {
        self.state = PipelineState::Start;

        let sequence = load_midi_file(input);
        let sequence = self.finish_stage(Stage::Load, sequence, |sequence| {
            format!(
                "loaded {} notes from '{}'",
                sequence.len(),
                input.display()
            )
        })?;
        let input_notes = sequence.len();

        let examples = split_on_time_changes(&sequence, self.config.split);
        drop(sequence);
        let examples = self.finish_stage(Stage::Segment, Ok(examples), |examples| {
            format!("split into {} training examples", examples.len())
        })?;
        let example_count = examples.len();

        let trained = self
            .model
            .fit(&examples, &self.config.training)
            .map_err(Error::from);
        drop(examples);
        let epochs = self.config.training.epochs;
        let trained = self.finish_stage(Stage::Train, trained, |_| {
            format!("trained for {} epochs", epochs)
        })?;

        let generated = self
            .model
            .sample(&trained, &self.config.generation)
            .map_err(Error::from);
        let temperature = self.config.generation.temperature;
        let generated = self.finish_stage(Stage::Generate, generated, |generated| {
            format!(
                "generated {} notes at temperature {}",
                generated.len(),
                temperature
            )
        })?;

        let saved = save_midi_file(&generated, output);
        self.finish_stage(Stage::Save, saved, |_| {
            format!("generated music saved to '{}'", output.display())
        })?;

        self.state = PipelineState::End;
        Ok(RunSummary {
            input_notes,
            examples: example_count,
            generated_notes: generated.len(),
            output: output.to_path_buf(),
        })
    }

    fn finish_stage<T>(
        &mut self,
        stage: Stage,
        result: Result<T>,
        summary: impl FnOnce(&T) -> String,
    ) -> Result<T> {
        match result {
            Ok(value) => {
                self.state = PipelineState::after(stage);
                self.reporter.stage_completed(stage, &summary(&value));
                Ok(value)
            }
            Err(err) => {
                self.state = PipelineState::Error;
                self.reporter.stage_failed(stage, &err);
                Err(err)
            }
        }
    }
}
