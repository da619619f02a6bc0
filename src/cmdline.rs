use crate::{
    model::{GenerationParams, TrainingParams},
    pipeline::PipelineConfig,
    segment::SplitOptions,
};
use std::path::PathBuf;

use structopt::StructOpt;

/// Train a note model on a MIDI file and write a newly generated piece
#[derive(StructOpt, Debug)]
#[structopt(name = "midi-composer")]
pub struct Cli {
    /// Input MIDI file for training
    #[structopt(parse(from_os_str))]
    pub input_file: PathBuf,
    /// Output MIDI file for generated music
    #[structopt(parse(from_os_str))]
    pub output_file: PathBuf,
    /// Number of training epochs
    #[structopt(long = "epochs", default_value = "10")]
    pub epochs: usize,
    /// Batch size for training
    #[structopt(long = "batch_size", alias = "batch-size", default_value = "64")]
    pub batch_size: usize,
    /// Length of generated music, in notes
    #[structopt(long = "length", default_value = "64")]
    pub length: usize,
    /// Temperature for music generation, 0 always picks the likeliest note
    #[structopt(long = "temperature", default_value = "0.5")]
    pub temperature: f64,
    /// Step size of gradient descent
    #[structopt(long = "learning-rate", default_value = "0.5")]
    pub learning_rate: f64,
    /// Seed for training and sampling, random if omitted
    #[structopt(long = "seed")]
    pub seed: Option<u64>,
    /// Keep a segment whole where a tempo or meter change falls inside a sounding note
    #[structopt(long = "skip-splits-inside-notes")]
    pub skip_splits_inside_notes: bool,
    /// More log output (-v debug, -vv trace); RUST_LOG overrides
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    pub verbose: u8,
}

impl From<&Cli> for PipelineConfig {
    fn from(args: &Cli) -> Self {
        PipelineConfig {
            split: SplitOptions {
                skip_splits_inside_notes: args.skip_splits_inside_notes,
            },
            training: TrainingParams {
                epochs: args.epochs,
                batch_size: args.batch_size,
                learning_rate: args.learning_rate,
                seed: args.seed,
            },
            generation: GenerationParams {
                length: args.length,
                temperature: args.temperature,
                seed: args.seed,
            },
        }
    }
}
