//! Learn from one MIDI file, compose another.
//!
//! A run loads a MIDI file into a [`sequence::NoteSequence`], splits it into
//! training examples at tempo and meter changes, fits a
//! [`model::SequenceModel`] to them, samples a new sequence and writes it out
//! as MIDI. [`pipeline::Pipeline`] strings the stages together.

pub mod cmdline;
pub mod error;
pub mod logging;
pub mod midi_file;
pub mod model;
pub mod pipeline;
pub mod segment;
pub mod sequence;
#[cfg(test)]
mod test_helpers;

pub use error::{Error, GenerationError, Result, TrainingError};
