//! Quantizing notes into a discrete vocabulary and rendering them back.

use crate::sequence::{Note, NoteSequence};
use index_vec::{define_index_type, IndexVec};
use std::{collections::HashMap, time::Duration};

pub const STEPS_PER_QUARTER: f64 = 4.0;
pub const MAX_STEPS: u16 = 32;
const VELOCITY_BUCKET_SIZE: u8 = 16;

define_index_type! { pub struct TokenIdx = usize; }
pub type TokenVec = IndexVec<TokenIdx, NoteToken>;

/// A note relative to the onset of the note before it, measured in steps
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NoteToken {
    pub pitch: u8,
    pub velocity_bucket: u8,
    pub duration_steps: u16,
    /// Steps since the previous onset; 0 for chord tones
    pub advance_steps: u16,
}

impl NoteToken {
    pub fn velocity(&self) -> u8 {
        (self.velocity_bucket * VELOCITY_BUCKET_SIZE + VELOCITY_BUCKET_SIZE / 2).min(127)
    }
}

/// Length of one step (a sixteenth note) in seconds
pub fn step_seconds(qpm: f64) -> f64 {
    60.0 / qpm / STEPS_PER_QUARTER
}

fn to_steps(time: Duration, step: f64) -> i64 {
    (time.as_secs_f64() / step).round() as i64
}

/// Tokenizes an example, quantizing its notes against the tempo at its start.
pub fn tokenize(sequence: &NoteSequence) -> Vec<NoteToken> {
    let step = step_seconds(sequence.qpm_at(Duration::ZERO));
    let mut notes: Vec<&Note> = sequence.notes.iter().collect();
    notes.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then(a.pitch.as_int().cmp(&b.pitch.as_int()))
    });

    let mut previous_onset = 0;
    notes
        .into_iter()
        .map(|note| {
            let onset = to_steps(note.start, step);
            let advance = (onset - previous_onset).clamp(0, MAX_STEPS as i64);
            previous_onset = onset;
            let duration = to_steps(note.duration(), step).clamp(1, MAX_STEPS as i64);
            NoteToken {
                pitch: note.pitch.as_int(),
                velocity_bucket: note.velocity.as_int() / VELOCITY_BUCKET_SIZE,
                duration_steps: duration as u16,
                advance_steps: advance as u16,
            }
        })
        .collect()
}

/// Lays tokens out in time at the given tempo. Instrument fields are left at their defaults.
pub fn render(tokens: &[NoteToken], qpm: f64) -> Vec<Note> {
    let step = step_seconds(qpm);
    let mut cursor: u64 = 0;
    tokens
        .iter()
        .map(|token| {
            cursor += u64::from(token.advance_steps);
            let start = cursor as f64 * step;
            let end = start + f64::from(token.duration_steps) * step;
            Note::new(
                token.pitch,
                token.velocity(),
                Duration::from_secs_f64(start),
                Duration::from_secs_f64(end),
            )
        })
        .collect()
}

/// The distinct tokens seen in training, indexed in first-seen order
#[derive(Clone, Debug, Default)]
pub struct Vocabulary {
    tokens: TokenVec,
    index: HashMap<NoteToken, TokenIdx>,
}

impl Vocabulary {
    pub fn insert(&mut self, token: NoteToken) -> TokenIdx {
        if let Some(idx) = self.index.get(&token) {
            return *idx;
        }
        let idx = self.tokens.push(token);
        self.index.insert(token, idx);
        idx
    }

    pub fn get(&self, idx: TokenIdx) -> Option<NoteToken> {
        self.tokens.get(idx).copied()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sequence::Tempo,
        test_helpers::{melody, secs},
    };
    use assert_approx_eq::assert_approx_eq;

    fn sequence_at(qpm: f64) -> NoteSequence {
        let mut sequence = NoteSequence::default();
        sequence.push_tempo(Tempo {
            time: Duration::ZERO,
            qpm,
        });
        sequence
    }

    #[test]
    fn eighth_notes_advance_two_steps() {
        let mut sequence = sequence_at(120.0);
        melody(&mut sequence, 0.0, &[(60, 0.25), (62, 0.25), (64, 0.5)]);
        let tokens = tokenize(&sequence);
        let steps: Vec<(u16, u16)> = tokens
            .iter()
            .map(|t| (t.advance_steps, t.duration_steps))
            .collect();
        assert_eq!(steps, vec![(0, 2), (2, 2), (2, 4)]);
        assert_eq!(tokens[0].velocity_bucket, 5);
    }

    #[test]
    fn chord_tones_do_not_advance() {
        let mut sequence = sequence_at(120.0);
        sequence.push_note(Note::new(67, 80, secs(0.5), secs(1.0)));
        sequence.push_note(Note::new(60, 80, secs(0.5), secs(1.0)));
        sequence.push_note(Note::new(64, 80, secs(0.5), secs(1.0)));
        let tokens = tokenize(&sequence);
        let pitches: Vec<u8> = tokens.iter().map(|t| t.pitch).collect();
        assert_eq!(pitches, vec![60, 64, 67]);
        assert_eq!(tokens[0].advance_steps, 4);
        assert_eq!(tokens[1].advance_steps, 0);
        assert_eq!(tokens[2].advance_steps, 0);
    }

    #[test]
    fn long_gaps_and_notes_are_clamped() {
        let mut sequence = sequence_at(120.0);
        sequence.push_note(Note::new(60, 80, secs(0.0), secs(0.01)));
        sequence.push_note(Note::new(62, 80, secs(30.0), secs(60.0)));
        let tokens = tokenize(&sequence);
        assert_eq!(tokens[0].duration_steps, 1);
        assert_eq!(tokens[1].advance_steps, MAX_STEPS);
        assert_eq!(tokens[1].duration_steps, MAX_STEPS);
    }

    #[test]
    fn render_places_tokens_on_the_grid() {
        let token = |pitch, advance_steps| NoteToken {
            pitch,
            velocity_bucket: 7,
            duration_steps: 2,
            advance_steps,
        };
        let notes = render(&[token(60, 0), token(64, 4), token(67, 0)], 120.0);
        assert_eq!(notes.len(), 3);
        assert_approx_eq!(notes[1].start.as_secs_f64(), 0.5);
        assert_approx_eq!(notes[2].start.as_secs_f64(), 0.5);
        assert_approx_eq!(notes[2].end.as_secs_f64(), 0.75);
        assert_eq!(notes[0].velocity.as_int(), 120);
    }

    #[test]
    fn vocabulary_deduplicates_tokens() {
        let token = NoteToken {
            pitch: 60,
            velocity_bucket: 5,
            duration_steps: 2,
            advance_steps: 2,
        };
        let mut vocabulary = Vocabulary::default();
        let first = vocabulary.insert(token);
        let again = vocabulary.insert(token);
        let other = vocabulary.insert(NoteToken { pitch: 62, ..token });
        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(vocabulary.len(), 2);
        assert_eq!(vocabulary.get(other).map(|t| t.pitch), Some(62));
    }
}
