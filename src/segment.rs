//! Splitting a [`NoteSequence`] into training examples at tempo and meter changes.

use crate::sequence::{NoteSequence, Tempo, TimeSignature, DEFAULT_QPM};
use std::time::Duration;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SplitOptions {
    /// Don't split where a note is still sounding
    pub skip_splits_inside_notes: bool,
}

/// One constant-tempo, constant-meter stretch of a source sequence,
/// re-based to start at time zero
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingExample {
    /// Where the stretch started in the source sequence
    pub offset: Duration,
    pub sequence: NoteSequence,
}

impl TrainingExample {
    pub fn qpm(&self) -> f64 {
        self.sequence.qpm_at(Duration::ZERO)
    }
}

/// Splits a sequence wherever the tempo or time signature actually changes.
///
/// A sequence without changes comes back whole as a single example, even when
/// it has no notes. Otherwise examples without notes are dropped. Notes
/// belong to the example they start in and are cut off at its end.
pub fn split_on_time_changes(
    sequence: &NoteSequence,
    options: SplitOptions,
) -> Vec<TrainingExample> {
    let mut split_times = time_change_points(sequence);
    if options.skip_splits_inside_notes {
        split_times.retain(|time| {
            !sequence
                .notes
                .iter()
                .any(|note| note.start < *time && *time < note.end)
        });
    }
    if split_times.is_empty() {
        return vec![extract(sequence, Duration::ZERO, sequence.total_time, true)];
    }

    let mut boundaries = Vec::with_capacity(split_times.len() + 2);
    boundaries.push(Duration::ZERO);
    boundaries.extend(split_times);
    boundaries.push(sequence.total_time);
    let last = boundaries.len() - 2;
    boundaries
        .windows(2)
        .enumerate()
        .map(|(i, window)| extract(sequence, window[0], window[1], i == last))
        .filter(|example| !example.sequence.is_empty())
        .collect()
}

/// Times strictly inside the sequence where tempo or meter take a new value
fn time_change_points(sequence: &NoteSequence) -> Vec<Duration> {
    enum Change<'a> {
        Tempo(&'a Tempo),
        Meter(&'a TimeSignature),
    }
    let mut changes: Vec<(Duration, Change)> = sequence
        .tempos
        .iter()
        .map(|tempo| (tempo.time, Change::Tempo(tempo)))
        .chain(
            sequence
                .time_signatures
                .iter()
                .map(|ts| (ts.time, Change::Meter(ts))),
        )
        .collect();
    changes.sort_by_key(|(time, _)| *time);

    let mut qpm = DEFAULT_QPM;
    let mut meter = (4, 4);
    let mut points: Vec<Duration> = vec![];
    for (time, change) in changes {
        let changed = match change {
            Change::Tempo(tempo) => {
                let changed = (tempo.qpm - qpm).abs() > 1e-6;
                qpm = tempo.qpm;
                changed
            }
            Change::Meter(ts) => {
                let changed = (ts.numerator, ts.denominator) != meter;
                meter = (ts.numerator, ts.denominator);
                changed
            }
        };
        if changed
            && time > Duration::ZERO
            && time < sequence.total_time
            && points.last() != Some(&time)
        {
            points.push(time);
        }
    }
    points
}

fn extract(
    sequence: &NoteSequence,
    start: Duration,
    end: Duration,
    is_last: bool,
) -> TrainingExample {
    let mut example = NoteSequence::new(sequence.ticks_per_quarter);
    example.push_tempo(Tempo {
        time: Duration::ZERO,
        qpm: sequence.qpm_at(start),
    });
    if let Some(ts) = sequence.time_signature_at(start) {
        example.push_time_signature(TimeSignature {
            time: Duration::ZERO,
            ..ts
        });
    }
    for note in &sequence.notes {
        let inside = note.start >= start && (note.start < end || (is_last && note.start == end));
        if inside {
            let mut note = *note;
            note.end = note.end.min(end).saturating_sub(start);
            note.start -= start;
            example.push_note(note);
        }
    }
    example.total_time = end - start;
    TrainingExample {
        offset: start,
        sequence: example,
    }
}
