use crate::sequence::{Note, NoteSequence, Tempo, TimeSignature};
use std::time::Duration;

pub fn secs(seconds: f64) -> Duration {
    Duration::from_secs_f64(seconds)
}

/// Builds a sequence of back-to-back notes `(pitch, length in seconds)` starting at `start`
pub fn melody(sequence: &mut NoteSequence, start: f64, notes: &[(u8, f64)]) {
    let mut time = start;
    for (pitch, length) in notes {
        sequence.push_note(Note::new(*pitch, 80, secs(time), secs(time + length)));
        time += length;
    }
}

/// Two seconds of eighth notes at 120 qpm in 4/4, then eighth notes at
/// 150 qpm in 3/4. Every onset falls on a tick at 480 ticks per quarter.
pub fn two_tempo_fixture() -> NoteSequence {
    let mut sequence = NoteSequence::new(480);
    sequence.push_tempo(Tempo {
        time: Duration::ZERO,
        qpm: 120.0,
    });
    sequence.push_time_signature(TimeSignature {
        time: Duration::ZERO,
        numerator: 4,
        denominator: 4,
    });
    sequence.push_tempo(Tempo {
        time: secs(2.0),
        qpm: 150.0,
    });
    sequence.push_time_signature(TimeSignature {
        time: secs(2.0),
        numerator: 3,
        denominator: 4,
    });
    let first: Vec<(u8, f64)> = [60, 62, 64, 65, 67, 69, 71, 72]
        .iter()
        .map(|pitch| (*pitch, 0.25))
        .collect();
    melody(&mut sequence, 0.0, &first);
    let second: Vec<(u8, f64)> = [72, 71, 69, 67, 65, 64]
        .iter()
        .map(|pitch| (*pitch, 0.2))
        .collect();
    melody(&mut sequence, 2.0, &second);
    sequence
}
