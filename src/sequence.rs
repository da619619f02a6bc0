use midly::num::{u4, u7};
use std::time::Duration;

/// Tempo assumed when a sequence carries no tempo marker (MIDI default)
pub const DEFAULT_QPM: f64 = 120.0;

/// Resolution of files written from sequences that don't remember their own
pub const DEFAULT_TICKS_PER_QUARTER: u16 = 220;

pub const DRUM_CHANNEL: u8 = 9;

/// A sounding note with wall-clock start and end offsets from the start of the sequence
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Note {
    pub pitch: u7,
    pub velocity: u7,
    pub start: Duration,
    pub end: Duration,
    pub channel: u4,
    pub program: u7,
    pub is_drum: bool,
}

impl Note {
    pub fn new(pitch: u8, velocity: u8, start: Duration, end: Duration) -> Self {
        Self {
            pitch: u7::from(pitch.min(127)),
            velocity: u7::from(velocity.min(127)),
            start,
            end,
            channel: u4::from(0),
            program: u7::from(0),
            is_drum: false,
        }
    }

    pub fn on_instrument(self, channel: u4, program: u7) -> Self {
        Self {
            channel,
            program,
            is_drum: channel.as_int() == DRUM_CHANNEL,
            ..self
        }
    }

    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// A tempo change, in quarter notes per minute
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tempo {
    pub time: Duration,
    pub qpm: f64,
}

impl Tempo {
    pub fn from_microseconds_per_quarter(time: Duration, micros: u32) -> Self {
        Self {
            time,
            qpm: 60_000_000.0 / f64::from(micros.max(1)),
        }
    }

    pub fn microseconds_per_quarter(&self) -> u32 {
        (60_000_000.0 / self.qpm).round() as u32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeSignature {
    pub time: Duration,
    pub numerator: u8,
    pub denominator: u8,
}

/// The in-memory symbolic form of a piece: notes plus the tempo and meter
/// changes that govern them. Timing markers are kept sorted by time.
#[derive(Clone, Debug, PartialEq)]
pub struct NoteSequence {
    pub ticks_per_quarter: u16,
    pub notes: Vec<Note>,
    pub tempos: Vec<Tempo>,
    pub time_signatures: Vec<TimeSignature>,
    pub total_time: Duration,
}

impl Default for NoteSequence {
    fn default() -> Self {
        Self::new(DEFAULT_TICKS_PER_QUARTER)
    }
}

impl NoteSequence {
    pub fn new(ticks_per_quarter: u16) -> Self {
        Self {
            ticks_per_quarter,
            notes: vec![],
            tempos: vec![],
            time_signatures: vec![],
            total_time: Duration::ZERO,
        }
    }

    pub fn push_note(&mut self, note: Note) {
        self.total_time = self.total_time.max(note.end);
        self.notes.push(note);
    }

    pub fn push_tempo(&mut self, tempo: Tempo) {
        self.total_time = self.total_time.max(tempo.time);
        self.tempos.push(tempo);
    }

    pub fn push_time_signature(&mut self, time_signature: TimeSignature) {
        self.total_time = self.total_time.max(time_signature.time);
        self.time_signatures.push(time_signature);
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// The tempo in force at `time`. Markers at exactly `time` already apply.
    pub fn qpm_at(&self, time: Duration) -> f64 {
        self.tempos
            .iter()
            .rev()
            .find(|tempo| tempo.time <= time)
            .map(|tempo| tempo.qpm)
            .unwrap_or(DEFAULT_QPM)
    }

    pub fn time_signature_at(&self, time: Duration) -> Option<TimeSignature> {
        self.time_signatures
            .iter()
            .rev()
            .find(|ts| ts.time <= time)
            .copied()
    }

    /// Sorts notes by onset (then pitch) and timing markers by time.
    pub fn sort(&mut self) {
        self.notes.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then(a.pitch.as_int().cmp(&b.pitch.as_int()))
        });
        self.tempos.sort_by(|a, b| a.time.cmp(&b.time));
        self.time_signatures.sort_by(|a, b| a.time.cmp(&b.time));
    }
}

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Scientific pitch notation, middle C (60) being "C4"
pub fn pitch_to_name(pitch: u7) -> String {
    let pitch = pitch.as_int() as i32;
    let pitch_class = (pitch % 12) as usize;
    let octave = pitch / 12 - 1;
    format!("{}{}", NOTE_NAMES[pitch_class], octave)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rstest::rstest;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn push_note_extends_total_time() {
        let mut seq = NoteSequence::default();
        seq.push_note(Note::new(60, 100, secs(0.0), secs(1.5)));
        seq.push_note(Note::new(64, 100, secs(0.5), secs(1.0)));
        assert_eq!(seq.total_time, secs(1.5));
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn qpm_defaults_to_midi_tempo() {
        let seq = NoteSequence::default();
        assert_approx_eq!(seq.qpm_at(secs(3.0)), DEFAULT_QPM);
    }

    #[test]
    fn qpm_follows_latest_marker() {
        let mut seq = NoteSequence::default();
        seq.push_tempo(Tempo {
            time: secs(0.0),
            qpm: 90.0,
        });
        seq.push_tempo(Tempo {
            time: secs(2.0),
            qpm: 140.0,
        });
        assert_approx_eq!(seq.qpm_at(secs(1.999)), 90.0);
        assert_approx_eq!(seq.qpm_at(secs(2.0)), 140.0);
    }

    #[test]
    fn tempo_microsecond_conversion() {
        let tempo = Tempo::from_microseconds_per_quarter(Duration::ZERO, 500_000);
        assert_approx_eq!(tempo.qpm, 120.0);
        assert_eq!(tempo.microseconds_per_quarter(), 500_000);
    }

    #[test]
    fn drum_channel_is_flagged() {
        let note = Note::new(36, 90, secs(0.0), secs(0.1)).on_instrument(u4::from(9), u7::from(0));
        assert!(note.is_drum);
        let note = note.on_instrument(u4::from(3), u7::from(0));
        assert!(!note.is_drum);
    }

    #[rstest(
        pitch,
        expect,
        case(0, "C-1"),
        case(21, "A0"),
        case(59, "B3"),
        case(60, "C4"),
        case(61, "C#4"),
        case(69, "A4"),
        case(127, "G9")
    )]
    fn test_pitch_to_name(pitch: u8, expect: &str) {
        assert_eq!(pitch_to_name(u7::from(pitch)), expect);
    }
}
