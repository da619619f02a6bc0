//! Reading MIDI files into [`NoteSequence`]s and writing them back out.

use crate::{
    error::{Error, Result},
    sequence::{Note, NoteSequence, Tempo, TimeSignature, DEFAULT_QPM, DRUM_CHANNEL},
};
use midi_reader_writer::{midly_0_5::merge_tracks, ConvertTicksToMicroseconds};
use midly::{
    num::{u15, u24, u28, u4, u7},
    Format, Header, MetaMessage,
    MidiMessage::{NoteOff, NoteOn, ProgramChange},
    Smf, Timing, Track, TrackEvent,
    TrackEventKind::{self, Meta, Midi},
};
use std::{
    collections::{BTreeMap, VecDeque},
    fs, io,
    path::Path,
    time::Duration,
};
use tempfile::{Builder, NamedTempFile};

/// Loads a Standard MIDI File from disk.
///
/// All tracks are merged into a single sequence. Event ticks are converted to
/// wall-clock time following the tempo map of the file.
pub fn load_midi_file(path: &Path) -> Result<NoteSequence> {
    let data = fs::read(path).map_err(|err| Error::io(path, err))?;
    parse_midi(&data).map_err(|reason| Error::format(path, reason))
}

fn parse_midi(data: &[u8]) -> Result<NoteSequence, String> {
    let smf = Smf::parse(data).map_err(|err| err.to_string())?;
    let ticks_per_quarter = match smf.header.timing {
        Timing::Metrical(ticks) => ticks.as_int(),
        Timing::Timecode(..) => return Err("SMPTE timecode timing is not supported".into()),
    };
    let mut ticks_to_microseconds =
        ConvertTicksToMicroseconds::try_from(smf.header).map_err(|err| format!("{:?}", err))?;
    let mut decoder = NoteDecoder::new(ticks_per_quarter);
    for (ticks, _track_index, event) in merge_tracks(&smf.tracks) {
        // the converter must see every event to keep up with tempo changes
        let micros = ticks_to_microseconds.convert(ticks, &event);
        decoder.feed(Duration::from_micros(micros), event);
    }
    Ok(decoder.finish())
}

/// Pairs note-on and note-off events into [`Note`]s
struct NoteDecoder {
    sequence: NoteSequence,
    programs: [u7; 16],
    /// (onset, velocity, program) of notes still sounding, by (channel, key)
    sounding: BTreeMap<(u8, u8), VecDeque<(Duration, u7, u7)>>,
    last_time: Duration,
}

impl NoteDecoder {
    fn new(ticks_per_quarter: u16) -> Self {
        Self {
            sequence: NoteSequence::new(ticks_per_quarter),
            programs: [u7::from(0); 16],
            sounding: BTreeMap::new(),
            last_time: Duration::ZERO,
        }
    }

    fn feed(&mut self, time: Duration, event: TrackEventKind) {
        self.last_time = self.last_time.max(time);
        match event {
            Midi {
                channel,
                message: NoteOn { key, vel },
            } if vel.as_int() > 0 => {
                let program = self.programs[channel.as_int() as usize];
                self.sounding
                    .entry((channel.as_int(), key.as_int()))
                    .or_default()
                    .push_back((time, vel, program));
            }
            Midi {
                channel,
                message: NoteOn { key, .. } | NoteOff { key, .. },
            } => self.close(channel, key, time),
            Midi {
                channel,
                message: ProgramChange { program },
            } => self.programs[channel.as_int() as usize] = program,
            Meta(MetaMessage::Tempo(micros_per_quarter)) => {
                self.sequence
                    .push_tempo(Tempo::from_microseconds_per_quarter(
                        time,
                        micros_per_quarter.as_int(),
                    ));
            }
            Meta(MetaMessage::TimeSignature(numerator, denominator_power, _, _)) => {
                self.sequence.push_time_signature(TimeSignature {
                    time,
                    numerator,
                    denominator: 1u8 << denominator_power.min(7),
                });
            }
            _ => {}
        }
    }

    fn close(&mut self, channel: u4, key: u7, time: Duration) {
        let opened = self
            .sounding
            .get_mut(&(channel.as_int(), key.as_int()))
            .and_then(|queue| queue.pop_front());
        // a note-off without a matching note-on is ignored
        if let Some(opened) = opened {
            self.push(channel, key, opened, time);
        }
    }

    fn push(&mut self, channel: u4, key: u7, opened: (Duration, u7, u7), end: Duration) {
        let (start, velocity, program) = opened;
        let note = Note::new(key.as_int(), velocity.as_int(), start, end)
            .on_instrument(channel, program);
        self.sequence.push_note(note);
    }

    fn finish(mut self) -> NoteSequence {
        let end = self.last_time;
        let sounding = std::mem::take(&mut self.sounding);
        for ((channel, key), queue) in sounding {
            for opened in queue {
                self.push(u4::from(channel), u7::from(key), opened, end);
            }
        }
        self.sequence.sort();
        self.sequence
    }
}

/// Writes a sequence as a format 1 Standard MIDI File.
///
/// The file is first written next to its destination and then renamed over
/// it, so a failure never leaves a truncated file behind.
pub fn save_midi_file(sequence: &NoteSequence, path: &Path) -> Result<()> {
    let smf = sequence_to_smf(sequence);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = temp_file_for(path, dir).map_err(|err| Error::io(path, err))?;
    smf.write_std(&mut file).map_err(|err| Error::io(path, err))?;
    file.persist(path).map_err(|err| Error::io(path, err.error))?;
    Ok(())
}

/// Creates the scratch file for `path` with the mode a plain create would give
/// it, or with the mode of the file it replaces.
fn temp_file_for(path: &Path, dir: &Path) -> io::Result<NamedTempFile> {
    let mut builder = Builder::new();
    builder.prefix(".midi-composer");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // subject to the umask, like File::create
        builder.permissions(fs::Permissions::from_mode(0o666));
    }
    let file = builder.tempfile_in(dir)?;
    if let Ok(existing) = fs::metadata(path) {
        file.as_file().set_permissions(existing.permissions())?;
    }
    Ok(file)
}

/// Converts wall-clock time to ticks under a piecewise constant tempo
struct TempoMap {
    /// (segment start, ticks elapsed at segment start, ticks per second)
    segments: Vec<(Duration, f64, f64)>,
}

impl TempoMap {
    fn new(tempos: &[Tempo], ticks_per_quarter: u16) -> Self {
        let ticks_per_second = |qpm: f64| qpm / 60.0 * f64::from(ticks_per_quarter);
        let mut segments = vec![(Duration::ZERO, 0.0, ticks_per_second(DEFAULT_QPM))];
        for tempo in tempos {
            let (start, ticks, rate) = segments[segments.len() - 1];
            if tempo.time <= start {
                let last = segments.len() - 1;
                segments[last].2 = ticks_per_second(tempo.qpm);
                continue;
            }
            let ticks = ticks + (tempo.time - start).as_secs_f64() * rate;
            segments.push((tempo.time, ticks, ticks_per_second(tempo.qpm)));
        }
        Self { segments }
    }

    fn ticks(&self, time: Duration) -> u64 {
        let (start, ticks, rate) = self
            .segments
            .iter()
            .rev()
            .find(|(start, _, _)| *start <= time)
            .copied()
            .unwrap_or(self.segments[0]);
        (ticks + (time - start).as_secs_f64() * rate).round() as u64
    }
}

fn sequence_to_smf(sequence: &NoteSequence) -> Smf<'static> {
    let ticks_per_quarter = sequence.ticks_per_quarter.clamp(1, 0x7fff);
    let tempo_map = TempoMap::new(&sequence.tempos, ticks_per_quarter);
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(ticks_per_quarter)),
    ));

    let mut conductor: Vec<(u64, TrackEventKind<'static>)> = vec![];
    if sequence.tempos.is_empty() {
        let tempo = Tempo {
            time: Duration::ZERO,
            qpm: DEFAULT_QPM,
        };
        conductor.push((0, tempo_event(&tempo)));
    }
    for tempo in &sequence.tempos {
        conductor.push((tempo_map.ticks(tempo.time), tempo_event(tempo)));
    }
    for ts in &sequence.time_signatures {
        let power = ts.denominator.max(1).trailing_zeros() as u8;
        conductor.push((
            tempo_map.ticks(ts.time),
            Meta(MetaMessage::TimeSignature(ts.numerator, power, 24, 8)),
        ));
    }
    conductor.sort_by_key(|(tick, _)| *tick);
    smf.tracks.push(into_track(conductor));

    let mut instruments: BTreeMap<(u8, u8), Vec<&Note>> = BTreeMap::new();
    for note in &sequence.notes {
        instruments
            .entry((note.channel.as_int(), note.program.as_int()))
            .or_default()
            .push(note);
    }
    for ((channel, program), notes) in instruments {
        let channel = u4::from(channel);
        // (tick, is note-on, event) so that note-offs sort before note-ons on the same tick
        let mut events: Vec<(u64, bool, TrackEventKind<'static>)> = vec![];
        if channel.as_int() != DRUM_CHANNEL {
            events.push((
                0,
                false,
                Midi {
                    channel,
                    message: ProgramChange {
                        program: u7::from(program),
                    },
                },
            ));
        }
        for note in notes {
            let on_tick = tempo_map.ticks(note.start);
            let off_tick = tempo_map.ticks(note.end).max(on_tick + 1);
            events.push((
                on_tick,
                true,
                Midi {
                    channel,
                    message: NoteOn {
                        key: note.pitch,
                        vel: note.velocity,
                    },
                },
            ));
            events.push((
                off_tick,
                false,
                Midi {
                    channel,
                    message: NoteOff {
                        key: note.pitch,
                        vel: u7::from(0),
                    },
                },
            ));
        }
        events.sort_by_key(|(tick, is_on, _)| (*tick, *is_on));
        smf.tracks.push(into_track(
            events
                .into_iter()
                .map(|(tick, _, kind)| (tick, kind))
                .collect(),
        ));
    }
    smf
}

fn tempo_event(tempo: &Tempo) -> TrackEventKind<'static> {
    let micros = tempo.microseconds_per_quarter().clamp(1, 0x00ff_ffff);
    Meta(MetaMessage::Tempo(u24::new(micros)))
}

/// Turns events at absolute ticks (sorted) into a delta-timed track
fn into_track(events: Vec<(u64, TrackEventKind<'static>)>) -> Track<'static> {
    let mut track: Track<'static> = Vec::with_capacity(events.len() + 1);
    let mut last_tick = 0;
    for (tick, kind) in events {
        let delta = (tick - last_tick).min(0x0fff_ffff) as u32;
        track.push(TrackEvent {
            delta: u28::new(delta),
            kind,
        });
        last_tick = tick;
    }
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: Meta(MetaMessage::EndOfTrack),
    });
    track
}
