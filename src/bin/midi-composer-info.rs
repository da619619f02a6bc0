use midi_composer::logging;
use midi_composer::midi_file::load_midi_file;
use midi_composer::segment::{split_on_time_changes, SplitOptions};
use midi_composer::sequence::pitch_to_name;
use std::path::PathBuf;
use std::process;
use structopt::StructOpt;

/// Show what midi-composer would train on for a MIDI file
#[derive(StructOpt)]
struct Cli {
    #[structopt(parse(from_os_str))]
    input_file: PathBuf,
    #[structopt(long = "skip-splits-inside-notes")]
    skip_splits_inside_notes: bool,
    /// How many notes to list per segment
    #[structopt(short = "n", long = "notes", default_value = "8")]
    notes: usize,
}

fn main() {
    let args = Cli::from_args();
    let subscriber = match logging::subscriber(0) {
        Ok(subscriber) => subscriber,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            process::exit(2);
        }
    };
    if let Err(err) = tracing::subscriber::with_default(subscriber, || run(&args)) {
        eprintln!("Error: {}", err);
        process::exit(1);
    }
}

fn run(args: &Cli) -> midi_composer::Result<()> {
    let sequence = load_midi_file(&args.input_file)?;
    println!(
        "{}: {} notes, {} ticks per quarter, {:.3}s",
        args.input_file.display(),
        sequence.len(),
        sequence.ticks_per_quarter,
        sequence.total_time.as_secs_f64()
    );
    for tempo in &sequence.tempos {
        println!("tempo {:>8.3}s {:>7.2} qpm", tempo.time.as_secs_f64(), tempo.qpm);
    }
    for ts in &sequence.time_signatures {
        println!(
            "meter {:>8.3}s {}/{}",
            ts.time.as_secs_f64(),
            ts.numerator,
            ts.denominator
        );
    }

    let options = SplitOptions {
        skip_splits_inside_notes: args.skip_splits_inside_notes,
    };
    let examples = split_on_time_changes(&sequence, options);
    println!("{} segments", examples.len());
    for (i, example) in examples.iter().enumerate() {
        println!(
            "segment {:>3} at {:>8.3}s: {:>5} notes, {:.2} qpm, {:.3}s",
            i,
            example.offset.as_secs_f64(),
            example.sequence.len(),
            example.qpm(),
            example.sequence.total_time.as_secs_f64()
        );
        for note in example.sequence.notes.iter().take(args.notes) {
            println!(
                "    {:>7.3}s {:<4} vel {:>3} ch {:>2}",
                note.start.as_secs_f64(),
                pitch_to_name(note.pitch),
                note.velocity.as_int(),
                note.channel.as_int() + 1
            );
        }
    }
    Ok(())
}
