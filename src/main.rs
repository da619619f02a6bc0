use midi_composer::cmdline::Cli;
use midi_composer::logging;
use midi_composer::model::NoteTransitionModel;
use midi_composer::pipeline::{Pipeline, TracingReporter};
use std::process;
use structopt::StructOpt;

fn main() {
    let args = Cli::from_args();
    let subscriber = match logging::subscriber(args.verbose) {
        Ok(subscriber) => subscriber,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            process::exit(2);
        }
    };
    // the stage that failed has already reported the error
    if !tracing::subscriber::with_default(subscriber, || run(&args)) {
        process::exit(1);
    }
}

fn run(args: &Cli) -> bool {
    let mut pipeline = Pipeline::new(NoteTransitionModel, TracingReporter, args.into());
    pipeline.run(&args.input_file, &args.output_file).is_ok()
}
