// Note-transition model.
//
// A log-linear bigram over quantized note tokens: one row of logits for the
// start of a sequence and one per vocabulary token, each scoring every token
// that may follow. Rows are fitted by mini-batch gradient descent on the
// cross-entropy of the observed transitions. Sampling walks the rows,
// dividing logits by the temperature before the softmax.

use super::{
    token::{render, tokenize, NoteToken, TokenIdx, Vocabulary},
    GenerationParams, SequenceModel, TrainingParams,
};
use crate::{
    error::{GenerationError, TrainingError},
    segment::TrainingExample,
    sequence::{NoteSequence, Tempo, TimeSignature, DEFAULT_QPM, DEFAULT_TICKS_PER_QUARTER},
};
use index_vec::IndexVec;
use midly::num::{u4, u7};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use std::{collections::HashMap, hash::Hash, time::Duration};
use tracing::debug;

#[derive(Clone, Copy, Debug, Default)]
pub struct NoteTransitionModel;

/// What precedes the next token
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Context {
    Start,
    After(TokenIdx),
}

/// A fitted note-transition model plus the musical setting to render samples in
#[derive(Clone, Debug)]
pub struct TransitionState {
    vocabulary: Vocabulary,
    start: Vec<f64>,
    transitions: IndexVec<TokenIdx, Vec<f64>>,
    qpm: f64,
    time_signature: Option<(u8, u8)>,
    instrument: (u4, u7),
    ticks_per_quarter: u16,
    loss: f64,
}

impl TransitionState {
    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }

    /// Mean cross-entropy of the last training epoch
    pub fn loss(&self) -> f64 {
        self.loss
    }

    pub fn qpm(&self) -> f64 {
        self.qpm
    }

    fn row(&self, context: Context) -> &[f64] {
        match context {
            Context::Start => &self.start,
            Context::After(idx) => &self.transitions[idx],
        }
    }

    fn row_mut(&mut self, context: Context) -> &mut Vec<f64> {
        match context {
            Context::Start => &mut self.start,
            Context::After(idx) => &mut self.transitions[idx],
        }
    }
}

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Numerically stable log of the sum of exponentials
fn log_sum_exp(logits: &[f64]) -> f64 {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + logits.iter().map(|x| (x - max).exp()).sum::<f64>().ln()
}

fn softmax(logits: &[f64], temperature: f64) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let weights: Vec<f64> = logits
        .iter()
        .map(|x| ((x - max) / temperature).exp())
        .collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// Index of the largest logit; ties go to the lowest index
fn argmax(logits: &[f64]) -> usize {
    let mut best = 0;
    for (i, logit) in logits.iter().enumerate() {
        if *logit > logits[best] {
            best = i;
        }
    }
    best
}

fn most_common<K: Copy + Eq + Hash + Ord>(counts: &HashMap<K, usize>) -> Option<K> {
    // highest count, then smallest key, so the choice doesn't depend on hash order
    counts
        .iter()
        .max_by(|(ka, ca), (kb, cb)| ca.cmp(cb).then(kb.cmp(ka)))
        .map(|(key, _)| *key)
}

impl SequenceModel for NoteTransitionModel {
    type State = TransitionState;

    fn fit(
        &self,
        examples: &[TrainingExample],
        params: &TrainingParams,
    ) -> Result<TransitionState, TrainingError> {
        params.validate()?;

        let mut vocabulary = Vocabulary::default();
        let mut pairs: Vec<(Context, TokenIdx)> = vec![];
        let mut tempos: HashMap<u64, usize> = HashMap::new();
        let mut meters: HashMap<(u8, u8), usize> = HashMap::new();
        let mut instruments: HashMap<(u8, u8), usize> = HashMap::new();
        let mut ticks_per_quarter = DEFAULT_TICKS_PER_QUARTER;
        for example in examples {
            let tokens = tokenize(&example.sequence);
            if tokens.is_empty() {
                continue;
            }
            ticks_per_quarter = example.sequence.ticks_per_quarter;
            // tempo keyed in millibeats per minute so it can be hashed
            *tempos
                .entry((example.qpm() * 1000.0).round() as u64)
                .or_default() += tokens.len();
            if let Some(ts) = example.sequence.time_signature_at(Duration::ZERO) {
                *meters.entry((ts.numerator, ts.denominator)).or_default() += tokens.len();
            }
            for note in &example.sequence.notes {
                *instruments
                    .entry((note.channel.as_int(), note.program.as_int()))
                    .or_default() += 1;
            }

            let mut context = Context::Start;
            for token in tokens {
                let idx = vocabulary.insert(token);
                pairs.push((context, idx));
                context = Context::After(idx);
            }
        }
        if pairs.is_empty() {
            return Err(TrainingError::EmptyDataset);
        }

        let size = vocabulary.len();
        let (channel, program) = most_common(&instruments).unwrap_or((0, 0));
        let mut state = TransitionState {
            start: vec![0.0; size],
            transitions: (0..size).map(|_| vec![0.0; size]).collect(),
            vocabulary,
            qpm: most_common(&tempos)
                .map(|millis| millis as f64 / 1000.0)
                .unwrap_or(DEFAULT_QPM),
            time_signature: most_common(&meters),
            instrument: (u4::from(channel), u7::from(program)),
            ticks_per_quarter,
            loss: f64::NAN,
        };
        debug!(
            vocabulary = size,
            transitions = pairs.len(),
            "fitting note transitions"
        );

        let mut rng = rng_from(params.seed);
        for epoch in 1..=params.epochs {
            pairs.shuffle(&mut rng);
            let mut total_loss = 0.0;
            for batch in pairs.chunks(params.batch_size) {
                let mut gradients: HashMap<Context, Vec<f64>> = HashMap::new();
                for (context, next) in batch {
                    let row = state.row(*context);
                    let normalizer = log_sum_exp(row);
                    total_loss += normalizer - row[next.index()];
                    let gradient = gradients
                        .entry(*context)
                        .or_insert_with(|| vec![0.0; size]);
                    for (g, logit) in gradient.iter_mut().zip(row) {
                        *g += (logit - normalizer).exp();
                    }
                    gradient[next.index()] -= 1.0;
                }
                let step = params.learning_rate / batch.len() as f64;
                for (context, gradient) in gradients {
                    for (logit, g) in state.row_mut(context).iter_mut().zip(gradient) {
                        *logit -= step * g;
                    }
                }
            }
            let loss = total_loss / pairs.len() as f64;
            if !loss.is_finite() {
                return Err(TrainingError::Diverged { epoch });
            }
            debug!(epoch, loss, "finished epoch");
            state.loss = loss;
        }
        Ok(state)
    }

    fn sample(
        &self,
        state: &TransitionState,
        params: &GenerationParams,
    ) -> Result<NoteSequence, GenerationError> {
        params.validate()?;
        if state.vocabulary.is_empty() {
            return Err(GenerationError::EmptyVocabulary);
        }

        let mut rng = rng_from(params.seed);
        let mut context = Context::Start;
        let mut tokens: Vec<NoteToken> = Vec::with_capacity(params.length);
        for _ in 0..params.length {
            let row = state.row(context);
            let choice = if params.temperature == 0.0 {
                argmax(row)
            } else {
                let probabilities = softmax(row, params.temperature);
                let mut threshold: f64 = rng.gen();
                probabilities
                    .iter()
                    .position(|p| {
                        threshold -= p;
                        threshold < 0.0
                    })
                    // rounding can leave a sliver past the last bucket
                    .unwrap_or(probabilities.len() - 1)
            };
            let idx = TokenIdx::new(choice);
            let token = state
                .vocabulary
                .get(idx)
                .ok_or(GenerationError::EmptyVocabulary)?;
            tokens.push(token);
            context = Context::After(idx);
        }

        let mut sequence = NoteSequence::new(state.ticks_per_quarter);
        sequence.push_tempo(Tempo {
            time: Duration::ZERO,
            qpm: state.qpm,
        });
        if let Some((numerator, denominator)) = state.time_signature {
            sequence.push_time_signature(TimeSignature {
                time: Duration::ZERO,
                numerator,
                denominator,
            });
        }
        let (channel, program) = state.instrument;
        for note in render(&tokens, state.qpm) {
            sequence.push_note(note.on_instrument(channel, program));
        }
        Ok(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        segment::{split_on_time_changes, SplitOptions},
        sequence::Note,
        test_helpers::{melody, secs, two_tempo_fixture},
    };
    use assert_approx_eq::assert_approx_eq;
    use rstest::rstest;

    fn params(epochs: usize, batch_size: usize) -> TrainingParams {
        TrainingParams {
            epochs,
            batch_size,
            learning_rate: 1.0,
            seed: Some(3),
        }
    }

    fn greedy(length: usize) -> GenerationParams {
        GenerationParams {
            length,
            temperature: 0.0,
            seed: Some(11),
        }
    }

    /// C D E repeated in eighth notes at 120 qpm
    fn cycle_example() -> TrainingExample {
        let mut sequence = NoteSequence::default();
        sequence.push_tempo(Tempo {
            time: Duration::ZERO,
            qpm: 120.0,
        });
        let notes: Vec<(u8, f64)> = [60, 62, 64]
            .iter()
            .cycle()
            .take(12)
            .map(|pitch| (*pitch, 0.25))
            .collect();
        melody(&mut sequence, 0.0, &notes);
        TrainingExample {
            offset: Duration::ZERO,
            sequence,
        }
    }

    fn fixture_examples() -> Vec<TrainingExample> {
        split_on_time_changes(&two_tempo_fixture(), SplitOptions::default())
    }

    #[test]
    fn no_examples_is_an_empty_dataset() {
        let result = NoteTransitionModel.fit(&[], &TrainingParams::default());
        assert_eq!(result.unwrap_err(), TrainingError::EmptyDataset);
    }

    #[test]
    fn examples_without_notes_are_an_empty_dataset() {
        let empty = TrainingExample {
            offset: Duration::ZERO,
            sequence: NoteSequence::default(),
        };
        let result = NoteTransitionModel.fit(&[empty], &TrainingParams::default());
        assert_eq!(result.unwrap_err(), TrainingError::EmptyDataset);
    }

    #[test]
    fn bad_hyperparameters_fail_before_training() {
        let result = NoteTransitionModel.fit(&fixture_examples(), &params(0, 1));
        assert!(matches!(
            result,
            Err(TrainingError::InvalidHyperparameters(_))
        ));
    }

    #[test]
    fn overflowing_loss_is_reported_as_divergence() {
        // both segments share tokens that lead to different notes, so the
        // huge steps keep overshooting
        let params = TrainingParams {
            epochs: 3,
            batch_size: 1,
            learning_rate: f64::MAX,
            seed: Some(3),
        };
        let result = NoteTransitionModel.fit(&fixture_examples(), &params);
        assert_eq!(result.unwrap_err(), TrainingError::Diverged { epoch: 1 });
    }

    #[test]
    fn training_lowers_the_loss() {
        let examples = vec![cycle_example()];
        let short = NoteTransitionModel.fit(&examples, &params(1, 4)).unwrap();
        let long = NoteTransitionModel.fit(&examples, &params(20, 4)).unwrap();
        assert!(long.loss() < short.loss());
        assert_eq!(long.vocabulary_size(), 4);
    }

    #[test]
    fn greedy_sampling_follows_the_learned_cycle() {
        let model = NoteTransitionModel;
        let state = model.fit(&[cycle_example()], &params(5, 2)).unwrap();
        let generated = model.sample(&state, &greedy(6)).unwrap();
        let pitches: Vec<u8> = generated.notes.iter().map(|n| n.pitch.as_int()).collect();
        assert_eq!(pitches, vec![60, 62, 64, 60, 62, 64]);
        assert_approx_eq!(generated.notes[1].start.as_secs_f64(), 0.25);
        assert_approx_eq!(generated.qpm_at(Duration::ZERO), 120.0);
    }

    #[rstest(length, case(0), case(1), case(4), case(64))]
    fn sample_has_the_requested_length(length: usize) {
        let model = NoteTransitionModel;
        let state = model.fit(&fixture_examples(), &params(2, 8)).unwrap();
        let sampled = GenerationParams {
            length,
            temperature: 1.0,
            seed: Some(5),
        };
        assert_eq!(model.sample(&state, &sampled).unwrap().len(), length);
        assert_eq!(model.sample(&state, &greedy(length)).unwrap().len(), length);
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let model = NoteTransitionModel;
        let state = model.fit(&fixture_examples(), &params(2, 8)).unwrap();
        let sampled = GenerationParams {
            length: 32,
            temperature: 1.5,
            seed: Some(99),
        };
        let first = model.sample(&state, &sampled).unwrap();
        let second = model.sample(&state, &sampled).unwrap();
        assert_eq!(first.notes, second.notes);
    }

    #[test]
    fn negative_temperature_is_rejected() {
        let model = NoteTransitionModel;
        let state = model.fit(&fixture_examples(), &params(1, 1)).unwrap();
        let result = model.sample(
            &state,
            &GenerationParams {
                temperature: -1.0,
                ..greedy(4)
            },
        );
        assert_eq!(result.unwrap_err(), GenerationError::InvalidTemperature(-1.0));
    }

    #[test]
    fn generated_notes_use_the_dominant_setting() {
        let mut sequence = NoteSequence::default();
        sequence.push_time_signature(TimeSignature {
            time: Duration::ZERO,
            numerator: 6,
            denominator: 8,
        });
        for i in 0..4 {
            let start = i as f64 * 0.5;
            sequence.push_note(
                Note::new(50 + i as u8, 90, secs(start), secs(start + 0.5))
                    .on_instrument(u4::from(2), u7::from(40)),
            );
        }
        let example = TrainingExample {
            offset: Duration::ZERO,
            sequence,
        };
        let model = NoteTransitionModel;
        let state = model.fit(&[example], &params(1, 1)).unwrap();
        let generated = model.sample(&state, &greedy(3)).unwrap();
        assert_eq!(generated.time_signatures[0].numerator, 6);
        assert!(generated
            .notes
            .iter()
            .all(|n| n.channel.as_int() == 2 && n.program.as_int() == 40));
        assert_approx_eq!(state.qpm(), DEFAULT_QPM);
    }
}
