use crate::{ComposeSpec, Engine, TokenSink};
use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::thread;
use std::time::Duration;
use tunesmith_repertoire::HeaderKind;

const END_OF_TUNE: &str = "</s>";
const START_OF_TUNE: &str = "<s>";

/// Development engine: echoes the priming tokens, then wanders through the
/// model's vocabulary. Same seed, same tune.
#[derive(Debug, Clone)]
pub struct Pinky {
    length: usize,
    pace: Duration,
}

impl Default for Pinky {
    fn default() -> Self {
        Self {
            length: 48,
            pace: Duration::ZERO,
        }
    }
}

impl Pinky {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of body tokens generated after the priming tokens.
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    /// Pause between tokens, to make streaming visible in a browser.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }
}

impl Engine for Pinky {
    fn name(&self) -> &str {
        "pinky"
    }

    fn compose(&self, spec: &ComposeSpec, sink: &mut dyn TokenSink) -> Result<()> {
        if !(spec.temperature > 0.0) {
            return Err(anyhow!("Pinky Error: temperature must be positive"));
        }
        let model = &spec.model;
        let mut rng = StdRng::seed_from_u64(spec.seed);

        let mut tokens: Vec<String> = spec.priming_tokens.clone();
        if tokens.is_empty() {
            for kind in [HeaderKind::Meter, HeaderKind::Key] {
                let table = model.header_tokens(kind);
                if !table.is_empty() {
                    tokens.push(table[rng.random_range(0..table.len())].clone());
                }
            }
        }

        let pool: Vec<&String> = model
            .vocabulary()
            .iter()
            .filter(|t| {
                model.rules.header_kind(t).is_none()
                    && *t != &model.wildcard
                    && t.as_str() != END_OF_TUNE
                    && t.as_str() != START_OF_TUNE
            })
            .collect();
        if pool.is_empty() {
            return Err(anyhow!("Pinky Error: model {} has no body tokens", model.id));
        }

        // Colder tunes stay within a narrower slice of the vocabulary.
        let breadth = ((pool.len() as f64) * spec.temperature.min(1.0)).ceil() as usize;
        let breadth = breadth.clamp(1, pool.len());
        for _ in 0..self.length {
            tokens.push(pool[rng.random_range(0..breadth)].clone());
        }

        for token in &tokens {
            sink.accept(token)?;
            if !self.pace.is_zero() {
                thread::sleep(self.pace);
            }
        }
        Ok(())
    }
}
