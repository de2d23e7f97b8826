use anyhow::Result;
use std::sync::Arc;
use tunesmith_repertoire::ModelDescriptor;

pub mod backend;
pub mod normalizer;

pub use backend::{Pinky, ProcessEngine};
pub use normalizer::{Abc2Abc, Normalizer, Passthrough};

/// Everything an engine needs to compose one tune.
#[derive(Debug, Clone)]
pub struct ComposeSpec {
    pub model: Arc<ModelDescriptor>,
    pub seed: u64,
    pub temperature: f64,
    pub priming_tokens: Vec<String>,
}

/// Receives tokens in the order the engine produces them. The engine waits for
/// each call to return before producing the next token.
pub trait TokenSink {
    fn accept(&mut self, token: &str) -> Result<()>;
}

impl<F> TokenSink for F
where
    F: FnMut(&str) -> Result<()>,
{
    fn accept(&mut self, token: &str) -> Result<()> {
        self(token)
    }
}

/// A generative model, treated as a black box. `compose` blocks until the
/// stream is exhausted; callers run it off the async executor.
pub trait Engine: Send + Sync {
    fn name(&self) -> &str;

    /// Produce one finite, single-pass token stream. An error from the sink
    /// stops the stream and is returned.
    fn compose(&self, spec: &ComposeSpec, sink: &mut dyn TokenSink) -> Result<()>;
}
