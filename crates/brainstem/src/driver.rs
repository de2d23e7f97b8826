use crate::artifacts::{ArtifactStore, RawTokenLog};
use crate::assembly::Assembler;
use crate::records::RequestStore;
use anyhow::{Context, Result};
use async_std::task;
use chrono::Utc;
use log::{debug, error, info};
use std::sync::Arc;
use tunesmith_core::protocol::GenerationEvent;
use tunesmith_core::{GenerationParams, TuneId};
use tunesmith_cortex::{ComposeSpec, Engine, Normalizer, TokenSink};
use tunesmith_repertoire::ModelRegistry;

/// Where the driver sends lifecycle and progress events.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, tune_id: TuneId, event: GenerationEvent);
}

impl<F> EventPublisher for F
where
    F: Fn(TuneId, GenerationEvent) + Send + Sync,
{
    fn publish(&self, tune_id: TuneId, event: GenerationEvent) {
        self(tune_id, event)
    }
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Prepended to the id in the `T:` line.
    pub title_prefix: String,
    /// Publish `Failed` when a generation stalls. Off: viewers just never
    /// see `Finished`.
    pub announce_failures: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            title_prefix: "Candidate Tune No".to_string(),
            announce_failures: false,
        }
    }
}

/// Runs generations: one task per request, engine work off the executor.
pub struct Driver {
    registry: Arc<ModelRegistry>,
    store: Arc<RequestStore>,
    engine: Arc<dyn Engine>,
    normalizer: Arc<dyn Normalizer>,
    artifacts: ArtifactStore,
    publisher: Arc<dyn EventPublisher>,
    options: DriverOptions,
}

impl Driver {
    pub fn new(
        registry: Arc<ModelRegistry>,
        store: Arc<RequestStore>,
        engine: Arc<dyn Engine>,
        normalizer: Arc<dyn Normalizer>,
        artifacts: ArtifactStore,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            registry,
            store,
            engine,
            normalizer,
            artifacts,
            publisher,
            options: DriverOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<RequestStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Fire and forget; the outcome is logged.
    pub fn spawn(self: &Arc<Self>, id: TuneId) -> task::JoinHandle<()> {
        let driver = self.clone();
        task::spawn(async move {
            if let Err(e) = driver.run_generation(id).await {
                error!("tune {}: {:#}", id, e);
            }
        })
    }

    /// Drive one request from start to finish. Returns an error only when the
    /// request record itself is unusable; engine and normalizer failures are
    /// logged and leave the request unfinished.
    pub async fn run_generation(&self, id: TuneId) -> Result<()> {
        let params = self
            .store
            .snapshot(id)
            .with_context(|| format!("loading tune {}", id))?
            .params;

        let started = self
            .store
            .update(id, |req| {
                req.mark_started(Utc::now())?;
                Ok(req.snapshot())
            })
            .with_context(|| format!("starting tune {}", id))?;
        info!(
            "tune {} started: model={} seed={} temperature={}",
            id, params.model, params.seed, params.temperature
        );
        self.publisher.publish(id, GenerationEvent::Started(started));

        let text = match self.compose(id, &params).await {
            Ok(text) => text,
            Err(e) => {
                self.stall(id, "engine", e);
                return Ok(());
            }
        };

        let document = format!(
            "X:{}\nT:{}{}\n{}\n",
            id, self.options.title_prefix, id, text
        );
        let normalized = match self.normalizer.normalize(&document).await {
            Ok(normalized) => normalized,
            Err(e) => {
                self.stall(id, "normalizer", e.into());
                return Ok(());
            }
        };

        if let Err(e) = self
            .artifacts
            .write_final(&params.model, id, &normalized)
            .await
        {
            self.stall(id, "artifacts", e.into());
            return Ok(());
        }

        let finished = self
            .store
            .update(id, |req| {
                req.finalize_text(normalized)?;
                req.mark_finished(Utc::now())?;
                Ok(req.snapshot())
            })
            .with_context(|| format!("finishing tune {}", id))?;
        info!("tune {} finished", id);
        self.publisher.publish(id, GenerationEvent::Finished(finished));
        Ok(())
    }

    async fn compose(&self, id: TuneId, params: &GenerationParams) -> Result<String> {
        let model = self.registry.load(&params.model)?;
        let spec = ComposeSpec {
            model,
            seed: params.seed,
            temperature: params.temperature,
            priming_tokens: params.priming_tokens.clone(),
        };
        let engine = self.engine.clone();
        let artifacts = self.artifacts.clone();
        let store = self.store.clone();
        let publisher = self.publisher.clone();

        task::spawn_blocking(move || -> Result<String> {
            let raw = artifacts.open_raw_log(&spec.model.id, id)?;
            let mut stream = ProgressStream {
                id,
                assembler: Assembler::new(spec.model.rules.clone()),
                raw,
                store,
                publisher,
            };
            debug!("tune {}: composing with {}", id, engine.name());
            engine.compose(&spec, &mut stream)?;
            stream.finish()
        })
        .await
    }

    fn stall(&self, id: TuneId, stage: &str, e: anyhow::Error) {
        error!("tune {} stalled in {}: {:#}", id, stage, e);
        if self.options.announce_failures {
            self.publisher.publish(
                id,
                GenerationEvent::Failed {
                    tune_id: id,
                    reason: format!("{}: {:#}", stage, e),
                },
            );
        }
    }
}

/// The engine's sink: every token goes to the raw log, the assembler, the
/// request record and the viewers, in that order.
struct ProgressStream {
    id: TuneId,
    assembler: Assembler,
    raw: RawTokenLog,
    store: Arc<RequestStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl ProgressStream {
    fn report(&self, text: String) -> Result<()> {
        self.store.update(self.id, |req| req.extend_text(&text))?;
        self.publisher.publish(
            self.id,
            GenerationEvent::Progress {
                tune_id: self.id,
                text,
            },
        );
        Ok(())
    }

    fn finish(mut self) -> Result<String> {
        let before = self.assembler.text().len();
        let text = self.assembler.finish().to_string();
        if text.len() > before {
            self.report(text)?;
        }
        self.raw.sync()?;
        Ok(self.assembler.text().to_string())
    }
}

impl TokenSink for ProgressStream {
    fn accept(&mut self, token: &str) -> Result<()> {
        self.raw.append(token)?;
        let text = self.assembler.push(token).to_string();
        debug!("tune {}: token {} {:?}", self.id, self.assembler.position(), token);
        self.report(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tunesmith_cortex::{Passthrough, Pinky};

    struct Fixture {
        driver: Driver,
        events: Arc<Mutex<Vec<GenerationEvent>>>,
        _dir: tempfile::TempDir,
    }

    fn fixture(engine: Arc<dyn Engine>, normalizer: Arc<dyn Normalizer>, announce: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let publisher = move |_: TuneId, event: GenerationEvent| {
            sink.lock().unwrap().push(event);
        };
        let driver = Driver::new(
            Arc::new(ModelRegistry::new()),
            Arc::new(RequestStore::new()),
            engine,
            normalizer,
            ArtifactStore::new(dir.path()),
            Arc::new(publisher),
        )
        .with_options(DriverOptions {
            title_prefix: "Test ".to_string(),
            announce_failures: announce,
        });
        Fixture {
            driver,
            events,
            _dir: dir,
        }
    }

    fn submit(driver: &Driver, priming: &[&str]) -> TuneId {
        driver
            .store()
            .create(GenerationParams {
                model: "thesession_with_repeats".to_string(),
                seed: 4,
                temperature: 1.0,
                priming_tokens: priming.iter().map(|s| s.to_string()).collect(),
            })
            .unwrap()
            .id
    }

    #[async_std::test]
    async fn events_follow_the_lifecycle() {
        let f = fixture(
            Arc::new(Pinky::new().with_length(5)),
            Arc::new(Passthrough),
            false,
        );
        let id = submit(&f.driver, &["M:4/4", "K:Cmaj"]);
        f.driver.run_generation(id).await.unwrap();

        let events = f.events.lock().unwrap().clone();
        assert_eq!(events.len(), 1 + 7 + 1);
        assert!(matches!(events[0], GenerationEvent::Started(_)));
        let mut previous = String::new();
        for event in &events[1..8] {
            match event {
                GenerationEvent::Progress { text, .. } => {
                    assert!(text.starts_with(&previous));
                    previous = text.clone();
                }
                other => panic!("expected progress, got {:?}", other),
            }
        }
        match &events[8] {
            GenerationEvent::Finished(tune) => {
                assert!(tune.is_finished());
                assert_eq!(
                    tune.text,
                    format!("X:{}\nT:Test {}\n{}\n", id, id, previous)
                );
            }
            other => panic!("expected finished, got {:?}", other),
        }
    }

    #[async_std::test]
    async fn artifacts_are_written_on_success() {
        let f = fixture(
            Arc::new(Pinky::new().with_length(3)),
            Arc::new(Passthrough),
            false,
        );
        let id = submit(&f.driver, &["M:4/4", "K:Cmaj"]);
        f.driver.run_generation(id).await.unwrap();

        let raw = std::fs::read_to_string(f.driver.artifacts.raw_path("thesession_with_repeats", id))
            .unwrap();
        assert_eq!(raw.lines().count(), 5);
        assert!(raw.starts_with("M:4/4\nK:Cmaj\n"));
        let tune =
            std::fs::read_to_string(f.driver.artifacts.final_path("thesession_with_repeats", id))
                .unwrap();
        assert_eq!(tune, f.driver.store().snapshot(id).unwrap().text);
    }

    #[async_std::test]
    async fn deferred_tokens_survive_a_short_stream() {
        let f = fixture(
            Arc::new(Pinky::new().with_length(0)),
            Arc::new(Passthrough),
            false,
        );
        let id = submit(&f.driver, &["a", "b"]);
        f.driver.run_generation(id).await.unwrap();
        let tune = f.driver.store().snapshot(id).unwrap();
        assert!(tune.text.ends_with("M:none\nK:none\na b\n"));
    }

    #[async_std::test]
    async fn a_one_token_stream_still_gets_both_header_lines() {
        let f = fixture(
            Arc::new(Pinky::new().with_length(0)),
            Arc::new(Passthrough),
            false,
        );
        let id = submit(&f.driver, &["a"]);
        f.driver.run_generation(id).await.unwrap();

        let tune = f.driver.store().snapshot(id).unwrap();
        assert_eq!(tune.text, format!("X:{}\nT:Test {}\nM:none\nK:none\na\n", id, id));
        let events = f.events.lock().unwrap();
        let last_progress = events.iter().rev().find_map(|e| match e {
            GenerationEvent::Progress { text, .. } => Some(text.clone()),
            _ => None,
        });
        assert_eq!(last_progress.as_deref(), Some("M:none\nK:none\na"));
    }

    /// Reads the raw log back after every token it hands over.
    struct Peeking {
        raw_path: Arc<Mutex<Option<std::path::PathBuf>>>,
        seen: Arc<Mutex<Vec<usize>>>,
    }

    impl Engine for Peeking {
        fn name(&self) -> &str {
            "peeking"
        }

        fn compose(&self, _: &ComposeSpec, sink: &mut dyn TokenSink) -> Result<()> {
            let path = self.raw_path.lock().unwrap().clone().unwrap();
            for token in ["M:4/4", "K:Cmaj", "a", "b"] {
                sink.accept(token)?;
                let lines = std::fs::read_to_string(&path)?.lines().count();
                self.seen.lock().unwrap().push(lines);
            }
            Ok(())
        }
    }

    #[async_std::test]
    async fn raw_log_is_on_disk_after_every_token() {
        let raw_path = Arc::new(Mutex::new(None));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let f = fixture(
            Arc::new(Peeking {
                raw_path: raw_path.clone(),
                seen: seen.clone(),
            }),
            Arc::new(Passthrough),
            false,
        );
        let id = submit(&f.driver, &[]);
        *raw_path.lock().unwrap() =
            Some(f.driver.artifacts.raw_path("thesession_with_repeats", id));

        f.driver.run_generation(id).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
        assert!(f.driver.store().snapshot(id).unwrap().is_finished());
    }

    struct Broken;

    #[async_trait::async_trait]
    impl Normalizer for Broken {
        async fn normalize(&self, _: &str) -> Result<String, tunesmith_core::TuneError> {
            Err(tunesmith_core::TuneError::ExternalTool("Bad note".into()))
        }
    }

    #[async_std::test]
    async fn normalizer_failure_leaves_the_tune_unfinished() {
        let f = fixture(Arc::new(Pinky::new().with_length(2)), Arc::new(Broken), false);
        let id = submit(&f.driver, &[]);
        f.driver.run_generation(id).await.unwrap();

        let tune = f.driver.store().snapshot(id).unwrap();
        assert!(tune.is_started());
        assert!(!tune.is_finished());
        let events = f.events.lock().unwrap();
        assert!(events.iter().all(|e| !e.is_terminal()));
    }

    #[async_std::test]
    async fn failures_can_be_announced() {
        let f = fixture(Arc::new(Pinky::new().with_length(2)), Arc::new(Broken), true);
        let id = submit(&f.driver, &[]);
        f.driver.run_generation(id).await.unwrap();
        let events = f.events.lock().unwrap();
        match events.last() {
            Some(GenerationEvent::Failed { tune_id, reason }) => {
                assert_eq!(*tune_id, id);
                assert!(reason.contains("Bad note"));
            }
            other => panic!("expected failed, got {:?}", other),
        }
    }

    #[async_std::test]
    async fn engine_failure_is_contained() {
        let f = fixture(Arc::new(Pinky::new()), Arc::new(Passthrough), false);
        let id = f
            .driver
            .store()
            .create(GenerationParams {
                model: "no_such_model".to_string(),
                ..GenerationParams::default()
            })
            .unwrap()
            .id;
        f.driver.run_generation(id).await.unwrap();
        assert!(!f.driver.store().snapshot(id).unwrap().is_finished());
    }

    #[async_std::test]
    async fn unknown_request_is_fatal() {
        let f = fixture(Arc::new(Pinky::new()), Arc::new(Passthrough), false);
        assert!(f.driver.run_generation(99).await.is_err());
        assert!(f.events.lock().unwrap().is_empty());
    }

    #[async_std::test]
    async fn spawned_generations_run_concurrently() {
        let f = fixture(
            Arc::new(Pinky::new().with_length(4).with_pace(Duration::from_millis(1))),
            Arc::new(Passthrough),
            false,
        );
        let driver = Arc::new(f.driver);
        let a = submit(&driver, &[]);
        let b = submit(&driver, &[]);
        let (ha, hb) = (driver.spawn(a), driver.spawn(b));
        ha.await;
        hb.await;
        assert!(driver.store().snapshot(a).unwrap().is_finished());
        assert!(driver.store().snapshot(b).unwrap().is_finished());
    }
}
