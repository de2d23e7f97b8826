use crate::config::ServerConfig;
use crate::hub::BroadcastHub;
use crate::submission;
use anyhow::Result;
use log::info;
use std::sync::Arc;
use tunesmith_core::protocol::SubmitRequest;
use tunesmith_core::{TuneError, TuneId, TuneSnapshot};
use tunesmith_cortex::{Engine, Normalizer};
use tunesmith_repertoire::ModelRegistry;
use tunesmith_stem::{ArtifactStore, Driver, DriverOptions, EventPublisher, RequestStore};

/// Everything a connection or HTTP handler needs, cheap to clone.
#[derive(Clone)]
pub struct TuneService {
    registry: Arc<ModelRegistry>,
    store: Arc<RequestStore>,
    hub: Arc<BroadcastHub>,
    driver: Arc<Driver>,
}

impl TuneService {
    pub fn new(
        registry: Arc<ModelRegistry>,
        store: Arc<RequestStore>,
        engine: Arc<dyn Engine>,
        normalizer: Arc<dyn Normalizer>,
        artifacts: ArtifactStore,
        options: DriverOptions,
    ) -> Self {
        let hub = Arc::new(BroadcastHub::new());
        let publisher: Arc<dyn EventPublisher> = hub.clone();
        let driver = Driver::new(
            registry.clone(),
            store.clone(),
            engine,
            normalizer,
            artifacts,
            publisher,
        )
        .with_options(options);
        Self {
            registry,
            store,
            hub,
            driver: Arc::new(driver),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let registry = Arc::new(ModelRegistry::build(&config.models_dir));
        let engine = config.build_engine()?;
        info!(
            "engine: {}, tunes in {:?}",
            engine.name(),
            config.tunes_dir
        );
        Ok(Self::new(
            registry,
            Arc::new(RequestStore::new()),
            engine,
            config.build_normalizer(),
            ArtifactStore::new(&config.tunes_dir),
            config.driver_options(),
        ))
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn snapshot(&self, id: TuneId) -> Result<TuneSnapshot, TuneError> {
        self.store.snapshot(id)
    }

    pub fn exists(&self, id: TuneId) -> bool {
        self.store.contains(id)
    }

    /// Validate, record and start a generation. Nothing is recorded when the
    /// submission is rejected.
    pub fn submit(&self, request: &SubmitRequest) -> Result<TuneId, TuneError> {
        let params = submission::compose_params(&self.registry, request)?;
        let id = self.store.create(params)?.id;
        info!("tune {} created for model {}", id, request.model);
        self.driver.spawn(id);
        Ok(id)
    }
}
