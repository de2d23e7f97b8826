use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tunesmith_cortex::{Abc2Abc, Engine, Normalizer, Passthrough, Pinky, ProcessEngine};
use tunesmith_stem::DriverOptions;

pub const CONFIG_FILE: &str = "tunesmith.toml";

/// `$TUNESMITH_HOME`, else `<config dir>/tunesmith`, else `./.tunesmith`.
pub fn home_dir() -> PathBuf {
    if let Ok(home) = std::env::var("TUNESMITH_HOME") {
        return PathBuf::from(home);
    }
    dirs::config_dir()
        .map(|dir| dir.join("tunesmith"))
        .unwrap_or_else(|| PathBuf::from(".tunesmith"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Stub,
    Process,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub kind: EngineKind,
    /// Sampler executable, for `kind = "process"`.
    pub command: Option<PathBuf>,
    pub args: Vec<String>,
    /// Stub only: body length and per-token pause.
    pub stub_length: usize,
    pub stub_pace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Stub,
            command: None,
            args: Vec::new(),
            stub_length: 48,
            stub_pace_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizerKind {
    Abc2abc,
    Passthrough,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub kind: NormalizerKind,
    pub command: Option<PathBuf>,
    pub args: Option<Vec<String>>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            kind: NormalizerKind::Abc2abc,
            command: None,
            args: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    /// Relative paths are resolved against the home directory.
    pub models_dir: PathBuf,
    pub tunes_dir: PathBuf,
    pub title_prefix: String,
    pub announce_failures: bool,
    pub engine: EngineConfig,
    pub normalizer: NormalizerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            models_dir: PathBuf::from("models"),
            tunes_dir: PathBuf::from("tunes"),
            title_prefix: DriverOptions::default().title_prefix,
            announce_failures: false,
            engine: EngineConfig::default(),
            normalizer: NormalizerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read `<home>/tunesmith.toml`; a missing file means defaults.
    pub fn load(home: &Path) -> Result<Self> {
        let path = home.join(CONFIG_FILE);
        let mut config = if path.exists() {
            let content =
                fs::read_to_string(&path).with_context(|| format!("reading {:?}", path))?;
            toml::from_str::<ServerConfig>(&content)
                .with_context(|| format!("parsing {:?}", path))?
        } else {
            info!("no {:?}, using defaults", path);
            ServerConfig::default()
        };
        config.models_dir = home.join(&config.models_dir);
        config.tunes_dir = home.join(&config.tunes_dir);
        Ok(config)
    }

    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            title_prefix: self.title_prefix.clone(),
            announce_failures: self.announce_failures,
        }
    }

    pub fn build_engine(&self) -> Result<Arc<dyn Engine>> {
        let engine: Arc<dyn Engine> = match self.engine.kind {
            EngineKind::Stub => Arc::new(
                Pinky::new()
                    .with_length(self.engine.stub_length)
                    .with_pace(std::time::Duration::from_millis(self.engine.stub_pace_ms)),
            ),
            EngineKind::Process => {
                let command = self
                    .engine
                    .command
                    .clone()
                    .context("engine.kind = \"process\" needs engine.command")?;
                Arc::new(ProcessEngine::new(
                    command,
                    self.engine.args.clone(),
                    self.models_dir.clone(),
                ))
            }
        };
        Ok(engine)
    }

    pub fn build_normalizer(&self) -> Arc<dyn Normalizer> {
        match self.normalizer.kind {
            NormalizerKind::Passthrough => Arc::new(Passthrough),
            NormalizerKind::Abc2abc => {
                let defaults = Abc2Abc::default();
                Arc::new(Abc2Abc::with_command(
                    self.normalizer
                        .command
                        .clone()
                        .unwrap_or_else(|| defaults.program().to_path_buf()),
                    self.normalizer
                        .args
                        .clone()
                        .unwrap_or_else(|| defaults.args().to_vec()),
                ))
            }
        }
    }
}
