use crate::descriptor::{HeaderKind, ModelDescriptor, RawDescriptor};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tunesmith_core::TuneError;

const DEFAULT_MODELS: &str = include_str!("models.toml");

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    models: Vec<RawDescriptor>,
}

#[derive(Debug, Clone)]
enum Source {
    Builtin(RawDescriptor),
    File(PathBuf),
}

pub struct ModelRegistry {
    models_dir: Option<PathBuf>,
    index: RwLock<BTreeMap<String, Source>>,
    cache: RwLock<HashMap<String, Arc<ModelDescriptor>>>,
}

impl ModelRegistry {
    /// A registry holding only the built-in descriptors.
    pub fn new() -> Self {
        let registry = Self {
            models_dir: None,
            index: RwLock::new(BTreeMap::new()),
            cache: RwLock::new(HashMap::new()),
        };
        registry.rescan();
        registry
    }

    /// Built-in descriptors plus every readable `*.toml` in `models_dir`.
    pub fn build(models_dir: impl Into<PathBuf>) -> Self {
        let registry = Self {
            models_dir: Some(models_dir.into()),
            index: RwLock::new(BTreeMap::new()),
            cache: RwLock::new(HashMap::new()),
        };
        registry.rescan();
        registry
    }

    /// Forget every cached descriptor and rescan the models directory.
    pub fn reload(&self) {
        write(&self.cache).clear();
        self.rescan();
    }

    fn rescan(&self) {
        let mut index = BTreeMap::new();
        load_defaults(&mut index);
        if let Some(dir) = &self.models_dir {
            load_directory(dir, &mut index);
        }
        info!("model registry indexed {} models", index.len());
        *write(&self.index) = index;
    }

    pub fn model_ids(&self) -> Vec<String> {
        read(&self.index).keys().cloned().collect()
    }

    /// Resolve a model id, parsing its descriptor on first use.
    pub fn load(&self, model_id: &str) -> Result<Arc<ModelDescriptor>, TuneError> {
        if let Some(descriptor) = read(&self.cache).get(model_id) {
            return Ok(descriptor.clone());
        }

        let source = read(&self.index)
            .get(model_id)
            .cloned()
            .ok_or_else(|| TuneError::not_found("model", model_id))?;

        let descriptor = match source {
            Source::Builtin(raw) => raw.into_descriptor("<builtin>")?,
            Source::File(path) => read_descriptor(&path)?,
        };
        if descriptor.id != model_id {
            return Err(TuneError::CorruptDescriptor {
                path: model_id.to_string(),
                reason: format!("descriptor now names model '{}'", descriptor.id),
            });
        }

        debug!("loaded descriptor for {}", model_id);
        let descriptor = Arc::new(descriptor);
        // A concurrent loader may have won; keep whichever landed first.
        let mut cache = write(&self.cache);
        Ok(cache
            .entry(model_id.to_string())
            .or_insert(descriptor)
            .clone())
    }

    /// Every loadable model, ordered by rank then display name.
    pub fn list(&self) -> Vec<Arc<ModelDescriptor>> {
        let mut models: Vec<_> = self
            .model_ids()
            .iter()
            .filter_map(|id| match self.load(id) {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    warn!("skipping model {}: {}", id, e);
                    None
                }
            })
            .collect();
        models.sort_by(|a, b| {
            a.rank
                .cmp(&b.rank)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
        models
    }

    pub fn validate_tokens<S: AsRef<str>>(
        &self,
        tokens: &[S],
        model_id: &str,
    ) -> Result<bool, TuneError> {
        Ok(self.load(model_id)?.accepts_tokens(tokens))
    }

    pub fn validate_header_token(
        &self,
        kind: HeaderKind,
        token: &str,
        model_id: &str,
    ) -> Result<bool, TuneError> {
        Ok(self.load(model_id)?.accepts_header(kind, token))
    }

    pub fn sample_unit_length(
        &self,
        model_id: &str,
        meter: &str,
        seed: u64,
    ) -> Result<String, TuneError> {
        Ok(self.load(model_id)?.sample_unit_length(meter, seed))
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn load_defaults(index: &mut BTreeMap<String, Source>) {
    match toml::from_str::<RegistryFile>(DEFAULT_MODELS) {
        Ok(parsed) => {
            for raw in parsed.models {
                if let Some(id) = raw.id.clone() {
                    index.insert(id, Source::Builtin(raw));
                }
            }
        }
        Err(e) => warn!("built-in model list unreadable: {}", e),
    }
}

fn load_directory(dir: &Path, index: &mut BTreeMap<String, Source>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("models directory {:?} unreadable: {}", dir, e);
            return;
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();

    for path in paths {
        match read_descriptor(&path) {
            Ok(descriptor) => {
                if index.contains_key(&descriptor.id) {
                    info!("{:?} overrides model {}", path, descriptor.id);
                }
                index.insert(descriptor.id, Source::File(path));
            }
            Err(e) => warn!("skipping descriptor {:?}: {}", path, e),
        }
    }
}

fn read_descriptor(path: &Path) -> Result<ModelDescriptor, TuneError> {
    let origin = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => TuneError::not_found("model descriptor", &origin),
        _ => TuneError::Io(e),
    })?;
    let raw: RawDescriptor =
        toml::from_str(&content).map_err(|e| TuneError::CorruptDescriptor {
            path: origin.clone(),
            reason: e.to_string(),
        })?;
    raw.into_descriptor(&origin)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
