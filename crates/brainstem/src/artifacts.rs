use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tunesmith_core::{TuneError, TuneId};

/// Plain-text tune files under one directory: `<model>_<id>_raw` holds the
/// engine's tokens one per line, `<model>_<id>` the normalized tune.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn raw_path(&self, model: &str, id: TuneId) -> PathBuf {
        self.dir.join(format!("{}_{}_raw", model, id))
    }

    pub fn final_path(&self, model: &str, id: TuneId) -> PathBuf {
        self.dir.join(format!("{}_{}", model, id))
    }

    /// Blocking; called from the engine's thread.
    pub fn open_raw_log(&self, model: &str, id: TuneId) -> Result<RawTokenLog, TuneError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.raw_path(model, id);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(RawTokenLog {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub async fn write_final(
        &self,
        model: &str,
        id: TuneId,
        text: &str,
    ) -> Result<PathBuf, TuneError> {
        let dir: async_std::path::PathBuf = self.dir.clone().into();
        async_std::fs::create_dir_all(&dir).await?;
        let path = self.final_path(model, id);
        let target: async_std::path::PathBuf = path.clone().into();
        async_std::fs::write(&target, text).await?;
        Ok(path)
    }
}

pub struct RawTokenLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl RawTokenLog {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Each token reaches the file before this returns, so the log is
    /// readable while the tune is still being composed.
    pub fn append(&mut self, token: &str) -> Result<(), TuneError> {
        writeln!(self.writer, "{}", token)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Push everything written so far to stable storage.
    pub fn sync(&mut self) -> Result<(), TuneError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_deterministic() {
        let store = ArtifactStore::new("/tunes");
        assert_eq!(store.raw_path("swedish", 12), PathBuf::from("/tunes/swedish_12_raw"));
        assert_eq!(store.final_path("swedish", 12), PathBuf::from("/tunes/swedish_12"));
    }

    #[test]
    fn raw_tokens_are_readable_before_sync() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut log = store.open_raw_log("m1", 8).unwrap();
        for (n, token) in ["M:4/4", "K:Cmaj", "a", "b"].iter().enumerate() {
            log.append(token).unwrap();
            let on_disk = fs::read_to_string(log.path()).unwrap();
            assert_eq!(on_disk.lines().count(), n + 1);
            assert_eq!(on_disk.lines().last(), Some(*token));
        }
    }

    #[async_std::test]
    async fn raw_log_and_final_text_land_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("tunes"));

        let mut log = store.open_raw_log("m1", 3).unwrap();
        for token in ["M:4/4", "K:Cmaj", "a"] {
            log.append(token).unwrap();
        }
        log.sync().unwrap();
        assert_eq!(
            fs::read_to_string(store.raw_path("m1", 3)).unwrap(),
            "M:4/4\nK:Cmaj\na\n"
        );

        let path = store.write_final("m1", 3, "X:3\n").await.unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "X:3\n");
    }
}
