use async_std::io::WriteExt;
use async_std::process::{Command, Stdio};
use async_std::task;
use async_trait::async_trait;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use tunesmith_core::TuneError;

const ERROR_PREFIX: &str = "%Error : ";
const WARNING_PREFIX: &str = "%Warning : ";

/// Canonicalizes a finished tune document.
#[async_trait]
pub trait Normalizer: Send + Sync {
    async fn normalize(&self, abc: &str) -> Result<String, TuneError>;
}

/// Pipes the document through `abc2abc` (from abcMIDI).
#[derive(Debug, Clone)]
pub struct Abc2Abc {
    program: PathBuf,
    args: Vec<String>,
}

impl Default for Abc2Abc {
    fn default() -> Self {
        Self::with_command(
            "abc2abc",
            ["stdin", "-e", "-s", "-n", "4"].iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl Abc2Abc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_command(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl Normalizer for Abc2Abc {
    async fn normalize(&self, abc: &str) -> Result<String, TuneError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TuneError::ExternalTool(format!("{:?}: {}", self.program, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TuneError::ExternalTool("normalizer stdin unavailable".into()))?;
        let input = abc.to_string();
        // Feed stdin alongside reading stdout so a large tune can't fill both pipes.
        let feeder = task::spawn(async move {
            let written = stdin.write_all(input.as_bytes()).await;
            drop(stdin);
            written
        });

        let output = child
            .output()
            .await
            .map_err(|e| TuneError::ExternalTool(format!("{:?}: {}", self.program, e)))?;
        if let Err(e) = feeder.await {
            debug!("normalizer closed stdin early: {}", e);
        }

        if !output.status.success() {
            return Err(TuneError::ExternalTool(format!(
                "{:?} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|e| TuneError::ExternalTool(format!("normalizer output not UTF-8: {}", e)))?;
        check_diagnostics(&stdout)?;
        Ok(stdout)
    }
}

/// abc2abc reports problems inline, in its output. Errors fail the document,
/// warnings are only logged.
pub fn check_diagnostics(output: &str) -> Result<(), TuneError> {
    let mut errors = Vec::new();
    for line in output.lines() {
        if let Some(message) = line.strip_prefix(ERROR_PREFIX) {
            errors.push(message.trim().to_string());
        } else if let Some(message) = line.strip_prefix(WARNING_PREFIX) {
            warn!("abc2abc: {}", message.trim());
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TuneError::ExternalTool(errors.join("; ")))
    }
}

/// Returns the document unchanged. For machines without abcMIDI.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

#[async_trait]
impl Normalizer for Passthrough {
    async fn normalize(&self, abc: &str) -> Result<String, TuneError> {
        Ok(abc.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TUNE: &str = "X:1\nT:Test 1\nM:4/4\nK:Cmaj\na b c d\n";

    #[async_std::test]
    async fn passthrough_is_identity() {
        assert_eq!(Passthrough.normalize(TUNE).await.unwrap(), TUNE);
    }

    #[test]
    fn error_lines_fail_the_document() {
        let output = "X:1\n%Warning : bar 2 is short\n%Error : Bad note\n%Error : Bad bar\n";
        match check_diagnostics(output) {
            Err(TuneError::ExternalTool(reason)) => assert_eq!(reason, "Bad note; Bad bar"),
            other => panic!("expected tool failure, got {:?}", other),
        }
    }

    #[test]
    fn warnings_alone_pass() {
        assert!(check_diagnostics("X:1\n%Warning : odd\nabc\n").is_ok());
        assert!(check_diagnostics(TUNE).is_ok());
    }

    #[cfg(unix)]
    #[async_std::test]
    async fn output_is_taken_verbatim() {
        let normalizer = Abc2Abc::with_command("cat", Vec::new());
        assert_eq!(normalizer.normalize(TUNE).await.unwrap(), TUNE);
    }

    #[cfg(unix)]
    #[async_std::test]
    async fn diagnostics_in_tool_output_fail() {
        let normalizer = Abc2Abc::with_command("cat", Vec::new());
        let broken = format!("{}%Error : Unknown note\n", TUNE);
        assert!(normalizer.normalize(&broken).await.is_err());
    }

    #[async_std::test]
    async fn missing_tool_fails() {
        let normalizer = Abc2Abc::with_command("/nonexistent/abc2abc", Vec::new());
        match normalizer.normalize(TUNE).await {
            Err(TuneError::ExternalTool(_)) => {}
            other => panic!("expected tool failure, got {:?}", other),
        }
    }
}
