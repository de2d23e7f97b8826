use crate::{ComposeSpec, Engine, TokenSink};
use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

/// Lines of sampler stderr kept for the log when it fails.
const STDERR_TAIL: usize = 20;

/// Runs an external sampler and forwards its stdout, one whitespace-separated
/// token at a time. The sampler is invoked as
/// `<program> <args..> --model <parameters> --seed <n> --temperature <t> [--prime "<tokens>"]`.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    program: PathBuf,
    args: Vec<String>,
    models_dir: PathBuf,
}

impl ProcessEngine {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, models_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            models_dir: models_dir.into(),
        }
    }

    fn command(&self, spec: &ComposeSpec) -> Command {
        let parameters = spec
            .model
            .parameters
            .as_ref()
            .map(|p| self.models_dir.join(p))
            .unwrap_or_else(|| self.models_dir.join(&spec.model.id));

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--model")
            .arg(parameters)
            .arg("--seed")
            .arg(spec.seed.to_string())
            .arg("--temperature")
            .arg(spec.temperature.to_string());
        if !spec.priming_tokens.is_empty() {
            command.arg("--prime").arg(spec.priming_tokens.join(" "));
        }
        command
    }
}

impl Engine for ProcessEngine {
    fn name(&self) -> &str {
        "process"
    }

    fn compose(&self, spec: &ComposeSpec, sink: &mut dyn TokenSink) -> Result<()> {
        let mut child = self
            .command(spec)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start sampler {:?}", self.program))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("sampler stdout unavailable"))?;

        // Drained alongside stdout; a chatty sampler would otherwise fill the
        // pipe and block while we wait on stdout.
        let stderr_pipe = child.stderr.take();
        let stderr_reader = thread::spawn(move || {
            let mut text = String::new();
            if let Some(mut pipe) = stderr_pipe {
                if let Err(e) = pipe.read_to_string(&mut text) {
                    debug!("sampler stderr unreadable: {}", e);
                }
            }
            text
        });

        let mut streamed = Ok(());
        for line in BufReader::new(stdout).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    streamed = Err(anyhow!(e).context("reading sampler output"));
                    break;
                }
            };
            for token in line.split_whitespace() {
                if let Err(e) = sink.accept(token) {
                    streamed = Err(e);
                    break;
                }
            }
            if streamed.is_err() {
                break;
            }
        }

        if streamed.is_err() {
            // Nobody is reading any more; don't leave the sampler running.
            if let Err(e) = child.kill() {
                debug!("sampler already gone: {}", e);
            }
        }

        let status = child.wait().context("waiting for sampler")?;
        let stderr = stderr_reader.join().unwrap_or_default();
        streamed?;

        if !status.success() {
            let tail: Vec<&str> = stderr.lines().rev().take(STDERR_TAIL).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            warn!("sampler stderr: {}", tail.join("\n"));
            return Err(anyhow!("sampler exited with {}", status));
        }
        Ok(())
    }
}
