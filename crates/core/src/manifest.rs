use crate::error::TuneError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TuneId = u64;

/// What the engine is asked to do for one tune.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub model: String,
    pub seed: u64,
    pub temperature: f64,
    #[serde(default)]
    pub priming_tokens: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: "thesession_with_repeats".to_string(),
            seed: 42,
            temperature: 1.0,
            priming_tokens: Vec::new(),
        }
    }
}

/// The record of one generation. Only the driver writes to it; everyone else
/// reads through [`TuneSnapshot`].
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    id: TuneId,
    params: GenerationParams,
    created: DateTime<Utc>,
    started: Option<DateTime<Utc>>,
    finished: Option<DateTime<Utc>>,
    text: String,
    finalized: bool,
}

impl GenerationRequest {
    pub fn new(id: TuneId, params: GenerationParams) -> Self {
        Self {
            id,
            params,
            created: Utc::now(),
            started: None,
            finished: None,
            text: String::new(),
            finalized: false,
        }
    }

    pub fn id(&self) -> TuneId {
        self.id
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    pub fn started(&self) -> Option<DateTime<Utc>> {
        self.started
    }

    pub fn finished(&self) -> Option<DateTime<Utc>> {
        self.finished
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn mark_started(&mut self, at: DateTime<Utc>) -> Result<(), TuneError> {
        if self.started.is_some() {
            return Err(TuneError::Invariant(format!(
                "tune {} already started",
                self.id
            )));
        }
        self.started = Some(at);
        Ok(())
    }

    /// Replace the text with a longer text that begins with the current one.
    pub fn extend_text(&mut self, text: &str) -> Result<(), TuneError> {
        if self.finalized {
            return Err(TuneError::Invariant(format!(
                "tune {} text is final",
                self.id
            )));
        }
        if !text.starts_with(&self.text) {
            return Err(TuneError::Invariant(format!(
                "tune {} text may only grow",
                self.id
            )));
        }
        self.text.push_str(&text[self.text.len()..]);
        Ok(())
    }

    /// The single whole-value replacement allowed in a request's lifetime.
    pub fn finalize_text(&mut self, text: String) -> Result<(), TuneError> {
        if self.finalized {
            return Err(TuneError::Invariant(format!(
                "tune {} already finalized",
                self.id
            )));
        }
        self.text = text;
        self.finalized = true;
        Ok(())
    }

    pub fn mark_finished(&mut self, at: DateTime<Utc>) -> Result<(), TuneError> {
        let started = self.started.ok_or_else(|| {
            TuneError::Invariant(format!("tune {} finished before it started", self.id))
        })?;
        if self.finished.is_some() {
            return Err(TuneError::Invariant(format!(
                "tune {} already finished",
                self.id
            )));
        }
        // Clocks can step backwards; keep started <= finished regardless.
        self.finished = Some(at.max(started));
        Ok(())
    }

    pub fn snapshot(&self) -> TuneSnapshot {
        TuneSnapshot {
            id: self.id,
            params: self.params.clone(),
            created: self.created,
            started: self.started,
            finished: self.finished,
            text: self.text.clone(),
        }
    }
}

/// A point-in-time copy of a request, as sent to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuneSnapshot {
    pub id: TuneId,
    #[serde(flatten)]
    pub params: GenerationParams,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub text: String,
}

impl TuneSnapshot {
    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request() -> GenerationRequest {
        GenerationRequest::new(7, GenerationParams::default())
    }

    #[test]
    fn text_only_grows_until_finalized() {
        let mut req = request();
        req.extend_text("M:4/4\n").unwrap();
        req.extend_text("M:4/4\nK:Cmaj\n").unwrap();
        assert!(req.extend_text("M:3/4\n").is_err());
        assert_eq!(req.text(), "M:4/4\nK:Cmaj\n");

        req.finalize_text("X:7\nM:4/4\nK:Cmaj\n".to_string()).unwrap();
        assert!(req.finalize_text("again".to_string()).is_err());
        assert!(req.extend_text("X:7\nM:4/4\nK:Cmaj\nabc").is_err());
    }

    #[test]
    fn finished_requires_started_and_never_precedes_it() {
        let mut req = request();
        assert!(req.mark_finished(Utc::now()).is_err());

        let start = Utc::now();
        req.mark_started(start).unwrap();
        assert!(req.mark_started(start).is_err());
        req.mark_finished(start - Duration::seconds(5)).unwrap();
        assert!(req.started().unwrap() <= req.finished().unwrap());
        assert!(req.snapshot().is_finished());
    }

    #[test]
    fn snapshot_flattens_params() {
        let req = request();
        let json = serde_json::to_value(req.snapshot()).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["seed"], 42);
        assert_eq!(json["model"], "thesession_with_repeats");
        assert!(json["started"].is_null());
    }
}
