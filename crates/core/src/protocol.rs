use crate::manifest::{TuneId, TuneSnapshot};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frames a viewer sends over its websocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    Subscribe { tune_id: TuneId },
    Unsubscribe { tune_id: TuneId },
    Submit(SubmitRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub model: String,
    pub seed: u64,
    pub temperature: f64,
    #[serde(default)]
    pub priming_tokens: Vec<String>,
    /// Optional header choices made separately from the priming tokens.
    #[serde(default)]
    pub unit_length: String,
    #[serde(default)]
    pub meter: String,
    #[serde(default)]
    pub key: String,
}

/// What the driver publishes to a tune's broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GenerationEvent {
    Started(TuneSnapshot),
    /// Full assembled text so far, never a delta.
    Progress { tune_id: TuneId, text: String },
    Finished(TuneSnapshot),
    Failed { tune_id: TuneId, reason: String },
}

impl GenerationEvent {
    pub fn tune_id(&self) -> TuneId {
        match self {
            Self::Started(tune) | Self::Finished(tune) => tune.id,
            Self::Progress { tune_id, .. } | Self::Failed { tune_id, .. } => *tune_id,
        }
    }

    /// No further events follow a terminal one on the same channel.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_) | Self::Failed { .. })
    }
}

/// Frames the server sends to a viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionAssigned { session_id: Uuid },
    Started { tune: TuneSnapshot },
    IncrementalUpdate { tune_id: TuneId, delta: String },
    Finished { tune: TuneSnapshot },
    RequestCreated { tune_id: TuneId },
    Rejected { reason: String },
    NotFound { tune_id: TuneId },
    Failed { tune_id: TuneId, reason: String },
}
