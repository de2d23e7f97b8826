//! One connected viewer: which tunes it follows and how much of each it has
//! already been sent.
//!
//! The session never writes to the socket itself. Every handler returns the
//! messages to send, so the connection task stays the only writer and the
//! session can be driven directly in tests.

use crate::hub::Mailbox;
use crate::service::TuneService;
use log::{debug, warn};
use std::collections::HashMap;
use tunesmith_core::protocol::{ClientCommand, GenerationEvent, ServerMessage, SubmitRequest};
use tunesmith_core::TuneId;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Followed {
    sent: String,
    announced: bool,
}

pub struct ViewerSession {
    id: Uuid,
    service: TuneService,
    mailbox: Mailbox,
    followed: HashMap<TuneId, Followed>,
}

impl ViewerSession {
    pub fn new(id: Uuid, service: TuneService, mailbox: Mailbox) -> Self {
        Self {
            id,
            service,
            mailbox,
            followed: HashMap::new(),
        }
    }

    /// Keep a session id the client already holds, or mint a new one.
    pub fn resolve_id(presented: Option<&str>) -> Uuid {
        presented
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .unwrap_or_else(Uuid::new_v4)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn greeting(&self) -> ServerMessage {
        ServerMessage::SessionAssigned {
            session_id: self.id,
        }
    }

    pub fn is_following(&self, tune_id: TuneId) -> bool {
        self.followed.contains_key(&tune_id)
    }

    /// A raw text frame from the client.
    pub fn handle_frame(&mut self, frame: &str) -> Vec<ServerMessage> {
        match serde_json::from_str::<ClientCommand>(frame) {
            Ok(command) => self.handle_command(command),
            Err(e) => {
                debug!("session {}: malformed frame: {}", self.id, e);
                vec![ServerMessage::Rejected {
                    reason: format!("malformed command: {}", e),
                }]
            }
        }
    }

    pub fn handle_command(&mut self, command: ClientCommand) -> Vec<ServerMessage> {
        match command {
            ClientCommand::Subscribe { tune_id } => self.subscribe(tune_id),
            ClientCommand::Unsubscribe { tune_id } => {
                self.unsubscribe(tune_id);
                Vec::new()
            }
            ClientCommand::Submit(request) => vec![self.submit(&request)],
        }
    }

    pub fn subscribe(&mut self, tune_id: TuneId) -> Vec<ServerMessage> {
        if self.is_following(tune_id) {
            return Vec::new();
        }
        if !self.service.exists(tune_id) {
            return vec![ServerMessage::NotFound { tune_id }];
        }

        // Register before reading so nothing published in between is missed.
        self.service
            .hub()
            .subscribe(tune_id, self.id, self.mailbox.clone());
        self.followed.insert(tune_id, Followed::default());

        let tune = match self.service.snapshot(tune_id) {
            Ok(tune) => tune,
            Err(e) => {
                warn!("session {}: tune {} vanished: {}", self.id, tune_id, e);
                self.unsubscribe(tune_id);
                return vec![ServerMessage::NotFound { tune_id }];
            }
        };

        if tune.is_finished() {
            self.unsubscribe(tune_id);
            vec![ServerMessage::Finished { tune }]
        } else if tune.is_started() {
            if let Some(followed) = self.followed.get_mut(&tune_id) {
                followed.sent = tune.text.clone();
                followed.announced = true;
            }
            vec![ServerMessage::Started { tune }]
        } else {
            Vec::new()
        }
    }

    pub fn unsubscribe(&mut self, tune_id: TuneId) {
        if self.followed.remove(&tune_id).is_none() {
            warn!(
                "session {}: unsubscribe from tune {} it does not follow",
                self.id, tune_id
            );
        }
        self.service.hub().unsubscribe(tune_id, self.id);
    }

    pub fn submit(&mut self, request: &SubmitRequest) -> ServerMessage {
        match self.service.submit(request) {
            Ok(tune_id) => ServerMessage::RequestCreated { tune_id },
            Err(e) => {
                debug!("session {}: submission rejected: {}", self.id, e);
                ServerMessage::Rejected {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// An event from the hub. Progress becomes a delta against what this
    /// viewer has already been sent; anything stale is dropped.
    pub fn on_event(&mut self, event: GenerationEvent) -> Option<ServerMessage> {
        let tune_id = event.tune_id();
        let Some(followed) = self.followed.get_mut(&tune_id) else {
            debug!("session {}: dropping event for tune {}", self.id, tune_id);
            return None;
        };

        match event {
            GenerationEvent::Started(tune) => {
                if followed.announced {
                    return None;
                }
                followed.announced = true;
                Some(ServerMessage::Started { tune })
            }
            GenerationEvent::Progress { tune_id, text } => {
                if text.len() > followed.sent.len() && text.starts_with(&followed.sent) {
                    let delta = text[followed.sent.len()..].to_string();
                    followed.sent = text;
                    Some(ServerMessage::IncrementalUpdate { tune_id, delta })
                } else {
                    if !followed.sent.starts_with(&text) {
                        warn!(
                            "session {}: progress for tune {} does not extend what was sent",
                            self.id, tune_id
                        );
                    }
                    None
                }
            }
            GenerationEvent::Finished(tune) => {
                self.followed.remove(&tune_id);
                Some(ServerMessage::Finished { tune })
            }
            GenerationEvent::Failed { tune_id, reason } => {
                self.followed.remove(&tune_id);
                Some(ServerMessage::Failed { tune_id, reason })
            }
        }
    }

    /// Release every hub registration this session holds.
    pub fn teardown(&mut self) {
        for (tune_id, _) in self.followed.drain() {
            self.service.hub().unsubscribe(tune_id, self.id);
        }
    }
}

impl Drop for ViewerSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
