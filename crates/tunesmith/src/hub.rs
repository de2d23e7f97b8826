//! Per-tune fan-out of generation events to viewer mailboxes.
//!
//! Each tune gets its own channel with its own lock, so a busy tune never
//! holds up another. The map of channels is locked only long enough to find
//! or create a channel.

use futures::channel::mpsc;
use log::{debug, error};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tunesmith_core::protocol::GenerationEvent;
use tunesmith_core::TuneId;
use tunesmith_stem::EventPublisher;
use uuid::Uuid;

pub type Mailbox = mpsc::UnboundedSender<GenerationEvent>;

#[derive(Default)]
struct Channel {
    subscribers: HashMap<Uuid, Mailbox>,
    /// Set once the channel has left the map; holders must not reuse it.
    retired: bool,
}

#[derive(Default)]
pub struct BroadcastHub {
    channels: Mutex<HashMap<TuneId, Arc<Mutex<Channel>>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<TuneId, Arc<Mutex<Channel>>>> {
        // Map operations are single inserts and removals; a panic elsewhere
        // can't leave it half-updated.
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn existing(&self, tune_id: TuneId) -> Option<Arc<Mutex<Channel>>> {
        self.channels().get(&tune_id).cloned()
    }

    fn get_or_create(&self, tune_id: TuneId) -> Arc<Mutex<Channel>> {
        self.channels().entry(tune_id).or_default().clone()
    }

    /// Drop `channel` from the map, unless it has already been replaced.
    fn discard(&self, tune_id: TuneId, channel: &Arc<Mutex<Channel>>) {
        let mut channels = self.channels();
        if channels
            .get(&tune_id)
            .is_some_and(|current| Arc::ptr_eq(current, channel))
        {
            channels.remove(&tune_id);
        }
    }

    fn poisoned(&self, tune_id: TuneId, channel: &Arc<Mutex<Channel>>) {
        error!(
            "concurrency fault: broadcast channel for tune {} poisoned, discarding it",
            tune_id
        );
        self.discard(tune_id, channel);
    }

    pub fn subscribe(&self, tune_id: TuneId, session_id: Uuid, mailbox: Mailbox) {
        loop {
            let channel = self.get_or_create(tune_id);
            let mut guard = match channel.lock() {
                Ok(guard) => guard,
                Err(_) => {
                    self.poisoned(tune_id, &channel);
                    continue;
                }
            };
            if guard.retired {
                drop(guard);
                self.discard(tune_id, &channel);
                continue;
            }
            guard.subscribers.insert(session_id, mailbox);
            debug!(
                "session {} subscribed to tune {} ({} viewers)",
                session_id,
                tune_id,
                guard.subscribers.len()
            );
            return;
        }
    }

    /// Returns whether the session was subscribed. Safe to repeat.
    pub fn unsubscribe(&self, tune_id: TuneId, session_id: Uuid) -> bool {
        let Some(channel) = self.existing(tune_id) else {
            return false;
        };
        let (removed, empty) = match channel.lock() {
            Ok(mut guard) => {
                let removed = guard.subscribers.remove(&session_id).is_some();
                let empty = guard.subscribers.is_empty();
                if empty {
                    guard.retired = true;
                }
                (removed, empty)
            }
            Err(_) => {
                self.poisoned(tune_id, &channel);
                return false;
            }
        };
        if empty {
            self.discard(tune_id, &channel);
        }
        removed
    }

    /// Deliver `event` to every current subscriber of `tune_id`, in
    /// publication order. Terminal events retire the channel.
    pub fn publish(&self, tune_id: TuneId, event: GenerationEvent) {
        let Some(channel) = self.existing(tune_id) else {
            debug!("tune {}: no viewers for {:?}", tune_id, kind(&event));
            return;
        };
        let retire = match channel.lock() {
            Ok(mut guard) => {
                guard.subscribers.retain(|session_id, mailbox| {
                    let delivered = mailbox.unbounded_send(event.clone()).is_ok();
                    if !delivered {
                        debug!("session {} went away, pruning", session_id);
                    }
                    delivered
                });
                let retire = event.is_terminal() || guard.subscribers.is_empty();
                if retire {
                    guard.retired = true;
                    guard.subscribers.clear();
                }
                retire
            }
            Err(_) => {
                self.poisoned(tune_id, &channel);
                return;
            }
        };
        if retire {
            self.discard(tune_id, &channel);
        }
    }

    pub fn subscriber_count(&self, tune_id: TuneId) -> usize {
        self.existing(tune_id)
            .and_then(|channel| channel.lock().ok().map(|guard| guard.subscribers.len()))
            .unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.channels().len()
    }
}

impl EventPublisher for BroadcastHub {
    fn publish(&self, tune_id: TuneId, event: GenerationEvent) {
        BroadcastHub::publish(self, tune_id, event)
    }
}

fn kind(event: &GenerationEvent) -> &'static str {
    match event {
        GenerationEvent::Started(_) => "started",
        GenerationEvent::Progress { .. } => "progress",
        GenerationEvent::Finished(_) => "finished",
        GenerationEvent::Failed { .. } => "failed",
    }
}
