// Chat message channel with optimistic sends
//
// Outgoing messages are appended immediately with a local id and `Sending` status.
// Server confirmation is reconciled by re-fetching the whole list, never by patching.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::models::{ChatMessage, DeliveryStatus};

pub const LOCAL_ID_PREFIX: &str = "local-";

// How far a server timestamp may trail the local clock and still match a send
const CLOCK_SKEW_SECS: i64 = 30;

#[derive(Debug, Default, Clone)]
pub struct MessageChannel {
    messages: Vec<ChatMessage>,
    // Client-side delivery status of optimistic messages, keyed by local id
    outbox: HashMap<String, DeliveryStatus>,
    // Ids present in the last server list applied
    known_server_ids: HashSet<String>,
}

impl MessageChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_local_id(id: &str) -> bool {
        id.starts_with(LOCAL_ID_PREFIX)
    }

    /// Append a `Sending` message and return its local id
    pub fn insert_optimistic(&mut self, text: &str, now: DateTime<Utc>) -> String {
        let local_id = format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4());
        self.messages.push(ChatMessage {
            id: local_id.clone(),
            text: text.to_string(),
            sent_at: now,
            from_self: true,
            delivery_status: DeliveryStatus::Sending,
        });
        self.outbox.insert(local_id.clone(), DeliveryStatus::Sending);
        debug!("Queued optimistic message {}", local_id);
        local_id
    }

    pub fn status_of(&self, local_id: &str) -> Option<DeliveryStatus> {
        self.outbox.get(local_id).copied()
    }

    /// Move an optimistic message forward. Backward or repeated moves are refused.
    pub fn advance(&mut self, local_id: &str, next: DeliveryStatus) -> bool {
        let Some(current) = self.outbox.get_mut(local_id) else {
            debug!("Tried to update status for unknown message ID: {}", local_id);
            return false;
        };
        if !current.can_advance_to(next) {
            debug!("Ignoring {:?} -> {:?} for message {}", current, next, local_id);
            return false;
        }

        info!("Updating message {} status from {:?} to {:?}", local_id, current, next);
        *current = next;
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == local_id) {
            message.delivery_status = next;
        }
        true
    }

    /// Replace the list with the server's copy.
    ///
    /// Optimistic messages still `Sending` or `Failed` stay at the end of the list.
    /// A `Sent` optimistic message is dropped once the server list holds a new
    /// message of ours with the same text, not sent before it, that no other
    /// optimistic message has claimed. Until then it stays, so a poll racing the
    /// send never hides it behind an older message with the same text.
    pub fn replace_with_server(&mut self, fetched: Vec<ChatMessage>) {
        let mut candidates: Vec<Option<&ChatMessage>> = fetched
            .iter()
            .filter(|m| m.from_self && !self.known_server_ids.contains(&m.id))
            .map(Some)
            .collect();

        let mut kept = Vec::new();
        for message in self.messages.iter().filter(|m| Self::is_local_id(&m.id)) {
            let status = self.outbox.get(&message.id).copied().unwrap_or(message.delivery_status);
            if status == DeliveryStatus::Sent {
                let earliest = message.sent_at - Duration::seconds(CLOCK_SKEW_SECS);
                let claim = candidates.iter_mut().find(|slot| {
                    slot.is_some_and(|copy| copy.text == message.text && copy.sent_at >= earliest)
                });
                if let Some(slot) = claim {
                    debug!("Server copy replaces optimistic message {}", message.id);
                    *slot = None;
                    continue;
                }
            }
            kept.push(message.clone());
        }

        self.outbox.retain(|id, _| kept.iter().any(|m| &m.id == id));
        self.known_server_ids = fetched.iter().map(|m| m.id.clone()).collect();

        let mut merged = fetched;
        merged.sort_by_key(|m| m.sent_at);
        merged.extend(kept);
        self.messages = merged;
    }
}
