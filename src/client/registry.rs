use std::collections::HashMap;
use std::sync::Arc;

use crate::core::InboundFrame;

/// Application callback invoked for every publish frame on a subscribed topic.
pub type TopicCallback = Arc<dyn Fn(&InboundFrame) + Send + Sync>;

/// Stable handle for one registered callback instance.
///
/// Ids are never reused within a registry, so a stale unsubscribe (after the
/// callback was already removed, or after the registry was cleared) is a
/// harmless no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// No such topic/callback; nothing changed.
    NotFound,
    /// Callback removed; other listeners remain on the topic.
    Removed,
    /// Callback removed and it was the topic's last listener; the topic entry
    /// is gone. `was_wired` tells the caller whether a wire-level
    /// unsubscribe is owed.
    RemovedLast { was_wired: bool },
}

struct TopicEntry {
    /// Registration order is delivery order. Duplicate callback instances are
    /// permitted and each gets its own id.
    callbacks: Vec<(CallbackId, TopicCallback)>,
    /// Whether a live wire-level subscription exists for this topic on the
    /// current connection. Cleared wholesale on reconnect so the ordinary
    /// wire-sync path replays everything.
    wired: bool,
}

/// Topic name → ordered callback list, plus wire-subscription bookkeeping.
///
/// The registry guarantees at most one wire subscription per topic no matter
/// how many logical listeners register, and is the single source of truth the
/// reconnection controller replays from.
#[derive(Default)]
pub struct TopicRegistry {
    topics: HashMap<String, TopicEntry>,
    next_id: u64,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for a topic, creating the (unwired) topic entry on
    /// first registration.
    pub fn add(&mut self, topic: &str, callback: TopicCallback) -> CallbackId {
        let id = CallbackId(self.next_id);
        self.next_id += 1;
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicEntry {
                callbacks: Vec::new(),
                wired: false,
            })
            .callbacks
            .push((id, callback));
        id
    }

    pub fn remove(&mut self, topic: &str, id: CallbackId) -> Removal {
        let Some(entry) = self.topics.get_mut(topic) else {
            return Removal::NotFound;
        };
        let Some(index) = entry.callbacks.iter().position(|(cb_id, _)| *cb_id == id) else {
            return Removal::NotFound;
        };
        entry.callbacks.remove(index);
        if entry.callbacks.is_empty() {
            let was_wired = entry.wired;
            self.topics.remove(topic);
            Removal::RemovedLast { was_wired }
        } else {
            Removal::Removed
        }
    }

    /// Snapshot of a topic's callbacks for dispatch, so re-entrant
    /// subscribe/unsubscribe during fan-out cannot disturb iteration.
    pub fn snapshot(&self, topic: &str) -> Option<Vec<TopicCallback>> {
        self.topics
            .get(topic)
            .map(|entry| entry.callbacks.iter().map(|(_, cb)| cb.clone()).collect())
    }

    /// Topics that still need a wire-level subscribe on the current connection.
    pub fn unwired_topics(&self) -> Vec<String> {
        self.topics
            .iter()
            .filter(|(_, entry)| !entry.wired)
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub fn mark_wired(&mut self, topics: &[String]) {
        for topic in topics {
            if let Some(entry) = self.topics.get_mut(topic) {
                entry.wired = true;
            }
        }
    }

    /// Invalidate all wire subscriptions (the connection they lived on is
    /// gone); callback registrations are untouched.
    pub fn mark_all_unwired(&mut self) {
        for entry in self.topics.values_mut() {
            entry.wired = false;
        }
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn callback_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|entry| entry.callbacks.len())
            .unwrap_or(0)
    }
}
