use std::collections::{HashSet, VecDeque};

use shared::domain::{ChatMessage, ParticipantId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MessageKey {
    sender_id: ParticipantId,
    content: String,
    timestamp: String,
}

impl MessageKey {
    fn of(message: &ChatMessage) -> Self {
        Self {
            sender_id: message.sender_id.clone(),
            content: message.content.clone(),
            timestamp: message.timestamp.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected(Rejection),
}

/// Admits each `(sender, content, timestamp)` once within a bounded lookback window.
#[derive(Debug)]
pub struct MessageDeduplicator {
    capacity: usize,
    order: VecDeque<MessageKey>,
    seen: HashSet<MessageKey>,
}

impl MessageDeduplicator {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    pub fn admit(&mut self, candidate: &ChatMessage) -> Admission {
        let key = MessageKey::of(candidate);
        if self.seen.contains(&key) {
            return Admission::Rejected(Rejection::Duplicate);
        }

        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.order.push_back(key.clone());
        self.seen.insert(key);
        Admission::Admitted
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
#[path = "tests/dedup_tests.rs"]
mod tests;
