//! Duplicate suppression for flooded messages.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use super::MessageId;

/// Recently seen message ids, bounded by age and count.
///
/// Ids older than the TTL, or evicted once the capacity is reached, count
/// as unseen again.
#[derive(Debug)]
pub struct SeenCache {
    ttl: Duration,
    capacity: usize,
    /// Insertion order, oldest first.
    order: VecDeque<(MessageId, Instant)>,
    ids: HashSet<MessageId>,
}

impl SeenCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            order: VecDeque::new(),
            ids: HashSet::new(),
        }
    }

    /// Record `id`. Returns `true` if it was not already present.
    pub fn insert(&mut self, id: MessageId) -> bool {
        self.insert_at(id, Instant::now())
    }

    pub fn contains(&mut self, id: &MessageId) -> bool {
        self.expire(Instant::now());
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn insert_at(&mut self, id: MessageId, now: Instant) -> bool {
        self.expire(now);
        if self.ids.contains(&id) {
            return false;
        }

        while self.order.len() >= self.capacity {
            if let Some((oldest, _)) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back((id, now));
        self.ids.insert(id);
        true
    }

    fn expire(&mut self, now: Instant) {
        while let Some((id, at)) = self.order.front() {
            if now.saturating_duration_since(*at) < self.ttl {
                break;
            }
            self.ids.remove(id);
            self.order.pop_front();
        }
    }
}
