//! In-memory replay buffer of encoded packets.

use std::{collections::VecDeque, time::Duration};

pub trait RingItem {
    fn size(&self) -> usize;
    fn is_key(&self) -> bool;
    /// Presentation time in seconds, on any fixed origin.
    fn seconds(&self) -> f64;
}

/// Keeps the most recent packets within a time span and a byte budget.
/// The first retained packet is always a keyframe, so any snapshot decodes
/// from its start.
pub struct ReplayRing<T> {
    items: VecDeque<T>,
    bytes: usize,
    max_span: f64,
    max_bytes: usize,
}

impl<T: RingItem> ReplayRing<T> {
    pub fn new(max_span: Duration, max_bytes: usize) -> Self {
        Self {
            items: VecDeque::new(),
            bytes: 0,
            max_span: max_span.as_secs_f64(),
            max_bytes,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.is_empty() && !item.is_key() {
            return;
        }
        self.bytes += item.size();
        self.items.push_back(item);
        self.trim();
    }

    fn trim(&mut self) {
        while self.over_budget() {
            self.pop_front();
        }
        while self.items.front().is_some_and(|item| !item.is_key()) {
            self.pop_front();
        }
    }

    fn over_budget(&self) -> bool {
        !self.items.is_empty() && (self.bytes > self.max_bytes || self.span() > self.max_span)
    }

    fn pop_front(&mut self) {
        if let Some(item) = self.items.pop_front() {
            self.bytes -= item.size();
        }
    }

    /// Seconds between the oldest and newest packet.
    pub fn span(&self) -> f64 {
        match (self.items.front(), self.items.back()) {
            (Some(first), Some(last)) => last.seconds() - first.seconds(),
            _ => 0.0,
        }
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.bytes = 0;
    }
}

impl<T: RingItem + Clone> ReplayRing<T> {
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}
