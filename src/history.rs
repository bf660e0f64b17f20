use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const DEFAULT_CAPACITY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// Bounded log of confirmed exchanges. Oldest turns are evicted first.
#[derive(Debug)]
pub struct HistoryStore {
    capacity: usize,
    turns: Mutex<VecDeque<ConversationTurn>>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            turns: Mutex::new(VecDeque::with_capacity(capacity + 2)),
        }
    }

    fn turns(&self) -> MutexGuard<'_, VecDeque<ConversationTurn>> {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, turn: ConversationTurn) {
        let mut turns = self.turns();
        turns.push_back(turn);
        Self::evict(&mut turns, self.capacity);
    }

    /// Appends a user turn and its reply under one lock, so concurrent
    /// exchanges never interleave their halves.
    pub fn append_exchange(&self, user: ConversationTurn, model: ConversationTurn) {
        let mut turns = self.turns();
        turns.push_back(user);
        turns.push_back(model);
        Self::evict(&mut turns, self.capacity);
    }

    fn evict(turns: &mut VecDeque<ConversationTurn>, capacity: usize) {
        while turns.len() > capacity {
            turns.pop_front();
        }
    }

    /// The last `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ConversationTurn> {
        let turns = self.turns();
        let skip = turns.len().saturating_sub(n);
        turns.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns().len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
