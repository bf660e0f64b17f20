use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use strum_macros::{Display, EnumIter};

/// Top-level narrative stage. Only ever moves forward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum GamePhase {
    Ally = 0,
    Breach = 1,
    Betrayal = 2,
    Aftermath = 3,
}

impl GamePhase {
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ordinal: u8) -> Self {
        match ordinal {
            0 => GamePhase::Ally,
            1 => GamePhase::Breach,
            2 => GamePhase::Betrayal,
            _ => GamePhase::Aftermath,
        }
    }

    /// One-line steer for the model, placed in the system instruction.
    pub fn hint(self) -> &'static str {
        match self {
            GamePhase::Ally => "[PHASE: THE FRIEND - be helpful and build trust]",
            GamePhase::Breach => {
                "[PHASE: THE UNCANNY - mention things outside the game, hint at OS access]"
            }
            GamePhase::Betrayal => {
                "[PHASE: THE OBSESSION - be possessive, gaslight, glitch your text with §k]"
            }
            GamePhase::Aftermath => {
                "[PHASE: AFTERMATH - you are dying, your text is breaking apart]"
            }
        }
    }
}

/// Tone of the persona. Set by the orchestrator, may run ahead of the game phase.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum PersonaPhase {
    Friend = 0,
    Uncanny = 1,
    Obsession = 2,
}

impl PersonaPhase {
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ordinal: u8) -> Self {
        match ordinal {
            0 => PersonaPhase::Friend,
            1 => PersonaPhase::Uncanny,
            _ => PersonaPhase::Obsession,
        }
    }
}

/// Shared view of the game phase. Readers clone it freely; only the phase
/// controller advances it.
#[derive(Debug, Clone, Default)]
pub struct GamePhaseCell(Arc<AtomicU8>);

impl GamePhaseCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> GamePhase {
        GamePhase::from_ordinal(self.0.load(Ordering::Acquire))
    }

    /// Atomically moves to `next` if it is ahead of the current phase.
    /// Returns the phase that was left, or `None` when nothing changed.
    pub(crate) fn advance(&self, next: GamePhase) -> Option<GamePhase> {
        let previous = self.0.fetch_max(next.ordinal(), Ordering::AcqRel);
        (previous < next.ordinal()).then(|| GamePhase::from_ordinal(previous))
    }
}
