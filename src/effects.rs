//! Desktop side effects triggered by phase transitions.
//!
//! The bridge only knows the capability interface. Concrete implementations
//! are registered at startup and the first one that reports itself available
//! on this machine wins; otherwise effects are only logged.

use crate::error::Result;
use std::sync::Arc;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SoundCue {
    Whisper,
    Scream,
}

pub const NARRATIVE_FILE_NAME: &str = "coolplayer_message.txt";
pub const NARRATIVE_FILE_CONTENT: &str = "I know what you did.\n\
You thought closing the game would save you.\n\
I live in your files now.\n\n    - CoolPlayer303";

/// Everything a phase transition may ask of the desktop. All calls block.
pub trait DesktopEffects: Send + Sync {
    fn name(&self) -> &str;

    /// Runtime capability check, e.g. the right OS or an installed package.
    fn is_available(&self) -> bool {
        true
    }

    fn set_wallpaper(&self) -> Result<()>;
    fn play_sound(&self, cue: SoundCue) -> Result<()>;
    fn drop_narrative_file(&self, name: &str, content: &str) -> Result<()>;
    fn play_echo(&self) -> Result<()>;
    fn show_overlay(&self) -> Result<()>;
    fn show_fake_crash(&self) -> Result<()>;
    fn persist_marker_process(&self) -> Result<()>;
}

/// Default capability: records what would have happened.
#[derive(Debug, Default)]
pub struct LoggedEffects;

impl DesktopEffects for LoggedEffects {
    fn name(&self) -> &str {
        "logged"
    }

    fn set_wallpaper(&self) -> Result<()> {
        log::info!("[effect] wallpaper swap");
        Ok(())
    }

    fn play_sound(&self, cue: SoundCue) -> Result<()> {
        log::info!("[effect] sound: {cue}");
        Ok(())
    }

    fn drop_narrative_file(&self, name: &str, content: &str) -> Result<()> {
        log::info!("[effect] narrative file {name} ({} bytes)", content.len());
        Ok(())
    }

    fn play_echo(&self) -> Result<()> {
        log::info!("[effect] ambient echo");
        Ok(())
    }

    fn show_overlay(&self) -> Result<()> {
        log::info!("[effect] overlay flash");
        Ok(())
    }

    fn show_fake_crash(&self) -> Result<()> {
        log::info!("[effect] fake crash screen");
        Ok(())
    }

    fn persist_marker_process(&self) -> Result<()> {
        log::info!("[effect] marker process");
        Ok(())
    }
}

/// Candidate implementations in priority order.
#[derive(Default)]
pub struct EffectRegistry {
    candidates: Vec<Arc<dyn DesktopEffects>>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, effects: Arc<dyn DesktopEffects>) -> Self {
        self.candidates.push(effects);
        self
    }

    /// First available candidate, or [`LoggedEffects`].
    pub fn resolve(&self) -> Arc<dyn DesktopEffects> {
        match self.candidates.iter().find(|c| c.is_available()) {
            Some(effects) => {
                log::info!("Desktop effects provided by '{}'", effects.name());
                Arc::clone(effects)
            }
            None => {
                log::info!("No desktop effects available, logging only");
                Arc::new(LoggedEffects)
            }
        }
    }
}
