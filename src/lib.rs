pub mod bridge;
pub mod chat_filter;
pub mod context;
pub mod credential;
pub mod effects;
pub mod error;
pub mod failover;
pub mod fallback;
pub mod gemini;
pub mod geo;
pub mod history;
pub mod interceptor;
pub mod logging;
pub mod orchestrator;
pub mod phase;
pub mod sentinel;
pub mod settings;

// Re-export commonly used items for easier access
pub use bridge::{AiBridge, BridgeConfig, BridgeParts, BridgeState, DispatchHandle, WorldContext};
pub use error::{BridgeError, Result};
pub use interceptor::{ChatEvent, ChatInterceptor, RouteDecision};
pub use orchestrator::{PhaseController, PhaseTimings, SharedWorldFlags, WorldFlags};
pub use phase::{GamePhase, GamePhaseCell, PersonaPhase};
pub use settings::BridgeSettings;
