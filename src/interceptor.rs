//! Decides which player chat lines the persona answers.

use crate::bridge::{DispatchHandle, WorldContext};
use crate::chat_filter::is_filtered;
use crate::orchestrator::PhaseController;
use crate::phase::GamePhase;
use std::sync::Arc;

/// Chat prefix for everything the persona says.
pub const PERSONA_TAG: &str = "§d<CoolPlayer303>§r ";

pub fn tagged(reply: &str) -> String {
    format!("{PERSONA_TAG}{reply}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub player_name: String,
    pub message: String,
    pub biome: Option<String>,
    pub companion_nearby: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Route,
    SilentPhase(GamePhase), // Past the point where the persona chats.
    CompanionAbsent,
    Scripted, // Handled by the scripted dialogue instead.
    Blank,
}

pub fn route(phase: GamePhase, event: &ChatEvent) -> RouteDecision {
    if event.message.trim().is_empty() {
        return RouteDecision::Blank;
    }
    if !matches!(phase, GamePhase::Ally | GamePhase::Breach) {
        return RouteDecision::SilentPhase(phase);
    }
    if !event.companion_nearby {
        return RouteDecision::CompanionAbsent;
    }
    if is_filtered(&event.message) {
        return RouteDecision::Scripted;
    }
    RouteDecision::Route
}

pub struct ChatInterceptor {
    controller: Arc<PhaseController>,
    sink: Arc<dyn Fn(String) + Send + Sync>,
}

impl ChatInterceptor {
    /// `sink` receives each reply already tagged.
    pub fn new(controller: Arc<PhaseController>, sink: Arc<dyn Fn(String) + Send + Sync>) -> Self {
        Self { controller, sink }
    }

    pub fn on_chat(&self, event: ChatEvent) -> Option<DispatchHandle> {
        let decision = route(self.controller.current_phase(), &event);
        if decision != RouteDecision::Route {
            log::debug!("Chat from {} not routed: {decision:?}", event.player_name);
            return None;
        }

        let world = WorldContext {
            player_id: event.player_name,
            biome: event.biome,
            processes: self.controller.process_snapshot(),
        };
        let sink = Arc::clone(&self.sink);
        self.controller
            .bridge()
            .dispatch(event.message, world, move |reply| sink(tagged(&reply)))
    }
}
