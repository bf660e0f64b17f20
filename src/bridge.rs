//! The persona's voice: turns a chat line into a reply, online or not.

use crate::context::{AssemblyInput, ContextAssembler};
use crate::credential::CredentialStore;
use crate::error::{BridgeError, Result};
use crate::failover::EndpointFailover;
use crate::fallback::{FAREWELL_MARKER, FallbackInput, IDLE_MARKER, fallback};
use crate::gemini::{GenerateRequest, Transport};
use crate::geo::GeoCache;
use crate::history::{ConversationTurn, HistoryStore};
use crate::phase::{GamePhaseCell, PersonaPhase};
use crate::sentinel::SentinelQueue;
use crate::settings::BridgeSettings;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use strum_macros::Display;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Delivers an unsolicited line (idle trigger) to the player.
pub type BroadcastSink = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeState {
    Starting,
    Live,
    LiveNoKey,
    ShuttingDown,
    Terminated,
}

impl BridgeState {
    pub fn accepts_dispatch(self) -> bool {
        matches!(
            self,
            BridgeState::Starting | BridgeState::Live | BridgeState::LiveNoKey
        )
    }
}

/// What the host knows about the world when the player speaks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorldContext {
    pub player_id: String,
    pub biome: Option<String>,
    pub processes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub endpoints: Vec<String>,
    pub idle_threshold: Duration,
    pub idle_check_interval: Duration,
    pub history_capacity: usize,
    pub history_window: usize,
}

impl From<&BridgeSettings> for BridgeConfig {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            endpoints: settings.endpoints.clone(),
            idle_threshold: settings.idle_threshold(),
            idle_check_interval: settings.idle_check_interval(),
            history_capacity: settings.history_capacity,
            history_window: settings.history_window,
        }
    }
}

/// Collaborators handed to [`AiBridge::new`].
pub struct BridgeParts {
    pub transport: Arc<dyn Transport>,
    pub credentials: Arc<dyn CredentialStore>,
    pub geo: Arc<GeoCache>,
    pub game_phase: GamePhaseCell,
    pub system_user: String,
    pub broadcast: BroadcastSink,
}

/// Handle to one in-flight dispatch.
#[derive(Debug)]
pub struct DispatchHandle {
    id: Uuid,
    task: JoinHandle<String>,
}

impl DispatchHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Drops the reply. The callback is not invoked if it has not run yet.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Waits for the reply that was (or will be) handed to the callback.
    pub async fn reply(self) -> Result<String> {
        Ok(self.task.await?)
    }

    /// Like [`reply`](Self::reply) but gives up after `limit`. The dispatch
    /// itself keeps running.
    pub async fn reply_within(self, limit: Duration) -> Option<String> {
        tokio::time::timeout(limit, self.task).await.ok()?.ok()
    }
}

pub struct AiBridge {
    state: Mutex<BridgeState>,
    credential: RwLock<Option<String>>,
    credentials: Arc<dyn CredentialStore>,
    transport: Arc<dyn Transport>,
    failover: EndpointFailover,
    assembler: ContextAssembler,
    history: HistoryStore,
    sentinel: SentinelQueue,
    geo: Arc<GeoCache>,
    game_phase: GamePhaseCell,
    persona: AtomicU8,
    kill_switch: AtomicBool,
    system_user: String,
    last_inbound: Mutex<Instant>,
    last_world: Mutex<WorldContext>,
    broadcast: BroadcastSink,
    config: BridgeConfig,
    runtime: Handle,
    cancel: CancellationToken,
}

impl AiBridge {
    /// Must be called from inside a Tokio runtime; dispatches run on it even
    /// when later requested from a host thread.
    pub fn new(config: BridgeConfig, parts: BridgeParts) -> Result<Self> {
        let runtime = Handle::try_current()?;
        Ok(Self {
            state: Mutex::new(BridgeState::Starting),
            credential: RwLock::new(None),
            credentials: parts.credentials,
            transport: parts.transport,
            failover: EndpointFailover::new(config.endpoints.clone()),
            assembler: ContextAssembler::default(),
            history: HistoryStore::new(config.history_capacity),
            sentinel: SentinelQueue::new(),
            geo: parts.geo,
            game_phase: parts.game_phase,
            persona: AtomicU8::new(PersonaPhase::Friend.ordinal()),
            kill_switch: AtomicBool::new(false),
            system_user: parts.system_user,
            last_inbound: Mutex::new(Instant::now()),
            last_world: Mutex::new(WorldContext::default()),
            broadcast: parts.broadcast,
            config,
            runtime,
            cancel: CancellationToken::new(),
        })
    }

    /// Loads the stored credential and starts the idle scheduler.
    pub async fn start(self: &Arc<Self>) {
        let loaded = match self.credentials.load().await {
            Ok(key) => key,
            Err(e) => {
                log::warn!("Could not read stored credential: {e}");
                None
            }
        };
        let next = if loaded.is_some() {
            BridgeState::Live
        } else {
            log::info!("No API key configured, replies will come from the offline engine");
            BridgeState::LiveNoKey
        };
        *self
            .credential
            .write()
            .unwrap_or_else(PoisonError::into_inner) = loaded;
        self.transition_from_live(next);
        self.spawn_idle_scheduler();
        log::info!("Bridge started in state {}", self.state());
    }

    pub fn state(&self) -> BridgeState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_credential(&self) -> bool {
        self.current_credential().is_some()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn sentinel(&self) -> &SentinelQueue {
        &self.sentinel
    }

    pub fn geo(&self) -> &GeoCache {
        &self.geo
    }

    pub fn failover(&self) -> &EndpointFailover {
        &self.failover
    }

    /// Answers `message` asynchronously. `on_reply` runs exactly once with a
    /// non-empty line unless the bridge is closed, in which case nothing is
    /// scheduled and `None` is returned.
    pub fn dispatch<F>(
        self: &Arc<Self>,
        message: impl Into<String>,
        world: WorldContext,
        on_reply: F,
    ) -> Option<DispatchHandle>
    where
        F: FnOnce(String) + Send + 'static,
    {
        let message = message.into();
        if message != IDLE_MARKER {
            *self
                .last_world
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = world.clone();
        }
        self.spawn_dispatch(message, world, on_reply)
    }

    /// Dispatch with whatever world context was seen last.
    pub fn dispatch_message<F>(
        self: &Arc<Self>,
        message: impl Into<String>,
        on_reply: F,
    ) -> Option<DispatchHandle>
    where
        F: FnOnce(String) + Send + 'static,
    {
        let world = self.last_world();
        self.spawn_dispatch(message.into(), world, on_reply)
    }

    fn spawn_dispatch<F>(
        self: &Arc<Self>,
        message: String,
        world: WorldContext,
        on_reply: F,
    ) -> Option<DispatchHandle>
    where
        F: FnOnce(String) + Send + 'static,
    {
        if !self.state().accepts_dispatch() || self.cancel.is_cancelled() {
            log::debug!("Dispatch refused, bridge is {}", self.state());
            return None;
        }

        let idle_elapsed = self.touch_idle_clock();
        let id = Uuid::new_v4();
        let bridge = Arc::clone(self);
        log::debug!("[{id}] dispatch accepted ({} chars)", message.len());

        let task = self.runtime.spawn(async move {
            let reply = bridge.respond(id, &message, &world, idle_elapsed).await;
            on_reply(reply.clone());
            reply
        });
        Some(DispatchHandle { id, task })
    }

    async fn respond(
        &self,
        id: Uuid,
        message: &str,
        world: &WorldContext,
        idle_elapsed: Duration,
    ) -> String {
        // Every accepted dispatch consumes the queued observations.
        let sentinel = self.sentinel.drain_all();
        let Some(key) = self.current_credential() else {
            log::debug!(
                "[{id}] no credential, offline reply ({} observations dropped)",
                sentinel.len()
            );
            return self.offline_reply(message, world, idle_elapsed);
        };

        let geo = self.geo.get();
        let assembled = self.assembler.assemble(&AssemblyInput {
            system_user: &self.system_user,
            player_name: &world.player_id,
            biome: world.biome.as_deref(),
            processes: &world.processes,
            now: chrono::Local::now(),
            game_phase: self.game_phase.get(),
            persona_phase: self.get_persona_phase(),
            kill_switch: self.kill_switch_imminent(),
            geo: geo.as_ref(),
            sentinel: &sentinel,
            message,
        });
        let history = self.history.recent(self.config.history_window);
        let request = GenerateRequest::new(
            &assembled.system_instruction,
            &history,
            &assembled.outbound_message,
        );

        match self
            .failover
            .generate(self.transport.as_ref(), &key, &request)
            .await
        {
            Ok(reply) => {
                log::info!("[{id}] reply from {}", reply.endpoint);
                self.history.append_exchange(
                    ConversationTurn::user(assembled.outbound_message),
                    ConversationTurn::model(reply.text.clone()),
                );
                reply.text
            }
            Err(e) => {
                log::warn!("[{id}] all endpoints failed, offline reply: {e}");
                self.offline_reply(message, world, idle_elapsed)
            }
        }
    }

    fn offline_reply(&self, message: &str, world: &WorldContext, idle_elapsed: Duration) -> String {
        let identity = if self.system_user.trim().is_empty() {
            world.player_id.as_str()
        } else {
            self.system_user.as_str()
        };
        let geo = self.geo.get();
        fallback(
            &FallbackInput {
                message,
                persona: self.get_persona_phase(),
                kill_switch: self.kill_switch_imminent(),
                identity,
                geo: geo.as_ref(),
                idle_elapsed,
            },
            &mut rand::rng(),
        )
    }

    /// Stops accepting work and cancels the idle scheduler. In-flight replies
    /// may still be delivered.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(*state, BridgeState::ShuttingDown | BridgeState::Terminated) {
                return;
            }
            *state = BridgeState::ShuttingDown;
        }
        log::info!("Bridge shutting down");
        self.cancel.cancel();
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = BridgeState::Terminated;
        log::info!("Bridge terminated");
    }

    /// True when at least one endpoint accepts `candidate`. Does not store it.
    pub async fn validate_credential(&self, candidate: &str) -> bool {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return false;
        }
        self.failover
            .probe_any(self.transport.as_ref(), candidate)
            .await
    }

    /// Persists `value` and switches the bridge onto the network path.
    pub async fn save_and_activate_credential(&self, value: &str) -> Result<()> {
        let value = value.trim();
        if value.is_empty() {
            return Err(BridgeError::MissingCredential);
        }
        self.credentials.save(value).await?;
        *self
            .credential
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(value.to_string());
        self.transition_from_live(BridgeState::Live);
        log::info!("API key saved and activated");
        Ok(())
    }

    pub fn inject_sentinel_observation(&self, observation: impl Into<String>) {
        self.sentinel.push(observation);
    }

    /// Unconditional; the orchestrator decides direction.
    pub fn set_persona_phase(&self, phase: PersonaPhase) {
        let previous = self.persona.swap(phase.ordinal(), Ordering::AcqRel);
        if previous != phase.ordinal() {
            log::info!(
                "Persona {} -> {phase}",
                PersonaPhase::from_ordinal(previous)
            );
        }
    }

    /// Raises the persona to at least `floor`. Returns true if it moved.
    pub fn advance_persona(&self, floor: PersonaPhase) -> bool {
        let previous = self.persona.fetch_max(floor.ordinal(), Ordering::AcqRel);
        let moved = previous < floor.ordinal();
        if moved {
            log::info!(
                "Persona {} -> {floor}",
                PersonaPhase::from_ordinal(previous)
            );
        }
        moved
    }

    pub fn get_persona_phase(&self) -> PersonaPhase {
        PersonaPhase::from_ordinal(self.persona.load(Ordering::Acquire))
    }

    /// One-way: once raised the flag stays set.
    pub fn set_kill_switch_imminent(&self, imminent: bool) {
        if !imminent {
            if self.kill_switch_imminent() {
                log::debug!("Ignoring attempt to clear the kill switch");
            }
            return;
        }
        if !self.kill_switch.swap(true, Ordering::AcqRel) {
            log::warn!("Kill switch armed");
        }
    }

    pub fn kill_switch_imminent(&self) -> bool {
        self.kill_switch.load(Ordering::Acquire)
    }

    /// Time since the last dispatch was accepted.
    pub fn idle_elapsed(&self) -> Duration {
        self.last_inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// Fires the idle trigger if the player has been quiet long enough.
    pub fn check_idle(self: &Arc<Self>) -> Option<DispatchHandle> {
        if self.idle_elapsed() < self.config.idle_threshold {
            return None;
        }
        log::info!(
            "Player idle for {}s, persona speaks first",
            self.idle_elapsed().as_secs()
        );
        let broadcast = Arc::clone(&self.broadcast);
        self.dispatch_message(IDLE_MARKER, move |reply| broadcast(reply))
    }

    /// Sends one unsolicited last line to the broadcast sink. Meant for the
    /// window between arming the kill switch and shutting down.
    pub fn deliver_final_line(self: &Arc<Self>) -> Option<DispatchHandle> {
        let broadcast = Arc::clone(&self.broadcast);
        self.dispatch_message(FAREWELL_MARKER, move |reply| broadcast(reply))
    }

    fn spawn_idle_scheduler(self: &Arc<Self>) {
        let bridge = Arc::clone(self);
        let cancel = self.cancel.clone();
        let period = self.config.idle_check_interval;
        self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        bridge.check_idle();
                    }
                }
            }
            log::debug!("Idle scheduler stopped");
        });
    }

    fn touch_idle_clock(&self) -> Duration {
        let mut last = self
            .last_inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(*last);
        *last = now;
        elapsed
    }

    fn current_credential(&self) -> Option<String> {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn last_world(&self) -> WorldContext {
        self.last_world
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // Moves between the live states only; a closed bridge stays closed.
    fn transition_from_live(&self, next: BridgeState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.accepts_dispatch() {
            *state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NoTransport;

    #[async_trait]
    impl Transport for NoTransport {
        async fn generate(&self, endpoint: &str, _key: &str, _r: &GenerateRequest) -> Result<String> {
            Err(BridgeError::Status {
                endpoint: endpoint.to_string(),
                status: 500,
            })
        }

        async fn probe(&self, endpoint: &str, _key: &str) -> Result<()> {
            Err(BridgeError::Status {
                endpoint: endpoint.to_string(),
                status: 403,
            })
        }
    }

    struct NoStore;

    #[async_trait]
    impl CredentialStore for NoStore {
        async fn load(&self) -> Result<Option<String>> {
            Ok(None)
        }
        async fn save(&self, _value: &str) -> Result<()> {
            Ok(())
        }
    }

    fn bridge() -> Arc<AiBridge> {
        let config = BridgeConfig::from(&BridgeSettings::default());
        let parts = BridgeParts {
            transport: Arc::new(NoTransport),
            credentials: Arc::new(NoStore),
            geo: Arc::new(GeoCache::new()),
            game_phase: GamePhaseCell::new(),
            system_user: "steve".into(),
            broadcast: Arc::new(|_: String| {}),
        };
        Arc::new(AiBridge::new(config, parts).expect("runtime"))
    }

    #[tokio::test]
    async fn persona_setter_is_unconditional_but_advance_is_not() {
        let bridge = bridge();
        bridge.set_persona_phase(PersonaPhase::Obsession);
        assert!(!bridge.advance_persona(PersonaPhase::Uncanny));
        assert_eq!(bridge.get_persona_phase(), PersonaPhase::Obsession);

        bridge.set_persona_phase(PersonaPhase::Friend);
        assert!(bridge.advance_persona(PersonaPhase::Uncanny));
        assert_eq!(bridge.get_persona_phase(), PersonaPhase::Uncanny);
    }

    #[tokio::test]
    async fn kill_switch_cannot_be_cleared() {
        let bridge = bridge();
        bridge.set_kill_switch_imminent(false);
        assert!(!bridge.kill_switch_imminent());
        bridge.set_kill_switch_imminent(true);
        bridge.set_kill_switch_imminent(false);
        assert!(bridge.kill_switch_imminent());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let bridge = bridge();
        bridge.start().await;
        assert_eq!(bridge.state(), BridgeState::LiveNoKey);
        bridge.shutdown();
        bridge.shutdown();
        assert_eq!(bridge.state(), BridgeState::Terminated);
        assert!(bridge.dispatch_message("hi", |_| {}).is_none());
    }

    #[tokio::test]
    async fn blank_candidate_is_never_valid() {
        let bridge = bridge();
        assert!(!bridge.validate_credential("   ").await);
        assert!(!bridge.validate_credential("rejected").await);
        assert!(matches!(
            bridge.save_and_activate_credential(" ").await,
            Err(BridgeError::MissingCredential)
        ));
    }

    #[tokio::test]
    async fn dispatch_remembers_world_context_for_later() {
        let bridge = bridge();
        bridge.start().await;
        let world = WorldContext {
            player_id: "Alex".into(),
            biome: Some("minecraft:plains".into()),
            processes: vec!["chrome.exe".into()],
        };
        let handle = bridge
            .dispatch("where am i", world.clone(), |_| {})
            .expect("accepted");
        assert!(!handle.reply().await.expect("reply").is_empty());
        assert_eq!(bridge.last_world(), world);
    }
}
