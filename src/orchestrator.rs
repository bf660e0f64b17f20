//! Drives the story forward: watches the world, advances the phase and fires
//! each phase's side effects exactly once.

use crate::bridge::AiBridge;
use crate::effects::{DesktopEffects, NARRATIVE_FILE_CONTENT, NARRATIVE_FILE_NAME, SoundCue};
use crate::error::{BridgeError, Result};
use crate::phase::{GamePhase, GamePhaseCell, PersonaPhase};
use crate::sentinel::{ProcessSource, SeenProcesses, scan_snapshot};
use crate::settings::BridgeSettings;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Flags the host exposes about the running session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorldFlags {
    pub hostility_active: bool,
    pub hunt_active: bool,
    pub session_concluded: bool,
}

pub trait WorldStateSource: Send + Sync {
    /// `None` while the world is not loaded.
    fn poll(&self) -> Option<WorldFlags>;
}

/// Flags written by the host thread and polled by the controller.
#[derive(Debug, Default)]
pub struct SharedWorldFlags {
    flags: Mutex<Option<WorldFlags>>,
}

impl SharedWorldFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, change: impl FnOnce(&mut WorldFlags)) {
        let mut guard = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
        change(guard.get_or_insert_with(WorldFlags::default));
    }

    pub fn unload(&self) {
        *self.flags.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl WorldStateSource for SharedWorldFlags {
    fn poll(&self) -> Option<WorldFlags> {
        *self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone)]
pub struct PhaseTimings {
    pub kill_switch_grace: Duration,
    pub echo_delay: Duration,
    pub sentinel_scan_interval: Duration,
    pub world_poll_interval: Duration,
}

impl From<&BridgeSettings> for PhaseTimings {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            kill_switch_grace: settings.kill_switch_grace(),
            echo_delay: settings.echo_delay(),
            sentinel_scan_interval: settings.sentinel_scan_interval(),
            world_poll_interval: settings.world_poll_interval(),
        }
    }
}

#[derive(Debug, Default)]
struct Latches {
    breach: AtomicBool,
    betrayal: AtomicBool,
    aftermath: AtomicBool,
}

pub struct PhaseController {
    phase: GamePhaseCell,
    bridge: Arc<AiBridge>,
    effects: Arc<dyn DesktopEffects>,
    timings: PhaseTimings,
    latches: Latches,
    processes: Mutex<Vec<String>>, // Last snapshot seen by the scanner.
    seen: Mutex<SeenProcesses>,
    tasks: TaskTracker,
    cancel: CancellationToken,
    scanner_cancel: CancellationToken,
    runtime: Handle,
}

impl PhaseController {
    /// `phase` must be the same cell the bridge reads from.
    pub fn new(
        phase: GamePhaseCell,
        bridge: Arc<AiBridge>,
        effects: Arc<dyn DesktopEffects>,
        timings: PhaseTimings,
    ) -> Result<Self> {
        let runtime = Handle::try_current()?;
        let cancel = CancellationToken::new();
        Ok(Self {
            phase,
            bridge,
            effects,
            timings,
            latches: Latches::default(),
            processes: Mutex::new(Vec::new()),
            seen: Mutex::new(SeenProcesses::new()),
            tasks: TaskTracker::new(),
            scanner_cancel: cancel.child_token(),
            cancel,
            runtime,
        })
    }

    pub fn current_phase(&self) -> GamePhase {
        self.phase.get()
    }

    pub fn bridge(&self) -> &Arc<AiBridge> {
        &self.bridge
    }

    /// Processes from the latest scan, for the prompt's process list.
    pub fn process_snapshot(&self) -> Vec<String> {
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Moves to `next` if it is ahead of the current phase and runs its
    /// entry effects. Returns false when the request was a no-op.
    pub fn trigger_phase_change(&self, next: GamePhase) -> bool {
        let Some(previous) = self.phase.advance(next) else {
            log::debug!("Ignoring phase request {next}, already at {}", self.phase.get());
            return false;
        };
        log::info!("PHASE TRANSITION: {previous} -> {next}");
        match next {
            GamePhase::Ally => {}
            GamePhase::Breach => self.enter_breach(),
            GamePhase::Betrayal => self.enter_betrayal(),
            GamePhase::Aftermath => self.enter_aftermath(),
        }
        true
    }

    /// Applies one poll of the world flags. Each flag triggers its phase at
    /// most once per session.
    pub fn observe(&self, flags: WorldFlags) {
        if flags.hunt_active && !self.latches.betrayal.swap(true, Ordering::AcqRel) {
            self.trigger_phase_change(GamePhase::Betrayal);
        } else if flags.hostility_active && !self.latches.breach.swap(true, Ordering::AcqRel) {
            self.trigger_phase_change(GamePhase::Breach);
        }

        if flags.session_concluded && !self.latches.aftermath.swap(true, Ordering::AcqRel) {
            self.trigger_phase_change(GamePhase::Aftermath);
        }
    }

    /// A hostile entity appeared in the world.
    pub fn on_hostile_spawn(&self) {
        log::info!("Hostile entity spawned");
        self.trigger_phase_change(GamePhase::Betrayal);
    }

    /// The companion died. Only counts as a breach while hostility is active.
    pub fn on_companion_death(&self, hostility_active: bool) {
        if hostility_active && self.phase.get() == GamePhase::Ally {
            log::info!("Companion died while hostile");
            self.trigger_phase_change(GamePhase::Breach);
        }
    }

    fn enter_breach(&self) {
        self.bridge.set_persona_phase(PersonaPhase::Uncanny);
        self.run_effect("wallpaper", |fx| fx.set_wallpaper());
        self.run_effect("whisper", |fx| fx.play_sound(SoundCue::Whisper));
        self.run_effect("narrative file", |fx| {
            fx.drop_narrative_file(NARRATIVE_FILE_NAME, NARRATIVE_FILE_CONTENT)
        });

        let delay = self.timings.echo_delay;
        let cancel = self.cancel.clone();
        let effects = Arc::clone(&self.effects);
        self.tasks.spawn_on(
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        let outcome = tokio::task::spawn_blocking(move || effects.play_echo()).await;
                        log_effect_outcome("echo", outcome.map_err(BridgeError::from).and_then(|r| r));
                    }
                }
            },
            &self.runtime,
        );
    }

    fn enter_betrayal(&self) {
        self.bridge.set_persona_phase(PersonaPhase::Obsession);
        self.bridge.set_kill_switch_imminent(true);
        self.scanner_cancel.cancel();
        if self.bridge.deliver_final_line().is_none() {
            log::debug!("Bridge already closed, no final line");
        }

        let grace = self.timings.kill_switch_grace;
        let cancel = self.cancel.clone();
        let bridge = Arc::clone(&self.bridge);
        let effects = Arc::clone(&self.effects);
        self.tasks.spawn_on(
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        bridge.shutdown();
                        return;
                    }
                    _ = tokio::time::sleep(grace) => {}
                }
                bridge.shutdown();
                let outcome = tokio::task::spawn_blocking(move || {
                    effects.play_sound(SoundCue::Scream)?;
                    effects.show_overlay()?;
                    effects.show_fake_crash()
                })
                .await;
                log_effect_outcome("betrayal finale", outcome.map_err(BridgeError::from).and_then(|r| r));
            },
            &self.runtime,
        );
    }

    fn enter_aftermath(&self) {
        self.run_effect("marker process", |fx| fx.persist_marker_process());
    }

    fn run_effect<F>(&self, label: &'static str, effect: F)
    where
        F: FnOnce(&dyn DesktopEffects) -> Result<()> + Send + 'static,
    {
        let effects = Arc::clone(&self.effects);
        self.tasks.spawn_blocking_on(
            move || log_effect_outcome(label, effect(effects.as_ref())),
            &self.runtime,
        );
    }

    /// Spawns the world poll and the process scanner.
    pub fn start(
        self: &Arc<Self>,
        world: Arc<dyn WorldStateSource>,
        processes: Arc<dyn ProcessSource>,
    ) {
        let controller = Arc::clone(self);
        let cancel = self.cancel.clone();
        let period = self.timings.world_poll_interval;
        self.tasks.spawn_on(
            async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Some(flags) = world.poll() {
                                controller.observe(flags);
                            }
                        }
                    }
                }
                log::debug!("World poll stopped");
            },
            &self.runtime,
        );

        let controller = Arc::clone(self);
        let cancel = self.scanner_cancel.clone();
        let period = self.timings.sentinel_scan_interval;
        self.tasks.spawn_on(
            async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => controller.scan_once(Arc::clone(&processes)).await,
                    }
                }
                log::debug!("Process scanner stopped");
            },
            &self.runtime,
        );
    }

    /// One scanner pass. Produces observations only while the companion is
    /// still an ally, and only for processes that appeared since the last pass.
    pub async fn scan_once(&self, source: Arc<dyn ProcessSource>) {
        if self.phase.get() != GamePhase::Ally {
            return;
        }
        let snapshot = match tokio::task::spawn_blocking(move || source.snapshot()).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                log::warn!("Process scan failed: {e}");
                return;
            }
            Err(e) => {
                log::error!("Process scan panicked: {e}");
                return;
            }
        };

        let fresh = self
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fresh(&snapshot);
        let report = scan_snapshot(&fresh);
        *self
            .processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;
        for observation in report.observations {
            log::debug!("Sentinel: {observation}");
            self.bridge.inject_sentinel_observation(observation);
        }
        if let Some(floor) = report.persona_floor {
            self.bridge.advance_persona(floor);
        }
    }

    /// Cancels every loop and pending effect, shuts the bridge down and
    /// waits for running effects to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.bridge.shutdown();
        self.tasks.close();
        self.tasks.wait().await;
        log::info!("Phase controller stopped");
    }
}

fn log_effect_outcome(label: &str, outcome: Result<()>) {
    match outcome {
        Ok(()) => log::debug!("Effect '{label}' done"),
        Err(e) => log::error!("Effect '{label}' failed: {e}"),
    }
}
