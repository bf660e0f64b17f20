#![allow(dead_code)]

use async_trait::async_trait;
use sentient_bridge::bridge::{AiBridge, BridgeConfig, BridgeParts};
use sentient_bridge::credential::CredentialStore;
use sentient_bridge::effects::{DesktopEffects, SoundCue};
use sentient_bridge::error::{BridgeError, Result};
use sentient_bridge::gemini::{GenerateRequest, Transport};
use sentient_bridge::geo::GeoCache;
use sentient_bridge::phase::GamePhaseCell;
use sentient_bridge::settings::BridgeSettings;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const ENDPOINTS: [&str; 3] = ["https://a.test/m:generateContent", "https://b.test/m:generateContent", "https://c.test/m:generateContent"];

/// Answers from every endpoint not listed in `failing`.
#[derive(Default)]
pub struct ScriptedTransport {
    pub failing: Mutex<HashSet<String>>,
    pub valid_key: String,
    pub outbound: Mutex<Vec<(String, String)>>, // (endpoint, last user message)
    pub history_sizes: Mutex<Vec<usize>>,
    pub echo: bool, // Reply with the user message instead of the endpoint.
}

impl ScriptedTransport {
    pub fn failing(endpoints: &[&str]) -> Self {
        Self {
            failing: Mutex::new(endpoints.iter().map(|e| e.to_string()).collect()),
            valid_key: "good-key".to_string(),
            ..Self::default()
        }
    }

    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::failing(&[])
        }
    }

    pub fn outbound(&self) -> Vec<(String, String)> {
        self.outbound.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn generate(&self, endpoint: &str, _key: &str, request: &GenerateRequest) -> Result<String> {
        let message = request
            .contents
            .last()
            .map(|c| c.parts[0].text.clone())
            .unwrap_or_default();
        self.outbound
            .lock()
            .unwrap()
            .push((endpoint.to_string(), message.clone()));
        self.history_sizes
            .lock()
            .unwrap()
            .push(request.contents.len() - 1);
        if self.failing.lock().unwrap().contains(endpoint) {
            return Err(BridgeError::Status {
                endpoint: endpoint.to_string(),
                status: 503,
            });
        }
        if self.echo {
            return Ok(format!("echo: {message}"));
        }
        Ok(format!("online reply from {endpoint}"))
    }

    async fn probe(&self, endpoint: &str, key: &str) -> Result<()> {
        if key == self.valid_key {
            Ok(())
        } else {
            Err(BridgeError::Status {
                endpoint: endpoint.to_string(),
                status: 403,
            })
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub value: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn with(value: &str) -> Self {
        Self {
            value: Mutex::new(Some(value.to_string())),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.value.lock().unwrap().clone())
    }

    async fn save(&self, value: &str) -> Result<()> {
        *self.value.lock().unwrap() = Some(value.to_string());
        Ok(())
    }
}

/// Records effect calls in order.
#[derive(Default)]
pub struct RecordingEffects {
    pub calls: Mutex<Vec<String>>,
}

impl RecordingEffects {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == name).count()
    }

    fn record(&self, name: &str) -> Result<()> {
        self.calls.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

impl DesktopEffects for RecordingEffects {
    fn name(&self) -> &str {
        "recording"
    }
    fn set_wallpaper(&self) -> Result<()> {
        self.record("wallpaper")
    }
    fn play_sound(&self, cue: SoundCue) -> Result<()> {
        self.record(&format!("sound:{cue}"))
    }
    fn drop_narrative_file(&self, _name: &str, _content: &str) -> Result<()> {
        self.record("narrative")
    }
    fn play_echo(&self) -> Result<()> {
        self.record("echo")
    }
    fn show_overlay(&self) -> Result<()> {
        self.record("overlay")
    }
    fn show_fake_crash(&self) -> Result<()> {
        self.record("crash")
    }
    fn persist_marker_process(&self) -> Result<()> {
        self.record("marker")
    }
}

pub fn settings() -> BridgeSettings {
    BridgeSettings {
        endpoints: ENDPOINTS.iter().map(|e| e.to_string()).collect(),
        ..BridgeSettings::default()
    }
}

pub struct Harness {
    pub bridge: Arc<AiBridge>,
    pub transport: Arc<ScriptedTransport>,
    pub store: Arc<MemoryStore>,
    pub phase: GamePhaseCell,
    pub broadcasts: mpsc::UnboundedReceiver<String>,
}

pub async fn harness(transport: ScriptedTransport, store: MemoryStore) -> Harness {
    let transport = Arc::new(transport);
    let store = Arc::new(store);
    let phase = GamePhaseCell::new();
    let (tx, broadcasts) = mpsc::unbounded_channel();
    let bridge = Arc::new(
        AiBridge::new(
            BridgeConfig::from(&settings()),
            BridgeParts {
                transport: transport.clone(),
                credentials: store.clone(),
                geo: Arc::new(GeoCache::new()),
                game_phase: phase.clone(),
                system_user: "steve".to_string(),
                broadcast: Arc::new(move |line: String| {
                    let _ = tx.send(line);
                }),
            },
        )
        .expect("bridge"),
    );
    bridge.start().await;
    Harness {
        bridge,
        transport,
        store,
        phase,
        broadcasts,
    }
}

pub const WAIT: Duration = Duration::from_secs(5);
