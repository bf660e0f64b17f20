use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DATA_DIR_NAME: &str = ".sentient_coolplayer";
pub const SETTINGS_FILE: &str = "bridge_settings.json";

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

// Tunables for the bridge. Every field has a default so partial files load.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BridgeSettings {
    pub endpoints: Vec<String>, // Ordered generateContent URLs, first is the initial preference.
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub idle_threshold_secs: u64, // Silence needed before the persona speaks first.
    pub idle_check_interval_secs: u64,
    pub history_capacity: usize,
    pub history_window: usize, // Turns sent with each request.
    pub sentinel_scan_interval_secs: u64,
    pub world_poll_interval_ms: u64,
    pub kill_switch_grace_ms: u64, // Window for one last line before the bridge goes dark.
    pub echo_delay_secs: u64,
    pub log_level: String,
    pub geolocation_enabled: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        BridgeSettings {
            endpoints: default_endpoints(),
            connect_timeout_secs: 10,
            request_timeout_secs: 15,
            idle_threshold_secs: 180,
            idle_check_interval_secs: 60,
            history_capacity: 20,
            history_window: 10,
            sentinel_scan_interval_secs: 30,
            world_poll_interval_ms: 500,
            kill_switch_grace_ms: 4000,
            echo_delay_secs: 60,
            log_level: "debug".to_string(),
            geolocation_enabled: true,
        }
    }
}

pub fn default_endpoints() -> Vec<String> {
    ["gemini-2.0-flash", "gemini-2.0-flash-lite", "gemini-1.5-flash"]
        .iter()
        .map(|model| format!("{GEMINI_BASE}/{model}:generateContent"))
        .collect()
}

/// `<home>/.sentient_coolplayer`, or a relative directory when no home exists.
pub fn data_dir() -> PathBuf {
    dir::home_dir()
        .map(|home| home.join(DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(DATA_DIR_NAME))
}

impl BridgeSettings {
    pub fn load() -> io::Result<Self> {
        Self::load_settings_from_file(data_dir().join(SETTINGS_FILE))
    }

    pub fn save(&self) -> io::Result<()> {
        self.save_to_file(data_dir().join(SETTINGS_FILE))
    }

    pub fn load_settings_from_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let data = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&data)?;
        Ok(settings)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        file.write_all(data.as_bytes())?;
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval_secs.max(1))
    }

    pub fn sentinel_scan_interval(&self) -> Duration {
        Duration::from_secs(self.sentinel_scan_interval_secs.max(1))
    }

    pub fn world_poll_interval(&self) -> Duration {
        Duration::from_millis(self.world_poll_interval_ms.max(10))
    }

    pub fn kill_switch_grace(&self) -> Duration {
        Duration::from_millis(self.kill_switch_grace_ms)
    }

    pub fn echo_delay(&self) -> Duration {
        Duration::from_secs(self.echo_delay_secs)
    }
}
