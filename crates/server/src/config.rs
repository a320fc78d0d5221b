use std::fs;

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_bind: String,
    pub serial_path: String,
    pub baud_rate: u32,
    pub retry_delay_ms: u64,
    pub tick_period_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:3000".into(),
            serial_path: "/dev/ttyACM0".into(),
            baud_rate: 115_200,
            retry_delay_ms: 2000,
            tick_period_ms: 50,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_bind: Option<String>,
    serial_path: Option<String>,
    baud_rate: Option<u32>,
    retry_delay_ms: Option<u64>,
    tick_period_ms: Option<u64>,
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("rig.toml") {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file) => apply_file(&mut settings, file),
            Err(error) => warn!(%error, "ignoring unparsable rig.toml"),
        }
    }

    apply_env(&mut settings);
    settings
}

fn apply_file(settings: &mut Settings, file: FileSettings) {
    if let Some(v) = file.server_bind {
        settings.server_bind = v;
    }
    if let Some(v) = file.serial_path {
        settings.serial_path = v;
    }
    if let Some(v) = file.baud_rate {
        settings.baud_rate = v;
    }
    if let Some(v) = file.retry_delay_ms {
        settings.retry_delay_ms = v;
    }
    if let Some(v) = file.tick_period_ms {
        settings.tick_period_ms = v;
    }
}

fn apply_env(settings: &mut Settings) {
    if let Ok(v) = std::env::var("RIG_SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Ok(v) = std::env::var("RIG_SERIAL_PATH") {
        settings.serial_path = v;
    }
    if let Ok(v) = std::env::var("RIG_BAUD_RATE") {
        if let Ok(parsed) = v.parse() {
            settings.baud_rate = parsed;
        }
    }
    if let Ok(v) = std::env::var("RIG_RETRY_DELAY_MS") {
        if let Ok(parsed) = v.parse() {
            settings.retry_delay_ms = parsed;
        }
    }
    if let Ok(v) = std::env::var("RIG_TICK_PERIOD_MS") {
        if let Ok(parsed) = v.parse() {
            settings.tick_period_ms = parsed;
        }
    }
}
