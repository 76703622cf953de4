use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::warn;
use serde::{Deserialize, Serialize};

/// Default knob assignments; knob 3 is the one the UI can rebind.
pub const DEFAULT_APPS: [&str; 3] = ["spotify", "discord", "brave"];

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SerialConfig {
    pub port: String,
    pub baud: u32,
    pub timeout: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub serial: SerialConfig,
    pub knob3_app: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig {
                port: "COM3".to_string(),
                baud: 250_000,
                timeout: 2,
            },
            knob3_app: DEFAULT_APPS[2].to_string(),
        }
    }
}

impl AppConfig {
    /// Loads the config, falling back to defaults on any failure.
    pub fn load(path: &Path) -> Self {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(_) => return Self::default(),
        };
        match serde_json::from_reader(BufReader::new(file)) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("unreadable config at {}: {e}", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

pub fn config_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("volmod");
    if !path.exists() {
        let _ = std::fs::create_dir_all(&path);
    }
    path.join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut cfg = AppConfig::default();
        cfg.serial.port = "COM7".to_string();
        cfg.knob3_app = "chrome".to_string();
        cfg.save(&path).unwrap();

        assert_eq!(AppConfig::load(&path), cfg);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load(&dir.path().join("nope.json"));
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(AppConfig::load(&path), AppConfig::default());
    }
}
