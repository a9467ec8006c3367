//! JSON settings document.
//!
//! The settings file is owned by the surrounding application (tray UI,
//! preference dialogs); the engine only ever receives the parsed [`Settings`]
//! value and never touches the file itself. The load/save helpers here are
//! what that outer layer uses:
//!
//! - Windows:  `%APPDATA%\MouseShare\settings.json`
//! - Linux:    `~/.config/mouseshare/settings.json`
//! - macOS:    `~/Library/Application Support/MouseShare/settings.json`
//!
//! Keys are PascalCase to match the documented settings schema. Fields added
//! in later versions carry `#[serde(default)]` so older files keep loading.

use std::path::PathBuf;

use mouseshare_core::{Edge, MachineId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for settings file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing settings at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The JSON content could not be parsed or produced.
    #[error("settings JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Top-level persisted settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Settings {
    /// Stable identity, assigned on first run and never changed after.
    pub machine_id: MachineId,
    /// Human-readable name advertised to peers.
    pub machine_name: String,
    /// TCP port peer connections are accepted on.
    #[serde(default = "default_local_port")]
    pub local_port: u16,
    /// UDP port presence datagrams are exchanged on.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Master switch: when false no hooks are installed and no input is
    /// captured or forwarded.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// How close to an edge (in pixels) the pointer must be to transfer.
    #[serde(default = "default_edge_threshold")]
    pub edge_threshold: i32,
    /// Configured peers and their placement around this machine's screen.
    #[serde(default)]
    pub peers: Vec<PeerEntry>,
    #[serde(default)]
    pub clipboard: ClipboardSettings,
}

/// One configured peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PeerEntry {
    pub id: MachineId,
    pub name: String,
    /// Host name or IP address used when dialing.
    pub address: String,
    #[serde(default = "default_local_port")]
    pub port: u16,
    /// Which side of this machine's screen the peer sits on.
    pub position: Edge,
    /// Alignment offsets, reserved for non-aligned layouts.
    #[serde(default)]
    pub offset_x: i32,
    #[serde(default)]
    pub offset_y: i32,
}

/// Clipboard sync settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClipboardSettings {
    /// Whether clipboard changes are shared with peers at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether image content is accepted from peers (text always is).
    #[serde(default)]
    pub sync_images: bool,
}

impl Default for ClipboardSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_images: false,
        }
    }
}

fn default_local_port() -> u16 {
    24800
}
fn default_discovery_port() -> u16 {
    24801
}
fn default_true() -> bool {
    true
}
fn default_edge_threshold() -> i32 {
    1
}

impl Settings {
    /// Fresh settings with a newly generated identity.
    pub fn generate(machine_name: impl Into<String>) -> Self {
        Self {
            machine_id: MachineId::generate(),
            machine_name: machine_name.into(),
            local_port: default_local_port(),
            discovery_port: default_discovery_port(),
            enabled: true,
            edge_threshold: default_edge_threshold(),
            peers: Vec::new(),
            clipboard: ClipboardSettings::default(),
        }
    }
}

// ── Settings file access ──────────────────────────────────────────────────────

/// Resolves the full path to the settings file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the platform base
/// directory cannot be determined from the environment.
pub fn settings_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("settings.json"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads settings from `path`, or creates-and-persists a fresh document with
/// a generated identity when the file does not exist yet.
///
/// # Errors
///
/// Returns [`ConfigError`] for I/O failures other than "not found" and for
/// malformed JSON.
pub fn load_or_init(path: &std::path::Path, machine_name: &str) -> Result<Settings, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let settings = Settings::generate(machine_name);
            save(path, &settings)?;
            Ok(settings)
        }
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `settings` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError`] for file-system or serialization failures.
pub fn save(path: &std::path::Path, settings: &Settings) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the app folder.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("MouseShare"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("MouseShare")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("mouseshare"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uses_default_ports() {
        let settings = Settings::generate("test-host");
        assert_eq!(settings.local_port, 24800);
        assert_eq!(settings.discovery_port, 24801);
        assert!(settings.enabled);
        assert!(settings.peers.is_empty());
    }

    #[test]
    fn test_settings_round_trip_through_json() {
        let mut settings = Settings::generate("round-trip");
        settings.peers.push(PeerEntry {
            id: MachineId::generate(),
            name: "office-pc".to_string(),
            address: "192.168.1.20".to_string(),
            port: 24800,
            position: Edge::Right,
            offset_x: 0,
            offset_y: 0,
        });

        let json = serde_json::to_string_pretty(&settings).expect("serialize");
        let restored: Settings = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored, settings);
    }

    #[test]
    fn test_settings_keys_are_pascal_case() {
        let settings = Settings::generate("case-check");
        let json = serde_json::to_string(&settings).expect("serialize");
        assert!(json.contains("\"MachineId\""));
        assert!(json.contains("\"MachineName\""));
        assert!(json.contains("\"LocalPort\""));
        assert!(json.contains("\"DiscoveryPort\""));
        assert!(json.contains("\"Clipboard\""));
    }

    #[test]
    fn test_minimal_document_fills_defaults() {
        let id = MachineId::generate();
        let json = format!(r#"{{"MachineId":"{id}","MachineName":"bare"}}"#);
        let settings: Settings = serde_json::from_str(&json).expect("deserialize minimal");
        assert_eq!(settings.local_port, 24800);
        assert_eq!(settings.discovery_port, 24801);
        assert_eq!(settings.edge_threshold, 1);
        assert!(settings.enabled);
        assert!(settings.clipboard.enabled);
        assert!(!settings.clipboard.sync_images);
    }

    #[test]
    fn test_peer_position_serializes_as_edge_name() {
        let entry = PeerEntry {
            id: MachineId::generate(),
            name: "p".to_string(),
            address: "10.0.0.2".to_string(),
            port: 24800,
            position: Edge::Bottom,
            offset_x: 0,
            offset_y: 0,
        };
        let json = serde_json::to_string(&entry).expect("serialize");
        assert!(json.contains("\"Position\":\"Bottom\""));
    }

    #[test]
    fn test_load_or_init_creates_file_with_fresh_identity() {
        let dir = std::env::temp_dir().join(format!("mouseshare_test_{}", MachineId::generate()));
        let path = dir.join("settings.json");

        let first = load_or_init(&path, "new-host").expect("first load");
        assert!(path.exists(), "settings file must be created on first run");

        let second = load_or_init(&path, "ignored-name").expect("second load");
        assert_eq!(second.machine_id, first.machine_id, "identity must persist");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_or_init_rejects_malformed_json() {
        let dir = std::env::temp_dir().join(format!("mouseshare_bad_{}", MachineId::generate()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");
        std::fs::write(&path, "{{{ not json").unwrap();

        assert!(matches!(
            load_or_init(&path, "host"),
            Err(ConfigError::Json(_))
        ));

        std::fs::remove_dir_all(&dir).ok();
    }
}
