use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "settings.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend_url: String,
    pub poll_interval_secs: u64,
    pub events_refresh_secs: u64,
    pub request_timeout_secs: u64,
    pub database_url: String,
    pub bills_path: PathBuf,
    pub credentials_path: PathBuf,
    pub download_dir: PathBuf,
    pub log_dir: PathBuf,
    pub listen_addr: String,
    pub keybindings: Keybindings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Keybindings {
    pub next_panel: Vec<String>,
    pub prev_panel: Vec<String>,
    pub move_up: Vec<String>,
    pub move_down: Vec<String>,
    pub open: Vec<String>,
    pub close: Vec<String>,
    pub toggle_sort: Vec<String>,
    pub clear_filter: Vec<String>,
    pub download: Vec<String>,
    pub cycle_event_type: Vec<String>,
    pub quit: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:5001".to_string(),
            poll_interval_secs: 5,
            events_refresh_secs: 300,
            request_timeout_secs: 30,
            database_url: "sqlite:maildash.db?mode=rwc".to_string(),
            bills_path: PathBuf::from("bills_data.json"),
            credentials_path: PathBuf::from("credentials.json"),
            download_dir: PathBuf::from("downloads"),
            log_dir: PathBuf::from("."),
            listen_addr: "127.0.0.1:3000".to_string(),
            keybindings: Keybindings::default(),
        }
    }
}

impl Default for Keybindings {
    fn default() -> Self {
        Self {
            next_panel: vec!["l".to_string(), "Right".to_string(), "Tab".to_string()],
            prev_panel: vec!["h".to_string(), "Left".to_string(), "BackTab".to_string()],
            move_up: vec!["k".to_string(), "Up".to_string()],
            move_down: vec!["j".to_string(), "Down".to_string()],
            open: vec!["Enter".to_string()],
            close: vec!["Esc".to_string()],
            toggle_sort: vec!["s".to_string()],
            clear_filter: vec!["c".to_string()],
            download: vec!["d".to_string()],
            cycle_event_type: vec!["t".to_string()],
            quit: vec!["q".to_string()],
        }
    }
}

pub fn parse_key_string(key_str: &str) -> (KeyCode, KeyModifiers) {
    let mut parts: Vec<&str> = key_str.split('-').collect();
    let mut modifiers = KeyModifiers::empty();

    // The last part is the base key, anything before it a modifier.
    let base_key_str = parts.pop().unwrap_or("");

    for part in parts {
        match part.to_lowercase().as_str() {
            "ctrl" => modifiers.insert(KeyModifiers::CONTROL),
            "alt" => modifiers.insert(KeyModifiers::ALT),
            "shift" => modifiers.insert(KeyModifiers::SHIFT),
            "cmd" | "command" | "super" => modifiers.insert(KeyModifiers::SUPER),
            "meta" => modifiers.insert(KeyModifiers::META),
            _ => {}
        }
    }

    let mut chars = base_key_str.chars();
    let code = match base_key_str {
        "Backspace" => KeyCode::Backspace,
        "Enter" => KeyCode::Enter,
        "Left" => KeyCode::Left,
        "Right" => KeyCode::Right,
        "Up" => KeyCode::Up,
        "Down" => KeyCode::Down,
        "Tab" => KeyCode::Tab,
        "BackTab" => KeyCode::BackTab,
        "Esc" => KeyCode::Esc,
        " " => KeyCode::Char(' '),
        _ => match (chars.next(), chars.next()) {
            (Some(c), None) => KeyCode::Char(c),
            _ => KeyCode::Null,
        },
    };

    (code, modifiers)
}

pub fn matches_key(event: KeyEvent, bindings: &[String]) -> bool {
    bindings.iter().any(|b| {
        let (code, modifiers) = parse_key_string(b);
        event.code == code && event.modifiers.contains(modifiers)
    })
}

impl Config {
    /// Reads `path`, falling back to defaults when it is missing or invalid.
    pub fn load(path: &Path) -> Self {
        use std::fs;
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "invalid config, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}
