use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use url::Url;

/// Path suffix the backend mounts the chat socket under.
const WS_PATH: &str = "/api/ws";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Explicit WebSocket endpoint; overrides origin-based resolution.
    #[serde(default)]
    pub ws_url: String,
    /// Origin of the hosting deployment, e.g. "https://w-lawyer.ru".
    #[serde(default = "default_origin")]
    pub origin: String,
    /// REST API base; in development the socket dials this host directly.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Development mode: bypass the reverse proxy and hit the backend port.
    #[serde(default)]
    pub development: bool,
    /// Login reported by the demo auth collaborator.
    #[serde(default = "default_user")]
    pub user: String,
}

impl Settings {
    /// Resolve the WebSocket endpoint. An explicit `ws_url` wins; otherwise
    /// the endpoint derives from the origin's scheme (wss for https) and
    /// host, hitting the backend port directly in development and going
    /// through the reverse proxy in production.
    pub fn resolve_ws_url(&self) -> Result<String, String> {
        if !self.ws_url.is_empty() {
            return Ok(format!("{}{}", self.ws_url.trim_end_matches('/'), WS_PATH));
        }
        let origin = Url::parse(&self.origin)
            .map_err(|e| format!("invalid origin {:?}: {}", self.origin, e))?;
        let scheme = if origin.scheme() == "https" { "wss" } else { "ws" };
        let host = if self.development {
            let api = Url::parse(&self.api_url)
                .map_err(|e| format!("invalid api_url {:?}: {}", self.api_url, e))?;
            let api_host = api
                .host_str()
                .ok_or_else(|| format!("api_url {:?} has no host", self.api_url))?;
            match api.port() {
                Some(port) => format!("{}:{}", api_host, port),
                None => api_host.to_string(),
            }
        } else {
            origin
                .host_str()
                .ok_or_else(|| format!("origin {:?} has no host", self.origin))?
                .to_string()
        };
        Ok(format!("{}://{}{}", scheme, host, WS_PATH))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            origin: default_origin(),
            api_url: default_api_url(),
            development: false,
            user: default_user(),
        }
    }
}

fn default_origin() -> String {
    "http://localhost:3000".into()
}

fn default_api_url() -> String {
    "http://localhost:3007/api".into()
}

fn default_user() -> String {
    "demo".into()
}

pub fn settings_path() -> Result<PathBuf, String> {
    if let Some(dir) = dirs::data_local_dir() {
        return Ok(dir.join("LexChat").join("settings.json"));
    }
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".lexchat").join("settings.json"));
    }
    Err("Failed to resolve data directory".into())
}

pub fn load() -> Settings {
    let path = match settings_path() {
        Ok(p) => p,
        Err(_) => return Settings::default(),
    };
    match fs::read_to_string(&path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
        Err(_) => Settings::default(),
    }
}

pub fn save(settings: &Settings) -> Result<(), String> {
    let path = settings_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create settings dir: {}", e))?;
    }
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;
    fs::write(&path, json).map_err(|e| format!("Failed to write settings: {}", e))?;
    Ok(())
}
