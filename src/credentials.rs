use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use log::info;
use once_cell::sync::OnceCell;

/// The server and session token saved by `swapmeet login`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SavedSession {
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl SavedSession {
    pub fn new(server: &str, token: &str) -> Self {
        SavedSession {
            server: server.to_string(),
            token: Some(BASE64.encode(token)),
        }
    }

    pub fn get_token(&self) -> Option<String> {
        self.token.as_ref().and_then(|encoded| {
            let decoded = BASE64.decode(encoded).ok()?;
            String::from_utf8(decoded).ok().filter(|t| !t.is_empty())
        })
    }
}

pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join("swapmeet");

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

pub fn save_session(session: &SavedSession) -> Result<PathBuf> {
    let path = get_session_path()?;
    save_session_to(&path, session)?;
    Ok(path)
}

pub fn load_session() -> Result<Option<SavedSession>> {
    load_session_from(&get_session_path()?)
}

fn save_session_to(path: &Path, session: &SavedSession) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, session)?;

    info!("Session saved for {} at {}", session.server, path.display());
    Ok(())
}

fn load_session_from(path: &Path) -> Result<Option<SavedSession>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    let session: SavedSession = serde_json::from_str(&contents)?;
    info!("Loaded session for {} from {}", session.server, path.display());

    Ok(Some(session))
}

static SESSION_PATH_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

/// Use `path` instead of the default session file. Only the first call takes effect.
pub fn set_session_path_override(path: PathBuf) {
    if SESSION_PATH_OVERRIDE.set(path).is_err() {
        log::warn!("Session path override already set; ignoring");
    }
}

fn get_session_path() -> Result<PathBuf> {
    if let Some(path) = SESSION_PATH_OVERRIDE.get() {
        return Ok(path.clone());
    }
    Ok(get_config_dir()?.join("session.json"))
}
