use ratatui::style::Color;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use crate::crypto::KdfParams;
use crate::logger::log;

pub const APP_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_EDITOR: &str = "vim";

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub kdf: KdfParams,
    #[serde(default)]
    pub theme: ThemeConfig,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct GeneralConfig {
    /// Used when `$EDITOR` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
    /// Note directory; the working directory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_dir: Option<PathBuf>,
    /// Where plaintext scratch files are created while editing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
    #[serde(default)]
    pub sort: ListOrder,
}

/// Order of the note list.
#[derive(Debug, Serialize, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListOrder {
    #[default]
    Name,
    Modified,
    Filesystem,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ThemeConfig {
    pub background: Color,
    pub foreground: Color,
    pub border_active: Color,
    pub border_inactive: Color,
    pub selection_bg: Color,
    pub selection_fg: Color,
    pub header: Color,
    pub muted: Color,
    pub spinner: Color,
    pub error: Color,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            background: Color::Reset,
            foreground: Color::Rgb(248, 248, 242),
            border_active: Color::Rgb(189, 147, 249),
            border_inactive: Color::Rgb(98, 114, 164),
            selection_bg: Color::Rgb(68, 71, 90),
            selection_fg: Color::Rgb(255, 121, 198),
            header: Color::Rgb(139, 233, 253),
            muted: Color::Rgb(98, 98, 98),
            spinner: Color::Rgb(255, 184, 108),
            error: Color::Rgb(255, 85, 85),
        }
    }
}

pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("ENOTES_CONFIG_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".enotes");
    path
}

/// Editor from `$EDITOR`, then the config file, then [`DEFAULT_EDITOR`].
pub fn resolve_editor(configured: Option<&str>) -> String {
    std::env::var("EDITOR")
        .ok()
        .filter(|e| !e.trim().is_empty())
        .or_else(|| configured.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_EDITOR.to_string())
}

/// Loads `config.toml` from [`get_config_dir`].
pub fn load_config() -> AppConfig {
    let dir = get_config_dir();
    if let Err(e) = fs::create_dir_all(&dir) {
        log(&format!("config: cannot create {}: {}", dir.display(), e));
    }
    load_config_from(&dir.join("config.toml"))
}

/// Reads the config at `path`. A missing file is created with the defaults.
/// A file that does not parse is moved aside to `config.toml.bak` so the
/// next run starts clean. Either way the caller gets a usable config.
pub fn load_config_from(path: &Path) -> AppConfig {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let config = AppConfig::default();
            if let Err(e) = write_default(path, &config) {
                log(&format!("config: could not write {}: {}", path.display(), e));
            }
            return config;
        }
        Err(e) => {
            log(&format!("config: could not read {}: {}", path.display(), e));
            return AppConfig::default();
        }
    };

    parse_config(&content).unwrap_or_else(|e| {
        let backup = path.with_extension("toml.bak");
        let moved = fs::rename(path, &backup);
        log(&format!(
            "config: {} does not parse ({}); moved aside: {}",
            path.display(),
            e.message(),
            moved.is_ok()
        ));
        eprintln!(
            "enotes: ignoring unreadable {} (saved as {})",
            path.display(),
            backup.display()
        );
        AppConfig::default()
    })
}

fn write_default(path: &Path, config: &AppConfig) -> io::Result<()> {
    let text = toml::to_string_pretty(config)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path)?.write_all(text.as_bytes())
}

pub fn parse_config(content: &str) -> Result<AppConfig, toml::de::Error> {
    toml::from_str(content)
}
