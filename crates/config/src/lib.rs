use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Default location of the settings file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/citevault.toml";

/// Stub folder used when none is configured (or the configured one is blank).
pub const DEFAULT_STUB_FOLDER: &str = "Zotero Library";

// ── Vault ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Root directory of the vault.  Relative export paths resolve against it.
    /// Overridden at runtime by `CITEVAULT_VAULT_PATH` when set.
    pub path: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            path: ".".to_string(),
        }
    }
}

// ── Sync ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Better BibTeX auto-export (Better CSL JSON).  Absolute, or relative to
    /// the vault root.  Empty means "not configured".
    pub export_file_path: String,
    /// Folder inside the vault holding one note per library item.
    pub stub_folder: String,
    /// Watch the export file and sync automatically when it changes.
    pub auto_sync: bool,
    /// Leading-edge debounce window for export change events.
    pub debounce_ms: u64,
    /// Note operations applied per batch before yielding.
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_delay_ms: u64,
    /// Delay before the watcher restarts after an OS watch error.
    pub restart_delay_ms: u64,
    /// Vault-relative folder that deleted notes are moved into.
    pub trash_folder: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            export_file_path: String::new(),
            stub_folder: DEFAULT_STUB_FOLDER.to_string(),
            auto_sync: true,
            debounce_ms: 500,
            batch_size: 50,
            batch_delay_ms: 50,
            restart_delay_ms: 5_000,
            trash_folder: ".trash".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// The stub folder with surrounding whitespace removed, falling back to
    /// [`DEFAULT_STUB_FOLDER`] when blank.
    pub fn effective_stub_folder(&self) -> String {
        let trimmed = self.stub_folder.trim();
        if trimmed.is_empty() {
            DEFAULT_STUB_FOLDER.to_string()
        } else {
            trimmed.to_string()
        }
    }

    pub fn has_export_path(&self) -> bool {
        !self.export_file_path.trim().is_empty()
    }
}

// ── Telemetry ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Used as the tracing filter when `RUST_LOG` is not set.
    pub log_level: String,
    /// When non-empty, `citevault watch` also writes a daily-rolling log file
    /// into this directory.
    pub log_dir: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub vault: VaultConfig,
    pub sync: SyncConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// The file at `path` with environment overrides applied.  A missing
    /// file yields the defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_env_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    /// The file alone, for editing and writing back.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Apply `CITEVAULT_*` overrides.  `lookup` is `std::env::var` in
    /// production and a closure in tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("CITEVAULT_VAULT_PATH") {
            if !value.is_empty() {
                self.vault.path = value;
            }
        }

        if let Some(value) = lookup("CITEVAULT_EXPORT_PATH") {
            if !value.is_empty() {
                self.sync.export_file_path = value;
            }
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn vault_root(&self) -> PathBuf {
        PathBuf::from(&self.vault.path)
    }

    /// Set a single setting from its dotted name, as used by
    /// `citevault config set`.  Values are trimmed; a blank stub folder falls
    /// back to the default.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "vault.path" => self.vault.path = value.to_string(),
            "sync.export_file_path" => self.sync.export_file_path = value.to_string(),
            "sync.stub_folder" => {
                self.sync.stub_folder = if value.is_empty() {
                    DEFAULT_STUB_FOLDER.to_string()
                } else {
                    value.to_string()
                };
            }
            "sync.auto_sync" => self.sync.auto_sync = parse_bool(key, value)?,
            "sync.debounce_ms" => self.sync.debounce_ms = parse_number(key, value)?,
            "sync.batch_size" => {
                let size: usize = parse_number(key, value)?;
                if size == 0 {
                    bail!("sync.batch_size must be at least 1");
                }
                self.sync.batch_size = size;
            }
            "sync.batch_delay_ms" => self.sync.batch_delay_ms = parse_number(key, value)?,
            "sync.restart_delay_ms" => self.sync.restart_delay_ms = parse_number(key, value)?,
            "sync.trash_folder" => self.sync.trash_folder = value.to_string(),
            "telemetry.log_level" => self.telemetry.log_level = value.to_string(),
            "telemetry.log_dir" => self.telemetry.log_dir = value.to_string(),
            _ => bail!("unknown setting: {key}"),
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => bail!("{key} expects a boolean, got {value:?}"),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    match value.parse() {
        Ok(parsed) => Ok(parsed),
        Err(_) => bail!("{key} expects a non-negative integer, got {value:?}"),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
