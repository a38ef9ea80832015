//! Persistent settings
//!
//! `dnfstage.conf` is an INI file with a single `[dnfstage]` section. A
//! missing file gives the defaults; unknown keys are ignored and values that
//! do not parse fall back to their default with a warning. The update
//! checker keeps its last run in a separate one-line timestamp file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use ini::Ini;

use crate::error::{Error, Result};

const SECTION: &str = "dnfstage";
const APP_DIR: &str = "dnfstage";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub win_width: u32,
    pub win_height: u32,
    pub win_maximized: bool,
    pub theme: String,
    /// `prefix`, `keyword` or `fields`
    pub search_default: String,
    pub search_fields: Vec<String>,
    /// Apply `repo_enabled` at session start
    pub repo_saved: bool,
    pub repo_enabled: Vec<String>,
    /// Hours between metadata refreshes
    pub refresh_interval: u32,
    /// Unix seconds of the last metadata refresh
    pub last_refresh: i64,
    /// Package names that may not be removed, on top of the built-in ones
    pub protected: Vec<String>,
    pub clean_unused: bool,
    pub always_yes: bool,
    /// Minutes between update checks
    pub update_interval: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            win_width: 1200,
            win_height: 700,
            win_maximized: false,
            theme: String::from("default"),
            search_default: String::from("prefix"),
            search_fields: vec![String::from("name"), String::from("summary")],
            repo_saved: false,
            repo_enabled: Vec::new(),
            refresh_interval: 12,
            last_refresh: 0,
            protected: Vec::new(),
            clean_unused: false,
            always_yes: false,
            update_interval: 360,
        }
    }
}

/// `$XDG_CONFIG_HOME/dnfstage`
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR))
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("dnfstage.conf"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Ok(Self::from_ini(&ini))
    }

    fn from_ini(ini: &Ini) -> Self {
        let mut config = Self::default();
        let Some(section) = ini.section(Some(SECTION)) else {
            return config;
        };

        for (key, value) in section {
            let value = value.trim();
            let ok = match key {
                "win_width" => parse_into(value, &mut config.win_width),
                "win_height" => parse_into(value, &mut config.win_height),
                "win_maximized" => parse_bool(value, &mut config.win_maximized),
                "theme" => {
                    config.theme = value.to_string();
                    true
                }
                "search_default" => match value {
                    "prefix" | "keyword" | "fields" => {
                        config.search_default = value.to_string();
                        true
                    }
                    _ => false,
                },
                "search_fields" => {
                    config.search_fields = split_list(value);
                    true
                }
                "repo_saved" => parse_bool(value, &mut config.repo_saved),
                "repo_enabled" => {
                    config.repo_enabled = split_list(value);
                    true
                }
                "refresh_interval" => parse_into(value, &mut config.refresh_interval),
                "last_refresh" => parse_into(value, &mut config.last_refresh),
                "protected" => {
                    config.protected = split_list(value);
                    true
                }
                "clean_unused" => parse_bool(value, &mut config.clean_unused),
                "always_yes" => parse_bool(value, &mut config.always_yes),
                "update_interval" => parse_into(value, &mut config.update_interval),
                _ => true,
            };
            if !ok {
                log::warn!("config: ignoring bad value {value:?} for {key}");
            }
        }
        config
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut ini = Ini::new();
        ini.with_section(Some(SECTION))
            .set("win_width", self.win_width.to_string())
            .set("win_height", self.win_height.to_string())
            .set("win_maximized", self.win_maximized.to_string())
            .set("theme", self.theme.as_str())
            .set("search_default", self.search_default.as_str())
            .set("search_fields", self.search_fields.join(","))
            .set("repo_saved", self.repo_saved.to_string())
            .set("repo_enabled", self.repo_enabled.join(","))
            .set("refresh_interval", self.refresh_interval.to_string())
            .set("last_refresh", self.last_refresh.to_string())
            .set("protected", self.protected.join(","))
            .set("clean_unused", self.clean_unused.to_string())
            .set("always_yes", self.always_yes.to_string())
            .set("update_interval", self.update_interval.to_string());
        ini.write_to_file(path)?;
        Ok(())
    }

    /// True when the refresh interval has elapsed since `last_refresh`.
    /// An interval of 0 disables automatic refreshes.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        if self.refresh_interval == 0 {
            return false;
        }
        let Some(last) = DateTime::from_timestamp(self.last_refresh, 0) else {
            return true;
        };
        now - last >= Duration::hours(i64::from(self.refresh_interval))
    }

    pub fn mark_refreshed(&mut self, now: DateTime<Utc>) {
        self.last_refresh = now.timestamp();
    }
}

fn parse_into<T: std::str::FromStr>(value: &str, slot: &mut T) -> bool {
    match value.parse() {
        Ok(parsed) => {
            *slot = parsed;
            true
        }
        Err(_) => false,
    }
}

fn parse_bool(value: &str, slot: &mut bool) -> bool {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => *slot = true,
        "0" | "false" | "no" | "off" => *slot = false,
        _ => return false,
    }
    true
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// ============================================================================
// Update checker timestamp
// ============================================================================

/// One-line unix timestamp of the last update check
pub struct UpdateStamp {
    path: PathBuf,
}

impl UpdateStamp {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("update_check"))
    }

    /// `None` when the file is missing or unreadable
    pub fn read(&self) -> Option<DateTime<Utc>> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        let secs = text.trim().parse::<i64>().ok()?;
        DateTime::from_timestamp(secs, 0)
    }

    pub fn write(&self, now: DateTime<Utc>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.path, format!("{}\n", now.timestamp()))?;
        Ok(())
    }

    /// True when no check is recorded or `interval_minutes` have passed
    pub fn is_due(&self, interval_minutes: u32, now: DateTime<Utc>) -> bool {
        self.read()
            .is_none_or(|last| now - last >= Duration::minutes(i64::from(interval_minutes)))
    }
}
