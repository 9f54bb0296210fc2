//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This module contains the `parse_ini()` function and its helpers.
//! It is the single place where INI key names are mapped to struct fields.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use super::file::ConfigFileError;
use super::settings::ConfigFile;
use super::size::parse_size;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [pipeline] section
    if let Some(section) = ini.section(Some("pipeline")) {
        let s = Section::new("pipeline", section);
        if let Some(v) = section.get("coalescing") {
            config.pipeline.coalescing = parse_bool(v);
        }
        if let Some(v) = section.get("progressive_decoding") {
            config.pipeline.progressive_decoding = parse_bool(v);
        }
        if let Some(v) = s.positive("data_loading_concurrency")? {
            config.pipeline.data_loading_concurrency = v;
        }
        if let Some(v) = s.positive("decoding_concurrency")? {
            config.pipeline.decoding_concurrency = v;
        }
        if let Some(v) = s.positive("processing_concurrency")? {
            config.pipeline.processing_concurrency = v;
        }
        if let Some(v) = s.parsed(
            "default_priority",
            "must be one of: very_low, low, normal, high, very_high",
        )? {
            config.pipeline.default_priority = v;
        }
    }

    // [rate_limiter] section
    if let Some(section) = ini.section(Some("rate_limiter")) {
        let s = Section::new("rate_limiter", section);
        if let Some(v) = section.get("enabled") {
            config.rate_limiter.enabled = parse_bool(v);
        }
        if let Some(v) = s.parsed::<f64>("rate", "must be a positive number (tokens per second)")? {
            if !(v.is_finite() && v > 0.0) {
                return Err(s.invalid("rate", "must be a positive number (tokens per second)"));
            }
            config.rate_limiter.rate = v;
        }
        if let Some(v) = s.parsed::<u32>("burst", "must be a positive integer")? {
            if v == 0 {
                return Err(s.invalid("burst", "must be a positive integer"));
            }
            config.rate_limiter.burst = v;
        }
    }

    // [cache] section
    if let Some(section) = ini.section(Some("cache")) {
        let s = Section::new("cache", section);
        if let Some(v) = section.get("memory_enabled") {
            config.cache.memory_enabled = parse_bool(v);
        }
        if let Some(v) = s.size("memory_size")? {
            config.cache.memory_size = v;
        }
        if let Some(v) = section.get("disk_enabled") {
            config.cache.disk_enabled = parse_bool(v);
        }
        if let Some(v) = s.size("disk_size")? {
            config.cache.disk_size = v;
        }
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.cache.directory = expand_tilde(v);
            }
        }
    }

    // [network] section
    if let Some(section) = ini.section(Some("network")) {
        let s = Section::new("network", section);
        if let Some(v) = s.seconds("timeout")? {
            config.network.timeout = v;
        }
        if let Some(v) = s.seconds("connect_timeout")? {
            config.network.connect_timeout = v;
        }
        if let Some(v) = section.get("user_agent") {
            let v = v.trim();
            if !v.is_empty() {
                config.network.user_agent = v.to_string();
            }
        }
        if let Some(v) = section.get("resumable_data") {
            config.network.resumable_data = parse_bool(v);
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = v.to_string();
            }
        }
    }

    Ok(config)
}

/// One INI section plus its name, for error reporting.
struct Section<'a> {
    name: &'static str,
    properties: &'a Properties,
}

impl<'a> Section<'a> {
    fn new(name: &'static str, properties: &'a Properties) -> Self {
        Self { name, properties }
    }

    fn invalid(&self, key: &str, reason: &str) -> ConfigFileError {
        ConfigFileError::InvalidValue {
            section: self.name.to_string(),
            key: key.to_string(),
            value: self.properties.get(key).unwrap_or_default().to_string(),
            reason: reason.to_string(),
        }
    }

    fn parsed<T: FromStr>(&self, key: &str, reason: &str) -> Result<Option<T>, ConfigFileError> {
        match self.properties.get(key) {
            None => Ok(None),
            Some(v) => v
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| self.invalid(key, reason)),
        }
    }

    fn positive(&self, key: &str) -> Result<Option<usize>, ConfigFileError> {
        const REASON: &str = "must be a positive integer";
        match self.parsed::<usize>(key, REASON)? {
            Some(0) => Err(self.invalid(key, REASON)),
            v => Ok(v),
        }
    }

    fn seconds(&self, key: &str) -> Result<Option<Duration>, ConfigFileError> {
        const REASON: &str = "must be a positive integer (seconds)";
        match self.parsed::<u64>(key, REASON)? {
            Some(0) => Err(self.invalid(key, REASON)),
            v => Ok(v.map(Duration::from_secs)),
        }
    }

    fn size(&self, key: &str) -> Result<Option<usize>, ConfigFileError> {
        match self.properties.get(key) {
            None => Ok(None),
            Some(v) => parse_size(v)
                .map(Some)
                .map_err(|_| self.invalid(key, "expected format like '2GB', '500MB', or '1024KB'")),
        }
    }
}

/// Parse a boolean value from a config string.
/// Accepts: true/false, yes/no, 1/0, on/off (case-insensitive)
pub(super) fn parse_bool(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    v == "true" || v == "1" || v == "yes" || v == "on"
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
