//! Configuration file loading for the CLI.
//!
//! The file is a flat `key = value` list in TOML syntax. Values from the
//! file override built-in defaults; command-line flags override the file.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use waiting_room::config::{SecurityMode, Settings};

/// Environment variable carrying the edge purge credential.
pub const PURGE_TOKEN_ENV: &str = "WAITING_ROOM_PURGE_TOKEN";

/// Settings read from the configuration file. Unset keys keep defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub database_path: Option<PathBuf>,
    pub security_mode: Option<SecurityMode>,
    pub cache_ttl_secs: Option<u64>,
    pub browser_max_age_secs: Option<u64>,
    pub edge_max_age_secs: Option<u64>,
    pub token_ttl_secs: Option<u64>,
    pub permission_ttl_secs: Option<u64>,
    pub purge_endpoint: Option<String>,
    pub purge_api_token: Option<String>,
    pub purge_timeout_secs: Option<u64>,
    pub drain_interval_secs: Option<u64>,
    pub drain_batch_size: Option<u32>,
}

impl FileConfig {
    /// Overlays the values present in this file onto `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(base_url) = &self.base_url {
            settings.base_url.clone_from(base_url);
        }
        if let Some(path) = &self.database_path {
            settings.database_path.clone_from(path);
        }
        if let Some(mode) = self.security_mode {
            settings.security_mode = mode;
        }
        if let Some(secs) = self.cache_ttl_secs {
            settings.cache_ttl_secs = secs;
        }
        if let Some(secs) = self.browser_max_age_secs {
            settings.browser_max_age_secs = secs;
        }
        if let Some(secs) = self.edge_max_age_secs {
            settings.edge_max_age_secs = secs;
        }
        if let Some(secs) = self.token_ttl_secs {
            settings.token_ttl_secs = secs;
        }
        if let Some(secs) = self.permission_ttl_secs {
            settings.permission_ttl_secs = secs;
        }
        if let Some(endpoint) = &self.purge_endpoint {
            settings.purge_endpoint = Some(endpoint.clone());
        }
        if let Some(token) = &self.purge_api_token {
            settings.purge_api_token = Some(token.clone());
        }
        if let Some(secs) = self.purge_timeout_secs {
            settings.purge_timeout_secs = secs;
        }
        if let Some(secs) = self.drain_interval_secs {
            settings.drain_interval_secs = secs;
        }
        if let Some(size) = self.drain_batch_size {
            settings.drain_batch_size = size;
        }
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/waiting-room/config.toml`
/// 2. `$HOME/.config/waiting-room/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("waiting-room")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("waiting-room")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file.
///
/// An explicit path must exist; the default path is optional.
pub fn load_file_config(explicit: Option<&Path>) -> Result<Option<FileConfig>> {
    if let Some(path) = explicit {
        return read_file_config(path).map(Some);
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => read_file_config(&path).map(Some),
        _ => Ok(None),
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let line_no = line_index + 1;
        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "base_url" => cfg.base_url = Some(parse_string_literal(value).with_context(invalid)?),
            "database_path" => {
                cfg.database_path =
                    Some(PathBuf::from(parse_string_literal(value).with_context(invalid)?));
            }
            "security_mode" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.security_mode = Some(parsed.parse::<SecurityMode>().with_context(invalid)?);
            }
            "cache_ttl_secs" => cfg.cache_ttl_secs = Some(parse_integer_u64(value).with_context(invalid)?),
            "browser_max_age_secs" => {
                cfg.browser_max_age_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "edge_max_age_secs" => {
                cfg.edge_max_age_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "token_ttl_secs" => cfg.token_ttl_secs = Some(parse_integer_u64(value).with_context(invalid)?),
            "permission_ttl_secs" => {
                cfg.permission_ttl_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "purge_endpoint" => {
                cfg.purge_endpoint = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "purge_api_token" => {
                cfg.purge_api_token = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "purge_timeout_secs" => {
                cfg.purge_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "drain_interval_secs" => {
                cfg.drain_interval_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "drain_batch_size" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                let size = u32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("drain_batch_size out of range for u32"))?;
                cfg.drain_batch_size = Some(size);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}
