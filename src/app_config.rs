//! Application configuration loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use webarchiver::ArchiverConfig;

/// Key/value file configuration for archiver defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Network fetches allowed to run at once.
    pub max_concurrent_fetches: Option<usize>,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: Option<u64>,
    /// User-Agent override.
    pub user_agent: Option<String>,
    /// Default verbosity mode.
    pub verbosity: Option<VerbositySetting>,
    /// Database pool max connections.
    pub db_max_connections: Option<u32>,
    /// Database busy timeout in milliseconds.
    pub db_busy_timeout_ms: Option<u32>,
}

impl FileConfig {
    /// Overlays the values present in the file onto `config`.
    pub fn apply_to(&self, config: &mut ArchiverConfig) {
        if let Some(value) = self.max_concurrent_fetches {
            config.max_concurrent_fetches = value;
        }
        if let Some(value) = self.connect_timeout_secs {
            config.connect_timeout_secs = value;
        }
        if let Some(value) = self.read_timeout_secs {
            config.read_timeout_secs = value;
        }
        if let Some(value) = &self.user_agent {
            config.user_agent = Some(value.clone());
        }
        if let Some(value) = self.db_max_connections {
            config.db.max_connections = value;
        }
        if let Some(value) = self.db_busy_timeout_ms {
            config.db.busy_timeout_ms = value;
        }
    }
}

/// Verbosity default from the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Log filter directive for this setting.
    #[must_use]
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose | Self::Debug => "debug",
            Self::Quiet => "error",
        }
    }
}

/// Config file lookup result.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/webarchiver/config.toml`
/// 2. `$HOME/.config/webarchiver/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("webarchiver")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("webarchiver")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from the default path if present.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path_ref) if path_ref.exists() => Some(load_file_config(path_ref)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
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

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!(
                "Invalid config syntax on line {}: expected key = value",
                line_index + 1
            );
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {}", line_index + 1);

        match key {
            "max_concurrent_fetches" => {
                let parsed = parse_integer_u64(value).with_context(context)?;
                cfg.max_concurrent_fetches =
                    Some(usize::try_from(parsed).with_context(context)?);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "read_timeout_secs" => {
                cfg.read_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "user_agent" => {
                cfg.user_agent = Some(parse_string_literal(value).with_context(context)?);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(context)?);
            }
            "db_max_connections" => {
                let parsed = parse_integer_u64(value).with_context(context)?;
                cfg.db_max_connections = Some(u32::try_from(parsed).with_context(context)?);
            }
            "db_busy_timeout_ms" => {
                let parsed = parse_integer_u64(value).with_context(context)?;
                cfg.db_busy_timeout_ms = Some(u32::try_from(parsed).with_context(context)?);
            }
            _ => bail!("Unknown config key `{key}` on line {}", line_index + 1),
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

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str("max_concurrent_fetches = 8\nverbosity = \"quiet\"\n").unwrap();
        assert_eq!(cfg.max_concurrent_fetches, Some(8));
        assert_eq!(cfg.verbosity, Some(VerbositySetting::Quiet));
        assert_eq!(cfg.read_timeout_secs, None);
    }

    #[test]
    fn test_parse_config_supports_inline_comments() {
        let cfg = parse_config_str(
            "# archiver defaults\nuser_agent = \"bot #1\" # trailing\nconnect_timeout_secs = 10 # seconds\n",
        )
        .unwrap();
        assert_eq!(cfg.user_agent.as_deref(), Some("bot #1"));
        assert_eq!(cfg.connect_timeout_secs, Some(10));
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys() {
        let err = parse_config_str("concurrency = 4").unwrap_err();
        assert!(err.to_string().contains("Unknown config key"));
    }

    #[test]
    fn test_parse_config_rejects_negative_numbers() {
        let err = parse_config_str("read_timeout_secs = -1").unwrap_err();
        assert!(err.to_string().contains("read_timeout_secs"));
    }

    #[test]
    fn test_parse_config_rejects_missing_equals() {
        let err = parse_config_str("verbosity \"quiet\"").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_parse_config_db_options() {
        let cfg =
            parse_config_str("db_max_connections = 3\ndb_busy_timeout_ms = 2500\n").unwrap();
        let mut config = ArchiverConfig::default();
        cfg.apply_to(&mut config);
        assert_eq!(config.db.max_connections, 3);
        assert_eq!(config.db.busy_timeout_ms, 2500);
    }

    #[test]
    fn test_apply_keeps_unset_values() {
        let mut config = ArchiverConfig::default();
        FileConfig::default().apply_to(&mut config);
        assert_eq!(config, ArchiverConfig::default());
    }

    #[test]
    fn test_verbosity_filters() {
        assert_eq!(VerbositySetting::Default.as_filter(), "info");
        assert_eq!(VerbositySetting::Quiet.as_filter(), "error");
        assert_eq!(VerbositySetting::Debug.as_filter(), "debug");
    }
}
