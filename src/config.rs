#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_SITE_CONFIG: &str = "site.toml";
pub const DEFAULT_INDEX_PORT: u16 = 8080;
pub const DEFAULT_INDEX_HOST: &str = "127.0.0.1";
pub const DEFAULT_GRAPH_API: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_ACCOUNT_MARKER: &str = "onmicrosoft_com/Documents";
pub const DEFAULT_MAX_ITEMS: u32 = 200;

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub data_root: PathBuf,
    pub www_root: PathBuf,
    pub port: u16,
    pub host: String,
    pub site_config: PathBuf,
    pub graph_api: String,
    /// Bearer token for the drive API. Empty when none is configured.
    pub access_token: String,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub data_root: Option<PathBuf>,
    pub www_root: Option<PathBuf>,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub site_config: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_settings(&file_vars, env_var_string, overrides)
}

fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeSettings> {
    let data_root = overrides
        .data_root
        .or_else(|| lookup_value("INDEX_DATA_ROOT", file_vars, &env_lookup).map(PathBuf::from))
        .ok_or_else(|| anyhow!("INDEX_DATA_ROOT not set"))?;
    let www_root = overrides
        .www_root
        .or_else(|| lookup_value("WWW_ROOT", file_vars, &env_lookup).map(PathBuf::from))
        .ok_or_else(|| anyhow!("WWW_ROOT not set"))?;
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("INDEX_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_INDEX_PORT);
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_value("INDEX_HOST", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_INDEX_HOST.to_string());
    let site_config = overrides
        .site_config
        .or_else(|| lookup_value("SITE_CONFIG", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SITE_CONFIG));
    let graph_api = lookup_value("GRAPH_API", file_vars, &env_lookup)
        .map(|value| value.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_GRAPH_API.to_string());
    let access_token =
        lookup_value("DRIVE_ACCESS_TOKEN", file_vars, &env_lookup).unwrap_or_default();

    Ok(RuntimeSettings {
        data_root,
        www_root,
        port,
        host,
        site_config,
        graph_api,
        access_token,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_blank)
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned().and_then(non_blank))
}

/// Reads `KEY=value` lines, accepting an `export ` prefix, single or double
/// quotes and `#` comments. A missing file yields no variables.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, raw_value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        vars.insert(key.to_string(), unquote(raw_value.trim()).to_string());
    }
    Ok(vars)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|value| value.strip_suffix('"'))
        .or_else(|| {
            value
                .strip_prefix('\'')
                .and_then(|value| value.strip_suffix('\''))
        })
        .unwrap_or(value)
}

/// Deployment-specific description of the drives being indexed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub title: String,
    /// Public origin used in embed metadata, without trailing slash.
    pub base_url: String,
    /// Drive folder that acts as the index root.
    pub base_directory: String,
    pub drives_public: Vec<String>,
    /// Drives holding members-only recordings, hidden unless requested.
    pub drives_members: Vec<String>,
    pub max_items: u32,
    /// `webUrl` segment preceding drive-relative paths.
    pub account_marker: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: "Drive Index".to_string(),
            base_url: String::new(),
            base_directory: "/".to_string(),
            drives_public: Vec::new(),
            drives_members: Vec::new(),
            max_items: DEFAULT_MAX_ITEMS,
            account_marker: DEFAULT_ACCOUNT_MARKER.to_string(),
        }
    }
}

impl SiteConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw =
            fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Parsing {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        if config.base_directory.trim().is_empty() {
            config.base_directory = "/".to_string();
        }
        Ok(config)
    }

    pub fn is_members_drive(&self, drive_id: &str) -> bool {
        self.drives_members.iter().any(|id| id == drive_id)
    }

    /// Drives queried for a request: members drives first when included.
    pub fn drives(&self, include_members: bool) -> Vec<String> {
        let members = include_members
            .then_some(self.drives_members.as_slice())
            .unwrap_or_default();
        members
            .iter()
            .chain(self.drives_public.iter())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> RuntimeSettings {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_settings(&vars, |_| None, RuntimeOverrides::default()).unwrap()
    }

    #[test]
    fn reads_port_and_roots() {
        let settings =
            settings_from("INDEX_DATA_ROOT=\"/data\"\nWWW_ROOT=\"/www\"\nINDEX_PORT=\"4242\"\n");
        assert_eq!(settings.port, 4242);
        assert_eq!(settings.data_root, PathBuf::from("/data"));
        assert_eq!(settings.www_root, PathBuf::from("/www"));
    }

    #[test]
    fn defaults_optional_values() {
        let settings = settings_from("INDEX_DATA_ROOT=/d\nWWW_ROOT=/w\n");
        assert_eq!(settings.port, DEFAULT_INDEX_PORT);
        assert_eq!(settings.host, DEFAULT_INDEX_HOST);
        assert_eq!(settings.site_config, PathBuf::from(DEFAULT_SITE_CONFIG));
        assert_eq!(settings.graph_api, DEFAULT_GRAPH_API);
        assert!(settings.access_token.is_empty());
    }

    #[test]
    fn missing_data_root_is_an_error() {
        let vars = read_env_file(make_config("WWW_ROOT=/w\n").path()).unwrap();
        let err = build_runtime_settings(&vars, |_| None, RuntimeOverrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("INDEX_DATA_ROOT"));
    }

    #[test]
    fn invalid_port_defaults() {
        let settings = settings_from("INDEX_DATA_ROOT=/d\nWWW_ROOT=/w\nINDEX_PORT=nope\n");
        assert_eq!(settings.port, DEFAULT_INDEX_PORT);
    }

    #[test]
    fn env_wins_over_file_and_overrides_win_over_env() {
        let vars = read_env_file(
            make_config("INDEX_DATA_ROOT=/file\nWWW_ROOT=/www\nINDEX_HOST=file-host\n").path(),
        )
        .unwrap();
        let settings = build_runtime_settings(
            &vars,
            |key| match key {
                "INDEX_DATA_ROOT" => Some("/env".to_string()),
                "INDEX_HOST" => Some("env-host".to_string()),
                "DRIVE_ACCESS_TOKEN" => Some("token".to_string()),
                _ => None,
            },
            RuntimeOverrides {
                host: Some("cli-host".into()),
                ..RuntimeOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(settings.data_root, PathBuf::from("/env"));
        assert_eq!(settings.host, "cli-host");
        assert_eq!(settings.access_token, "token");
    }

    #[test]
    fn blank_host_override_is_ignored() {
        let vars = read_env_file(make_config("INDEX_DATA_ROOT=/d\nWWW_ROOT=/w\n").path()).unwrap();
        let settings = build_runtime_settings(
            &vars,
            |_| None,
            RuntimeOverrides {
                host: Some("   ".into()),
                ..RuntimeOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(settings.host, DEFAULT_INDEX_HOST);
    }

    #[test]
    fn graph_api_trailing_slash_is_trimmed() {
        let settings =
            settings_from("INDEX_DATA_ROOT=/d\nWWW_ROOT=/w\nGRAPH_API=http://localhost:9/v1/\n");
        assert_eq!(settings.graph_api, "http://localhost:9/v1");
    }

    #[test]
    fn env_file_handles_export_quotes_and_comments() {
        let cfg = make_config(
            r#"
            export INDEX_DATA_ROOT="/data"
            WWW_ROOT='/www'
            INDEX_HOST =  "0.0.0.0"
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("INDEX_DATA_ROOT").unwrap(), "/data");
        assert_eq!(vars.get("WWW_ROOT").unwrap(), "/www");
        assert_eq!(vars.get("INDEX_HOST").unwrap(), "0.0.0.0");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn missing_env_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_env_file(&dir.path().join("none.env")).unwrap().is_empty());
    }

    #[test]
    fn site_config_parses_toml() {
        let config = SiteConfig::from_toml(
            r#"
            title = "VOD Archive"
            base_url = "https://archive.example/"
            drives_public = ["pub-1", "pub-2"]
            drives_members = ["mem-1"]
            "#,
        )
        .unwrap();
        assert_eq!(config.title, "VOD Archive");
        assert_eq!(config.base_url, "https://archive.example");
        assert_eq!(config.base_directory, "/");
        assert_eq!(config.max_items, DEFAULT_MAX_ITEMS);
        assert!(config.is_members_drive("mem-1"));
        assert!(!config.is_members_drive("pub-1"));
        assert_eq!(config.drives(false), vec!["pub-1", "pub-2"]);
        assert_eq!(config.drives(true), vec!["mem-1", "pub-1", "pub-2"]);
    }

    #[test]
    fn site_config_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SiteConfig::load(&dir.path().join("site.toml")).unwrap();
        assert_eq!(config.account_marker, DEFAULT_ACCOUNT_MARKER);
        assert!(config.drives(true).is_empty());
    }

    #[test]
    fn site_config_rejects_malformed_files() {
        let cfg = make_config("drives_public = \"not a list\"");
        assert!(SiteConfig::load(cfg.path()).is_err());
    }
}
