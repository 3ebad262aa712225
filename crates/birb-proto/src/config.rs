use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub streamlink: StreamlinkConfig,
    #[serde(default)]
    pub streamserver: StreamServerConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Resolver settings shared by the health probes and the proxy launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamlinkConfig {
    #[serde(default = "default_streamlink_binary")]
    pub binary: PathBuf,
    /// Ordered quality preference.  Accepts a TOML array or a
    /// newline-delimited string.
    #[serde(default = "default_quality", deserialize_with = "string_list")]
    pub quality: Vec<String>,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Substring of the proxy's output that confirms it is listening.
    /// Empty means `127.0.0.1:<port>`.
    #[serde(default)]
    pub ready_marker: String,
    /// Grace period between the terminate request and a forced kill.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    /// Stream list sources, tried in order.  `http(s)://` URLs, `file://`
    /// paths or bare paths.
    #[serde(default = "default_stream_db_source", deserialize_with = "string_list")]
    pub stream_db_source: Vec<String>,
    #[serde(default = "default_true")]
    pub refresh_on_start: bool,
    #[serde(default)]
    pub show_statusbar_streaming: bool,
    #[serde(default = "default_validate_concurrency")]
    pub validate_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by RUST_LOG.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
}

impl Default for StreamlinkConfig {
    fn default() -> Self {
        Self {
            binary: default_streamlink_binary(),
            quality: default_quality(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl Default for StreamServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            ready_marker: String::new(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl StreamServerConfig {
    pub fn ready_marker(&self) -> String {
        if self.ready_marker.trim().is_empty() {
            format!("{}:{}", platform::LOOPBACK_HOST, self.port)
        } else {
            self.ready_marker.clone()
        }
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            stream_db_source: default_stream_db_source(),
            refresh_on_start: true,
            show_statusbar_streaming: false,
            validate_concurrency: default_validate_concurrency(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            file: default_log_file(),
        }
    }
}

fn default_streamlink_binary() -> PathBuf {
    platform::find_streamlink_binary().unwrap_or_else(|| PathBuf::from("streamlink"))
}

fn default_quality() -> Vec<String> {
    ["360p", "240p", "480p", "worst"]
        .iter()
        .map(|q| q.to_string())
        .collect()
}

fn default_probe_timeout_secs() -> u64 {
    20
}

fn default_port() -> u16 {
    6969
}

fn default_stop_timeout_secs() -> u64 {
    3
}

fn default_stream_db_source() -> Vec<String> {
    vec![
        "https://raw.githubusercontent.com/ninivert/birbwatch/main/streams.json".to_string(),
        "file://streams.json".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

fn default_validate_concurrency() -> usize {
    4
}

fn default_log_filter() -> String {
    "info,birb_core=debug".to_string()
}

fn default_log_file() -> PathBuf {
    platform::data_dir().join("birbwatch.log")
}

/// Either a list of strings or one newline-delimited string.
fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Lines(String),
    }

    let items = match Raw::deserialize(deserializer)? {
        Raw::List(list) => list,
        Raw::Lines(text) => text.lines().map(str::to_string).collect(),
    };
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`, writing the defaults there first if it is missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// Comma-joined quality preference, as the proxy expects it.
    pub fn quality_arg(&self) -> String {
        self.streamlink.quality.join(",")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            streamlink: StreamlinkConfig::default(),
            streamserver: StreamServerConfig::default(),
            behavior: BehaviorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.streamserver.port, 6969);
        assert_eq!(config.streamserver.ready_marker(), "127.0.0.1:6969");
        assert_eq!(config.quality_arg(), "360p,240p,480p,worst");
        assert!(config.behavior.refresh_on_start);
        assert!(!config.behavior.show_statusbar_streaming);
        assert!(config.behavior.stream_db_source[0].starts_with("https://"));
    }

    #[test]
    fn test_quality_accepts_newline_delimited_string() {
        let config: Config = toml::from_str(
            r#"
            [streamlink]
            quality = """
            720p
            480p

            worst
            """
            "#,
        )
        .unwrap();
        assert_eq!(config.streamlink.quality, vec!["720p", "480p", "worst"]);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [streamserver]
            port = 7070
            ready_marker = "Starting server"

            [behavior]
            stream_db_source = ["file:///tmp/streams.json"]
            validate_concurrency = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.streamserver.port, 7070);
        assert_eq!(config.streamserver.ready_marker(), "Starting server");
        assert_eq!(config.behavior.stream_db_source, vec!["file:///tmp/streams.json"]);
        assert_eq!(config.behavior.validate_concurrency, 1);
        assert_eq!(config.streamlink.quality.len(), 4);
    }

    #[test]
    fn test_load_from_missing_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.streamlink.quality, config.streamlink.quality);
        assert_eq!(reloaded.streamserver.port, config.streamserver.port);
    }
}
