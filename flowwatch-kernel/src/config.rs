use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

pub const DEFAULT_FEED_PORT: u16 = 81;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub feed: FeedConf,
    pub fallback: FallbackConf,
    pub sensors: Vec<String>,
    pub http: HttpConf,
    pub logging: LoggingConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConf {
    pub host: String,
    pub port: u16,
    pub connect_timeout_secs: u64,
    /// None: stay on simulated data after the first failure or disconnect.
    pub reconnect_delay_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FallbackConf {
    pub interval_ms: u64,
    pub flow_probability: f64,
    pub max_flow: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConf {
    pub level: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            feed: FeedConf::default(),
            fallback: FallbackConf::default(),
            sensors: ["S001", "S002", "S003", "S004"].map(String::from).to_vec(),
            http: HttpConf::default(),
            logging: LoggingConf::default(),
        }
    }
}

impl Default for FeedConf {
    fn default() -> Self {
        Self {
            // ESP access-point address
            host: "192.168.4.1".into(),
            port: DEFAULT_FEED_PORT,
            connect_timeout_secs: 5,
            reconnect_delay_secs: None,
        }
    }
}

impl Default for FallbackConf {
    fn default() -> Self {
        Self { interval_ms: 2000, flow_probability: 0.5, max_flow: 20.0 }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

impl Default for LoggingConf {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

impl FeedConf {
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Option<Duration> {
        self.reconnect_delay_secs.map(Duration::from_secs)
    }
}

impl FallbackConf {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl KernelConfig {
    pub fn from_yaml(txt: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: KernelConfig = serde_yaml::from_str(txt)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let txt = fs::read_to_string(path).await?;
        Self::from_yaml(&txt)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sensors.is_empty() {
            return Err(ConfigError::Invalid("at least one sensor is required".into()));
        }
        let mut seen = HashSet::new();
        for id in &self.sensors {
            if id.trim().is_empty() {
                return Err(ConfigError::Invalid("sensor ids must not be empty".into()));
            }
            if !seen.insert(id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate sensor id {id}")));
            }
        }
        if self.feed.host.trim().is_empty() {
            return Err(ConfigError::Invalid("feed.host must not be empty".into()));
        }
        let f = &self.fallback;
        if !(0.0..=1.0).contains(&f.flow_probability) {
            return Err(ConfigError::Invalid("fallback.flow_probability must be within [0, 1]".into()));
        }
        if !(f.max_flow.is_finite() && f.max_flow > 0.0) {
            return Err(ConfigError::Invalid("fallback.max_flow must be positive".into()));
        }
        if f.interval_ms == 0 {
            return Err(ConfigError::Invalid("fallback.interval_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Reads the YAML named by `FLOWWATCH_CONFIG` (default `flowwatch.yaml`).
/// A missing or broken file is reported on stderr and replaced by defaults.
pub async fn load_config() -> KernelConfig {
    let path = std::env::var("FLOWWATCH_CONFIG").unwrap_or_else(|_| "flowwatch.yaml".into());
    if !Path::new(&path).exists() {
        eprintln!("[kernel] no {path}, using default config");
        return KernelConfig::default();
    }
    KernelConfig::from_file(&path).await.unwrap_or_else(|e| {
        eprintln!("[kernel] invalid {path}: {e}");
        KernelConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_hardware_setup() {
        let cfg = KernelConfig::default();
        assert_eq!(cfg.feed.port, 81);
        assert_eq!(cfg.feed.url(), "ws://192.168.4.1:81");
        assert_eq!(cfg.fallback.interval(), Duration::from_secs(2));
        assert_eq!(cfg.sensors.len(), 4);
        assert!(cfg.feed.reconnect_delay().is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let cfg = KernelConfig::from_yaml(
            "feed:\n  host: 10.0.0.7\nsensors: [A, B]\nfallback:\n  interval_ms: 500\n",
        )
        .unwrap();
        assert_eq!(cfg.feed.url(), "ws://10.0.0.7:81");
        assert_eq!(cfg.sensors, vec!["A", "B"]);
        assert_eq!(cfg.fallback.interval_ms, 500);
        assert_eq!(cfg.fallback.max_flow, 20.0);
        assert_eq!(cfg.http.bind, "0.0.0.0:8080");
    }

    #[test]
    fn empty_yaml_is_default() {
        let cfg = KernelConfig::from_yaml("  \n").unwrap();
        assert_eq!(cfg.sensors.len(), 4);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(KernelConfig::from_yaml("sensors: []"), Err(ConfigError::Invalid(_))));
        assert!(matches!(KernelConfig::from_yaml("sensors: [A, A]"), Err(ConfigError::Invalid(_))));
        assert!(matches!(
            KernelConfig::from_yaml("fallback:\n  flow_probability: 1.5"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            KernelConfig::from_yaml("fallback:\n  interval_ms: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(KernelConfig::from_yaml("feed: [1"), Err(ConfigError::Yaml(_))));
    }

    #[tokio::test]
    async fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowwatch.yaml");
        std::fs::write(&path, "feed:\n  port: 8181\n  reconnect_delay_secs: 3\n").unwrap();
        let cfg = KernelConfig::from_file(&path).await.unwrap();
        assert_eq!(cfg.feed.port, 8181);
        assert_eq!(cfg.feed.reconnect_delay(), Some(Duration::from_secs(3)));
    }
}
