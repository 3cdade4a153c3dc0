//! Drone配置

use std::env;
use std::path::Path;
use std::time::Duration;

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

pub const ENV_MASTER_ENDPOINT: &str = "LOCUST_MASTER_ENDPOINT";
pub const ENV_WORKER_ID: &str = "LOCUST_WORKER_ID";
pub const ENV_HEARTBEAT_MS: &str = "LOCUST_HEARTBEAT_MS";
pub const ENV_STATS_MS: &str = "LOCUST_STATS_MS";
pub const ENV_LOG_LEVEL: &str = "LOCUST_LOG_LEVEL";

/// Drone进程配置
///
/// JSON中的时间间隔以毫秒表示，与 `LOCUST_*_MS` 环境变量一致
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DroneConfig {
    /// master的ZMQ地址，例如 `tcp://127.0.0.1:5557`
    pub master_endpoint: String,
    /// worker标识，作为每条消息的node_id
    pub worker_id: String,
    #[serde(rename = "heartbeat_interval_ms", with = "millis")]
    pub heartbeat_interval: Duration,
    #[serde(rename = "stats_interval_ms", with = "millis")]
    pub stats_interval: Duration,
    /// 接收循环每次等待消息的时长，超时后处理定时任务
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    pub log_level: String,
}

/// `Duration` 与整数毫秒之间的serde转换
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl Default for DroneConfig {
    fn default() -> Self {
        Self {
            master_endpoint: "tcp://127.0.0.1:5557".to_string(),
            worker_id: default_worker_id(),
            heartbeat_interval: Duration::from_secs(1),
            stats_interval: Duration::from_secs(3),
            poll_interval: Duration::from_millis(100),
            log_level: "info".to_string(),
        }
    }
}

fn default_worker_id() -> String {
    let hostname = env::var("HOSTNAME")
        .or_else(|_| env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "drone".to_string());
    format!("{}_{}", hostname, uuid::Uuid::new_v4().simple())
}

impl DroneConfig {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn set_master_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.master_endpoint = endpoint.into();
        self
    }

    pub fn set_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn set_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn set_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    pub fn set_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn set_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// 默认值，再由 `LOCUST_*` 环境变量覆盖
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(endpoint) = env::var(ENV_MASTER_ENDPOINT) {
            config.master_endpoint = endpoint;
        }
        if let Ok(id) = env::var(ENV_WORKER_ID) {
            config.worker_id = id;
        }
        if let Some(interval) = env_millis(ENV_HEARTBEAT_MS)? {
            config.heartbeat_interval = interval;
        }
        if let Some(interval) = env_millis(ENV_STATS_MS)? {
            config.stats_interval = interval;
        }
        if let Ok(level) = env::var(ENV_LOG_LEVEL) {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.master_endpoint.trim().is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }
        if !self.master_endpoint.contains("://") {
            return Err(ConfigError::InvalidEndpoint(self.master_endpoint.clone()));
        }
        if self.worker_id.trim().is_empty() {
            return Err(ConfigError::EmptyWorkerId);
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("heartbeat"));
        }
        if self.stats_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("stats"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("poll"));
        }
        self.level_filter()?;
        Ok(())
    }

    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        self.log_level
            .parse::<LevelFilter>()
            .map_err(|_| ConfigError::InvalidValue {
                key: "log_level",
                value: self.log_level.clone(),
            })
    }

    /// 初始化env_logger；`RUST_LOG` 优先，重复调用无副作用
    pub fn init_logger(&self) {
        let mut builder = env_logger::Builder::new();
        builder
            .filter_level(self.level_filter().unwrap_or(LevelFilter::Info))
            .format_timestamp_millis();
        if let Ok(filters) = env::var("RUST_LOG") {
            builder.parse_filters(&filters);
        }
        let _ = builder.try_init();
    }
}

fn env_millis(key: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = DroneConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.worker_id.is_empty());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_validation_errors() {
        let config = DroneConfig::new().set_master_endpoint("");
        assert!(matches!(config.validate(), Err(ConfigError::MissingEndpoint)));

        let config = DroneConfig::new().set_master_endpoint("127.0.0.1:5557");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidEndpoint(_))));

        let config = DroneConfig::new().set_worker_id("  ");
        assert!(matches!(config.validate(), Err(ConfigError::EmptyWorkerId)));

        let config = DroneConfig::new().set_stats_interval(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroInterval("stats"))
        ));

        let config = DroneConfig::new().set_log_level("loud");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key: "log_level", .. })
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = DroneConfig::new()
            .set_worker_id("w1")
            .set_heartbeat_interval(Duration::from_millis(250));
        let json = serde_json::to_string(&config).unwrap();
        let parsed: DroneConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);

        let partial: DroneConfig =
            serde_json::from_str(r#"{"worker_id": "w2", "log_level": "debug"}"#).unwrap();
        assert_eq!(partial.worker_id, "w2");
        assert_eq!(partial.stats_interval, Duration::from_secs(3));
    }

    #[test]
    fn test_json_intervals_are_millis() {
        let config = DroneConfig::new()
            .set_worker_id("w1")
            .set_heartbeat_interval(Duration::from_millis(250));
        let json: serde_json::Value = serde_json::to_value(&config).unwrap();
        assert_eq!(json["heartbeat_interval_ms"], 250);
        assert_eq!(json["stats_interval_ms"], 3000);
        assert_eq!(json["poll_interval_ms"], 100);

        let parsed: DroneConfig = serde_json::from_str(
            r#"{"master_endpoint": "tcp://10.0.0.2:5557", "heartbeat_interval_ms": 500, "poll_interval_ms": 20}"#,
        )
        .unwrap();
        assert_eq!(parsed.master_endpoint, "tcp://10.0.0.2:5557");
        assert_eq!(parsed.heartbeat_interval, Duration::from_millis(500));
        assert_eq!(parsed.poll_interval, Duration::from_millis(20));
        assert_eq!(parsed.stats_interval, Duration::from_secs(3));
    }
}
