//! Engine configuration loading: game constants and the starter topic list.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use rand::{rng, seq::IndexedRandom};
use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the client looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/word-relay.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "WORD_RELAY_CONFIG_PATH";

const DEFAULT_END_LENGTH: usize = 20;
const DEFAULT_PHASE_SECONDS: u64 = 10;
const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
const DEFAULT_MIN_REFRESH_INTERVAL_MS: u64 = 1_000;
const DEFAULT_ROLLBACK_PENALTY: i32 = 5;
const DEFAULT_TOPICS: [&str; 10] = [
    "今天天气",
    "我很开心",
    "学习编程",
    "春天来了",
    "吃饭睡觉",
    "工作学习",
    "朋友聚会",
    "看书写字",
    "运动健身",
    "旅行游玩",
];

/// Immutable engine configuration shared by every component of a client.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Sentence length, in characters, that ends the game.
    pub end_length: usize,
    /// Length of the evaluation window after each move.
    pub phase_duration: Duration,
    /// Interval of the forced polling refresh.
    pub poll_interval: Duration,
    /// Minimum spacing between two notification-driven refreshes.
    pub min_refresh_interval: Duration,
    /// Points deducted from the author of a rolled back move.
    pub rollback_penalty: i32,
    topics: Vec<String>,
}

impl EngineConfig {
    /// Load the configuration from disk, falling back to the built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        end_length = config.end_length,
                        topics = config.topics.len(),
                        "loaded engine configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Replace the starter topics; an empty list keeps the current one.
    pub fn with_topics(mut self, topics: Vec<String>) -> Self {
        let topics: Vec<String> = topics
            .into_iter()
            .map(|topic| topic.trim().to_string())
            .filter(|topic| !topic.is_empty())
            .collect();
        if !topics.is_empty() {
            self.topics = topics;
        }
        self
    }

    /// Starter sentences a game may open with.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Pick a starter sentence at random.
    pub fn random_topic(&self) -> String {
        self.topics.choose(&mut rng()).cloned().unwrap_or_default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            end_length: DEFAULT_END_LENGTH,
            phase_duration: Duration::from_secs(DEFAULT_PHASE_SECONDS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            min_refresh_interval: Duration::from_millis(DEFAULT_MIN_REFRESH_INTERVAL_MS),
            rollback_penalty: DEFAULT_ROLLBACK_PENALTY,
            topics: DEFAULT_TOPICS.iter().map(|topic| topic.to_string()).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    end_length: Option<usize>,
    phase_seconds: Option<u64>,
    poll_interval_ms: Option<u64>,
    min_refresh_interval_ms: Option<u64>,
    rollback_penalty: Option<i32>,
    topics: Vec<String>,
}

impl From<RawConfig> for EngineConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = Self::default();
        Self {
            end_length: value.end_length.filter(|len| *len > 0).unwrap_or(defaults.end_length),
            phase_duration: value
                .phase_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.phase_duration),
            poll_interval: value
                .poll_interval_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            min_refresh_interval: value
                .min_refresh_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_refresh_interval),
            rollback_penalty: value.rollback_penalty.unwrap_or(defaults.rollback_penalty),
            topics: defaults.topics,
        }
        .with_topics(value.topics)
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let raw: RawConfig =
            serde_json::from_str(r#"{ "end_length": 12, "topics": ["  ", "hello"] }"#).unwrap();
        let config = EngineConfig::from(raw);

        assert_eq!(config.end_length, 12);
        assert_eq!(config.phase_duration, Duration::from_secs(10));
        assert_eq!(config.rollback_penalty, 5);
        assert_eq!(config.topics(), ["hello".to_string()]);
        assert_eq!(config.random_topic(), "hello");
    }

    #[test]
    fn empty_topic_list_keeps_built_in_topics() {
        let config = EngineConfig::default().with_topics(Vec::new());
        assert_eq!(config.topics().len(), DEFAULT_TOPICS.len());
        assert!(DEFAULT_TOPICS.contains(&config.random_topic().as_str()));
    }
}
