//! Configuration module - environment variable parsing

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Client configuration loaded from environment variables
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Server protocol features
    pub protocol: ProtocolProfile,
    /// Speculative step look-ahead
    pub prediction: PredictionConfig,
    /// Auto-walk retry policy
    pub auto_walk: AutoWalkConfig,
    /// Path search tuning
    pub search: SearchLimits,
}

/// Protocol version and feature flags negotiated with the server
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ProtocolProfile {
    pub client_version: u16,
    /// Server tick interval in milliseconds
    pub server_beat_ms: u32,
    /// Multiple unconfirmed steps and long auto-walk routes
    pub new_walking: bool,
    /// Doubled base speed and optional logarithmic speed formula
    pub new_speed_law: bool,
    /// Larger slack on locally initiated steps
    pub slower_manual_walking: bool,
    /// Deeper prediction queue
    pub extended_prediction: bool,
    /// Keep facing after a server cancel
    pub ignore_server_direction: bool,
}

impl ProtocolProfile {
    /// Longest route the server accepts in one auto-walk request
    pub fn max_route_len(&self) -> usize {
        if self.new_walking {
            4095
        } else {
            127
        }
    }

    /// Step duration multiplier after a diagonal step
    pub fn diagonal_factor(&self) -> u32 {
        if self.client_version <= 810 {
            2
        } else {
            3
        }
    }

    /// Whether step durations are rounded up to the server beat
    pub fn rounds_to_beat(&self) -> bool {
        self.client_version >= 900
    }

    /// Slack added to locally initiated steps
    pub fn manual_step_slack_ms(&self) -> u32 {
        if self.slower_manual_walking {
            25
        } else {
            5
        }
    }
}

impl Default for ProtocolProfile {
    fn default() -> Self {
        Self {
            client_version: 1100,
            server_beat_ms: 50,
            new_walking: true,
            new_speed_law: false,
            slower_manual_walking: false,
            extended_prediction: false,
            ignore_server_direction: false,
        }
    }
}

/// Bounds on speculative walking
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Outstanding unconfirmed steps allowed
    pub max_prewalk_steps: usize,
    /// Limit used when the extended prediction feature is on
    pub extended_prewalk_steps: usize,
    /// A full queue accepts one more step once the last step ended this long ago
    pub stall_escape_ms: u32,
}

impl PredictionConfig {
    pub fn step_limit(&self, protocol: &ProtocolProfile) -> usize {
        if protocol.extended_prediction {
            self.extended_prewalk_steps
        } else {
            self.max_prewalk_steps
        }
    }
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            max_prewalk_steps: 1,
            extended_prewalk_steps: 3,
            stall_escape_ms: 300,
        }
    }
}

/// Retry policy for auto-walk
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AutoWalkConfig {
    pub max_retries: u32,
    /// Delay before retry n is `retry_delays_ms[n - 1]`; the last entry repeats
    pub retry_delays_ms: Vec<u64>,
}

impl AutoWalkConfig {
    /// Delay before the given 1-based retry attempt
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let idx = (attempt.max(1) - 1) as usize;
        let ms = self
            .retry_delays_ms
            .get(idx)
            .or_else(|| self.retry_delays_ms.last())
            .copied()
            .unwrap_or(200);
        Duration::from_millis(ms)
    }
}

impl Default for AutoWalkConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delays_ms: vec![200, 300, 400],
        }
    }
}

/// Path search constants
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SearchLimits {
    /// Maximum queue pops per search
    pub iteration_budget: u32,
    /// Nodes with more consecutive unseen cells are not expanded
    pub uncertainty_cap: u32,
    /// Traversal cost assigned to never-observed tiles
    pub unseen_cost: f32,
    pub heuristic_weight: f32,
    /// Lower bound of the distance term in the heuristic
    pub heuristic_floor: f32,
    /// Cost multiplier of a true diagonal move
    pub diagonal_multiplier: f32,
    /// A neighbour is re-parented only when the new cost beats the old by this much
    pub relax_margin: f32,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            iteration_budget: 50_000,
            uncertainty_cap: 50,
            unseen_cost: 2000.0,
            heuristic_weight: 50.0,
            heuristic_floor: 5.0,
            diagonal_multiplier: 3.0,
            relax_margin: 50.0,
        }
    }
}

impl Config {
    /// Load configuration from environment variables; unset values keep their defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let protocol_defaults = ProtocolProfile::default();
        let prediction_defaults = PredictionConfig::default();
        let auto_walk_defaults = AutoWalkConfig::default();
        let search_defaults = SearchLimits::default();

        let retry_delays_ms = match env::var("AUTOWALK_RETRY_DELAYS_MS") {
            Ok(raw) => parse_list("AUTOWALK_RETRY_DELAYS_MS", &raw)?,
            Err(_) => auto_walk_defaults.retry_delays_ms,
        };

        Ok(Self {
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            protocol: ProtocolProfile {
                client_version: env_or("CLIENT_VERSION", protocol_defaults.client_version)?,
                server_beat_ms: env_or("SERVER_BEAT_MS", protocol_defaults.server_beat_ms)?,
                new_walking: env_flag("FEATURE_NEW_WALKING", protocol_defaults.new_walking)?,
                new_speed_law: env_flag("FEATURE_NEW_SPEED_LAW", protocol_defaults.new_speed_law)?,
                slower_manual_walking: env_flag(
                    "FEATURE_SLOWER_MANUAL_WALKING",
                    protocol_defaults.slower_manual_walking,
                )?,
                extended_prediction: env_flag(
                    "FEATURE_EXTENDED_PREDICTION",
                    protocol_defaults.extended_prediction,
                )?,
                ignore_server_direction: env_flag(
                    "IGNORE_SERVER_DIRECTION",
                    protocol_defaults.ignore_server_direction,
                )?,
            },

            prediction: PredictionConfig {
                max_prewalk_steps: env_or("MAX_PREWALK_STEPS", prediction_defaults.max_prewalk_steps)?,
                extended_prewalk_steps: env_or(
                    "EXTENDED_PREWALK_STEPS",
                    prediction_defaults.extended_prewalk_steps,
                )?,
                stall_escape_ms: prediction_defaults.stall_escape_ms,
            },

            auto_walk: AutoWalkConfig {
                max_retries: env_or("AUTOWALK_MAX_RETRIES", auto_walk_defaults.max_retries)?,
                retry_delays_ms,
            },

            search: SearchLimits {
                iteration_budget: env_or("PATH_SEARCH_BUDGET", search_defaults.iteration_budget)?,
                uncertainty_cap: env_or("PATH_UNCERTAINTY_CAP", search_defaults.uncertainty_cap)?,
                ..search_defaults
            },
        })
    }

    /// Load configuration from a JSON document; missing fields keep their defaults
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_json::from_str(raw)?;
        if config.log_level.is_empty() {
            config.log_level = "info".to_string();
        }
        Ok(config)
    }
}

fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        Err(_) => Ok(default),
    }
}

fn env_flag(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(ConfigError::Invalid { name, value: raw }),
        },
        Err(_) => Ok(default),
    }
}

fn parse_list(name: &'static str, raw: &str) -> Result<Vec<u64>, ConfigError> {
    let values = raw
        .split(',')
        .map(|part| part.trim().parse::<u64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ConfigError::Invalid {
            name,
            value: raw.to_string(),
        })?;
    if values.is_empty() {
        return Err(ConfigError::Invalid {
            name,
            value: raw.to_string(),
        });
    }
    Ok(values)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("Invalid configuration document: {0}")]
    Json(#[from] serde_json::Error),
}
