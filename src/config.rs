use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context;
use regex::Regex;
use tracing::trace;

use crate::model::{ChannelKind, ChannelTarget, Indicator, IndicatorId, ScheduleId};
use crate::monitor::MonitorSettings;
use crate::schedule::{self, Schedule};

/// Storage backend configuration
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[default]
    #[serde(rename = "none")]
    None,

    /// SQLite database for alerts and execution history
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days (execution results older than this are deleted)
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },
}

impl StorageConfig {
    pub fn retention(&self) -> Option<chrono::Duration> {
        match self {
            StorageConfig::None => None,
            StorageConfig::Sqlite { retention_days, .. } => {
                Some(chrono::Duration::days(*retention_days as i64))
            }
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./indicators.db")
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_collector_timeout_secs")]
    pub collector_timeout_secs: u64,
    #[serde(default = "default_channel_timeout_secs")]
    pub channel_timeout_secs: u64,
    #[serde(default = "default_stuck_after_secs")]
    pub stuck_after_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            workers: default_workers(),
            collector_timeout_secs: default_collector_timeout_secs(),
            channel_timeout_secs: default_channel_timeout_secs(),
            stuck_after_secs: default_stuck_after_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn channel_timeout(&self) -> Duration {
        Duration::from_secs(self.channel_timeout_secs)
    }
}

impl From<&SchedulerConfig> for MonitorSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            tick: Duration::from_secs(config.tick_secs),
            workers: config.workers,
            collector_timeout: Duration::from_secs(config.collector_timeout_secs),
            stuck_after: Duration::from_secs(config.stuck_after_secs),
        }
    }
}

fn default_tick_secs() -> u64 {
    60
}

fn default_workers() -> usize {
    4
}

fn default_collector_timeout_secs() -> u64 {
    30
}

fn default_channel_timeout_secs() -> u64 {
    10
}

fn default_stuck_after_secs() -> u64 {
    900
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CollectorConfig {
    pub url: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    pub collector: CollectorConfig,

    #[serde(default)]
    pub schedules: Vec<Schedule>,

    #[serde(default)]
    pub indicators: Vec<Indicator>,

    /// Storage configuration (optional - defaults to in-memory)
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidSetting {
        name: &'static str,
        reason: String,
    },
    DuplicateSchedule(ScheduleId),
    DuplicateIndicator(IndicatorId),
    InvalidSchedule {
        schedule_id: ScheduleId,
        reason: String,
    },
    UnknownSchedule {
        indicator_id: IndicatorId,
        schedule_id: ScheduleId,
    },
    InvalidThreshold {
        indicator_id: IndicatorId,
        reason: String,
    },
    InvalidRecipient {
        indicator_id: IndicatorId,
        target: ChannelTarget,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidSetting { name, reason } => write!(f, "{name}: {reason}"),
            ConfigError::DuplicateSchedule(id) => write!(f, "schedule {id} is defined twice"),
            ConfigError::DuplicateIndicator(id) => write!(f, "indicator {id} is defined twice"),
            ConfigError::InvalidSchedule {
                schedule_id,
                reason,
            } => write!(f, "schedule {schedule_id}: {reason}"),
            ConfigError::UnknownSchedule {
                indicator_id,
                schedule_id,
            } => write!(
                f,
                "indicator {indicator_id} references unknown schedule {schedule_id}"
            ),
            ConfigError::InvalidThreshold {
                indicator_id,
                reason,
            } => write!(f, "indicator {indicator_id}: {reason}"),
            ConfigError::InvalidRecipient {
                indicator_id,
                target,
            } => write!(
                f,
                "indicator {indicator_id}: invalid {} recipient '{}'",
                target.kind, target.recipient
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[1-9][0-9]{6,14}$").expect("valid phone regex"));

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://[^\s/?#]+[^\s]*$").expect("valid url regex"));

/// Whether `recipient` has the right shape for a channel of `kind`
pub fn valid_recipient(kind: ChannelKind, recipient: &str) -> bool {
    match kind {
        ChannelKind::Email => EMAIL.is_match(recipient),
        ChannelKind::Sms => PHONE.is_match(recipient),
        ChannelKind::Chat | ChannelKind::Webhook => URL.is_match(recipient),
    }
}

impl Config {
    /// Check the whole configuration and return every problem found
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = vec![];

        if self.scheduler.tick_secs == 0 {
            errors.push(ConfigError::InvalidSetting {
                name: "scheduler.tick_secs",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.scheduler.workers == 0 {
            errors.push(ConfigError::InvalidSetting {
                name: "scheduler.workers",
                reason: "must be greater than 0".to_string(),
            });
        }
        if !URL.is_match(&self.collector.url) {
            errors.push(ConfigError::InvalidSetting {
                name: "collector.url",
                reason: format!("'{}' is not an http(s) URL", self.collector.url),
            });
        }

        let mut schedule_ids = HashSet::new();
        for schedule in &self.schedules {
            if !schedule_ids.insert(schedule.id) {
                errors.push(ConfigError::DuplicateSchedule(schedule.id));
            }

            errors.extend(schedule::validate(&schedule.kind).into_iter().map(|reason| {
                ConfigError::InvalidSchedule {
                    schedule_id: schedule.id,
                    reason,
                }
            }));

            if let (Some(from), Some(until)) = (schedule.valid_from, schedule.valid_until)
                && from > until
            {
                errors.push(ConfigError::InvalidSchedule {
                    schedule_id: schedule.id,
                    reason: "valid_from is after valid_until".to_string(),
                });
            }
        }

        let mut indicator_ids = HashSet::new();
        for indicator in &self.indicators {
            if !indicator_ids.insert(indicator.id) {
                errors.push(ConfigError::DuplicateIndicator(indicator.id));
            }

            if let Some(schedule_id) = indicator.schedule_id
                && !schedule_ids.contains(&schedule_id)
            {
                errors.push(ConfigError::UnknownSchedule {
                    indicator_id: indicator.id,
                    schedule_id,
                });
            }

            errors.extend(validate_thresholds(indicator));

            errors.extend(
                indicator
                    .channels
                    .iter()
                    .filter(|target| !valid_recipient(target.kind, &target.recipient))
                    .map(|target| ConfigError::InvalidRecipient {
                        indicator_id: indicator.id,
                        target: target.clone(),
                    }),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn validate_thresholds(indicator: &Indicator) -> Vec<ConfigError> {
    let mut errors = vec![];
    let mut invalid = |reason: &str| {
        errors.push(ConfigError::InvalidThreshold {
            indicator_id: indicator.id,
            reason: reason.to_string(),
        })
    };

    match &indicator.fixed_threshold {
        Some(threshold) if !threshold.value.is_finite() => {
            invalid("fixed threshold value must be a finite number");
        }
        Some(_) => {}
        None if !indicator.deviation_threshold.is_finite()
            || indicator.deviation_threshold <= 0.0 =>
        {
            invalid("deviation_threshold must be greater than 0");
        }
        None => {}
    }

    if indicator.minimum_threshold.is_some_and(|min| !min.is_finite()) {
        invalid("minimum_threshold must be a finite number");
    }

    if indicator.lookback_minutes == 0 {
        invalid("lookback_minutes must be greater than 0");
    }

    errors
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    parse_config(&file_content).inspect(|config| trace!("loaded config: {config:?}"))
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content).context("Invalid configuration file provided!")
}
