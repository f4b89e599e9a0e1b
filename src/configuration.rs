//! Runtime settings: draw schedule, betting policy and storage backend.
//!
//! Read from an optional `configuration.toml` in the working directory, then
//! from `TEER__<SECTION>__<KEY>` environment variables. Every key has a default.

use chrono::{FixedOffset, NaiveTime, Weekday};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::Amount;
use crate::schedule::Schedule;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("schedule.utc_offset: cannot parse '{0}', expected e.g. +05:30")]
    InvalidOffset(String),

    #[error("schedule.rest_day: cannot parse '{0}', expected a weekday name")]
    InvalidWeekday(String),

    #[error("schedule.{key}: cannot parse '{value}', expected HH:MM")]
    InvalidTime { key: &'static str, value: String },

    #[error("storage.path is required for the sqlite backend")]
    MissingPath,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub utc_offset: String,
    pub rest_day: String,
    pub round1_cutoff: String,
    pub round2_cutoff: String,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            utc_offset: "+05:30".to_string(),
            rest_day: "sun".to_string(),
            round1_cutoff: "15:30".to_string(),
            round2_cutoff: "16:30".to_string(),
        }
    }
}

impl ScheduleSettings {
    pub fn schedule(&self) -> Result<Schedule, SettingsError> {
        let offset: FixedOffset = self
            .utc_offset
            .parse()
            .map_err(|_| SettingsError::InvalidOffset(self.utc_offset.clone()))?;
        let rest_day: Weekday = self
            .rest_day
            .parse()
            .map_err(|_| SettingsError::InvalidWeekday(self.rest_day.clone()))?;
        let round1 = parse_time("round1_cutoff", &self.round1_cutoff)?;
        let round2 = parse_time("round2_cutoff", &self.round2_cutoff)?;
        Ok(Schedule::new(offset, rest_day, round1, round2))
    }
}

fn parse_time(key: &'static str, value: &str) -> Result<NaiveTime, SettingsError> {
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|_| SettingsError::InvalidTime {
        key,
        value: value.to_string(),
    })
}

/// Betting and wallet policy constants.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Exact match pays `stake * payout_multiplier`.
    pub payout_multiplier: u32,
    pub min_stake: Amount,
    pub max_stake: Amount,
    pub min_deposit: Amount,
    pub min_withdrawal: Amount,
    /// Withdrawals are refused for this long after a win is credited.
    pub withdrawal_cooldown_minutes: i64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            payout_multiplier: 80,
            min_stake: Amount::new(10),
            max_stake: Amount::new(10_000),
            min_deposit: Amount::new(100),
            min_withdrawal: Amount::new(500),
            withdrawal_cooldown_minutes: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: Backend,
    pub path: Option<PathBuf>,
}

impl StorageSettings {
    /// Path of the sqlite database, required when that backend is selected.
    pub fn sqlite_path(&self) -> Result<&PathBuf, SettingsError> {
        self.path.as_ref().ok_or(SettingsError::MissingPath)
    }
}

pub fn get_configuration() -> Result<Settings, SettingsError> {
    let settings = Config::builder()
        .add_source(File::with_name("configuration").required(false))
        .add_source(
            Environment::with_prefix("TEER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Parse settings from TOML text.
pub fn from_toml(text: &str) -> Result<Settings, SettingsError> {
    let settings = Config::builder()
        .add_source(File::from_str(text, FileFormat::Toml))
        .build()?;

    Ok(settings.try_deserialize()?)
}
