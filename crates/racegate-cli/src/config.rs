//! Run configuration file.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use racegate_core::{Entity, RunConfig, RunMode};
use racegate_net::{ExecutorConfig, NotifierConfig, SourceConfig, ValidatorConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Keep only entities whose `params[param]` equals `equals`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityFilter {
    pub param: String,
    pub equals: Value,
}

impl EntityFilter {
    pub fn matches(&self, entity: &Entity) -> bool {
        entity.params.get(&self.param) == Some(&self.equals)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub entities: Vec<Entity>,
    pub entity_filter: Option<EntityFilter>,
    /// `HH:MM:SS` local time today, or an RFC 3339 instant.
    pub target: Option<String>,
    pub mode: Option<RunMode>,
    /// Full run settings; replaces the mode preset when present.
    pub run: Option<RunConfig>,
    pub source: Option<SourceConfig>,
    pub validator: Option<ValidatorConfig>,
    pub executor: ExecutorConfig,
    pub notifier: Option<NotifierConfig>,
    pub report_dir: Option<PathBuf>,
}

/// Flag values that override the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub at: Option<String>,
    pub mode: Option<RunMode>,
    pub lead_secs: Option<u64>,
    pub channels: Option<usize>,
    pub max_rounds: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config in {:?}", path))
    }

    /// Mode in effect: the flag, then the file, then pooled.
    pub fn mode(&self, overrides: &Overrides) -> RunMode {
        overrides.mode.or(self.mode).unwrap_or(RunMode::Pooled)
    }

    /// Run settings after presets and flag overrides, validated.
    pub fn effective_run(&self, overrides: &Overrides) -> Result<RunConfig> {
        let mut run = match (overrides.mode, &self.run) {
            (Some(mode), _) => mode.config(),
            (None, Some(run)) => run.clone(),
            (None, None) => self.mode(overrides).config(),
        };
        if let Some(secs) = overrides.lead_secs {
            run.lead_ms = secs.saturating_mul(1_000);
        }
        if let Some(channels) = overrides.channels {
            run.channels_per_entity = channels;
        }
        if let Some(max_rounds) = overrides.max_rounds {
            run.budget.max_rounds = Some(max_rounds);
        }
        run.validate()?;
        Ok(run)
    }

    /// Target instant; `now` when neither flag nor file names one.
    pub fn effective_target(&self, overrides: &Overrides, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match overrides.at.as_deref().or(self.target.as_deref()) {
            Some(raw) => parse_target(raw, now),
            None => Ok(now),
        }
    }

    /// Entities after the filter, de-duplicated by key.
    pub fn selected_entities(&self) -> Vec<Entity> {
        filter_entities(&self.entities, self.entity_filter.as_ref())
    }
}

pub fn filter_entities(entities: &[Entity], filter: Option<&EntityFilter>) -> Vec<Entity> {
    let mut seen = HashSet::new();
    entities
        .iter()
        .filter(|e| filter.map_or(true, |f| f.matches(e)))
        .filter(|e| seen.insert(e.key.clone()))
        .cloned()
        .collect()
}

/// Parse `HH:MM:SS` (local time on the day of `now`) or an RFC 3339 instant.
pub fn parse_target(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }
    parse_local_time(raw, now)
}

pub fn parse_local_time(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .with_context(|| format!("Invalid target time {raw:?}, expected HH:MM:SS"))?;
    let day = now.with_timezone(&Local).date_naive();
    match Local.from_local_datetime(&day.and_time(time)).earliest() {
        Some(local) => Ok(local.with_timezone(&Utc)),
        None => bail!("{raw} does not exist today in the local time zone"),
    }
}
