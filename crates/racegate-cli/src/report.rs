//! Run statistics and the persisted JSON report.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use racegate_core::{Entity, EntityKey, MetricsSnapshot, RunConfig, RunMode, RunSummary};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Everything written to `racegate-run-<timestamp>.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub version: String,
    pub mode: RunMode,
    pub target: DateTime<Utc>,
    pub success_rate: f64,
    pub config: RunConfig,
    pub summary: RunSummary,
    pub metrics: MetricsSnapshot,
}

impl RunReport {
    pub fn new(
        mode: RunMode,
        target: DateTime<Utc>,
        config: RunConfig,
        summary: RunSummary,
        metrics: MetricsSnapshot,
    ) -> Self {
        Self {
            generated_at: Utc::now(),
            version: racegate_core::VERSION.to_string(),
            mode,
            target,
            success_rate: summary.success_rate(),
            config,
            summary,
            metrics,
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "racegate-run-{}.json",
            self.generated_at.format("%Y%m%d-%H%M%S")
        )
    }

    /// Write the report into `dir`, creating it if needed.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create report directory {:?}", dir))?;
        let path = dir.join(self.file_name());
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write report to {:?}", path))?;
        Ok(path)
    }
}

/// Human-readable statistics block.
pub fn render_summary(summary: &RunSummary, entities: &[Entity]) -> String {
    let names: HashMap<&EntityKey, &str> = entities
        .iter()
        .map(|e| (&e.key, e.display_name()))
        .collect();
    let name = |key: &EntityKey| names.get(key).copied().unwrap_or(key.as_str()).to_string();

    let mut out = String::new();
    let _ = writeln!(out, "Run {}", summary.run_id);
    let _ = writeln!(out, "  stopped by:  {}", summary.stopped_by);
    let _ = writeln!(out, "  elapsed:     {:.1}s", summary.elapsed.as_secs_f64());
    let _ = writeln!(out, "  total:       {}", summary.total());
    let _ = writeln!(out, "  succeeded:   {}", summary.succeeded.len());
    let _ = writeln!(out, "  unsucceeded: {}", summary.unsucceeded.len());
    let _ = writeln!(out, "  success:     {:.1}%", summary.success_rate() * 100.0);

    if !summary.succeeded.is_empty() {
        let _ = writeln!(out, "\nSucceeded:");
        for key in &summary.succeeded {
            let rounds = summary.rounds.get(key).copied().unwrap_or(0);
            let _ = writeln!(out, "  + {} ({} rounds)", name(key), rounds);
        }
    }

    if !summary.unsucceeded.is_empty() {
        let _ = writeln!(out, "\nUnsucceeded:");
        for key in &summary.unsucceeded {
            match summary.last_failures.get(key) {
                Some(failure) => {
                    let _ = writeln!(
                        out,
                        "  - {} [{}] {} (round {})",
                        name(key),
                        failure.error_kind,
                        failure.detail,
                        failure.round
                    );
                }
                None => {
                    let _ = writeln!(out, "  - {} (never attempted)", name(key));
                }
            }
        }
    }
    out
}
