use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::paths;

const JOURNAL_FILE_NAME: &str = "unfinished.json";

/// One in-flight or interrupted download, keyed by source URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnfinishedDownload {
  pub url: String,
  pub format_id: String,
  pub title: String,
  pub timestamp: DateTime<Utc>,
}

/// Flat JSON-array journal of unfinished downloads.
///
/// The whole document is rewritten on every mutation; there is a single
/// orchestrator writer at a time in practice, so no locking is needed
/// beyond the process model. Missing or corrupt files load as an empty
/// journal — recovery data must never block the app.
#[derive(Debug, Clone)]
pub struct Journal {
  path: PathBuf,
}

impl Journal {
  pub fn open_default() -> Self {
    Self { path: paths::data_dir().join(JOURNAL_FILE_NAME) }
  }

  pub fn at(path: PathBuf) -> Self {
    Self { path }
  }

  pub fn load(&self) -> Vec<UnfinishedDownload> {
    let Ok(data) = std::fs::read(&self.path) else {
      return Vec::new();
    };
    serde_json::from_slice(&data).unwrap_or_default()
  }

  fn save(&self, entries: &[UnfinishedDownload]) -> Result<()> {
    let data = serde_json::to_vec_pretty(entries).context("failed to serialize journal")?;
    std::fs::write(&self.path, data).with_context(|| format!("failed to write {}", self.path.display()))
  }

  /// Upsert by URL: replace an existing entry in place, else append.
  pub fn add(&self, entry: UnfinishedDownload) -> Result<()> {
    let mut entries = self.load();
    if let Some(existing) = entries.iter_mut().find(|e| e.url == entry.url) {
      *existing = entry;
    } else {
      entries.push(entry);
    }
    self.save(&entries)
  }

  /// Drop every entry matching the URL.
  pub fn remove(&self, url: &str) -> Result<()> {
    let entries: Vec<UnfinishedDownload> = self.load().into_iter().filter(|e| e.url != url).collect();
    self.save(&entries)
  }

  pub fn find(&self, url: &str) -> Option<UnfinishedDownload> {
    self.load().into_iter().find(|e| e.url == url)
  }
}
