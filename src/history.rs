use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::paths;

const HISTORY_FILE_NAME: &str = "history";
const HISTORY_CAP: usize = 1000;

pub fn default_path() -> PathBuf {
  paths::data_dir().join(HISTORY_FILE_NAME)
}

/// Past queries, most recent first. A missing file is an empty history.
pub fn load(path: &Path) -> Vec<String> {
  let Ok(content) = std::fs::read_to_string(path) else {
    return Vec::new();
  };
  content.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect()
}

/// Push a query to the front, dropping any exact duplicate further down
/// and anything past the cap. Empty queries are ignored.
pub fn push(path: &Path, query: &str) -> Result<()> {
  let query = query.trim();
  if query.is_empty() {
    return Ok(());
  }

  let mut entries = load(path);
  entries.retain(|e| e != query);
  entries.insert(0, query.to_string());
  entries.truncate(HISTORY_CAP);

  std::fs::write(path, entries.join("\n")).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn missing_file_is_empty() {
    let dir = tempdir().unwrap();
    assert!(load(&dir.path().join("history")).is_empty());
  }

  #[test]
  fn push_prepends_and_dedupes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("history");

    push(&path, "rust tutorial").unwrap();
    push(&path, "lofi beats").unwrap();
    push(&path, "rust tutorial").unwrap();

    assert_eq!(load(&path), vec!["rust tutorial", "lofi beats"]);
  }

  #[test]
  fn empty_query_ignored() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("history");
    push(&path, "   ").unwrap();
    assert!(load(&path).is_empty());
  }

  #[test]
  fn capped_at_limit() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("history");
    for i in 0..(HISTORY_CAP + 10) {
      push(&path, &format!("query {i}")).unwrap();
    }
    let entries = load(&path);
    assert_eq!(entries.len(), HISTORY_CAP);
    assert_eq!(entries[0], format!("query {}", HISTORY_CAP + 9));
  }
}
