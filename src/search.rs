use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::formats::{format_duration, format_views, parse_float, truncate_channel};
use crate::process::ProcManager;

/// One entry from a search listing.
#[derive(Debug, Clone)]
pub struct SearchItem {
  pub id: String,
  pub title: String,
  pub channel: String,
  pub views: f64,
  pub duration: f64,
  pub desc: String,
}

impl SearchItem {
  pub fn watch_url(&self) -> String {
    format!("https://www.youtube.com/watch?v={}", self.id)
  }
}

/// Whether user input is a direct URL rather than a search query.
pub fn is_url(input: &str) -> bool {
  let trimmed = input.trim();
  trimmed.starts_with("http://") || trimmed.starts_with("https://")
}

#[derive(Debug, Deserialize)]
struct RawSearchLine {
  id: Option<String>,
  title: Option<String>,
  uploader: Option<String>,
  playlist_uploader: Option<String>,
  view_count: Option<Value>,
  duration: Option<Value>,
}

/// Decode one `-j` output line into a search item. Lines without an id or
/// title, and zero-duration entries (live streams, shorts placeholders),
/// are rejected and skipped by the caller.
pub fn parse_search_line(line: &str) -> Result<SearchItem> {
  let raw: RawSearchLine = serde_json::from_str(line).context("failed to decode search line")?;

  let id = raw.id.filter(|s| !s.is_empty()).ok_or_else(|| anyhow!("missing video id"))?;
  let title = raw.title.filter(|s| !s.is_empty()).ok_or_else(|| anyhow!("missing title"))?;

  let channel = raw
    .uploader
    .filter(|s| !s.is_empty())
    .or(raw.playlist_uploader.filter(|s| !s.is_empty()))
    .unwrap_or_default();
  let channel = truncate_channel(&channel);

  let views = parse_float(raw.view_count.as_ref());
  let duration = parse_float(raw.duration.as_ref());
  if duration == 0.0 {
    bail!("zero-duration entry");
  }

  let desc = format!("{} • {} views • {}", format_duration(duration), format_views(views), channel);
  Ok(SearchItem { id, title, channel, views, duration, desc })
}

/// Run one search invocation under the fetch manager. Returns `Ok(None)`
/// when the invocation was cancelled, mirroring the formats fetcher.
pub async fn run_search(
  manager: Arc<ProcManager>,
  yt_dlp_path: &str,
  limit: usize,
  query: &str,
) -> Result<Option<Vec<SearchItem>>> {
  let yt_dlp = if yt_dlp_path.is_empty() { "yt-dlp" } else { yt_dlp_path };
  let target = format!("ytsearch{limit}:{query}");

  let mut child = Command::new(yt_dlp)
    .args(["--flat-playlist", "-j", "--no-warnings", "--", &target])
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::null())
    .spawn()
    .map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        anyhow!("yt-dlp not found. Install it with: brew install yt-dlp (macOS) or pip install yt-dlp")
      } else {
        anyhow!(e).context("failed to start yt-dlp")
      }
    })?;

  let mut stdout = child.stdout.take().context("failed to capture yt-dlp stdout")?;
  manager.set(child);

  let mut out = Vec::new();
  let read_result = stdout.read_to_end(&mut out).await;

  let status = manager.wait().await;
  if manager.clear_and_check_cancelled() {
    info!(query = %query, "search: cancelled, suppressing result");
    return Ok(None);
  }

  match status {
    Ok(Some(s)) if !s.success() => bail!("yt-dlp exited with {s}"),
    Ok(_) => {}
    Err(e) => bail!("failed to wait for yt-dlp: {e}"),
  }
  if let Err(e) = read_result {
    bail!("failed to read yt-dlp output: {e}");
  }

  let text = String::from_utf8_lossy(&out);
  let mut items = Vec::new();
  for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
    match parse_search_line(line) {
      Ok(item) => items.push(item),
      Err(e) => debug!(err = %e, "search: skipping line"),
    }
  }
  Ok(Some(items))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_detection() {
    assert!(is_url("https://www.youtube.com/watch?v=abc"));
    assert!(is_url("  http://example.com/v "));
    assert!(!is_url("lofi hip hop"));
    assert!(!is_url("www.youtube.com/watch?v=abc"));
  }

  #[test]
  fn parse_valid_line() {
    let item = parse_search_line(
      r#"{"id":"dQw4w9WgXcQ","title":"Never","uploader":"Rick","view_count":1000000,"duration":212}"#,
    )
    .unwrap();
    assert_eq!(item.id, "dQw4w9WgXcQ");
    assert_eq!(item.title, "Never");
    assert_eq!(item.desc, "3:32 • 1.0M views • Rick");
    assert_eq!(item.watch_url(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
  }

  #[test]
  fn parse_falls_back_to_playlist_uploader() {
    let item =
      parse_search_line(r#"{"id":"a","title":"T","playlist_uploader":"Someone","duration":60}"#).unwrap();
    assert_eq!(item.channel, "Someone");
  }

  #[test]
  fn parse_rejects_zero_duration() {
    assert!(parse_search_line(r#"{"id":"a","title":"Live Now","duration":0}"#).is_err());
    assert!(parse_search_line(r#"{"id":"a","title":"No Duration"}"#).is_err());
  }

  #[test]
  fn parse_rejects_missing_fields() {
    assert!(parse_search_line(r#"{"title":"T","duration":10}"#).is_err());
    assert!(parse_search_line(r#"{"id":"a","duration":10}"#).is_err());
    assert!(parse_search_line("not json").is_err());
  }

  #[test]
  fn parse_tolerates_string_numbers() {
    let item = parse_search_line(r#"{"id":"a","title":"T","view_count":"1500","duration":"90"}"#).unwrap();
    assert_eq!(item.views, 1500.0);
    assert_eq!(item.duration, 90.0);
  }
}
