use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::journal::{Journal, UnfinishedDownload};
use crate::process::ProcManager;
use crate::progress::{LineReader, Progress, ProgressParser};

// --- Request types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcessing {
  EmbedSubtitles,
  EmbedMetadata,
  EmbedChapters,
}

impl PostProcessing {
  pub fn flag(self) -> &'static str {
    match self {
      PostProcessing::EmbedSubtitles => "--embed-subs",
      PostProcessing::EmbedMetadata => "--embed-metadata",
      PostProcessing::EmbedChapters => "--embed-chapters",
    }
  }
}

#[derive(Debug, Clone, Copy)]
pub struct DownloadOption {
  pub kind: PostProcessing,
  pub enabled: bool,
}

/// One user-initiated download intent.
#[derive(Debug, Clone, Default)]
pub struct DownloadRequest {
  pub url: String,
  pub format_id: String,
  pub audio_only: bool,
  /// Target bitrate (kbit/s) for audio extraction.
  pub abr: f64,
  /// Request-level cookie sources; empty falls back to configuration.
  pub cookies_from_browser: String,
  pub cookies_file: String,
  pub options: Vec<DownloadOption>,
}

/// Everything the orchestrator needs from configuration, resolved up
/// front so the download task owns its inputs.
#[derive(Debug, Clone)]
pub struct DownloadSettings {
  pub yt_dlp_path: String,
  pub download_dir: PathBuf,
  pub cookies_browser: String,
  pub cookies_file: String,
}

impl DownloadSettings {
  pub fn from_config(cfg: &Config) -> Self {
    Self {
      yt_dlp_path: cfg.yt_dlp_path.clone(),
      download_dir: cfg.download_dir(),
      cookies_browser: cfg.cookies_browser.clone(),
      cookies_file: cfg.cookies_file.clone(),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
  Complete,
  Cancelled,
  Failed(String),
}

#[derive(Debug, Clone)]
pub enum DownloadEvent {
  Progress(Progress),
  Done(DownloadOutcome),
}

// --- Argument construction ---

/// Build the yt-dlp argument vector for one download, plus the file
/// extension progress events will carry. Cookie values must already be
/// resolved (request wins over configuration).
pub fn build_args(
  req: &DownloadRequest,
  download_dir: &Path,
  cookies_browser: &str,
  cookies_file: &str,
) -> (Vec<String>, &'static str) {
  let is_playlist = req.url.contains("/playlist?list=") || req.url.contains("&list=");

  let (mut args, file_extension) = if req.audio_only {
    (
      vec![
        "-f".to_string(),
        req.format_id.clone(),
        "-o".to_string(),
        download_dir.join("%(artist)s - %(title)s.%(ext)s").to_string_lossy().into_owned(),
        "--restrict-filenames".to_string(),
        "--embed-thumbnail".to_string(),
        "-x".to_string(),
        "--audio-format".to_string(),
        "mp3".to_string(),
        "--audio-quality".to_string(),
        format!("{}K", req.abr as u32),
        "--add-metadata".to_string(),
        "--metadata-from-title".to_string(),
        "%(artist)s - %(title)s".to_string(),
        "--newline".to_string(),
        "-R".to_string(),
        "infinite".to_string(),
        req.url.clone(),
      ],
      ".mp3",
    )
  } else {
    (
      vec![
        "-f".to_string(),
        req.format_id.clone(),
        "--newline".to_string(),
        "-R".to_string(),
        "infinite".to_string(),
        "-o".to_string(),
        download_dir.join("%(title)s.%(ext)s").to_string_lossy().into_owned(),
        req.url.clone(),
      ],
      ".mp4",
    )
  };

  if !is_playlist {
    args.insert(0, "--no-playlist".to_string());
  }

  // Browser cookies take precedence; the two flags are mutually exclusive.
  if !cookies_browser.is_empty() {
    args.splice(0..0, ["--cookies-from-browser".to_string(), cookies_browser.to_string()]);
  } else if !cookies_file.is_empty() {
    args.splice(0..0, ["--cookies".to_string(), cookies_file.to_string()]);
  }

  for opt in &req.options {
    if opt.enabled {
      args.push(opt.kind.flag().to_string());
    }
  }

  (args, file_extension)
}

// --- Orchestration ---

/// Drain one pipe through the shared parser, forwarding significant
/// lines as progress events. Per-pipe ordering is preserved; the two
/// pipes are not interleaved in chronological order.
async fn pump_lines<R>(
  pipe: R,
  parser: Arc<StdMutex<ProgressParser>>,
  tx: UnboundedSender<DownloadEvent>,
  file_extension: &'static str,
) where
  R: AsyncRead + Unpin + Send + 'static,
{
  let mut lines = LineReader::new(pipe);
  while let Some(line) = lines.next_line().await {
    if line.is_empty() {
      continue;
    }
    let mut progress = {
      // Safety: never held across an await point.
      let mut parser = parser.lock().expect("progress parser mutex poisoned");
      parser.parse_line(&line)
    };
    if ProgressParser::is_reportable(&line, &progress) {
      progress.file_extension = Some(file_extension.to_string());
      if tx.send(DownloadEvent::Progress(progress)).is_err() {
        break;
      }
    }
  }
}

fn send_done(tx: &UnboundedSender<DownloadEvent>, outcome: DownloadOutcome) {
  let _ = tx.send(DownloadEvent::Done(outcome));
}

/// Run one download to completion: journal the intent, spawn yt-dlp under
/// the manager, stream progress from both pipes, and emit exactly one
/// terminal outcome. Cancellation always wins over an exit-code error.
pub async fn run_download(
  manager: Arc<ProcManager>,
  journal: Journal,
  settings: DownloadSettings,
  title: String,
  req: DownloadRequest,
  tx: UnboundedSender<DownloadEvent>,
) {
  if req.url.is_empty() {
    send_done(&tx, DownloadOutcome::Failed("empty URL provided".to_string()));
    return;
  }

  // Persist the intent first so a crash mid-download is recoverable.
  let entry = UnfinishedDownload {
    url: req.url.clone(),
    format_id: req.format_id.clone(),
    title,
    timestamp: Utc::now(),
  };
  if let Err(e) = journal.add(entry) {
    warn!(err = %e, "download: failed to record unfinished entry");
  }

  let cookies_browser =
    if req.cookies_from_browser.is_empty() { settings.cookies_browser.clone() } else { req.cookies_from_browser.clone() };
  let cookies_file = if req.cookies_file.is_empty() { settings.cookies_file.clone() } else { req.cookies_file.clone() };

  let (args, file_extension) = build_args(&req, &settings.download_dir, &cookies_browser, &cookies_file);
  let yt_dlp = if settings.yt_dlp_path.is_empty() { "yt-dlp" } else { settings.yt_dlp_path.as_str() };

  info!(url = %req.url, format = %req.format_id, audio = req.audio_only, "download: starting");

  let spawned = Command::new(yt_dlp)
    .args(&args)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .spawn();

  let mut child = match spawned {
    Ok(child) => child,
    Err(e) => {
      let msg = if e.kind() == std::io::ErrorKind::NotFound {
        "yt-dlp not found. Install it with: brew install yt-dlp (macOS) or pip install yt-dlp".to_string()
      } else {
        format!("failed to start yt-dlp: {e}")
      };
      error!(err = %msg, "download: spawn failed");
      send_done(&tx, DownloadOutcome::Failed(msg));
      return;
    }
  };

  let (stdout, stderr) = match take_pipes(&mut child) {
    Ok(pipes) => pipes,
    Err(e) => {
      error!(err = %e, "download: pipe setup failed");
      send_done(&tx, DownloadOutcome::Failed(format!("{e:#}")));
      return;
    }
  };

  manager.set(child);

  // Both pipes feed one parser so destination/kind context carries over
  // regardless of which stream a line arrived on.
  let parser = Arc::new(StdMutex::new(ProgressParser::new()));
  let stdout_task = tokio::spawn(pump_lines(stdout, Arc::clone(&parser), tx.clone(), file_extension));
  let stderr_task = tokio::spawn(pump_lines(stderr, Arc::clone(&parser), tx.clone(), file_extension));
  let _ = stdout_task.await;
  let _ = stderr_task.await;

  let status = manager.wait().await;
  if manager.clear_and_check_cancelled() {
    info!(url = %req.url, "download: cancelled");
    send_done(&tx, DownloadOutcome::Cancelled);
    return;
  }

  match status {
    Ok(Some(s)) if s.success() => {
      if let Err(e) = journal.remove(&req.url) {
        warn!(err = %e, "download: failed to clear unfinished entry");
      }
      info!(url = %req.url, "download: complete");
      send_done(&tx, DownloadOutcome::Complete);
    }
    Ok(Some(s)) => {
      error!(url = %req.url, status = %s, "download: yt-dlp failed");
      send_done(&tx, DownloadOutcome::Failed(format!("yt-dlp exited with {s}")));
    }
    Ok(None) => {
      send_done(&tx, DownloadOutcome::Failed("process handle lost before exit".to_string()));
    }
    Err(e) => {
      send_done(&tx, DownloadOutcome::Failed(format!("failed to wait for yt-dlp: {e}")));
    }
  }
}

fn take_pipes(
  child: &mut tokio::process::Child,
) -> Result<(tokio::process::ChildStdout, tokio::process::ChildStderr)> {
  let stdout = child.stdout.take().context("failed to capture yt-dlp stdout")?;
  let stderr = child.stderr.take().context("failed to capture yt-dlp stderr")?;
  Ok((stdout, stderr))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::Path;

  fn base_request() -> DownloadRequest {
    DownloadRequest {
      url: "https://www.youtube.com/watch?v=abc".to_string(),
      format_id: "137+140".to_string(),
      ..Default::default()
    }
  }

  #[test]
  fn video_args_exact() {
    let (args, ext) = build_args(&base_request(), Path::new("/dl"), "", "");
    assert_eq!(
      args,
      vec![
        "--no-playlist",
        "-f",
        "137+140",
        "--newline",
        "-R",
        "infinite",
        "-o",
        "/dl/%(title)s.%(ext)s",
        "https://www.youtube.com/watch?v=abc",
      ]
    );
    assert_eq!(ext, ".mp4");
  }

  #[test]
  fn audio_args_exact() {
    let mut req = base_request();
    req.format_id = "140".to_string();
    req.audio_only = true;
    req.abr = 129.5;
    let (args, ext) = build_args(&req, Path::new("/dl"), "", "");
    assert_eq!(
      args,
      vec![
        "--no-playlist",
        "-f",
        "140",
        "-o",
        "/dl/%(artist)s - %(title)s.%(ext)s",
        "--restrict-filenames",
        "--embed-thumbnail",
        "-x",
        "--audio-format",
        "mp3",
        "--audio-quality",
        "129K",
        "--add-metadata",
        "--metadata-from-title",
        "%(artist)s - %(title)s",
        "--newline",
        "-R",
        "infinite",
        "https://www.youtube.com/watch?v=abc",
      ]
    );
    assert_eq!(ext, ".mp3");
  }

  #[test]
  fn playlist_urls_keep_playlist_mode() {
    let mut req = base_request();
    req.url = "https://www.youtube.com/playlist?list=PL123".to_string();
    let (args, _) = build_args(&req, Path::new("/dl"), "", "");
    assert!(!args.contains(&"--no-playlist".to_string()));

    req.url = "https://www.youtube.com/watch?v=abc&list=PL123".to_string();
    let (args, _) = build_args(&req, Path::new("/dl"), "", "");
    assert!(!args.contains(&"--no-playlist".to_string()));

    req.url = "https://www.youtube.com/watch?v=abc".to_string();
    let (args, _) = build_args(&req, Path::new("/dl"), "", "");
    assert!(args.contains(&"--no-playlist".to_string()));
  }

  #[test]
  fn browser_cookies_take_precedence() {
    let (args, _) = build_args(&base_request(), Path::new("/dl"), "firefox", "/tmp/cookies.txt");
    assert_eq!(&args[..2], &["--cookies-from-browser".to_string(), "firefox".to_string()]);
    assert!(!args.contains(&"--cookies".to_string()));

    let (args, _) = build_args(&base_request(), Path::new("/dl"), "", "/tmp/cookies.txt");
    assert_eq!(&args[..2], &["--cookies".to_string(), "/tmp/cookies.txt".to_string()]);
  }

  #[test]
  fn enabled_options_appended() {
    let mut req = base_request();
    req.options = vec![
      DownloadOption { kind: PostProcessing::EmbedSubtitles, enabled: true },
      DownloadOption { kind: PostProcessing::EmbedMetadata, enabled: false },
      DownloadOption { kind: PostProcessing::EmbedChapters, enabled: true },
    ];
    let (args, _) = build_args(&req, Path::new("/dl"), "", "");
    assert!(args.contains(&"--embed-subs".to_string()));
    assert!(!args.contains(&"--embed-metadata".to_string()));
    assert!(args.contains(&"--embed-chapters".to_string()));
    assert_eq!(args.last().unwrap(), "--embed-chapters");
  }

  // --- end-to-end against stub executables ---

  #[cfg(unix)]
  mod e2e {
    use super::*;
    use crate::journal::Journal;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn write_stub(dir: &TempDir, name: &str, script: &str) -> String {
      let path = dir.path().join(name);
      std::fs::write(&path, script).unwrap();
      std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
      path.to_string_lossy().into_owned()
    }

    fn settings(dir: &TempDir, yt_dlp_path: String) -> DownloadSettings {
      DownloadSettings {
        yt_dlp_path,
        download_dir: dir.path().to_path_buf(),
        cookies_browser: String::new(),
        cookies_file: String::new(),
      }
    }

    async fn collect_outcome(rx: &mut mpsc::UnboundedReceiver<DownloadEvent>) -> (Vec<Progress>, DownloadOutcome) {
      let mut events = Vec::new();
      while let Some(event) = rx.recv().await {
        match event {
          DownloadEvent::Progress(p) => events.push(p),
          DownloadEvent::Done(outcome) => return (events, outcome),
        }
      }
      panic!("channel closed without a terminal outcome");
    }

    #[tokio::test]
    async fn successful_download_reports_complete_and_clears_journal() {
      let dir = TempDir::new().unwrap();
      let stub = write_stub(
        &dir,
        "fake-yt-dlp",
        "#!/bin/sh\necho '[download] Destination: /tmp/video.mp4'\necho '[download]  50.0% of 10MiB at 1.00MiB/s ETA 00:05'\necho '[download] 100% of 10MiB'\nexit 0\n",
      );
      let journal = Journal::at(dir.path().join("unfinished.json"));
      let manager = Arc::new(ProcManager::new());
      let (tx, mut rx) = mpsc::unbounded_channel();

      run_download(
        Arc::clone(&manager),
        journal.clone(),
        settings(&dir, stub),
        "Video".to_string(),
        base_request(),
        tx,
      )
      .await;

      let (events, outcome) = collect_outcome(&mut rx).await;
      assert_eq!(outcome, DownloadOutcome::Complete);
      assert!(events.iter().any(|p| p.percent == Some(50.0)));
      assert!(events.iter().any(|p| p.destination.as_deref() == Some("/tmp/video.mp4")));
      assert!(events.iter().all(|p| p.file_extension.as_deref() == Some(".mp4")));
      // Clean success removes the journal entry.
      assert!(journal.load().is_empty());
      assert!(!manager.is_active());
    }

    #[tokio::test]
    async fn failing_process_reports_error_and_keeps_journal() {
      let dir = TempDir::new().unwrap();
      let stub = write_stub(&dir, "fake-yt-dlp", "#!/bin/sh\nexit 3\n");
      let journal = Journal::at(dir.path().join("unfinished.json"));
      let manager = Arc::new(ProcManager::new());
      let (tx, mut rx) = mpsc::unbounded_channel();

      run_download(manager, journal.clone(), settings(&dir, stub), "Video".to_string(), base_request(), tx).await;

      let (_, outcome) = collect_outcome(&mut rx).await;
      assert!(matches!(outcome, DownloadOutcome::Failed(_)));
      // The entry stays for resume.
      assert_eq!(journal.load().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_download_reports_cancelled_not_error() {
      let dir = TempDir::new().unwrap();
      // Killed by cancel, so the exit status is non-zero — the cancelled
      // flag must still win the classification.
      let stub = write_stub(&dir, "fake-yt-dlp", "#!/bin/sh\nexec sleep 10\n");
      let journal = Journal::at(dir.path().join("unfinished.json"));
      let manager = Arc::new(ProcManager::new());
      let (tx, mut rx) = mpsc::unbounded_channel();

      let task = tokio::spawn(run_download(
        Arc::clone(&manager),
        journal,
        settings(&dir, stub),
        "Video".to_string(),
        base_request(),
        tx,
      ));

      // Wait for the process to be registered, then cancel.
      for _ in 0..100 {
        if manager.is_active() {
          break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
      }
      manager.cancel().unwrap();

      let (_, outcome) = collect_outcome(&mut rx).await;
      assert_eq!(outcome, DownloadOutcome::Cancelled);
      task.await.unwrap();
    }

    #[tokio::test]
    async fn missing_binary_reports_spawn_failure() {
      let dir = TempDir::new().unwrap();
      let journal = Journal::at(dir.path().join("unfinished.json"));
      let manager = Arc::new(ProcManager::new());
      let (tx, mut rx) = mpsc::unbounded_channel();

      run_download(
        manager,
        journal,
        settings(&dir, dir.path().join("no-such-binary").to_string_lossy().into_owned()),
        "Video".to_string(),
        base_request(),
        tx,
      )
      .await;

      let (_, outcome) = collect_outcome(&mut rx).await;
      match outcome {
        DownloadOutcome::Failed(msg) => assert!(msg.contains("yt-dlp not found")),
        other => panic!("expected spawn failure, got {other:?}"),
      }
    }

    #[tokio::test]
    async fn empty_url_rejected_before_spawn() {
      let dir = TempDir::new().unwrap();
      let journal = Journal::at(dir.path().join("unfinished.json"));
      let manager = Arc::new(ProcManager::new());
      let (tx, mut rx) = mpsc::unbounded_channel();

      let mut req = base_request();
      req.url = String::new();
      run_download(manager, journal, settings(&dir, "true".to_string()), "Video".to_string(), req, tx).await;

      let (_, outcome) = collect_outcome(&mut rx).await;
      assert!(matches!(outcome, DownloadOutcome::Failed(_)));
    }
  }
}
