use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};

// --- Line Stream Reader ---

/// Splits a byte stream into lines, treating both `\n` and `\r` as
/// terminators. yt-dlp rewrites its progress line in place with bare
/// carriage returns, so `\r` must end a line just like `\n` — a `\r\n`
/// pair therefore yields one empty interstitial line, which callers skip.
///
/// Undecodable bytes pass through lossily; a read error ends the stream
/// rather than aborting the download. The final partial line (no
/// terminator before EOF) is flushed before the stream ends.
pub struct LineReader<R> {
  inner: R,
  buf: Vec<u8>,
  start: usize,
  eof: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
  pub fn new(inner: R) -> Self {
    Self { inner, buf: Vec::new(), start: 0, eof: false }
  }

  pub async fn next_line(&mut self) -> Option<String> {
    loop {
      if let Some(pos) = self.buf[self.start..].iter().position(|&b| b == b'\n' || b == b'\r') {
        let line = String::from_utf8_lossy(&self.buf[self.start..self.start + pos]).into_owned();
        self.start += pos + 1;
        if self.start >= 8192 {
          self.buf.drain(..self.start);
          self.start = 0;
        }
        return Some(line);
      }

      if self.eof {
        if self.start < self.buf.len() {
          let line = String::from_utf8_lossy(&self.buf[self.start..]).into_owned();
          self.start = self.buf.len();
          return Some(line);
        }
        return None;
      }

      let mut chunk = [0u8; 4096];
      match self.inner.read(&mut chunk).await {
        Ok(0) => self.eof = true,
        Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
        // Treat read errors as end of stream; individual bad reads must not
        // abort the whole download.
        Err(_) => self.eof = true,
      }
    }
  }
}

// --- Progress Line Parser ---

/// One parsed snapshot of transfer state. A `None` field means the line
/// made no claim about it — notably `percent: None` is "no progress
/// information", not zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
  pub percent: Option<f64>,
  pub speed: Option<String>,
  pub eta: Option<String>,
  pub status: Option<String>,
  pub destination: Option<String>,
  pub file_extension: Option<String>,
}

const VIDEO_EXTENSIONS: [&str; 3] = [".mp4", ".webm", ".mkv"];
const AUDIO_EXTENSIONS: [&str; 6] = [".m4a", ".mp3", ".ogg", ".wav", ".flac", ".aac"];

fn media_kind_from_extension(line: &str) -> Option<&'static str> {
  if VIDEO_EXTENSIONS.iter().any(|ext| line.contains(ext)) {
    return Some("video");
  }
  if AUDIO_EXTENSIONS.iter().any(|ext| line.contains(ext)) {
    return Some("audio");
  }
  None
}

/// Stateful extractor turning raw yt-dlp output lines into [`Progress`]
/// snapshots. Remembers the last `Destination:` path and media-kind label
/// across lines, since yt-dlp prints them once and then emits bare
/// percent lines. One parser instance serves exactly one download
/// invocation and is discarded with it.
pub struct ProgressParser {
  download_percent: Regex,
  any_percent: Regex,
  speed: Regex,
  eta: Regex,
  destination: Regex,
  format_token: Regex,
  current_format: Option<String>,
  current_destination: Option<String>,
}

impl ProgressParser {
  pub fn new() -> Self {
    // The patterns are fixed literals; compilation cannot fail.
    Self {
      download_percent: Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%").expect("valid regex"),
      any_percent: Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("valid regex"),
      speed: Regex::new(r"(\d+(?:\.\d+)?[KMG]?i?B/s)").expect("valid regex"),
      eta: Regex::new(r"ETA\s+(\d+:\d+(?::\d+)?)").expect("valid regex"),
      destination: Regex::new(r"Destination:\s*(.+)").expect("valid regex"),
      format_token: Regex::new(r"(?:format|format_id)\s+(\d+)").expect("valid regex"),
      current_format: None,
      current_destination: None,
    }
  }

  /// Parse one raw line. Always returns a snapshot; whether it is worth
  /// forwarding is a separate decision ([`Self::is_reportable`]).
  pub fn parse_line(&mut self, line: &str) -> Progress {
    // The specific "[download] N%" pattern is tried before the generic
    // one; the first pattern that matches and parses wins.
    let percent = [&self.download_percent, &self.any_percent]
      .into_iter()
      .find_map(|re| re.captures(line).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse::<f64>().ok()));

    let speed = self.speed.captures(line).and_then(|c| c.get(1)).map(|m| m.as_str().to_string());
    let eta = self.eta.captures(line).and_then(|c| c.get(1)).map(|m| m.as_str().to_string());

    if line.contains("Destination:") {
      if let Some(c) = self.destination.captures(line)
        && let Some(m) = c.get(1)
      {
        self.current_destination = Some(m.as_str().trim().to_string());
      }
      if let Some(kind) = media_kind_from_extension(line) {
        self.current_format = Some(kind.to_string());
      }
    }

    if let Some(c) = self.format_token.captures(line)
      && let Some(m) = c.get(1)
    {
      self.current_format = Some(format!("format {}", m.as_str()));
    }

    let status = percent.is_some().then(|| match &self.current_format {
      Some(label) => format!("[download] {label}"),
      None => "[download]".to_string(),
    });

    Progress {
      percent,
      speed,
      eta,
      status,
      destination: self.current_destination.clone(),
      file_extension: None,
    }
  }

  /// yt-dlp emits many informational lines with no progress content; only
  /// lines carrying a `[download]` marker, a non-zero percent, or a
  /// speed/eta value reach the event sink.
  pub fn is_reportable(line: &str, progress: &Progress) -> bool {
    line.contains("[download]")
      || progress.percent.is_some_and(|p| p > 0.0)
      || progress.speed.is_some()
      || progress.eta.is_some()
  }
}

impl Default for ProgressParser {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  // --- LineReader ---

  #[tokio::test]
  async fn reader_splits_on_newline() {
    let mut reader = LineReader::new(&b"one\ntwo\nthree\n"[..]);
    assert_eq!(reader.next_line().await.as_deref(), Some("one"));
    assert_eq!(reader.next_line().await.as_deref(), Some("two"));
    assert_eq!(reader.next_line().await.as_deref(), Some("three"));
    assert_eq!(reader.next_line().await, None);
  }

  #[tokio::test]
  async fn reader_treats_carriage_return_as_terminator() {
    let mut reader = LineReader::new(&b"45.1%\r46.2%\r"[..]);
    assert_eq!(reader.next_line().await.as_deref(), Some("45.1%"));
    assert_eq!(reader.next_line().await.as_deref(), Some("46.2%"));
    assert_eq!(reader.next_line().await, None);
  }

  #[tokio::test]
  async fn reader_crlf_yields_empty_interstitial_line() {
    let mut reader = LineReader::new(&b"line\r\nnext"[..]);
    assert_eq!(reader.next_line().await.as_deref(), Some("line"));
    assert_eq!(reader.next_line().await.as_deref(), Some(""));
    assert_eq!(reader.next_line().await.as_deref(), Some("next"));
    assert_eq!(reader.next_line().await, None);
  }

  #[tokio::test]
  async fn reader_flushes_trailing_partial_line() {
    let mut reader = LineReader::new(&b"done\npartial"[..]);
    assert_eq!(reader.next_line().await.as_deref(), Some("done"));
    assert_eq!(reader.next_line().await.as_deref(), Some("partial"));
    assert_eq!(reader.next_line().await, None);
  }

  #[tokio::test]
  async fn reader_passes_invalid_utf8_through_lossily() {
    let mut reader = LineReader::new(&b"ok\n\xff\xfe%\n"[..]);
    assert_eq!(reader.next_line().await.as_deref(), Some("ok"));
    let lossy = reader.next_line().await.unwrap();
    assert!(lossy.ends_with('%'));
    assert_eq!(reader.next_line().await, None);
  }

  // --- ProgressParser ---

  #[test]
  fn parses_full_download_line() {
    let mut parser = ProgressParser::new();
    let p = parser.parse_line("[download]  45.3% of 10.00MiB at 2.50MiB/s ETA 00:12");
    assert_eq!(p.percent, Some(45.3));
    assert_eq!(p.speed.as_deref(), Some("2.50MiB/s"));
    assert_eq!(p.eta.as_deref(), Some("00:12"));
    assert_eq!(p.status.as_deref(), Some("[download]"));
  }

  #[test]
  fn percent_extracted_exactly() {
    let mut parser = ProgressParser::new();
    assert_eq!(parser.parse_line("[download]  0.1%").percent, Some(0.1));
    assert_eq!(parser.parse_line("[download] 100%").percent, Some(100.0));
    assert_eq!(parser.parse_line("at 99.9% now").percent, Some(99.9));
  }

  #[test]
  fn specific_percent_pattern_wins_over_generic() {
    let mut parser = ProgressParser::new();
    // The generic pattern would match "99%" first; the [download] pattern
    // must take precedence.
    let p = parser.parse_line("99% noise [download]  12.5% of 3MiB");
    assert_eq!(p.percent, Some(12.5));
  }

  #[test]
  fn no_percent_means_no_claim() {
    let mut parser = ProgressParser::new();
    let p = parser.parse_line("[download] Resuming download");
    assert_eq!(p.percent, None);
    assert_eq!(p.status, None);
  }

  #[test]
  fn eta_hours_form() {
    let mut parser = ProgressParser::new();
    let p = parser.parse_line("[download]  3.0% of 1.20GiB at 512.00KiB/s ETA 1:02:33");
    assert_eq!(p.eta.as_deref(), Some("1:02:33"));
    assert_eq!(p.speed.as_deref(), Some("512.00KiB/s"));
  }

  #[test]
  fn speed_without_binary_prefix() {
    let mut parser = ProgressParser::new();
    let p = parser.parse_line("pulling at 987.0B/s right now");
    assert_eq!(p.speed.as_deref(), Some("987.0B/s"));
  }

  #[test]
  fn destination_remembered_across_lines() {
    let mut parser = ProgressParser::new();
    let first = parser.parse_line("[download] Destination: /tmp/My Video.mp4");
    assert_eq!(first.destination.as_deref(), Some("/tmp/My Video.mp4"));

    let later = parser.parse_line("[download]  10.0% of 5MiB");
    assert_eq!(later.destination.as_deref(), Some("/tmp/My Video.mp4"));
    assert_eq!(later.status.as_deref(), Some("[download] video"));

    let replaced = parser.parse_line("[download] Destination: /tmp/track.mp3");
    assert_eq!(replaced.destination.as_deref(), Some("/tmp/track.mp3"));
    let after = parser.parse_line("[download]  55.5%");
    assert_eq!(after.destination.as_deref(), Some("/tmp/track.mp3"));
    assert_eq!(after.status.as_deref(), Some("[download] audio"));
  }

  #[test]
  fn format_token_updates_status_label() {
    let mut parser = ProgressParser::new();
    parser.parse_line("[info] Downloading format 137");
    let p = parser.parse_line("[download]  20.0%");
    assert_eq!(p.status.as_deref(), Some("[download] format 137"));
  }

  #[test]
  fn reportable_rules() {
    let mut parser = ProgressParser::new();

    let info = parser.parse_line("[youtube] abc: Downloading webpage");
    assert!(!ProgressParser::is_reportable("[youtube] abc: Downloading webpage", &info));

    let marker = parser.parse_line("[download] Destination: /tmp/a.mp4");
    assert!(ProgressParser::is_reportable("[download] Destination: /tmp/a.mp4", &marker));

    let bare_speed = parser.parse_line("retrieving at 1.2MiB/s");
    assert!(ProgressParser::is_reportable("retrieving at 1.2MiB/s", &bare_speed));

    // A zero percent alone makes no progress claim.
    let zero = parser.parse_line("starting 0.0% warmup");
    assert!(!ProgressParser::is_reportable("starting 0.0% warmup", &zero));
  }
}
