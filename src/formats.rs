use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::info;

use crate::process::ProcManager;

/// Preferred standalone audio track for merged descriptors: format 140
/// (m4a 128k), falling back to 251 (opus) only when 140 is absent.
const PREFERRED_AUDIO_ID: &str = "140";
const FALLBACK_AUDIO_ID: &str = "251";

// --- Raw yt-dlp metadata ---

/// One entry of the `-J` top-level `formats` array. Every field is
/// optional — extractors differ wildly in what they emit, and a missing
/// field defaults rather than failing the whole document.
#[derive(Debug, Deserialize, Default)]
pub struct RawFormat {
  pub format_id: Option<String>,
  pub ext: Option<String>,
  pub resolution: Option<String>,
  pub acodec: Option<String>,
  pub vcodec: Option<String>,
  pub abr: Option<f64>,
  pub fps: Option<f64>,
  pub tbr: Option<f64>,
  pub filesize: Option<f64>,
  pub filesize_approx: Option<f64>,
  pub language: Option<String>,
  pub lang: Option<String>,
}

/// The `-J` document: top-level video metadata plus the format list.
/// `view_count` and `duration` stay as raw JSON values; extractors emit
/// numbers, numeric strings, or nothing.
#[derive(Debug, Deserialize, Default)]
pub struct RawMetadata {
  pub id: Option<String>,
  pub title: Option<String>,
  pub uploader: Option<String>,
  pub view_count: Option<Value>,
  pub duration: Option<Value>,
  #[serde(default)]
  pub formats: Vec<RawFormat>,
}

// --- Classified output ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
  VideoAudio,
  VideoOnly,
  AudioOnly,
  Thumbnail,
  /// Synthesized pairing of a video-only stream with the preferred audio
  /// track under a compound `videoId+audioId`.
  Merged,
  Unknown,
}

impl FormatKind {
  pub fn label(self) -> &'static str {
    match self {
      FormatKind::VideoAudio => "video+audio",
      FormatKind::VideoOnly => "video-only",
      FormatKind::AudioOnly => "audio-only",
      FormatKind::Thumbnail => "thumbnail",
      FormatKind::Merged => "video-only+audio-only",
      FormatKind::Unknown => "unknown",
    }
  }
}

/// One selectable stream variant surfaced to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatItem {
  pub title: String,
  pub format_id: String,
  pub size: String,
  pub language: String,
  pub resolution: String,
  pub kind: FormatKind,
  pub abr: f64,
}

/// Top-level video summary pulled from the same `-J` document.
#[derive(Debug, Clone, Default)]
pub struct VideoInfo {
  pub id: String,
  pub title: String,
  pub channel: String,
  pub views: f64,
  pub duration: f64,
  pub desc: String,
}

#[derive(Debug, Default)]
pub struct FormatLists {
  pub video: Vec<FormatItem>,
  pub audio: Vec<FormatItem>,
  pub thumbnail: Vec<FormatItem>,
  /// Everything, including unselectable unknowns, for diagnostics.
  pub all: Vec<FormatItem>,
  pub info: VideoInfo,
}

// --- Fetch ---

/// Run one metadata-only invocation and classify its output.
///
/// Returns `Ok(None)` when the invocation was cancelled — a killed
/// process leaves partial output behind, and parsing it would report
/// garbage the user explicitly asked not to see.
pub async fn fetch_formats(manager: Arc<ProcManager>, yt_dlp_path: &str, url: &str) -> Result<Option<FormatLists>> {
  let yt_dlp = if yt_dlp_path.is_empty() { "yt-dlp" } else { yt_dlp_path };

  let mut child = Command::new(yt_dlp)
    .args(["-J", url])
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

  // One JSON document, read to completion — no streaming needed.
  let mut out = Vec::new();
  let read_result = stdout.read_to_end(&mut out).await;

  let status = manager.wait().await;
  if manager.clear_and_check_cancelled() {
    info!(url = %url, "formats: fetch cancelled, suppressing result");
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
  if out.is_empty() {
    bail!("no format data returned");
  }

  let meta: RawMetadata = serde_json::from_slice(&out).context("failed to decode formats JSON")?;
  Ok(Some(classify_formats(&meta)))
}

// --- Classification ---

fn has_video(f: &RawFormat) -> bool {
  matches!(f.vcodec.as_deref(), Some(v) if v != "none" && !v.is_empty())
}

fn has_audio(f: &RawFormat) -> bool {
  matches!(f.acodec.as_deref(), Some(a) if a != "none" && !a.is_empty())
}

fn classify_kind(f: &RawFormat, ext: &str) -> FormatKind {
  if has_video(f) {
    if has_audio(f) { FormatKind::VideoAudio } else { FormatKind::VideoOnly }
  } else if has_audio(f) {
    FormatKind::AudioOnly
  } else if ext == "mhtml" {
    // Storyboard thumbnail sheets come through as mhtml containers.
    FormatKind::Thumbnail
  } else {
    FormatKind::Unknown
  }
}

fn lang_of(f: &RawFormat) -> String {
  if let Some(l) = f.language.as_deref()
    && !l.is_empty()
  {
    return l.to_string();
  }
  if let Some(l) = f.lang.as_deref()
    && !l.is_empty()
  {
    return l.to_string();
  }
  String::new()
}

fn preferred_audio(formats: &[RawFormat]) -> (String, String) {
  let has_id = |id: &str| formats.iter().any(|f| f.format_id.as_deref() == Some(id));

  let audio_id =
    if !has_id(PREFERRED_AUDIO_ID) && has_id(FALLBACK_AUDIO_ID) { FALLBACK_AUDIO_ID } else { PREFERRED_AUDIO_ID };

  let language =
    formats.iter().find(|f| f.format_id.as_deref() == Some(audio_id)).map(lang_of).unwrap_or_default();

  (audio_id.to_string(), language)
}

/// Map a `WxH` resolution to a quality label. Anything unparseable
/// passes through unchanged.
pub fn quality_label(resolution: &str) -> String {
  if resolution.is_empty() || resolution == "?" {
    return resolution.to_string();
  }
  let Some((_, height)) = resolution.split_once('x') else {
    return resolution.to_string();
  };
  let Ok(height) = height.parse::<u32>() else {
    return resolution.to_string();
  };

  match height {
    h if h >= 4320 => "8k",
    h if h >= 2160 => "4k",
    h if h >= 1440 => "2k",
    h if h >= 1080 => "1080p",
    h if h >= 720 => "720p",
    h if h >= 480 => "480p",
    h if h >= 360 => "360p",
    h if h >= 240 => "240p",
    h if h >= 144 => "144p",
    _ => return resolution.to_string(),
  }
  .to_string()
}

fn bytes_to_human(bytes: f64) -> String {
  if bytes <= 0.0 {
    return "unknown size".to_string();
  }
  const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
  let mut size = bytes;
  let mut unit = 0;
  while size >= 1024.0 && unit < UNITS.len() - 1 {
    size /= 1024.0;
    unit += 1;
  }
  if unit == 0 { format!("{size:.0}{}", UNITS[unit]) } else { format!("{size:.1}{}", UNITS[unit]) }
}

fn format_bitrate(tbr: f64) -> String {
  if tbr >= 1000.0 { format!("{:.1}M", tbr / 1000.0) } else { format!("{tbr:.0}k") }
}

pub(crate) fn parse_float(v: Option<&Value>) -> f64 {
  match v {
    Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
    Some(Value::String(s)) => s.parse().unwrap_or(0.0),
    _ => 0.0,
  }
}

pub(crate) fn format_views(views: f64) -> String {
  if views >= 1e9 {
    format!("{:.1}B", views / 1e9)
  } else if views >= 1e6 {
    format!("{:.1}M", views / 1e6)
  } else if views >= 1e3 {
    format!("{:.1}K", views / 1e3)
  } else {
    format!("{views:.0}")
  }
}

pub(crate) fn format_duration(secs: f64) -> String {
  let total = secs.max(0.0) as u64;
  let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
  if h > 0 { format!("{h}:{m:02}:{s:02}") } else { format!("{m}:{s:02}") }
}

pub(crate) fn truncate_channel(channel: &str) -> String {
  if channel.chars().count() > 30 {
    format!("{}...", channel.chars().take(27).collect::<String>())
  } else {
    channel.to_string()
  }
}

fn extract_video_info(meta: &RawMetadata) -> VideoInfo {
  let views = parse_float(meta.view_count.as_ref());
  let duration = parse_float(meta.duration.as_ref());
  let channel = truncate_channel(meta.uploader.as_deref().unwrap_or_default());
  let desc = format!("{} • {} views • {}", format_duration(duration), format_views(views), channel);

  VideoInfo {
    id: meta.id.clone().unwrap_or_default(),
    title: meta.title.clone().unwrap_or_default(),
    channel,
    views,
    duration,
    desc,
  }
}

/// Classify every format entry and synthesize merged descriptors.
pub fn classify_formats(meta: &RawMetadata) -> FormatLists {
  let formats = &meta.formats;

  // Language tags are only worth the visual noise when there is an
  // actual choice of spoken audio tracks.
  let mut audio_languages: HashSet<String> = HashSet::new();
  for f in formats {
    if has_audio(f) {
      let lang = lang_of(f);
      if !lang.is_empty() && lang != "und" {
        audio_languages.insert(lang);
      }
    }
  }
  let show_language = audio_languages.len() > 1;

  let mut lists = FormatLists { info: extract_video_info(meta), ..Default::default() };

  for f in formats {
    let Some(format_id) = f.format_id.as_deref().filter(|s| !s.is_empty()) else {
      continue;
    };
    let Some(ext) = f.ext.as_deref().filter(|s| !s.is_empty()) else {
      continue;
    };

    let mut resolution = f.resolution.clone().unwrap_or_default();
    if resolution.is_empty() || resolution == "Unknown" {
      resolution = "?".to_string();
    }

    let abr = f.abr.unwrap_or(0.0);
    let fps = f.fps.unwrap_or(0.0);
    let tbr = f.tbr.unwrap_or(0.0);
    let kind = classify_kind(f, ext);

    let mut size = f.filesize.unwrap_or(0.0);
    if size == 0.0 {
      size = f.filesize_approx.unwrap_or(0.0);
    }

    let lang = if show_language {
      let l = lang_of(f);
      if l.is_empty() || l == "und" { "unknown".to_string() } else { l }
    } else {
      String::new()
    };

    let mut title = match kind {
      FormatKind::AudioOnly => {
        if abr > 0.0 {
          format!("{}k", abr as u32)
        } else {
          ext.to_string()
        }
      }
      FormatKind::Thumbnail => quality_label(&resolution),
      _ => {
        let mut quality = quality_label(&resolution);
        if fps > 0.0 {
          quality = format!("{quality}{fps:.0}");
        }
        if tbr > 0.0 {
          quality = format!("{quality} @{}", format_bitrate(tbr));
        }
        format!("{quality} {ext}")
      }
    };
    if show_language && has_audio(f) {
      title = format!("{title} [{lang}]");
    }

    let item = FormatItem {
      title,
      format_id: format_id.to_string(),
      size: bytes_to_human(size),
      language: lang,
      resolution,
      kind,
      abr,
    };

    lists.all.push(item.clone());
    match kind {
      FormatKind::VideoAudio => {
        // The bottom tiers are not worth offering.
        if !item.title.contains("144p") && !item.title.contains("240p") {
          lists.video.push(item);
        }
      }
      FormatKind::AudioOnly => lists.audio.push(item),
      FormatKind::Thumbnail => lists.thumbnail.push(item),
      _ => {}
    }
  }

  let (audio_id, audio_lang) = preferred_audio(formats);
  for f in formats {
    let Some(format_id) = f.format_id.as_deref().filter(|s| !s.is_empty()) else {
      continue;
    };
    if !has_video(f) || has_audio(f) {
      continue;
    }

    let resolution = f.resolution.clone().unwrap_or_default();
    let quality = quality_label(&resolution);
    if quality == "144p" || quality == "240p" {
      continue;
    }

    let fps = f.fps.unwrap_or(0.0);
    let tbr = f.tbr.unwrap_or(0.0);
    let mut title = if fps > 0.0 { format!("{quality}{fps:.0}") } else { quality };
    if tbr > 0.0 {
      title = format!("{title} @{}", format_bitrate(tbr));
    }
    title = format!("{title} mp4");
    if !audio_lang.is_empty() && audio_lang != "und" {
      title = format!("{title} [{audio_lang}]");
    }

    lists.video.push(FormatItem {
      title,
      format_id: format!("{format_id}+{audio_id}"),
      size: "unknown size".to_string(),
      language: audio_lang.clone(),
      resolution,
      kind: FormatKind::Merged,
      abr: 0.0,
    });
  }

  lists
}
