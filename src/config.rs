use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::paths;

/// User preferences, stored as TOML in the platform config directory.
/// Any load failure falls back to defaults — a broken config file must
/// never keep the app from starting.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
  pub download_path: String,
  pub yt_dlp_path: String,
  pub search_limit: usize,
  /// Target bitrate (kbit/s) for audio extraction.
  pub audio_bitrate: u32,
  /// Browser to pull cookies from (`--cookies-from-browser`). Wins over `cookies_file`.
  pub cookies_browser: String,
  /// Netscape cookie file path (`--cookies`).
  pub cookies_file: String,
  pub embed_subtitles: bool,
  pub embed_metadata: bool,
  pub embed_chapters: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      download_path: "~/Downloads".to_string(),
      yt_dlp_path: "yt-dlp".to_string(),
      search_limit: 20,
      audio_bitrate: 128,
      cookies_browser: String::new(),
      cookies_file: String::new(),
      embed_subtitles: false,
      embed_metadata: false,
      embed_chapters: false,
    }
  }
}

impl Config {
  fn file_path() -> PathBuf {
    paths::config_dir().join("config.toml")
  }

  pub fn load() -> Self {
    if let Ok(content) = std::fs::read_to_string(Self::file_path())
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }
    Self::default()
  }

  pub fn save(&self) {
    let config_dir = paths::config_dir();
    if std::fs::create_dir_all(&config_dir).is_ok()
      && let Ok(content) = toml::to_string(self)
    {
      let _ = std::fs::write(Self::file_path(), content);
    }
  }

  /// Download destination with `~/` expanded.
  pub fn download_dir(&self) -> PathBuf {
    paths::expand_tilde(&self.download_path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_is_usable() {
    let cfg = Config::default();
    assert_eq!(cfg.yt_dlp_path, "yt-dlp");
    assert_eq!(cfg.search_limit, 20);
    assert_eq!(cfg.audio_bitrate, 128);
    assert!(cfg.cookies_browser.is_empty());
  }

  #[test]
  fn partial_toml_fills_defaults() {
    let cfg: Config = toml::from_str("search_limit = 5").unwrap();
    assert_eq!(cfg.search_limit, 5);
    assert_eq!(cfg.yt_dlp_path, "yt-dlp");
    assert_eq!(cfg.download_path, "~/Downloads");
  }
}
