use directories::ProjectDirs;
use std::path::PathBuf;

/// Data directory for the journal, history, and log files.
/// Falls back to the current directory when the platform dirs are unavailable.
pub fn data_dir() -> PathBuf {
  if let Some(proj_dirs) = ProjectDirs::from("", "", "ytd") {
    let dir = proj_dirs.data_dir().to_path_buf();
    if std::fs::create_dir_all(&dir).is_ok() {
      return dir;
    }
  }
  PathBuf::from(".")
}

pub fn config_dir() -> PathBuf {
  if let Some(proj_dirs) = ProjectDirs::from("", "", "ytd") {
    return proj_dirs.config_dir().to_path_buf();
  }
  PathBuf::from(".")
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
  if let Some(rest) = path.strip_prefix("~/")
    && let Some(base) = directories::BaseDirs::new()
  {
    return base.home_dir().join(rest);
  }
  PathBuf::from(path)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn expand_tilde_plain_path_unchanged() {
    assert_eq!(expand_tilde("/tmp/videos"), PathBuf::from("/tmp/videos"));
    assert_eq!(expand_tilde("relative/dir"), PathBuf::from("relative/dir"));
  }

  #[test]
  fn expand_tilde_home_prefix() {
    let expanded = expand_tilde("~/Downloads");
    assert!(!expanded.to_string_lossy().starts_with("~/"));
    assert!(expanded.ends_with("Downloads"));
  }
}
