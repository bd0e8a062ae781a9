use anyhow::{Context, Result};
use std::process::ExitStatus;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::process::Child;
use tracing::warn;

/// How often `wait` polls for process exit. The mutex must never be held
/// across a suspension point, so exit is observed by non-blocking polls.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct ProcState {
  child: Option<Child>,
  cancelled: bool,
}

/// Lifecycle owner for at most one live external process.
///
/// One instance serves one use-case — the app keeps one for
/// search/metadata fetches and one for downloads. The cancelled flag is
/// the single source of truth for the cancel-versus-natural-completion
/// race: it is set under the same lock that `clear_and_check_cancelled`
/// consults, so a concurrent cancel cannot be lost.
pub struct ProcManager {
  state: Mutex<ProcState>,
}

impl ProcManager {
  pub fn new() -> Self {
    Self { state: Mutex::new(ProcState::default()) }
  }

  fn lock(&self) -> MutexGuard<'_, ProcState> {
    // Safety: the lock is never held across an await point and no code
    // panics while holding it, so poisoning cannot occur in practice.
    self.state.lock().expect("process manager mutex poisoned")
  }

  /// Record a freshly spawned process. Callers gate invocations on UI
  /// state and start at most one at a time through one manager.
  pub fn set(&self, child: Child) {
    let mut state = self.lock();
    debug_assert!(state.child.is_none(), "manager already holds a process");
    state.child = Some(child);
  }

  pub fn is_active(&self) -> bool {
    self.lock().child.is_some()
  }

  /// Mark the current invocation cancelled and hard-kill its process.
  /// There is no graceful stop signal for yt-dlp. No-op success when
  /// idle. The flag is set before the kill is issued and stays set even
  /// if the kill fails.
  pub fn cancel(&self) -> Result<()> {
    let mut state = self.lock();
    if state.child.is_some() {
      state.cancelled = true;
      if let Some(child) = state.child.as_mut() {
        child.start_kill().context("failed to kill process")?;
      }
    }
    Ok(())
  }

  /// Drop the handle and reset the cancelled flag.
  pub fn clear(&self) {
    let mut state = self.lock();
    state.child = None;
    state.cancelled = false;
  }

  /// Atomically drop the handle, reset the flag, and report whether the
  /// just-finished invocation had been cancelled. The caller uses the
  /// answer to decide whether a result should be reported at all.
  pub fn clear_and_check_cancelled(&self) -> bool {
    let mut state = self.lock();
    let was_cancelled = state.cancelled;
    state.child = None;
    state.cancelled = false;
    was_cancelled
  }

  /// Non-blocking poll of the held process's exit status. `Ok(None)`
  /// means still running (or no process held).
  pub fn try_wait(&self) -> std::io::Result<Option<ExitStatus>> {
    let mut state = self.lock();
    match state.child.as_mut() {
      Some(child) => child.try_wait(),
      None => Ok(None),
    }
  }

  /// Await process exit by polling `try_wait`. Returns `None` when no
  /// process is held (or it was cleared out from under us).
  pub async fn wait(&self) -> std::io::Result<Option<ExitStatus>> {
    loop {
      if let Some(status) = self.try_wait()? {
        return Ok(Some(status));
      }
      if !self.is_active() {
        return Ok(None);
      }
      tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
  }

  /// Best-effort cancel used on shutdown; failures are logged, not returned.
  pub fn cancel_quietly(&self) {
    if let Err(e) = self.cancel() {
      warn!(err = %e, "process: cancel on shutdown failed");
    }
  }
}

impl Default for ProcManager {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use std::process::Stdio;
  use tokio::process::Command;

  fn spawn_sleep() -> Child {
    Command::new("sleep")
      .arg("5")
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .spawn()
      .expect("spawn sleep")
  }

  #[tokio::test]
  async fn cancel_then_clear_reports_cancelled_exactly_once() {
    let manager = ProcManager::new();
    manager.set(spawn_sleep());

    manager.cancel().unwrap();
    let status = manager.wait().await.unwrap();
    assert!(status.is_some());
    assert!(!status.unwrap().success());

    assert!(manager.clear_and_check_cancelled());
    // A second check without an intervening set must not claim cancellation.
    assert!(!manager.clear_and_check_cancelled());
  }

  #[tokio::test]
  async fn cancel_without_process_is_noop_success() {
    let manager = ProcManager::new();
    assert!(manager.cancel().is_ok());
    assert!(!manager.clear_and_check_cancelled());
  }

  #[tokio::test]
  async fn natural_exit_is_not_cancelled() {
    let manager = ProcManager::new();
    let child = Command::new("true")
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .spawn()
      .expect("spawn true");
    manager.set(child);

    let status = manager.wait().await.unwrap().expect("exit status");
    assert!(status.success());
    assert!(!manager.clear_and_check_cancelled());
  }

  #[tokio::test]
  async fn wait_without_process_returns_none() {
    let manager = ProcManager::new();
    assert!(manager.wait().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn is_active_tracks_handle() {
    let manager = ProcManager::new();
    assert!(!manager.is_active());
    manager.set(spawn_sleep());
    assert!(manager.is_active());
    manager.cancel().unwrap();
    let _ = manager.wait().await;
    manager.clear();
    assert!(!manager.is_active());
  }
}
