use anyhow::Result;
use ratatui::widgets::ListState;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::config::Config;
use crate::download::{
  self, DownloadEvent, DownloadOption, DownloadOutcome, DownloadRequest, DownloadSettings, PostProcessing,
};
use crate::formats::{self, FormatItem, FormatKind, FormatLists};
use crate::history;
use crate::journal::{Journal, UnfinishedDownload};
use crate::process::ProcManager;
use crate::progress::Progress;
use crate::search::{self, SearchItem};

// --- Types ---

pub type SearchResult = Option<Vec<SearchItem>>;
pub type FormatsResult = Option<FormatLists>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
  Input,
  Results,
  Formats,
  Download,
  Resume,
}

/// Which format list is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatTab {
  Video,
  Audio,
  Thumbnail,
}

impl FormatTab {
  pub const ALL: [FormatTab; 3] = [FormatTab::Video, FormatTab::Audio, FormatTab::Thumbnail];

  pub fn label(self) -> &'static str {
    match self {
      FormatTab::Video => "Video",
      FormatTab::Audio => "Audio",
      FormatTab::Thumbnail => "Thumbnail",
    }
  }

  pub fn next(self) -> Self {
    match self {
      FormatTab::Video => FormatTab::Audio,
      FormatTab::Audio => FormatTab::Thumbnail,
      FormatTab::Thumbnail => FormatTab::Video,
    }
  }

  pub fn index(self) -> usize {
    match self {
      FormatTab::Video => 0,
      FormatTab::Audio => 1,
      FormatTab::Thumbnail => 2,
    }
  }
}

/// Progress state shown while a download runs. Fields update from
/// whatever each event carries; an absent field keeps its last value.
#[derive(Default)]
pub struct DownloadView {
  pub percent: f64,
  pub speed: Option<String>,
  pub eta: Option<String>,
  pub status: Option<String>,
  pub destination: Option<String>,
  pub file_extension: Option<String>,
  pub outcome: Option<DownloadOutcome>,
}

impl DownloadView {
  pub fn apply(&mut self, progress: Progress) {
    if let Some(percent) = progress.percent {
      self.percent = percent;
    }
    if progress.speed.is_some() {
      self.speed = progress.speed;
    }
    if progress.eta.is_some() {
      self.eta = progress.eta;
    }
    if progress.status.is_some() {
      self.status = progress.status;
    }
    if progress.destination.is_some() {
      self.destination = progress.destination;
    }
    if progress.file_extension.is_some() {
      self.file_extension = progress.file_extension;
    }
  }
}

// --- App State ---

pub struct App {
  pub config: Config,
  pub journal: Journal,
  /// Manager for search and metadata invocations.
  pub fetch_manager: Arc<ProcManager>,
  /// Manager for the (single) active download.
  pub download_manager: Arc<ProcManager>,

  pub mode: AppMode,
  pub input: String,
  pub cursor_position: usize,
  pub input_scroll: usize,
  history_entries: Vec<String>,
  history_index: Option<usize>,

  pub search_results: Vec<SearchItem>,
  pub results_state: ListState,

  pub formats: Option<FormatLists>,
  pub formats_tab: FormatTab,
  pub formats_state: ListState,
  pub current_url: String,
  pub current_title: String,

  pub download: DownloadView,

  pub resume_items: Vec<UnfinishedDownload>,
  pub resume_state: ListState,

  pub last_error: Option<String>,
  pub status_message: Option<String>,
  pub should_quit: bool,

  search_rx: Option<oneshot::Receiver<Result<SearchResult>>>,
  formats_rx: Option<oneshot::Receiver<Result<FormatsResult>>>,
  download_rx: Option<mpsc::UnboundedReceiver<DownloadEvent>>,
}

impl App {
  pub fn new(config: Config) -> Self {
    let history_entries = history::load(&history::default_path());
    Self {
      config,
      journal: Journal::open_default(),
      fetch_manager: Arc::new(ProcManager::new()),
      download_manager: Arc::new(ProcManager::new()),
      mode: AppMode::Input,
      input: String::new(),
      cursor_position: 0,
      input_scroll: 0,
      history_entries,
      history_index: None,
      search_results: Vec::new(),
      results_state: ListState::default(),
      formats: None,
      formats_tab: FormatTab::Video,
      formats_state: ListState::default(),
      current_url: String::new(),
      current_title: String::new(),
      download: DownloadView::default(),
      resume_items: Vec::new(),
      resume_state: ListState::default(),
      last_error: None,
      status_message: None,
      should_quit: false,
      search_rx: None,
      formats_rx: None,
      download_rx: None,
    }
  }

  pub fn is_fetching(&self) -> bool {
    self.search_rx.is_some() || self.formats_rx.is_some()
  }

  // --- Pending results ---

  pub fn check_pending(&mut self) {
    if let Some(mut rx) = self.search_rx.take() {
      match rx.try_recv() {
        Ok(result) => {
          self.status_message = None;
          match result {
            // Cancelled — nothing to report.
            Ok(None) => {}
            Ok(Some(results)) if results.is_empty() => {
              self.last_error = Some("No results found.".to_string());
            }
            Ok(Some(results)) => {
              self.search_results = results;
              self.results_state.select(Some(0));
              self.mode = AppMode::Results;
            }
            Err(e) => {
              self.last_error = Some(format!("Search failed: {e:#}"));
            }
          }
        }
        Err(oneshot::error::TryRecvError::Empty) => {
          self.search_rx = Some(rx);
        }
        Err(oneshot::error::TryRecvError::Closed) => {
          self.status_message = None;
          self.last_error = Some("Search task failed.".to_string());
        }
      }
    }

    if let Some(mut rx) = self.formats_rx.take() {
      match rx.try_recv() {
        Ok(result) => {
          self.status_message = None;
          match result {
            Ok(None) => {}
            Ok(Some(lists)) => {
              info!(total = lists.all.len(), video = lists.video.len(), audio = lists.audio.len(), "app: formats fetched");
              if !lists.info.title.is_empty() {
                self.current_title = lists.info.title.clone();
              }
              self.formats = Some(lists);
              self.formats_tab = FormatTab::Video;
              self.formats_state.select(Some(0));
              self.mode = AppMode::Formats;
            }
            Err(e) => {
              self.last_error = Some(format!("Format fetch failed: {e:#}"));
            }
          }
        }
        Err(oneshot::error::TryRecvError::Empty) => {
          self.formats_rx = Some(rx);
        }
        Err(oneshot::error::TryRecvError::Closed) => {
          self.status_message = None;
          self.last_error = Some("Format fetch task failed.".to_string());
        }
      }
    }

    if let Some(rx) = self.download_rx.as_mut() {
      while let Ok(event) = rx.try_recv() {
        match event {
          DownloadEvent::Progress(progress) => self.download.apply(progress),
          DownloadEvent::Done(outcome) => {
            if outcome == DownloadOutcome::Complete {
              self.download.percent = 100.0;
            }
            self.download.outcome = Some(outcome);
          }
        }
      }
    }
  }

  // --- Triggers ---

  pub fn trigger_search(&mut self) {
    let query = self.input.trim().to_string();
    if query.is_empty() {
      self.last_error = Some("Enter a search term or URL.".to_string());
      return;
    }
    self.last_error = None;
    self.history_index = None;

    if let Err(e) = history::push(&history::default_path(), &query) {
      warn!(err = %e, "app: failed to save history");
    }
    self.history_entries.retain(|e| e != &query);
    self.history_entries.insert(0, query.clone());

    if search::is_url(&query) {
      self.trigger_formats(query.clone(), query);
      return;
    }

    self.status_message = Some(format!("Searching '{query}'…"));
    let manager = Arc::clone(&self.fetch_manager);
    let yt_dlp_path = self.config.yt_dlp_path.clone();
    let limit = self.config.search_limit;

    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
      let _ = tx.send(search::run_search(manager, &yt_dlp_path, limit, &query).await);
    });
    self.search_rx = Some(rx);
  }

  pub fn trigger_formats(&mut self, url: String, title: String) {
    self.last_error = None;
    self.status_message = Some("Fetching formats…".to_string());
    self.current_url = url.clone();
    self.current_title = title;

    let manager = Arc::clone(&self.fetch_manager);
    let yt_dlp_path = self.config.yt_dlp_path.clone();

    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
      let _ = tx.send(formats::fetch_formats(manager, &yt_dlp_path, &url).await);
    });
    self.formats_rx = Some(rx);
  }

  pub fn cancel_fetch(&mut self) {
    if let Err(e) = self.fetch_manager.cancel() {
      warn!(err = %e, "app: failed to cancel fetch");
    }
    // The receivers stay in place: the task still clears the manager and
    // reports back, and `is_fetching` keeps gating new invocations until
    // then.
    self.status_message = Some("Cancelled.".to_string());
  }

  /// The format list currently on screen.
  pub fn visible_formats(&self) -> &[FormatItem] {
    let Some(lists) = self.formats.as_ref() else {
      return &[];
    };
    match self.formats_tab {
      FormatTab::Video => &lists.video,
      FormatTab::Audio => &lists.audio,
      FormatTab::Thumbnail => &lists.thumbnail,
    }
  }

  pub fn selected_format(&self) -> Option<&FormatItem> {
    self.visible_formats().get(self.formats_state.selected()?)
  }

  pub fn next_format_tab(&mut self) {
    self.formats_tab = self.formats_tab.next();
    let select = if self.visible_formats().is_empty() { None } else { Some(0) };
    self.formats_state.select(select);
  }

  fn download_options(&self) -> Vec<DownloadOption> {
    vec![
      DownloadOption { kind: PostProcessing::EmbedSubtitles, enabled: self.config.embed_subtitles },
      DownloadOption { kind: PostProcessing::EmbedMetadata, enabled: self.config.embed_metadata },
      DownloadOption { kind: PostProcessing::EmbedChapters, enabled: self.config.embed_chapters },
    ]
  }

  pub fn trigger_download(&mut self) {
    let Some(item) = self.selected_format() else {
      return;
    };
    let audio_only = item.kind == FormatKind::AudioOnly;
    let abr = if item.abr > 0.0 { item.abr } else { f64::from(self.config.audio_bitrate) };

    let req = DownloadRequest {
      url: self.current_url.clone(),
      format_id: item.format_id.clone(),
      audio_only,
      abr,
      cookies_from_browser: String::new(),
      cookies_file: String::new(),
      options: self.download_options(),
    };
    self.start_download(self.current_title.clone(), req);
  }

  pub fn start_download(&mut self, title: String, req: DownloadRequest) {
    // One live download per manager; new invocations are gated here.
    if self.download_manager.is_active() {
      self.last_error = Some("A download is already in progress.".to_string());
      return;
    }
    if let Some(earlier) = self.journal.find(&req.url) {
      info!(url = %req.url, earlier_format = %earlier.format_id, "app: re-downloading an unfinished entry");
    }
    info!(url = %req.url, format = %req.format_id, "app: starting download");
    self.last_error = None;
    self.download = DownloadView::default();
    self.mode = AppMode::Download;

    let manager = Arc::clone(&self.download_manager);
    let journal = self.journal.clone();
    let settings = DownloadSettings::from_config(&self.config);

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(download::run_download(manager, journal, settings, title, req, tx));
    self.download_rx = Some(rx);
  }

  pub fn cancel_download(&mut self) {
    if let Err(e) = self.download_manager.cancel() {
      warn!(err = %e, "app: failed to cancel download");
    }
  }

  pub fn close_download_view(&mut self) {
    self.download_rx = None;
    self.download = DownloadView::default();
    self.mode = if self.formats.is_some() {
      AppMode::Formats
    } else if self.search_results.is_empty() {
      AppMode::Input
    } else {
      AppMode::Results
    };
  }

  // --- Resume ---

  pub fn open_resume(&mut self) {
    let mut items = self.journal.load();
    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let select = if items.is_empty() { None } else { Some(0) };
    self.resume_items = items;
    self.resume_state.select(select);
    self.mode = AppMode::Resume;
  }

  pub fn resume_selected(&mut self) {
    let Some(item) = self.resume_state.selected().and_then(|i| self.resume_items.get(i)).cloned() else {
      return;
    };
    let req = DownloadRequest {
      url: item.url.clone(),
      format_id: item.format_id.clone(),
      audio_only: false,
      abr: f64::from(self.config.audio_bitrate),
      cookies_from_browser: String::new(),
      cookies_file: String::new(),
      options: self.download_options(),
    };
    self.current_url = item.url.clone();
    self.current_title = item.title.clone();
    self.start_download(item.title.clone(), req);
  }

  pub fn delete_resume_selected(&mut self) {
    let Some(item) = self.resume_state.selected().and_then(|i| self.resume_items.get(i)) else {
      return;
    };
    if let Err(e) = self.journal.remove(&item.url) {
      warn!(err = %e, "app: failed to remove unfinished entry");
    }
    let selected = self.resume_state.selected().unwrap_or(0);
    self.open_resume();
    if !self.resume_items.is_empty() {
      self.resume_state.select(Some(selected.min(self.resume_items.len() - 1)));
    }
  }

  // --- History navigation ---

  pub fn history_prev(&mut self) {
    if self.history_entries.is_empty() {
      return;
    }
    let next_index = match self.history_index {
      None => 0,
      Some(i) if i + 1 < self.history_entries.len() => i + 1,
      Some(i) => i,
    };
    self.history_index = Some(next_index);
    self.set_input(self.history_entries[next_index].clone());
  }

  pub fn history_next(&mut self) {
    match self.history_index {
      Some(0) | None => {
        self.history_index = None;
        self.set_input(String::new());
      }
      Some(i) => {
        self.history_index = Some(i - 1);
        self.set_input(self.history_entries[i - 1].clone());
      }
    }
  }

  pub fn history_index_active(&self) -> bool {
    self.history_index.is_some()
  }

  pub fn set_input(&mut self, input: String) {
    self.cursor_position = input.chars().count();
    self.input = input;
    self.input_scroll = 0;
  }

  /// Kill anything still running before the terminal is restored.
  pub fn shutdown(&self) {
    self.fetch_manager.cancel_quietly();
    self.download_manager.cancel_quietly();
  }
}
