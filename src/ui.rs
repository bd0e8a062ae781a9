use ratatui::{
  Frame,
  layout::{Alignment, Constraint, Layout, Position, Rect},
  style::{Color, Modifier, Style},
  text::{Line, Span},
  widgets::{Block, BorderType, Gauge, List, ListItem, Paragraph, Tabs},
};

use crate::app::{App, AppMode, FormatTab};
use crate::download::DownloadOutcome;
use crate::input::char_to_byte_index;

const ACCENT: Color = Color::Cyan;
const MUTED: Color = Color::DarkGray;
const ERROR: Color = Color::Red;
const OK: Color = Color::Green;
const WARN: Color = Color::Yellow;

// --- Helpers ---

/// Display width of the first `n` chars (accounting for double-width CJK).
fn display_width(s: &str, n: usize) -> usize {
  use unicode_width::UnicodeWidthChar;
  s.chars().take(n).map(|c| c.width().unwrap_or(0)).sum()
}

/// Truncate a string to `max_width` characters, appending "…" if truncated.
fn truncate_str(s: &str, max_width: usize) -> String {
  if s.chars().count() <= max_width {
    s.to_string()
  } else {
    let truncated: String = s.chars().take(max_width.saturating_sub(1)).collect();
    format!("{truncated}…")
  }
}

fn bordered() -> Block<'static> {
  Block::bordered().border_type(BorderType::Rounded).border_style(Style::default().fg(MUTED))
}

// --- UI Rendering ---

pub fn ui(frame: &mut Frame, app: &mut App) {
  let [header_area, main_area, status_area, input_area, footer_area] = Layout::vertical([
    Constraint::Length(1),
    Constraint::Min(3),
    Constraint::Length(1),
    Constraint::Length(3),
    Constraint::Length(1),
  ])
  .areas(frame.area());

  render_header(frame, header_area);
  render_main(frame, app, main_area);
  render_status(frame, app, status_area);
  render_input(frame, app, input_area);
  render_footer(frame, app, footer_area);
}

fn render_header(frame: &mut Frame, area: Rect) {
  let left = Line::from(Span::styled(" ⇣ ytd ", Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)));
  frame.render_widget(left, area);

  let version = format!("v{} ", env!("CARGO_PKG_VERSION"));
  let right = Line::from(Span::styled(&version, Style::default().fg(MUTED)));
  let right_area =
    Rect { x: area.x + area.width.saturating_sub(version.len() as u16), width: version.len() as u16, ..area };
  frame.render_widget(right, right_area);
}

fn render_main(frame: &mut Frame, app: &mut App, area: Rect) {
  match app.mode {
    AppMode::Results => render_results(frame, app, area),
    AppMode::Formats => render_formats(frame, app, area),
    AppMode::Download => render_download(frame, app, area),
    AppMode::Resume => render_resume(frame, app, area),
    AppMode::Input => {
      if app.search_results.is_empty() {
        render_welcome(frame, area);
      } else {
        render_results(frame, app, area);
      }
    }
  }
}

fn render_welcome(frame: &mut Frame, area: Rect) {
  let text = vec![
    Line::from(""),
    Line::from(Span::styled("⇣  Welcome to ytd", Style::default().fg(ACCENT).add_modifier(Modifier::BOLD))),
    Line::from(""),
    Line::from("Search or paste a URL. Pick a format. Download."),
    Line::from(""),
    Line::from(Span::styled("Type a query below and press Enter. Ctrl+R resumes unfinished downloads.", Style::default().fg(MUTED))),
  ];
  frame.render_widget(Paragraph::new(text).alignment(Alignment::Center).block(bordered()), area);
}

fn render_results(frame: &mut Frame, app: &mut App, area: Rect) {
  let width = area.width.saturating_sub(4) as usize;
  let items: Vec<ListItem> = app
    .search_results
    .iter()
    .map(|item| {
      ListItem::new(vec![
        Line::from(truncate_str(&item.title, width)),
        Line::from(Span::styled(truncate_str(&item.desc, width), Style::default().fg(MUTED))),
      ])
    })
    .collect();

  let list = List::new(items)
    .block(bordered().title(" Results "))
    .highlight_style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD))
    .highlight_symbol("❯ ");
  frame.render_stateful_widget(list, area, &mut app.results_state);
}

fn render_formats(frame: &mut Frame, app: &mut App, area: Rect) {
  let [info_area, tabs_area, list_area] =
    Layout::vertical([Constraint::Length(2), Constraint::Length(1), Constraint::Min(1)]).areas(area);

  let (title, desc) = match app.formats.as_ref() {
    Some(lists) => (lists.info.title.clone(), lists.info.desc.clone()),
    None => (app.current_title.clone(), String::new()),
  };
  let info = vec![
    Line::from(Span::styled(truncate_str(&title, area.width as usize), Style::default().add_modifier(Modifier::BOLD))),
    Line::from(Span::styled(truncate_str(&desc, area.width as usize), Style::default().fg(MUTED))),
  ];
  frame.render_widget(Paragraph::new(info), info_area);

  let tabs = Tabs::new(FormatTab::ALL.iter().map(|t| t.label()))
    .style(Style::default().fg(MUTED))
    .highlight_style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD))
    .select(app.formats_tab.index());
  frame.render_widget(tabs, tabs_area);

  let width = list_area.width.saturating_sub(4) as usize;
  let items: Vec<ListItem> = app
    .visible_formats()
    .iter()
    .map(|item| {
      let line = Line::from(vec![
        Span::raw(truncate_str(&item.title, width.saturating_sub(28))),
        Span::styled(format!("  {}  {}", item.size, item.kind.label()), Style::default().fg(MUTED)),
      ]);
      ListItem::new(line)
    })
    .collect();

  let list = List::new(items)
    .block(bordered())
    .highlight_style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD))
    .highlight_symbol("❯ ");
  frame.render_stateful_widget(list, list_area, &mut app.formats_state);
}

fn render_download(frame: &mut Frame, app: &mut App, area: Rect) {
  let [title_area, gauge_area, detail_area] =
    Layout::vertical([Constraint::Length(2), Constraint::Length(3), Constraint::Min(1)]).areas(area);

  let heading = match &app.download.outcome {
    None => Span::styled("⇣ Downloading", Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)),
    Some(DownloadOutcome::Complete) => Span::styled("Download complete", Style::default().fg(OK).add_modifier(Modifier::BOLD)),
    Some(DownloadOutcome::Cancelled) => Span::styled("Download cancelled", Style::default().fg(WARN).add_modifier(Modifier::BOLD)),
    Some(DownloadOutcome::Failed(_)) => Span::styled("Download failed", Style::default().fg(ERROR).add_modifier(Modifier::BOLD)),
  };
  let title = vec![
    Line::from(heading),
    Line::from(Span::styled(truncate_str(&app.current_title, area.width as usize), Style::default().fg(MUTED))),
  ];
  frame.render_widget(Paragraph::new(title), title_area);

  let gauge = Gauge::default()
    .block(bordered())
    .gauge_style(Style::default().fg(ACCENT))
    .ratio((app.download.percent / 100.0).clamp(0.0, 1.0))
    .label(format!("{:.1}%", app.download.percent));
  frame.render_widget(gauge, gauge_area);

  let mut lines = Vec::new();
  match &app.download.outcome {
    Some(DownloadOutcome::Failed(msg)) => {
      lines.push(Line::from(Span::styled(msg.clone(), Style::default().fg(ERROR))));
    }
    Some(DownloadOutcome::Complete) => {
      lines.push(Line::from(format!("Saved to {}", app.config.download_dir().display())));
    }
    _ => {
      if let Some(status) = &app.download.status {
        lines.push(Line::from(status.clone()));
      }
      if let Some(speed) = &app.download.speed {
        lines.push(Line::from(format!("Speed: {speed}")));
      }
      if let Some(eta) = &app.download.eta {
        lines.push(Line::from(format!("Time remaining: {eta}")));
      }
      if let Some(dest) = &app.download.destination {
        lines.push(Line::from(format!("Destination: {dest}")));
      } else if let Some(ext) = &app.download.file_extension {
        lines.push(Line::from(format!("Saving as {ext}")));
      }
      if lines.is_empty() {
        lines.push(Line::from(Span::styled("Starting download…", Style::default().fg(MUTED))));
      }
    }
  }
  frame.render_widget(Paragraph::new(lines), detail_area);
}

fn render_resume(frame: &mut Frame, app: &mut App, area: Rect) {
  if app.resume_items.is_empty() {
    let text = vec![
      Line::from(""),
      Line::from(Span::styled("No unfinished downloads.", Style::default().fg(MUTED))),
    ];
    frame.render_widget(
      Paragraph::new(text).alignment(Alignment::Center).block(bordered().title(" Resume ")),
      area,
    );
    return;
  }

  let width = area.width.saturating_sub(4) as usize;
  let items: Vec<ListItem> = app
    .resume_items
    .iter()
    .map(|item| {
      ListItem::new(vec![
        Line::from(truncate_str(&item.title, width)),
        Line::from(Span::styled(truncate_str(&item.url, width), Style::default().fg(MUTED))),
      ])
    })
    .collect();

  let list = List::new(items)
    .block(bordered().title(" Resume "))
    .highlight_style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD))
    .highlight_symbol("❯ ");
  frame.render_stateful_widget(list, area, &mut app.resume_state);
}

fn render_status(frame: &mut Frame, app: &mut App, area: Rect) {
  let line = if let Some(error) = &app.last_error {
    Line::from(Span::styled(format!(" ✗ {error}"), Style::default().fg(ERROR)))
  } else if let Some(status) = &app.status_message {
    Line::from(Span::styled(format!(" {status}"), Style::default().fg(ACCENT)))
  } else {
    Line::from("")
  };
  frame.render_widget(line, area);
}

fn render_input(frame: &mut Frame, app: &mut App, area: Rect) {
  let inner_width = area.width.saturating_sub(2) as usize;

  // Keep the cursor visible by scrolling the window over the input.
  if app.cursor_position < app.input_scroll {
    app.input_scroll = app.cursor_position;
  }
  while app.input_scroll < app.cursor_position
    && display_width(
      &app.input[char_to_byte_index(&app.input, app.input_scroll)..],
      app.cursor_position - app.input_scroll,
    ) >= inner_width.max(1)
  {
    app.input_scroll += 1;
  }

  let visible_start = char_to_byte_index(&app.input, app.input_scroll);
  let visible = &app.input[visible_start..];

  let style = if app.mode == AppMode::Input { Style::default().fg(ACCENT) } else { Style::default().fg(MUTED) };
  let paragraph = Paragraph::new(Line::from(visible)).block(bordered().border_style(style).title(" Search "));
  frame.render_widget(paragraph, area);

  if app.mode == AppMode::Input {
    let cursor_x = area.x + 1 + display_width(visible, app.cursor_position - app.input_scroll) as u16;
    frame.set_cursor_position(Position::new(cursor_x, area.y + 1));
  }
}

fn render_footer(frame: &mut Frame, app: &mut App, area: Rect) {
  let hints = match app.mode {
    AppMode::Input => "Enter: search • ↑/↓: history • Ctrl+R: resume • Esc: clear/quit • Ctrl+C: quit",
    AppMode::Results => "Enter: formats • j/k: move • Ctrl+R: resume • Esc: back",
    AppMode::Formats => "Enter: download • Tab: video/audio/thumbnail • j/k: move • Esc: back",
    AppMode::Download => {
      if app.download.outcome.is_some() {
        "Enter: back"
      } else {
        "Esc: cancel"
      }
    }
    AppMode::Resume => "Enter: re-download • d: delete • j/k: move • Esc: back",
  };
  frame.render_widget(Line::from(Span::styled(format!(" {hints}"), Style::default().fg(MUTED))), area);
}
