use anyhow::Result;
use ratatui::crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::widgets::ListState;

use crate::app::{App, AppMode};

/// Convert a char index to a byte offset within the string.
pub fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
  s.char_indices().nth(char_idx).map_or(s.len(), |(i, _)| i)
}

fn move_selection(state: &mut ListState, count: usize, down: bool) {
  if count == 0 {
    return;
  }
  let i = match (state.selected(), down) {
    (None, _) => 0,
    (Some(i), true) => (i + 1) % count,
    (Some(0), false) => count - 1,
    (Some(i), false) => i - 1,
  };
  state.select(Some(i));
}

pub fn handle_key_event(app: &mut App, key: KeyEvent) -> Result<()> {
  if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
    app.should_quit = true;
    return Ok(());
  }

  if key.modifiers.contains(KeyModifiers::CONTROL)
    && key.code == KeyCode::Char('r')
    && matches!(app.mode, AppMode::Input | AppMode::Results)
  {
    app.open_resume();
    return Ok(());
  }

  match app.mode {
    AppMode::Input => handle_input_key(app, key),
    AppMode::Results => handle_results_key(app, key),
    AppMode::Formats => handle_formats_key(app, key),
    AppMode::Download => handle_download_key(app, key),
    AppMode::Resume => handle_resume_key(app, key),
  }
  Ok(())
}

fn handle_input_key(app: &mut App, key: KeyEvent) {
  app.last_error = None;
  match key.code {
    KeyCode::Enter => {
      if !app.is_fetching() {
        app.trigger_search();
      }
    }
    KeyCode::Char(c) => {
      let byte_idx = char_to_byte_index(&app.input, app.cursor_position);
      app.input.insert(byte_idx, c);
      app.cursor_position += 1;
    }
    KeyCode::Backspace => {
      if app.cursor_position > 0 {
        app.cursor_position -= 1;
        let byte_idx = char_to_byte_index(&app.input, app.cursor_position);
        app.input.remove(byte_idx);
      }
    }
    KeyCode::Delete => {
      if app.cursor_position < app.input.chars().count() {
        let byte_idx = char_to_byte_index(&app.input, app.cursor_position);
        app.input.remove(byte_idx);
      }
    }
    KeyCode::Left => {
      app.cursor_position = app.cursor_position.saturating_sub(1);
    }
    KeyCode::Right => {
      if app.cursor_position < app.input.chars().count() {
        app.cursor_position += 1;
      }
    }
    KeyCode::Home => {
      app.cursor_position = 0;
    }
    KeyCode::End => {
      app.cursor_position = app.input.chars().count();
    }
    KeyCode::Up => {
      app.history_prev();
    }
    KeyCode::Down => {
      if !app.input.is_empty() || app.history_index_active() {
        app.history_next();
      } else if !app.search_results.is_empty() {
        app.mode = AppMode::Results;
      }
    }
    KeyCode::Esc => {
      if app.is_fetching() {
        app.cancel_fetch();
      } else if !app.input.is_empty() {
        app.set_input(String::new());
      } else if !app.search_results.is_empty() {
        app.mode = AppMode::Results;
      } else {
        app.should_quit = true;
      }
    }
    _ => {}
  }
}

fn handle_results_key(app: &mut App, key: KeyEvent) {
  match key.code {
    KeyCode::Enter => {
      if app.is_fetching() {
        return;
      }
      let Some(selected) = app.results_state.selected() else { return };
      let Some(item) = app.search_results.get(selected) else { return };
      app.trigger_formats(item.watch_url(), item.title.clone());
    }
    KeyCode::Down | KeyCode::Char('j') => {
      move_selection(&mut app.results_state, app.search_results.len(), true);
    }
    KeyCode::Up | KeyCode::Char('k') => {
      move_selection(&mut app.results_state, app.search_results.len(), false);
    }
    KeyCode::Esc => {
      if app.is_fetching() {
        app.cancel_fetch();
      } else {
        app.mode = AppMode::Input;
      }
    }
    _ => {}
  }
}

fn handle_formats_key(app: &mut App, key: KeyEvent) {
  match key.code {
    KeyCode::Tab => {
      app.next_format_tab();
    }
    KeyCode::Enter => {
      app.trigger_download();
    }
    KeyCode::Down | KeyCode::Char('j') => {
      let count = app.visible_formats().len();
      move_selection(&mut app.formats_state, count, true);
    }
    KeyCode::Up | KeyCode::Char('k') => {
      let count = app.visible_formats().len();
      move_selection(&mut app.formats_state, count, false);
    }
    KeyCode::Esc => {
      app.formats = None;
      app.mode = if app.search_results.is_empty() { AppMode::Input } else { AppMode::Results };
    }
    _ => {}
  }
}

fn handle_download_key(app: &mut App, key: KeyEvent) {
  if app.download.outcome.is_some() {
    if matches!(key.code, KeyCode::Enter | KeyCode::Esc) {
      app.close_download_view();
    }
    return;
  }
  if matches!(key.code, KeyCode::Esc | KeyCode::Char('c')) {
    app.cancel_download();
  }
}

fn handle_resume_key(app: &mut App, key: KeyEvent) {
  match key.code {
    KeyCode::Enter => {
      app.resume_selected();
    }
    KeyCode::Char('d') | KeyCode::Delete => {
      app.delete_resume_selected();
    }
    KeyCode::Down | KeyCode::Char('j') => {
      move_selection(&mut app.resume_state, app.resume_items.len(), true);
    }
    KeyCode::Up | KeyCode::Char('k') => {
      move_selection(&mut app.resume_state, app.resume_items.len(), false);
    }
    KeyCode::Esc => {
      app.mode = AppMode::Input;
    }
    _ => {}
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  // --- char_to_byte_index ---

  #[test]
  fn char_to_byte_ascii() {
    assert_eq!(char_to_byte_index("hello", 0), 0);
    assert_eq!(char_to_byte_index("hello", 3), 3);
    assert_eq!(char_to_byte_index("hello", 5), 5); // past end
  }

  #[test]
  fn char_to_byte_multibyte() {
    let s = "aé日"; // a=1 byte, é=2 bytes, 日=3 bytes
    assert_eq!(char_to_byte_index(s, 0), 0);
    assert_eq!(char_to_byte_index(s, 1), 1);
    assert_eq!(char_to_byte_index(s, 2), 3);
    assert_eq!(char_to_byte_index(s, 3), 6); // past end
  }

  // --- move_selection ---

  #[test]
  fn selection_wraps_both_ways() {
    let mut state = ListState::default();
    move_selection(&mut state, 3, true);
    assert_eq!(state.selected(), Some(0));
    move_selection(&mut state, 3, false);
    assert_eq!(state.selected(), Some(2));
    move_selection(&mut state, 3, true);
    assert_eq!(state.selected(), Some(0));
  }

  #[test]
  fn selection_noop_on_empty_list() {
    let mut state = ListState::default();
    move_selection(&mut state, 0, true);
    assert_eq!(state.selected(), None);
  }
}
