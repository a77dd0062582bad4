use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use crate::app::{App, InputMode, Screen};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => {
            app.tick_animation();
        }
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global quit works in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    match app.input_mode {
        InputMode::Normal => match app.screen {
            Screen::Upload => handle_upload_keys(app, key),
            Screen::Chat => handle_chat_normal(app, key),
        },
        InputMode::Editing => handle_chat_editing(app, key),
    }
}

fn handle_upload_keys(app: &mut App, key: KeyEvent) {
    match key.code {
        // Quit
        KeyCode::Char('q') => app.should_quit = true,

        // Picker navigation
        KeyCode::Char('j') | KeyCode::Down => app.picker_nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.picker_nav_up(),
        KeyCode::Char('g') => app.picker_nav_first(),
        KeyCode::Char('G') => app.picker_nav_last(),

        // Enter a directory or upload the selected file
        KeyCode::Enter | KeyCode::Char('l') | KeyCode::Right => app.enter_selected(),

        // Up one directory
        KeyCode::Char('h') | KeyCode::Left | KeyCode::Backspace => app.leave_dir(),

        // Re-read the directory
        KeyCode::Char('r') => app.refresh_entries(),

        // Cancel an in-flight upload
        KeyCode::Char('c') => app.cancel_upload(),

        // Over to the chat (only once a document exists)
        KeyCode::Tab | KeyCode::Char('t') => {
            if app.pdf_id.is_some() {
                app.screen = Screen::Chat;
            }
        }

        _ => {}
    }
}

fn handle_chat_normal(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,

        // Back to the uploader
        KeyCode::Char('u') | KeyCode::Tab => app.screen = Screen::Upload,

        // Start typing
        KeyCode::Char('i') | KeyCode::Char('a') | KeyCode::Enter => {
            app.input_mode = InputMode::Editing;
            app.chat_cursor = app.chat_input.chars().count();
        }

        // Transcript scrolling
        KeyCode::Char('j') | KeyCode::Down => app.scroll_chat_down(),
        KeyCode::Char('k') | KeyCode::Up => app.scroll_chat_up(),
        KeyCode::Char('g') => app.chat_scroll = 0,
        KeyCode::Char('G') => app.scroll_chat_to_bottom(),

        // Retry a failed history fetch
        KeyCode::Char('r') => {
            if app.history_error.is_some() {
                app.fetch_history();
            }
        }

        _ => {}
    }
}

fn handle_chat_editing(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => {
            app.send_message();
        }
        KeyCode::Backspace => {
            if app.chat_cursor > 0 {
                app.chat_cursor -= 1;
                let byte_pos = char_to_byte_index(&app.chat_input, app.chat_cursor);
                app.chat_input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = app.chat_input.chars().count();
            if app.chat_cursor < char_count {
                let byte_pos = char_to_byte_index(&app.chat_input, app.chat_cursor);
                app.chat_input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.chat_cursor = app.chat_cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.chat_input.chars().count();
            app.chat_cursor = (app.chat_cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.chat_cursor = 0;
        }
        KeyCode::End => {
            app.chat_cursor = app.chat_input.chars().count();
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.chat_input, app.chat_cursor);
            app.chat_input.insert(byte_pos, c);
            app.chat_cursor += 1;
        }
        _ => {}
    }
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let x = mouse.column;
    let y = mouse.row;

    let in_picker = app.picker_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);
    let in_chat = app.chat_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);

    match mouse.kind {
        MouseEventKind::ScrollDown => {
            if in_picker {
                app.picker_nav_down();
            } else if in_chat {
                app.scroll_chat_down();
                app.scroll_chat_down();
                app.scroll_chat_down();
            }
        }
        MouseEventKind::ScrollUp => {
            if in_picker {
                app.picker_nav_up();
            } else if in_chat {
                app.scroll_chat_up();
                app.scroll_chat_up();
                app.scroll_chat_up();
            }
        }
        _ => {}
    }
}
