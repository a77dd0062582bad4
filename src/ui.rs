use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph, Wrap},
};
use crate::app::{App, ConnectionStatus, InputMode, MessageKind, Screen, UploadStatus};
use crate::picker::FileEntry;

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    match app.screen {
        Screen::Upload => render_upload_screen(app, frame, body_area),
        Screen::Chat => render_chat_screen(app, frame, body_area),
    }

    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let doc_indicator = match &app.pdf_id {
        Some(id) => format!(" [doc: {}]", id),
        None => String::new(),
    };

    let title = Line::from(vec![
        Span::styled(" PDF Chatbot ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(doc_indicator, Style::default().fg(Color::DarkGray)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };

    let mode_text = match app.screen {
        Screen::Upload => " UPLOAD ",
        Screen::Chat => " CHAT ",
    };

    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hints = match (app.screen, app.input_mode) {
        (Screen::Upload, _) => {
            let mut hints = vec![
                Span::styled(" j/k ", key_style),
                Span::styled(" nav ", label_style),
                Span::styled(" Enter ", key_style),
                Span::styled(" open/upload ", label_style),
                Span::styled(" h ", key_style),
                Span::styled(" up ", label_style),
                Span::styled(" r ", key_style),
                Span::styled(" refresh ", label_style),
            ];
            if app.upload_status == UploadStatus::Uploading {
                hints.extend(vec![
                    Span::styled(" c ", key_style),
                    Span::styled(" cancel ", label_style),
                ]);
            }
            if app.pdf_id.is_some() {
                hints.extend(vec![
                    Span::styled(" t ", key_style),
                    Span::styled(" chat ", label_style),
                ]);
            }
            hints.extend(vec![
                Span::styled(" q ", key_style),
                Span::styled(" quit ", label_style),
            ]);
            hints
        }
        (Screen::Chat, InputMode::Normal) => {
            let mut hints = vec![
                Span::styled(" i ", key_style),
                Span::styled(" type ", label_style),
                Span::styled(" j/k ", key_style),
                Span::styled(" scroll ", label_style),
            ];
            if app.history_error.is_some() {
                hints.extend(vec![
                    Span::styled(" r ", key_style),
                    Span::styled(" retry ", label_style),
                ]);
            }
            hints.extend(vec![
                Span::styled(" u ", key_style),
                Span::styled(" upload ", label_style),
                Span::styled(" q ", key_style),
                Span::styled(" quit ", label_style),
            ]);
            hints
        }
        (Screen::Chat, InputMode::Editing) => vec![
            Span::styled(" Enter ", key_style),
            Span::styled(" send ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" stop typing ", label_style),
        ],
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::styled(" ", label_style)];
    spans.extend(hints);

    let footer = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

// Upload screen

fn render_upload_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    let [picker_area, status_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(4),
    ])
    .areas(area);

    app.picker_area = Some(picker_area);

    let picker_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(format!(" {} ", app.current_dir.display()));

    let items: Vec<ListItem> = app.entries.iter().map(picker_item).collect();

    let list = List::new(items)
        .block(picker_block)
        .highlight_style(
            Style::default()
                .bg(Color::Cyan)
                .fg(Color::Black)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, picker_area, &mut app.picker_state);

    render_upload_status(app, frame, status_area);
}

fn picker_item(entry: &FileEntry) -> ListItem<'_> {
    if entry.is_dir {
        ListItem::new(Line::from(Span::styled(
            format!(" {}/", entry.name),
            Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD),
        )))
    } else {
        let style = if entry.is_pdf() {
            Style::default()
        } else {
            Style::default().fg(Color::DarkGray)
        };
        ListItem::new(Line::from(vec![
            Span::styled(format!(" {}", entry.name), style),
            Span::styled(
                format!("  {}", format_size(entry.size)),
                Style::default().fg(Color::DarkGray),
            ),
        ]))
    }
}

fn render_upload_status(app: &App, frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Upload ");

    if app.upload_status == UploadStatus::Uploading {
        let gauge = Gauge::default()
            .block(block)
            .gauge_style(Style::default().fg(Color::Cyan))
            .percent(app.upload_progress as u16)
            .label(format!("{}% uploaded", app.upload_progress));
        frame.render_widget(gauge, area);
        return;
    }

    let line = if let Some(error) = &app.upload_error {
        Line::from(Span::styled(
            error.as_str(),
            Style::default().fg(Color::Red),
        ))
    } else if app.upload_status == UploadStatus::Success {
        Line::from(Span::styled(
            "File uploaded successfully!",
            Style::default().fg(Color::Green),
        ))
    } else {
        Line::from(Span::styled(
            "Select a PDF file to start chatting",
            Style::default().fg(Color::DarkGray),
        ))
    };

    let status = Paragraph::new(line).block(block).wrap(Wrap { trim: true });
    frame.render_widget(status, area);
}

// Chat screen

fn render_chat_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    let error_lines = [
        app.history_error.is_some(),
        app.chat_error.is_some(),
        app.connection_error.is_some(),
    ]
    .iter()
    .filter(|p| **p)
    .count() as u16;

    let [chat_area, error_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(error_lines),
        Constraint::Length(3),
    ])
    .areas(area);

    app.chat_area = Some(chat_area);
    app.chat_height = chat_area.height.saturating_sub(2);
    app.chat_width = chat_area.width.saturating_sub(2);

    let status_color = match app.connection {
        ConnectionStatus::Connected => Color::Green,
        ConnectionStatus::Failed => Color::Red,
        _ => Color::Yellow,
    };
    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(Line::from(vec![
            Span::raw(" Chat "),
            Span::styled(
                format!("[{}] ", app.connection.label()),
                Style::default().fg(status_color),
            ),
        ]));

    let chat_text = if app.messages.is_empty() && !app.waiting {
        let hint = if app.history_loading {
            "Loading chat history..."
        } else {
            "Ask a question about your PDF..."
        };
        Text::from(Span::styled(hint, Style::default().fg(Color::DarkGray)))
    } else {
        let mut lines: Vec<Line> = Vec::new();

        for msg in &app.messages {
            lines.push(message_header(msg.kind, &msg.timestamp));
            for line in msg.content.lines() {
                lines.push(Line::from(line.to_string()));
            }
            lines.push(Line::default());
        }

        if app.waiting {
            lines.push(message_header(MessageKind::Bot, ""));
            // Animated ellipsis: cycles through ".", "..", "..."
            let dots = ".".repeat((app.animation_frame as usize) + 1);
            lines.push(Line::from(Span::styled(
                format!("Thinking{}", dots),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
        }

        Text::from(lines)
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: true })
        .scroll((app.chat_scroll, 0));
    frame.render_widget(chat, chat_area);

    if error_lines > 0 {
        render_chat_errors(app, frame, error_area);
    }

    let input_focused = app.input_mode == InputMode::Editing;
    let input_border_color = if input_focused {
        Color::Yellow
    } else {
        Color::DarkGray
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(input_border_color))
        .title(" Message (i to type, Enter to send) ");

    let input = Paragraph::new(app.chat_input.as_str()).block(input_block);
    frame.render_widget(input, input_area);

    if input_focused {
        let cursor_x = input_area.x + 1 + app.chat_cursor.min(u16::MAX as usize) as u16;
        let cursor_x = cursor_x.min(input_area.x + input_area.width.saturating_sub(2));
        frame.set_cursor_position((cursor_x, input_area.y + 1));
    }
}

fn message_header(kind: MessageKind, timestamp: &str) -> Line<'static> {
    let (name, color) = match kind {
        MessageKind::User => ("You", Color::Cyan),
        MessageKind::Bot => ("Bot", Color::Yellow),
    };

    let time = format_timestamp(timestamp);
    let mut spans = vec![Span::styled(
        format!("{}:", name),
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    )];
    if !time.is_empty() {
        spans.push(Span::styled(
            format!(" [{}]", time),
            Style::default().fg(Color::DarkGray),
        ));
    }
    Line::from(spans)
}

fn render_chat_errors(app: &App, frame: &mut Frame, area: Rect) {
    let mut lines: Vec<Line> = Vec::new();

    if let Some(error) = &app.history_error {
        lines.push(Line::from(Span::styled(
            format!("{} (press r to retry)", error),
            Style::default().fg(Color::Red),
        )));
    }
    if let Some(error) = &app.chat_error {
        lines.push(Line::from(Span::styled(
            format!("Error: {}", error),
            Style::default().fg(Color::Red),
        )));
    }
    if let Some(error) = &app.connection_error {
        lines.push(Line::from(Span::styled(
            error.as_str(),
            Style::default().fg(Color::Magenta),
        )));
    }

    frame.render_widget(Paragraph::new(lines), area);
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

fn format_timestamp(timestamp: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(timestamp) {
        Ok(dt) => dt.format("%H:%M:%S").to_string(),
        Err(_) => timestamp.to_string(),
    }
}
