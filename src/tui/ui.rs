//! UI rendering functions for TUI

use crate::protocol::ConnectionState;
use crate::tui::app::App;
use crate::tui::types::Screen;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};

/// Main UI rendering function - dispatches to screen-specific render functions
pub fn ui(f: &mut Frame, app: &App) {
    match app.current_screen {
        Screen::Inbox => render_inbox(f, app),
        Screen::ChatView => render_chat_view(f, app),
    }
}

/// Color and label for the connection indicator
pub fn connection_indicator(state: &ConnectionState) -> (Color, String) {
    match state {
        ConnectionState::Connected => (Color::Green, "● connected".to_string()),
        ConnectionState::Connecting => (Color::Yellow, "◌ connecting".to_string()),
        ConnectionState::Disconnected => (Color::DarkGray, "○ disconnected".to_string()),
        ConnectionState::Errored(reason) => (Color::Red, format!("✗ {}", reason)),
    }
}

fn render_inbox(f: &mut Frame, app: &App) {
    let size = f.size();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(2)
        .constraints([
            Constraint::Length(3), // Title
            Constraint::Min(5),    // Entries
            Constraint::Length(3), // Status/Help
        ])
        .split(size);

    let title = Paragraph::new("Received Messages")
        .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(title, chunks[0]);

    let screen = app.inbox_screen.as_ref();
    let entries = screen.map(|s| s.entries.as_slice()).unwrap_or_default();

    if entries.is_empty() {
        let empty = Paragraph::new("No messages received.")
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(empty, chunks[1]);
    } else {
        let selected = screen.map(|s| s.selected_index).unwrap_or(0);
        let items: Vec<ListItem> = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let when = entry
                    .last_message
                    .timestamp
                    .map(|t| t.format("%b %d %H:%M").to_string())
                    .unwrap_or_default();
                let style = if i == selected {
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                ListItem::new(Line::from(vec![
                    Span::styled(format!("{:<20}", entry.display_name()), style),
                    Span::styled(format!("{:<14}", when), Style::default().fg(Color::DarkGray)),
                    Span::raw(entry.last_message.content.clone()),
                ]))
            })
            .collect();

        let list = List::new(items).block(Block::default().borders(Borders::ALL));
        f.render_widget(list, chunks[1]);
    }

    let help_text = screen
        .and_then(|s| s.status_message.clone())
        .unwrap_or_else(|| "↑/↓: Select | Enter: Open chat | q: Quit".to_string());
    let help = Paragraph::new(help_text)
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(help, chunks[2]);
}

fn render_chat_view(f: &mut Frame, app: &App) {
    let size = f.size();
    let (Some(screen), Some(session)) = (&app.chat_view_screen, &app.session) else {
        return;
    };
    let view = session.snapshot();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(2)
        .constraints([
            Constraint::Length(3), // Title + connection
            Constraint::Min(5),    // Message history
            Constraint::Length(3), // Input box
            Constraint::Length(3), // Status/Help
        ])
        .split(size);

    let (indicator_color, indicator) = connection_indicator(&view.connection);
    let title = Paragraph::new(Line::from(vec![
        Span::styled(
            format!("Chat with user {}  ", screen.peer),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(indicator, Style::default().fg(indicator_color)),
    ]))
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::ALL));
    f.render_widget(title, chunks[0]);

    if !view.history_loaded {
        let loading = Paragraph::new("Loading messages...")
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("Messages"));
        f.render_widget(loading, chunks[1]);
    } else if view.messages.is_empty() {
        let empty = Paragraph::new("No messages yet. Type a message below and press Enter to send.")
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("Messages"));
        f.render_widget(empty, chunks[1]);
    } else {
        let total = view.messages.len();
        let visible_height = chunks[1].height.saturating_sub(2) as usize;
        let end_idx = total.saturating_sub(screen.scroll_offset);
        let start_idx = end_idx.saturating_sub(visible_height);

        let lines: Vec<Line> = view.messages[start_idx..end_idx]
            .iter()
            .map(|msg| {
                let timestamp = msg
                    .timestamp
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_else(|| "--:--:--".to_string());

                let is_from_me = msg.sender_id == app.local_user;
                let sender_label = if is_from_me {
                    "Me".to_string()
                } else {
                    msg.sender_name.clone().unwrap_or_else(|| "Them".to_string())
                };
                let sender_color = if is_from_me { Color::Green } else { Color::Blue };

                Line::from(vec![
                    Span::styled(format!("[{}] ", timestamp), Style::default().fg(Color::DarkGray)),
                    Span::styled(
                        format!("{}: ", sender_label),
                        Style::default().fg(sender_color).add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(msg.content.clone(), Style::default().fg(Color::White)),
                ])
            })
            .collect();

        let messages = Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Messages ({}/{})", end_idx, total)),
        );
        f.render_widget(messages, chunks[1]);
    }

    let input_style = if view.connection.is_connected() {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let input = Paragraph::new(screen.input.as_str())
        .style(input_style)
        .block(Block::default().borders(Borders::ALL).title("Type your message"));
    f.render_widget(input, chunks[2]);

    let help_text = screen
        .status_message
        .clone()
        .unwrap_or_else(|| "Enter: Send | PgUp/PgDn: Scroll | Esc: Inbox | Ctrl-C: Quit".to_string());
    let help = Paragraph::new(help_text)
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(help, chunks[3]);
}
