//! Textbook Exchange chat TUI
//!
//! Usage: `textbook-chat-tui <local-user-id> [peer-user-id]`
//!
//! The bearer token is read from `TEXTBOOK_TOKEN`; configuration from the file
//! named by `TEXTBOOK_CHAT_CONFIG` (default `chat.json`).

use anyhow::{Context, bail};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::io;
use textbook_chat::config::ChatConfig;
use textbook_chat::credential::Credential;
use textbook_chat::protocol::UserId;
use textbook_chat::tui::{App, Screen, ui::ui};

const TOKEN_ENV: &str = "TEXTBOOK_TOKEN";
const CONFIG_ENV: &str = "TEXTBOOK_CHAT_CONFIG";
const LOG_FILE: &str = "textbook-chat.log";

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (local_user, peer) = match args.as_slice() {
        [local] => (parse_user(local)?, None),
        [local, peer] => (parse_user(local)?, Some(parse_user(peer)?)),
        _ => bail!("usage: textbook-chat-tui <local-user-id> [peer-user-id]"),
    };

    // The terminal belongs to the UI, so logs go to a file.
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(LOG_FILE)
        .with_context(|| format!("opening {}", LOG_FILE))?;
    textbook_chat::init_with_writer(std::sync::Mutex::new(log_file));

    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "chat.json".to_string());
    let config = ChatConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path))?
        .with_env_overrides();
    let credential = Credential::from_env(TOKEN_ENV);

    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    let _guard = runtime.enter();

    let mut app = App::new(config, credential, local_user)?;
    match peer {
        Some(peer) => app.open_chat(peer),
        None => app.show_inbox(),
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app);

    app.close_chat();

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn parse_user(arg: &str) -> anyhow::Result<UserId> {
    arg.parse::<UserId>()
        .with_context(|| format!("invalid user id: {}", arg))
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if event::poll(std::time::Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
                    app.should_quit = true;
                }

                match app.current_screen {
                    Screen::Inbox => match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => app.should_quit = true,
                        KeyCode::Down | KeyCode::Char('j') => {
                            if let Some(screen) = app.inbox_screen.as_mut() {
                                screen.next();
                            }
                        }
                        KeyCode::Up | KeyCode::Char('k') => {
                            if let Some(screen) = app.inbox_screen.as_mut() {
                                screen.previous();
                            }
                        }
                        KeyCode::Char('r') => app.show_inbox(),
                        KeyCode::Enter => app.open_selected(),
                        _ => {}
                    },
                    Screen::ChatView => {
                        let total = app
                            .session
                            .as_ref()
                            .map(|s| s.snapshot().messages.len())
                            .unwrap_or(0);
                        match key.code {
                            KeyCode::Esc => app.back_to_inbox(),
                            KeyCode::Enter => app.submit_message(),
                            KeyCode::PageUp => {
                                if let Some(screen) = app.chat_view_screen.as_mut() {
                                    screen.scroll_up(total.saturating_sub(1));
                                }
                            }
                            KeyCode::PageDown => {
                                if let Some(screen) = app.chat_view_screen.as_mut() {
                                    screen.scroll_down();
                                }
                            }
                            KeyCode::Backspace => {
                                if let Some(screen) = app.chat_view_screen.as_mut() {
                                    screen.backspace();
                                }
                            }
                            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                                if let Some(screen) = app.chat_view_screen.as_mut() {
                                    screen.add_char(c);
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}
