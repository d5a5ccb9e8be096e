use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parley_chat::{ChatClient, ChatHandle, ClientOptions, GateView};
use parley_storage::SqliteBackend;
use snafu::ResultExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::{AppError, AppResult, ClientSnafu, OpenStoreSnafu, ReadInputSnafu};
use crate::settings::SettingsStore;
use crate::terminal::command::{ChatCommand, OpenTarget, PromptCommand, parse_chat, parse_prompt};
use crate::terminal::render::{CHAT_HELP, PROMPT_HELP, Screen};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Runs the terminal client until `quit` or end of input.
pub async fn run(settings: &SettingsStore) -> AppResult<()> {
    let snapshot = settings.settings();
    let backend = SqliteBackend::open(&snapshot.database_path)
        .await
        .context(OpenStoreSnafu {
            stage: "open-store",
            location: snapshot.database_path.clone(),
        })?;
    tracing::info!(database = %backend.database_url(), "message store ready");

    let (client_task, handle, mut events) = ChatClient::spawn(
        Arc::new(backend),
        ClientOptions {
            placeholder_name: snapshot.placeholder_name.clone(),
        },
    );
    let mut screen = Screen::new(snapshot.thread_page_hint);
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::warn!("chat client stopped unexpectedly");
                    break;
                };
                print_lines(screen.apply(event, unix_now_millis()));
            }
            line = input.next_line() => {
                let Some(line) = line.context(ReadInputSnafu { stage: "read-line" })? else {
                    break;
                };
                if handle_line(&line, &screen, &handle, settings)? == Flow::Quit {
                    break;
                }
            }
        }
    }

    // The client may already be gone; shutting down twice is harmless.
    let _ = handle.shutdown();
    if let Err(error) = client_task.await {
        tracing::warn!(error = %error, "chat client task ended abnormally");
    }
    Ok(())
}

fn handle_line(
    line: &str,
    screen: &Screen,
    handle: &ChatHandle,
    settings: &SettingsStore,
) -> AppResult<Flow> {
    match screen.gate() {
        GateView::SignedIn(_) => handle_chat_line(line, screen, handle, settings),
        GateView::SignedOut => handle_prompt_line(line, handle, settings),
        GateView::Checking => {
            if let Some(reply) = checking_reply(line) {
                println!("{reply}");
            }
            Ok(Flow::Continue)
        }
    }
}

/// Input is dropped until the startup session check resolves.
fn checking_reply(line: &str) -> Option<&'static str> {
    (!line.trim().is_empty()).then_some("* still checking session; try again in a moment")
}

fn handle_prompt_line(line: &str, handle: &ChatHandle, settings: &SettingsStore) -> AppResult<Flow> {
    match parse_prompt(line) {
        PromptCommand::Login { email, password } => handle
            .sign_in(email, password)
            .context(ClientSnafu { stage: "dispatch-sign-in" })?,
        PromptCommand::Register {
            email,
            password,
            username,
        } => handle
            .sign_up(email, password, username)
            .context(ClientSnafu { stage: "dispatch-sign-up" })?,
        PromptCommand::SaveSettings => save_settings(settings),
        PromptCommand::Help => println!("{PROMPT_HELP}"),
        PromptCommand::Quit => return Ok(Flow::Quit),
        PromptCommand::Empty => {}
        PromptCommand::Invalid(message) => println!("! {message}"),
    }
    Ok(Flow::Continue)
}

fn handle_chat_line(
    line: &str,
    screen: &Screen,
    handle: &ChatHandle,
    settings: &SettingsStore,
) -> AppResult<Flow> {
    match parse_chat(line) {
        ChatCommand::List => print_lines(screen.conversation_lines(unix_now_millis())),
        ChatCommand::Open(OpenTarget::Position(position)) => match screen.conversation_at(position) {
            Some(conversation) => handle
                .select(conversation.counterpart_id())
                .context(ClientSnafu { stage: "dispatch-select" })?,
            None => println!("! no conversation #{position}; /list shows the numbers"),
        },
        ChatCommand::Open(OpenTarget::User(user_id)) => handle
            .select(user_id)
            .context(ClientSnafu { stage: "dispatch-select" })?,
        ChatCommand::Close => handle
            .clear_selection()
            .context(ClientSnafu { stage: "dispatch-close" })?,
        ChatCommand::Retry => {
            if screen.draft().trim().is_empty() {
                println!("! nothing to resend");
            } else {
                handle
                    .submit()
                    .context(ClientSnafu { stage: "dispatch-retry" })?;
            }
        }
        ChatCommand::Refresh => handle
            .refresh()
            .context(ClientSnafu { stage: "dispatch-refresh" })?,
        ChatCommand::WhoAmI => {
            if let Some(identity) = screen.identity() {
                println!("{} ({})", identity.email, identity.user_id);
            }
        }
        ChatCommand::Logout => handle
            .sign_out()
            .context(ClientSnafu { stage: "dispatch-sign-out" })?,
        ChatCommand::SaveSettings => save_settings(settings),
        ChatCommand::Help => println!("{CHAT_HELP}"),
        ChatCommand::Quit => return Ok(Flow::Quit),
        ChatCommand::Send(text) => {
            if screen.thread_counterpart().is_none() {
                println!("! open a conversation first: /list, then /open <number>");
                return Ok(Flow::Continue);
            }
            handle
                .send_text(text)
                .context(ClientSnafu { stage: "dispatch-send" })?;
        }
        ChatCommand::Empty => {}
        ChatCommand::Invalid(message) => println!("! {message}"),
    }
    Ok(Flow::Continue)
}

/// Writes the effective settings (file plus environment) back to the settings file.
fn save_settings(settings: &SettingsStore) {
    let current = settings.settings().as_ref().clone();
    match settings.update(current) {
        Ok(()) => println!("* settings saved to {}", settings.config_path().display()),
        Err(source) => {
            let error = AppError::SaveSettings {
                stage: "save-settings-command",
                source,
            };
            tracing::error!(error = %error, "settings were not saved");
            println!("! {error}");
        }
    }
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}

fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as u64)
}
