//! Line parsing for the two surfaces.
//!
//! The auth prompt only understands commands. On the chat surface anything that does not
//! start with `/` is message text, so "list" can still be sent as a message.

use parley_storage::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptCommand {
    Login { email: String, password: String },
    Register {
        email: String,
        password: String,
        username: String,
    },
    SaveSettings,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenTarget {
    /// 1-based position in the last printed conversation list.
    Position(usize),
    User(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    List,
    Open(OpenTarget),
    Close,
    /// Sends the kept draft again without retyping it.
    Retry,
    Refresh,
    WhoAmI,
    Logout,
    SaveSettings,
    Help,
    Quit,
    Send(String),
    Empty,
    Invalid(String),
}

pub fn parse_prompt(line: &str) -> PromptCommand {
    let line = line.trim();
    let line = line.strip_prefix('/').unwrap_or(line);
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return PromptCommand::Empty;
    };

    match verb.to_ascii_lowercase().as_str() {
        "login" => match (words.next(), words.next(), words.next()) {
            (Some(email), Some(password), None) => PromptCommand::Login {
                email: email.to_string(),
                password: password.to_string(),
            },
            _ => PromptCommand::Invalid("usage: login <email> <password>".to_string()),
        },
        "register" => {
            let (Some(email), Some(password)) = (words.next(), words.next()) else {
                return PromptCommand::Invalid(
                    "usage: register <email> <password> <username>".to_string(),
                );
            };
            let username = words.collect::<Vec<_>>().join(" ");
            if username.is_empty() {
                return PromptCommand::Invalid(
                    "usage: register <email> <password> <username>".to_string(),
                );
            }
            PromptCommand::Register {
                email: email.to_string(),
                password: password.to_string(),
                username,
            }
        }
        "save-settings" => PromptCommand::SaveSettings,
        "help" => PromptCommand::Help,
        "quit" | "exit" => PromptCommand::Quit,
        other => PromptCommand::Invalid(format!("unknown command '{other}', try 'help'")),
    }
}

pub fn parse_chat(line: &str) -> ChatCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ChatCommand::Empty;
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return ChatCommand::Send(line.to_string());
    };

    let mut words = command.split_whitespace();
    let verb = words.next().unwrap_or_default().to_ascii_lowercase();
    let argument = words.next();
    match (verb.as_str(), argument) {
        ("list" | "ls", None) => ChatCommand::List,
        ("open", Some(target)) => match parse_open_target(target) {
            Some(target) => ChatCommand::Open(target),
            None => ChatCommand::Invalid(format!("'{target}' is neither a list number nor a user id")),
        },
        ("open", None) => ChatCommand::Invalid("usage: /open <number|user id>".to_string()),
        ("close", None) => ChatCommand::Close,
        ("retry", None) => ChatCommand::Retry,
        ("refresh", None) => ChatCommand::Refresh,
        ("whoami", None) => ChatCommand::WhoAmI,
        ("logout", None) => ChatCommand::Logout,
        ("save-settings", None) => ChatCommand::SaveSettings,
        ("help", None) => ChatCommand::Help,
        ("quit" | "exit", None) => ChatCommand::Quit,
        (verb, _) => ChatCommand::Invalid(format!("unknown command '/{verb}', try /help")),
    }
}

fn parse_open_target(raw: &str) -> Option<OpenTarget> {
    if let Ok(position) = raw.parse::<usize>() {
        return (position > 0).then_some(OpenTarget::Position(position));
    }
    UserId::parse(raw).ok().map(OpenTarget::User)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_commands() {
        assert_eq!(
            parse_prompt("  login ada@example.com s3cret "),
            PromptCommand::Login {
                email: "ada@example.com".to_string(),
                password: "s3cret".to_string(),
            }
        );
        assert_eq!(
            parse_prompt("/register bea@example.com pw Bea Lovelace"),
            PromptCommand::Register {
                email: "bea@example.com".to_string(),
                password: "pw".to_string(),
                username: "Bea Lovelace".to_string(),
            }
        );
        assert!(matches!(parse_prompt("register bea@example.com pw"), PromptCommand::Invalid(_)));
        assert!(matches!(parse_prompt("login only-email"), PromptCommand::Invalid(_)));
        assert_eq!(parse_prompt("QUIT"), PromptCommand::Quit);
        assert_eq!(parse_prompt("   "), PromptCommand::Empty);
    }

    #[test]
    fn plain_text_is_a_message_even_when_it_looks_like_a_command() {
        assert_eq!(parse_chat("list"), ChatCommand::Send("list".to_string()));
        assert_eq!(parse_chat("  hi there "), ChatCommand::Send("  hi there ".to_string()));
        assert_eq!(parse_chat("/list"), ChatCommand::List);
        assert_eq!(parse_chat(" /retry "), ChatCommand::Retry);
        assert_eq!(parse_chat("retry"), ChatCommand::Send("retry".to_string()));
        assert_eq!(parse_chat(" \t"), ChatCommand::Empty);
    }

    #[test]
    fn open_accepts_positions_and_user_ids() {
        let user = UserId::new_v7();

        assert_eq!(parse_chat("/open 2"), ChatCommand::Open(OpenTarget::Position(2)));
        assert_eq!(
            parse_chat(&format!("/open {user}")),
            ChatCommand::Open(OpenTarget::User(user))
        );
        assert!(matches!(parse_chat("/open 0"), ChatCommand::Invalid(_)));
        assert!(matches!(parse_chat("/open bea"), ChatCommand::Invalid(_)));
        assert!(matches!(parse_chat("/open"), ChatCommand::Invalid(_)));
        assert!(matches!(parse_chat("/dance"), ChatCommand::Invalid(_)));
    }
}
