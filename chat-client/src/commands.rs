use tracing::debug;

pub const HELP_TEXT: &str = "\
=== COMMANDS ===
/quit, /exit, /q - Leave the chat
/ping            - Test the connection
/users, /list    - Show who is online
/help            - Show this help
================";

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Ping,
    Users,
    Help,
    Unknown(String),
    Chat(String),
}

/// Parses an input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if !line.starts_with('/') {
        return Some(Command::Chat(line.to_string()));
    }

    let cmd = line
        .split_whitespace()
        .next()
        .unwrap_or(line)
        .to_lowercase();
    debug!("Parsed command: {}", cmd);

    let command = match cmd.as_str() {
        "/quit" | "/exit" | "/q" => Command::Quit,
        "/ping" => Command::Ping,
        "/users" | "/list" => Command::Users,
        "/help" => Command::Help,
        _ => Command::Unknown(cmd),
    };
    Some(command)
}
