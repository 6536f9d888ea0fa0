use chrono::{DateTime, Local, TimeZone};

/// An event surfaced to the user
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    LoginSucceeded {
        message: String,
        timestamp: Option<f64>,
    },
    LoginFailed {
        message: String,
    },
    Chat {
        nickname: String,
        message: String,
        timestamp: Option<f64>,
    },
    Joined {
        nickname: String,
        timestamp: Option<f64>,
    },
    Left {
        nickname: String,
        timestamp: Option<f64>,
    },
    Roster {
        users: Vec<String>,
        count: usize,
    },
    Error {
        code: i64,
        message: String,
        timestamp: Option<f64>,
    },
    Info(String),
}

/// Receives every event the client surfaces
pub trait Presenter: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Prints notices to stdout, one line each
#[derive(Debug, Default)]
pub struct ConsolePresenter;

impl Presenter for ConsolePresenter {
    fn notify(&self, notice: Notice) {
        println!("{}", render(&notice));
    }
}

/// Renders a notice as transcript text
pub fn render(notice: &Notice) -> String {
    match notice {
        Notice::LoginSucceeded { message, timestamp } => format!(
            "[{}] {}\n{}",
            format_timestamp(*timestamp),
            message,
            "-".repeat(50)
        ),
        Notice::LoginFailed { message } => format!("[ERROR] Login failed: {}", message),
        Notice::Chat {
            nickname,
            message,
            timestamp,
        } => format!("[{}] {}: {}", format_timestamp(*timestamp), nickname, message),
        Notice::Joined { nickname, timestamp } => format!(
            "[{}] >>> {} joined the chat room <<<",
            format_timestamp(*timestamp),
            nickname
        ),
        Notice::Left { nickname, timestamp } => format!(
            "[{}] <<< {} left the chat room >>>",
            format_timestamp(*timestamp),
            nickname
        ),
        Notice::Roster { users, count } => format!(
            "[INFO] {} users in the chat room: {}",
            count,
            users.join(", ")
        ),
        Notice::Error {
            code,
            message,
            timestamp,
        } => format!("[{}] ERROR {}: {}", format_timestamp(*timestamp), code, message),
        Notice::Info(text) => format!("[INFO] {}", text),
    }
}

/// Local `HH:MM:SS` for a unix timestamp; absent or zero means now
pub fn format_timestamp(timestamp: Option<f64>) -> String {
    let time: DateTime<Local> = timestamp
        .filter(|ts| *ts > 0.0)
        .and_then(|ts| Local.timestamp_opt(ts as i64, 0).single())
        .unwrap_or_else(Local::now);

    time.format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_clock(s: &str) -> bool {
        s.len() == 8
            && s.chars().enumerate().all(|(i, c)| {
                if i == 2 || i == 5 {
                    c == ':'
                } else {
                    c.is_ascii_digit()
                }
            })
    }

    #[test]
    fn test_format_timestamp() {
        assert!(is_clock(&format_timestamp(Some(1700000000.0))));
        assert!(is_clock(&format_timestamp(None)));
        assert!(is_clock(&format_timestamp(Some(0.0))));
    }

    #[test]
    fn test_render_chat_line() {
        let line = render(&Notice::Chat {
            nickname: "bob".to_string(),
            message: "hello".to_string(),
            timestamp: Some(1700000000.0),
        });

        assert!(line.starts_with('['));
        assert!(line.ends_with("] bob: hello"));
    }

    #[test]
    fn test_render_roster_and_errors() {
        let roster = render(&Notice::Roster {
            users: vec!["alice".to_string(), "bob".to_string()],
            count: 2,
        });
        assert_eq!(roster, "[INFO] 2 users in the chat room: alice, bob");

        let error = render(&Notice::Error {
            code: 409,
            message: "Nickname taken".to_string(),
            timestamp: None,
        });
        assert!(error.ends_with("ERROR 409: Nickname taken"));

        let failed = render(&Notice::LoginFailed {
            message: "bad".to_string(),
        });
        assert_eq!(failed, "[ERROR] Login failed: bad");
    }
}
