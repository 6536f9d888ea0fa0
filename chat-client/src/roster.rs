use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Nicknames currently in the chat room, as last reported by the server.
///
/// Written only by the dispatcher, read by the command loop. Contents are
/// replaced wholesale on every user list update.
#[derive(Debug, Default)]
pub struct Roster {
    users: Mutex<Vec<String>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, users: Vec<String>) {
        let count = users.len();
        *self.lock() = users;
        debug!("Roster replaced ({} users)", count);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Splits the comma-joined `users` field; empty entries are dropped
pub fn parse_user_list(users: &str) -> Vec<String> {
    users
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
