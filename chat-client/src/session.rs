use crate::error::ClientError;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;

pub const MAX_NICKNAME_LEN: usize = 50;

type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingLogin,
    Authenticated,
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingLogin => "awaiting login",
            SessionState::Authenticated => "authenticated",
            SessionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// A trimmed nickname of 1 to 50 characters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nickname(String);

impl Nickname {
    pub fn new(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let len = trimmed.chars().count();

        if len == 0 || len > MAX_NICKNAME_LEN {
            return Err(ClientError::InvalidNickname(format!(
                "must be 1-{} characters, got {}",
                MAX_NICKNAME_LEN, len
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nickname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the handshake does after a failed login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStep {
    Retry { attempt: u32 },
    GiveUp,
}

/// Connection lifecycle and login attempt bookkeeping.
///
/// ```text
/// Disconnected ─connect─▶ Connecting ─login sent─▶ AwaitingLogin ─success─▶ Authenticated
///      ▲                                             │  ▲    │                    │
///      │                                  fail/retry └──┘    │ retries exhausted  │ quit / EOF / error
///      │                                                     ▼                    ▼
///      └──────────────────────────── Disconnected ◀──────── Closing ◀────────────┘
/// ```
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    login_attempt: u32,
    max_retries: u32,
    /// Set once the current connection has logged in; survives closing
    logged_in: bool,
}

impl SessionMachine {
    /// `max_retries` is the total number of login frames sent before giving up
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: SessionState::Disconnected,
            login_attempt: 0,
            max_retries: max_retries.max(1),
            logged_in: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn login_attempt(&self) -> u32 {
        self.login_attempt
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn attempts_remaining(&self) -> bool {
        self.login_attempt < self.max_retries
    }

    /// Whether this connection reached Authenticated, even if it has
    /// moved on to closing since
    pub fn logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn begin_connect(&mut self) -> Result<()> {
        self.require_state(SessionState::Disconnected, "connect")?;
        self.state = SessionState::Connecting;
        self.login_attempt = 0;
        self.logged_in = false;
        Ok(())
    }

    pub fn login_sent(&mut self) -> Result<()> {
        self.require_state(SessionState::Connecting, "send login")?;
        self.state = SessionState::AwaitingLogin;
        self.login_attempt = 1;
        Ok(())
    }

    pub fn authenticate(&mut self) -> Result<()> {
        self.require_state(SessionState::AwaitingLogin, "authenticate")?;
        self.state = SessionState::Authenticated;
        self.logged_in = true;
        Ok(())
    }

    /// Timeout or recoverable rejection of the current attempt
    pub fn login_failed(&mut self) -> Result<LoginStep> {
        self.require_state(SessionState::AwaitingLogin, "retry login")?;

        if self.attempts_remaining() {
            self.login_attempt += 1;
            Ok(LoginStep::Retry {
                attempt: self.login_attempt,
            })
        } else {
            self.state = SessionState::Disconnected;
            Ok(LoginStep::GiveUp)
        }
    }

    /// Unrecoverable login rejection
    pub fn abandon_login(&mut self) -> Result<()> {
        self.require_state(SessionState::AwaitingLogin, "abandon login")?;
        self.state = SessionState::Disconnected;
        Ok(())
    }

    /// Starts tearing the connection down. No-op once closing or closed.
    pub fn begin_close(&mut self) {
        if !matches!(self.state, SessionState::Disconnected | SessionState::Closing) {
            self.state = SessionState::Closing;
        }
    }

    pub fn closed(&mut self) {
        self.state = SessionState::Disconnected;
    }

    fn require_state(&self, state: SessionState, event: &'static str) -> Result<()> {
        if self.state != state {
            return Err(ClientError::InvalidTransition {
                state: self.state,
                event,
            });
        }
        Ok(())
    }
}

/// The client's connection session, shared between the receiver and the
/// foreground loop.
///
/// Every transition runs under the machine's lock and publishes the new
/// state on a watch channel before the lock is released, so waiters see
/// states in the order they happened.
#[derive(Debug)]
pub struct Session {
    nickname: Nickname,
    machine: Mutex<SessionMachine>,
    state_tx: watch::Sender<SessionState>,
}

impl Session {
    pub fn new(nickname: Nickname, max_retries: u32) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            nickname,
            machine: Mutex::new(SessionMachine::new(max_retries)),
            state_tx,
        }
    }

    pub fn nickname(&self) -> &Nickname {
        &self.nickname
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    pub fn snapshot(&self) -> SessionMachine {
        self.lock().clone()
    }

    pub fn attempts_remaining(&self) -> bool {
        self.lock().attempts_remaining()
    }

    pub fn logged_in(&self) -> bool {
        self.lock().logged_in()
    }

    /// Receiver that is notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn begin_connect(&self) -> Result<()> {
        self.transition(SessionMachine::begin_connect)
    }

    pub fn login_sent(&self) -> Result<()> {
        self.transition(SessionMachine::login_sent)
    }

    pub fn authenticate(&self) -> Result<()> {
        self.transition(SessionMachine::authenticate)
    }

    pub fn login_failed(&self) -> Result<LoginStep> {
        self.transition(SessionMachine::login_failed)
    }

    pub fn abandon_login(&self) -> Result<()> {
        self.transition(SessionMachine::abandon_login)
    }

    pub fn begin_close(&self) {
        self.transition(|m| {
            m.begin_close();
            Ok(())
        })
        .unwrap_or_default()
    }

    pub fn closed(&self) {
        self.transition(|m| {
            m.closed();
            Ok(())
        })
        .unwrap_or_default()
    }

    fn transition<T>(&self, f: impl FnOnce(&mut SessionMachine) -> Result<T>) -> Result<T> {
        let mut machine = self.lock();
        let result = f(&mut *machine);

        let state = machine.state();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            debug!(
                "Session {} -> {} (attempt {}/{})",
                self.nickname,
                state,
                machine.login_attempt(),
                machine.max_retries()
            );
        }

        result
    }

    fn lock(&self) -> MutexGuard<'_, SessionMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn awaiting(max_retries: u32) -> SessionMachine {
        let mut machine = SessionMachine::new(max_retries);
        machine.begin_connect().unwrap();
        machine.login_sent().unwrap();
        machine
    }

    #[test]
    fn test_nickname_validation() {
        assert_eq!(Nickname::new("  alice \t").unwrap().as_str(), "alice");
        assert!(Nickname::new("").is_err());
        assert!(Nickname::new("   ").is_err());
        assert!(Nickname::new(&"x".repeat(50)).is_ok());
        assert!(Nickname::new(&"x".repeat(51)).is_err());
        // Counted in characters, not bytes
        assert!(Nickname::new(&"é".repeat(50)).is_ok());
    }

    #[test]
    fn test_happy_path() {
        let mut machine = SessionMachine::new(3);
        assert_eq!(machine.state(), SessionState::Disconnected);

        machine.begin_connect().unwrap();
        assert_eq!(machine.state(), SessionState::Connecting);

        machine.login_sent().unwrap();
        assert_eq!(machine.state(), SessionState::AwaitingLogin);
        assert_eq!(machine.login_attempt(), 1);

        machine.authenticate().unwrap();
        assert_eq!(machine.state(), SessionState::Authenticated);

        machine.begin_close();
        assert_eq!(machine.state(), SessionState::Closing);

        machine.closed();
        assert_eq!(machine.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_retry_bound() {
        let mut machine = awaiting(3);

        assert_eq!(machine.login_failed().unwrap(), LoginStep::Retry { attempt: 2 });
        assert_eq!(machine.login_failed().unwrap(), LoginStep::Retry { attempt: 3 });
        assert_eq!(machine.login_failed().unwrap(), LoginStep::GiveUp);
        assert_eq!(machine.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_single_attempt_gives_up_immediately() {
        let mut machine = awaiting(1);
        assert!(!machine.attempts_remaining());
        assert_eq!(machine.login_failed().unwrap(), LoginStep::GiveUp);
    }

    #[test]
    fn test_attempt_counter_resets_on_new_connection() {
        let mut machine = awaiting(3);
        machine.login_failed().unwrap();
        machine.abandon_login().unwrap();

        machine.begin_connect().unwrap();
        assert_eq!(machine.login_attempt(), 0);
        machine.login_sent().unwrap();
        assert_eq!(machine.login_attempt(), 1);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut machine = SessionMachine::new(3);

        assert!(matches!(
            machine.authenticate(),
            Err(ClientError::InvalidTransition {
                state: SessionState::Disconnected,
                ..
            })
        ));
        assert!(machine.login_sent().is_err());

        let mut machine = awaiting(3);
        machine.authenticate().unwrap();
        // A late login response must not re-authenticate or retry
        assert!(machine.authenticate().is_err());
        assert!(machine.login_failed().is_err());
        assert!(machine.begin_connect().is_err());
    }

    #[test]
    fn test_login_survives_close() {
        let mut machine = awaiting(3);
        assert!(!machine.logged_in());

        machine.authenticate().unwrap();
        machine.begin_close();
        machine.closed();
        assert!(machine.logged_in());

        // A new connection starts over
        machine.begin_connect().unwrap();
        assert!(!machine.logged_in());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut machine = SessionMachine::new(3);
        machine.begin_close();
        assert_eq!(machine.state(), SessionState::Disconnected);

        let mut machine = awaiting(3);
        machine.begin_close();
        machine.begin_close();
        assert_eq!(machine.state(), SessionState::Closing);
    }

    #[tokio::test]
    async fn test_session_publishes_transitions() {
        let session = Session::new(Nickname::new("alice").unwrap(), 3);
        let mut rx = session.subscribe();

        session.begin_connect().unwrap();
        session.login_sent().unwrap();

        let waiter = tokio::spawn(async move {
            rx.wait_for(|s| *s == SessionState::Authenticated)
                .await
                .map(|s| *s)
        });

        session.authenticate().unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), SessionState::Authenticated);
        assert!(session.is_authenticated());
        assert_eq!(session.snapshot().login_attempt(), 1);
    }

    #[test]
    fn test_failed_transition_leaves_state() {
        let session = Session::new(Nickname::new("bob").unwrap(), 3);
        assert!(session.authenticate().is_err());
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
