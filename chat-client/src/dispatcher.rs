use crate::error::ClientError;
use crate::presenter::{Notice, Presenter};
use crate::roster::{parse_user_list, Roster};
use crate::session::{Session, SessionState};
use chat_proto::{Frame, MessageKind, PayloadFields, ProtocolError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The only error code that makes a login rejection recoverable
pub const NICKNAME_CONFLICT: i64 = 409;

/// What the receiver should do after a frame has been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Continue,
    RetryLogin,
    FatalDisconnect,
}

/// Routes decoded frames to their effects on the session, the roster and
/// the presenter
pub struct Dispatcher {
    session: Arc<Session>,
    roster: Arc<Roster>,
    presenter: Arc<dyn Presenter>,
}

impl Dispatcher {
    pub fn new(session: Arc<Session>, roster: Arc<Roster>, presenter: Arc<dyn Presenter>) -> Self {
        Self {
            session,
            roster,
            presenter,
        }
    }

    pub fn presenter(&self) -> &Arc<dyn Presenter> {
        &self.presenter
    }

    /// Applies one frame. Payloads missing an expected field are logged
    /// and dropped; the session carries on.
    pub fn dispatch(&self, frame: &Frame) -> Directive {
        let Some(kind) = frame.kind() else {
            warn!("Unknown message type: {}", frame.code());
            return Directive::Continue;
        };

        let fields = PayloadFields::parse(&frame.text());
        debug!("Dispatching {} ({} fields)", kind, fields.len());

        let result = match kind {
            MessageKind::LoginResponse => self.on_login_response(&fields),
            MessageKind::ChatMessage => self.on_chat_message(&fields),
            MessageKind::UserJoin => self.on_presence(&fields, true),
            MessageKind::UserLeave => self.on_presence(&fields, false),
            MessageKind::UserList => self.on_user_list(&fields),
            MessageKind::ErrorNotice => self.on_error(&fields),
            // Server keepalives are not answered
            MessageKind::Ping => Ok(Directive::Continue),
            MessageKind::Pong => {
                debug!("Received PONG");
                Ok(Directive::Continue)
            }
            MessageKind::LoginRequest => {
                warn!("Ignoring unexpected {} from server", kind);
                Ok(Directive::Continue)
            }
        };

        match result {
            Ok(directive) => directive,
            Err(e) => {
                warn!("Dropping {} frame: {}", kind, e);
                Directive::Continue
            }
        }
    }

    /// Chat traffic may only leave once the session is authenticated
    pub fn authorize_outbound(&self, kind: MessageKind) -> Result<(), ClientError> {
        if kind == MessageKind::LoginRequest || self.session.is_authenticated() {
            return Ok(());
        }
        warn!("Refusing to send {} while {}", kind, self.session.state());
        Err(ClientError::NotAuthenticated)
    }

    fn on_login_response(&self, fields: &PayloadFields) -> Result<Directive, ProtocolError> {
        let success = fields.require_bool("success")?;
        let timestamp = timestamp(fields);

        if success {
            if let Err(e) = self.session.authenticate() {
                warn!("Ignoring login response: {}", e);
                return Ok(Directive::Continue);
            }
            info!("Logged in as {}", self.session.nickname());
            self.presenter.notify(Notice::LoginSucceeded {
                message: fields.get_str("message").unwrap_or("Login successful!").to_string(),
                timestamp,
            });
            return Ok(Directive::Continue);
        }

        self.presenter.notify(Notice::LoginFailed {
            message: fields.get_str("message").unwrap_or("Unknown error").to_string(),
        });
        Ok(self.login_rejected(true))
    }

    fn on_chat_message(&self, fields: &PayloadFields) -> Result<Directive, ProtocolError> {
        let nickname = fields.require_str("nickname")?;
        let message = fields.require_str("message")?;

        // Own lines were already shown when sent
        if nickname == self.session.nickname().as_str() {
            debug!("Suppressing echo of own message");
            return Ok(Directive::Continue);
        }

        self.presenter.notify(Notice::Chat {
            nickname: nickname.to_string(),
            message: message.to_string(),
            timestamp: timestamp(fields),
        });
        Ok(Directive::Continue)
    }

    fn on_presence(&self, fields: &PayloadFields, joined: bool) -> Result<Directive, ProtocolError> {
        let nickname = fields.require_str("nickname")?.to_string();
        let timestamp = timestamp(fields);

        let notice = if joined {
            Notice::Joined { nickname, timestamp }
        } else {
            Notice::Left { nickname, timestamp }
        };
        self.presenter.notify(notice);
        Ok(Directive::Continue)
    }

    fn on_user_list(&self, fields: &PayloadFields) -> Result<Directive, ProtocolError> {
        let users = parse_user_list(fields.require_str("users")?);
        let count = fields
            .get_i64("count")
            .map(|c| c.max(0) as usize)
            .unwrap_or(users.len());

        if count != users.len() {
            debug!("User list count {} differs from {} names", count, users.len());
        }

        self.roster.replace(users.clone());
        self.presenter.notify(Notice::Roster { users, count });
        Ok(Directive::Continue)
    }

    fn on_error(&self, fields: &PayloadFields) -> Result<Directive, ProtocolError> {
        let code = fields.require_i64("error_code")?;
        let message = fields.get_str("error_message").unwrap_or("Unknown error");

        warn!("Server error {}: {}", code, message);
        self.presenter.notify(Notice::Error {
            code,
            message: message.to_string(),
            timestamp: timestamp(fields),
        });

        if self.session.state() != SessionState::AwaitingLogin {
            return Ok(Directive::Continue);
        }
        Ok(self.login_rejected(code == NICKNAME_CONFLICT))
    }

    fn login_rejected(&self, recoverable: bool) -> Directive {
        if self.session.state() != SessionState::AwaitingLogin {
            warn!("Login rejection outside of login handshake, ignoring");
            return Directive::Continue;
        }

        if recoverable && self.session.attempts_remaining() {
            Directive::RetryLogin
        } else {
            Directive::FatalDisconnect
        }
    }
}

fn timestamp(fields: &PayloadFields) -> Option<f64> {
    fields.get_f64("timestamp").filter(|ts| *ts > 0.0)
}
