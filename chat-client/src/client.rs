use crate::config::ClientConfig;
use crate::dispatcher::{Directive, Dispatcher};
use crate::error::ClientError;
use crate::presenter::{Notice, Presenter};
use crate::roster::Roster;
use crate::session::{LoginStep, Nickname, Session, SessionState};
use chat_proto::{
    write_frame, FrameCodec, MessageKind, PayloadBuilder, ProtocolError, ReassemblyBuffer,
    DEFAULT_BUFFER_CAPACITY,
};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

const READ_CHUNK_SIZE: usize = 4096;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub max_retries: u32,
    pub login_timeout: Duration,
    pub buffer_capacity: usize,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
}

impl ClientOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.login.max_retries,
            login_timeout: Duration::from_secs(config.login.timeout_secs),
            buffer_capacity: config.limits.buffer_capacity,
            connect_timeout: Duration::from_secs(config.timeouts.connect_timeout_secs),
            write_timeout: Duration::from_secs(config.timeouts.write_timeout_secs),
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            login_timeout: Duration::from_secs(5),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(30),
        }
    }
}

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The user quit or the client shut down
    Local,
    /// The server closed the stream
    PeerClosed,
    /// A read on the transport failed
    Transport,
    /// The server sent a corrupted or oversized frame
    ProtocolViolation,
}

impl CloseReason {
    pub fn is_failure(self) -> bool {
        matches!(self, CloseReason::Transport | CloseReason::ProtocolViolation)
    }
}

/// `None` while the connection is running
type ClosedTx = watch::Sender<Option<CloseReason>>;

/// Records the first close reason; later ones are ignored
fn mark_closed(closed_tx: &ClosedTx, reason: CloseReason) -> bool {
    closed_tx.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(reason);
        true
    })
}

enum LoginOutcome {
    Authenticated,
    Rejected { recoverable: bool },
    Closed,
}

/// Chat client: a background receiver feeding the dispatcher, and the
/// foreground side that logs in and sends frames.
pub struct ChatClient {
    session: Arc<Session>,
    roster: Arc<Roster>,
    dispatcher: Arc<Dispatcher>,
    codec: FrameCodec,
    options: ClientOptions,
    writer: Option<BoxedWriter>,
    closed_tx: Arc<ClosedTx>,
    login_rx: Option<mpsc::UnboundedReceiver<Directive>>,
    receiver: Option<JoinHandle<()>>,
}

impl ChatClient {
    pub fn new(nickname: Nickname, options: ClientOptions, presenter: Arc<dyn Presenter>) -> Self {
        let session = Arc::new(Session::new(nickname, options.max_retries));
        let roster = Arc::new(Roster::new());
        let dispatcher = Arc::new(Dispatcher::new(session.clone(), roster.clone(), presenter));
        let (closed_tx, _) = watch::channel(None);

        Self {
            session,
            roster,
            dispatcher,
            codec: FrameCodec::new(options.buffer_capacity),
            options,
            writer: None,
            closed_tx: Arc::new(closed_tx),
            login_rx: None,
            receiver: None,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    /// Opens a TCP connection and starts the receiver
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.session.begin_connect()?;

        let addr = format!("{}:{}", host, port);
        info!("Connecting to {}...", addr);

        let stream = match timeout(self.options.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!("Failed to connect: {}", e);
                self.session.closed();
                return Err(e.into());
            }
            Err(_) => {
                error!("Connection timeout");
                self.session.closed();
                return Err(io::Error::new(io::ErrorKind::TimedOut, "connect timeout").into());
            }
        };

        info!("Connected to {}", addr);
        self.start(stream);
        Ok(())
    }

    /// Runs the client over an already established stream
    pub fn attach<S>(&mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.session.begin_connect()?;
        self.start(stream);
        Ok(())
    }

    fn start<S>(&mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (login_tx, login_rx) = mpsc::unbounded_channel();

        self.closed_tx.send_replace(None);
        self.writer = Some(Box::new(writer));
        self.login_rx = Some(login_rx);

        let receiver = Receiver {
            buffer: ReassemblyBuffer::with_capacity(self.options.buffer_capacity),
            dispatcher: self.dispatcher.clone(),
            session: self.session.clone(),
            login_tx,
            closed_tx: self.closed_tx.clone(),
        };
        self.receiver = Some(tokio::spawn(receiver.run(reader)));
    }

    /// Performs the login handshake.
    ///
    /// Each attempt sends the nickname and waits up to the login timeout for
    /// the session to become authenticated. Timeouts and nickname conflicts
    /// are retried until `max_retries` attempts have been made.
    pub async fn login(&mut self) -> Result<()> {
        let mut login_rx = self.login_rx.take().ok_or(ClientError::ConnectionClosed)?;
        let mut state_rx = self.session.subscribe();
        let mut closed_rx = self.closed_tx.subscribe();
        let nickname = self.session.nickname().to_string();

        // Enter AwaitingLogin before the request leaves so a fast response
        // always finds the session ready for it
        self.session.login_sent()?;

        loop {
            let snapshot = self.session.snapshot();
            let (attempt, max_retries) = (snapshot.login_attempt(), snapshot.max_retries());

            if attempt > 1 {
                self.notify(Notice::Info(format!(
                    "Retrying login, attempt {}/{}",
                    attempt, max_retries
                )));
            }
            info!(
                "Sending login request as {} (attempt {}/{})",
                nickname, attempt, max_retries
            );

            if let Err(e) = self.send(MessageKind::LoginRequest, nickname.as_bytes()).await {
                error!("Failed to send login request: {}", e);
                self.session.closed();
                return Err(e);
            }

            let outcome = timeout(
                self.options.login_timeout,
                wait_for_login(&mut state_rx, &mut login_rx, &mut closed_rx),
            )
            .await;

            let failure = match outcome {
                Ok(LoginOutcome::Authenticated) => return Ok(()),
                Ok(LoginOutcome::Rejected { recoverable: true }) => {
                    warn!("Login rejected (attempt {}/{})", attempt, max_retries);
                    ClientError::LoginRejected("nickname already in use".to_string())
                }
                Ok(LoginOutcome::Rejected { recoverable: false }) => {
                    error!("Login rejected by server");
                    self.session.abandon_login()?;
                    return Err(ClientError::LoginRejected("rejected by server".to_string()));
                }
                // The server may accept the login and hang up before this
                // task observes the Authenticated state
                Ok(LoginOutcome::Closed) if self.session.logged_in() => {
                    info!("Logged in, but the server has already closed the connection");
                    return Ok(());
                }
                Ok(LoginOutcome::Closed) => {
                    error!("Connection closed during login");
                    self.session.closed();
                    return Err(ClientError::ConnectionClosed);
                }
                Err(_) => {
                    warn!(
                        "Timeout waiting for login response (attempt {}/{})",
                        attempt, max_retries
                    );
                    self.notify(Notice::Info("Timeout waiting for login response".to_string()));
                    ClientError::LoginTimeout(attempt)
                }
            };

            match self.session.login_failed() {
                Ok(LoginStep::Retry { attempt }) => debug!("Retrying login (attempt {})", attempt),
                Ok(LoginStep::GiveUp) => {
                    error!("Login failed after {} attempts", attempt);
                    return Err(failure);
                }
                // A response landed between the timeout firing and now
                Err(_) if self.session.logged_in() => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Encodes and sends a frame requested by the input side
    pub async fn submit_outbound(&mut self, kind: MessageKind, payload: &[u8]) -> Result<()> {
        self.dispatcher.authorize_outbound(kind)?;
        self.send(kind, payload).await
    }

    /// Sends a chat line and shows it locally; the server's echo is suppressed
    pub async fn send_chat(&mut self, text: &str) -> Result<()> {
        self.submit_outbound(MessageKind::ChatMessage, text.as_bytes())
            .await?;

        self.notify(Notice::Chat {
            nickname: self.session.nickname().to_string(),
            message: text.to_string(),
            timestamp: None,
        });
        Ok(())
    }

    pub async fn send_ping(&mut self) -> Result<()> {
        let payload = PayloadBuilder::new()
            .with_i64("timestamp", chrono::Utc::now().timestamp())
            .build();
        self.submit_outbound(MessageKind::Ping, payload.as_bytes())
            .await
    }

    /// Resolves once the connection has ended, with the reason
    pub async fn closed(&self) -> CloseReason {
        let mut closed_rx = self.closed_tx.subscribe();
        let reason = match closed_rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.unwrap_or(CloseReason::Local),
            Err(_) => CloseReason::Local,
        };
        reason
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.closed_tx.borrow()
    }

    /// Closes the transport and waits for the receiver to stop.
    ///
    /// Clearing the running flag wakes the receiver out of its pending
    /// read; shutting down the write half tells the server we are gone.
    pub async fn shutdown(&mut self) {
        info!("Disconnecting...");
        self.session.begin_close();
        mark_closed(&self.closed_tx, CloseReason::Local);

        if let Some(mut writer) = self.writer.take() {
            match timeout(self.options.write_timeout, writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Error shutting down transport: {}", e),
                Err(_) => debug!("Timed out shutting down transport"),
            }
        }

        if let Some(handle) = self.receiver.take() {
            if let Err(e) = handle.await {
                warn!("Receiver task ended abnormally: {}", e);
            }
        }

        self.login_rx = None;
        self.session.closed();
    }

    async fn send(&mut self, kind: MessageKind, payload: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(ClientError::ConnectionClosed)?;

        timeout(
            self.options.write_timeout,
            write_frame(writer, &self.codec, kind, payload),
        )
        .await
        .map_err(|_| ClientError::Transport(io::Error::new(io::ErrorKind::TimedOut, "write timeout")))?
        .map_err(ClientError::from)
    }

    fn notify(&self, notice: Notice) {
        self.dispatcher.presenter().notify(notice);
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if let Some(handle) = self.receiver.take() {
            handle.abort();
        }
    }
}

async fn wait_for_login(
    state_rx: &mut watch::Receiver<SessionState>,
    login_rx: &mut mpsc::UnboundedReceiver<Directive>,
    closed_rx: &mut watch::Receiver<Option<CloseReason>>,
) -> LoginOutcome {
    tokio::select! {
        // Authenticated wins over a simultaneous close. If the session has
        // already moved on to Closing, the caller checks `logged_in`
        biased;

        authenticated = state_rx.wait_for(|state| *state == SessionState::Authenticated) => {
            if authenticated.is_ok() {
                LoginOutcome::Authenticated
            } else {
                LoginOutcome::Closed
            }
        }
        directive = login_rx.recv() => match directive {
            Some(Directive::RetryLogin) => LoginOutcome::Rejected { recoverable: true },
            Some(Directive::FatalDisconnect) => LoginOutcome::Rejected { recoverable: false },
            Some(Directive::Continue) | None => LoginOutcome::Closed,
        },
        _ = closed_rx.wait_for(Option::is_some) => LoginOutcome::Closed,
    }
}

/// Background side: reads the transport, reassembles frames and
/// dispatches them in arrival order
struct Receiver {
    buffer: ReassemblyBuffer,
    dispatcher: Arc<Dispatcher>,
    session: Arc<Session>,
    login_tx: mpsc::UnboundedSender<Directive>,
    closed_tx: Arc<ClosedTx>,
}

impl Receiver {
    async fn run<R>(mut self, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut closed_rx = self.closed_tx.subscribe();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        let reason = loop {
            // Never read more than the buffer can take
            let limit = self.buffer.remaining_capacity().clamp(1, chunk.len());

            let read = tokio::select! {
                read = reader.read(&mut chunk[..limit]) => read,
                _ = closed_rx.wait_for(Option::is_some) => {
                    debug!("Receiver stopping");
                    return;
                }
            };

            let n = match read {
                Ok(0) => {
                    info!("Server closed the connection");
                    break CloseReason::PeerClosed;
                }
                Ok(n) => n,
                Err(e) => {
                    error!("Failed to read from server: {}", e);
                    break CloseReason::Transport;
                }
            };

            if let Err(e) = self.process(&chunk[..n]) {
                error!("Closing connection: {}", e);
                break CloseReason::ProtocolViolation;
            }
        };

        self.session.begin_close();
        if mark_closed(&self.closed_tx, reason) {
            let message = match reason {
                CloseReason::PeerClosed => "Lost connection to server",
                CloseReason::Transport => "Connection error",
                CloseReason::ProtocolViolation => "Protocol violation, connection closed",
                CloseReason::Local => "Disconnected",
            };
            self.dispatcher.presenter().notify(Notice::Info(message.to_string()));
        }
    }

    fn process(&mut self, data: &[u8]) -> std::result::Result<(), ProtocolError> {
        for result in self.buffer.ingest(data)? {
            let frame = result?;

            match self.dispatcher.dispatch(&frame) {
                Directive::Continue => {}
                directive => {
                    if self.login_tx.send(directive).is_err() {
                        warn!("No login in progress, ignoring {:?}", directive);
                    }
                }
            }
        }
        Ok(())
    }
}
