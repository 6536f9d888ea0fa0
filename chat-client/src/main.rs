mod client;
mod commands;
mod config;
mod dispatcher;
mod error;
mod presenter;
mod roster;
mod session;

use crate::client::{ChatClient, ClientOptions};
use crate::commands::{parse_command, Command, HELP_TEXT};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::presenter::{ConsolePresenter, Notice, Presenter};
use crate::session::Nickname;
use clap::Parser;
use std::future::Future;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chat-client", version, about = "Terminal chat room client")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long, value_name = "PATH", env = "CHAT_CLIENT_CONFIG")]
    config: Option<PathBuf>,

    /// Nickname to log in with (prompted for when absent).
    #[arg(short, long)]
    nickname: Option<String>,

    /// Server host (prompted for when absent).
    #[arg(long)]
    host: Option<String>,

    /// Server port.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, source) = load_config(cli.config.as_deref())?;
    init_logging(&config);

    info!("Chat Client v{}", env!("CARGO_PKG_VERSION"));
    match &source {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => warn!("No config file found, using default configuration"),
    }

    println!("=== CHAT CLIENT ===");
    println!("Protocol version: {}\n", chat_proto::VERSION);

    let mut input = spawn_stdin_lines();

    let nickname = match cli.nickname.or_else(|| config.client.nickname.clone()) {
        Some(raw) => Nickname::new(&raw)?,
        None => prompt_nickname(&mut input).await?,
    };

    let default_port = cli.port.unwrap_or(config.client.server_port);
    let (host, port) = match cli.host {
        Some(host) => (host, default_port),
        None => prompt_server(&mut input, &config.client.server_addr, default_port).await?,
    };

    let presenter: Arc<dyn Presenter> = Arc::new(ConsolePresenter);
    let mut client = ChatClient::new(
        nickname,
        ClientOptions::from_config(&config),
        presenter.clone(),
    );

    println!("\nConnecting to {}:{}...", host, port);

    if let Err(e) = client.connect(&host, port).await {
        println!("[ERROR] Could not connect to {}:{}: {}", host, port, e);
        return Err(e.into());
    }

    let login = tokio::select! {
        result = client.login() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    match login {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            error!("Login failed: {}", e);
            println!("[ERROR] Could not log in: {}", e);
            client.shutdown().await;
            return Err(e.into());
        }
        None => {
            info!("Interrupted during login");
            client.shutdown().await;
            println!("Goodbye!");
            return Ok(());
        }
    }

    println!("You can start chatting! Type /help for the command list\n");

    let interrupt = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    run_input_loop(&mut client, &mut input, presenter.as_ref(), interrupt).await;

    let reason = client.close_reason();
    client.shutdown().await;
    println!("Goodbye!");

    match reason {
        Some(reason) if reason.is_failure() => {
            Err(anyhow::anyhow!("connection closed: {:?}", reason))
        }
        _ => Ok(()),
    }
}

/// Reads stdin on a plain thread so a pending read never holds up exit
fn spawn_stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to read input: {}", e);
                    break;
                }
            }
        }
    });

    rx
}

/// Runs until quit, end of input, `interrupt` (Ctrl-C) or the connection
/// closing
async fn run_input_loop(
    client: &mut ChatClient,
    input: &mut mpsc::UnboundedReceiver<String>,
    presenter: &dyn Presenter,
    interrupt: impl Future<Output = ()>,
) {
    tokio::pin!(interrupt);

    loop {
        let line = tokio::select! {
            line = input.recv() => line,
            reason = client.closed() => {
                debug!("Connection closed ({:?}), leaving input loop", reason);
                break;
            }
            _ = &mut interrupt => {
                info!("Interrupted, shutting down");
                break;
            }
        };

        let Some(line) = line else {
            info!("End of input");
            break;
        };

        let Some(command) = parse_command(&line) else {
            continue;
        };

        match command {
            Command::Quit => {
                info!("Exiting...");
                break;
            }
            Command::Help => println!("\n{}\n", HELP_TEXT),
            Command::Users => {
                let users = client.roster().snapshot();
                let text = if users.is_empty() {
                    "No user list received yet".to_string()
                } else {
                    format!("Users online ({}): {}", users.len(), users.join(", "))
                };
                presenter.notify(Notice::Info(text));
            }
            Command::Unknown(cmd) => presenter.notify(Notice::Info(format!(
                "Unknown command: {}. Type /help for the command list",
                cmd
            ))),
            Command::Ping => match client.send_ping().await {
                Ok(()) => presenter.notify(Notice::Info("Ping sent".to_string())),
                Err(e) => {
                    warn!("Ping failed: {}", e);
                    println!("[ERROR] {}", e);
                }
            },
            Command::Chat(text) => {
                if let Err(e) = client.send_chat(&text).await {
                    warn!("Failed to send message: {}", e);
                    println!("[ERROR] Could not send message: {}", e);
                    if matches!(e, ClientError::Transport(_)) {
                        break;
                    }
                }
            }
        }
    }
}

async fn prompt_nickname(
    input: &mut mpsc::UnboundedReceiver<String>,
) -> anyhow::Result<Nickname> {
    loop {
        let Some(raw) = prompt(input, "Enter your nickname: ").await? else {
            anyhow::bail!("input closed before a nickname was entered");
        };

        match Nickname::new(&raw) {
            Ok(nickname) => return Ok(nickname),
            Err(e) => println!("[ERROR] {}", e),
        }
    }
}

async fn prompt_server(
    input: &mut mpsc::UnboundedReceiver<String>,
    default_host: &str,
    default_port: u16,
) -> anyhow::Result<(String, u16)> {
    let question = format!(
        "Server address (Enter for {}:{}): ",
        default_host, default_port
    );
    let answer = prompt(input, &question).await?.unwrap_or_default();
    Ok(parse_server_address(&answer, default_host, default_port))
}

/// Prints a prompt and reads one trimmed line; `None` on end of input
async fn prompt(
    input: &mut mpsc::UnboundedReceiver<String>,
    question: &str,
) -> anyhow::Result<Option<String>> {
    print!("{}", question);
    // print! does not flush on its own
    std::io::stdout().flush()?;

    Ok(input.recv().await.map(|line| line.trim().to_string()))
}

/// Accepts `host`, `host:port` or an empty answer
fn parse_server_address(answer: &str, default_host: &str, default_port: u16) -> (String, u16) {
    let answer = answer.trim();
    if answer.is_empty() {
        return (default_host.to_string(), default_port);
    }

    match answer.rsplit_once(':') {
        Some((host, port)) => {
            let host = if host.is_empty() { default_host } else { host };
            let port = port.parse().unwrap_or_else(|_| {
                println!("[WARN] Invalid port '{}', using {}", port, default_port);
                default_port
            });
            (host.to_string(), port)
        }
        None => (answer.to_string(), default_port),
    }
}

fn load_config(explicit: Option<&Path>) -> anyhow::Result<(ClientConfig, Option<PathBuf>)> {
    if let Some(path) = explicit {
        let config = ClientConfig::from_file(path)?;
        return Ok((config, Some(path.to_path_buf())));
    }

    // Try configs/client.toml (development), then ./client.toml
    for candidate in ["configs/client.toml", "client.toml"] {
        if let Ok(config) = ClientConfig::from_file(candidate) {
            return Ok((config, Some(PathBuf::from(candidate))));
        }
    }

    Ok((ClientConfig::default_config(), None))
}

/// Logs go to stderr so they never interleave with the chat transcript
fn init_logging(config: &ClientConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.log_level));

    if config.logging.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CloseReason;

    /// Input already typed, followed by end of input
    fn lines(input: &[&str]) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        for line in input {
            tx.send(line.to_string()).unwrap();
        }
        rx
    }

    #[test]
    fn test_parses_connection_flags() {
        let cli = Cli::try_parse_from([
            "chat-client",
            "--nickname",
            "alice",
            "--host",
            "10.0.0.5",
            "-p",
            "4000",
        ])
        .expect("flags should parse");

        assert_eq!(cli.nickname.as_deref(), Some("alice"));
        assert_eq!(cli.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(cli.port, Some(4000));
    }

    #[test]
    fn test_rejects_bad_port_flag() {
        assert!(Cli::try_parse_from(["chat-client", "--port", "99999"]).is_err());
    }

    #[test]
    fn test_server_address_forms() {
        assert_eq!(
            parse_server_address("", "127.0.0.1", 12345),
            ("127.0.0.1".to_string(), 12345)
        );
        assert_eq!(
            parse_server_address("chat.local", "127.0.0.1", 12345),
            ("chat.local".to_string(), 12345)
        );
        assert_eq!(
            parse_server_address("chat.local:4000", "127.0.0.1", 12345),
            ("chat.local".to_string(), 4000)
        );
        assert_eq!(
            parse_server_address("chat.local:nope", "127.0.0.1", 12345),
            ("chat.local".to_string(), 12345)
        );
    }

    #[tokio::test]
    async fn test_prompt_retries_invalid_nickname() {
        let mut input = lines(&["   ", "bob"]);
        let nickname = prompt_nickname(&mut input).await.unwrap();
        assert_eq!(nickname.as_str(), "bob");
    }

    fn attached_client() -> (ChatClient, tokio::io::DuplexStream) {
        let mut client = ChatClient::new(
            Nickname::new("alice").unwrap(),
            ClientOptions::default(),
            Arc::new(ConsolePresenter),
        );
        let (client_end, server_end) = tokio::io::duplex(4096);
        client.attach(client_end).unwrap();
        (client, server_end)
    }

    #[tokio::test]
    async fn test_interrupt_ends_input_loop_cleanly() {
        let (mut client, _server) = attached_client();
        let (_typing, mut input) = mpsc::unbounded_channel::<String>();

        run_input_loop(&mut client, &mut input, &ConsolePresenter, async {}).await;
        assert_eq!(client.close_reason(), None);

        client.shutdown().await;
        assert_eq!(client.close_reason(), Some(CloseReason::Local));
        assert!(!CloseReason::Local.is_failure());
    }

    #[tokio::test]
    async fn test_input_loop_stops_when_server_hangs_up() {
        let (mut client, server) = attached_client();
        let (_typing, mut input) = mpsc::unbounded_channel::<String>();
        drop(server);

        run_input_loop(
            &mut client,
            &mut input,
            &ConsolePresenter,
            std::future::pending(),
        )
        .await;

        assert_eq!(client.close_reason(), Some(CloseReason::PeerClosed));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_quit_command_ends_input_loop() {
        let (mut client, _server) = attached_client();
        let mut input = lines(&["/help", "/quit", "never read"]);

        run_input_loop(
            &mut client,
            &mut input,
            &ConsolePresenter,
            std::future::pending(),
        )
        .await;

        assert_eq!(input.recv().await.as_deref(), Some("never read"));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_prompt_fails_on_closed_input() {
        let mut input = lines(&[]);
        assert!(prompt_nickname(&mut input).await.is_err());
    }
}
