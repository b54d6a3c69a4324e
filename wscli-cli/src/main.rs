//! wscli - command-line interface to a websocket connection.
//!
//! Reads commands from standard input (a terminal or a script), keeps one
//! websocket connection open at a time and prints every inbound frame to
//! stdout.

use bytes::Bytes;
use clap::Parser;
use colored::Colorize;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wscli_websocket::{Dialer, HandlerConfig};

mod command;
mod console;
mod error;
mod input;
mod session;

use console::{Console, ConsoleOptions};
use error::{CliError, CliResult};
use session::Session;

const READ_BUFFER_SIZE: usize = 4096;

/// How long to wait before polling standard input again after end of input.
const EOF_BACKOFF: Duration = Duration::from_millis(500);

const COMMANDS_HELP: &str = r#"Commands:
  Connect to a websocket
      \dial ws://127.0.0.1:8080/ws

  Disconnect
      \hup

  Send a message (heredoc format)
      \msg [message terminator]
      message line 1
      message line 2
      [message terminator]

      (the default terminator is a blank line)

  Set HTTP headers for the next dial
      Authorization: awo875pu84uj6paj436up
      Content-Type: application/json

  List headers
      \hdrlst

  Remove one header (key without value)
      Authorization:

  Remove all headers
      \hdrclr

Ctrl-C to exit."#;

/// Command-line interface to a websocket connection
#[derive(Parser, Debug)]
#[command(name = "wscli")]
#[command(version)]
#[command(about = "Command-line interface to a websocket connection")]
#[command(after_help = COMMANDS_HELP)]
struct Cli {
    /// Websocket URL to dial at startup
    #[arg(value_name = "URL")]
    url: Option<String>,

    /// Print a timestamp and the sender before each message
    #[arg(long, env = "WSCLI_TS")]
    ts: bool,

    /// Append received messages to this file ("-" for none)
    #[arg(long, value_name = "PATH", default_value = "-", env = "WSCLI_LOG")]
    log: PathBuf,

    /// Read deadline in seconds, renewed before every receive (0 disables)
    #[arg(long, value_name = "SECS", default_value_t = 10, env = "WSCLI_READ_TIMEOUT")]
    read_timeout: u64,

    /// Write deadline in seconds (0 disables)
    #[arg(long, value_name = "SECS", default_value_t = 0, env = "WSCLI_WRITE_TIMEOUT")]
    write_timeout: u64,

    /// Send a ping every SECS seconds (0 disables)
    #[arg(long, value_name = "SECS", default_value_t = 0, env = "WSCLI_PING_INTERVAL")]
    ping_interval: u64,

    /// Timeout in seconds for connecting and the handshake
    #[arg(long, value_name = "SECS", default_value_t = 45, env = "WSCLI_CONNECT_TIMEOUT")]
    connect_timeout: u64,

    /// Exit at end of input instead of waiting for more
    #[arg(long, env = "WSCLI_EXIT_ON_EOF")]
    exit_on_eof: bool,

    /// Disable colored output
    #[arg(long, env = "WSCLI_NO_COLOR")]
    no_color: bool,
}

impl Cli {
    fn handler_config(&self) -> HandlerConfig {
        HandlerConfig::new()
            .probe_interval(Duration::from_secs(self.ping_interval))
            .read_timeout(Duration::from_secs(self.read_timeout))
            .write_timeout(Duration::from_secs(self.write_timeout))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    wscli_log::init();

    if cli.no_color {
        colored::control::set_override(false);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let log = open_log(&cli.log)?;
    let console = Arc::new(Console::stdio(
        log,
        ConsoleOptions {
            timestamps: cli.ts,
            color: !cli.no_color,
        },
    ));
    let dialer = Dialer::new().connect_timeout(Duration::from_secs(cli.connect_timeout));
    let mut session = Session::new(console.clone(), Arc::new(dialer), cli.handler_config());

    if let Some(url) = cli.url.as_deref().filter(|url| url.starts_with("ws")) {
        if let Err(e) = session.dial(url).await {
            console.report(&e);
        }
    }

    let result = read_commands(&mut session, cli.exit_on_eof).await;
    if session.is_collecting() {
        tracing::warn!("input ended inside an unterminated \\msg; the message was not sent");
    }
    tracing::debug!(connected = session.is_connected(), "shutting down");
    session.shutdown().await;
    result
}

/// Feed standard input to the session until Ctrl-C (or end of input with
/// `--exit-on-eof`).
async fn read_commands(session: &mut Session, exit_on_eof: bool) -> CliResult<()> {
    let mut input = spawn_stdin_reader()?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::debug!("interrupted");
                return Ok(());
            }
            chunk = input.recv() => match chunk {
                Some(Ok(chunk)) if chunk.is_empty() => {
                    tokio::select! {
                        _ = &mut ctrl_c => return Ok(()),
                        _ = session.finish() => {}
                    }
                    if exit_on_eof {
                        return Ok(());
                    }
                }
                // a stalled dial or send must not hold off Ctrl-C
                Some(Ok(chunk)) => tokio::select! {
                    _ = &mut ctrl_c => {
                        tracing::debug!("interrupted");
                        return Ok(());
                    }
                    _ = session.feed(&chunk) => {}
                },
                Some(Err(e)) => return Err(CliError::Io(e)),
                None => return Ok(()),
            },
        }
    }
}

/// Read standard input on its own thread; an empty chunk marks end of input.
///
/// The thread is never joined and must stay off the runtime's blocking pool,
/// which waits for pending reads on shutdown.
fn spawn_stdin_reader() -> CliResult<mpsc::Receiver<io::Result<Bytes>>> {
    let (tx, rx) = mpsc::channel(1);
    std::thread::Builder::new()
        .name("wscli-stdin".to_string())
        .spawn(move || {
            let mut stdin = io::stdin().lock();
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            loop {
                let read = match stdin.read(&mut buf) {
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    read => read.map(|n| Bytes::copy_from_slice(&buf[..n])),
                };
                let eof = matches!(&read, Ok(chunk) if chunk.is_empty());
                let failed = read.is_err();
                if tx.blocking_send(read).is_err() || failed {
                    return;
                }
                if eof {
                    // a FIFO without a writer reports end of input immediately
                    std::thread::sleep(EOF_BACKOFF);
                }
            }
        })?;
    Ok(rx)
}

fn open_log(path: &Path) -> CliResult<Option<File>> {
    if path == Path::new("-") {
        return Ok(None);
    }

    let mut options = OpenOptions::new();
    options.read(true).append(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o664);
    }

    options
        .open(path)
        .map(Some)
        .map_err(|source| CliError::LogFile {
            path: path.to_path_buf(),
            source,
        })
}
