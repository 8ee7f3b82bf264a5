//! Daemon Stream CLI - tail a daemon's console and resource usage.
//!
//! This is the main binary entry point. See the `daemon_stream` library
//! for the core functionality.

use anyhow::{Context, Result};
use daemon_stream::{
    AccessControl, ConnectionEndpoint, ConsoleStream, LineKind, LogLine, StaticAccess,
    StatsStream, StreamConfig, StreamEndpoints, Transport, WsTransport,
};
use mimalloc::MiMalloc;

/// Global allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

/// Global flag for signal-triggered shutdown (as Arc for signal-hook compatibility)
static SHUTDOWN_FLAG: std::sync::LazyLock<Arc<AtomicBool>> =
    std::sync::LazyLock::new(|| Arc::new(AtomicBool::new(false)));

/// How often the foreground loop drains new lines and stdin.
const TICK: Duration = Duration::from_millis(100);

// CLI
#[derive(Parser)]
#[command(name = "daemon-stream")]
#[command(version)]
#[command(about = "Live console and resource stream for a remote daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream console output and stats; stdin lines are sent as commands
    Watch {
        /// Console WebSocket URL
        #[arg(long)]
        console_url: String,
        /// Stats WebSocket URL (derived from the console URL when omitted)
        #[arg(long)]
        stats_url: Option<String>,
        /// Connection token
        #[arg(long, env = "DAEMON_STREAM_TOKEN", hide_env_values = true)]
        token: String,
        /// Config file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Do not open the stats stream
        #[arg(long)]
        no_stats: bool,
    },
}

/// What the user typed on stdin.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Command(String),
    Reconnect,
    Clear,
    Quit,
}

impl Input {
    fn parse(line: &str) -> Self {
        match line.trim() {
            "/reconnect" => Self::Reconnect,
            "/clear" => Self::Clear,
            "/quit" => Self::Quit,
            _ => Self::Command(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

fn format_line(line: &LogLine) -> String {
    match line.kind {
        LineKind::Stdout => line.text.clone(),
        kind => format!("[{kind}] {}", line.text),
    }
}

fn human_rate(bytes_per_sec: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KiB/s", "MiB/s", "GiB/s"];
    let mut value = bytes_per_sec;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Resolve endpoints from the command line.
fn resolve_endpoints(
    console_url: &str,
    stats_url: Option<&str>,
    token: &str,
) -> Result<(ConnectionEndpoint, Option<ConnectionEndpoint>)> {
    let console = ConnectionEndpoint::new(console_url, token);
    let stats = match stats_url {
        Some(url) => Some(ConnectionEndpoint::new(url, token)),
        None => StreamEndpoints::from_console(console.clone()).map(|e| e.stats),
    };
    // Without a stats endpoint the console is still checked on its own.
    let access = StaticAccess::new(StreamEndpoints {
        stats: stats.clone().unwrap_or_else(|| console.clone()),
        console,
    });
    let granted = access
        .endpoints("cli", "local")
        .context("Not authorized to stream")?;
    Ok((granted.console, stats.map(|_| granted.stats)))
}

/// Read stdin on a plain thread; the foreground loop polls the receiver.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn run_watch(
    console_url: &str,
    stats_url: Option<&str>,
    token: &str,
    config_path: Option<&std::path::Path>,
    no_stats: bool,
) -> Result<()> {
    let config = StreamConfig::load(config_path)?;

    use signal_hook::consts::signal::{SIGINT, SIGTERM, SIGHUP};
    use signal_hook::flag;
    flag::register(SIGINT, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGTERM, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGHUP, Arc::clone(&SHUTDOWN_FLAG))?;

    let (console_endpoint, stats_endpoint) = resolve_endpoints(console_url, stats_url, token)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let enter = runtime.enter();

    let transport: Arc<dyn Transport> = Arc::new(WsTransport);
    let console = ConsoleStream::spawn(config.console_retry, config.max_lines, Arc::clone(&transport));
    console.start(console_endpoint);

    let stats = match (stats_endpoint, no_stats) {
        (Some(endpoint), false) => {
            let stats = StatsStream::spawn(config.stats_retry, config.history_window, transport);
            stats.start(endpoint);
            Some(stats)
        }
        (None, false) => {
            log::warn!("[stats] No stats URL given and none derivable from {console_url}; stats disabled");
            None
        }
        (_, true) => None,
    };

    log::info!("daemon-stream v{} watching {}", env!("CARGO_PKG_VERSION"), console_url);
    let input = spawn_stdin_reader();
    let mut seq = 0;
    let mut stats_seen = 0;
    let mut stdout = std::io::stdout();

    while !SHUTDOWN_FLAG.load(Ordering::Relaxed) {
        let mut quit = false;
        while let Ok(line) = input.try_recv() {
            match Input::parse(&line) {
                Input::Command(text) => {
                    // Failures are already visible as error lines.
                    let _ = console.send_command(&text);
                }
                Input::Reconnect => {
                    console.force_reconnect();
                    if let Some(stats) = &stats {
                        stats.force_reconnect();
                    }
                }
                Input::Clear => console.clear(),
                Input::Quit => quit = true,
            }
        }
        if quit {
            break;
        }

        let (lines, next) = console.since(seq);
        seq = next;
        for line in &lines {
            writeln!(stdout, "{}", format_line(line))?;
        }

        if let Some(stats) = &stats {
            let ingested = stats.ingested();
            if ingested != stats_seen {
                stats_seen = ingested;
                let snapshot = stats.snapshot();
                if let Some(latest) = snapshot.latest {
                    writeln!(
                        stdout,
                        "[stats] cpu {:.1}% | mem {:.1}% | rx {} | tx {}",
                        latest.cpu_percent,
                        latest.memory_percent,
                        human_rate(snapshot.rates.rx_rate),
                        human_rate(snapshot.rates.tx_rate)
                    )?;
                }
            }
        }
        stdout.flush()?;

        std::thread::sleep(TICK);
    }

    log::info!("Shutting down...");
    console.stop();
    if let Some(stats) = &stats {
        stats.stop();
    }
    drop(console);
    drop(stats);
    drop(enter);
    runtime.shutdown_timeout(Duration::from_secs(2));
    Ok(())
}

fn main() -> Result<()> {
    // Streamed console text owns stdout; logs go to stderr or a file.
    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    logger.format_timestamp_secs();
    if let Ok(path) = std::env::var("DAEMON_STREAM_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        logger.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    logger.init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            console_url,
            stats_url,
            token,
            config,
            no_stats,
        } => run_watch(&console_url, stats_url.as_deref(), &token, config.as_deref(), no_stats)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_parsing() {
        assert_eq!(Input::parse("/quit\n"), Input::Quit);
        assert_eq!(Input::parse(" /clear "), Input::Clear);
        assert_eq!(Input::parse("/reconnect"), Input::Reconnect);
        assert_eq!(Input::parse("say hi\r\n"), Input::Command("say hi".to_string()));
    }

    #[test]
    fn test_format_line_prefixes_non_stdout() {
        let out = LogLine::info("Connected");
        assert_eq!(format_line(&out), "[info] Connected");
        let out = LogLine::new("hello", LineKind::Stdout, chrono::Utc::now());
        assert_eq!(format_line(&out), "hello");
    }

    #[test]
    fn test_human_rate() {
        assert_eq!(human_rate(500.0), "500.0 B/s");
        assert_eq!(human_rate(2048.0), "2.0 KiB/s");
    }

    #[test]
    fn test_resolve_endpoints_derives_stats() {
        let (console, stats) =
            resolve_endpoints("wss://node.example.com/api/servers/x/console", None, "t").unwrap();
        assert_eq!(console.url, "wss://node.example.com/api/servers/x/console");
        assert_eq!(stats.unwrap().url, "wss://node.example.com/api/servers/x/stats/ws");

        let (_, stats) = resolve_endpoints("wss://node.example.com/other", None, "t").unwrap();
        assert!(stats.is_none());
        assert!(resolve_endpoints("wss://node.example.com/console", None, "").is_err());
    }

    #[test]
    fn test_resolve_endpoints_checks_console_without_stats() {
        assert!(resolve_endpoints("wss://node.example.com/other", None, "").is_err());
        assert!(resolve_endpoints("wss://node.example.com/other", Some("wss://node/stats"), "").is_err());
    }
}
