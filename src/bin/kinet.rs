//! KI Net CLI binary.
//!
//! # Commands
//!
//! - `server` - Accept sessions and answer `Ping`/`Echo` messages
//! - `client` - Connect, ping the server, and report replies

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use kinet::{
    config::{ClientConfig, Config, ServerConfig, SessionSettings},
    Client, CloseReason, DispatchTable, Message, Server, WatchdogMode, VERSION,
};

/// Close code sent when the client finishes normally.
const CLIENT_DONE_CODE: u16 = 1000;

#[derive(Parser)]
#[command(name = "kinet")]
#[command(version = VERSION)]
#[command(about = "KI Net - session lifecycle for persistent connections", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/kinet/config.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Sessions whose last heartbeat is older than the heartbeat timeout are reaped
    Observe,
    /// A heartbeat is required in every watchdog interval
    Consume,
}

impl From<Mode> for WatchdogMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Observe => WatchdogMode::Observe,
            Mode::Consume => WatchdogMode::Consume,
        }
    }
}

#[derive(clap::Args)]
struct SessionArgs {
    /// Keep-alive interval in seconds
    #[arg(long)]
    keep_alive: Option<f64>,

    /// Watchdog interval in seconds
    #[arg(long)]
    watchdog: Option<f64>,

    /// Watchdog mode
    #[arg(long, value_enum)]
    watchdog_mode: Option<Mode>,

    /// Maximum heartbeat age in seconds (default: twice the peer keep-alive)
    #[arg(long)]
    heartbeat_timeout: Option<f64>,

    /// Close sessions that send unhandled message kinds
    #[arg(long)]
    strict: bool,
}

impl SessionArgs {
    fn apply(&self, settings: &mut SessionSettings) {
        if let Some(secs) = self.watchdog {
            settings.watchdog_secs = secs;
        }
        if let Some(mode) = self.watchdog_mode {
            settings.watchdog_mode = mode.into();
        }
        if let Some(secs) = self.heartbeat_timeout {
            settings.heartbeat_timeout_secs = Some(secs);
        }
        if self.strict {
            settings.close_on_unhandled = true;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session server
    Server {
        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Listen host
        #[arg(long)]
        host: Option<String>,

        /// Bind to all interfaces
        #[arg(long)]
        bind_all: bool,

        /// Lowest session id
        #[arg(long)]
        id_min: Option<u16>,

        /// Highest session id
        #[arg(long)]
        id_max: Option<u16>,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Connect to a session server
    Client {
        /// Server port
        #[arg(short, long)]
        port: Option<u16>,

        /// Server host
        #[arg(long)]
        host: Option<String>,

        /// Number of pings to send (0 = stay connected until Ctrl-C)
        #[arg(short = 'n', long, default_value = "3")]
        count: u32,

        /// Seconds between pings
        #[arg(long, default_value = "1.0")]
        interval: f64,

        #[command(flatten)]
        session: SessionArgs,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Server {
            port,
            host,
            bind_all,
            id_min,
            id_max,
            session,
        } => {
            let server = &mut config.server;
            if let Some(port) = port {
                server.port = port;
            }
            if let Some(host) = host {
                server.host = host;
            }
            if bind_all {
                server.host = "0.0.0.0".to_string();
            }
            if let Some(min) = id_min {
                server.id_min = min;
            }
            if let Some(max) = id_max {
                server.id_max = max;
            }
            if let Some(secs) = session.keep_alive {
                server.keep_alive_secs = secs;
            }
            session.apply(&mut config.session);
            config.validate()?;

            cmd_server(config.server, config.session)
        },
        Commands::Client {
            port,
            host,
            count,
            interval,
            session,
        } => {
            let client = &mut config.client;
            if let Some(port) = port {
                client.port = port;
            }
            if let Some(host) = host {
                client.host = host;
            }
            if let Some(secs) = session.keep_alive {
                client.keep_alive_secs = secs;
            }
            session.apply(&mut config.session);
            config.validate()?;

            let interval = Duration::try_from_secs_f64(interval)
                .map_err(|e| anyhow::anyhow!("Invalid ping interval {interval}: {e}"))?;
            cmd_client(config.client, config.session, count, interval)
        },
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Handlers served by the demo server.
fn demo_table() -> Arc<DispatchTable> {
    DispatchTable::builder()
        .on("Ping", |session, _| session.send(Message::new("Pong")))
        .on("Echo", |session, msg| {
            session.send(Message::new("Echo").with_payload(msg.payload.clone()))
        })
        .build()
}

fn cmd_server(config: ServerConfig, settings: SessionSettings) -> anyhow::Result<()> {
    tracing::info!("Starting KI Net server on {}", config.listen_addr());
    tracing::info!(
        "Session ids {}..={}, keep-alive {}s, watchdog {}s ({:?})",
        config.id_min,
        config.id_max,
        config.keep_alive_secs,
        settings.watchdog_secs,
        settings.watchdog_mode
    );

    let server = Arc::new(Server::with_settings(config, settings)?.with_dispatch(demo_table()));

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let serving = tokio::spawn(server.clone().run());

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Interrupted");
                server.shutdown();
            },
            finished = serving => {
                finished??;
            },
        }

        Ok::<_, anyhow::Error>(())
    })?;

    Ok(())
}

fn cmd_client(
    config: ClientConfig,
    settings: SessionSettings,
    count: u32,
    interval: Duration,
) -> anyhow::Result<()> {
    let table = DispatchTable::builder()
        .on("Pong", |session, _| {
            tracing::info!("id={}, Pong", session.id());
            Ok(())
        })
        .on("Echo", |session, msg| {
            tracing::info!("id={}, Echo: {}", session.id(), msg.payload);
            Ok(())
        })
        .build();
    let client = Arc::new(Client::with_settings(config, settings)?.with_dispatch(table));

    let runtime = tokio::runtime::Runtime::new()?;
    let done = CloseReason::application(CLIENT_DONE_CODE)
        .ok_or_else(|| anyhow::anyhow!("Close code {CLIENT_DONE_CODE} is reserved"))?;

    runtime.block_on(async {
        let session = client.connect().await?;

        let pinging = async {
            let mut sent = 0;
            loop {
                tokio::time::sleep(interval).await;
                if count > 0 && sent == count {
                    break;
                }
                if !session.is_established() {
                    continue;
                }
                session.send(Message::new("Ping"))?;
                sent += 1;
            }
            // Let the last reply arrive.
            tokio::time::sleep(interval).await;
            Ok::<_, kinet::NetError>(())
        };

        tokio::select! {
            result = pinging => {
                result?;
                session.close(done);
            },
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Interrupted");
                session.close(done);
            },
            () = session.closed() => {
                tracing::info!("Session closed by peer or watchdog");
            },
        }

        match session.close_reason() {
            Some(reason) => tracing::info!("Disconnected: {}", reason),
            None => tracing::info!("Disconnected"),
        }
        Ok::<_, anyhow::Error>(())
    })?;

    Ok(())
}
