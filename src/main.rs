//! Binary entrypoint for the smsrelay CLI.
//!
//! Commands:
//! - `start [--device <path>]` - poll the modem and forward new messages
//! - `read` - read every stored message once and print it as JSON
//! - `list` - print the handles currently stored on the modem
//! - `delete <handle>` - delete one stored message
//! - `init` - create a starter `config.toml`
//! - `sign <timestamp>` - print the relay signature for a timestamp
//!
//! See the library crate docs for module-level details: `smsrelay::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::sync::Arc;

use smsrelay::config::Config;
use smsrelay::decoder::JsonRecordDecoder;
use smsrelay::delivery::{sign, Forwarder};
use smsrelay::reader::{ReaderOptions, SmsReader};
use smsrelay::transport::spool::SpoolTransport;

#[derive(Parser)]
#[command(name = "smsrelay")]
#[command(about = "Poll a cellular modem for SMS and relay them downstream")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the modem and forward new messages until interrupted
    Start {
        /// Modem device or spool directory (overrides modem.device_path)
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Read all stored messages once and print them as JSON
    Read,
    /// List stored message handles
    List,
    /// Delete one stored message by handle
    Delete { handle: u32 },
    /// Write a default configuration file
    Init,
    /// Print the relay signature for a timestamp using the configured secret
    Sign { timestamp: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(None, cli.verbose);
        Config::create_default(&cli.config).await?;
        info!("Configuration file created at {}", cli.config);
        return Ok(());
    }

    let mut config = Config::load(&cli.config).await?;
    init_logging(Some(&config), cli.verbose);

    match cli.command {
        Commands::Start { device } => {
            if let Some(device) = device {
                config.modem.device_path = device;
            }
            run_daemon(config).await?;
        }
        Commands::Read => {
            let reader = open_reader(&config).await?;
            let result = reader.read_all_once().await;
            reader.close().await;
            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
        Commands::List => {
            let reader = open_reader(&config).await?;
            let result = reader.list_handles().await;
            reader.close().await;
            for handle in result? {
                println!("{}", handle);
            }
        }
        Commands::Delete { handle } => {
            let reader = open_reader(&config).await?;
            let result = reader.delete_message(handle).await;
            reader.close().await;
            result?;
            info!("Deleted message {}", handle);
        }
        Commands::Sign { timestamp } => {
            if config.delivery.secret.is_empty() {
                warn!("delivery.secret is empty; signature uses an empty key");
            }
            println!("{}", sign::generate_sign(&timestamp, &config.delivery.secret));
        }
        Commands::Init => {}
    }

    Ok(())
}

async fn open_reader(config: &Config) -> Result<SmsReader> {
    let transport = Arc::new(SpoolTransport::new(config.modem.request_timeout())?);
    let reader = SmsReader::open(
        transport,
        Arc::new(JsonRecordDecoder),
        ReaderOptions::from_config(config),
    )
    .await?;
    Ok(reader)
}

async fn run_daemon(config: Config) -> Result<()> {
    info!("Starting smsrelay v{}", env!("CARGO_PKG_VERSION"));
    let forwarder = Forwarder::new(&config.delivery)?;
    let reader = open_reader(&config).await?;
    info!("Reading messages from {}", config.modem.device_path);

    if forwarder.is_enabled() {
        info!("Forwarding to {}", config.delivery.url);
    } else {
        warn!("delivery.url is not set; messages will only be logged");
    }

    let delete_after_read = config.polling.delete_after_read;
    let handler_reader = reader.clone();
    let started = reader
        .start_polling(config.polling.interval(), move |message| {
            let forwarder = forwarder.clone();
            let reader = handler_reader.clone();
            async move {
                if let Err(e) = forwarder.forward(&message).await {
                    error!(
                        "Failed to forward message {}: {}",
                        message.primary_handle(),
                        e
                    );
                    return;
                }
                if delete_after_read {
                    for handle in message.handles() {
                        if let Err(e) = reader.delete_message(handle).await {
                            warn!("Could not delete message {}: {}", handle, e);
                        }
                    }
                }
            }
        })
        .await;
    if let Err(e) = started {
        reader.close().await;
        return Err(e.into());
    }

    info!("Listening; press Ctrl+C to stop");
    shutdown_signal().await;
    info!("Shutdown requested, stopping poller");
    reader.close().await;
    info!("smsrelay stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }
}

fn init_logging(config: Option<&Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let configured = config
        .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Under a service manager stdout is not a TTY; skip the console copy
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
