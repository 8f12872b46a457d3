//! CLI entry point for dmm_stream
//!
//! - `models`: list the built-in device profiles
//! - `scan`: identify the meter on a serial port
//! - `acquire`: stream measurements as JSON lines on stdout
//!
//! Logs go to stderr, so stdout can be piped straight into another tool:
//!
//! ```bash
//! dmm_stream acquire --conn /dev/ttyUSB0 --model 189 --samples 100 > readings.jsonl
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dmm_stream::config::Settings;
use dmm_stream::discovery::{self, ProbeOptions};
use dmm_stream::logging::{self, TracingConfig};
use dmm_stream::sink::JsonLinesSink;
use dmm_stream::transport::{SerialComm, SerialTransport};
use dmm_stream::{DaqError, DeviceProfile, DeviceSession, PollStatus, ProfileRegistry, Transport};
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dmm_stream")]
#[command(about = "Stream readings from serial multimeters", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = dmm_stream::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported models
    Models,

    /// Identify the meter on a serial port
    Scan {
        /// Serial port, e.g. /dev/ttyUSB0
        #[arg(long)]
        conn: Option<String>,

        /// Comm spec such as 115200/8n1; common rates are tried when omitted
        #[arg(long)]
        serialcomm: Option<String>,
    },

    /// Poll a meter and print readings as JSON lines
    Acquire {
        #[arg(long)]
        conn: Option<String>,

        #[arg(long)]
        serialcomm: Option<String>,

        /// Profile key (see `models`); identified over the line when omitted
        #[arg(long)]
        model: Option<String>,

        /// Stop after this many samples
        #[arg(long)]
        samples: Option<u64>,

        /// Stop after this many milliseconds
        #[arg(long)]
        time_ms: Option<u64>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        settings.application.log_level = level;
    }

    let registry = ProfileRegistry::builtin();

    match cli.command {
        Commands::Models => {
            list_models(&registry);
            Ok(())
        }
        Commands::Scan { conn, serialcomm } => {
            apply_device_overrides(&mut settings, conn, serialcomm, None);
            init_logging(&settings, &registry)?;
            scan(&settings, &registry)
        }
        Commands::Acquire {
            conn,
            serialcomm,
            model,
            samples,
            time_ms,
        } => {
            apply_device_overrides(&mut settings, conn, serialcomm, model);
            if let Some(samples) = samples {
                settings.acquisition.limit_samples = samples;
            }
            if let Some(time_ms) = time_ms {
                settings.acquisition.limit_msec = time_ms;
            }
            init_logging(&settings, &registry)?;
            acquire(&settings, &registry).await
        }
    }
}

fn apply_device_overrides(
    settings: &mut Settings,
    conn: Option<String>,
    serialcomm: Option<String>,
    model: Option<String>,
) {
    if conn.is_some() {
        settings.device.conn = conn;
    }
    if serialcomm.is_some() {
        settings.device.serialcomm = serialcomm;
    }
    if model.is_some() {
        settings.device.model = model;
    }
}

fn init_logging(settings: &Settings, registry: &ProfileRegistry) -> Result<()> {
    settings.validate(registry)?;
    logging::init(TracingConfig::from_settings(settings)?)?;
    Ok(())
}

fn list_models(registry: &ProfileRegistry) {
    println!(
        "{:<8} {:<12} {:<8} {:>8} {:>8}  CHANNELS",
        "KEY", "MODEL", "DECODER", "PERIOD", "TIMEOUT"
    );
    for profile in registry.iter() {
        println!(
            "{:<8} {:<12} {:<8} {:>6}ms {:>6}ms  {}",
            profile.key,
            profile.to_string(),
            profile.decoder.name(),
            profile.poll_period_ms,
            profile.response_timeout_ms,
            profile.channels.join(",")
        );
    }
}

fn require_conn(settings: &Settings) -> Result<&str> {
    settings
        .device
        .conn
        .as_deref()
        .context("no serial port given; use --conn or device.conn")
}

fn open_serial(conn: &str, comm: SerialComm) -> dmm_stream::AppResult<SerialTransport> {
    let mut transport = SerialTransport::new(conn, comm);
    transport.open()?;
    Ok(transport)
}

fn scan(settings: &Settings, registry: &ProfileRegistry) -> Result<()> {
    let conn = require_conn(settings)?;
    let (mut transport, found, comm) = discovery::scan(
        conn,
        settings.serial_comm()?,
        registry,
        &ProbeOptions::default(),
        |comm| open_serial(conn, comm),
    )?;
    transport.close()?;

    let report = serde_json::json!({
        "conn": conn,
        "serialcomm": comm.to_string(),
        "key": found.profile.key,
        "identity": found.identity,
    });
    println!("{}", report);
    Ok(())
}

/// Opens the port and resolves the profile, identifying the meter if needed.
fn connect(
    settings: &Settings,
    registry: &ProfileRegistry,
) -> Result<(SerialTransport, &'static DeviceProfile)> {
    let conn = require_conn(settings)?;

    match settings.device.model.as_deref() {
        Some(model) => {
            let profile = registry.require(model)?;
            let comm = settings.serial_comm()?.unwrap_or_default();
            Ok((open_serial(conn, comm)?, profile))
        }
        None => {
            let (transport, found, _) = discovery::scan(
                conn,
                settings.serial_comm()?,
                registry,
                &ProbeOptions::default(),
                |comm| open_serial(conn, comm),
            )?;
            Ok((transport, found.profile))
        }
    }
}

async fn acquire(settings: &Settings, registry: &ProfileRegistry) -> Result<()> {
    let (transport, profile) = connect(settings, registry)?;
    info!(
        %profile,
        port = %transport.describe(),
        channels = %profile.channels.join(","),
        "Connected"
    );

    let sink = JsonLinesSink::new(io::stdout().lock());
    let mut session = DeviceSession::new(profile, transport, sink, settings.session_settings());

    let epoch = Instant::now();
    let elapsed_ms = || u64::try_from(epoch.elapsed().as_millis()).unwrap_or(u64::MAX);

    session.start_acquisition(elapsed_ms())?;

    let mut ticker = time::interval(Duration::from_millis(settings.acquisition.tick_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome: Result<()> = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break Ok(());
            }
            _ = ticker.tick() => {
                match session.poll_once(elapsed_ms()) {
                    Ok(PollStatus::Continue(_)) => {}
                    Ok(PollStatus::StopRequested(_) | PollStatus::Stopped) => break Ok(()),
                    Err(e) => {
                        warn!(error = %e, "Acquisition aborted");
                        break Err(e.into());
                    }
                }
            }
        }
    };

    info!(samples = session.samples_emitted(), "Finished");
    if let Err(e) = session.close() {
        if !matches!(e, DaqError::SerialPortNotConnected) {
            warn!(error = %e, "Close failed");
        }
    }
    outcome
}
