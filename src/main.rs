use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn};
use tokio::time::{self, Duration, MissedTickBehavior};

use serial_trend::channel::{ChannelStore, DEFAULT_QUEUE_CAPACITY, DEFAULT_WINDOW_SIZE};
use serial_trend::error::{AcquisitionError, Result};
use serial_trend::port::{PortFilter, RetryPolicy, SystemPorts, detect_ports, wait_for_ports};
use serial_trend::serial::{Acquisition, PortSettings};

#[derive(Parser, Debug)]
#[command(
    name = "serial-trend",
    version,
    about = "Stream $flag:value telemetry from a serial device into rolling windows"
)]
struct Cli {
    /// List usable serial ports and exit
    #[arg(long)]
    list: bool,

    /// Serial device to open; the first usable port when omitted
    #[arg(long, env = "SERIAL_TREND_PORT")]
    port: Option<String>,

    /// Baud rate
    #[arg(long, default_value_t = 115200)]
    baud: u32,

    /// Bound on a single device read, in milliseconds
    #[arg(long, default_value_t = 500)]
    timeout_ms: u64,

    /// Channel flags to keep, comma separated (e.g. TEMP,HUM)
    #[arg(long, value_delimiter = ',', required_unless_present = "list")]
    flags: Vec<String>,

    /// Samples kept per channel
    #[arg(long, default_value_t = DEFAULT_WINDOW_SIZE)]
    window: usize,

    /// Pending samples buffered per channel
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue: usize,

    /// Window advance period, in milliseconds
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let outcome = if cli.list { list().await } else { run(cli).await };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn list() -> Result<()> {
    let ports = detect_ports(&SystemPorts, &PortFilter::default(), &RetryPolicy::default()).await?;
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut store = ChannelStore::new(cli.flags, cli.window, cli.queue)?;
    let port_name = match cli.port {
        Some(port) => port,
        None => first_port().await?,
    };
    let settings = PortSettings::new(port_name)
        .with_baud_rate(cli.baud)
        .with_timeout(Duration::from_millis(cli.timeout_ms));
    let shutdown_timeout = settings.poll_bound().saturating_mul(2);
    let settings = settings.with_shutdown_timeout(shutdown_timeout);

    let mut acquisition = Acquisition::new(store.sink());
    let mut status = acquisition.subscribe_status();
    acquisition.open(settings).await?;

    let mut ticker = time::interval(Duration::from_millis(cli.interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if store.advance() > 0 {
                    info!("{}", summary(&store));
                }
            }
            changed = status.changed() => {
                if changed.is_err() || status.borrow_and_update().is_lost() {
                    warn!("Acquisition stopped ({})", acquisition.status());
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    let stats = acquisition.stats();
    acquisition.close().await?;
    info!(
        "{} records, {} samples, {} unknown flags, {} decode errors, {} parse errors, {} I/O errors, {} oversized",
        stats.records,
        stats.samples,
        stats.unknown_flags,
        stats.decode_errors,
        stats.parse_errors,
        stats.io_errors,
        stats.oversized
    );
    Ok(())
}

async fn first_port() -> Result<String> {
    let policy = RetryPolicy::default();
    let port = wait_for_ports(&SystemPorts, &PortFilter::default(), &policy)
        .await?
        .into_iter()
        .next()
        .map(|port| port.port_name)
        .ok_or(AcquisitionError::NoPortsFound {
            attempts: policy.max_attempts,
        })?;
    info!("No port given, using {port}");
    Ok(port)
}

fn summary(store: &ChannelStore) -> String {
    store
        .channels()
        .iter()
        .filter(|channel| channel.is_initialized())
        .map(|channel| {
            let latest = channel.window().last().copied().unwrap_or_default();
            format!("{}={} ({} pending)", channel.flag(), latest, channel.pending())
        })
        .collect::<Vec<_>>()
        .join(" ")
}
