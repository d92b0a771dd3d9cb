//! # Acquisition Engine
//!
//! Owns one serial connection at a time and runs the background read loop
//! that feeds parsed samples into a [`SampleSink`].
//!
//! Shutdown is cooperative: `close` flips the shared status to
//! [`ConnStatus::Closed`] and the loop notices on its next iteration. Every
//! device read is bounded by the read timeout, so `close` can wait with a
//! bound of its own and report a worker that overruns it.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{error, info, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

use crate::channel::SampleSink;
use crate::error::{AcquisitionError, Result};
use crate::serial::encoding::{LineAssembler, decode_record, hex_preview};
use crate::serial::port::{ConnStatus, PortSettings, open_port};
use crate::serial::protocol::parse_line;

const READ_BUFFER_LEN: usize = 1024;

/// Counters kept by the read loop for the current connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// non-empty decoded records
    pub records: u64,
    /// samples delivered to a configured channel
    pub samples: u64,
    /// well-formed samples for flags outside the configured set
    pub unknown_flags: u64,
    pub decode_errors: u64,
    pub parse_errors: u64,
    pub io_errors: u64,
    /// records dropped for exceeding the length limit
    pub oversized: u64,
}

#[derive(Debug, Default)]
struct Counters {
    records: AtomicU64,
    samples: AtomicU64,
    unknown_flags: AtomicU64,
    decode_errors: AtomicU64,
    parse_errors: AtomicU64,
    io_errors: AtomicU64,
    oversized: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ReadStats {
        ReadStats {
            records: self.records.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            unknown_flags: self.unknown_flags.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
            oversized: self.oversized.load(Ordering::Relaxed),
        }
    }
}

/// Connection lifecycle plus the background read loop.
///
/// Must be used from within a tokio runtime.
pub struct Acquisition {
    sink: SampleSink,
    settings: Option<PortSettings>,
    status: Arc<watch::Sender<ConnStatus>>,
    counters: Arc<Counters>,
    worker: Option<JoinHandle<()>>,
}

impl Acquisition {
    pub fn new(sink: SampleSink) -> Self {
        let (status, _) = watch::channel(ConnStatus::Closed);
        Acquisition {
            sink,
            settings: None,
            status: Arc::new(status),
            counters: Arc::new(Counters::default()),
            worker: None,
        }
    }

    /// Current connection status.
    pub fn status(&self) -> ConnStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status change.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnStatus> {
        self.status.subscribe()
    }

    /// Counters for the current (or last) connection.
    pub fn stats(&self) -> ReadStats {
        self.counters.snapshot()
    }

    /// Settings of the current (or last) connection.
    pub fn settings(&self) -> Option<&PortSettings> {
        self.settings.as_ref()
    }

    fn is_running(&self) -> bool {
        self.status().is_open() && self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Opens the serial device named in `settings` and starts the read loop.
    ///
    /// A no-op while a read loop is already running. On failure the status
    /// goes back to [`ConnStatus::Closed`].
    pub async fn open(&mut self, settings: PortSettings) -> Result<()> {
        if self.is_running() {
            warn!(
                "Open of {} ignored, already reading {}",
                settings.port_name,
                self.port_name()
            );
            return Ok(());
        }
        settings.validate()?;
        self.reap().await;

        self.status.send_replace(ConnStatus::Connecting);
        match open_port(&settings) {
            Ok(stream) => {
                self.start(settings, stream);
                Ok(())
            }
            Err(e) => {
                self.status.send_replace(ConnStatus::Closed);
                Err(e)
            }
        }
    }

    /// Starts the read loop over an already open byte stream.
    ///
    /// Same lifecycle as [`Acquisition::open`]; `settings.port_name` only
    /// labels log lines.
    pub async fn open_stream<S>(&mut self, settings: PortSettings, stream: S) -> Result<()>
    where
        S: AsyncRead + Unpin + Send + 'static,
    {
        if self.is_running() {
            warn!(
                "Open of {} ignored, already reading {}",
                settings.port_name,
                self.port_name()
            );
            return Ok(());
        }
        settings.validate()?;
        self.reap().await;

        self.status.send_replace(ConnStatus::Connecting);
        self.start(settings, stream);
        Ok(())
    }

    /// Signals the read loop to stop and waits for it, up to the configured
    /// shutdown timeout.
    ///
    /// The device handle is released when the loop exits. A loop that
    /// overruns the bound is aborted and reported as
    /// [`AcquisitionError::ShutdownTimeout`].
    pub async fn close(&mut self) -> Result<()> {
        let previous = self.status.send_replace(ConnStatus::Closed);
        let Some(mut worker) = self.worker.take() else {
            return Ok(());
        };
        let waited = self
            .settings
            .as_ref()
            .map_or(Duration::from_secs(3), |s| s.shutdown_timeout);

        match time::timeout(waited, &mut worker).await {
            Ok(Ok(())) => {
                info!("Closed {} (was {})", self.port_name(), previous);
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Read loop on {} failed: {}", self.port_name(), e);
                Err(AcquisitionError::worker(e.to_string()))
            }
            Err(_) => {
                worker.abort();
                error!(
                    "Read loop on {} still running after {:?}, aborted",
                    self.port_name(),
                    waited
                );
                Err(AcquisitionError::ShutdownTimeout { waited })
            }
        }
    }

    /// Joins a worker left behind by a lost connection before reopening.
    async fn reap(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.close().await {
                warn!("Previous read loop on {} ended badly: {}", self.port_name(), e);
            }
        }
    }

    fn start<S>(&mut self, settings: PortSettings, stream: S)
    where
        S: AsyncRead + Unpin + Send + 'static,
    {
        self.counters = Arc::new(Counters::default());
        self.status.send_replace(ConnStatus::Connected);
        let read_loop = ReadLoop {
            stream,
            settings: settings.clone(),
            status: Arc::clone(&self.status),
            sink: self.sink.clone(),
            counters: Arc::clone(&self.counters),
        };
        info!("Acquisition started on {}", settings.port_name);
        self.settings = Some(settings);
        self.worker = Some(tokio::spawn(read_loop.run()));
    }

    fn port_name(&self) -> &str {
        self.settings.as_ref().map_or("<none>", |s| s.port_name.as_str())
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.status.send_replace(ConnStatus::Closed);
        }
    }
}

struct ReadLoop<S> {
    stream: S,
    settings: PortSettings,
    status: Arc<watch::Sender<ConnStatus>>,
    sink: SampleSink,
    counters: Arc<Counters>,
}

impl<S> ReadLoop<S>
where
    S: AsyncRead + Unpin + Send + 'static,
{
    async fn run(mut self) {
        let mut buffer = [0u8; READ_BUFFER_LEN];
        let mut assembler = LineAssembler::new(self.settings.max_record_len);
        let mut data_seen = false;
        let mut consecutive_errors = 0u32;

        while self.status.borrow().is_open() {
            match time::timeout(self.settings.timeout, self.stream.read(&mut buffer)).await {
                Err(_) => Self::idle(&self.settings, data_seen).await,
                Ok(Ok(0)) => {
                    warn!("{}: end of stream", self.settings.port_name);
                    self.mark_lost();
                    break;
                }
                Ok(Ok(n)) => {
                    data_seen = true;
                    consecutive_errors = 0;
                    for record in assembler.push(&buffer[..n]) {
                        self.handle_record(&record);
                    }
                    self.counters
                        .oversized
                        .store(assembler.discarded(), Ordering::Relaxed);
                }
                Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => {
                    Self::idle(&self.settings, data_seen).await
                }
                Ok(Err(e)) => {
                    consecutive_errors += 1;
                    Counters::bump(&self.counters.io_errors);
                    error!(
                        "{}: read error {}/{}: {}",
                        self.settings.port_name, consecutive_errors, self.settings.max_io_errors, e
                    );
                    if consecutive_errors >= self.settings.max_io_errors {
                        self.mark_lost();
                        break;
                    }
                }
            }
        }
        info!(
            "Read loop on {} stopped ({})",
            self.settings.port_name,
            *self.status.borrow()
        );
    }

    /// Backs off between empty polls until the first byte arrives.
    async fn idle(settings: &PortSettings, data_seen: bool) {
        if data_seen {
            return;
        }
        info!("{}: waiting for data", settings.port_name);
        time::sleep(settings.idle_backoff).await;
    }

    fn handle_record(&self, record: &[u8]) {
        let line = match decode_record(record) {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                Counters::bump(&self.counters.decode_errors);
                warn!(
                    "{}: dropping record {}: {}",
                    self.settings.port_name,
                    hex_preview(record),
                    e
                );
                return;
            }
        };
        Counters::bump(&self.counters.records);

        match parse_line(line) {
            Ok(sample) => {
                if self.sink.ingest(&sample.flag, sample.value) {
                    Counters::bump(&self.counters.samples);
                    trace!("{}: {} = {}", self.settings.port_name, sample.flag, sample.value);
                } else {
                    Counters::bump(&self.counters.unknown_flags);
                    trace!("{}: ignoring flag '{}'", self.settings.port_name, sample.flag);
                }
            }
            Err(e) => {
                Counters::bump(&self.counters.parse_errors);
                warn!(
                    "{}: parse error ({}), line {:?}",
                    self.settings.port_name, e, line
                );
            }
        }
    }

    /// Connected -> Lost, unless a close already won the race.
    fn mark_lost(&self) {
        let lost = self.status.send_if_modified(|status| {
            if status.is_open() {
                *status = ConnStatus::Lost;
                true
            } else {
                false
            }
        });
        if lost {
            error!("Connection to {} lost", self.settings.port_name);
        }
    }
}
