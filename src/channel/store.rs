use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, trace, warn};
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::error::{AcquisitionError, Result};

/// samples kept per channel for display
pub const DEFAULT_WINDOW_SIZE: usize = 120;
/// pending samples buffered per channel before the oldest is dropped
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
/// upper bound accepted for a channel queue
pub const MAX_QUEUE_CAPACITY: usize = 1 << 16;

/// Producer half of the store, handed to the read loop.
///
/// Cloning is cheap; every clone feeds the same queues. Ingesting never
/// blocks: a full queue overwrites its oldest pending value.
#[derive(Clone, Debug)]
pub struct SampleSink {
    queues: Arc<HashMap<String, broadcast::Sender<f64>>>,
}

impl SampleSink {
    /// Queues a value for `flag`. Returns `false` when the flag is not configured.
    pub fn ingest(&self, flag: &str, value: f64) -> bool {
        match self.queues.get(flag) {
            Some(queue) => {
                if queue.send(value).is_err() {
                    trace!("Channel store gone, discarding sample for '{flag}'");
                }
                true
            }
            None => false,
        }
    }

    /// Whether `flag` belongs to the configured set.
    pub fn accepts(&self, flag: &str) -> bool {
        self.queues.contains_key(flag)
    }
}

/// One named stream: pending queue plus rolling window.
#[derive(Debug)]
pub struct Channel {
    flag: String,
    queue: broadcast::Receiver<f64>,
    queue_capacity: usize,
    window: Vec<f64>,
    initialized: bool,
    dropped: u64,
}

impl Channel {
    fn new(
        flag: String,
        queue: broadcast::Receiver<f64>,
        queue_capacity: usize,
        window_size: usize,
    ) -> Self {
        Channel {
            flag,
            queue,
            queue_capacity,
            window: vec![0.0; window_size],
            initialized: false,
            dropped: 0,
        }
    }

    fn next_pending(&mut self) -> Option<f64> {
        loop {
            match self.queue.try_recv() {
                Ok(value) => return Some(value),
                Err(TryRecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                    warn!(
                        "Channel '{}' queue overflowed, dropped {} oldest samples",
                        self.flag, skipped
                    );
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Moves at most one pending value into the window.
    fn advance(&mut self) -> bool {
        let Some(value) = self.next_pending() else {
            return false;
        };
        if self.initialized {
            self.window.copy_within(1.., 0);
            if let Some(last) = self.window.last_mut() {
                *last = value;
            }
        } else {
            self.window.fill(value);
            self.initialized = true;
            debug!("Channel '{}' initialized with {}", self.flag, value);
        }
        true
    }

    fn reset(&mut self) {
        self.window.fill(0.0);
        self.initialized = false;
    }

    pub fn flag(&self) -> &str {
        &self.flag
    }

    /// Oldest first, always `window_size` long.
    pub fn window(&self) -> &[f64] {
        &self.window
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Values queued but not yet moved into the window.
    pub fn pending(&self) -> usize {
        self.queue.len().min(self.queue_capacity)
    }

    /// Values lost to queue overflow so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Per-channel queues and rolling windows for a fixed set of flags.
///
/// The store itself belongs to the consumer; only the [`SampleSink`] crosses
/// threads.
#[derive(Debug)]
pub struct ChannelStore {
    channels: Vec<Channel>,
    index: HashMap<String, usize>,
    sink: SampleSink,
    window_size: usize,
}

impl ChannelStore {
    /// Creates one channel per distinct flag, in the order given.
    ///
    /// tokio rounds `queue_capacity` up to the next power of two.
    pub fn new<I, S>(flags: I, window_size: usize, queue_capacity: usize) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if window_size == 0 {
            return Err(AcquisitionError::invalid_config("window size must be non-zero"));
        }
        if queue_capacity == 0 || queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(AcquisitionError::invalid_config(format!(
                "queue capacity must be between 1 and {MAX_QUEUE_CAPACITY}"
            )));
        }

        let effective_capacity = queue_capacity.next_power_of_two();
        let mut channels = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut queues = HashMap::new();
        for flag in flags {
            let flag: String = flag.into();
            if index.contains_key(&flag) {
                continue;
            }
            let (tx, rx) = broadcast::channel(queue_capacity);
            index.insert(flag.clone(), channels.len());
            queues.insert(flag.clone(), tx);
            channels.push(Channel::new(flag, rx, effective_capacity, window_size));
        }
        if channels.is_empty() {
            return Err(AcquisitionError::invalid_config("no channel flags configured"));
        }

        Ok(ChannelStore {
            channels,
            index,
            sink: SampleSink {
                queues: Arc::new(queues),
            },
            window_size,
        })
    }

    /// Producer handle for the read loop.
    pub fn sink(&self) -> SampleSink {
        self.sink.clone()
    }

    /// Queues a value; see [`SampleSink::ingest`].
    pub fn ingest(&self, flag: &str, value: f64) -> bool {
        self.sink.ingest(flag, value)
    }

    /// Pulls at most one pending value into every channel's window.
    ///
    /// Returns how many channels advanced.
    pub fn advance(&mut self) -> usize {
        self.channels
            .iter_mut()
            .map(Channel::advance)
            .filter(|advanced| *advanced)
            .count()
    }

    /// Zero-fills every window. Pending queues are left alone.
    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.reset();
        }
        debug!("Reset {} channel windows", self.channels.len());
    }

    pub fn snapshot(&self, flag: &str) -> Option<&[f64]> {
        self.channel(flag).map(Channel::window)
    }

    /// Most recent windowed value.
    pub fn latest(&self, flag: &str) -> Option<f64> {
        self.snapshot(flag).and_then(|window| window.last().copied())
    }

    pub fn is_initialized(&self, flag: &str) -> Option<bool> {
        self.channel(flag).map(Channel::is_initialized)
    }

    pub fn pending(&self, flag: &str) -> Option<usize> {
        self.channel(flag).map(Channel::pending)
    }

    pub fn dropped(&self, flag: &str) -> Option<u64> {
        self.channel(flag).map(Channel::dropped)
    }

    pub fn channel(&self, flag: &str) -> Option<&Channel> {
        self.index.get(flag).map(|&i| &self.channels[i])
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn flags(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(Channel::flag)
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }
}
