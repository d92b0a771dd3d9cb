//! # Channel Module
//!
//! Demultiplexed sample storage. Each configured flag gets a bounded handoff
//! queue, filled by the read loop, and a fixed-length rolling window that the
//! consumer advances at its own cadence.

pub mod store;

pub use store::{
    Channel, ChannelStore, DEFAULT_QUEUE_CAPACITY, DEFAULT_WINDOW_SIZE, MAX_QUEUE_CAPACITY,
    SampleSink,
};
