//! Off-thread XVIZ log decoding.
//!
//! A message travels through one worker: the envelope is decoded, every
//! record is normalized to the canonical shape, and the point-cloud blocks
//! are listed in a transfer manifest so they move to the receiver instead
//! of being copied.

pub mod config;
pub mod decoder;
pub mod error;
pub mod extractor;
pub mod normalizer;
pub mod pool;
pub mod transport;

pub use config::{ConfigParser, ConfiguredPanels, EngineConfig, PoolConfig, TomlParser};
pub use decoder::EnvelopeDecoder;
pub use error::EngineError;
pub use extractor::extract;
pub use normalizer::{Normalizer, Shape};
pub use pool::DecodePool;
pub use transport::{
    Delivery, PendingDelivery, WorkerHandle, WorkerState, decode_off_thread, spawn_worker,
};
