//! Data concentrator server for nRF24L01 networks.
//!
//! A [DcServer] owns one radio. It keeps a registry of the devices it handles, runs a
//! census of them on a broadcast channel, picks a quiet work channel and exchanges a
//! few bytes with every device that answered, optionally obfuscating payloads with a
//! caller-owned key. Everything is synchronous and bounded in time.
use std::time::Duration;

pub mod channel;
pub mod cipher;
pub mod command;
pub mod device;
pub mod discovery;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;
pub mod time;

pub use error::{CipherError, SessionError};
pub use registry::{CommStatus, DeviceRegistry, ALL_CLIENTS, MAX_CLIENT_NUMBER};
pub use server::{CycleReport, DcServer, ServerConfig};
pub use session::{Phase, SessionEnd, SessionOutcome};

/// Caller-assigned device identifier.
pub type ClientId = i16;

/// Repetitions of the lookup announcement, also the number of lookup rounds.
pub const NUMBER_OF_BROADCAST_REQUESTS: usize = 3;
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_millis(35_000);
pub const DEFAULT_READING_TIMEOUT: Duration = Duration::from_millis(4);
/// Repetitions of the end session tag.
pub const REPS_COUNT: usize = 20;
