//! The coordinator object and its configuration surface.
use log::{debug, info, warn};
use std::fmt::Debug;
use std::time::Duration;

use crate::channel::{ChannelActivity, ScanConfig};
use crate::cipher::Cipher;
use crate::device::frame::{client_address, Frame, NETWORK_ADDRESS_MASK};
use crate::device::radio::{DataRate, PaLevel, Radio, RfConfig, CHANNEL_COUNT};
use crate::device::transport::{Mode, Transport};
use crate::error::CipherError;
use crate::registry::DeviceRegistry;
use crate::session::{Phase, SessionOutcome, SessionState};
use crate::time::{Clock, SystemClock};
use crate::{ClientId, DEFAULT_LOOKUP_TIMEOUT, DEFAULT_READING_TIMEOUT};

/// Everything the embedding application can tune before a session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// 3-byte network address shared by the server and its clients.
    pub network_address: u32,
    /// Channel of the per-device exchanges. Replaced by the scanner when it finds a
    /// better one.
    pub work_channel: u8,
    /// Channel of lookups and session control frames.
    pub broadcast_channel: u8,
    /// Budget from the session announcement to its forced end.
    pub session_timeout: Duration,
    /// How long to wait for one device's answer.
    pub reading_timeout: Duration,
    /// Keepalive period, `None` disables keepalives and idle detection.
    pub keep_alive_timeout: Option<Duration>,
    /// Budget of the census run by [server_loop](DcServer::server_loop).
    pub lookup_timeout: Duration,
    /// Longest wait for a peer end tag at the tail of a session.
    pub end_session_wait: Duration,
    /// Number of start tags broadcast when a session opens.
    pub start_session_repeats: u8,
    pub rf: RfConfig,
    pub scan: ScanConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network_address: 0xC7C7C7,
            work_channel: 66,
            broadcast_channel: 120,
            session_timeout: Duration::from_millis(3000),
            reading_timeout: DEFAULT_READING_TIMEOUT,
            keep_alive_timeout: Some(Duration::from_millis(1000)),
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            end_session_wait: Duration::from_millis(20),
            start_session_repeats: crate::NUMBER_OF_BROADCAST_REQUESTS as u8,
            rf: RfConfig::default(),
            scan: ScanConfig::default(),
        }
    }
}

/// Result of one [server_loop](DcServer::server_loop) iteration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub responded: usize,
    pub exchanged: usize,
}

/// Coordinator of one radio: discovers clients and runs sessions with them.
///
/// All operations take `&mut self` and run to completion on the caller's thread; one
/// server drives one radio and is never shared. `'k` is the lifetime of the borrowed
/// encryption key.
pub struct DcServer<'k, T, E, Cl = SystemClock>
where
    T: Radio<E>,
    E: Debug,
    Cl: Clock,
{
    pub(crate) transport: Transport<T, E, Cl>,
    pub(crate) config: ServerConfig,
    pub(crate) registry: DeviceRegistry,
    pub(crate) activity: ChannelActivity,
    pub(crate) cipher: Cipher<'k>,
    pub(crate) session: Option<SessionState>,
    /// Statuses hold a census that the next session should honor.
    pub(crate) census: bool,
    pub(crate) last_outcome: Option<SessionOutcome>,
}

impl<'k, T, E> DcServer<'k, T, E, SystemClock>
where
    T: Radio<E>,
    E: Debug,
{
    pub fn new(radio: T, config: ServerConfig) -> Self {
        Self::with_clock(radio, SystemClock, config)
    }
}

impl<'k, T, E, Cl> DcServer<'k, T, E, Cl>
where
    T: Radio<E>,
    E: Debug,
    Cl: Clock,
{
    pub fn with_clock(radio: T, clock: Cl, config: ServerConfig) -> Self {
        Self {
            transport: Transport::new(radio, clock, config.reading_timeout),
            config,
            registry: DeviceRegistry::new(),
            activity: ChannelActivity::default(),
            cipher: Cipher::new(),
            session: None,
            census: false,
            last_outcome: None,
        }
    }

    /// Configures the driver and switches to broadcast mode.
    pub fn init(&mut self) -> bool {
        if let Err(err) = self.transport.init(&self.config.rf) {
            warn!("Radio initialization failed: {}", err);
            return false;
        }
        info!(
            "Server ready on network {:06x} (work channel {}, broadcast channel {}).",
            self.config.network_address, self.config.work_channel, self.config.broadcast_channel
        );
        self.set_broadcast_mode()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn set_work_channel(&mut self, channel: u8) -> bool {
        if channel as usize >= CHANNEL_COUNT {
            return false;
        }
        self.config.work_channel = channel;
        true
    }

    pub fn work_channel(&self) -> u8 {
        self.config.work_channel
    }

    pub fn set_broadcast_channel(&mut self, channel: u8) -> bool {
        if channel as usize >= CHANNEL_COUNT {
            return false;
        }
        self.config.broadcast_channel = channel;
        true
    }

    pub fn broadcast_channel(&self) -> u8 {
        self.config.broadcast_channel
    }

    /// Sets the network address; anything wider than 3 bytes is refused.
    pub fn set_network_addr(&mut self, address: u32) -> bool {
        if address & !NETWORK_ADDRESS_MASK != 0 {
            return false;
        }
        self.config.network_address = address;
        true
    }

    pub fn network_addr(&self) -> u32 {
        self.config.network_address
    }

    pub fn set_rf_data_rate(&mut self, rate: DataRate) -> bool {
        self.config.rf.data_rate = rate;
        match self.transport.set_data_rate(rate) {
            Ok(()) => true,
            Err(err) => {
                warn!("Data rate {:?} rejected: {}", rate, err);
                false
            }
        }
    }

    pub fn set_rf_pa_level(&mut self, level: PaLevel) -> bool {
        self.config.rf.pa_level = level;
        match self.transport.set_pa_level(level) {
            Ok(()) => true,
            Err(err) => {
                warn!("PA level {:?} rejected: {}", level, err);
                false
            }
        }
    }

    pub fn set_session_timeout(&mut self, timeout: Duration) {
        self.config.session_timeout = timeout;
    }

    pub fn session_timeout(&self) -> Duration {
        self.config.session_timeout
    }

    pub fn set_reading_timeout(&mut self, timeout: Duration) {
        self.config.reading_timeout = timeout;
        self.transport.set_read_timeout(timeout);
    }

    pub fn reading_timeout(&self) -> Duration {
        self.config.reading_timeout
    }

    pub fn set_keep_alive_timeout(&mut self, timeout: Option<Duration>) {
        self.config.keep_alive_timeout = timeout;
    }

    pub fn keep_alive_timeout(&self) -> Option<Duration> {
        self.config.keep_alive_timeout
    }

    /// Broadcast channel, no acknowledgment: one-to-many, best effort.
    pub fn set_broadcast_mode(&mut self) -> bool {
        match self
            .transport
            .set_broadcast_mode(self.config.broadcast_channel, self.config.network_address)
        {
            Ok(()) => true,
            Err(err) => {
                warn!("Switching to broadcast mode failed: {}", err);
                false
            }
        }
    }

    /// Work channel, auto acknowledgment, talking to the client at `address` only.
    pub fn set_single_client_mode(&mut self, address: u64) -> bool {
        match self.transport.set_single_client_mode(
            self.config.work_channel,
            self.config.network_address,
            address,
        ) {
            Ok(()) => true,
            Err(err) => {
                warn!("Switching to single client mode ({:010x}) failed: {}", address, err);
                false
            }
        }
    }

    pub(crate) fn ensure_broadcast_mode(&mut self) -> bool {
        match self.transport.mode() {
            Mode::Broadcast { channel } if channel == self.config.broadcast_channel => true,
            _ => self.set_broadcast_mode(),
        }
    }

    /// Pipe address of a handled client.
    pub fn client_address(&self, id: ClientId) -> u64 {
        client_address(self.config.network_address, id)
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Mutable access to the handled devices. Indices obtained before a modification
    /// are stale afterwards.
    pub fn registry_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.registry
    }

    /// Enables or disables payload encryption. Enabling requires a key.
    pub fn set_encryption(&mut self, enabled: bool) -> Result<(), CipherError> {
        self.cipher.set_enabled(enabled)
    }

    pub fn encryption(&self) -> bool {
        self.cipher.is_enabled()
    }

    /// Borrows `key` until it is replaced or the server is dropped.
    pub fn set_encrypt_key(&mut self, key: &'k [u8]) -> Result<(), CipherError> {
        self.cipher.set_key(key)
    }

    pub fn encrypt_msg(&self, msg: &mut [u8]) {
        self.cipher.encrypt(msg)
    }

    pub fn decrypt_msg(&self, msg: &mut [u8]) {
        self.cipher.decrypt(msg)
    }

    /// Blocking read bounded by the reading timeout.
    pub fn read(&mut self, buf: &mut [u8]) -> Option<usize> {
        self.transport.read(buf)
    }

    /// Blocking write bounded by the transmission timeout.
    pub fn write(&mut self, buf: &[u8]) -> bool {
        self.transport.write(buf)
    }

    /// Encodes `frame`, encrypts its payload and sends it in the current mode.
    pub(crate) fn send_frame(&mut self, frame: &Frame<'_>) -> bool {
        let mut bytes = match frame.to_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("{:?} frame not sent: {}", frame.tag(), err);
                return false;
            }
        };
        if let Some(offset) = frame.payload_offset() {
            self.cipher.encrypt(&mut bytes[offset..]);
        }
        self.transport.write(&bytes)
    }

    pub fn phase(&self) -> Phase {
        self.session
            .as_ref()
            .map_or(Phase::Idle, SessionState::phase)
    }

    pub fn is_session_active(&self) -> bool {
        self.session.is_some()
    }

    /// Summary of the last completed session.
    pub fn last_session(&self) -> Option<&SessionOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn channel_activity(&self) -> &ChannelActivity {
        &self.activity
    }

    /// One cooperative cycle: census of the handled devices, then a session with the
    /// ones that answered.
    pub fn server_loop(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        if self.registry.is_empty() {
            debug!("No handled client, nothing to do.");
            return report;
        }
        report.responded = self.look_for_client(self.config.lookup_timeout);
        if report.responded == 0 {
            return report;
        }
        match self.start_session() {
            Ok(exchanged) => report.exchanged = exchanged,
            Err(err) => warn!("Session not started: {}", err),
        }
        report
    }

    pub fn radio(&self) -> &T {
        self.transport.radio()
    }

    pub fn radio_mut(&mut self) -> &mut T {
        self.transport.radio_mut()
    }

    pub fn now(&self) -> std::time::Instant {
        self.transport.now()
    }
}
