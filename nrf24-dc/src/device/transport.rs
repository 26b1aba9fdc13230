use log::{debug, trace};
use std::fmt::Debug;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use super::frame::{broadcast_address, server_address};
use super::radio::{
    DataRate, Nrf24, PaLevel, Radio, RfConfig, ADDRESS_WIDTH, MAX_SIZE_OF_RF_PACKET,
};
use crate::time::{Clock, Deadline};

/// Interval between two polls of the radio status while waiting.
const POLL_INTERVAL: Duration = Duration::from_micros(100);
/// Upper bound for one transmission, retransmissions included.
const WRITE_TIMEOUT: Duration = Duration::from_millis(10);

/// Transport configuration currently applied to the radio.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mode {
    /// The channel or pipes were touched outside a mode switch (after init or a scan).
    Unconfigured,
    /// Broadcast channel, no acknowledgment, every client of the network addressed.
    Broadcast { channel: u8 },
    /// Work channel, auto acknowledgment, one client addressed.
    SingleClient { channel: u8, address: u64 },
}

/// Synchronous wrapper around the radio driver.
///
/// The rest of the engine only sees [read](Transport::read) / [write](Transport::write)
/// style primitives returning success or failure. Each of them blocks for a bounded
/// amount of time: driver errors and timeouts are logged and folded into "nothing
/// happened".
pub struct Transport<T, E, Cl>
where
    T: Radio<E>,
    E: Debug,
    Cl: Clock,
{
    radio: T,
    clock: Cl,
    mode: Mode,
    listening: bool,
    read_timeout: Duration,
    phantom: PhantomData<E>,
}

impl<T, E, Cl> Transport<T, E, Cl>
where
    T: Radio<E>,
    E: Debug,
    Cl: Clock,
{
    pub fn new(radio: T, clock: Cl, read_timeout: Duration) -> Self {
        Self {
            radio,
            clock,
            mode: Mode::Unconfigured,
            listening: false,
            read_timeout,
            phantom: PhantomData,
        }
    }

    /// Applies the static RF parameters. Must be called once before any mode switch.
    pub fn init(&mut self, rf: &RfConfig) -> Result<(), TransportError<E>> {
        self.radio
            .set_address_width(ADDRESS_WIDTH)
            .map_err(TransportError::InternalRadioError)?;
        self.radio
            .set_retries(rf.retry_delay, rf.retry_count)
            .map_err(TransportError::InternalRadioError)?;
        self.radio
            .set_crc_length(rf.crc)
            .map_err(TransportError::InternalRadioError)?;
        self.radio
            .enable_dynamic_payloads()
            .map_err(TransportError::InternalRadioError)?;
        self.set_data_rate(rf.data_rate)?;
        self.set_pa_level(rf.pa_level)?;
        self.mode = Mode::Unconfigured;
        self.listening = false;
        Ok(())
    }

    pub fn set_data_rate(&mut self, rate: DataRate) -> Result<(), TransportError<E>> {
        self.radio
            .set_data_rate(rate)
            .map_err(TransportError::InternalRadioError)
    }

    pub fn set_pa_level(&mut self, level: PaLevel) -> Result<(), TransportError<E>> {
        self.radio
            .set_power(level.dbm())
            .map_err(TransportError::InternalRadioError)
    }

    pub fn set_broadcast_mode(&mut self, channel: u8, network: u32) -> Result<(), TransportError<E>> {
        // Forget the previous mode first, a half-applied switch must not look valid.
        self.mode = Mode::Unconfigured;
        self.listening = false;
        self.radio
            .set_channel(&channel)
            .map_err(TransportError::InternalRadioError)?;
        self.radio
            .set_auto_ack(false)
            .map_err(TransportError::InternalRadioError)?;
        self.radio
            .open_writing_pipe(broadcast_address(network))
            .map_err(TransportError::InternalRadioError)?;
        self.radio
            .open_reading_pipe(1, server_address(network))
            .map_err(TransportError::InternalRadioError)?;
        self.radio
            .flush_rx()
            .map_err(TransportError::InternalRadioError)?;
        trace!("Broadcast mode on channel {}.", channel);
        self.mode = Mode::Broadcast { channel };
        Ok(())
    }

    pub fn set_single_client_mode(
        &mut self,
        channel: u8,
        network: u32,
        address: u64,
    ) -> Result<(), TransportError<E>> {
        self.mode = Mode::Unconfigured;
        self.listening = false;
        self.radio
            .set_channel(&channel)
            .map_err(TransportError::InternalRadioError)?;
        self.radio
            .set_auto_ack(true)
            .map_err(TransportError::InternalRadioError)?;
        self.radio
            .open_writing_pipe(address)
            .map_err(TransportError::InternalRadioError)?;
        self.radio
            .open_reading_pipe(1, server_address(network))
            .map_err(TransportError::InternalRadioError)?;
        self.radio
            .flush_rx()
            .map_err(TransportError::InternalRadioError)?;
        trace!("Single client mode on channel {} for {:010x}.", channel, address);
        self.mode = Mode::SingleClient { channel, address };
        Ok(())
    }

    /// Listens on `channel` for `dwell` and reports whether a carrier was detected.
    ///
    /// Leaves the transport [Mode::Unconfigured].
    pub fn sense_carrier(&mut self, channel: u8, dwell: Duration) -> Result<bool, TransportError<E>> {
        self.mode = Mode::Unconfigured;
        self.listening = false;
        self.radio
            .set_channel(&channel)
            .map_err(TransportError::InternalRadioError)?;
        self.radio
            .start_receive()
            .map_err(TransportError::InternalRadioError)?;
        self.radio.delay_us(dwell.as_micros() as u32);
        self.radio
            .carrier_detected()
            .map_err(TransportError::InternalRadioError)
    }

    /// Sends `buf` as one packet. In single client mode success means the peer
    /// acknowledged it.
    pub fn write(&mut self, buf: &[u8]) -> bool {
        match self.try_write(buf) {
            Ok(()) => true,
            Err(err) => {
                debug!("Write failed ({:?}): {}", self.mode, err);
                false
            }
        }
    }

    /// Waits up to the configured read timeout for one packet and copies it into `buf`.
    pub fn read(&mut self, buf: &mut [u8]) -> Option<usize> {
        let deadline = Deadline::after(self.clock.now(), self.read_timeout);
        self.read_until(buf, deadline)
    }

    /// Waits until `deadline` for one packet and copies it into `buf`.
    pub fn read_until(&mut self, buf: &mut [u8], deadline: Deadline) -> Option<usize> {
        match self.try_read_until(buf, deadline) {
            Ok(size) => size,
            Err(err) => {
                debug!("Read failed ({:?}): {}", self.mode, err);
                None
            }
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> Result<(), TransportError<E>> {
        if buf.is_empty() || buf.len() > MAX_SIZE_OF_RF_PACKET {
            return Err(TransportError::InvalidPayloadSize { size: buf.len() });
        }
        self.listening = false;
        self.radio
            .start_transmit(buf)
            .map_err(TransportError::InternalRadioError)?;
        let deadline = Deadline::after(self.clock.now(), WRITE_TIMEOUT);
        while !self
            .radio
            .check_transmit()
            .map_err(TransportError::InternalRadioError)?
        {
            if deadline.is_expired(self.clock.now()) {
                return Err(TransportError::TransmitTimeout);
            }
            self.radio.delay_us(POLL_INTERVAL.as_micros() as u32);
        }
        Ok(())
    }

    fn try_read_until(
        &mut self,
        buf: &mut [u8],
        deadline: Deadline,
    ) -> Result<Option<usize>, TransportError<E>> {
        if !self.listening {
            self.radio
                .start_receive()
                .map_err(TransportError::InternalRadioError)?;
            self.listening = true;
        }
        loop {
            if self
                .radio
                .check_receive(true)
                .map_err(TransportError::InternalRadioError)?
            {
                let (size, _info) = self
                    .radio
                    .get_received(buf)
                    .map_err(TransportError::InternalRadioError)?;
                if size > 0 {
                    return Ok(Some(size.min(buf.len())));
                }
                trace!("Packet ignored: size == 0");
            }
            let now = self.clock.now();
            if deadline.is_expired(now) {
                return Ok(None);
            }
            let wait = deadline.remaining(now).min(POLL_INTERVAL);
            self.radio.delay_us(wait.as_micros().max(1) as u32);
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    pub fn radio(&self) -> &T {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut T {
        &mut self.radio
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError<R>
where
    R: Debug,
{
    #[error("Payload size is invalid (is: {}B, expected 1..={}B)!", .size, MAX_SIZE_OF_RF_PACKET)]
    InvalidPayloadSize { size: usize },

    #[error("Transmission did not complete in time.")]
    TransmitTimeout,

    #[error("Internal radio error: {:?}", .0)]
    InternalRadioError(R),
}
