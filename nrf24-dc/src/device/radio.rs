use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use radio::{Power, Receive, Transmit};
use std::fmt::Debug;

/// Width of every pipe address on air, in bytes.
pub const ADDRESS_WIDTH: u8 = 5;
/// Number of channels an nRF24L01 can tune to (2400 MHz + n MHz).
pub const CHANNEL_COUNT: usize = 126;
/// Hard ceiling of a dynamic payload.
pub const MAX_SIZE_OF_RF_PACKET: usize = 32;

/// Over-the-air data rate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataRate {
    Kbps250,
    Mbps1,
    Mbps2,
}

/// CRC appended by the chip to every packet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CrcLength {
    Disabled,
    Crc8,
    Crc16,
}

/// Power amplifier level, mapped to the output power handed to [Power::set_power].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PaLevel {
    Min,
    Low,
    High,
    Max,
}

impl PaLevel {
    /// Output power in dBm.
    pub fn dbm(&self) -> i8 {
        match self {
            PaLevel::Min => -18,
            PaLevel::Low => -12,
            PaLevel::High => -6,
            PaLevel::Max => 0,
        }
    }
}

/// nRF24L01 features the generic `radio` traits have no vocabulary for.
///
/// Addresses are passed as the low [ADDRESS_WIDTH] bytes of a `u64`.
pub trait Nrf24 {
    type Error: Debug;

    fn set_address_width(&mut self, width: u8) -> Result<(), Self::Error>;
    /// `delay` is in steps of 250us, `count` is the number of retransmissions (0..=15).
    fn set_retries(&mut self, delay: u8, count: u8) -> Result<(), Self::Error>;
    fn set_crc_length(&mut self, crc: CrcLength) -> Result<(), Self::Error>;
    fn set_data_rate(&mut self, rate: DataRate) -> Result<(), Self::Error>;
    fn enable_dynamic_payloads(&mut self) -> Result<(), Self::Error>;
    /// With auto-ack on, a transmission only completes once the peer acknowledged it;
    /// running out of retries surfaces as an error from `check_transmit`.
    fn set_auto_ack(&mut self, enabled: bool) -> Result<(), Self::Error>;
    fn open_writing_pipe(&mut self, address: u64) -> Result<(), Self::Error>;
    fn open_reading_pipe(&mut self, pipe: u8, address: u64) -> Result<(), Self::Error>;
    /// Drops every packet waiting in the receive FIFO. Retuning the channel does not.
    fn flush_rx(&mut self) -> Result<(), Self::Error>;
    /// Received power detector: true if a carrier above -64 dBm was seen since the
    /// receiver was last started.
    fn carrier_detected(&mut self) -> Result<bool, Self::Error>;
}

/// Radio physical device representation.
pub trait Radio<E>:
    Transmit<Error = E>
    + Receive<Error = E>
    + Power<Error = E>
    + radio::Channel<Channel = u8, Error = E>
    + Nrf24<Error = E>
    + DelayMs<u32>
    + DelayUs<u32>
{
}

impl<
        E: Debug,
        T: Transmit<Error = E>
            + Receive<Error = E>
            + Power<Error = E>
            + radio::Channel<Channel = u8, Error = E>
            + Nrf24<Error = E>
            + DelayMs<u32>
            + DelayUs<u32>,
    > Radio<E> for T
{
}

/// Static RF parameters applied once by [Transport::init](super::transport::Transport::init).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RfConfig {
    pub retry_delay: u8,
    pub retry_count: u8,
    pub crc: CrcLength,
    pub data_rate: DataRate,
    pub pa_level: PaLevel,
}

impl Default for RfConfig {
    fn default() -> Self {
        Self {
            retry_delay: 1, // 500us between retransmissions
            retry_count: 4,
            crc: CrcLength::Crc16,
            data_rate: DataRate::Mbps1,
            pa_level: PaLevel::High,
        }
    }
}
