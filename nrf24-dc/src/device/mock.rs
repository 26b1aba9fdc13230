//! Radio that hears nothing, for unit tests of the engine.
use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use radio::{Channel, Power, Receive, ReceiveInfo, Transmit};

use super::radio::{CrcLength, DataRate, Nrf24};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockError;

#[derive(Debug, Default, Clone)]
pub struct MockInfo;

impl ReceiveInfo for MockInfo {
    fn rssi(&self) -> i16 {
        0
    }
}

/// Every transmission succeeds, nothing is ever received.
#[derive(Debug, Default)]
pub struct SilentRadio {
    pub channel: u8,
    pub transmitted: Vec<Vec<u8>>,
}

impl Transmit for SilentRadio {
    type Error = MockError;

    fn start_transmit(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.transmitted.push(data.to_vec());
        Ok(())
    }

    fn check_transmit(&mut self) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

impl Receive for SilentRadio {
    type Error = MockError;
    type Info = MockInfo;

    fn start_receive(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn check_receive(&mut self, _restart: bool) -> Result<bool, Self::Error> {
        Ok(false)
    }

    fn get_received(&mut self, _buff: &mut [u8]) -> Result<(usize, Self::Info), Self::Error> {
        Ok((0, MockInfo))
    }
}

impl Power for SilentRadio {
    type Error = MockError;

    fn set_power(&mut self, _power: i8) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Channel for SilentRadio {
    type Channel = u8;
    type Error = MockError;

    fn set_channel(&mut self, channel: &u8) -> Result<(), Self::Error> {
        self.channel = *channel;
        Ok(())
    }
}

impl Nrf24 for SilentRadio {
    type Error = MockError;

    fn set_address_width(&mut self, _width: u8) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_retries(&mut self, _delay: u8, _count: u8) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_crc_length(&mut self, _crc: CrcLength) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_data_rate(&mut self, _rate: DataRate) -> Result<(), Self::Error> {
        Ok(())
    }

    fn enable_dynamic_payloads(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_auto_ack(&mut self, _enabled: bool) -> Result<(), Self::Error> {
        Ok(())
    }

    fn open_writing_pipe(&mut self, _address: u64) -> Result<(), Self::Error> {
        Ok(())
    }

    fn open_reading_pipe(&mut self, _pipe: u8, _address: u64) -> Result<(), Self::Error> {
        Ok(())
    }

    fn flush_rx(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn carrier_detected(&mut self) -> Result<bool, Self::Error> {
        Ok(false)
    }
}

impl DelayMs<u32> for SilentRadio {
    fn delay_ms(&mut self, _ms: u32) {}
}

impl DelayUs<u32> for SilentRadio {
    fn delay_us(&mut self, _us: u32) {}
}
