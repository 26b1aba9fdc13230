//! Everything needed to talk to peers through the physical radio module.

pub mod frame;
pub mod radio;
pub mod transport;

pub use radio::{Nrf24, Radio};
pub use transport::{Mode, Transport, TransportError};

#[cfg(test)]
pub(crate) mod mock;
