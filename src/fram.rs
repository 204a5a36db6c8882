//! SPI FRAM transfers
//!
//! [`Fram`] runs one command / data exchange over a [`SerialBus`] per call.
//! The bus owns the electrical configuration (clock, mode, word length) and the
//! DMA channels that move data words. The driver owns the framing and the
//! slave select.

use crate::{command::Command, geometry::SectorAddress, Error};
use core::{
    ops::{Deref, DerefMut},
    time::Duration,
};

/// Errors reported by a [`SerialBus`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum BusError {
    /// The bus, or its DMA channel, reported an error.
    Failed,
    /// The transfer didn't complete in time.
    Timeout,
}

/// A SPI master with a firmware-controlled slave select
///
/// Words are eight bits, MSB first.
pub trait SerialBus {
    /// Drive the slave select. `true` selects the FRAM (drives the line low).
    fn set_select(&mut self, selected: bool);

    /// Transmit `words` by register I/O, blocking until they're on the wire.
    fn transmit(&mut self, words: &[u8]) -> Result<(), BusError>;

    /// Clock `buffer.len()` words into `buffer` through the receive DMA
    /// channel.
    ///
    /// Set up the receive buffer, generate the clocks, wait for the block
    /// transfer, then finalize the channel and leave block mode. There's no
    /// timeout; the master generates the clock.
    fn receive(&mut self, buffer: &mut [u8]) -> Result<(), BusError>;

    /// Send `words` through the transmit DMA channel, waiting no longer than
    /// `timeout` for completion, then leave block mode.
    fn send(&mut self, words: &[u8], timeout: Duration) -> Result<(), BusError>;
}

/// Keeps the FRAM selected until dropped
struct Selected<'a, B: SerialBus>(&'a mut B);

impl<'a, B: SerialBus> Selected<'a, B> {
    fn new(bus: &'a mut B) -> Self {
        bus.set_select(true);
        Selected(bus)
    }
}

impl<B: SerialBus> Drop for Selected<'_, B> {
    fn drop(&mut self) {
        self.0.set_select(false);
    }
}

impl<B: SerialBus> Deref for Selected<'_, B> {
    type Target = B;
    fn deref(&self) -> &B {
        self.0
    }
}

impl<B: SerialBus> DerefMut for Selected<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        self.0
    }
}

/// A SPI FRAM
///
/// Sector numbers and byte counts are validated before they get here.
pub struct Fram<B> {
    bus: B,
    timeout: Duration,
}

impl<B: SerialBus> Fram<B> {
    /// Use `bus` to talk to the FRAM, waiting at most `timeout` for a
    /// sector write
    pub fn new(bus: B, timeout: Duration) -> Self {
        Fram { bus, timeout }
    }

    /// Access the serial bus
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutably access the serial bus
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Release the serial bus
    pub fn release(self) -> B {
        self.bus
    }

    /// Read `buffer.len()` bytes from the start of `sector`
    ///
    /// Does nothing if `buffer` is empty.
    pub fn read(&mut self, sector: SectorAddress, buffer: &mut [u8]) -> Result<(), Error> {
        if buffer.is_empty() {
            return Ok(());
        }

        debug!(
            "FRAM READ ADDR {=u32:#X} SIZE {=usize:#X}",
            sector.byte_offset(),
            buffer.len()
        );

        let command = Command::read(sector);
        let mut bus = Selected::new(&mut self.bus);
        bus.transmit(command.as_bytes()).map_err(|_| {
            warn!("FRAM READ command failed");
            Error::BusCommand
        })?;
        bus.receive(buffer).map_err(|_| {
            warn!("FRAM READ transfer failed");
            Error::BusTransfer
        })
    }

    /// Write `data` to the start of `sector`
    ///
    /// Does nothing if `data` is empty.
    pub fn write(&mut self, sector: SectorAddress, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }

        debug!(
            "FRAM WRITE ADDR {=u32:#X} SIZE {=usize:#X}",
            sector.byte_offset(),
            data.len()
        );

        // The write enable latch needs its own select window.
        Selected::new(&mut self.bus)
            .transmit(Command::write_enable().as_bytes())
            .map_err(|_| {
                warn!("FRAM WREN command failed");
                Error::BusCommand
            })?;

        let command = Command::write(sector);
        let mut bus = Selected::new(&mut self.bus);
        bus.transmit(command.as_bytes()).map_err(|_| {
            warn!("FRAM WRITE command failed");
            Error::BusCommand
        })?;
        bus.send(data, self.timeout).map_err(|status| match status {
            BusError::Timeout => {
                warn!("FRAM WRITE timed out");
                Error::BusTimeout
            }
            BusError::Failed => {
                warn!("FRAM WRITE transfer failed");
                Error::BusTransfer
            }
        })
    }
}
