//! Errors and faults

use crate::pipe::ChannelError;
use core::fmt;

/// Errors reported by the bridge
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error {
    /// Endpoint or pipe setup failed.
    Configuration,
    /// The FRAM didn't take a command frame.
    BusCommand,
    /// A data phase on the serial bus failed.
    BusTransfer,
    /// A sector write didn't finish within the write timeout.
    BusTimeout,
    /// A control request named a sector or length outside of the FRAM.
    OutOfRange,
    /// A DMA pipe rejected an acquire, commit, or discard.
    Pipe(ChannelError),
    /// The link went down, or the pipes were rebuilt, under an operation.
    Inactive,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration => f.write_str("endpoint or pipe configuration failed"),
            Error::BusCommand => f.write_str("FRAM command failed"),
            Error::BusTransfer => f.write_str("FRAM data transfer failed"),
            Error::BusTimeout => f.write_str("FRAM write timed out"),
            Error::OutOfRange => f.write_str("sector or length out of range"),
            Error::Pipe(err) => write!(f, "DMA pipe error: {err:?}"),
            Error::Inactive => f.write_str("link inactive"),
        }
    }
}

impl From<ChannelError> for Error {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Destroyed => Error::Inactive,
            err => Error::Pipe(err),
        }
    }
}

/// An unrecoverable error
///
/// A fault means that the control or DMA state can no longer be trusted. There's
/// no in-field recovery; the device needs an external reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Fault(Error);

impl Fault {
    pub(crate) fn new(error: Error) -> Self {
        error!("FAULT {}", error);
        Fault(error)
    }

    /// Returns the error that caused this fault
    pub fn error(&self) -> Error {
        self.0
    }

    /// Park the core forever
    ///
    /// On Cortex-M targets, the core sleeps between interrupts. Elsewhere,
    /// this spins.
    pub fn halt(self) -> ! {
        error!("HALT {}", self.0);
        loop {
            #[cfg(target_arch = "arm")]
            cortex_m::asm::wfi();
            #[cfg(not(target_arch = "arm"))]
            core::hint::spin_loop();
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fault: {}", self.0)
    }
}

impl From<Error> for Fault {
    fn from(error: Error) -> Self {
        Fault::new(error)
    }
}
