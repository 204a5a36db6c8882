//! SPI FRAM command frames
//!
//! A frame is an opcode, optionally followed by a 24-bit, big-endian
//! byte address. Data follows the frame in the same select window.

use crate::geometry::SectorAddress;

/// FRAM opcodes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum Opcode {
    /// Set the write enable latch
    WriteEnable = 0x06,
    /// Write memory data
    Write = 0x02,
    /// Read memory data
    Read = 0x03,
}

/// A command frame, ready to clock out
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Command {
    bytes: [u8; 4],
    len: usize,
}

impl Command {
    /// Read starting at the first byte of `sector`
    pub fn read(sector: SectorAddress) -> Self {
        Self::addressed(Opcode::Read, sector)
    }

    /// Write starting at the first byte of `sector`
    ///
    /// The FRAM ignores this unless it's preceded by [`write_enable()`](Command::write_enable)
    /// in its own select window.
    pub fn write(sector: SectorAddress) -> Self {
        Self::addressed(Opcode::Write, sector)
    }

    /// Set the write enable latch
    pub const fn write_enable() -> Self {
        Command {
            bytes: [Opcode::WriteEnable as u8, 0, 0, 0],
            len: 1,
        }
    }

    fn addressed(opcode: Opcode, sector: SectorAddress) -> Self {
        // Only the low 24 bits make it onto the wire.
        let [_, high, mid, low] = sector.byte_offset().to_be_bytes();
        Command {
            bytes: [opcode as u8, high, mid, low],
            len: 4,
        }
    }

    /// Returns the command's opcode
    pub fn opcode(&self) -> Opcode {
        match self.bytes[0] {
            0x02 => Opcode::Write,
            0x03 => Opcode::Read,
            _ => Opcode::WriteEnable,
        }
    }

    /// Returns the 24-bit address, if the command has one
    pub fn address(&self) -> Option<[u8; 3]> {
        (self.len == 4).then(|| [self.bytes[1], self.bytes[2], self.bytes[3]])
    }

    /// The bytes to transmit
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}
