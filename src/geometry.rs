//! FRAM sector layout

use crate::Error;

/// How the FRAM is divided into sectors
///
/// Each sector holds one DMA buffer of data, followed by a small margin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Geometry {
    sector_size: u32,
    sector_count: u16,
}

impl Geometry {
    /// Describe a FRAM of `capacity` bytes, where each sector carries `data_size`
    /// bytes plus `margin` bytes
    pub const fn new(data_size: usize, margin: u32, capacity: u32) -> Self {
        let sector_size = data_size as u32 + margin;
        let sector_count = if sector_size == 0 {
            0
        } else {
            capacity / sector_size
        };
        Geometry {
            sector_size,
            sector_count: if sector_count > u16::MAX as u32 {
                u16::MAX
            } else {
                sector_count as u16
            },
        }
    }

    /// Bytes per sector, including the margin
    pub const fn sector_size(&self) -> u32 {
        self.sector_size
    }

    /// Number of whole sectors in the FRAM
    pub const fn sector_count(&self) -> u16 {
        self.sector_count
    }

    /// Validate a sector index from a control request
    ///
    /// Returns [`Error::OutOfRange`] if the sector lies beyond the end of the FRAM.
    pub fn sector(&self, index: u16) -> Result<SectorAddress, Error> {
        if index < self.sector_count {
            Ok(SectorAddress {
                index,
                offset: self.sector_size * index as u32,
            })
        } else {
            Err(Error::OutOfRange)
        }
    }
}

/// A sector that's known to be inside the FRAM
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct SectorAddress {
    index: u16,
    offset: u32,
}

impl SectorAddress {
    /// The sector number
    pub fn index(&self) -> u16 {
        self.index
    }

    /// The first byte of this sector
    pub fn byte_offset(&self) -> u32 {
        self.offset
    }
}

#[cfg(test)]
mod test {
    use super::Geometry;
    use crate::Error;

    #[test]
    fn bounds() {
        let geometry = Geometry::new(20 * 1024, 32, 256 * 1024);
        assert_eq!(geometry.sector_count(), 12);

        let last = geometry.sector(11).unwrap();
        assert_eq!(last.index(), 11);
        assert_eq!(last.byte_offset(), 11 * 20512);

        assert_eq!(geometry.sector(12), Err(Error::OutOfRange));
        assert_eq!(geometry.sector(u16::MAX), Err(Error::OutOfRange));
    }

    #[test]
    fn empty() {
        let geometry = Geometry::new(0, 0, 1024);
        assert_eq!(geometry.sector_count(), 0);
        assert_eq!(geometry.sector(0), Err(Error::OutOfRange));
    }

    #[test]
    fn clamps_sector_count() {
        let geometry = Geometry::new(1, 0, u32::MAX);
        assert_eq!(geometry.sector_count(), u16::MAX);
    }
}
