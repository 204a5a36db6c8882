//! Bridge configuration
//!
//! The defaults describe a 2 Mbit SPI FRAM behind a pair of bulk endpoints
//! (EP1 OUT, EP1 IN), with one 20 KiB DMA buffer per pipe. Use the `const`
//! builder methods to describe something else:
//!
//! ```
//! use usbd_fram::Config;
//! use core::time::Duration;
//!
//! const CONFIG: Config = Config::new()
//!     .buffer_size(4 * 1024)
//!     .buffer_count(2)
//!     .write_timeout(Duration::from_millis(50));
//!
//! assert_eq!(CONFIG.geometry().sector_size(), 4 * 1024 + 32);
//! ```

use crate::geometry::Geometry;
use core::time::Duration;
use usb_device::endpoint::EndpointAddress;

/// Bytes in one DMA buffer, and the largest transfer in either direction.
pub const DMA_BUFFER_SIZE: usize = 20 * 1024;

/// DMA buffers per pipe.
///
/// One buffer bounds the pipeline depth to one in-flight buffer per
/// direction.
pub const DMA_BUFFER_COUNT: usize = 1;

/// Bytes between the end of one sector's data and the start of the next.
pub const SECTOR_MARGIN: u32 = 32;

/// Addressable bytes in the FRAM (2 Mbit).
pub const FRAM_CAPACITY: u32 = 256 * 1024;

/// Longest we'll wait for a sector write to clock out.
pub const FRAM_TIMEOUT: Duration = Duration::from_millis(1000);

/// Time given to the dispatcher between pipe teardown and rebuild.
pub const HALT_SETTLE: Duration = Duration::from_millis(1);

/// Vendor request that latches a sector for the next bulk OUT transfer.
pub const STORE_REQUEST: u8 = 0xC2;

/// Vendor request that latches a sector and length for the next bulk IN transfer.
pub const FETCH_REQUEST: u8 = 0xC3;

/// EP1 OUT, the producer endpoint.
pub const PRODUCER_ENDPOINT: u8 = 0x01;

/// EP1 IN, the consumer endpoint.
pub const CONSUMER_ENDPOINT: u8 = 0x81;

/// Sector size of the default configuration.
pub const SECTOR_SIZE: u32 = DMA_BUFFER_SIZE as u32 + SECTOR_MARGIN;

/// Sector count of the default configuration.
pub const SECTOR_COUNT: u16 = (FRAM_CAPACITY / SECTOR_SIZE) as u16;

/// Bridge configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    buffer_size: usize,
    buffer_count: usize,
    capacity: u32,
    write_timeout: Duration,
    halt_settle: Duration,
    producer: u8,
    consumer: u8,
    store_request: u8,
    fetch_request: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// The default configuration.
    pub const fn new() -> Self {
        Config {
            buffer_size: DMA_BUFFER_SIZE,
            buffer_count: DMA_BUFFER_COUNT,
            capacity: FRAM_CAPACITY,
            write_timeout: FRAM_TIMEOUT,
            halt_settle: HALT_SETTLE,
            producer: PRODUCER_ENDPOINT,
            consumer: CONSUMER_ENDPOINT,
            store_request: STORE_REQUEST,
            fetch_request: FETCH_REQUEST,
        }
    }

    /// Set the DMA buffer size. Also changes the sector size.
    pub const fn buffer_size(self, buffer_size: usize) -> Self {
        Config {
            buffer_size,
            ..self
        }
    }

    /// Set the number of DMA buffers in each pipe.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_count` is zero.
    pub const fn buffer_count(self, buffer_count: usize) -> Self {
        assert!(buffer_count > 0, "A pipe needs at least one buffer");
        Config {
            buffer_count,
            ..self
        }
    }

    /// Set the FRAM capacity, in bytes.
    pub const fn capacity(self, capacity: u32) -> Self {
        Config { capacity, ..self }
    }

    /// Set the bound on a sector write.
    pub const fn write_timeout(self, write_timeout: Duration) -> Self {
        Config {
            write_timeout,
            ..self
        }
    }

    /// Set the delay between pipe teardown and rebuild after a halt clear.
    pub const fn halt_settle(self, halt_settle: Duration) -> Self {
        Config {
            halt_settle,
            ..self
        }
    }

    /// Set the bulk OUT and bulk IN endpoint addresses.
    ///
    /// # Panics
    ///
    /// Panics if `producer` isn't an OUT address, or if `consumer`
    /// isn't an IN address.
    pub const fn endpoints(self, producer: u8, consumer: u8) -> Self {
        assert!(producer & 0x80 == 0, "Producer must be an OUT endpoint");
        assert!(consumer & 0x80 != 0, "Consumer must be an IN endpoint");
        Config {
            producer,
            consumer,
            ..self
        }
    }

    /// Set the vendor request codes for STORE and FETCH.
    pub const fn requests(self, store_request: u8, fetch_request: u8) -> Self {
        Config {
            store_request,
            fetch_request,
            ..self
        }
    }

    /// Returns the sector layout derived from this configuration.
    pub const fn geometry(&self) -> Geometry {
        Geometry::new(self.buffer_size, SECTOR_MARGIN, self.capacity)
    }

    /// Returns the DMA buffer size.
    pub const fn dma_buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Returns the number of DMA buffers per pipe.
    pub const fn dma_buffer_count(&self) -> usize {
        self.buffer_count
    }

    /// Returns the bound on a sector write.
    pub const fn fram_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Returns the delay used between pipe teardown and rebuild.
    pub const fn settle_time(&self) -> Duration {
        self.halt_settle
    }

    /// Returns the bulk OUT endpoint.
    pub fn producer(&self) -> EndpointAddress {
        EndpointAddress::from(self.producer)
    }

    /// Returns the bulk IN endpoint.
    pub fn consumer(&self) -> EndpointAddress {
        EndpointAddress::from(self.consumer)
    }

    /// Returns the STORE vendor request code.
    pub const fn store_request(&self) -> u8 {
        self.store_request
    }

    /// Returns the FETCH vendor request code.
    pub const fn fetch_request(&self) -> u8 {
        self.fetch_request
    }

    /// Indicates if `endpoint` is one of the two bulk endpoints.
    pub fn is_managed(&self, endpoint: EndpointAddress) -> bool {
        endpoint == self.producer() || endpoint == self.consumer()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_layout() {
        assert_eq!(SECTOR_SIZE, 20512);
        assert_eq!(SECTOR_COUNT, 12);

        let geometry = Config::new().geometry();
        assert_eq!(geometry.sector_size(), SECTOR_SIZE);
        assert_eq!(geometry.sector_count(), SECTOR_COUNT);
    }

    #[test]
    fn endpoints() {
        let config = Config::new();
        assert_eq!(u8::from(config.producer()), 0x01);
        assert_eq!(u8::from(config.consumer()), 0x81);
        assert!(config.is_managed(EndpointAddress::from(0x81)));
        assert!(!config.is_managed(EndpointAddress::from(0x82)));
        assert!(!config.is_managed(EndpointAddress::from(0x00)));
    }

    #[test]
    fn builders() {
        let config = Config::new()
            .buffer_size(1024)
            .capacity(8 * 1024)
            .endpoints(0x02, 0x86);
        assert_eq!(config.geometry().sector_size(), 1024 + 32);
        assert_eq!(config.geometry().sector_count(), 7);
        assert_eq!(u8::from(config.consumer()), 0x86);
    }

    #[test]
    #[should_panic]
    fn no_zero_buffer_count() {
        let _ = Config::new().buffer_count(0);
    }
}
