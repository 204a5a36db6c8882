//! Latched transfer requests
//!
//! The control handler latches a [`TransferRequest`] when the host asks for
//! a STORE or FETCH. The dispatcher takes it later, and runs the transfer.
//! There's one slot per kind; a second request of the same kind replaces the
//! first.

use crate::geometry::SectorAddress;
use core::task::Waker;
use embassy_sync::waitqueue::WakerRegistration;
use usb_device::{
    control::{Recipient, Request, RequestType},
    UsbDirection,
};

/// A transfer accepted from the host
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum TransferRequest {
    /// Write the next bulk OUT transfer to `sector`.
    Store {
        /// Destination sector
        sector: SectorAddress,
    },
    /// Send `length` bytes from `sector` on bulk IN.
    Fetch {
        /// Source sector
        sector: SectorAddress,
        /// Bytes to send
        length: usize,
    },
}

bitflags::bitflags! {
    /// Latched request kinds
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Pending: u8 {
        /// A store is waiting.
        const STORE = 1 << 0;
        /// A fetch is waiting.
        const FETCH = 1 << 1;
    }
}

/// What [`RequestSlots::latch`] did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Latched {
    /// The slot was empty.
    New,
    /// The slot held this request, which is now gone.
    Replaced(TransferRequest),
}

/// One request slot per kind
pub struct RequestSlots {
    store: Option<SectorAddress>,
    fetch: Option<(SectorAddress, usize)>,
    replaced: u32,
    waiter: WakerRegistration,
}

impl Default for RequestSlots {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestSlots {
    /// Empty slots
    pub const fn new() -> Self {
        RequestSlots {
            store: None,
            fetch: None,
            replaced: 0,
            waiter: WakerRegistration::new(),
        }
    }

    /// Latch `request`, and wake the dispatcher
    pub fn latch(&mut self, request: TransferRequest) -> Latched {
        let previous = match request {
            TransferRequest::Store { sector } => self
                .store
                .replace(sector)
                .map(|sector| TransferRequest::Store { sector }),
            TransferRequest::Fetch { sector, length } => self
                .fetch
                .replace((sector, length))
                .map(|(sector, length)| TransferRequest::Fetch { sector, length }),
        };
        self.waiter.wake();

        match previous {
            Some(previous) => {
                self.replaced = self.replaced.wrapping_add(1);
                warn!("REQUEST {} REPLACED BY {}", previous, request);
                Latched::Replaced(previous)
            }
            None => {
                debug!("REQUEST {}", request);
                Latched::New
            }
        }
    }

    /// Take the next request
    ///
    /// Stores go before fetches.
    pub fn take(&mut self) -> Option<TransferRequest> {
        if let Some(sector) = self.store.take() {
            return Some(TransferRequest::Store { sector });
        }
        self.fetch
            .take()
            .map(|(sector, length)| TransferRequest::Fetch { sector, length })
    }

    /// Which kinds are waiting
    pub fn pending(&self) -> Pending {
        let mut pending = Pending::empty();
        pending.set(Pending::STORE, self.store.is_some());
        pending.set(Pending::FETCH, self.fetch.is_some());
        pending
    }

    /// Drop everything that's waiting
    pub fn clear(&mut self) {
        if !self.pending().is_empty() {
            debug!("REQUESTS CLEARED");
        }
        self.store = None;
        self.fetch = None;
    }

    /// How many requests were replaced before they were served
    pub fn replaced(&self) -> u32 {
        self.replaced
    }

    /// Wake `waker` on the next latch
    pub fn register(&mut self, waker: &Waker) {
        self.waiter.register(waker);
    }
}

/// Decode a raw SETUP packet
///
/// `setup` holds the eight SETUP bytes, first byte in the least significant
/// position. Returns `None` if `bmRequestType` is malformed.
pub fn decode_setup(setup: u64) -> Option<Request> {
    let [request_type, request, value_lo, value_hi, index_lo, index_hi, length_lo, length_hi] =
        setup.to_le_bytes();

    let direction = if request_type & 0x80 != 0 {
        UsbDirection::In
    } else {
        UsbDirection::Out
    };
    let recipient = match request_type & 0x1F {
        0 => Recipient::Device,
        1 => Recipient::Interface,
        2 => Recipient::Endpoint,
        3 => Recipient::Other,
        _ => return None,
    };
    let request_type = match (request_type >> 5) & 0b11 {
        0 => RequestType::Standard,
        1 => RequestType::Class,
        2 => RequestType::Vendor,
        _ => return None,
    };

    Some(Request {
        direction,
        request_type,
        recipient,
        request,
        value: u16::from_le_bytes([value_lo, value_hi]),
        index: u16::from_le_bytes([index_lo, index_hi]),
        length: u16::from_le_bytes([length_lo, length_hi]),
    })
}
