//! A USB bulk to SPI FRAM sector bridge
//!
//! `usbd-fram` lets a USB host store and fetch fixed-size sectors of an SPI
//! FRAM. The host names a sector with a vendor control request, then moves the
//! data over a pair of bulk endpoints:
//!
//! - `STORE` (`bRequest` 0xC2, `wIndex` = sector) writes the next bulk OUT
//!   transfer to the sector.
//! - `FETCH` (`bRequest` 0xC3, `wIndex` = sector, `wValue` = length) sends
//!   `length` bytes of the sector on bulk IN. A zero length packet follows
//!   when `length` is a multiple of the max packet size.
//!
//! The crate is split across two execution contexts that share a [`Bridge`]:
//!
//! - The control context reports link changes with [`Bridge::on_event`], and
//!   decides SETUP requests with [`Bridge::handle_request`]. [`FramClass`]
//!   does this for a [`usb-device`] stack.
//! - A [`Dispatcher`] task waits for requests, and moves each one between a
//!   bulk pipe and the FRAM.
//!
//! To interface the library, you implement three platform traits:
//!
//! - [`EndpointController`](pipe::EndpointController) configures bulk
//!   endpoints.
//! - [`DmaEngine`](pipe::DmaEngine) creates the DMA channels that move bulk
//!   packets to and from [`PipeBuffer`](buffer::PipeBuffer)s.
//! - [`SerialBus`](fram::SerialBus) talks to the FRAM.
//!
//! [`usb-device`]: https://crates.io/crates/usb-device

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod log;

mod bridge;
mod dispatcher;
mod error;
mod link;

pub mod buffer;
pub mod class;
pub mod command;
pub mod config;
pub mod fram;
pub mod geometry;
pub mod pipe;
pub mod request;

#[cfg(test)]
mod testing;

pub use bridge::Bridge;
pub use class::FramClass;
pub use config::Config;
pub use dispatcher::{Dispatcher, DispatcherState, Outcome};
pub use error::{Error, Fault};
pub use link::{Disposition, LinkEvent};
pub use pipe::{LinkState, Speed};
