//! A `usb-device` class for the bridge
//!
//! [`FramClass`] describes one vendor interface with the two bulk endpoints,
//! and forwards control requests and bus resets to a [`Bridge`]. The DMA
//! engine moves the bulk data; the class never reads or writes the bulk
//! endpoints.
//!
//! `usb-device` doesn't report the configured state to classes, so tell the
//! class about it after each poll:
//!
//! ```ignore
//! usb_device.poll(&mut [&mut class]);
//! class
//!     .update(usb_device.state(), Speed::High)
//!     .unwrap_or_else(|fault| fault.halt());
//! ```

use crate::{
    bridge::Bridge,
    link::{Disposition, LinkEvent},
    pipe::{DmaEngine, EndpointController, Speed},
    Fault,
};
use embassy_sync::blocking_mutex::raw::RawMutex;
use usb_device::{
    bus::{InterfaceNumber, UsbBus, UsbBusAllocator},
    class::{ControlIn, ControlOut, UsbClass},
    control::{Recipient, Request},
    descriptor::DescriptorWriter,
    device::UsbDeviceState,
    endpoint::{EndpointIn, EndpointOut, EndpointType},
};

/// Vendor specific interface class
const VENDOR_CLASS: u8 = 0xFF;

/// The bridge's USB class
pub struct FramClass<'a, B: UsbBus, M: RawMutex, U, D: DmaEngine> {
    bridge: &'a Bridge<M, U, D>,
    interface: InterfaceNumber,
    producer: EndpointOut<'a, B>,
    consumer: EndpointIn<'a, B>,
    configured: bool,
}

impl<'a, B, M, U, D> FramClass<'a, B, M, U, D>
where
    B: UsbBus,
    M: RawMutex,
    U: EndpointController,
    D: DmaEngine,
{
    /// Allocate the interface, and the bridge's bulk endpoints
    ///
    /// `max_packet_size` is the packet size advertised in the endpoint
    /// descriptors.
    pub fn new(
        alloc: &'a UsbBusAllocator<B>,
        bridge: &'a Bridge<M, U, D>,
        max_packet_size: u16,
    ) -> usb_device::Result<Self> {
        let config = bridge.config();
        Ok(FramClass {
            bridge,
            interface: alloc.interface(),
            producer: alloc.alloc(
                Some(config.producer()),
                EndpointType::Bulk,
                max_packet_size,
                0,
            )?,
            consumer: alloc.alloc(
                Some(config.consumer()),
                EndpointType::Bulk,
                max_packet_size,
                0,
            )?,
            configured: false,
        })
    }

    /// Returns the interface number
    pub fn interface(&self) -> InterfaceNumber {
        self.interface
    }

    /// Returns the bridge
    pub fn bridge(&self) -> &'a Bridge<M, U, D> {
        self.bridge
    }

    /// Track the device state
    ///
    /// Entering the configured state starts the pipes at `speed`. Dropping
    /// back to the default or addressed state stops them. Suspend changes
    /// nothing.
    pub fn update(&mut self, state: UsbDeviceState, speed: Speed) -> Result<(), Fault> {
        match state {
            UsbDeviceState::Configured if !self.configured => {
                self.configured = true;
                self.bridge.on_event(LinkEvent::Configured(speed))
            }
            UsbDeviceState::Default | UsbDeviceState::Addressed if self.configured => {
                self.configured = false;
                self.bridge.on_event(LinkEvent::Reset)
            }
            _ => Ok(()),
        }
    }

    fn owns(&self, request: &Request) -> bool {
        match request.recipient {
            Recipient::Interface => request.index as u8 == u8::from(self.interface),
            _ => true,
        }
    }

    fn decide(&self, request: &Request) -> Disposition {
        if !self.owns(request) {
            return Disposition::Ignored;
        }
        self.bridge
            .handle_request(request)
            .unwrap_or_else(|fault| fault.halt())
    }
}

impl<B, M, U, D> UsbClass<B> for FramClass<'_, B, M, U, D>
where
    B: UsbBus,
    M: RawMutex,
    U: EndpointController,
    D: DmaEngine,
{
    fn get_configuration_descriptors(
        &self,
        writer: &mut DescriptorWriter,
    ) -> usb_device::Result<()> {
        writer.interface(self.interface, VENDOR_CLASS, 0, 0)?;
        writer.endpoint(&self.producer)?;
        writer.endpoint(&self.consumer)?;
        Ok(())
    }

    fn reset(&mut self) {
        self.configured = false;
        if let Err(fault) = self.bridge.on_event(LinkEvent::Reset) {
            fault.halt();
        }
    }

    fn control_out(&mut self, xfer: ControlOut<B>) {
        match self.decide(xfer.request()) {
            Disposition::Accepted => {
                xfer.accept().ok();
            }
            Disposition::Rejected => {
                xfer.reject().ok();
            }
            Disposition::Ignored => {}
        }
    }

    fn control_in(&mut self, xfer: ControlIn<B>) {
        match self.decide(xfer.request()) {
            Disposition::Accepted => {
                xfer.accept_with(&[]).ok();
            }
            Disposition::Rejected => {
                xfer.reject().ok();
            }
            Disposition::Ignored => {}
        }
    }
}
