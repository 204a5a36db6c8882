//! Link lifecycle and control requests
//!
//! The USB stack reports link changes with [`Bridge::on_event`], and hands
//! SETUP requests to [`Bridge::handle_request`]. Both run in the control
//! context, and never wait on the dispatcher.

use crate::{
    bridge::Bridge,
    pipe::{DmaEngine, EndpointController, LinkState, Speed},
    request::TransferRequest,
    Error, Fault,
};
use embassy_sync::blocking_mutex::raw::RawMutex;
use usb_device::{
    control::{Recipient, Request, RequestType},
    endpoint::EndpointAddress,
};

/// Link changes reported by the USB stack
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum LinkEvent {
    /// The host selected a configuration, and the link runs at this speed.
    Configured(Speed),
    /// Bus reset.
    Reset,
    /// The cable is gone.
    Disconnected,
    /// The host cleared a halt on this endpoint.
    HaltCleared(EndpointAddress),
}

/// What the control handler should do with a request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Disposition {
    /// Complete the status stage.
    Accepted,
    /// Stall the request.
    Rejected,
    /// Not ours. If nothing else takes it, the device stack stalls it.
    Ignored,
}

impl<M: RawMutex, U: EndpointController, D: DmaEngine> Bridge<M, U, D> {
    /// React to a link change
    ///
    /// Configuration, reset, and disconnect drop any requests that haven't
    /// been served.
    pub fn on_event(&self, event: LinkEvent) -> Result<(), Fault> {
        debug!("LINK {}", event);
        match event {
            LinkEvent::Configured(speed) => self
                .with_state(|state| {
                    state.requests.clear();
                    state.pipes.stop();
                    state.pipes.start(speed)
                })
                .map_err(Fault::new),
            LinkEvent::Reset | LinkEvent::Disconnected => {
                self.with_state(|state| {
                    state.requests.clear();
                    state.pipes.stop();
                });
                Ok(())
            }
            LinkEvent::HaltCleared(endpoint) => {
                self.restart(endpoint).map(|_| ()).map_err(Fault::new)
            }
        }
    }

    /// Rebuild the pipes after a halt clear on `endpoint`
    ///
    /// Returns `false` if `endpoint` isn't a bulk endpoint, or if the link
    /// isn't active.
    fn restart(&self, endpoint: EndpointAddress) -> Result<bool, Error> {
        if !self.config().is_managed(endpoint) {
            return Ok(false);
        }

        let speed = self.with_state(|state| {
            let speed = state.pipes.is_active().then(|| state.pipes.speed());
            state.pipes.stop();
            speed
        });
        let Some(speed) = speed else {
            return Ok(false);
        };

        info!("LINK RESTART EP{=u8}", endpoint.index() as u8);
        let settle = self.config().settle_time();
        U::delay(settle);

        self.with_state(|state| {
            state.pipes.start(speed)?;
            state.pipes.controller_mut().clear_halt(endpoint);
            Ok(true)
        })
    }

    /// Decide a SETUP request
    ///
    /// Returns a fault if the request required a pipe restart, and the restart
    /// failed.
    pub fn handle_request(&self, request: &Request) -> Result<Disposition, Fault> {
        match (request.request_type, request.recipient) {
            (RequestType::Vendor, Recipient::Device) => Ok(self.handle_vendor(request)),
            (RequestType::Standard, Recipient::Interface)
                if (request.request == Request::SET_FEATURE
                    || request.request == Request::CLEAR_FEATURE)
                    && request.value == 0 =>
            {
                if self.link_state() == LinkState::Active {
                    Ok(Disposition::Accepted)
                } else {
                    Ok(Disposition::Rejected)
                }
            }
            (RequestType::Standard, Recipient::Endpoint)
                if request.request == Request::CLEAR_FEATURE
                    && request.value == Request::FEATURE_ENDPOINT_HALT =>
            {
                let Ok(address) = u8::try_from(request.index) else {
                    return Ok(Disposition::Ignored);
                };
                match self.restart(EndpointAddress::from(address)) {
                    Ok(true) => Ok(Disposition::Accepted),
                    Ok(false) => Ok(Disposition::Ignored),
                    Err(err) => Err(Fault::new(err)),
                }
            }
            _ => Ok(Disposition::Ignored),
        }
    }

    fn handle_vendor(&self, request: &Request) -> Disposition {
        let config = self.config();
        let geometry = config.geometry();

        let transfer = if request.request == config.store_request() {
            geometry
                .sector(request.index)
                .map(|sector| TransferRequest::Store { sector })
        } else if request.request == config.fetch_request() {
            let length = request.value as usize;
            geometry.sector(request.index).and_then(|sector| {
                if length <= config.dma_buffer_size() {
                    Ok(TransferRequest::Fetch { sector, length })
                } else {
                    Err(Error::OutOfRange)
                }
            })
        } else {
            return Disposition::Ignored;
        };

        let Ok(transfer) = transfer else {
            warn!(
                "REQUEST {=u8:#X} OUT OF RANGE INDEX {=u16} VALUE {=u16}",
                request.request, request.index, request.value
            );
            return Disposition::Ignored;
        };

        self.with_state(|state| state.requests.latch(transfer));
        Disposition::Accepted
    }

    /// Approve a request to enter a low power link state
    ///
    /// Always approved; the pipes survive the transition.
    pub fn approve_power_transition(&self) -> bool {
        true
    }
}
