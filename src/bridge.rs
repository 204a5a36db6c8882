//! The shared bridge state
//!
//! A [`Bridge`] is shared by the control handler, which runs in the USB
//! interrupt or polling context, and the [`Dispatcher`](crate::Dispatcher),
//! which runs as an async task. Keep it in a `static`:
//!
//! ```no_run
//! use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
//! use usbd_fram::{Bridge, Config};
//! # use usbd_fram::pipe::*;
//! # use usbd_fram::buffer::PipeBuffer;
//! # use core::task::{Context, Poll};
//! # struct Controller;
//! # impl EndpointController for Controller {
//! #   fn configure(&mut self, _: usb_device::endpoint::EndpointAddress, _: Option<EndpointConfig>) -> Result<(), EndpointError> { Ok(()) }
//! #   fn flush(&mut self, _: usb_device::endpoint::EndpointAddress) {}
//! #   fn clear_halt(&mut self, _: usb_device::endpoint::EndpointAddress) {}
//! # }
//! # struct Engine;
//! # struct Channel;
//! # impl DmaChannel for Channel {
//! #   fn set_transfer_size(&mut self, _: usize) -> Result<(), ChannelError> { Ok(()) }
//! #   fn poll_buffer(&mut self, _: &mut Context<'_>) -> Poll<Result<PipeBuffer, ChannelError>> { Poll::Pending }
//! #   fn commit(&mut self, _: PipeBuffer) -> Result<(), ChannelError> { Ok(()) }
//! #   fn discard(&mut self, _: PipeBuffer) -> Result<(), ChannelError> { Ok(()) }
//! #   fn destroy(self) {}
//! # }
//! # impl DmaEngine for Engine {
//! #   type Channel = Channel;
//! #   fn create_channel(&mut self, _: &ChannelConfig) -> Result<Channel, ChannelError> { Ok(Channel) }
//! # }
//!
//! static BRIDGE: Bridge<CriticalSectionRawMutex, Controller, Engine> =
//!     Bridge::new(Config::new(), Controller, Engine);
//! ```

use crate::{
    config::Config,
    pipe::{DmaEngine, EndpointController, LinkState, PipeManager},
    request::{Pending, RequestSlots, TransferRequest},
};
use core::{
    cell::RefCell,
    task::{Context, Poll},
};
use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex};

pub(crate) struct State<U, D: DmaEngine> {
    pub(crate) pipes: PipeManager<U, D>,
    pub(crate) requests: RequestSlots,
}

/// Pipes, latched requests, and the configuration behind them
///
/// `M` is the raw mutex that guards the state. Use a mutex that excludes the
/// context that calls into the control handler.
pub struct Bridge<M: RawMutex, U, D: DmaEngine> {
    config: Config,
    state: Mutex<M, RefCell<State<U, D>>>,
}

impl<M: RawMutex, U: EndpointController, D: DmaEngine> Bridge<M, U, D> {
    /// Create a bridge that uses the endpoint `controller` and DMA `engine`
    ///
    /// The link starts idle.
    pub const fn new(config: Config, controller: U, engine: D) -> Self {
        Bridge {
            config,
            state: Mutex::new(RefCell::new(State {
                pipes: PipeManager::new(config, controller, engine),
                requests: RequestSlots::new(),
            })),
        }
    }

    /// Returns the bridge configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn with_state<R>(&self, func: impl FnOnce(&mut State<U, D>) -> R) -> R {
        self.state.lock(|state| func(&mut state.borrow_mut()))
    }

    /// Returns the link state
    pub fn link_state(&self) -> LinkState {
        self.with_state(|state| state.pipes.state())
    }

    /// Returns the pipe generation
    pub fn generation(&self) -> u32 {
        self.with_state(|state| state.pipes.generation())
    }

    /// Indicates if the link is active, and still on `generation`
    pub fn is_current(&self, generation: u32) -> bool {
        self.with_state(|state| state.pipes.is_current(generation))
    }

    /// Returns the requests that are waiting for the dispatcher
    pub fn pending(&self) -> Pending {
        self.with_state(|state| state.requests.pending())
    }

    /// How many requests were replaced before the dispatcher served them
    pub fn replaced_requests(&self) -> u32 {
        self.with_state(|state| state.requests.replaced())
    }

    /// Access the pipes, and the hardware behind them
    ///
    /// Don't hold onto the pipes any longer than necessary; the control
    /// handler waits for the same lock.
    pub fn with_pipes<R>(&self, func: impl FnOnce(&mut PipeManager<U, D>) -> R) -> R {
        self.with_state(|state| func(&mut state.pipes))
    }

    /// Take the next request once the link is active
    ///
    /// Also returns the pipe generation that the request should run on.
    pub(crate) fn poll_request(&self, cx: &mut Context<'_>) -> Poll<(TransferRequest, u32)> {
        self.with_state(|state| {
            if state.pipes.is_active() {
                if let Some(request) = state.requests.take() {
                    return Poll::Ready((request, state.pipes.generation()));
                }
            }
            state.pipes.register(cx.waker());
            state.requests.register(cx.waker());
            Poll::Pending
        })
    }
}
