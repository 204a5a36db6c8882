//! Serves latched requests
//!
//! The [`Dispatcher`] waits for a request, moves one buffer between a pipe
//! and the FRAM, then waits again. Run it as its own task:
//!
//! ```ignore
//! #[embassy_executor::task]
//! async fn dispatch(mut dispatcher: Dispatcher<'static, Mutex, Controller, Engine, Spi>) -> ! {
//!     dispatcher.run().await.halt()
//! }
//! ```

use crate::{
    bridge::Bridge,
    fram::{Fram, SerialBus},
    geometry::SectorAddress,
    pipe::{DmaEngine, EndpointController, Lease, LinkState, Pipe},
    request::TransferRequest,
    Error, Fault,
};
use core::future::poll_fn;
use embassy_sync::blocking_mutex::raw::RawMutex;

/// Dispatcher progress
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum DispatcherState {
    /// Waiting for the link.
    Idle,
    /// Waiting for a request.
    WaitingForSignal,
    /// Moving data.
    Serving,
}

/// The result of one request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Outcome {
    /// Bulk OUT data was written to a sector.
    Stored {
        /// Sector index
        sector: u16,
        /// Bytes written
        length: usize,
    },
    /// Sector data was sent on bulk IN.
    Fetched {
        /// Sector index
        sector: u16,
        /// Bytes sent
        length: usize,
        /// A zero length packet ended the transfer.
        zlp: bool,
    },
    /// The link went down, or the pipes restarted, during the request.
    Aborted,
}

/// Moves data between the bulk pipes and the FRAM
pub struct Dispatcher<'a, M: RawMutex, U, D: DmaEngine, B> {
    bridge: &'a Bridge<M, U, D>,
    fram: Fram<B>,
    state: DispatcherState,
}

impl<'a, M, U, D, B> Dispatcher<'a, M, U, D, B>
where
    M: RawMutex,
    U: EndpointController,
    D: DmaEngine,
    B: SerialBus,
{
    /// Serve requests from `bridge`, using `bus` to reach the FRAM
    pub fn new(bridge: &'a Bridge<M, U, D>, bus: B) -> Self {
        let timeout = bridge.config().fram_timeout();
        Dispatcher {
            bridge,
            fram: Fram::new(bus, timeout),
            state: DispatcherState::Idle,
        }
    }

    /// Returns the dispatcher state
    pub fn state(&self) -> DispatcherState {
        self.state
    }

    /// Access the FRAM
    pub fn fram(&self) -> &Fram<B> {
        &self.fram
    }

    /// Mutably access the FRAM
    pub fn fram_mut(&mut self) -> &mut Fram<B> {
        &mut self.fram
    }

    /// Serve requests until something fails
    pub async fn run(&mut self) -> Fault {
        loop {
            match self.serve_next().await {
                Ok(_outcome) => {
                    trace!("DISPATCH {}", _outcome);
                }
                Err(fault) => return fault,
            }
        }
    }

    /// Wait for the next request, and serve it
    ///
    /// A failure that's explained by the link going down, or by a pipe
    /// restart, is [`Outcome::Aborted`]. Any other failure is a fault.
    pub async fn serve_next(&mut self) -> Result<Outcome, Fault> {
        let (request, generation) = {
            let bridge = self.bridge;
            let state = &mut self.state;
            poll_fn(|cx| {
                let poll = bridge.poll_request(cx);
                if poll.is_pending() {
                    *state = if bridge.link_state() == LinkState::Active {
                        DispatcherState::WaitingForSignal
                    } else {
                        DispatcherState::Idle
                    };
                }
                poll
            })
            .await
        };

        self.state = DispatcherState::Serving;
        let result = match request {
            TransferRequest::Store { sector } => self.store(sector, generation).await,
            TransferRequest::Fetch { sector, length } => {
                self.fetch(sector, length, generation).await
            }
        };

        match result {
            Ok(outcome) => {
                self.state = DispatcherState::WaitingForSignal;
                Ok(outcome)
            }
            Err(err) if self.bridge.is_current(generation) => {
                self.state = DispatcherState::Idle;
                Err(Fault::new(err))
            }
            Err(_err) => {
                warn!("DISPATCH ABORTED {}", _err);
                self.state = match self.bridge.link_state() {
                    LinkState::Active => DispatcherState::WaitingForSignal,
                    LinkState::Idle => DispatcherState::Idle,
                };
                Ok(Outcome::Aborted)
            }
        }
    }

    async fn acquire(&self, pipe: Pipe, generation: u32) -> Result<Lease, Error> {
        poll_fn(|cx| {
            self.bridge
                .with_pipes(|pipes| pipes.poll_acquire(pipe, generation, cx))
        })
        .await
    }

    async fn store(&mut self, sector: SectorAddress, generation: u32) -> Result<Outcome, Error> {
        let lease = self.acquire(Pipe::Producer, generation).await?;
        let length = lease.buffer().len();

        let written = self.fram.write(sector, lease.buffer().as_slice());
        // The buffer goes back to the pipe, even if the write failed.
        let released = self.bridge.with_pipes(|pipes| pipes.discard(lease));
        written?;
        released?;

        Ok(Outcome::Stored {
            sector: sector.index(),
            length,
        })
    }

    async fn fetch(
        &mut self,
        sector: SectorAddress,
        length: usize,
        generation: u32,
    ) -> Result<Outcome, Error> {
        let mut lease = self.acquire(Pipe::Consumer, generation).await?;
        if length > lease.buffer().capacity() {
            let _ = self.bridge.with_pipes(|pipes| pipes.discard(lease));
            return Err(Error::OutOfRange);
        }

        lease.buffer_mut().set_len(length);
        if let Err(err) = self.fram.read(sector, lease.buffer_mut().as_mut_slice()) {
            let _ = self.bridge.with_pipes(|pipes| pipes.discard(lease));
            return Err(err);
        }
        let packet_size = self.bridge.with_pipes(|pipes| {
            let packet_size = pipes.packet_size();
            pipes.commit(lease).map(|_| packet_size)
        })?;

        let zlp = length > 0 && length % packet_size == 0;
        if zlp {
            let mut lease = self.acquire(Pipe::Consumer, generation).await?;
            lease.buffer_mut().set_len(0);
            self.bridge.with_pipes(|pipes| pipes.commit(lease))?;
        }

        Ok(Outcome::Fetched {
            sector: sector.index(),
            length,
            zlp,
        })
    }
}
