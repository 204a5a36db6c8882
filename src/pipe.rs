//! Bulk pipes
//!
//! A pipe is a bulk endpoint plus the DMA channel that moves its packets. The
//! producer pipe carries host data into the device (bulk OUT). The consumer
//! pipe carries device data to the host (bulk IN).
//!
//! [`PipeManager`] builds both pipes when the link comes up, and tears them
//! down when it goes away. Every build starts a new *generation*. Buffers are
//! leased from a generation, and can only be handed back to that same
//! generation.

use crate::{buffer::PipeBuffer, config::Config, Error};
use core::{
    task::{Context, Poll, Waker},
    time::Duration,
};
use embassy_sync::waitqueue::WakerRegistration;
use usb_device::endpoint::EndpointAddress;

/// USB link speed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Speed {
    /// Full speed; 64 byte bulk packets.
    Full,
    /// High speed; 512 byte bulk packets.
    High,
    /// SuperSpeed; 1024 byte bulk packets.
    Super,
}

impl Speed {
    /// The bulk max packet size for this speed
    pub const fn packet_size(self) -> u16 {
        match self {
            Speed::Full => 64,
            Speed::High => 512,
            Speed::Super => 1024,
        }
    }
}

/// Is the bulk link usable?
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum LinkState {
    /// No pipes.
    Idle,
    /// Both pipes are configured and open.
    Active,
}

/// Names one of the two pipes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Pipe {
    /// Bulk OUT to the CPU.
    Producer,
    /// CPU to bulk IN.
    Consumer,
}

/// Bulk endpoint configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct EndpointConfig {
    /// Max packet size, in bytes.
    pub max_packet_size: u16,
    /// Packets per burst. Only meaningful at SuperSpeed.
    pub burst: u8,
}

/// The endpoint controller couldn't apply a configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct EndpointError;

/// Errors reported by a [`DmaChannel`], or a [`DmaEngine`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum ChannelError {
    /// The channel is gone.
    Destroyed,
    /// The DMA engine reported an error.
    Failed,
}

/// Describes a channel for [`DmaEngine::create_channel`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct ChannelConfig {
    /// The bulk endpoint serviced by the channel.
    ///
    /// An OUT endpoint makes a producer channel; an IN endpoint makes a
    /// consumer channel.
    pub endpoint: EndpointAddress,
    /// Bytes per buffer.
    pub buffer_size: usize,
    /// Buffers in the channel.
    pub buffer_count: usize,
    /// The endpoint's max packet size.
    pub packet_size: u16,
}

/// Bulk endpoint control
///
/// Implementations configure the USB controller.
pub trait EndpointController {
    /// Configure `endpoint` as a bulk endpoint, or disable it when `config` is
    /// `None`.
    fn configure(
        &mut self,
        endpoint: EndpointAddress,
        config: Option<EndpointConfig>,
    ) -> Result<(), EndpointError>;

    /// Drop anything that's queued on `endpoint`.
    fn flush(&mut self, endpoint: EndpointAddress);

    /// Clear the endpoint's halt, and reset its data sequence.
    fn clear_halt(&mut self, endpoint: EndpointAddress);

    /// Block for `duration`.
    ///
    /// Runs without the bridge lock; the link reads as idle for the duration.
    /// The default implementation returns immediately.
    fn delay(duration: Duration) {
        let _ = duration;
    }
}

/// Creates DMA channels between bulk endpoints and memory
pub trait DmaEngine {
    /// The channel type
    type Channel: DmaChannel;

    /// Create a channel, and start it.
    fn create_channel(&mut self, config: &ChannelConfig) -> Result<Self::Channel, ChannelError>;
}

/// A DMA channel that cycles buffers between software and an endpoint
///
/// A producer channel fills buffers with received packets. Software takes a
/// full buffer with [`poll_buffer`](DmaChannel::poll_buffer), and hands it
/// back with [`discard`](DmaChannel::discard).
///
/// A consumer channel hands out empty buffers. Software fills a buffer, then
/// sends [`len()`](PipeBuffer::len) bytes with [`commit`](DmaChannel::commit).
/// Committing an empty buffer sends a zero length packet.
pub trait DmaChannel {
    /// Limit the bytes in one transfer. Zero means no limit.
    fn set_transfer_size(&mut self, size: usize) -> Result<(), ChannelError>;

    /// Take the next buffer from the channel.
    ///
    /// Implementations wake the context's waker when a buffer becomes
    /// available.
    fn poll_buffer(&mut self, cx: &mut Context<'_>) -> Poll<Result<PipeBuffer, ChannelError>>;

    /// Give a filled buffer to the endpoint.
    fn commit(&mut self, buffer: PipeBuffer) -> Result<(), ChannelError>;

    /// Return a buffer without sending it.
    fn discard(&mut self, buffer: PipeBuffer) -> Result<(), ChannelError>;

    /// Stop the channel, and release its buffers.
    fn destroy(self);
}

/// A buffer taken from a pipe
///
/// Hand the lease back to the [`PipeManager`] that issued it. Leases from an
/// older generation are refused.
pub struct Lease {
    buffer: PipeBuffer,
    pipe: Pipe,
    generation: u32,
}

impl Lease {
    /// The leased buffer
    pub fn buffer(&self) -> &PipeBuffer {
        &self.buffer
    }

    /// The leased buffer, for filling
    pub fn buffer_mut(&mut self) -> &mut PipeBuffer {
        &mut self.buffer
    }

    /// The pipe that issued the buffer
    pub fn pipe(&self) -> Pipe {
        self.pipe
    }

    /// The pipe generation that issued the buffer
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Owns the two bulk pipes, and the hardware behind them
pub struct PipeManager<U, D: DmaEngine> {
    controller: U,
    engine: D,
    config: Config,
    state: LinkState,
    speed: Speed,
    generation: u32,
    producer: Option<D::Channel>,
    consumer: Option<D::Channel>,
    waiter: WakerRegistration,
}

impl<U: EndpointController, D: DmaEngine> PipeManager<U, D> {
    /// Manage pipes using the endpoint `controller` and DMA `engine`
    pub const fn new(config: Config, controller: U, engine: D) -> Self {
        PipeManager {
            controller,
            engine,
            config,
            state: LinkState::Idle,
            speed: Speed::High,
            generation: 0,
            producer: None,
            consumer: None,
            waiter: WakerRegistration::new(),
        }
    }

    /// Returns the link state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Indicates if both pipes are open
    pub fn is_active(&self) -> bool {
        self.state == LinkState::Active
    }

    /// Indicates if leases from `generation` are still good
    pub fn is_current(&self, generation: u32) -> bool {
        self.is_active() && self.generation == generation
    }

    /// Returns the pipe generation
    ///
    /// The generation changes each time the pipes are built.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// The speed of the most recent [`start()`](PipeManager::start)
    pub fn speed(&self) -> Speed {
        self.speed
    }

    /// The bulk max packet size of the current pipes
    pub fn packet_size(&self) -> usize {
        self.speed.packet_size() as usize
    }

    /// Access the endpoint controller
    pub fn controller(&self) -> &U {
        &self.controller
    }

    /// Mutably access the endpoint controller
    pub fn controller_mut(&mut self) -> &mut U {
        &mut self.controller
    }

    /// Access the DMA engine
    pub fn engine(&self) -> &D {
        &self.engine
    }

    /// Mutably access the DMA engine
    pub fn engine_mut(&mut self) -> &mut D {
        &mut self.engine
    }

    /// Wake `waker` on the next start or stop
    pub fn register(&mut self, waker: &Waker) {
        self.waiter.register(waker);
    }

    /// Build both pipes for `speed`
    ///
    /// Tears down existing pipes first. On error, nothing is left open.
    pub fn start(&mut self, speed: Speed) -> Result<(), Error> {
        self.stop();

        let packet_size = speed.packet_size();
        debug!("PIPE START {} PACKET {=u16}", speed, packet_size);

        let (producer, consumer) = match self.open(packet_size) {
            Ok(channels) => channels,
            Err(err) => {
                self.disable_endpoints();
                return Err(err);
            }
        };

        self.speed = speed;
        self.producer = Some(producer);
        self.consumer = Some(consumer);
        self.generation = self.generation.wrapping_add(1);
        self.state = LinkState::Active;
        self.waiter.wake();

        info!("PIPE ACTIVE GEN {=u32}", self.generation);
        Ok(())
    }

    fn open(&mut self, packet_size: u16) -> Result<(D::Channel, D::Channel), Error> {
        let endpoints = [self.config.producer(), self.config.consumer()];

        for endpoint in endpoints {
            let config = EndpointConfig {
                max_packet_size: packet_size,
                burst: 1,
            };
            self.controller
                .configure(endpoint, Some(config))
                .map_err(|_| {
                    warn!("PIPE EP{=u8} CONFIGURE FAILED", endpoint.index() as u8);
                    Error::Configuration
                })?;
        }
        for endpoint in endpoints {
            self.controller.flush(endpoint);
        }

        let mut producer = self.channel(self.config.producer(), packet_size)?;
        let mut consumer = match self.channel(self.config.consumer(), packet_size) {
            Ok(channel) => channel,
            Err(err) => {
                producer.destroy();
                return Err(err);
            }
        };

        let unbounded = producer
            .set_transfer_size(0)
            .and_then(|_| consumer.set_transfer_size(0));
        if unbounded.is_err() {
            warn!("PIPE TRANSFER SIZE FAILED");
            producer.destroy();
            consumer.destroy();
            return Err(Error::Configuration);
        }

        Ok((producer, consumer))
    }

    fn channel(&mut self, endpoint: EndpointAddress, packet_size: u16) -> Result<D::Channel, Error> {
        let config = ChannelConfig {
            endpoint,
            buffer_size: self.config.dma_buffer_size(),
            buffer_count: self.config.dma_buffer_count(),
            packet_size,
        };
        self.engine.create_channel(&config).map_err(|_| {
            warn!("PIPE EP{=u8} CHANNEL FAILED", endpoint.index() as u8);
            Error::Configuration
        })
    }

    fn disable_endpoints(&mut self) {
        for endpoint in [self.config.producer(), self.config.consumer()] {
            // Disabling only fails if the endpoint was never enabled.
            let _ = self.controller.configure(endpoint, None);
        }
    }

    /// Tear down both pipes
    ///
    /// Anyone waiting on a pipe is woken, and sees [`Error::Inactive`].
    /// Does nothing if the pipes are already down.
    pub fn stop(&mut self) {
        if self.state == LinkState::Idle {
            return;
        }
        self.state = LinkState::Idle;

        if let Some(channel) = self.producer.take() {
            channel.destroy();
        }
        if let Some(channel) = self.consumer.take() {
            channel.destroy();
        }
        for endpoint in [self.config.producer(), self.config.consumer()] {
            self.controller.flush(endpoint);
        }
        self.disable_endpoints();
        self.waiter.wake();

        info!("PIPE IDLE GEN {=u32}", self.generation);
    }

    /// Poll for a buffer from `pipe`
    ///
    /// Returns [`Error::Inactive`] if the pipes are down, or if they were
    /// rebuilt since `generation`.
    pub fn poll_acquire(
        &mut self,
        pipe: Pipe,
        generation: u32,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Lease, Error>> {
        if !self.is_current(generation) {
            return Poll::Ready(Err(Error::Inactive));
        }
        let channel = match pipe {
            Pipe::Producer => self.producer.as_mut(),
            Pipe::Consumer => self.consumer.as_mut(),
        };
        let Some(channel) = channel else {
            return Poll::Ready(Err(Error::Inactive));
        };

        self.waiter.register(cx.waker());
        channel.poll_buffer(cx).map(|result| {
            result
                .map(|buffer| Lease {
                    buffer,
                    pipe,
                    generation,
                })
                .map_err(Error::from)
        })
    }

    /// Send the leased buffer
    pub fn commit(&mut self, lease: Lease) -> Result<(), Error> {
        let pipe = lease.pipe;
        let buffer = self.release(lease)?;
        trace!("PIPE {} COMMIT {=usize}", pipe, buffer.len());
        self.channel_mut(pipe)?.commit(buffer).map_err(Error::from)
    }

    /// Return the leased buffer without sending it
    pub fn discard(&mut self, lease: Lease) -> Result<(), Error> {
        let pipe = lease.pipe;
        let buffer = self.release(lease)?;
        trace!("PIPE {} DISCARD", pipe);
        self.channel_mut(pipe)?.discard(buffer).map_err(Error::from)
    }

    fn release(&self, lease: Lease) -> Result<PipeBuffer, Error> {
        if self.is_current(lease.generation) {
            Ok(lease.buffer)
        } else {
            debug!(
                "PIPE STALE LEASE GEN {=u32} (NOW {=u32})",
                lease.generation, self.generation
            );
            Err(Error::Inactive)
        }
    }

    fn channel_mut(&mut self, pipe: Pipe) -> Result<&mut D::Channel, Error> {
        match pipe {
            Pipe::Producer => self.producer.as_mut(),
            Pipe::Consumer => self.consumer.as_mut(),
        }
        .ok_or(Error::Inactive)
    }
}
