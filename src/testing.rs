//! Test doubles for the platform seams
//!
//! A [`Harness`] owns a [`Bridge`] wired to a recording endpoint controller
//! and a DMA engine whose far side is a simulated host. [`MockBus`] emulates
//! an SPI FRAM.

use crate::{
    buffer::{Allocator, PipeBuffer},
    bridge::Bridge,
    dispatcher::Dispatcher,
    fram::{BusError, SerialBus},
    pipe::{
        ChannelConfig, ChannelError, DmaChannel, DmaEngine, EndpointConfig, EndpointController,
        EndpointError,
    },
    Config,
};
use core::{
    cell::{RefCell, RefMut},
    sync::atomic::{AtomicUsize, Ordering},
    task::{Context, Poll, Waker},
    time::Duration,
};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use futures::task::ArcWake;
use std::{boxed::Box, collections::VecDeque, rc::Rc, sync::Arc, vec, vec::Vec};
use usb_device::{endpoint::EndpointAddress, UsbDirection};

/// Something the controller or DMA engine was asked to do
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Configure(EndpointAddress, Option<EndpointConfig>),
    Flush(EndpointAddress),
    ClearHalt(EndpointAddress),
    Delay(Duration),
    Create(ChannelConfig),
    TransferSize(EndpointAddress, usize),
    Commit(EndpointAddress, usize),
    Discard(EndpointAddress, usize),
    Destroy(EndpointAddress),
}

/// The host side of the bulk pipes, and the failure switches
#[derive(Default)]
pub struct Host {
    ops: Vec<Op>,
    outbound: VecDeque<Vec<u8>>,
    in_packets: Vec<Vec<u8>>,
    producer: Option<Waker>,
    pub fail_configure: bool,
    /// Number of channels created before the next creation fails.
    pub fail_create: Option<usize>,
    pub fail_transfer_size: bool,
    /// Runs during the next controller delay.
    pub on_delay: Option<Box<dyn FnOnce()>>,
}

type Shared = Rc<RefCell<Host>>;

std::thread_local! {
    /// The host of the newest harness on this thread.
    ///
    /// `delay` has no receiver, so the controller finds its host here.
    static DELAY_HOST: RefCell<Option<Shared>> = const { RefCell::new(None) };
}

pub struct MockController {
    host: Shared,
}

impl EndpointController for MockController {
    fn configure(
        &mut self,
        endpoint: EndpointAddress,
        config: Option<EndpointConfig>,
    ) -> Result<(), EndpointError> {
        let mut host = self.host.borrow_mut();
        if host.fail_configure {
            return Err(EndpointError);
        }
        host.ops.push(Op::Configure(endpoint, config));
        Ok(())
    }

    fn flush(&mut self, endpoint: EndpointAddress) {
        self.host.borrow_mut().ops.push(Op::Flush(endpoint));
    }

    fn clear_halt(&mut self, endpoint: EndpointAddress) {
        self.host.borrow_mut().ops.push(Op::ClearHalt(endpoint));
    }

    fn delay(duration: Duration) {
        let Some(host) = DELAY_HOST.with(|host| host.borrow().clone()) else {
            return;
        };
        let hook = {
            let mut host = host.borrow_mut();
            host.ops.push(Op::Delay(duration));
            host.on_delay.take()
        };
        if let Some(hook) = hook {
            hook();
        }
    }
}

pub struct MockEngine {
    host: Shared,
}

impl DmaEngine for MockEngine {
    type Channel = MockChannel;

    fn create_channel(&mut self, config: &ChannelConfig) -> Result<MockChannel, ChannelError> {
        let mut host = self.host.borrow_mut();
        match host.fail_create {
            Some(0) => {
                host.fail_create = None;
                return Err(ChannelError::Failed);
            }
            Some(remaining) => host.fail_create = Some(remaining - 1),
            None => {}
        }
        host.ops.push(Op::Create(*config));

        // Room to align each buffer.
        let size = (config.buffer_size + 4) * config.buffer_count;
        let memory: &'static mut [u8] = Box::leak(vec![0; size].into_boxed_slice());
        let mut allocator = Allocator::from_static(memory);
        let free = (0..config.buffer_count)
            .map(|_| allocator.allocate(config.buffer_size).unwrap())
            .collect();

        Ok(MockChannel {
            host: Rc::clone(&self.host),
            config: *config,
            free,
        })
    }
}

pub struct MockChannel {
    host: Shared,
    config: ChannelConfig,
    free: Vec<PipeBuffer>,
}

impl MockChannel {
    fn endpoint(&self) -> EndpointAddress {
        self.config.endpoint
    }
}

impl DmaChannel for MockChannel {
    fn set_transfer_size(&mut self, size: usize) -> Result<(), ChannelError> {
        let mut host = self.host.borrow_mut();
        if host.fail_transfer_size {
            return Err(ChannelError::Failed);
        }
        host.ops.push(Op::TransferSize(self.endpoint(), size));
        Ok(())
    }

    fn poll_buffer(&mut self, cx: &mut Context<'_>) -> Poll<Result<PipeBuffer, ChannelError>> {
        let mut host = self.host.borrow_mut();
        match self.endpoint().direction() {
            UsbDirection::In => match self.free.pop() {
                Some(mut buffer) => {
                    buffer.set_len(0);
                    Poll::Ready(Ok(buffer))
                }
                None => Poll::Pending,
            },
            UsbDirection::Out => {
                if self.free.is_empty() || host.outbound.is_empty() {
                    host.producer = Some(cx.waker().clone());
                    return Poll::Pending;
                }
                let (Some(mut buffer), Some(data)) = (self.free.pop(), host.outbound.pop_front())
                else {
                    unreachable!()
                };
                let len = data.len().min(buffer.capacity());
                buffer.set_len(len);
                buffer.as_mut_slice().copy_from_slice(&data[..len]);
                Poll::Ready(Ok(buffer))
            }
        }
    }

    fn commit(&mut self, buffer: PipeBuffer) -> Result<(), ChannelError> {
        let mut host = self.host.borrow_mut();
        host.ops.push(Op::Commit(self.endpoint(), buffer.len()));
        if buffer.is_empty() {
            host.in_packets.push(Vec::new());
        } else {
            let packet_size = self.config.packet_size as usize;
            for packet in buffer.as_slice().chunks(packet_size) {
                host.in_packets.push(packet.to_vec());
            }
        }
        self.free.push(buffer);
        Ok(())
    }

    fn discard(&mut self, buffer: PipeBuffer) -> Result<(), ChannelError> {
        self.host
            .borrow_mut()
            .ops
            .push(Op::Discard(self.endpoint(), buffer.len()));
        self.free.push(buffer);
        Ok(())
    }

    fn destroy(self) {
        let mut host = self.host.borrow_mut();
        host.ops.push(Op::Destroy(self.config.endpoint));
        if self.config.endpoint.direction() == UsbDirection::Out {
            if let Some(waker) = host.producer.take() {
                waker.wake();
            }
        }
    }
}

pub type MockBridge = Bridge<NoopRawMutex, MockController, MockEngine>;

/// A bridge, plus the simulated host behind it
pub struct Harness {
    host: Shared,
    bridge: Rc<MockBridge>,
}

impl Harness {
    pub fn new() -> Self {
        let host = Shared::default();
        DELAY_HOST.with(|current| *current.borrow_mut() = Some(Rc::clone(&host)));
        let bridge = Rc::new(Bridge::new(
            Config::new(),
            MockController {
                host: Rc::clone(&host),
            },
            MockEngine {
                host: Rc::clone(&host),
            },
        ));
        Harness { host, bridge }
    }

    pub fn bridge(&self) -> &MockBridge {
        &self.bridge
    }

    /// The bridge, for hooks that outlive a borrow of the harness
    pub fn shared_bridge(&self) -> Rc<MockBridge> {
        Rc::clone(&self.bridge)
    }

    pub fn dispatcher(&self) -> Dispatcher<'_, NoopRawMutex, MockController, MockEngine, MockBus> {
        Dispatcher::new(self.bridge(), MockBus::new())
    }

    /// Another controller on the same host
    pub fn controller(&self) -> MockController {
        MockController {
            host: Rc::clone(&self.host),
        }
    }

    /// Another engine on the same host
    pub fn engine(&self) -> MockEngine {
        MockEngine {
            host: Rc::clone(&self.host),
        }
    }

    pub fn host(&self) -> RefMut<'_, Host> {
        self.host.borrow_mut()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.host.borrow().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.host.borrow_mut().ops.clear();
    }

    pub fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
        self.host.borrow().ops.iter().filter(|op| pred(op)).count()
    }

    /// Queue one bulk OUT transfer from the host
    pub fn send_out(&self, data: &[u8]) {
        let waker = {
            let mut host = self.host.borrow_mut();
            host.outbound.push_back(data.to_vec());
            host.producer.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Every bulk IN packet the host received
    pub fn in_packets(&self) -> Vec<Vec<u8>> {
        self.host.borrow().in_packets.clone()
    }
}

pub struct WakeCounter(AtomicUsize);

impl WakeCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl ArcWake for WakeCounter {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A waker that counts its wakes
pub fn counting_waker() -> (Waker, Arc<WakeCounter>) {
    let counter = Arc::new(WakeCounter(AtomicUsize::new(0)));
    (futures::task::waker(Arc::clone(&counter)), counter)
}

/// Something the FRAM saw on the bus
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BusOp {
    Select,
    Deselect,
    Transmit(Vec<u8>),
    Receive(usize),
    Send(usize, Duration),
}

/// An emulated SPI FRAM
pub struct MockBus {
    memory: Vec<u8>,
    ops: Vec<BusOp>,
    selected: bool,
    write_enabled: bool,
    command: Option<(u8, usize)>,
    /// Fail every command frame.
    pub fail_transmit: bool,
    /// Fail every data phase.
    pub data_error: Option<BusError>,
    /// Runs before the next command frame.
    pub on_transmit: Option<Box<dyn FnOnce()>>,
}

impl MockBus {
    pub fn new() -> Self {
        MockBus {
            memory: vec![0; crate::config::FRAM_CAPACITY as usize],
            ops: Vec::new(),
            selected: false,
            write_enabled: false,
            command: None,
            fail_transmit: false,
            data_error: None,
            on_transmit: None,
        }
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn ops(&self) -> &[BusOp] {
        &self.ops
    }

    /// Forget the recorded operations
    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    fn wrap(&self, address: usize) -> usize {
        address % self.memory.len()
    }
}

impl SerialBus for MockBus {
    fn set_select(&mut self, selected: bool) {
        if selected {
            self.ops.push(BusOp::Select);
        } else {
            self.ops.push(BusOp::Deselect);
            // The latch resets when a WRITE frame ends.
            if matches!(self.command, Some((0x02, _))) {
                self.write_enabled = false;
            }
        }
        self.selected = selected;
        self.command = None;
    }

    fn transmit(&mut self, words: &[u8]) -> Result<(), BusError> {
        assert!(self.selected, "transmit without select");
        if let Some(hook) = self.on_transmit.take() {
            hook();
        }
        if self.fail_transmit {
            return Err(BusError::Failed);
        }
        self.ops.push(BusOp::Transmit(words.to_vec()));
        match words {
            [0x06] => self.write_enabled = true,
            [opcode @ (0x02 | 0x03), high, mid, low] => {
                let address = u32::from_be_bytes([0, *high, *mid, *low]) as usize;
                self.command = Some((*opcode, address));
            }
            _ => panic!("unexpected command frame {words:02X?}"),
        }
        Ok(())
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Result<(), BusError> {
        assert!(self.selected, "receive without select");
        if let Some(err) = self.data_error {
            return Err(err);
        }
        self.ops.push(BusOp::Receive(buffer.len()));
        if let Some((0x03, address)) = self.command {
            for (offset, byte) in buffer.iter_mut().enumerate() {
                *byte = self.memory[self.wrap(address + offset)];
            }
        }
        Ok(())
    }

    fn send(&mut self, words: &[u8], timeout: Duration) -> Result<(), BusError> {
        assert!(self.selected, "send without select");
        if let Some(err) = self.data_error {
            return Err(err);
        }
        self.ops.push(BusOp::Send(words.len(), timeout));
        if let (Some((0x02, address)), true) = (self.command, self.write_enabled) {
            for (offset, byte) in words.iter().enumerate() {
                let index = self.wrap(address + offset);
                self.memory[index] = *byte;
            }
        }
        Ok(())
    }
}
