//! Driver wiring: resource pool, handle and the two background runners.
//!
//! The application owns a [`Resources`] pool (typically in a `static`) and
//! splits it once into the four cooperating parts:
//!
//! * [`Driver`]: cloneable handle carrying the whole public API,
//! * [`Input`]: receive-side byte push for the UART driver/ISR,
//! * [`LinkRunner`]: owns the UART TX path, executes commands and parses
//!   replies; spawn `run()` as a task,
//! * [`EventPump`]: drains the consumer queue into a user
//!   [`EventHandler`]; spawn `run()` as a task.
//!
//! No threads are created here; both runners are plain futures.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, DynamicReceiver, DynamicSender};
use embassy_time::{Duration, Instant};
use embedded_io_async::Write;
use heapless::spsc::Queue;

use crate::conn::{ConnId, Shared, SharedState, MAX_CONNS};
use crate::error::Error;
use crate::event::{Event, EventHandler};
use crate::input::{self, Input, InputShared, RxSource};
use crate::parser::Parser;
use crate::pipeline::{CmdResult, CompletionSlab, Message, Operation, CMD_BUF_LEN};

/// Tunables of the driver core.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Bound for blocking API calls waiting on their completion. `None`
    /// waits for the pipeline timeout to fire.
    pub block_time: Option<Duration>,
    /// Interval of the `ConnPoll` tick driving retries in the HTTP server
    pub poll_interval: Duration,
    /// Wait for the `ready` line after a reset
    pub ready_timeout: Duration,
    /// Overrides every operation's pipeline timeout when set. Meant for
    /// host tests; leave `None` on hardware.
    pub pipeline_timeout_override: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_time: None,
            poll_interval: Duration::from_millis(500),
            ready_timeout: Duration::from_secs(5),
            pipeline_timeout_override: None,
        }
    }
}

/// Statically allocatable state of one driver instance.
pub struct Resources<const RX_BUF: usize = 1024, const CMD_Q: usize = 8, const EVT_Q: usize = 16> {
    rx_queue: Queue<u8, RX_BUF>,
    input_shared: InputShared,
    commands: Channel<CriticalSectionRawMutex, Message, CMD_Q>,
    events: Channel<CriticalSectionRawMutex, Event, EVT_Q>,
    slab: CompletionSlab,
    shared: SharedState,
    config: Config,
}

impl<const RX_BUF: usize, const CMD_Q: usize, const EVT_Q: usize> Default
    for Resources<RX_BUF, CMD_Q, EVT_Q>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const RX_BUF: usize, const CMD_Q: usize, const EVT_Q: usize>
    Resources<RX_BUF, CMD_Q, EVT_Q>
{
    pub const fn new() -> Self {
        Self {
            rx_queue: Queue::new(),
            input_shared: InputShared::new(),
            commands: Channel::new(),
            events: Channel::new(),
            slab: CompletionSlab::new(),
            shared: embassy_sync::blocking_mutex::Mutex::new(core::cell::RefCell::new(
                Shared::new(),
            )),
            config: Config {
                block_time: None,
                poll_interval: Duration::from_millis(500),
                ready_timeout: Duration::from_secs(5),
                pipeline_timeout_override: None,
            },
        }
    }
}

/// Splits the resource pool into driver handle, receive input and runners.
pub fn new<'a, W, const RX_BUF: usize, const CMD_Q: usize, const EVT_Q: usize>(
    resources: &'a mut Resources<RX_BUF, CMD_Q, EVT_Q>,
    tx: W,
    config: Config,
) -> (
    Driver<'a>,
    Input<'a, RX_BUF>,
    LinkRunner<'a, W, RX_BUF>,
    EventPump<'a>,
)
where
    W: Write,
{
    resources.config = config;

    let (input, rx) = input::split(&mut resources.rx_queue, &resources.input_shared);

    let driver = Driver {
        commands: resources.commands.sender().into(),
        events: resources.events.sender().into(),
        slab: &resources.slab,
        shared: &resources.shared,
        config: &resources.config,
    };

    let parser = Parser::new(&resources.shared, resources.events.sender().into());

    let runner = LinkRunner {
        tx,
        rx,
        parser,
        commands: resources.commands.receiver().into(),
        events: resources.events.sender().into(),
        slab: &resources.slab,
        shared: &resources.shared,
        config: &resources.config,
    };

    let pump = EventPump {
        events: resources.events.receiver().into(),
        driver: driver.clone(),
    };

    (driver, input, runner, pump)
}

/// Cloneable handle to a running driver.
pub struct Driver<'a> {
    pub(crate) commands: DynamicSender<'a, Message>,
    pub(crate) events: DynamicSender<'a, Event>,
    pub(crate) slab: &'a CompletionSlab,
    pub(crate) shared: &'a SharedState,
    pub(crate) config: &'a Config,
}

impl Clone for Driver<'_> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            events: self.events.clone(),
            slab: self.slab,
            shared: self.shared,
            config: self.config,
        }
    }
}

impl<'a> Driver<'a> {
    /// Issues an operation and waits for its result, bounded by the
    /// configured block time.
    pub(crate) async fn request(&self, op: Operation) -> CmdResult {
        let token = self.slab.claim().ok_or(Error::NoMem)?;
        let timeout = self.pipeline_timeout(&op);
        self.commands
            .send(Message {
                op,
                token: Some(token),
                timeout,
            })
            .await;
        self.slab.wait(token, self.config.block_time).await
    }

    /// Enqueues an operation without waiting; completion is reported on the
    /// event channel.
    pub(crate) fn submit(&self, op: Operation) -> Result<(), Error> {
        let timeout = self.pipeline_timeout(&op);
        self.commands
            .try_send(Message {
                op,
                token: None,
                timeout,
            })
            .map_err(|_| Error::NoMem)
    }

    fn pipeline_timeout(&self, op: &Operation) -> Duration {
        self.config
            .pipeline_timeout_override
            .unwrap_or_else(|| op.pipeline_timeout())
    }

    /// Wifi session status as maintained from unsolicited messages.
    pub fn wifi_status(&self) -> crate::conn::WifiStatus {
        self.shared.lock(|s| s.borrow().wifi)
    }

    /// Number of events dropped because the consumer queue was full.
    pub fn events_dropped(&self) -> u32 {
        self.shared.lock(|s| s.borrow().events_dropped)
    }

    pub(crate) fn post(&self, event: Event) {
        if self.events.try_send(event).is_err() {
            self.shared.lock(|s| s.borrow_mut().events_dropped += 1);
        }
    }
}

/// Producer/transport half: executes queued commands against the modem and
/// feeds every received byte through the parser.
pub struct LinkRunner<'a, W: Write, const RX_BUF: usize> {
    tx: W,
    rx: RxSource<'a, RX_BUF>,
    parser: Parser<'a>,
    commands: DynamicReceiver<'a, Message>,
    events: DynamicSender<'a, Event>,
    slab: &'a CompletionSlab,
    shared: &'a SharedState,
    config: &'a Config,
}

impl<W: Write, const RX_BUF: usize> LinkRunner<'_, W, RX_BUF> {
    /// Drives the link forever. Spawn as a task.
    pub async fn run(mut self) -> ! {
        loop {
            self.pump_rx();
            match embassy_futures::select::select(self.commands.receive(), self.rx.wait()).await
            {
                embassy_futures::select::Either::First(msg) => self.execute(msg).await,
                embassy_futures::select::Either::Second(()) => {}
            }
        }
    }

    /// Processes pending work without blocking on empty queues. Returns
    /// true when a command was executed. Used by host tests.
    pub(crate) async fn service(&mut self) -> bool {
        self.pump_rx();
        match self.commands.try_receive() {
            Ok(msg) => {
                self.execute(msg).await;
                true
            }
            Err(_) => false,
        }
    }

    fn pump_rx(&mut self) {
        while let Some(byte) = self.rx.pop() {
            self.parser.feed(byte);
        }
    }

    async fn execute(&mut self, msg: Message) {
        let Message { op, token, timeout } = msg;
        let deadline = Instant::now() + timeout;

        self.parser.begin(&op);
        let result = self.transact(&op, deadline).await;
        self.finish(op, token, result);
    }

    /// One full command exchange: text out, optional prompt + payload,
    /// terminal line in.
    async fn transact(&mut self, op: &Operation, deadline: Instant) -> CmdResult {
        let mut buf = [0u8; CMD_BUF_LEN];
        let len = op.write(&mut buf);
        if self.tx.write_all(&buf[..len]).await.is_err() {
            self.parser.abort();
            return Err(Error::NoDevice);
        }

        let mut payload_sent = false;
        loop {
            self.pump_rx();

            if let Operation::Send { data, .. } = op {
                if self.parser.prompt_seen() && !payload_sent {
                    payload_sent = true;
                    for seg in data.slices() {
                        if self.tx.write_all(seg).await.is_err() {
                            self.parser.abort();
                            return Err(Error::NoDevice);
                        }
                    }
                    // The payload may already have produced a terminal.
                    self.pump_rx();
                }
            }

            if let Some(result) = self.parser.take_resolution() {
                return result;
            }

            let now = Instant::now();
            if now >= deadline {
                self.parser.abort();
                return Err(Error::Timeout);
            }
            if embassy_time::with_timeout(deadline - now, self.rx.wait())
                .await
                .is_err()
            {
                self.parser.abort();
                return Err(Error::Timeout);
            }
        }
    }

    /// Applies side effects of the finished command and reports the result.
    fn finish(&mut self, op: Operation, token: Option<u8>, result: CmdResult) {
        let kind = op.kind();
        let conn = op.conn();

        let result = match (&op, result) {
            (Operation::Start { id, .. }, Ok(payload)) => {
                // CIPSTART succeeded; the CONNECT line must have activated
                // the claimed slot by now.
                let active = self.shared.lock(|s| {
                    let mut s = s.borrow_mut();
                    let entry = &mut s.conns[id.index()];
                    entry.reserved = false;
                    entry.active
                });
                if active {
                    Ok(payload)
                } else {
                    self.shared
                        .lock(|s| s.borrow_mut().conns[id.index()].reset());
                    Err(Error::ConnFail)
                }
            }
            (Operation::Start { id, .. }, Err(e)) => {
                self.shared
                    .lock(|s| s.borrow_mut().conns[id.index()].reset());
                Err(e)
            }
            (Operation::Send { id, data }, Ok(payload)) => {
                let mem_available = self.shared.lock(|s| {
                    let mut s = s.borrow_mut();
                    let entry = &mut s.conns[id.index()];
                    entry.in_flight = entry.in_flight.saturating_sub(data.len());
                    entry.bytes_sent += data.len();
                    entry.write_credit()
                });
                self.emit(Event::ConnDataSent {
                    id: *id,
                    len: data.len(),
                    mem_available,
                });
                Ok(payload)
            }
            (Operation::Send { id, data }, Err(e)) => {
                self.shared.lock(|s| {
                    let mut s = s.borrow_mut();
                    let entry = &mut s.conns[id.index()];
                    entry.in_flight = entry.in_flight.saturating_sub(data.len());
                });
                self.emit(Event::ConnDataSendErr { id: *id });
                Err(e)
            }
            (_, result) => result,
        };

        match token {
            Some(token) => self.slab.complete(token, result),
            None => {
                // Connection events above already tell the whole story for
                // conn-scoped operations.
                if conn.is_none() {
                    self.emit(Event::CommandDone {
                        op: kind,
                        result: result.map(|_| ()),
                    });
                }
            }
        }
    }

    fn emit(&mut self, event: Event) {
        if self.events.try_send(event).is_err() {
            self.shared.lock(|s| s.borrow_mut().events_dropped += 1);
        }
    }
}

/// Consumer half: feeds events to the user handler in parse order.
pub struct EventPump<'a> {
    events: DynamicReceiver<'a, Event>,
    driver: Driver<'a>,
}

impl<'a> EventPump<'a> {
    /// Dispatches events forever, interleaving periodic `ConnPoll` ticks
    /// for every active connection. Spawn as a task.
    pub async fn run<H: EventHandler>(mut self, handler: &mut H) -> ! {
        loop {
            match embassy_futures::select::select(
                self.events.receive(),
                embassy_time::Timer::after(self.driver.config.poll_interval),
            )
            .await
            {
                embassy_futures::select::Either::First(event) => self.dispatch(handler, event),
                embassy_futures::select::Either::Second(()) => self.poll_connections(handler),
            }
        }
    }

    /// Dispatches one pending event if any. Used by host tests.
    pub(crate) fn service<H: EventHandler>(&mut self, handler: &mut H) -> bool {
        match self.events.try_receive() {
            Ok(event) => {
                self.dispatch(handler, event);
                true
            }
            Err(_) => false,
        }
    }

    fn dispatch<H: EventHandler>(&mut self, handler: &mut H, event: Event) {
        let closed = match &event {
            Event::ConnClosed { id, .. } => Some(*id),
            _ => None,
        };
        handler.on_event(&self.driver, event);
        // The slot is recycled only after the final callback returned.
        if let Some(id) = closed {
            self.driver
                .shared
                .lock(|s| s.borrow_mut().conns[id.index()].reset());
        }
    }

    fn poll_connections<H: EventHandler>(&mut self, handler: &mut H) {
        for index in 0..MAX_CONNS {
            let active = self
                .driver
                .shared
                .lock(|s| s.borrow().conns[index].active);
            if active {
                handler.on_event(
                    &self.driver,
                    Event::ConnPoll {
                        id: ConnId::from_index(index),
                    },
                );
            }
        }
    }
}
