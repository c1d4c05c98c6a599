//! Scripted modem link and test harness.
//!
//! The harness wires a full driver instance to a [`ScriptedLink`]: a fake
//! UART whose transmit side records every byte and injects scripted modem
//! replies into the receive ring as soon as the recorded stream ends with
//! the expected trigger. Reactions fire in script order, so a test reads as
//! a transcript of the expected exchange.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use embassy_time::Duration;

use crate::device::{Config, Driver, EventPump, LinkRunner, Resources};
use crate::event::{Event, EventHandler};
use crate::input::Input;

pub const RX_BUF: usize = 2048;

pub type TestResources = Resources<RX_BUF, 8, 16>;

pub struct Reaction {
    pub after: Vec<u8>,
    pub inject: Vec<u8>,
}

type SharedInput<'a> = Rc<RefCell<Option<Input<'a, RX_BUF>>>>;

/// Fake UART: records TX bytes, injects scripted replies.
pub struct ScriptedLink<'a> {
    sent: Rc<RefCell<Vec<u8>>>,
    script: Rc<RefCell<VecDeque<Reaction>>>,
    input: SharedInput<'a>,
}

impl embedded_io::ErrorType for ScriptedLink<'_> {
    type Error = core::convert::Infallible;
}

impl embedded_io_async::Write for ScriptedLink<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.sent.borrow_mut().extend_from_slice(buf);
        loop {
            let matched = {
                let sent = self.sent.borrow();
                let script = self.script.borrow();
                match script.front() {
                    Some(reaction) => sent.ends_with(&reaction.after),
                    None => false,
                }
            };
            if !matched {
                break;
            }
            let reaction = self.script.borrow_mut().pop_front().unwrap();
            if let Some(input) = self.input.borrow_mut().as_mut() {
                input.push(&reaction.inject);
            }
        }
        Ok(buf.len())
    }
}

pub struct Harness<'a> {
    pub driver: Driver<'a>,
    pub runner: LinkRunner<'a, ScriptedLink<'a>, RX_BUF>,
    pub pump: EventPump<'a>,
    input: SharedInput<'a>,
    sent: Rc<RefCell<Vec<u8>>>,
    script: Rc<RefCell<VecDeque<Reaction>>>,
}

impl<'a> Harness<'a> {
    pub fn new(resources: &'a mut TestResources) -> Self {
        Self::with_config(resources, test_config())
    }

    pub fn with_config(resources: &'a mut TestResources, config: Config) -> Self {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let script = Rc::new(RefCell::new(VecDeque::new()));
        let shared_input: SharedInput<'a> = Rc::new(RefCell::new(None));

        let link = ScriptedLink {
            sent: sent.clone(),
            script: script.clone(),
            input: shared_input.clone(),
        };

        let (driver, input, runner, pump) = crate::device::new(resources, link, config);
        shared_input.borrow_mut().replace(input);

        Self {
            driver,
            runner,
            pump,
            input: shared_input,
            sent,
            script,
        }
    }

    /// Scripts one modem reaction: once the transmitted stream ends with
    /// `after`, `inject` is pushed into the receive ring.
    pub fn expect(&self, after: &[u8], inject: &[u8]) {
        self.script.borrow_mut().push_back(Reaction {
            after: after.to_vec(),
            inject: inject.to_vec(),
        });
    }

    /// Pushes unsolicited modem bytes, as the UART ISR would.
    pub fn inject(&self, bytes: &[u8]) {
        self.input.borrow_mut().as_mut().unwrap().push(bytes);
    }

    pub fn sent_str(&self) -> String {
        String::from_utf8_lossy(&self.sent.borrow()).into_owned()
    }

    pub fn unused_reactions(&self) -> usize {
        self.script.borrow().len()
    }
}

pub fn test_config() -> Config {
    Config {
        block_time: None,
        poll_interval: Duration::from_millis(50),
        ready_timeout: Duration::from_millis(100),
        pipeline_timeout_override: Some(Duration::from_millis(250)),
    }
}

/// Runs `fut` to completion while cranking the runner and event pump.
pub fn drive<T>(
    h: &mut Harness<'_>,
    handler: &mut impl EventHandler,
    fut: impl core::future::Future<Output = T>,
) -> T {
    let runner = &mut h.runner;
    let pump = &mut h.pump;
    embassy_futures::block_on(async {
        let crank = async {
            loop {
                let _ = runner.service().await;
                while pump.service(handler) {}
                embassy_futures::yield_now().await;
            }
        };
        match embassy_futures::select::select(fut, crank).await {
            embassy_futures::select::Either::First(value) => value,
            embassy_futures::select::Either::Second(_) => unreachable!(),
        }
    })
}

/// Cranks runner and pump until nothing makes progress anymore.
pub fn settle(h: &mut Harness<'_>, handler: &mut impl EventHandler) {
    let runner = &mut h.runner;
    let pump = &mut h.pump;
    embassy_futures::block_on(async {
        loop {
            let ran = runner.service().await;
            let mut dispatched = false;
            while pump.service(handler) {
                dispatched = true;
            }
            if !ran && !dispatched {
                break;
            }
        }
    });
}

/// Event handler collecting everything it sees.
#[derive(Default)]
pub struct Recorder {
    pub events: Vec<Event>,
}

impl EventHandler for Recorder {
    fn on_event(&mut self, _driver: &Driver<'_>, event: Event) {
        self.events.push(event);
    }
}

/// Handler that ignores every event.
pub struct Sink;

impl EventHandler for Sink {
    fn on_event(&mut self, _driver: &Driver<'_>, _event: Event) {}
}
