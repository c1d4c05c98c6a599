//! Receive-side byte transport between the UART and the parser.
//!
//! The low-level UART driver owns an [`Input`] handle and pushes every
//! received chunk with [`Input::push`], typically straight from the receive
//! interrupt. Bytes land in a single-producer/single-consumer ring consumed
//! by the link runner; a signal wakes the runner when new bytes arrive.
//! When the ring is full the excess bytes are dropped and counted.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use heapless::spsc::{Consumer, Producer, Queue};

pub(crate) struct InputShared {
    pub(crate) wake: Signal<CriticalSectionRawMutex, ()>,
    pub(crate) dropped: AtomicU32,
}

impl InputShared {
    pub(crate) const fn new() -> Self {
        Self {
            wake: Signal::new(),
            dropped: AtomicU32::new(0),
        }
    }
}

/// Byte-push handle for the UART receive path.
///
/// Safe to drive from interrupt context: pushing never blocks and never
/// allocates.
pub struct Input<'a, const N: usize> {
    pub(crate) producer: Producer<'a, u8, N>,
    pub(crate) shared: &'a InputShared,
}

impl<const N: usize> Input<'_, N> {
    /// Feeds received bytes into the ring and wakes the parser. Returns the
    /// number of bytes accepted; the rest were dropped and counted.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let mut accepted = 0;
        for &b in bytes {
            if self.producer.enqueue(b).is_err() {
                let lost = (bytes.len() - accepted) as u32;
                self.shared.dropped.fetch_add(lost, Ordering::Relaxed);
                break;
            }
            accepted += 1;
        }
        if accepted > 0 {
            self.shared.wake.signal(());
        }
        accepted
    }

    /// Number of bytes dropped because the ring was full.
    pub fn dropped(&self) -> u32 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

/// Parser-side endpoint of the receive ring.
pub(crate) struct RxSource<'a, const N: usize> {
    pub(crate) consumer: Consumer<'a, u8, N>,
    pub(crate) shared: &'a InputShared,
}

impl<const N: usize> RxSource<'_, N> {
    pub(crate) fn pop(&mut self) -> Option<u8> {
        self.consumer.dequeue()
    }

    pub(crate) async fn wait(&self) {
        self.shared.wake.wait().await;
    }
}

/// Splits a receive ring into its interrupt-side and parser-side endpoints.
pub(crate) fn split<'a, const N: usize>(
    queue: &'a mut Queue<u8, N>,
    shared: &'a InputShared,
) -> (Input<'a, N>, RxSource<'a, N>) {
    let (producer, consumer) = queue.split();
    (
        Input { producer, shared },
        RxSource { consumer, shared },
    )
}

/// Copies bytes from an async reader into an [`Input`], for platforms where
/// the UART is exposed as an `embedded_io_async::Read` instead of a receive
/// interrupt. Spawn alongside the runners.
pub async fn feed_from<R: embedded_io_async::Read, const N: usize>(
    mut reader: R,
    mut input: Input<'_, N>,
) -> ! {
    let mut buf = [0u8; 64];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => embassy_futures::yield_now().await,
            Ok(n) => {
                input.push(&buf[..n]);
            }
            Err(_) => embassy_futures::yield_now().await,
        }
    }
}
