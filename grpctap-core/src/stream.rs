//! # Stream Bridge
//!
//! Adapts the event-driven response side of a streaming call (discrete data /
//! error / end events arriving at the transport's pace) into a pull-based,
//! cancellable sequence.
//!
//! A pump task forwards transport events into a bounded FIFO channel; the
//! bridge's consumer pulls them one at a time. Delivery order equals arrival
//! order, nothing is dropped or duplicated, and the channel receiver is the
//! single outstanding waiter. An error event is delivered as a terminal item
//! and iteration stops; an end event stops iteration cleanly with no terminal
//! item.
//!
//! Dropping or cancelling the bridge aborts the pump, which drops the
//! transport stream and thereby cancels the underlying call, even if further
//! events were already in flight.

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tonic::Status;

/// Bound on undelivered events; a slow consumer backpressures the pump, not
/// the process.
const EVENT_BUFFER: usize = 128;

enum Event<T> {
    Data(T),
    Failed(Status),
}

pub struct StreamBridge<T> {
    rx: mpsc::Receiver<Event<T>>,
    pump: JoinHandle<()>,
    finished: bool,
}

impl<T: Send + 'static> StreamBridge<T> {
    /// Starts pumping `transport` in the background.
    pub fn new<U>(transport: U) -> Self
    where
        U: Stream<Item = Result<T, Status>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let pump = tokio::spawn(async move {
            futures_util::pin_mut!(transport);
            while let Some(event) = transport.next().await {
                match event {
                    Ok(item) => {
                        if tx.send(Event::Data(item)).await.is_err() {
                            // Consumer went away; stop pumping.
                            return;
                        }
                    }
                    Err(status) => {
                        let _ = tx.send(Event::Failed(status)).await;
                        return;
                    }
                }
            }
        });
        Self {
            rx,
            pump,
            finished: false,
        }
    }

    /// Pulls the next item, suspending until the transport produces one.
    ///
    /// `Some(Err(_))` is always the last delivered item; `None` means the
    /// stream ended (cleanly, or after a previously delivered error).
    pub async fn next(&mut self) -> Option<Result<T, Status>> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(Event::Data(item)) => Some(Ok(item)),
            Some(Event::Failed(status)) => {
                self.finished = true;
                Some(Err(status))
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    /// Stops consumption and cancels the underlying transport stream.
    /// Buffered but undelivered items are discarded.
    pub fn cancel(&mut self) {
        self.pump.abort();
        self.rx.close();
        self.finished = true;
    }
}

impl<T> Drop for StreamBridge<T> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
