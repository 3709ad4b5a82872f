use crate::{BusInfo, CanBus, CanFilter, CanFrame, Result, Timestamp, TransportError};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Produces the frames a simulated device answers with when `frame` is sent.
pub type Responder = Box<dyn FnMut(&CanFrame) -> Vec<CanFrame> + Send>;

struct Wire {
    name: String,
    inbound_tx: Sender<CanFrame>,
    inbound_rx: Receiver<CanFrame>,
    sent: Mutex<Vec<CanFrame>>,
    responder: Mutex<Option<Responder>>,
}

/// A simple in-process mock bus.
///
/// Every handle cloned from the same bus shares one wire: frames injected
/// through a [`MockHandle`] (or produced by the responder) are read by
/// `recv`, and every sent frame is logged.
#[derive(Clone)]
pub struct MockBus {
    wire: Arc<Wire>,
}

/// Test-side view of a [`MockBus`] wire.
#[derive(Clone)]
pub struct MockHandle {
    wire: Arc<Wire>,
}

impl MockBus {
    pub fn new(name: &str) -> Self {
        let (inbound_tx, inbound_rx) = unbounded();
        Self {
            wire: Arc::new(Wire {
                name: name.to_string(),
                inbound_tx,
                inbound_rx,
                sent: Mutex::new(Vec::new()),
                responder: Mutex::new(None),
            }),
        }
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            wire: Arc::clone(&self.wire),
        }
    }
}

impl MockHandle {
    pub fn name(&self) -> &str {
        &self.wire.name
    }

    /// Queue a frame as if it had arrived from the bus.
    pub fn inject(&self, frame: CanFrame) {
        // The wire owns both channel ends, so the send cannot fail.
        let _ = self.wire.inbound_tx.send(frame);
    }

    pub fn sent(&self) -> Vec<CanFrame> {
        self.wire.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.wire.sent.lock().len()
    }

    pub fn clear_sent(&self) {
        self.wire.sent.lock().clear();
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&CanFrame) -> Vec<CanFrame> + Send + 'static,
    {
        *self.wire.responder.lock() = Some(Box::new(responder));
    }

    pub fn clear_responder(&self) {
        *self.wire.responder.lock() = None;
    }
}

impl CanBus for MockBus {
    fn open(name: &str) -> Result<Self> {
        Ok(Self::new(name))
    }

    fn list() -> Result<Vec<BusInfo>> {
        Ok(vec![BusInfo {
            name: "mock0".to_string(),
            driver: "mock".to_string(),
        }])
    }

    fn set_filters(&mut self, _filters: &[CanFilter]) -> Result<()> {
        let _ = _filters;
        // Mock supports no filters
        Err(TransportError::Unsupported(
            "mock backend has no hardware filters",
        ))
    }

    fn recv(&mut self, timeout_ms: Option<u64>) -> Result<CanFrame> {
        let mut frame = match timeout_ms {
            Some(ms) => match self.wire.inbound_rx.recv_timeout(Duration::from_millis(ms)) {
                Ok(f) => f,
                Err(RecvTimeoutError::Timeout) => return Err(TransportError::Timeout),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::Closed(self.wire.name.clone()))
                }
            },
            None => self
                .wire
                .inbound_rx
                .recv()
                .map_err(|_| TransportError::Closed(self.wire.name.clone()))?,
        };
        frame.timestamp = Some(Timestamp::now());
        Ok(frame)
    }

    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        self.wire.sent.lock().push(frame.clone());
        let replies = match self.wire.responder.lock().as_mut() {
            Some(respond) => respond(frame),
            None => Vec::new(),
        };
        for reply in replies {
            let _ = self.wire.inbound_tx.send(reply);
        }
        Ok(())
    }

    fn try_clone(&self) -> Result<Self> {
        Ok(self.clone())
    }
}
