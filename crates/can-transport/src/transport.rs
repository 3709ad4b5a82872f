//! Per-interface frame hub.
//!
//! A [`CanTransport`] owns one physical interface. A dedicated receive
//! thread reads frames continuously and hands each one, synchronously, to the
//! handler registered under the frame's dispatch key. Transmission is
//! serialized behind a mutex on a second backend handle so that callers on
//! any thread never contend with the blocking read.

use crate::{CanBus, CanFrame, Result, TransportError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// Consumer of frames routed to one key. Runs on the receive thread and must not block.
pub type FrameHandler = Arc<dyn Fn(&CanFrame) + Send + Sync>;

/// Maps an incoming frame to the key its consumer registered under.
pub type KeyExtractor = Arc<dyn Fn(&CanFrame) -> u32 + Send + Sync>;

/// Poll period of the receive loop; bounds how long shutdown waits.
const RECV_POLL_MS: u64 = 50;
const IO_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TransportStats {
    pub tx_frames: u64,
    pub rx_frames: u64,
    pub dropped_frames: u64,
}

struct Routing {
    handlers: RwLock<HashMap<u32, FrameHandler>>,
    extractor: RwLock<KeyExtractor>,
    rx_frames: AtomicU64,
    dropped: AtomicU64,
}

impl Routing {
    fn dispatch(&self, frame: &CanFrame) {
        self.rx_frames.fetch_add(1, Ordering::Relaxed);
        let key = (self.extractor.read())(frame);
        // Clone the handler out so the lock is not held while it runs.
        let handler = self.handlers.read().get(&key).cloned();
        match handler {
            Some(handler) => handler(frame),
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(key, %frame, "no consumer for frame");
            }
        }
    }
}

pub struct CanTransport {
    name: String,
    tx: Mutex<Box<dyn CanBus>>,
    routing: Arc<Routing>,
    running: Arc<AtomicBool>,
    rx_thread: Mutex<Option<JoinHandle<()>>>,
    tx_frames: AtomicU64,
}

impl CanTransport {
    /// Take ownership of `bus` and start its receive thread.
    pub fn start<B>(name: &str, bus: B) -> Result<Self>
    where
        B: CanBus + 'static,
    {
        let tx = bus.try_clone()?;
        let routing = Arc::new(Routing {
            handlers: RwLock::new(HashMap::new()),
            extractor: RwLock::new(Arc::new(|f: &CanFrame| f.id.raw())),
            rx_frames: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let routing = Arc::clone(&routing);
            let running = Arc::clone(&running);
            let name = name.to_string();
            thread::Builder::new()
                .name(format!("can-rx-{name}"))
                .spawn(move || receive_loop(name, bus, routing, running))
                .map_err(|e| TransportError::Io(e.to_string()))?
        };
        info!(iface = name, "transport started");

        Ok(Self {
            name: name.to_string(),
            tx: Mutex::new(Box::new(tx)),
            routing,
            running,
            rx_thread: Mutex::new(Some(handle)),
            tx_frames: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Route frames whose key is `key` to `handler`.
    ///
    /// Re-registering a key replaces the previous handler; the return value
    /// tells whether one was replaced.
    pub fn register(&self, key: u32, handler: FrameHandler) -> bool {
        let replaced = self.routing.handlers.write().insert(key, handler).is_some();
        if replaced {
            debug!(iface = %self.name, key, "handler replaced");
        }
        replaced
    }

    /// Stop routing `key`. A dispatch already in flight may still complete once.
    pub fn unregister(&self, key: u32) -> bool {
        self.routing.handlers.write().remove(&key).is_some()
    }

    /// Stop routing `key` only while `handler` is the one registered under it.
    ///
    /// A consumer that was replaced by a later registration leaves the newer
    /// handler in place and gets `false`.
    pub fn unregister_handler(&self, key: u32, handler: &FrameHandler) -> bool {
        let mut handlers = self.routing.handlers.write();
        match handlers.get(&key) {
            Some(current) if same_handler(current, handler) => {
                handlers.remove(&key);
                true
            }
            _ => {
                debug!(iface = %self.name, key, "handler already replaced, left in place");
                false
            }
        }
    }

    pub fn set_key_extractor(&self, extractor: KeyExtractor) {
        *self.routing.extractor.write() = extractor;
    }

    pub fn transmit(&self, frame: &CanFrame) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(TransportError::Closed(self.name.clone()));
        }
        self.tx.lock().send(frame)?;
        self.tx_frames.fetch_add(1, Ordering::Relaxed);
        trace!(iface = %self.name, %frame, "tx");
        Ok(())
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            tx_frames: self.tx_frames.load(Ordering::Relaxed),
            rx_frames: self.routing.rx_frames.load(Ordering::Relaxed),
            dropped_frames: self.routing.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the receive thread and wait for it to exit.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.rx_thread.lock().take() {
            if handle.join().is_err() {
                error!(iface = %self.name, "receive thread panicked");
            }
        }
        info!(iface = %self.name, "transport stopped");
    }
}

impl Drop for CanTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// Compares the allocations only; vtable pointers of one closure type may differ per codegen unit.
fn same_handler(a: &FrameHandler, b: &FrameHandler) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn receive_loop<B: CanBus>(name: String, mut bus: B, routing: Arc<Routing>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Acquire) {
        match bus.recv(Some(RECV_POLL_MS)) {
            Ok(frame) => routing.dispatch(&frame),
            Err(TransportError::Timeout) => {}
            Err(TransportError::Closed(_)) => {
                info!(iface = %name, "bus closed, receive thread exiting");
                break;
            }
            Err(TransportError::InvalidFrame(why)) => {
                debug!(iface = %name, why, "discarding malformed frame");
            }
            Err(e) => {
                error!(iface = %name, error = %e, "receive failed");
                thread::sleep(IO_BACKOFF);
            }
        }
    }
}
