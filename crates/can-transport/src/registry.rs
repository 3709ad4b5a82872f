use crate::{CanTransport, Result, SlcanBitrate, TransportError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// Which backend a named interface is opened with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backend {
    Mock,
    Slcan { bitrate: SlcanBitrate },
    SocketCan,
}

impl FromStr for Backend {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(Backend::Mock),
            "slcan" => Ok(Backend::Slcan {
                bitrate: SlcanBitrate::B1M,
            }),
            "socketcan" => Ok(Backend::SocketCan),
            _ => Err(TransportError::Unsupported("unknown backend")),
        }
    }
}

/// Process-wide table of open interfaces, at most one transport per name.
///
/// Motors on the same interface share its transport; the registry keeps each
/// one alive until [`BusRegistry::shutdown_all`] or drop.
#[derive(Default)]
pub struct BusRegistry {
    open: Mutex<HashMap<String, Arc<CanTransport>>>,
}

impl BusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the transport for `name`, opening it with `backend` on first use.
    pub fn get_or_open(&self, name: &str, backend: Backend) -> Result<Arc<CanTransport>> {
        let mut open = self.open.lock();
        if let Some(t) = open.get(name) {
            return Ok(Arc::clone(t));
        }
        let transport = Arc::new(start_backend(name, backend)?);
        open.insert(name.to_string(), Arc::clone(&transport));
        tracing::info!(iface = name, ?backend, "interface registered");
        Ok(transport)
    }

    /// Register an already-constructed bus under `name`.
    pub fn attach<B>(&self, name: &str, bus: B) -> Result<Arc<CanTransport>>
    where
        B: crate::CanBus + 'static,
    {
        let mut open = self.open.lock();
        if open.contains_key(name) {
            return Err(TransportError::AlreadyOpen(name.to_string()));
        }
        let transport = Arc::new(CanTransport::start(name, bus)?);
        open.insert(name.to_string(), Arc::clone(&transport));
        Ok(transport)
    }

    pub fn get(&self, name: &str) -> Option<Arc<CanTransport>> {
        self.open.lock().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.open.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.open.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.lock().is_empty()
    }

    pub fn shutdown_all(&self) {
        let drained: Vec<_> = self.open.lock().drain().collect();
        for (_, transport) in drained {
            transport.shutdown();
        }
    }
}

#[cfg(feature = "mock")]
fn start_mock(name: &str) -> Result<CanTransport> {
    CanTransport::start(name, crate::MockBus::new(name))
}

#[cfg(not(feature = "mock"))]
fn start_mock(_name: &str) -> Result<CanTransport> {
    Err(TransportError::Unsupported("built without the mock backend"))
}

#[cfg(feature = "slcan")]
fn start_slcan(name: &str, bitrate: SlcanBitrate) -> Result<CanTransport> {
    CanTransport::start(name, crate::SlcanBus::open_with(name, Some(bitrate))?)
}

#[cfg(not(feature = "slcan"))]
fn start_slcan(_name: &str, _bitrate: SlcanBitrate) -> Result<CanTransport> {
    Err(TransportError::Unsupported("built without the slcan backend"))
}

#[cfg(all(feature = "socketcan", target_os = "linux"))]
fn start_socketcan(name: &str) -> Result<CanTransport> {
    use crate::CanBus;
    CanTransport::start(name, crate::SocketCanBus::open(name)?)
}

#[cfg(not(all(feature = "socketcan", target_os = "linux")))]
fn start_socketcan(_name: &str) -> Result<CanTransport> {
    Err(TransportError::Unsupported("built without the socketcan backend"))
}

fn start_backend(name: &str, backend: Backend) -> Result<CanTransport> {
    match backend {
        Backend::Mock => start_mock(name),
        Backend::Slcan { bitrate } => start_slcan(name, bitrate),
        Backend::SocketCan => start_socketcan(name),
    }
}
